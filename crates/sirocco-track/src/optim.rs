//! Per-frame registration optimizer.
//!
//! One frame is solved by gradient descent on a weighted objective: the
//! appearance term registers descriptor patches against the parent frame,
//! the detection term pulls keypoints up the detector heatmap, the spring
//! term keeps the keypoint constellation near its reference geometry, and
//! the temporal term tethers keypoints to recently solved frames. Gradients
//! are analytic throughout; there is no autograd tape to replay.

use sirocco_core::{Config, SpringMode, Volume};
use sirocco_models::{trilinear_with_grad, KeypointScore, RegistrationModel};

use crate::error::TrackError;
use crate::springs::SpringNetwork;

const NORM_EPS: f32 = 1e-6;

/// Loss weights and descent schedule of the per-frame optimizer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OptimParams {
    /// Detection weight. Non-positive disables the term.
    pub lambda_d: f32,
    /// Spring weight. Non-positive disables the term.
    pub lambda_n: f32,
    /// Form of the spring term.
    pub lambda_n_mode: SpringMode,
    /// Temporal weight. Non-positive disables the term.
    pub lambda_t: f32,
    /// Component-wise gradient clip. Negative leaves gradients uncapped.
    pub clip_grad: f32,
    /// Lower clamp for initial learning rates.
    pub lr_floor: f32,
    /// Upper clamp for initial learning rates.
    pub lr_ceiling: f32,
    /// Scale from mean spring rest-length to initial learning rate.
    pub lr_coef: f32,
    /// Main descent epochs.
    pub n_epoch: usize,
    /// Detection-phase epochs appended after the main epochs.
    pub n_epoch_d: usize,
    /// Count of trailing z-only epochs for volumetric frames.
    pub z_compensator: f32,
    /// Whether to optimize an in-plane rotation per keypoint.
    pub allow_rotation: bool,
}

impl OptimParams {
    /// Extract the optimizer schedule from a validated configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            lambda_d: config.lambda_d,
            lambda_n: config.lambda_n,
            lambda_n_mode: config.lambda_n_mode,
            lambda_t: config.lambda_t,
            clip_grad: config.clip_grad,
            lr_floor: config.lr_floor,
            lr_ceiling: config.lr_ceiling,
            lr_coef: config.lr_coef,
            n_epoch: config.n_epoch,
            n_epoch_d: config.n_epoch_d,
            z_compensator: config.z_compensator,
            allow_rotation: config.allow_rotation,
        }
    }
}

/// Everything the optimizer needs to solve one frame.
pub struct FrameProblem<'a> {
    /// The frame to register, normalized.
    pub volume: &'a Volume,
    /// Detector heatmap of the frame, when the detection term is enabled.
    pub heatmap: Option<&'a Volume>,
    /// Spring network over the tracked keypoints.
    pub springs: &'a SpringNetwork,
    /// Initial keypoint positions.
    pub initial: &'a [[f32; 3]],
    /// Keypoints pinned to a frame annotation. Pinned keypoints anchor
    /// their spring neighbors but are never moved.
    pub pinned: &'a [bool],
    /// Per-keypoint temporal anchor positions, when available.
    pub temporal_anchor: Option<&'a [[f32; 3]]>,
}

/// Solved state of one frame.
#[derive(Clone, Debug)]
pub struct FrameSolution {
    /// Final keypoint positions.
    pub positions: Vec<[f32; 3]>,
    /// Final in-plane rotations.
    pub rotations: Vec<f32>,
    /// Keypoints frozen by a non-finite loss or gradient.
    pub frozen: Vec<bool>,
    /// Sum of the last per-keypoint losses over unfrozen keypoints.
    pub loss: f32,
}

#[derive(Clone, Copy, PartialEq)]
enum Phase {
    Full,
    Detection,
    ZOnly,
}

fn spring_terms(
    springs: &SpringNetwork,
    pos: &[[f32; 3]],
    k: usize,
    mode: SpringMode,
) -> (f32, [f32; 3]) {
    let mut loss = 0.0;
    let mut grad = [0.0f32; 3];
    for &e in springs.incident(k) {
        let spring = springs.edges()[e as usize];
        let (j, rest) = if spring.a as usize == k {
            (spring.b as usize, spring.rest)
        } else {
            (
                spring.a as usize,
                [-spring.rest[0], -spring.rest[1], -spring.rest[2]],
            )
        };
        let delta = [
            pos[j][0] - pos[k][0],
            pos[j][1] - pos[k][1],
            pos[j][2] - pos[k][2],
        ];
        match mode {
            SpringMode::Disp => {
                for d in 0..3 {
                    let r = delta[d] - rest[d];
                    loss += r * r;
                    grad[d] -= 2.0 * r;
                }
            }
            SpringMode::Norm => {
                let len = (delta[0] * delta[0] + delta[1] * delta[1] + delta[2] * delta[2]).sqrt();
                let rest_len =
                    (rest[0] * rest[0] + rest[1] * rest[1] + rest[2] * rest[2]).sqrt();
                let diff = len - rest_len;
                loss += diff * diff;
                if len > NORM_EPS {
                    for d in 0..3 {
                        grad[d] -= 2.0 * diff * delta[d] / len;
                    }
                }
            }
        }
    }
    (loss, grad)
}

/// Solve one frame by gradient descent.
///
/// The schedule runs `n_epoch` full epochs, then `n_epoch_d` detection-phase
/// epochs (appearance dropped, regularizers kept), then the z-only epochs
/// for volumetric frames. Per-keypoint learning rates seed from the spring
/// rest geometry and halve whenever that keypoint's loss stops improving. A
/// keypoint that produces a non-finite loss or gradient is frozen for the
/// rest of the frame.
///
/// # Errors
///
/// Returns [`TrackError::Model`] when scoring fails; divergence is never an
/// error.
pub fn register_frame(
    model: &RegistrationModel,
    params: &OptimParams,
    problem: &FrameProblem<'_>,
) -> Result<FrameSolution, TrackError> {
    let n = problem.initial.len();
    let mut pos = problem.initial.to_vec();
    let mut rho = vec![0.0f32; n];
    let mut frozen: Vec<bool> = pos
        .iter()
        .map(|p| !p.iter().all(|v| v.is_finite()))
        .collect();
    let mut lr: Vec<f32> = (0..n)
        .map(|k| {
            (params.lr_coef * problem.springs.mean_rest_length(k))
                .clamp(params.lr_floor, params.lr_ceiling)
        })
        .collect();
    let mut best = vec![f32::INFINITY; n];

    let detection = params.lambda_d > 0.0 && problem.heatmap.is_some();
    let n_epoch_d = if detection { params.n_epoch_d } else { 0 };
    let z_epochs = if problem.volume.shape().is_planar() || params.z_compensator <= 0.0 {
        0
    } else {
        params.z_compensator.round() as usize
    };
    let total = params.n_epoch + n_epoch_d + z_epochs;

    let mut slots = vec![KeypointScore::default(); n];
    let mut losses = vec![0.0f32; n];
    let mut grads = vec![[0.0f32; 3]; n];
    let mut rho_grads = vec![0.0f32; n];

    for epoch in 0..total {
        let phase = if epoch < params.n_epoch {
            Phase::Full
        } else if epoch < params.n_epoch + n_epoch_d {
            Phase::Detection
        } else {
            Phase::ZOnly
        };

        if phase == Phase::Detection {
            slots.fill(KeypointScore::default());
        } else {
            model.score_all(problem.volume, &pos, &rho, &mut slots)?;
        }
        for k in 0..n {
            losses[k] = slots[k].loss;
            grads[k] = slots[k].grad;
            rho_grads[k] = slots[k].rho_grad;
        }

        if detection {
            if let Some(heat) = problem.heatmap {
                for k in 0..n {
                    if frozen[k] {
                        continue;
                    }
                    let (h, g) = trilinear_with_grad(heat, pos[k][0], pos[k][1], pos[k][2]);
                    losses[k] += params.lambda_d * (1.0 - h);
                    for d in 0..3 {
                        grads[k][d] -= params.lambda_d * g[d];
                    }
                }
            }
        }

        if params.lambda_n > 0.0 {
            for k in 0..n {
                if frozen[k] {
                    continue;
                }
                let (l, g) = spring_terms(problem.springs, &pos, k, params.lambda_n_mode);
                losses[k] += params.lambda_n * l;
                for d in 0..3 {
                    grads[k][d] += params.lambda_n * g[d];
                }
            }
        }

        if params.lambda_t > 0.0 {
            if let Some(anchor) = problem.temporal_anchor {
                for k in 0..n {
                    if frozen[k] {
                        continue;
                    }
                    for d in 0..3 {
                        let diff = pos[k][d] - anchor[k][d];
                        losses[k] += params.lambda_t * diff * diff;
                        grads[k][d] += params.lambda_t * 2.0 * diff;
                    }
                }
            }
        }

        // Synchronous update: every gradient above was taken at the same
        // state, so the step order cannot leak between keypoints.
        for k in 0..n {
            if frozen[k] || problem.pinned[k] {
                continue;
            }
            let finite = losses[k].is_finite()
                && grads[k].iter().all(|v| v.is_finite())
                && rho_grads[k].is_finite();
            if !finite {
                log::debug!("keypoint {k} produced a non-finite step, freezing it this frame");
                frozen[k] = true;
                continue;
            }
            if losses[k] >= best[k] {
                lr[k] *= 0.5;
            } else {
                best[k] = losses[k];
            }
            let mut g = grads[k];
            let mut gr = rho_grads[k];
            if params.clip_grad >= 0.0 {
                for v in g.iter_mut() {
                    *v = v.clamp(-params.clip_grad, params.clip_grad);
                }
                gr = gr.clamp(-params.clip_grad, params.clip_grad);
            }
            if phase == Phase::ZOnly {
                pos[k][2] -= lr[k] * g[2];
            } else {
                for d in 0..3 {
                    pos[k][d] -= lr[k] * g[d];
                }
                if params.allow_rotation {
                    rho[k] -= lr[k] * gr;
                }
            }
        }
    }

    let loss = losses
        .iter()
        .zip(&frozen)
        .filter(|&(l, &f)| !f && l.is_finite())
        .map(|(l, _)| l)
        .sum();
    Ok(FrameSolution {
        positions: pos,
        rotations: rho,
        frozen,
        loss,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sirocco_core::VolumeShape;
    use sirocco_models::ModelSpec;

    fn blob_volume(cx: f32, cy: f32) -> Volume {
        let shape = VolumeShape {
            depth: 1,
            height: 16,
            width: 16,
        };
        let mut data = Vec::with_capacity(shape.numel());
        for y in 0..16 {
            for x in 0..16 {
                let d2 = (x as f32 - cx).powi(2) + (y as f32 - cy).powi(2);
                data.push((-d2 / 8.0).exp());
            }
        }
        Volume::new(shape, data).unwrap()
    }

    fn planar_model(n_chunks: usize) -> RegistrationModel {
        RegistrationModel::new(ModelSpec {
            grid_shape: [1, 5, 5],
            fovea_sigma: [1.0, 2.5, 2.5],
            dimmer_ratio: 0.1,
            n_chunks,
            allow_rotation: false,
        })
    }

    fn base_params() -> OptimParams {
        OptimParams {
            lambda_d: -1.0,
            lambda_n: 1.0,
            lambda_n_mode: SpringMode::Disp,
            lambda_t: -1.0,
            clip_grad: 1.0,
            lr_floor: 0.02,
            lr_ceiling: 0.2,
            lr_coef: 2.0,
            n_epoch: 100,
            n_epoch_d: 0,
            z_compensator: -1.0,
            allow_rotation: false,
        }
    }

    fn no_springs(n: usize) -> SpringNetwork {
        SpringNetwork::from_pairs(&vec![[0.0; 3]; n], &[], 5).unwrap()
    }

    #[test]
    fn descends_toward_a_shifted_blob() {
        let parent = blob_volume(8.0, 8.0);
        let current = blob_volume(9.0, 8.0);
        let mut model = planar_model(1);
        let start = [[8.0, 8.0, 0.0]];
        model.set_references(&parent, &start);
        let springs = no_springs(1);
        let mut slots = [KeypointScore::default()];
        model
            .score_all(&current, &start, &[0.0], &mut slots)
            .unwrap();
        let initial_loss = slots[0].loss;

        let params = OptimParams {
            lr_floor: 0.5,
            lr_ceiling: 0.5,
            n_epoch: 200,
            lambda_n: -1.0,
            ..base_params()
        };
        let problem = FrameProblem {
            volume: &current,
            heatmap: None,
            springs: &springs,
            initial: &start,
            pinned: &[false],
            temporal_anchor: None,
        };
        let solution = register_frame(&model, &params, &problem).unwrap();
        assert!(solution.positions[0][0] > 8.3, "did not move toward the blob");
        assert!(solution.loss < initial_loss);
        assert!(!solution.frozen[0]);
    }

    #[test]
    fn spring_pulls_toward_rest_displacement() {
        let shape = VolumeShape {
            depth: 1,
            height: 16,
            width: 16,
        };
        let flat = Volume::from_shape_val(shape, 0.5);
        let geometry = [[0.0, 0.0, 0.0], [2.0, 0.0, 0.0]];
        let springs = SpringNetwork::from_pairs(&geometry, &[(0, 1)], 5).unwrap();
        let mut model = planar_model(1);
        let initial = [[0.0, 0.0, 0.0], [4.0, 0.0, 0.0]];
        model.set_references(&flat, &initial);
        let problem = FrameProblem {
            volume: &flat,
            heatmap: None,
            springs: &springs,
            initial: &initial,
            pinned: &[true, false],
            temporal_anchor: None,
        };
        let solution = register_frame(&model, &base_params(), &problem).unwrap();
        assert_eq!(solution.positions[0], [0.0, 0.0, 0.0], "pinned keypoint moved");
        assert!((solution.positions[1][0] - 2.0).abs() < 0.1);
    }

    #[test]
    fn temporal_anchor_pulls_when_enabled() {
        let shape = VolumeShape {
            depth: 1,
            height: 16,
            width: 16,
        };
        let flat = Volume::from_shape_val(shape, 0.5);
        let springs = no_springs(1);
        let mut model = planar_model(1);
        let initial = [[3.0, 3.0, 0.0]];
        model.set_references(&flat, &initial);
        let anchor = [[1.0, 3.0, 0.0]];
        let params = OptimParams {
            lambda_n: -1.0,
            lambda_t: 1.0,
            lr_floor: 0.2,
            ..base_params()
        };
        let problem = FrameProblem {
            volume: &flat,
            heatmap: None,
            springs: &springs,
            initial: &initial,
            pinned: &[false],
            temporal_anchor: Some(&anchor),
        };
        let solution = register_frame(&model, &params, &problem).unwrap();
        assert!((solution.positions[0][0] - 1.0).abs() < 0.1);
        assert_eq!(solution.positions[0][1], 3.0);
    }

    #[test]
    fn disabled_detection_ignores_the_heatmap() {
        let parent = blob_volume(8.0, 8.0);
        let current = blob_volume(9.0, 8.0);
        let mut model = planar_model(1);
        let start = [[8.0, 8.0, 0.0]];
        model.set_references(&parent, &start);
        let springs = no_springs(1);
        // A heatmap that would drag keypoints to a corner if consulted.
        let mut garbage = Volume::from_shape_val(current.shape(), 0.0);
        garbage.as_slice_mut()[0] = 1.0;

        let params = base_params();
        let solve = |heatmap: Option<&Volume>| {
            let problem = FrameProblem {
                volume: &current,
                heatmap,
                springs: &springs,
                initial: &start,
                pinned: &[false],
                temporal_anchor: None,
            };
            register_frame(&model, &params, &problem).unwrap().positions
        };
        assert_eq!(solve(Some(&garbage)), solve(None));
    }

    #[test]
    fn detection_phase_climbs_the_heatmap() {
        let shape = VolumeShape {
            depth: 1,
            height: 16,
            width: 16,
        };
        let flat = Volume::from_shape_val(shape, 0.5);
        let heat = blob_volume(10.0, 8.0);
        let springs = no_springs(1);
        let mut model = planar_model(1);
        let initial = [[8.0, 8.0, 0.0]];
        model.set_references(&flat, &initial);
        let params = OptimParams {
            lambda_d: 1.0,
            lambda_n: -1.0,
            n_epoch: 0,
            n_epoch_d: 100,
            lr_floor: 0.5,
            lr_ceiling: 0.5,
            ..base_params()
        };
        let problem = FrameProblem {
            volume: &flat,
            heatmap: Some(&heat),
            springs: &springs,
            initial: &initial,
            pinned: &[false],
            temporal_anchor: None,
        };
        let solution = register_frame(&model, &params, &problem).unwrap();
        assert!(solution.positions[0][0] > 8.5, "did not climb toward the peak");
    }

    #[test]
    fn z_only_epochs_leave_xy_untouched() {
        let shape = VolumeShape {
            depth: 4,
            height: 8,
            width: 8,
        };
        let flat = Volume::from_shape_val(shape, 0.5);
        let springs = no_springs(1);
        let mut model = RegistrationModel::new(ModelSpec {
            grid_shape: [3, 5, 5],
            fovea_sigma: [1.0, 2.5, 2.5],
            dimmer_ratio: 0.1,
            n_chunks: 1,
            allow_rotation: false,
        });
        let initial = [[4.0, 4.0, 3.0]];
        model.set_references(&flat, &initial);
        let anchor = [[2.0, 2.0, 1.0]];
        let params = OptimParams {
            lambda_n: -1.0,
            lambda_t: 1.0,
            n_epoch: 0,
            z_compensator: 50.0,
            ..base_params()
        };
        let problem = FrameProblem {
            volume: &flat,
            heatmap: None,
            springs: &springs,
            initial: &initial,
            pinned: &[false],
            temporal_anchor: Some(&anchor),
        };
        let solution = register_frame(&model, &params, &problem).unwrap();
        assert_eq!(solution.positions[0][0], 4.0);
        assert_eq!(solution.positions[0][1], 4.0);
        assert!(solution.positions[0][2] < 3.0);
    }

    #[test]
    fn non_finite_guess_freezes_only_that_keypoint() {
        let parent = blob_volume(8.0, 8.0);
        let current = blob_volume(9.0, 8.0);
        let mut model = planar_model(1);
        let initial = [[f32::NAN, 8.0, 0.0], [8.0, 8.0, 0.0]];
        model.set_references(&parent, &initial);
        let springs = no_springs(2);
        let params = OptimParams {
            lambda_n: -1.0,
            ..base_params()
        };
        let problem = FrameProblem {
            volume: &current,
            heatmap: None,
            springs: &springs,
            initial: &initial,
            pinned: &[false, false],
            temporal_anchor: None,
        };
        let solution = register_frame(&model, &params, &problem).unwrap();
        assert!(solution.frozen[0]);
        assert!(solution.positions[0][0].is_nan());
        assert!(!solution.frozen[1]);
        assert!(solution.positions[1][0] > 8.0);
    }

    #[test]
    fn chunk_count_does_not_change_the_solution() {
        let parent = blob_volume(8.0, 8.0);
        let current = blob_volume(9.0, 7.0);
        let geometry: Vec<[f32; 3]> = (0..6)
            .map(|k| [4.0 + 1.5 * k as f32, 6.0, 0.0])
            .collect();
        let springs = SpringNetwork::build(&geometry, 2);
        let pinned = vec![false; 6];

        let solve = |n_chunks: usize| {
            let mut model = planar_model(n_chunks);
            model.set_references(&parent, &geometry);
            let problem = FrameProblem {
                volume: &current,
                heatmap: None,
                springs: &springs,
                initial: &geometry,
                pinned: &pinned,
                temporal_anchor: None,
            };
            register_frame(&model, &base_params(), &problem)
                .unwrap()
                .positions
        };
        assert_eq!(solve(1), solve(10));
    }
}
