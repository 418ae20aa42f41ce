//! Tracking driver.
//!
//! Walks the propagation forest in traversal order and solves each frame
//! against its parent. The results buffer and the shrinking remaining list
//! are persisted after every frame, which makes any frame boundary a safe
//! point to kill and resume the run.

use std::collections::HashSet;

use sirocco_core::{AnnotationTable, Config, FrameSource, Reference, ResultsBuffer};
use sirocco_io::{encode, CheckpointStore};
use sirocco_models::{Detector, IntensityDetector, ModelSpec, RegistrationModel};

use crate::error::TrackError;
use crate::motion::predict_positions;
use crate::optim::{register_frame, FrameProblem, OptimParams};
use crate::pipeline::keys;
use crate::springs::SpringNetwork;
use crate::tree::FrameTree;

/// Everything the tracking stage hands the driver.
pub struct TrackInputs<'a> {
    /// Validated run configuration.
    pub config: &'a Config,
    /// Frame provider.
    pub source: &'a dyn FrameSource,
    /// Annotation table after provenance filtering.
    pub annotations: &'a AnnotationTable,
    /// Tracked worldline set and root frames.
    pub reference: &'a Reference,
    /// Propagation forest over the active frames.
    pub tree: &'a FrameTree,
    /// Spring network over the tracked keypoints.
    pub springs: &'a SpringNetwork,
    /// Descriptor geometry, taken from the checkpoint so resumed runs keep
    /// scoring with the grid they started with.
    pub spec: ModelSpec,
}

fn temporal_window(
    results: &ResultsBuffer,
    t: usize,
    n_frame: usize,
    n_keypoints: usize,
) -> Option<Vec<[f32; 3]>> {
    let window: Vec<usize> = (0..t)
        .rev()
        .filter(|&p| results.is_tracked(p))
        .take(n_frame)
        .collect();
    if window.is_empty() {
        return None;
    }
    let scale = 1.0 / window.len() as f32;
    let mut anchor = vec![[0.0f32; 3]; n_keypoints];
    for &p in &window {
        for (k, slot) in anchor.iter_mut().enumerate() {
            if let Some(pos) = results.get(p, k) {
                for d in 0..3 {
                    slot[d] += pos[d] * scale;
                }
            }
        }
    }
    Some(anchor)
}

/// Solve every remaining frame in traversal order.
///
/// Root rows were already seeded from their annotations when the reference
/// was resolved; visiting a root only retires it from `remaining`. Every
/// other frame seeds from its parent's solved row, optionally displaced by
/// the motion predictor around this frame's own annotations, and runs the
/// per-frame optimizer. A frame without a single finite initial guess is
/// left unsolved with a warning; sanitization repairs its row later.
///
/// # Errors
///
/// Frame loading, scoring, and checkpoint persistence errors abort the
/// traversal. Keypoint divergence never does.
pub fn track_all(
    inputs: &TrackInputs<'_>,
    results: &mut ResultsBuffer,
    remaining: &mut Vec<u32>,
    store: &dyn CheckpointStore,
) -> Result<(), TrackError> {
    let n = inputs.reference.worldlines.len();
    let params = OptimParams::from_config(inputs.config);
    let mut model = RegistrationModel::new(inputs.spec.clone());
    let detector = IntensityDetector::default();

    let todo: HashSet<u32> = remaining.iter().copied().collect();
    let frames: Vec<u32> = inputs
        .tree
        .order
        .iter()
        .copied()
        .filter(|t| todo.contains(t))
        .collect();
    log::info!(
        "tracking {} of {} frames in tree order",
        frames.len(),
        inputs.tree.order.len()
    );

    for &t in &frames {
        let t_us = t as usize;
        if let Some(parent) = inputs.tree.parent[t_us] {
            let parent_us = parent as usize;
            let parent_positions = results.frame_positions(parent_us);

            let mut pinned = vec![false; n];
            let mut anchors: Vec<(usize, [f32; 3])> = Vec::new();
            for a in inputs.annotations.in_frame(t_us) {
                if let Some(k) = inputs.reference.index_of(a.worldline) {
                    pinned[k] = true;
                    anchors.push((k, [a.x, a.y, a.z]));
                }
            }
            // The displacement field only trusts anchors whose parent
            // position survived the parent's solve.
            let field: Vec<(usize, [f32; 3])> = anchors
                .iter()
                .copied()
                .filter(|&(k, _)| parent_positions[k].iter().all(|v| v.is_finite()))
                .collect();
            let mut initial = if inputs.config.motion_predict && !field.is_empty() {
                predict_positions(&parent_positions, &field)
            } else {
                parent_positions.clone()
            };
            for &(k, pos) in &anchors {
                initial[k] = pos;
            }

            let usable = initial
                .iter()
                .filter(|p| p.iter().all(|v| v.is_finite()))
                .count();
            if usable == 0 {
                log::warn!("frame {t} has no finite initial guess, leaving its row unsolved");
            } else {
                let parent_volume = inputs
                    .source
                    .frame(parent_us)?
                    .into_normalized(inputs.config.gamma);
                model.set_references(&parent_volume, &parent_positions);
                let volume = inputs.source.frame(t_us)?.into_normalized(inputs.config.gamma);
                let heatmap = if params.lambda_d > 0.0 {
                    Some(detector.detect(&volume))
                } else {
                    None
                };
                let window = if params.lambda_t > 0.0 {
                    temporal_window(results, t_us, inputs.config.n_frame, n)
                } else {
                    None
                };
                let problem = FrameProblem {
                    volume: &volume,
                    heatmap: heatmap.as_ref(),
                    springs: inputs.springs,
                    initial: &initial,
                    pinned: &pinned,
                    temporal_anchor: window.as_deref(),
                };
                let solution = register_frame(&model, &params, &problem)?;
                let n_frozen = solution.frozen.iter().filter(|&&f| f).count();
                if n_frozen > 0 {
                    log::warn!("frame {t}: {n_frozen} keypoint(s) froze on a non-finite step");
                }
                log::debug!("frame {t} solved against {parent}, loss {:.6}", solution.loss);
                results.set_frame(t_us, &solution.positions);
            }
        }
        remaining.retain(|&r| r != t);
        store.update_raw(vec![
            (keys::RESULTS.to_string(), encode(results)?),
            (keys::REMAINING.to_string(), encode(remaining)?),
        ])?;
    }
    Ok(())
}
