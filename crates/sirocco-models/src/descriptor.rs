use bincode::{Decode, Encode};
use rayon::prelude::*;
use sirocco_core::{Config, Volume};

use crate::error::ModelError;
use crate::sample::{trilinear, trilinear_with_grad};

/// Geometry of the descriptor model, persisted across resumes so a resumed
/// run scores with the exact grid it started with.
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct ModelSpec {
    /// Grid extents `(z, y, x)` in voxels, odd.
    pub grid_shape: [usize; 3],
    /// Gaussian fovea radii `(z, y, x)`. Any non-positive component disables
    /// the mask.
    pub fovea_sigma: [f32; 3],
    /// Mask floor outside the fovea.
    pub dimmer_ratio: f32,
    /// Number of sequential keypoint sub-batches per scoring pass.
    pub n_chunks: usize,
    /// Whether an in-plane rotation is optimized per keypoint.
    pub allow_rotation: bool,
}

impl ModelSpec {
    /// Extract the model geometry from a validated configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            grid_shape: config.grid_shape,
            fovea_sigma: config.fovea_sigma,
            dimmer_ratio: config.dimmer_ratio,
            n_chunks: config.n_chunks,
            allow_rotation: config.allow_rotation,
        }
    }
}

/// Loss and gradients of one keypoint from one scoring pass.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct KeypointScore {
    /// Mask-weighted mean squared error.
    pub loss: f32,
    /// Gradient of the loss with respect to `(x, y, z)`.
    pub grad: [f32; 3],
    /// Gradient of the loss with respect to the in-plane rotation.
    pub rho_grad: f32,
}

/// Foveated grid descriptor model.
///
/// Reference descriptors are patches sampled around the solved positions of
/// the parent frame; scoring compares patches sampled at candidate positions
/// in the current frame against them. The fovea mask keeps the comparison
/// anchored on the keypoint center while the grid periphery provides context
/// at reduced weight.
pub struct RegistrationModel {
    spec: ModelSpec,
    /// Grid offsets `[dx, dy, dz]`, ZYX-major over the grid.
    offsets: Vec<[f32; 3]>,
    mask: Vec<f32>,
    mask_sum: f32,
    references: Vec<Vec<f32>>,
}

impl RegistrationModel {
    /// Build the grid offsets and fovea mask for a model geometry.
    pub fn new(spec: ModelSpec) -> Self {
        let [gz, gy, gx] = spec.grid_shape;
        let (hz, hy, hx) = (gz as isize / 2, gy as isize / 2, gx as isize / 2);
        let mut offsets = Vec::with_capacity(gz * gy * gx);
        for dz in -hz..=hz {
            for dy in -hy..=hy {
                for dx in -hx..=hx {
                    offsets.push([dx as f32, dy as f32, dz as f32]);
                }
            }
        }
        let [sz, sy, sx] = spec.fovea_sigma;
        let mask: Vec<f32> = if spec.fovea_sigma.iter().any(|&s| s <= 0.0) {
            vec![1.0; offsets.len()]
        } else {
            offsets
                .iter()
                .map(|&[dx, dy, dz]| {
                    let r2 = dx * dx / (2.0 * sx * sx)
                        + dy * dy / (2.0 * sy * sy)
                        + dz * dz / (2.0 * sz * sz);
                    spec.dimmer_ratio + (1.0 - spec.dimmer_ratio) * (-r2).exp()
                })
                .collect()
        };
        let mask_sum = mask.iter().sum();
        Self {
            spec,
            offsets,
            mask,
            mask_sum,
            references: Vec::new(),
        }
    }

    /// The model geometry.
    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    /// Number of keypoints with a reference descriptor.
    pub fn n_keypoints(&self) -> usize {
        self.references.len()
    }

    /// Sample fresh reference descriptors around `positions` in `vol`.
    pub fn set_references(&mut self, vol: &Volume, positions: &[[f32; 3]]) {
        self.references = positions
            .par_iter()
            .map(|p| {
                self.offsets
                    .iter()
                    .map(|o| trilinear(vol, p[0] + o[0], p[1] + o[1], p[2] + o[2]))
                    .collect()
            })
            .collect();
    }

    fn score_one(&self, vol: &Volume, k: usize, pos: [f32; 3], rho: f32) -> KeypointScore {
        let reference = &self.references[k];
        let (sin_r, cos_r) = rho.sin_cos();
        let mut loss = 0.0;
        let mut grad = [0.0f32; 3];
        let mut rho_grad = 0.0;
        for ((off, &m), &r) in self.offsets.iter().zip(&self.mask).zip(reference) {
            let ox = off[0] * cos_r - off[1] * sin_r;
            let oy = off[0] * sin_r + off[1] * cos_r;
            let (val, g) = trilinear_with_grad(vol, pos[0] + ox, pos[1] + oy, pos[2] + off[2]);
            let diff = val - r;
            let w = 2.0 * m * diff;
            loss += m * diff * diff;
            grad[0] += w * g[0];
            grad[1] += w * g[1];
            grad[2] += w * g[2];
            rho_grad += w
                * (g[0] * (-off[0] * sin_r - off[1] * cos_r)
                    + g[1] * (off[0] * cos_r - off[1] * sin_r));
        }
        let inv = 1.0 / self.mask_sum;
        KeypointScore {
            loss: loss * inv,
            grad: [grad[0] * inv, grad[1] * inv, grad[2] * inv],
            rho_grad: rho_grad * inv,
        }
    }

    /// Score every keypoint of `vol` into preallocated slots.
    ///
    /// Keypoints are processed in `n_chunks` sequential contiguous
    /// sub-batches (parallel inside each), and every keypoint's score lands
    /// in its own slot, so the output is bitwise invariant to the chunk
    /// count.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::EmptyReference`] before any
    /// [`RegistrationModel::set_references`] call and
    /// [`ModelError::KeypointCountMismatch`] on length mismatches.
    pub fn score_all(
        &self,
        vol: &Volume,
        positions: &[[f32; 3]],
        rhos: &[f32],
        out: &mut [KeypointScore],
    ) -> Result<(), ModelError> {
        let n = self.references.len();
        if n == 0 {
            return Err(ModelError::EmptyReference);
        }
        if positions.len() != n || rhos.len() != n || out.len() != n {
            return Err(ModelError::KeypointCountMismatch(n, positions.len()));
        }
        let chunk_len = n.div_ceil(self.spec.n_chunks.max(1));
        for start in (0..n).step_by(chunk_len) {
            let end = (start + chunk_len).min(n);
            let scored: Vec<KeypointScore> = (start..end)
                .into_par_iter()
                .map(|k| self.score_one(vol, k, positions[k], rhos[k]))
                .collect();
            out[start..end].copy_from_slice(&scored);
        }
        Ok(())
    }
}
