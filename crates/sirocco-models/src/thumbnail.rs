//! Pooled frame thumbnails and their similarity metric.
//!
//! The frame tree builder compares whole frames, not keypoints, so frames
//! are reduced to small normalized thumbnails once and scored pairwise by
//! Pearson correlation.

use sirocco_core::Volume;

/// Default thumbnail side length in pixels.
pub const DEFAULT_SIDE: usize = 32;

/// Reduce a frame to a normalized thumbnail.
///
/// The volume is max-projected along z, average-pooled until both sides fit
/// `max_side`, and normalized to zero mean and unit variance. A constant
/// frame yields an all-zero thumbnail.
pub fn thumbnail(vol: &Volume, max_side: usize) -> Vec<f32> {
    let shape = vol.shape();
    let (h, w) = (shape.height, shape.width);

    let mut plane = vec![f32::NEG_INFINITY; h * w];
    for z in 0..shape.depth {
        for y in 0..h {
            for x in 0..w {
                let v = vol.as_slice()[(z * h + y) * w + x];
                let p = &mut plane[y * w + x];
                if v > *p {
                    *p = v;
                }
            }
        }
    }

    let pool = h.max(w).div_ceil(max_side.max(1)).max(1);
    let th = h.div_ceil(pool);
    let tw = w.div_ceil(pool);
    let mut out = vec![0.0f32; th * tw];
    for ty in 0..th {
        for tx in 0..tw {
            let y1 = ((ty + 1) * pool).min(h);
            let x1 = ((tx + 1) * pool).min(w);
            let mut acc = 0.0;
            let mut count = 0;
            for y in ty * pool..y1 {
                for x in tx * pool..x1 {
                    acc += plane[y * w + x];
                    count += 1;
                }
            }
            out[ty * tw + tx] = acc / count as f32;
        }
    }

    let n = out.len() as f32;
    let mean = out.iter().sum::<f32>() / n;
    let var = out.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
    if var <= f32::EPSILON {
        return vec![0.0; out.len()];
    }
    let inv_std = 1.0 / var.sqrt();
    for v in out.iter_mut() {
        *v = (*v - mean) * inv_std;
    }
    out
}

/// Pearson correlation of two normalized thumbnails, in `[-1, 1]`.
///
/// An all-zero (constant-frame) thumbnail correlates 0 with everything.
pub fn similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>() / a.len() as f32
}
