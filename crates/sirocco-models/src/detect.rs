use sirocco_core::Volume;

/// Produces a per-voxel keypoint likelihood heatmap for a frame.
///
/// The heatmap is sampled trilinearly by the detection term of the
/// optimizer, so values should lie in `[0, 1]` with peaks at likely keypoint
/// locations.
pub trait Detector {
    /// Compute the heatmap of a frame.
    fn detect(&self, vol: &Volume) -> Volume;
}

/// Default detector: box-blurred, peak-normalized intensity.
///
/// Bright blobs become heatmap peaks, which matches sources where keypoints
/// sit on locally bright structures.
#[derive(Clone, Copy, Debug)]
pub struct IntensityDetector {
    /// Blur window half-size in voxels.
    pub radius: usize,
}

impl Default for IntensityDetector {
    fn default() -> Self {
        Self { radius: 1 }
    }
}

fn box_blur_axis(vol: &Volume, radius: isize, axis: usize) -> Volume {
    let shape = vol.shape();
    let mut out = Volume::from_shape_val(shape, 0.0);
    let norm = 1.0 / (2 * radius + 1) as f32;
    let data = out.as_slice_mut();
    let mut i = 0;
    for z in 0..shape.depth {
        for y in 0..shape.height {
            for x in 0..shape.width {
                let mut acc = 0.0;
                for d in -radius..=radius {
                    let (dz, dy, dx) = match axis {
                        0 => (d, 0, 0),
                        1 => (0, d, 0),
                        _ => (0, 0, d),
                    };
                    acc += vol.at_clamped(z as isize + dz, y as isize + dy, x as isize + dx);
                }
                data[i] = acc * norm;
                i += 1;
            }
        }
    }
    out
}

impl Detector for IntensityDetector {
    fn detect(&self, vol: &Volume) -> Volume {
        let r = self.radius as isize;
        let mut heat = box_blur_axis(vol, r, 2);
        heat = box_blur_axis(&heat, r, 1);
        if !vol.shape().is_planar() {
            heat = box_blur_axis(&heat, r, 0);
        }
        let max = heat.as_slice().iter().fold(0.0f32, |m, &v| m.max(v));
        if max > 0.0 {
            for v in heat.as_slice_mut() {
                *v /= max;
            }
        }
        heat
    }
}
