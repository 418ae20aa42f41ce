//! Trilinear volume sampling with analytic spatial gradients.
//!
//! Positions are fractional `(x, y, z)` voxel coordinates; samples outside
//! the volume clamp to the border, so the interpolated field is defined
//! everywhere.

use sirocco_core::Volume;

/// Sample a volume at a fractional position with trilinear interpolation.
pub fn trilinear(vol: &Volume, x: f32, y: f32, z: f32) -> f32 {
    let x0 = x.floor();
    let y0 = y.floor();
    let z0 = z.floor();
    let dx = x - x0;
    let dy = y - y0;
    let dz = z - z0;
    let (xi, yi, zi) = (x0 as isize, y0 as isize, z0 as isize);

    let c000 = vol.at_clamped(zi, yi, xi);
    let c001 = vol.at_clamped(zi, yi, xi + 1);
    let c010 = vol.at_clamped(zi, yi + 1, xi);
    let c011 = vol.at_clamped(zi, yi + 1, xi + 1);
    let c100 = vol.at_clamped(zi + 1, yi, xi);
    let c101 = vol.at_clamped(zi + 1, yi, xi + 1);
    let c110 = vol.at_clamped(zi + 1, yi + 1, xi);
    let c111 = vol.at_clamped(zi + 1, yi + 1, xi + 1);

    let c00 = c000 * (1.0 - dx) + c001 * dx;
    let c01 = c010 * (1.0 - dx) + c011 * dx;
    let c10 = c100 * (1.0 - dx) + c101 * dx;
    let c11 = c110 * (1.0 - dx) + c111 * dx;

    let c0 = c00 * (1.0 - dy) + c01 * dy;
    let c1 = c10 * (1.0 - dy) + c11 * dy;

    c0 * (1.0 - dz) + c1 * dz
}

/// Sample a volume and the spatial gradient `(d/dx, d/dy, d/dz)` of the
/// interpolated field, taken as central differences of the interpolant at
/// unit offsets.
pub fn trilinear_with_grad(vol: &Volume, x: f32, y: f32, z: f32) -> (f32, [f32; 3]) {
    let val = trilinear(vol, x, y, z);
    let gx = 0.5 * (trilinear(vol, x + 1.0, y, z) - trilinear(vol, x - 1.0, y, z));
    let gy = 0.5 * (trilinear(vol, x, y + 1.0, z) - trilinear(vol, x, y - 1.0, z));
    let gz = 0.5 * (trilinear(vol, x, y, z + 1.0) - trilinear(vol, x, y, z - 1.0));
    (val, [gx, gy, gz])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use sirocco_core::VolumeShape;

    fn ramp_volume() -> Volume {
        // v(z, y, x) = x + 10 y + 100 z
        let shape = VolumeShape {
            depth: 4,
            height: 4,
            width: 4,
        };
        let mut data = Vec::with_capacity(shape.numel());
        for z in 0..4 {
            for y in 0..4 {
                for x in 0..4 {
                    data.push(x as f32 + 10.0 * y as f32 + 100.0 * z as f32);
                }
            }
        }
        Volume::new(shape, data).unwrap()
    }

    #[test]
    fn interpolates_linear_ramp_exactly() {
        let vol = ramp_volume();
        assert_relative_eq!(trilinear(&vol, 1.5, 2.0, 0.5), 1.5 + 20.0 + 50.0);
        assert_relative_eq!(trilinear(&vol, 0.25, 0.75, 1.25), 0.25 + 7.5 + 125.0);
    }

    #[test]
    fn gradient_matches_ramp_slope() {
        let vol = ramp_volume();
        let (_, grad) = trilinear_with_grad(&vol, 1.5, 1.5, 1.5);
        assert_relative_eq!(grad[0], 1.0);
        assert_relative_eq!(grad[1], 10.0);
        assert_relative_eq!(grad[2], 100.0);
    }

    #[test]
    fn constant_volume_has_zero_gradient() {
        let shape = VolumeShape {
            depth: 2,
            height: 3,
            width: 3,
        };
        let vol = Volume::from_shape_val(shape, 0.4);
        let (val, grad) = trilinear_with_grad(&vol, 1.2, 0.7, 0.3);
        assert_relative_eq!(val, 0.4);
        assert_eq!(grad, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn clamps_outside_the_volume() {
        let vol = ramp_volume();
        assert_relative_eq!(trilinear(&vol, -5.0, 0.0, 0.0), 0.0);
        assert_relative_eq!(trilinear(&vol, 9.0, 3.0, 3.0), 3.0 + 30.0 + 300.0);
    }

    #[test]
    fn planar_volume_has_no_z_gradient() {
        let shape = VolumeShape {
            depth: 1,
            height: 4,
            width: 4,
        };
        let mut data = vec![0.0; 16];
        for (i, v) in data.iter_mut().enumerate() {
            *v = (i % 4) as f32;
        }
        let vol = Volume::new(shape, data).unwrap();
        let (_, grad) = trilinear_with_grad(&vol, 1.5, 1.5, 0.0);
        assert_relative_eq!(grad[0], 1.0);
        assert_eq!(grad[2], 0.0);
    }
}
