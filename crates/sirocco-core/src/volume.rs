use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Size of a volumetric frame in voxels.
///
/// Planar video is expressed with `depth == 1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct VolumeShape {
    /// Extent along z.
    pub depth: usize,
    /// Extent along y.
    pub height: usize,
    /// Extent along x.
    pub width: usize,
}

impl VolumeShape {
    /// Number of voxels in a volume of this shape.
    pub fn numel(&self) -> usize {
        self.depth * self.height * self.width
    }

    /// Whether the volume degenerates to a single plane.
    pub fn is_planar(&self) -> bool {
        self.depth == 1
    }
}

impl std::fmt::Display for VolumeShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.depth, self.height, self.width)
    }
}

/// A dense single-channel `f32` volume in row-major ZYX layout.
///
/// This is the frame container every stage of the tracker consumes. Values
/// are expected in `[0, 1]` after [`Volume::into_normalized`].
#[derive(Clone, Debug, PartialEq)]
pub struct Volume {
    shape: VolumeShape,
    data: Vec<f32>,
}

impl Volume {
    /// Create a new volume from voxel data.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EmptyVolume`] for a shape with a zero extent
    /// (the sampling kernels need at least one voxel per axis) and
    /// [`CoreError::InvalidVolumeLength`] if the data length does not match
    /// the shape.
    pub fn new(shape: VolumeShape, data: Vec<f32>) -> Result<Self, CoreError> {
        if shape.numel() == 0 {
            return Err(CoreError::EmptyVolume(shape));
        }
        if data.len() != shape.numel() {
            return Err(CoreError::InvalidVolumeLength(data.len(), shape.numel()));
        }
        Ok(Self { shape, data })
    }

    /// Create a volume filled with a constant value.
    pub fn from_shape_val(shape: VolumeShape, val: f32) -> Self {
        Self {
            shape,
            data: vec![val; shape.numel()],
        }
    }

    /// The shape of the volume.
    pub fn shape(&self) -> VolumeShape {
        self.shape
    }

    /// The voxel data as a flat slice in ZYX order.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// The voxel data as a mutable flat slice in ZYX order.
    pub fn as_slice_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Voxel value at integer coordinates, or `None` when out of bounds.
    pub fn get(&self, z: usize, y: usize, x: usize) -> Option<f32> {
        if z >= self.shape.depth || y >= self.shape.height || x >= self.shape.width {
            return None;
        }
        Some(self.data[(z * self.shape.height + y) * self.shape.width + x])
    }

    /// Voxel value at integer coordinates clamped into bounds.
    ///
    /// Border clamping is the sampling policy used by the registration
    /// kernels, so positions slightly outside the volume stay well defined.
    pub fn at_clamped(&self, z: isize, y: isize, x: isize) -> f32 {
        let z = z.clamp(0, self.shape.depth as isize - 1) as usize;
        let y = y.clamp(0, self.shape.height as isize - 1) as usize;
        let x = x.clamp(0, self.shape.width as isize - 1) as usize;
        self.data[(z * self.shape.height + y) * self.shape.width + x]
    }

    /// Normalize values to `[0, 1]` by the volume maximum and apply gamma
    /// correction `v^(1/gamma)`.
    ///
    /// An all-zero volume is returned unchanged.
    pub fn into_normalized(mut self, gamma: f32) -> Self {
        let max = self.data.iter().fold(0.0f32, |m, &v| m.max(v));
        if max > 0.0 {
            let inv_gamma = 1.0 / gamma;
            for v in self.data.iter_mut() {
                *v = (*v / max).powf(inv_gamma);
            }
        }
        self
    }
}
