#![deny(missing_docs)]
//! Appearance and detection models for the sirocco keypoint tracker:
//! volume sampling, foveated grid descriptors, detection heatmaps, and
//! frame thumbnails.

/// Foveated grid descriptor model.
pub mod descriptor;

/// Detection heatmaps.
pub mod detect;

/// Error types for the models module.
pub mod error;

/// Trilinear sampling with analytic gradients.
pub mod sample;

/// Frame thumbnails and their similarity metric.
pub mod thumbnail;

pub use crate::descriptor::{KeypointScore, ModelSpec, RegistrationModel};
pub use crate::detect::{Detector, IntensityDetector};
pub use crate::error::ModelError;
pub use crate::sample::{trilinear, trilinear_with_grad};
pub use crate::thumbnail::{similarity, thumbnail, DEFAULT_SIDE};
