#![deny(missing_docs)]
//! Core data model for the sirocco keypoint tracker: configuration,
//! volumetric frames, annotations, and the tracked results buffer.

/// Annotation records, provenance filters, and reference resolution.
pub mod annotation;

/// Typed session configuration and its validation.
pub mod config;

/// Compute device probe.
pub mod device;

/// Error types for the core module.
pub mod error;

/// Tracked keypoint position buffer.
pub mod results;

/// Frame and worldline selection expressions.
pub mod select;

/// Frame providers.
pub mod source;

/// Dense volumetric frame type.
pub mod volume;

pub use crate::annotation::{
    build_annotations, Annotation, AnnotationTable, Provenance, Reference, ReferenceSelection,
    WorldlineId, TRACKER_TAG,
};
pub use crate::config::{Config, SaveMode, SortMode, SpringMode};
pub use crate::device::Device;
pub use crate::error::CoreError;
pub use crate::results::ResultsBuffer;
pub use crate::select::{parse_frame_list, parse_worldline_list};
pub use crate::source::{FrameSource, MemoryFrames};
pub use crate::volume::{Volume, VolumeShape};
