#![deny(missing_docs)]
//! Checkpointed multi-keypoint tracking for the sirocco project.
//!
//! Frames are organized into a propagation forest rooted at the reference
//! frames; each frame is solved by registering descriptor patches against
//! its parent under spring, detection, and temporal regularizers. Every
//! stage boundary and every solved frame is persisted to a checkpoint store,
//! so runs resume wherever they were killed.

/// Tracking driver walking the propagation forest.
pub mod driver;

/// Error types for the tracking module.
pub mod error;

/// Motion prediction from partial annotations.
pub mod motion;

/// Per-frame registration optimizer.
pub mod optim;

/// Checkpointed run pipeline.
pub mod pipeline;

/// Spring network over the tracked keypoints.
pub mod springs;

/// Propagation forest builder.
pub mod tree;

pub use crate::driver::{track_all, TrackInputs};
pub use crate::error::TrackError;
pub use crate::motion::predict_positions;
pub use crate::optim::{register_frame, FrameProblem, FrameSolution, OptimParams};
pub use crate::pipeline::{Pipeline, PipelineInputs, Stage};
pub use crate::springs::{mean_reference_positions, Spring, SpringNetwork};
pub use crate::tree::{active_frames, build_tree, linear_score, FrameTree};
