use crate::volume::VolumeShape;

/// An error type for the core data model.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum CoreError {
    /// Error when a volume shape has a zero extent.
    #[error("volume shape {0} has a zero extent")]
    EmptyVolume(VolumeShape),

    /// Error when the volume data length does not match its shape.
    #[error("volume data length ({0}) does not match the shape ({1} elements)")]
    InvalidVolumeLength(usize, usize),

    /// Error when a configuration value is rejected at validation time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Error when a frame or worldline selection expression cannot be parsed.
    #[error("invalid selection expression '{expr}': {reason}")]
    InvalidSelection {
        /// The offending expression.
        expr: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Error when a frame holds two annotations for the same worldline.
    #[error("duplicate annotation for worldline {0} in frame {1}")]
    DuplicateAnnotation(u32, usize),

    /// Error when a frame index lies outside the dataset.
    #[error("frame index {0} out of range ({1} frames)")]
    FrameOutOfRange(usize, usize),

    /// Error when no frame carries usable reference annotations.
    #[error("no frame carries reference annotations covering the tracked worldline set")]
    NoReferenceFrames,

    /// Error when no annotated frame holds the requested annotation count.
    #[error("no annotated frame holds exactly {0} annotations")]
    NoFrameWithCount(usize),

    /// Error when a frame source is created without any frames.
    #[error("frame source holds no frames")]
    EmptySource,

    /// Error when the frames of a source do not share one shape.
    #[error("frame {0} does not match the shape of frame 0")]
    InconsistentFrameShape(usize),
}
