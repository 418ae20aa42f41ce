use crate::error::CoreError;
use crate::volume::{Volume, VolumeShape};

/// Provider of raw video frames.
///
/// Implementations hand out frames by index; normalization and gamma
/// correction happen downstream, once per fetch.
pub trait FrameSource {
    /// Number of frames in the source.
    fn len(&self) -> usize;

    /// Whether the source holds no frames.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shape shared by every frame.
    fn shape(&self) -> VolumeShape;

    /// Fetch frame `t`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::FrameOutOfRange`] when `t` is past the source.
    fn frame(&self, t: usize) -> Result<Volume, CoreError>;
}

/// Frame source backed by volumes held in memory.
#[derive(Clone, Debug)]
pub struct MemoryFrames {
    frames: Vec<Volume>,
    shape: VolumeShape,
}

impl MemoryFrames {
    /// Wrap a list of volumes, requiring at least one frame and a uniform
    /// shape.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EmptySource`] for an empty list and
    /// [`CoreError::InconsistentFrameShape`] naming the first mismatched
    /// frame.
    pub fn new(frames: Vec<Volume>) -> Result<Self, CoreError> {
        let shape = frames.first().ok_or(CoreError::EmptySource)?.shape();
        if let Some(t) = frames.iter().position(|f| f.shape() != shape) {
            return Err(CoreError::InconsistentFrameShape(t));
        }
        Ok(Self { frames, shape })
    }
}

impl FrameSource for MemoryFrames {
    fn len(&self) -> usize {
        self.frames.len()
    }

    fn shape(&self) -> VolumeShape {
        self.shape
    }

    fn frame(&self, t: usize) -> Result<Volume, CoreError> {
        self.frames
            .get(t)
            .cloned()
            .ok_or(CoreError::FrameOutOfRange(t, self.frames.len()))
    }
}
