use sirocco_core::CoreError;

/// Errors produced by the scoring models.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ModelError {
    /// Error from the core data model.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The model was scored before reference descriptors were set.
    #[error("reference descriptors have not been set")]
    EmptyReference,

    /// Number of query positions does not match the model's keypoints.
    #[error("expected {0} keypoint positions, got {1}")]
    KeypointCountMismatch(usize, usize),
}
