use sirocco_core::CoreError;
use sirocco_io::IoError;
use sirocco_models::ModelError;

/// Errors produced by the tracking pipeline.
#[derive(thiserror::Error, Debug)]
pub enum TrackError {
    /// Error from the core data model.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Error from the scoring models.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Error from checkpoint or dataset I/O.
    #[error(transparent)]
    Io(#[from] IoError),

    /// A manual spring pair references a worldline outside the tracked set.
    #[error("manual spring references unknown worldline {0}")]
    UnknownWorldline(u32),

    /// A spring pair is degenerate or out of range.
    #[error("invalid spring pair ({0}, {1})")]
    InvalidSpringPair(usize, usize),
}
