use sirocco_core::CoreError;

/// Errors produced by checkpoint and dataset I/O.
#[derive(thiserror::Error, Debug)]
pub enum IoError {
    /// Error from the core data model.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Error from the filesystem.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Failed to parse or write a JSON dataset file.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Failed to encode a checkpoint artifact.
    #[error(transparent)]
    Encode(#[from] bincode::error::EncodeError),

    /// Failed to decode a checkpoint artifact.
    #[error(transparent)]
    Decode(#[from] bincode::error::DecodeError),

    /// Resume was requested but the checkpoint holds no session.
    #[error("cannot resume: the checkpoint is empty")]
    CheckpointEmpty,

    /// A required checkpoint record is missing.
    #[error("checkpoint record {0:?} is missing")]
    MissingKey(String),

    /// The checkpoint store lock was poisoned by a panicking writer.
    #[error("checkpoint store lock poisoned")]
    StorePoisoned,

    /// A frame file does not follow the expected layout.
    #[error("invalid frame file: {0}")]
    InvalidFrameFile(String),

    /// The requested color channel does not exist in the frame file.
    #[error("channel {0} out of range, the frame file has {1}")]
    ChannelOutOfRange(usize, usize),
}
