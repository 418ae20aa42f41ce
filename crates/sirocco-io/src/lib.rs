#![deny(missing_docs)]
//! Checkpoint store and dataset I/O for the sirocco keypoint tracker.

/// Resumable checkpoint stores.
pub mod checkpoint;

/// Dataset directory readers and writers.
pub mod dataset;

/// Error types for the I/O module.
pub mod error;

pub use crate::checkpoint::{
    encode, CheckpointExt, CheckpointStore, FsCheckpoint, MemoryCheckpoint, BACKUP_DIR,
    CHECKPOINT_FILE,
};
pub use crate::dataset::{
    load_annotations, load_args, load_frames, load_spring_pairs, save_annotations, save_args,
    save_frames, ANNOTATIONS_FILE, ARGS_FILE, FRAMES_FILE, SPRINGS_FILE,
};
pub use crate::error::IoError;
