//! Readers and writers for the dataset directory layout.
//!
//! A dataset directory holds `frames.bin` (raw volumes), `annotations.json`
//! (the annotation table), optional `springs.json` (manual spring pairs),
//! `args.json` (the saved session configuration), and the checkpoint
//! artifacts managed by [`crate::checkpoint`].

use std::collections::HashSet;
use std::path::Path;

use sirocco_core::{
    Annotation, AnnotationTable, Config, FrameSource, MemoryFrames, Provenance, Reference,
    ResultsBuffer, SaveMode, Volume, VolumeShape,
};

use crate::error::IoError;

/// Annotation table filename.
pub const ANNOTATIONS_FILE: &str = "annotations.json";
/// Saved session configuration filename.
pub const ARGS_FILE: &str = "args.json";
/// Raw frames filename.
pub const FRAMES_FILE: &str = "frames.bin";
/// Manual spring pair list filename.
pub const SPRINGS_FILE: &str = "springs.json";

const FRAMES_MAGIC: &[u8; 4] = b"SIRF";
const FRAMES_HEADER_LEN: usize = 24;

/// Load and validate the annotation table of a dataset.
///
/// # Errors
///
/// Returns [`IoError::Json`] on malformed JSON and [`IoError::Core`] on
/// duplicate annotations.
pub fn load_annotations(dir: &Path) -> Result<AnnotationTable, IoError> {
    let bytes = std::fs::read(dir.join(ANNOTATIONS_FILE))?;
    let rows: Vec<Annotation> = serde_json::from_slice(&bytes)?;
    Ok(AnnotationTable::from_annotations(rows)?)
}

/// Merge tracked results back into the annotation table and write it.
///
/// `Overwrite` drops previously tracked rows, `Append` keeps them.
/// `include_all` carries the remaining input annotations through; without it
/// only tracked output is written. Input rows always win over tracker rows
/// at the same `(worldline, frame)` slot, so user annotations are never
/// clobbered.
///
/// # Errors
///
/// Returns [`IoError::Io`] or [`IoError::Json`] when the table cannot be
/// written.
pub fn save_annotations(
    dir: &Path,
    source: &AnnotationTable,
    reference: &Reference,
    results: &ResultsBuffer,
    save_mode: SaveMode,
    include_all: bool,
) -> Result<(), IoError> {
    let mut rows: Vec<Annotation> = source
        .annotations()
        .iter()
        .filter(|a| {
            if a.provenance.is_tracker() {
                save_mode == SaveMode::Append
            } else {
                include_all
            }
        })
        .cloned()
        .collect();
    let occupied: HashSet<_> = rows.iter().map(|a| (a.worldline, a.t)).collect();
    for t in 0..results.n_frames() {
        if !results.is_tracked(t) {
            continue;
        }
        for (k, &worldline) in reference.worldlines.iter().enumerate() {
            if occupied.contains(&(worldline, t)) {
                continue;
            }
            if let Some([x, y, z]) = results.get(t, k) {
                rows.push(Annotation {
                    worldline,
                    t,
                    x,
                    y,
                    z,
                    provenance: Provenance::tracker(),
                });
            }
        }
    }
    rows.sort_by_key(|a| (a.t, a.worldline));
    let json = serde_json::to_vec_pretty(&rows)?;
    std::fs::write(dir.join(ANNOTATIONS_FILE), json)?;
    Ok(())
}

/// Load the manual spring pair list, or `None` when the dataset has none.
///
/// # Errors
///
/// Returns [`IoError::Json`] on malformed JSON.
pub fn load_spring_pairs(dir: &Path) -> Result<Option<Vec<(u32, u32)>>, IoError> {
    let path = dir.join(SPRINGS_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(path)?;
    let pairs: Vec<(u32, u32)> = serde_json::from_slice(&bytes)?;
    Ok(Some(pairs))
}

/// Write the session configuration snapshot.
///
/// # Errors
///
/// Returns [`IoError::Io`] or [`IoError::Json`] when the file cannot be
/// written.
pub fn save_args(dir: &Path, config: &Config) -> Result<(), IoError> {
    let json = serde_json::to_vec_pretty(config)?;
    std::fs::write(dir.join(ARGS_FILE), json)?;
    Ok(())
}

/// Load a previously saved session configuration, or `None` when the
/// dataset has none.
///
/// # Errors
///
/// Returns [`IoError::Json`] on malformed JSON.
pub fn load_args(dir: &Path) -> Result<Option<Config>, IoError> {
    let path = dir.join(ARGS_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(path)?;
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Write a frame source as a single-channel raw frame file.
///
/// Layout: `SIRF` magic, little-endian `u32` frame count, channel count,
/// and `(depth, height, width)`, then the frames as little-endian `f32`
/// voxels in channel-major ZYX order.
///
/// # Errors
///
/// Returns [`IoError::Io`] when the file cannot be written.
pub fn save_frames(dir: &Path, source: &impl FrameSource) -> Result<(), IoError> {
    let shape = source.shape();
    let mut bytes =
        Vec::with_capacity(FRAMES_HEADER_LEN + source.len() * shape.numel() * 4);
    bytes.extend_from_slice(FRAMES_MAGIC);
    for v in [source.len(), 1, shape.depth, shape.height, shape.width] {
        bytes.extend_from_slice(&(v as u32).to_le_bytes());
    }
    for t in 0..source.len() {
        let vol = source.frame(t)?;
        for &v in vol.as_slice() {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
    }
    std::fs::write(dir.join(FRAMES_FILE), bytes)?;
    Ok(())
}

fn read_header_word(bytes: &[u8], at: usize) -> usize {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]) as usize
}

/// Load one channel of the raw frame file of a dataset into memory.
///
/// `channel` defaults to the first one.
///
/// # Errors
///
/// Returns [`IoError::InvalidFrameFile`] on a bad magic, a truncated file,
/// or a payload that disagrees with the header,
/// [`IoError::ChannelOutOfRange`] when the file holds no such channel, and
/// [`IoError::Core`] when the header declares a zero extent.
pub fn load_frames(dir: &Path, channel: Option<usize>) -> Result<MemoryFrames, IoError> {
    let bytes = std::fs::read(dir.join(FRAMES_FILE))?;
    if bytes.len() < FRAMES_HEADER_LEN || &bytes[0..4] != FRAMES_MAGIC {
        return Err(IoError::InvalidFrameFile(
            "bad magic or truncated header".to_string(),
        ));
    }
    let n_frames = read_header_word(&bytes, 4);
    let n_channels = read_header_word(&bytes, 8);
    let shape = VolumeShape {
        depth: read_header_word(&bytes, 12),
        height: read_header_word(&bytes, 16),
        width: read_header_word(&bytes, 20),
    };
    let channel = channel.unwrap_or(0);
    if channel >= n_channels {
        return Err(IoError::ChannelOutOfRange(channel, n_channels));
    }
    let numel = shape.numel();
    let expected = FRAMES_HEADER_LEN + n_frames * n_channels * numel * 4;
    if bytes.len() != expected {
        return Err(IoError::InvalidFrameFile(format!(
            "expected {} bytes for {} frames of {} channels of {}, got {}",
            expected,
            n_frames,
            n_channels,
            shape,
            bytes.len()
        )));
    }
    let mut frames = Vec::with_capacity(n_frames);
    for t in 0..n_frames {
        let start = FRAMES_HEADER_LEN + (t * n_channels + channel) * numel * 4;
        let data: Vec<f32> = bytes[start..start + numel * 4]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        frames.push(Volume::new(shape, data)?);
    }
    Ok(MemoryFrames::new(frames)?)
}
