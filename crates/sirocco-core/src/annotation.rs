use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::results::ResultsBuffer;

/// Provenance tag written by this tracker.
pub const TRACKER_TAG: &str = "SIRO";

/// Identity of a keypoint across frames.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Encode, Decode,
)]
#[serde(transparent)]
pub struct WorldlineId(pub u32);

impl std::fmt::Display for WorldlineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Short tag recording which process produced an annotation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
#[serde(transparent)]
pub struct Provenance(pub String);

impl Provenance {
    /// The provenance this tracker stamps on its output.
    pub fn tracker() -> Self {
        Self(TRACKER_TAG.to_string())
    }

    /// Whether the tag was written by this tracker.
    pub fn is_tracker(&self) -> bool {
        self.0 == TRACKER_TAG
    }
}

/// One keypoint position in one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct Annotation {
    /// Keypoint identity.
    pub worldline: WorldlineId,
    /// Frame index.
    pub t: usize,
    /// Position along x in voxels.
    pub x: f32,
    /// Position along y in voxels.
    pub y: f32,
    /// Position along z in voxels.
    pub z: f32,
    /// Who produced this annotation.
    pub provenance: Provenance,
}

/// All annotations of a dataset, at most one per worldline per frame.
#[derive(Clone, Debug, Default, PartialEq, Encode, Decode)]
pub struct AnnotationTable {
    annotations: Vec<Annotation>,
}

impl AnnotationTable {
    /// Build a table, rejecting duplicate `(worldline, frame)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateAnnotation`] naming the first duplicate.
    pub fn from_annotations(annotations: Vec<Annotation>) -> Result<Self, CoreError> {
        let mut seen = std::collections::HashSet::new();
        for a in &annotations {
            if !seen.insert((a.worldline, a.t)) {
                return Err(CoreError::DuplicateAnnotation(a.worldline.0, a.t));
            }
        }
        Ok(Self { annotations })
    }

    /// The annotations in insertion order.
    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Number of annotations in the table.
    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    /// Apply the provenance filters once at load.
    ///
    /// `exclusive` keeps only the named provenance; otherwise `exclude_self`
    /// drops rows this tracker wrote in a previous run.
    pub fn filtered(&self, exclude_self: bool, exclusive: Option<&str>) -> Self {
        let annotations = self
            .annotations
            .iter()
            .filter(|a| match exclusive {
                Some(tag) => a.provenance.0 == tag,
                None => !(exclude_self && a.provenance.is_tracker()),
            })
            .cloned()
            .collect();
        Self { annotations }
    }

    /// Sorted distinct frame indices holding at least one annotation.
    pub fn frames(&self) -> Vec<usize> {
        let mut frames: Vec<usize> = self.annotations.iter().map(|a| a.t).collect();
        frames.sort_unstable();
        frames.dedup();
        frames
    }

    /// Annotations of frame `t`.
    pub fn in_frame(&self, t: usize) -> impl Iterator<Item = &Annotation> {
        self.annotations.iter().filter(move |a| a.t == t)
    }

    /// Position of `worldline` in frame `t`, if annotated.
    pub fn position(&self, t: usize, worldline: WorldlineId) -> Option<[f32; 3]> {
        self.annotations
            .iter()
            .find(|a| a.t == t && a.worldline == worldline)
            .map(|a| [a.x, a.y, a.z])
    }

    /// Whether frame `t` annotates every worldline in `worldlines`.
    pub fn frame_covers(&self, t: usize, worldlines: &[WorldlineId]) -> bool {
        worldlines
            .iter()
            .all(|&w| self.annotations.iter().any(|a| a.t == t && a.worldline == w))
    }
}

/// User-supplied constraints on reference resolution.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReferenceSelection {
    /// Candidate reference frames.
    pub t_ref: Option<Vec<usize>>,
    /// Explicit worldline set to track.
    pub wlid_ref: Option<Vec<WorldlineId>>,
    /// Pick the worldlines of the first frame holding exactly this many
    /// annotations.
    pub n_ref: Option<usize>,
}

/// Resolved reference state: the tracked worldline set and the root frames.
///
/// `worldlines` fixes the keypoint ordering for the whole run.
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct Reference {
    /// Tracked worldlines, ascending.
    pub worldlines: Vec<WorldlineId>,
    /// Frames whose annotations cover every tracked worldline, ascending.
    pub roots: Vec<usize>,
}

impl Reference {
    /// Keypoint index of a worldline within the fixed ordering.
    pub fn index_of(&self, worldline: WorldlineId) -> Option<usize> {
        self.worldlines.binary_search(&worldline).ok()
    }
}

fn frame_worldlines(table: &AnnotationTable, t: usize) -> Vec<WorldlineId> {
    let mut worldlines: Vec<WorldlineId> = table.in_frame(t).map(|a| a.worldline).collect();
    worldlines.sort_unstable();
    worldlines.dedup();
    worldlines
}

/// Resolve the tracked worldline set and root frames, and seed the results
/// buffer with the root rows.
///
/// Candidate frames default to every annotated frame. The worldline set comes
/// from `wlid_ref`, or from `n_ref` (lowest-index candidate holding exactly
/// that many annotations), or from the most-annotated candidate (lowest index
/// on ties). Roots are the candidates covering the whole set.
///
/// # Errors
///
/// Returns [`CoreError::FrameOutOfRange`] for a candidate past the source,
/// [`CoreError::NoFrameWithCount`] when `n_ref` matches no candidate, and
/// [`CoreError::NoReferenceFrames`] when no candidate covers the worldline
/// set.
pub fn build_annotations(
    table: &AnnotationTable,
    selection: &ReferenceSelection,
    n_frames: usize,
) -> Result<(Reference, ResultsBuffer), CoreError> {
    let candidates = match &selection.t_ref {
        Some(t_ref) => t_ref.clone(),
        None => table.frames(),
    };
    if let Some(&t) = candidates.iter().find(|&&t| t >= n_frames) {
        return Err(CoreError::FrameOutOfRange(t, n_frames));
    }
    if candidates.is_empty() {
        return Err(CoreError::NoReferenceFrames);
    }

    let worldlines = if let Some(wlid_ref) = &selection.wlid_ref {
        let mut worldlines = wlid_ref.clone();
        worldlines.sort_unstable();
        worldlines.dedup();
        worldlines
    } else if let Some(n_ref) = selection.n_ref {
        let t = candidates
            .iter()
            .copied()
            .find(|&t| table.in_frame(t).count() == n_ref)
            .ok_or(CoreError::NoFrameWithCount(n_ref))?;
        frame_worldlines(table, t)
    } else {
        let t = candidates
            .iter()
            .copied()
            .max_by_key(|&t| (table.in_frame(t).count(), std::cmp::Reverse(t)))
            .ok_or(CoreError::NoReferenceFrames)?;
        frame_worldlines(table, t)
    };
    if worldlines.is_empty() {
        return Err(CoreError::NoReferenceFrames);
    }

    let roots: Vec<usize> = candidates
        .iter()
        .copied()
        .filter(|&t| table.frame_covers(t, &worldlines))
        .collect();
    if roots.is_empty() {
        return Err(CoreError::NoReferenceFrames);
    }

    let mut results = ResultsBuffer::new(n_frames, worldlines.len());
    for &t in &roots {
        for (k, &w) in worldlines.iter().enumerate() {
            if let Some(pos) = table.position(t, w) {
                results.set(t, k, pos);
            }
        }
    }
    Ok((Reference { worldlines, roots }, results))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ann(w: u32, t: usize, x: f32, tag: &str) -> Annotation {
        Annotation {
            worldline: WorldlineId(w),
            t,
            x,
            y: x + 1.0,
            z: 0.0,
            provenance: Provenance(tag.to_string()),
        }
    }

    fn table() -> AnnotationTable {
        // Frame 0 annotates worldlines {1, 2, 3}, frame 2 only {1, 2}.
        AnnotationTable::from_annotations(vec![
            ann(1, 0, 1.0, "manual"),
            ann(2, 0, 2.0, "manual"),
            ann(3, 0, 3.0, "manual"),
            ann(1, 2, 1.5, "manual"),
            ann(2, 2, 2.5, "manual"),
        ])
        .unwrap()
    }

    #[test]
    fn rejects_duplicates() {
        let err = AnnotationTable::from_annotations(vec![
            ann(1, 0, 1.0, "manual"),
            ann(1, 0, 2.0, "manual"),
        ])
        .unwrap_err();
        assert_eq!(err, CoreError::DuplicateAnnotation(1, 0));
    }

    #[test]
    fn provenance_filters() {
        let table = AnnotationTable::from_annotations(vec![
            ann(1, 0, 1.0, "manual"),
            ann(2, 0, 2.0, TRACKER_TAG),
        ])
        .unwrap();
        assert_eq!(table.filtered(true, None).len(), 1);
        assert_eq!(table.filtered(false, None).len(), 2);
        assert_eq!(table.filtered(true, Some(TRACKER_TAG)).len(), 1);
        assert_eq!(table.filtered(false, Some("other")).len(), 0);
    }

    #[test]
    fn picks_most_annotated_frame() {
        let (reference, results) =
            build_annotations(&table(), &ReferenceSelection::default(), 4).unwrap();
        assert_eq!(
            reference.worldlines,
            vec![WorldlineId(1), WorldlineId(2), WorldlineId(3)]
        );
        assert_eq!(reference.roots, vec![0]);
        assert_eq!(results.get(0, 0), Some([1.0, 2.0, 0.0]));
        assert!(!results.is_tracked(2));
    }

    #[test]
    fn n_ref_selects_by_count() {
        let selection = ReferenceSelection {
            n_ref: Some(2),
            ..Default::default()
        };
        let (reference, _) = build_annotations(&table(), &selection, 4).unwrap();
        assert_eq!(reference.worldlines, vec![WorldlineId(1), WorldlineId(2)]);
        // Both frames cover {1, 2}.
        assert_eq!(reference.roots, vec![0, 2]);

        let selection = ReferenceSelection {
            n_ref: Some(7),
            ..Default::default()
        };
        assert_eq!(
            build_annotations(&table(), &selection, 4).unwrap_err(),
            CoreError::NoFrameWithCount(7)
        );
    }

    #[test]
    fn explicit_worldlines_restrict_roots() {
        let selection = ReferenceSelection {
            wlid_ref: Some(vec![WorldlineId(3), WorldlineId(1)]),
            ..Default::default()
        };
        let (reference, _) = build_annotations(&table(), &selection, 4).unwrap();
        assert_eq!(reference.worldlines, vec![WorldlineId(1), WorldlineId(3)]);
        assert_eq!(reference.roots, vec![0]);
        assert_eq!(reference.index_of(WorldlineId(3)), Some(1));
        assert_eq!(reference.index_of(WorldlineId(2)), None);
    }

    #[test]
    fn uncovered_selection_is_fatal() {
        let selection = ReferenceSelection {
            t_ref: Some(vec![2]),
            wlid_ref: Some(vec![WorldlineId(3)]),
            ..Default::default()
        };
        assert_eq!(
            build_annotations(&table(), &selection, 4).unwrap_err(),
            CoreError::NoReferenceFrames
        );
    }

    #[test]
    fn candidate_past_source_is_fatal() {
        let selection = ReferenceSelection {
            t_ref: Some(vec![9]),
            ..Default::default()
        };
        assert_eq!(
            build_annotations(&table(), &selection, 4).unwrap_err(),
            CoreError::FrameOutOfRange(9, 4)
        );
    }

    #[test]
    fn annotated_frame_past_source_is_fatal() {
        // Without an explicit candidate list, annotated frames are the
        // candidates and get the same range check.
        let table = AnnotationTable::from_annotations(vec![
            ann(1, 9, 1.0, "manual"),
            ann(2, 9, 2.0, "manual"),
        ])
        .unwrap();
        assert_eq!(
            build_annotations(&table, &ReferenceSelection::default(), 4).unwrap_err(),
            CoreError::FrameOutOfRange(9, 4)
        );
    }
}
