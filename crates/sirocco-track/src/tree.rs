//! Propagation forest over the frames of a recording.
//!
//! Root frames carry full reference annotations; every other tracked frame
//! registers against its parent, so parents must be solved first. The
//! builder greedily attaches the unresolved frame with the best score to the
//! already-resolved frontier, which keeps each parent as similar as possible
//! to its children.

use bincode::{Decode, Encode};
use sirocco_core::CoreError;

/// Parent links and traversal order of the propagation forest.
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct FrameTree {
    /// Parent of each frame. `None` for roots and for frames left
    /// unattached.
    pub parent: Vec<Option<u32>>,
    /// Traversal order: roots first ascending, then attached frames in the
    /// order they joined. Parents always precede their children.
    pub order: Vec<u32>,
}

/// Resolve the set of frames that participate in tracking.
///
/// `t_track` replaces `t_ignore` when both are given; roots are always
/// active. The result is sorted and deduplicated.
///
/// # Errors
///
/// Returns [`CoreError::FrameOutOfRange`] for a selection past the source.
pub fn active_frames(
    n_frames: usize,
    roots: &[usize],
    t_ignore: Option<&[usize]>,
    t_track: Option<&[usize]>,
) -> Result<Vec<usize>, CoreError> {
    for list in [t_ignore, t_track].into_iter().flatten() {
        if let Some(&t) = list.iter().find(|&&t| t >= n_frames) {
            return Err(CoreError::FrameOutOfRange(t, n_frames));
        }
    }
    let mut active: Vec<usize> = match (t_track, t_ignore) {
        (Some(track), _) => track.iter().chain(roots).copied().collect(),
        (None, Some(ignore)) => (0..n_frames)
            .filter(|t| !ignore.contains(t) || roots.contains(t))
            .collect(),
        (None, None) => (0..n_frames).collect(),
    };
    active.sort_unstable();
    active.dedup();
    Ok(active)
}

/// Build the propagation forest for `active` frames rooted at `roots`.
///
/// `score(candidate, parent)` is any total preference; on equal score the
/// lower candidate index wins, then the lower parent index. Frames whose
/// score against every frontier member is non-finite stay unattached and are
/// reported with a warning.
pub fn build_tree<F>(n_frames: usize, roots: &[usize], active: &[usize], score: F) -> FrameTree
where
    F: Fn(usize, usize) -> f32,
{
    let mut parent: Vec<Option<u32>> = vec![None; n_frames];
    let mut order: Vec<u32> = roots.iter().map(|&t| t as u32).collect();
    order.sort_unstable();
    order.dedup();
    let n_roots = order.len();

    let candidates: Vec<usize> = active
        .iter()
        .copied()
        .filter(|t| !roots.contains(t))
        .collect();
    let mut attached = vec![false; n_frames];
    // Best frontier connection per candidate, kept current as the frontier
    // grows. Ties prefer the lower parent index.
    let mut best: Vec<Option<(f32, usize)>> = vec![None; n_frames];
    for &c in &candidates {
        for &r in order.iter() {
            consider(&mut best[c], score(c, r as usize), r as usize);
        }
    }

    for _ in 0..candidates.len() {
        let mut pick: Option<(f32, usize, usize)> = None;
        for &c in &candidates {
            if attached[c] {
                continue;
            }
            if let Some((s, p)) = best[c] {
                if s.is_finite() && pick.map_or(true, |(bs, _, _)| s > bs) {
                    pick = Some((s, c, p));
                }
            }
        }
        let Some((_, c, p)) = pick else {
            break;
        };
        parent[c] = Some(p as u32);
        order.push(c as u32);
        attached[c] = true;
        for &other in &candidates {
            if !attached[other] {
                consider(&mut best[other], score(other, c), c);
            }
        }
    }

    let unattached: Vec<usize> = candidates.iter().copied().filter(|&c| !attached[c]).collect();
    if !unattached.is_empty() {
        log::warn!(
            "frames {:?} are unreachable from any root and will not be tracked",
            unattached
        );
    }
    log::info!(
        "frame tree built: {} of {} frames reachable from {} roots",
        order.len(),
        n_frames,
        n_roots
    );
    FrameTree { parent, order }
}

fn consider(best: &mut Option<(f32, usize)>, score: f32, parent: usize) {
    if !score.is_finite() {
        return;
    }
    match best {
        Some((s, p)) => {
            if score > *s || (score == *s && parent < *p) {
                *best = Some((score, parent));
            }
        }
        None => *best = Some((score, parent)),
    }
}

/// Score for time-ordered attachment: frames prefer temporally close
/// parents.
pub fn linear_score(candidate: usize, parent: usize) -> f32 {
    -((candidate as f32) - (parent as f32)).abs()
}
