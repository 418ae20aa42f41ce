//! Spring network expressing nearest-neighbor rigidity constraints.
//!
//! Edges connect each keypoint to its nearest neighbors in the reference
//! geometry and store the rest displacement between them. The network is
//! undirected and deduplicated; the per-keypoint view used by the spring
//! loss caps incident edges at the configured neighbor count.

use std::collections::BTreeSet;

use bincode::{Decode, Encode};
use sirocco_core::ResultsBuffer;

use crate::error::TrackError;

/// One undirected spring between two keypoints.
#[derive(Clone, Copy, Debug, PartialEq, Encode, Decode)]
pub struct Spring {
    /// Lower keypoint index.
    pub a: u32,
    /// Higher keypoint index.
    pub b: u32,
    /// Rest displacement from `a` to `b` in the reference geometry.
    pub rest: [f32; 3],
}

/// Undirected spring network over the tracked keypoints.
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct SpringNetwork {
    n_keypoints: usize,
    nn_max: usize,
    edges: Vec<Spring>,
    /// Per-keypoint incident edge indices, capped at `nn_max`, in edge
    /// declaration order.
    incident: Vec<Vec<u32>>,
}

fn dist2(p: [f32; 3], q: [f32; 3]) -> f32 {
    (p[0] - q[0]).powi(2) + (p[1] - q[1]).powi(2) + (p[2] - q[2]).powi(2)
}

impl SpringNetwork {
    /// Build the network from reference positions: each keypoint contributes
    /// edges to its `nn_max` nearest others, then the edge set is
    /// symmetrized and deduplicated.
    ///
    /// Rebuilding from the same positions yields the identical network.
    pub fn build(positions: &[[f32; 3]], nn_max: usize) -> Self {
        let n = positions.len();
        let mut pairs = BTreeSet::new();
        for i in 0..n {
            let mut others: Vec<usize> = (0..n).filter(|&j| j != i).collect();
            others.sort_by(|&a, &b| {
                dist2(positions[i], positions[a])
                    .partial_cmp(&dist2(positions[i], positions[b]))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.cmp(&b))
            });
            for &j in others.iter().take(nn_max) {
                pairs.insert((i.min(j), i.max(j)));
            }
        }
        Self::from_index_pairs(n, nn_max, pairs, positions)
    }

    /// Build the network from an explicit pair list instead of nearest
    /// neighbors. Rest displacements still come from the reference
    /// positions.
    ///
    /// # Errors
    ///
    /// Returns [`TrackError::InvalidSpringPair`] for self-pairs and indices
    /// past the keypoint count.
    pub fn from_pairs(
        positions: &[[f32; 3]],
        pairs: &[(usize, usize)],
        nn_max: usize,
    ) -> Result<Self, TrackError> {
        let n = positions.len();
        let mut set = BTreeSet::new();
        for &(a, b) in pairs {
            if a == b || a >= n || b >= n {
                return Err(TrackError::InvalidSpringPair(a, b));
            }
            set.insert((a.min(b), a.max(b)));
        }
        Ok(Self::from_index_pairs(n, nn_max, set, positions))
    }

    fn from_index_pairs(
        n: usize,
        nn_max: usize,
        pairs: BTreeSet<(usize, usize)>,
        positions: &[[f32; 3]],
    ) -> Self {
        let edges: Vec<Spring> = pairs
            .into_iter()
            .map(|(a, b)| Spring {
                a: a as u32,
                b: b as u32,
                rest: [
                    positions[b][0] - positions[a][0],
                    positions[b][1] - positions[a][1],
                    positions[b][2] - positions[a][2],
                ],
            })
            .collect();
        let mut incident = vec![Vec::new(); n];
        for (e, spring) in edges.iter().enumerate() {
            for k in [spring.a as usize, spring.b as usize] {
                if incident[k].len() < nn_max {
                    incident[k].push(e as u32);
                }
            }
        }
        Self {
            n_keypoints: n,
            nn_max,
            edges,
            incident,
        }
    }

    /// Number of keypoints the network spans.
    pub fn n_keypoints(&self) -> usize {
        self.n_keypoints
    }

    /// Neighbor cap the network was built with.
    pub fn nn_max(&self) -> usize {
        self.nn_max
    }

    /// The undirected edge set, ordered by `(a, b)`.
    pub fn edges(&self) -> &[Spring] {
        &self.edges
    }

    /// Incident edge indices of keypoint `k`, capped at `nn_max`.
    pub fn incident(&self, k: usize) -> &[u32] {
        &self.incident[k]
    }

    /// Mean rest length of the springs incident to keypoint `k`, or the
    /// network-wide mean when the keypoint is isolated.
    pub fn mean_rest_length(&self, k: usize) -> f32 {
        let lengths: Vec<f32> = self.incident[k]
            .iter()
            .map(|&e| {
                let r = self.edges[e as usize].rest;
                (r[0] * r[0] + r[1] * r[1] + r[2] * r[2]).sqrt()
            })
            .collect();
        if lengths.is_empty() {
            self.global_mean_rest_length()
        } else {
            lengths.iter().sum::<f32>() / lengths.len() as f32
        }
    }

    fn global_mean_rest_length(&self) -> f32 {
        if self.edges.is_empty() {
            return 0.0;
        }
        let sum: f32 = self
            .edges
            .iter()
            .map(|s| (s.rest[0] * s.rest[0] + s.rest[1] * s.rest[1] + s.rest[2] * s.rest[2]).sqrt())
            .sum();
        sum / self.edges.len() as f32
    }
}

/// Mean per-keypoint position over the root frames, the geometry springs
/// are built from.
pub fn mean_reference_positions(results: &ResultsBuffer, roots: &[usize]) -> Vec<[f32; 3]> {
    let n = results.n_keypoints();
    let mut mean = vec![[0.0f32; 3]; n];
    if roots.is_empty() {
        return mean;
    }
    for &t in roots {
        for (k, pos) in results.frame_positions(t).into_iter().enumerate() {
            for d in 0..3 {
                mean[k][d] += pos[d];
            }
        }
    }
    let inv = 1.0 / roots.len() as f32;
    for pos in mean.iter_mut() {
        for d in pos.iter_mut() {
            *d *= inv;
        }
    }
    mean
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // Four keypoints on a line at x = 0, 1, 3, 6.
    fn line_positions() -> Vec<[f32; 3]> {
        vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [3.0, 0.0, 0.0],
            [6.0, 0.0, 0.0],
        ]
    }

    #[test]
    fn edges_are_undirected_and_deduplicated() {
        let net = SpringNetwork::build(&line_positions(), 2);
        for spring in net.edges() {
            assert!(spring.a < spring.b);
        }
        let mut pairs: Vec<(u32, u32)> = net.edges().iter().map(|s| (s.a, s.b)).collect();
        let before = pairs.len();
        pairs.dedup();
        assert_eq!(pairs.len(), before);
    }

    #[test]
    fn incident_edges_respect_the_cap() {
        let net = SpringNetwork::build(&line_positions(), 2);
        for k in 0..net.n_keypoints() {
            assert!(net.incident(k).len() <= 2);
        }
    }

    #[test]
    fn contains_each_keypoints_nearest_neighbors() {
        let net = SpringNetwork::build(&line_positions(), 1);
        let pairs: Vec<(u32, u32)> = net.edges().iter().map(|s| (s.a, s.b)).collect();
        // 0 and 2 both pick 1; 3 picks 2.
        assert_eq!(pairs, vec![(0, 1), (1, 2), (2, 3)]);
    }

    #[test]
    fn rest_displacements_match_geometry() {
        let net = SpringNetwork::build(&line_positions(), 1);
        let edge = net.edges().iter().find(|s| s.a == 2 && s.b == 3).unwrap();
        assert_eq!(edge.rest, [3.0, 0.0, 0.0]);
    }

    #[test]
    fn rebuild_is_idempotent() {
        let positions = line_positions();
        assert_eq!(
            SpringNetwork::build(&positions, 2),
            SpringNetwork::build(&positions, 2)
        );
    }

    #[test]
    fn manual_pairs_replace_neighbor_search() {
        let net = SpringNetwork::from_pairs(&line_positions(), &[(3, 0), (0, 3)], 2).unwrap();
        assert_eq!(net.edges().len(), 1);
        assert_eq!(net.edges()[0].rest, [6.0, 0.0, 0.0]);
        assert!(matches!(
            SpringNetwork::from_pairs(&line_positions(), &[(1, 1)], 2),
            Err(TrackError::InvalidSpringPair(1, 1))
        ));
        assert!(matches!(
            SpringNetwork::from_pairs(&line_positions(), &[(0, 9)], 2),
            Err(TrackError::InvalidSpringPair(0, 9))
        ));
    }

    #[test]
    fn mean_rest_length_falls_back_for_isolated_keypoints() {
        let net = SpringNetwork::from_pairs(&line_positions(), &[(0, 1)], 2).unwrap();
        assert_relative_eq!(net.mean_rest_length(0), 1.0);
        // Keypoint 3 has no incident spring, so the global mean applies.
        assert_relative_eq!(net.mean_rest_length(3), 1.0);
    }

    #[test]
    fn mean_reference_positions_average_roots() {
        let mut results = ResultsBuffer::new(3, 2);
        results.set_frame(0, &[[0.0, 0.0, 0.0], [2.0, 2.0, 0.0]]);
        results.set_frame(2, &[[1.0, 1.0, 0.0], [4.0, 2.0, 0.0]]);
        let mean = mean_reference_positions(&results, &[0, 2]);
        assert_eq!(mean[0], [0.5, 0.5, 0.0]);
        assert_eq!(mean[1], [3.0, 2.0, 0.0]);
    }
}
