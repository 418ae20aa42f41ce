use bincode::{Decode, Encode};

/// Dense `(T, N, 3)` buffer of tracked keypoint positions.
///
/// Rows for untracked frames hold the `NaN` placeholder. Positions are stored
/// as `[x, y, z]` in frame-space voxels.
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct ResultsBuffer {
    n_frames: usize,
    n_keypoints: usize,
    data: Vec<f32>,
}

impl ResultsBuffer {
    /// Create a buffer with every entry set to the placeholder.
    pub fn new(n_frames: usize, n_keypoints: usize) -> Self {
        Self {
            n_frames,
            n_keypoints,
            data: vec![f32::NAN; n_frames * n_keypoints * 3],
        }
    }

    /// Number of frames the buffer covers.
    pub fn n_frames(&self) -> usize {
        self.n_frames
    }

    /// Number of keypoints per frame.
    pub fn n_keypoints(&self) -> usize {
        self.n_keypoints
    }

    fn offset(&self, t: usize, k: usize) -> usize {
        (t * self.n_keypoints + k) * 3
    }

    /// Position of keypoint `k` in frame `t`, or `None` when out of range.
    pub fn get(&self, t: usize, k: usize) -> Option<[f32; 3]> {
        if t >= self.n_frames || k >= self.n_keypoints {
            return None;
        }
        let off = self.offset(t, k);
        Some([self.data[off], self.data[off + 1], self.data[off + 2]])
    }

    /// Write the position of keypoint `k` in frame `t`.
    pub fn set(&mut self, t: usize, k: usize, pos: [f32; 3]) {
        let off = self.offset(t, k);
        self.data[off..off + 3].copy_from_slice(&pos);
    }

    /// All keypoint positions of frame `t`.
    pub fn frame_positions(&self, t: usize) -> Vec<[f32; 3]> {
        (0..self.n_keypoints)
            .map(|k| {
                let off = self.offset(t, k);
                [self.data[off], self.data[off + 1], self.data[off + 2]]
            })
            .collect()
    }

    /// Overwrite all keypoint positions of frame `t`.
    pub fn set_frame(&mut self, t: usize, positions: &[[f32; 3]]) {
        for (k, pos) in positions.iter().enumerate() {
            self.set(t, k, *pos);
        }
    }

    /// Whether frame `t` holds a fully finite row.
    pub fn is_tracked(&self, t: usize) -> bool {
        let off = self.offset(t, 0);
        self.data[off..off + self.n_keypoints * 3]
            .iter()
            .all(|v| v.is_finite())
    }

    /// Replace every non-finite entry with 0 and report the affected frames.
    pub fn sanitize(&mut self) -> Vec<usize> {
        let mut affected = Vec::new();
        let row = self.n_keypoints * 3;
        for t in 0..self.n_frames {
            let frame = &mut self.data[t * row..(t + 1) * row];
            let mut hit = false;
            for v in frame.iter_mut() {
                if !v.is_finite() {
                    *v = 0.0;
                    hit = true;
                }
            }
            if hit {
                affected.push(t);
            }
        }
        affected
    }

    /// The raw buffer in `(T, N, 3)` ordering.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_as_placeholder() {
        let buf = ResultsBuffer::new(2, 3);
        assert!(buf.as_slice().iter().all(|v| v.is_nan()));
        assert!(!buf.is_tracked(0));
    }

    #[test]
    fn set_and_get_round_trip() {
        let mut buf = ResultsBuffer::new(2, 2);
        buf.set(1, 1, [1.0, 2.0, 3.0]);
        assert_eq!(buf.get(1, 1), Some([1.0, 2.0, 3.0]));
        assert_eq!(buf.get(2, 0), None);
        assert!(!buf.is_tracked(1));
        buf.set(1, 0, [0.5, 0.5, 0.0]);
        assert!(buf.is_tracked(1));
    }

    #[test]
    fn sanitize_names_exactly_the_affected_frames() {
        let mut buf = ResultsBuffer::new(8, 2);
        for t in 0..8 {
            for k in 0..2 {
                buf.set(t, k, [t as f32, k as f32, 0.0]);
            }
        }
        buf.set(3, 1, [f32::NAN, 3.0, 0.0]);
        buf.set(7, 0, [7.0, f32::INFINITY, 0.0]);
        let affected = buf.sanitize();
        assert_eq!(affected, vec![3, 7]);
        assert!(buf.as_slice().iter().all(|v| v.is_finite()));
        assert_eq!(buf.get(3, 1), Some([0.0, 3.0, 0.0]));
        assert_eq!(buf.get(7, 0), Some([7.0, 0.0, 0.0]));
        assert!(buf.sanitize().is_empty());
    }
}
