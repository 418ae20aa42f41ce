//! Motion prediction from partial annotations.
//!
//! When a frame carries annotations for some keypoints, their displacements
//! from the parent positions sketch a motion field. The remaining keypoints
//! get an initial guess from that field instead of sitting at the parent
//! position. This only seeds the optimizer; it never constrains it.

const EPS: f32 = 1e-6;

/// Predict initial positions from a sparse set of anchors.
///
/// `anchors` pairs keypoint indices with their annotated positions in the
/// current frame. Anchored keypoints land exactly on their annotation; the
/// rest move by the inverse-square-distance weighted mean of the anchor
/// displacements. Without anchors the parent positions pass through
/// unchanged.
pub fn predict_positions(parent: &[[f32; 3]], anchors: &[(usize, [f32; 3])]) -> Vec<[f32; 3]> {
    if anchors.is_empty() {
        return parent.to_vec();
    }
    let displacements: Vec<(usize, [f32; 3])> = anchors
        .iter()
        .map(|&(a, pos)| {
            (
                a,
                [
                    pos[0] - parent[a][0],
                    pos[1] - parent[a][1],
                    pos[2] - parent[a][2],
                ],
            )
        })
        .collect();
    parent
        .iter()
        .enumerate()
        .map(|(k, &p)| {
            if let Some(&(_, pos)) = anchors.iter().find(|&&(a, _)| a == k) {
                return pos;
            }
            let mut disp = [0.0f32; 3];
            let mut weight_sum = 0.0;
            for &(a, d) in &displacements {
                let q = parent[a];
                let dist2 = (p[0] - q[0]).powi(2) + (p[1] - q[1]).powi(2) + (p[2] - q[2]).powi(2);
                let w = 1.0 / (dist2 + EPS);
                weight_sum += w;
                for i in 0..3 {
                    disp[i] += w * d[i];
                }
            }
            [
                p[0] + disp[0] / weight_sum,
                p[1] + disp[1] / weight_sum,
                p[2] + disp[2] / weight_sum,
            ]
        })
        .collect()
}
