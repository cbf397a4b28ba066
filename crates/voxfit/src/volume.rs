//! Volumetric scalar fields and network-output normalization.
//!
//! Grids arrive from the voxel predictor in z-y-x storage order with both
//! depth axes mirrored relative to the body frame. [`reorient_volume`] and
//! [`reorient_parts`] bring them into the x-y-z order used by every
//! downstream component. Multi-channel part predictions collapse to a single
//! foreground-probability field via [`foreground_probability`].

use ndarray::{s, Array3, Array4, Axis};

/// Scalar field over a 3D voxel grid, axis order x-y-z.
#[derive(Debug, Clone)]
pub struct VolumeGrid {
    data: Array3<f32>,
}

impl VolumeGrid {
    pub fn new(data: Array3<f32>) -> Self {
        Self { data }
    }

    /// Grid dimensions (nx, ny, nz).
    pub fn dims(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn is_cubic(&self) -> bool {
        let (nx, ny, nz) = self.dims();
        nx == ny && ny == nz
    }

    /// Edge length of a cubic grid.
    pub fn resolution(&self) -> usize {
        self.data.dim().0
    }

    pub fn value(&self, x: usize, y: usize, z: usize) -> f32 {
        self.data[[x, y, z]]
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    /// Componentwise minimum index over voxels strictly above `threshold`,
    /// or `None` when no voxel qualifies.
    pub fn occupied_min_index(&self, threshold: f32) -> Option<[usize; 3]> {
        let mut min: Option<[usize; 3]> = None;
        for ((x, y, z), &v) in self.data.indexed_iter() {
            if v > threshold {
                match &mut min {
                    Some(m) => {
                        m[0] = m[0].min(x);
                        m[1] = m[1].min(y);
                        m[2] = m[2].min(z);
                    }
                    None => min = Some([x, y, z]),
                }
            }
        }
        min
    }
}

// ── Axis normalization ───────────────────────────────────────────────────

/// Reorder a single-channel grid from predictor storage (z, y, x) to body
/// frame (x, y, z), mirroring the x and z axes.
pub fn reorient_volume(zyx: Array3<f32>) -> Array3<f32> {
    let xyz = zyx.permuted_axes([2, 1, 0]);
    xyz.slice(s![..;-1, .., ..;-1]).to_owned()
}

/// Reorder a multi-channel grid from (c, z, y, x) to (c, x, y, z), mirroring
/// the x and z axes of every channel.
pub fn reorient_parts(czyx: Array4<f32>) -> Array4<f32> {
    let cxyz = czyx.permuted_axes([0, 3, 2, 1]);
    cxyz.slice(s![.., ..;-1, .., ..;-1]).to_owned()
}

// ── Channel aggregation ──────────────────────────────────────────────────

/// Collapse per-part logits to a single foreground probability.
///
/// Channel 0 is the background channel. Each channel passes through a
/// logistic, the responses are normalized across channels, and the output is
/// the complement of the background share: `1 - norm(logistic(l))[0]`.
pub fn foreground_probability(logits: &Array4<f32>) -> Array3<f32> {
    let logistic = logits.mapv(|v| 1.0 / (1.0 + (-v).exp()));
    let total = logistic.sum_axis(Axis(0));
    let background = logistic.index_axis(Axis(0), 0);
    let mut field = Array3::zeros(total.raw_dim());
    ndarray::Zip::from(&mut field)
        .and(&background)
        .and(&total)
        .for_each(|f, &b, &t| *f = 1.0 - b / t);
    field
}

/// Binarize a part-label grid into an occupancy field. Label 0 is background;
/// any other label counts as occupied.
pub fn labels_to_occupancy(labels: &Array3<u8>) -> Array3<f32> {
    labels.mapv(|l| if l == 0 { 0.0 } else { 1.0 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array3, Array4};

    #[test]
    fn reorient_volume_maps_indices() {
        let n = 4;
        let mut zyx = Array3::<f32>::zeros((n, n, n));
        zyx[[0, 1, 2]] = 1.0;
        zyx[[3, 0, 1]] = 2.0;
        let xyz = reorient_volume(zyx);
        // (z, y, x) lands at (n-1-x, y, n-1-z).
        assert_abs_diff_eq!(xyz[[n - 1 - 2, 1, n - 1 - 0]], 1.0);
        assert_abs_diff_eq!(xyz[[n - 1 - 1, 0, n - 1 - 3]], 2.0);
    }

    #[test]
    fn reorient_parts_maps_indices_per_channel() {
        let n = 3;
        let mut czyx = Array4::<f32>::zeros((2, n, n, n));
        czyx[[0, 0, 1, 2]] = 1.0;
        czyx[[1, 2, 0, 0]] = 3.0;
        let cxyz = reorient_parts(czyx);
        assert_abs_diff_eq!(cxyz[[0, n - 1 - 2, 1, n - 1 - 0]], 1.0);
        assert_abs_diff_eq!(cxyz[[1, n - 1 - 0, 0, n - 1 - 2]], 3.0);
    }

    #[test]
    fn foreground_probability_is_half_for_uniform_logits() {
        let logits = Array4::<f32>::zeros((2, 2, 2, 2));
        let field = foreground_probability(&logits);
        for &v in field.iter() {
            assert_abs_diff_eq!(v, 0.5, epsilon = 1e-6);
        }
    }

    #[test]
    fn foreground_probability_tracks_background_channel() {
        let mut logits = Array4::<f32>::zeros((3, 1, 1, 1));
        logits[[0, 0, 0, 0]] = -8.0;
        logits[[1, 0, 0, 0]] = 6.0;
        logits[[2, 0, 0, 0]] = 1.0;
        let confident = foreground_probability(&logits)[[0, 0, 0]];
        assert!(confident > 0.99);

        // Raising the background logit must lower the foreground probability.
        logits[[0, 0, 0, 0]] = 8.0;
        let suppressed = foreground_probability(&logits)[[0, 0, 0]];
        assert!(suppressed < confident);
        assert!((0.0..=1.0).contains(&suppressed));
    }

    #[test]
    fn labels_binarize_with_zero_background() {
        let mut labels = Array3::<u8>::zeros((2, 2, 2));
        labels[[0, 0, 0]] = 3;
        labels[[1, 1, 1]] = 1;
        let occ = labels_to_occupancy(&labels);
        assert_abs_diff_eq!(occ[[0, 0, 0]], 1.0);
        assert_abs_diff_eq!(occ[[1, 1, 1]], 1.0);
        assert_abs_diff_eq!(occ[[0, 1, 0]], 0.0);
    }

    #[test]
    fn occupied_min_index_finds_componentwise_minimum() {
        let mut grid = Array3::<f32>::zeros((16, 16, 16));
        for x in 5..9 {
            for y in 6..9 {
                for z in 7..9 {
                    grid[[x, y, z]] = 1.0;
                }
            }
        }
        let grid = VolumeGrid::new(grid);
        assert_eq!(grid.occupied_min_index(0.5), Some([5, 6, 7]));
        let empty = VolumeGrid::new(Array3::zeros((4, 4, 4)));
        assert_eq!(empty.occupied_min_index(0.5), None);
    }
}
