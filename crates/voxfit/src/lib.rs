//! voxfit — registration of articulated body models to voxel predictions.
//!
//! Takes a voxel occupancy grid (or per-part segmentation logits), sparse 3D
//! joint estimates and a silhouette mask, and recovers the pose and shape of a
//! linear-blend-skinned body model that explains them. The pipeline stages are:
//!
//! 1. **Volume** – grid reorientation, softmax collapse of part logits into a
//!    foreground probability field.
//! 2. **Marching** – iso-surface extraction with a per-vertex confidence taken
//!    from the underlying field.
//! 3. **Align** – voxel-to-model-frame calibration: crop padding from the
//!    ground-truth grid, anisotropic scale snapped to integer voxel extents.
//! 4. **Fit** – two-stage registration: a joints-only pose solve from an
//!    upright rest start, then a confidence-weighted surface solve over pose
//!    and shape with nearest-vertex correspondences and magnitude priors.
//! 5. **Pipeline** – orchestration of the stages above plus reference/initial/
//!    final model snapshots.
//!
//! [`pipeline::run`] is the end-to-end entry point; the stage modules stay
//! public for callers that need a single piece.

pub mod align;
pub mod body;
pub mod export;
pub mod fit;
pub mod marching;
pub mod mesh;
pub mod pipeline;
pub mod volume;

#[cfg(test)]
pub(crate) mod test_utils;
