//! Input records for one sample, as produced by the voxel predictor.

use image::GrayImage;
use nalgebra::{DMatrix, DVector, Point3, Rotation3, Vector3};
use ndarray::{Array3, Array4};
use serde::{Deserialize, Serialize};

use super::PipelineError;

/// Gender flag of the ground-truth record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Female,
    Male,
}

impl Gender {
    /// Decode the record's numeric flag: 0 is female, 1 is male.
    pub fn from_flag(flag: i64) -> Option<Self> {
        match flag {
            0 => Some(Self::Female),
            1 => Some(Self::Male),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Female => "female",
            Self::Male => "male",
        }
    }
}

/// Ground-truth motion record: per-frame pose columns, one shape vector and
/// the capture's z-rotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundTruthInfo {
    pub gender: Gender,
    /// Pose parameters, one column per frame, 3 · joint-count rows.
    pub pose_frames: DMatrix<f64>,
    /// Shape coefficients shared by all frames.
    pub shape: DVector<f64>,
    /// Rotation of the body around the vertical capture axis, radians.
    pub zrot: f64,
}

impl GroundTruthInfo {
    /// Index of the clip's middle frame, `ceil(n / 2) - 1`.
    pub fn middle_frame(&self) -> usize {
        (self.pose_frames.ncols() + 1) / 2 - 1
    }

    /// Pose of the middle frame with the global rotation composed with the
    /// z-rotation, re-expressed in axis-angle.
    pub fn reference_pose(&self) -> Vec<f64> {
        let mut pose: Vec<f64> = self
            .pose_frames
            .column(self.middle_frame())
            .iter()
            .copied()
            .collect();
        let global = Rotation3::from_scaled_axis(Vector3::new(pose[0], pose[1], pose[2]));
        let turned = Rotation3::from_axis_angle(&Vector3::z_axis(), self.zrot) * global;
        let axis = turned.scaled_axis();
        pose[0] = axis.x;
        pose[1] = axis.y;
        pose[2] = axis.z;
        pose
    }
}

/// Predicted volumetric field in predictor storage order (z, y, x).
#[derive(Debug, Clone)]
pub enum VoxelPrediction {
    /// Single foreground-occupancy channel.
    Occupancy(Array3<f32>),
    /// Per-part logits, channel 0 being background.
    Parts(Array4<f32>),
}

/// Predicted 3D joints, model-frame units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JointPrediction {
    pub positions: Vec<Point3<f64>>,
    /// Model joint index per position. `None` means the prediction covers
    /// every model joint in model order.
    pub model_indices: Option<Vec<usize>>,
}

/// Everything the pipeline consumes for one sample.
#[derive(Debug, Clone)]
pub struct PipelineInputs {
    /// Ground-truth occupancy, predictor storage order.
    pub ground_truth: Array3<f32>,
    /// Predicted field, predictor storage order.
    pub prediction: VoxelPrediction,
    /// Predicted joints, still in the predictor's mirrored convention.
    pub joints: JointPrediction,
    /// Foreground segmentation mask, resolution × resolution.
    pub mask: GrayImage,
    /// Ground-truth record for the sample's clip.
    pub info: GroundTruthInfo,
}

impl PipelineInputs {
    /// Boundary validation against the reference model's dimensions. Runs
    /// before any stage; violations never reach the extractors.
    pub(super) fn validate(
        &self,
        pose_len: usize,
        shape_len: usize,
        joint_count: usize,
    ) -> Result<(), PipelineError> {
        let invalid = |msg: String| Err(PipelineError::InvalidInput(msg));

        let gt_dims = self.ground_truth.dim();
        if gt_dims.0 == 0 || gt_dims.0 != gt_dims.1 || gt_dims.1 != gt_dims.2 {
            return invalid(format!("ground-truth grid must be cubic, got {gt_dims:?}"));
        }
        match &self.prediction {
            VoxelPrediction::Occupancy(field) => {
                if field.dim() != gt_dims {
                    return invalid(format!(
                        "predicted field {:?} does not match ground truth {gt_dims:?}",
                        field.dim()
                    ));
                }
            }
            VoxelPrediction::Parts(logits) => {
                let (c, nx, ny, nz) = logits.dim();
                if c < 2 {
                    return invalid(format!("part prediction needs >= 2 channels, got {c}"));
                }
                if (nx, ny, nz) != gt_dims {
                    return invalid(format!(
                        "part prediction {:?} does not match ground truth {gt_dims:?}",
                        (nx, ny, nz)
                    ));
                }
            }
        }

        let res = gt_dims.0 as u32;
        if self.mask.width() != res || self.mask.height() != res {
            return invalid(format!(
                "mask is {}x{}, expected {res}x{res}",
                self.mask.width(),
                self.mask.height()
            ));
        }

        if self.joints.positions.is_empty() {
            return invalid("no joint predictions".into());
        }
        match &self.joints.model_indices {
            Some(indices) => {
                if indices.len() != self.joints.positions.len() {
                    return invalid(format!(
                        "{} joint positions but {} model indices",
                        self.joints.positions.len(),
                        indices.len()
                    ));
                }
                if let Some(&bad) = indices.iter().find(|&&i| i >= joint_count) {
                    return invalid(format!(
                        "joint index {bad} out of range for a {joint_count}-joint model"
                    ));
                }
            }
            None => {
                if self.joints.positions.len() != joint_count {
                    return invalid(format!(
                        "{} joint predictions for a {joint_count}-joint model need explicit indices",
                        self.joints.positions.len()
                    ));
                }
            }
        }

        if self.info.pose_frames.ncols() == 0 {
            return invalid("ground-truth record has no pose frames".into());
        }
        if self.info.pose_frames.nrows() != pose_len {
            return invalid(format!(
                "pose frames have {} rows, model expects {pose_len}",
                self.info.pose_frames.nrows()
            ));
        }
        if self.info.shape.len() != shape_len {
            return invalid(format!(
                "shape vector has {} coefficients, model expects {shape_len}",
                self.info.shape.len()
            ));
        }
        Ok(())
    }
}
