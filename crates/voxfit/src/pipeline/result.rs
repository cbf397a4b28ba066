use nalgebra::Point3;
use serde::{Deserialize, Serialize};

use crate::align::VoxelAlignment;
use crate::body::DeformableModel;
use crate::fit::FitReport;
use crate::mesh::SurfaceMesh;

/// Pose, shape and derived geometry of one model state. Captured by value,
/// so snapshots stay valid however the model is mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub pose: Vec<f64>,
    pub shape: Vec<f64>,
    pub vertices: Vec<Point3<f64>>,
    pub joints: Vec<Point3<f64>>,
}

impl ModelSnapshot {
    pub fn capture<M: DeformableModel + ?Sized>(model: &M) -> Self {
        Self {
            pose: model.pose().to_vec(),
            shape: model.shape().to_vec(),
            vertices: model.vertices(),
            joints: model.joints(),
        }
    }
}

/// Everything the pipeline produces for one sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitOutcome {
    /// Model posed with the ground-truth record.
    pub reference: ModelSnapshot,
    /// Model after the joints-only initialization.
    pub initial: ModelSnapshot,
    /// Model after the surface refinement.
    pub fitted: ModelSnapshot,
    /// Extracted iso-surface, already in the model frame.
    pub mesh: SurfaceMesh,
    /// Voxel-to-model mapping used on the mesh.
    pub alignment: VoxelAlignment,
    /// Report of the joints-only stage.
    pub stage1: FitReport,
    /// Report of the surface stage.
    pub stage2: FitReport,
}
