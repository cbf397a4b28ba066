//! Top-level orchestrator: normalize -> extract -> align -> fit -> bundle.

use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{
    FitOutcome, JointPrediction, ModelSnapshot, PipelineError, PipelineInputs, VoxelPrediction,
};
use crate::align::VoxelAlignment;
use crate::body::{reset_to_upright, DeformableModel};
use crate::fit::{fit_to_joints, fit_to_surface, FitConfig, JointTargets};
use crate::marching::extract_surface;
use crate::volume::{foreground_probability, reorient_parts, reorient_volume, VolumeGrid};

/// Root-relative joint predictions sit at the origin within this tolerance.
const ROOT_EPS: f64 = 1e-5;

/// Stage settings for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Iso level for surface extraction.
    pub iso_level: f32,
    /// Joints-only initialization settings.
    pub joint_fit: FitConfig,
    /// Surface refinement settings.
    pub surface_fit: FitConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            iso_level: 0.5,
            joint_fit: FitConfig::default(),
            surface_fit: FitConfig::default(),
        }
    }
}

/// Run the whole pipeline for one sample.
///
/// `model` is the loaded reference model and is never mutated; every stage
/// works on its own clone. Returns the three snapshots (reference, initial,
/// fitted) plus the aligned mesh and both stage reports.
pub fn run<M>(
    model: &M,
    inputs: PipelineInputs,
    config: &PipelineConfig,
) -> Result<FitOutcome, PipelineError>
where
    M: DeformableModel + Clone,
{
    inputs.validate(model.pose_len(), model.shape_len(), model.joint_count())?;
    let PipelineInputs {
        ground_truth,
        prediction,
        joints,
        mask,
        info,
    } = inputs;

    let gt = VolumeGrid::new(reorient_volume(ground_truth));
    let field = match prediction {
        VoxelPrediction::Occupancy(f) => VolumeGrid::new(reorient_volume(f)),
        VoxelPrediction::Parts(logits) => {
            let logits = reorient_parts(logits);
            info!("aggregating {} part channels", logits.dim().0);
            VolumeGrid::new(foreground_probability(&logits))
        }
    };

    let mut mesh = extract_surface(&field, config.iso_level)?;
    info!(
        "extracted iso-surface: {} vertices, {} triangles",
        mesh.vertex_count(),
        mesh.triangle_count()
    );

    let mut reference = model.clone();
    reference.set_pose(&info.reference_pose());
    reference.set_shape(info.shape.as_slice());

    let alignment = VoxelAlignment::derive(&gt, &mask, &reference.vertices())?;
    alignment.apply(&mut mesh);

    let mut initial = model.clone();
    reset_to_upright(&mut initial);
    // Root-relative predictions are lifted by the upright model's root.
    let targets = prepare_joint_targets(&joints, initial.joints()[0]);

    let stage1 = fit_to_joints(&mut initial, &targets, &config.joint_fit);
    if !stage1.converged {
        warn!(
            "joint initialization did not reduce its cost (final {:.3e})",
            stage1.final_cost
        );
    }

    let mut fitted = initial.clone();
    let stage2 = fit_to_surface(
        &mut fitted,
        &mesh.vertices,
        &mesh.confidences,
        &config.surface_fit,
    );
    if !stage2.converged {
        warn!(
            "surface refinement did not reduce its cost (final {:.3e})",
            stage2.final_cost
        );
    }
    info!(
        stage1_cost = stage1.final_cost,
        stage2_cost = stage2.final_cost,
        "fitting complete"
    );

    Ok(FitOutcome {
        reference: ModelSnapshot::capture(&reference),
        initial: ModelSnapshot::capture(&initial),
        fitted: ModelSnapshot::capture(&fitted),
        mesh,
        alignment,
        stage1,
        stage2,
    })
}

/// Mirror predicted joints across the x axis, then lift root-relative
/// predictions into the model frame by adding the reference root.
fn prepare_joint_targets(
    prediction: &JointPrediction,
    reference_root: Point3<f64>,
) -> JointTargets {
    let mut positions = prediction.positions.clone();
    for p in &mut positions {
        p.x = -p.x;
    }

    let root_slot = match &prediction.model_indices {
        Some(indices) => indices.iter().position(|&i| i == 0),
        None => Some(0),
    };
    if let Some(k) = root_slot {
        if positions[k].coords.abs().sum() < ROOT_EPS {
            for p in &mut positions {
                *p += reference_root.coords;
            }
        }
    }

    let indices = prediction
        .model_indices
        .clone()
        .unwrap_or_else(|| (0..positions.len()).collect());
    JointTargets { positions, indices }
}
