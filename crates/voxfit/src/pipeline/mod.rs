//! End-to-end voxel-to-model fitting pipeline.
//!
//! This module is the glue layer that wires together the stages:
//! volume normalization -> iso-surface extraction -> alignment -> joint
//! initialization -> surface refinement -> snapshot bundling.
//!
//! Algorithmic primitives live in `crate::volume`, `crate::marching`,
//! `crate::align` and `crate::fit`. The pipeline layer owns stage order,
//! boundary validation and the three model snapshots.

mod inputs;
mod result;
mod run;

pub use inputs::{Gender, GroundTruthInfo, JointPrediction, PipelineInputs, VoxelPrediction};
pub use result::{FitOutcome, ModelSnapshot};
pub use run::{run, PipelineConfig};

use std::fmt;

use crate::align::AlignmentError;
use crate::marching::EmptyMeshError;

/// Fatal pipeline failures. Fit divergence is not one of them: it travels in
/// the stage reports and is logged, never raised.
#[derive(Debug)]
pub enum PipelineError {
    /// Inputs rejected before any stage ran.
    InvalidInput(String),
    /// The predicted field never crosses the iso level.
    EmptyMesh(EmptyMeshError),
    /// Alignment evidence was degenerate.
    Alignment(AlignmentError),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Self::EmptyMesh(e) => write!(f, "surface extraction failed: {e}"),
            Self::Alignment(e) => write!(f, "alignment failed: {e}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidInput(_) => None,
            Self::EmptyMesh(e) => Some(e),
            Self::Alignment(e) => Some(e),
        }
    }
}

impl From<EmptyMeshError> for PipelineError {
    fn from(e: EmptyMeshError) -> Self {
        Self::EmptyMesh(e)
    }
}

impl From<AlignmentError> for PipelineError {
    fn from(e: AlignmentError) -> Self {
        Self::Alignment(e)
    }
}
