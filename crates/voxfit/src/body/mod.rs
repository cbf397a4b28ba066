//! The deformable body model capability.
//!
//! The fitter and the pipeline only ever see [`DeformableModel`]: a posable,
//! shapeable body that derives vertices and joints as a pure function of its
//! parameters. The crate ships [`LbsModel`], a linear-blend-skinning
//! implementation driven by the usual template/blendshape/regressor data;
//! richer models plug in through the same trait.
//!
//! Snapshots are taken with `Clone` at the pipeline seam and must be deep
//! copies: the pipeline keeps reference, initial and final states alive
//! concurrently and mutates them independently.

mod lbs;

pub use lbs::{LbsModel, ModelDataError};

use nalgebra::Point3;

/// Posable parametric body shape.
///
/// Pose layout: the first three components are the global (root) rotation in
/// axis-angle form, followed by one axis-angle triple per remaining joint.
/// Shape is a vector of linear deformation coefficients with zero as the
/// neutral body.
pub trait DeformableModel {
    fn pose_len(&self) -> usize;
    fn shape_len(&self) -> usize;
    fn joint_count(&self) -> usize;

    fn pose(&self) -> &[f64];
    fn shape(&self) -> &[f64];
    fn set_pose(&mut self, pose: &[f64]);
    fn set_shape(&mut self, shape: &[f64]);

    /// Derived surface vertex positions for the current parameters.
    fn vertices(&self) -> Vec<Point3<f64>>;

    /// Derived joint positions for the current parameters. Index 0 is the
    /// root joint.
    fn joints(&self) -> Vec<Point3<f64>>;
}

/// Reset a model to the canonical fitting start: upright global rotation
/// (pi, 0, 0), every local rotation zero, neutral shape.
pub fn reset_to_upright<M: DeformableModel + ?Sized>(model: &mut M) {
    let mut pose = vec![0.0; model.pose_len()];
    pose[0] = std::f64::consts::PI;
    model.set_pose(&pose);
    model.set_shape(&vec![0.0; model.shape_len()]);
}
