//! Two-stage model fitting.
//!
//! Stage 1 ([`fit_to_joints`]) pulls the model's joints onto predicted joint
//! positions by adjusting pose alone. Stage 2 ([`fit_to_surface`]) refines
//! pose and shape together against confidence-weighted surface points, with
//! nearest-vertex correspondences rebuilt between solver rounds and the
//! model's own entry joints held as soft anchors.
//!
//! Both stages mutate the model in place and report costs rather than fail:
//! a solve that cannot reduce its cost leaves the best parameters seen and
//! comes back with `converged == false`.

mod correspondence;
mod solver;

pub use solver::{SolveOptions, SolveSummary};

use nalgebra::{DVector, Point3};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::body::DeformableModel;
use correspondence::nearest_vertex_indices;

// ── Configuration ───────────────────────────────────────────────────────────

/// Settings shared by both fitting stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Damped least-squares settings for each solver round.
    pub solver: SolveOptions,
    /// Correspondence rounds for the surface stage; clamped to at least 1.
    pub outer_iterations: usize,
    /// Rebuild nearest-vertex matches at the start of every round. When off,
    /// the matches from the first round are reused unchanged.
    pub recompute_correspondences: bool,
    /// Weight holding joints near their entry positions during the surface
    /// stage; 0 drops the anchor term.
    pub joint_weight: f64,
    /// Ridge penalty on non-global pose coefficients; 0 disables it.
    pub pose_prior_weight: f64,
    /// Ridge penalty on shape coefficients; 0 disables it.
    pub shape_prior_weight: f64,
    /// Cap on surface points fed to the solver; 0 keeps every point.
    pub max_surface_points: usize,
    /// Seed for the surface subsampling draw.
    pub seed: u64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            solver: SolveOptions::default(),
            outer_iterations: 1,
            recompute_correspondences: true,
            joint_weight: 1.0,
            pose_prior_weight: 1e-3,
            shape_prior_weight: 1e-3,
            max_surface_points: 0,
            seed: 0,
        }
    }
}

/// Perturbation added to each global-rotation component when the first joint
/// solve accepts no step.
const GLOBAL_ROTATION_NUDGE: f64 = 0.1;

/// Joint position targets, paired with the model joints they constrain.
///
/// Predictions that cover only a subset of the model's joints (or list them
/// in a different order) say so through `indices`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JointTargets {
    /// Target positions, one per constrained joint.
    pub positions: Vec<Point3<f64>>,
    /// Model joint index each target constrains; same length as `positions`.
    pub indices: Vec<usize>,
}

impl JointTargets {
    /// Targets covering joints `0..n` in model order.
    pub fn full(positions: Vec<Point3<f64>>) -> Self {
        let indices = (0..positions.len()).collect();
        Self { positions, indices }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Outcome of one fitting stage. Costs are squared residual norms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitReport {
    /// False when no solver round reduced its cost.
    pub converged: bool,
    /// Cost entering the first solver round.
    pub initial_cost: f64,
    /// Cost leaving the last solver round.
    pub final_cost: f64,
    /// Damped-step iterations summed over all rounds.
    pub solver_iterations: usize,
    /// Solver rounds executed (1 for the joint stage).
    pub outer_rounds: usize,
    /// Residual vector length of the last round.
    pub residual_count: usize,
}

// ── Stage 1: joints only ────────────────────────────────────────────────────

/// Fit pose so the model's joints meet `targets`, starting from the model's
/// current state. Shape is left untouched.
///
/// Panics if `targets` pairs up inconsistently or names a joint the model
/// does not have; target data is validated at the pipeline boundary.
pub fn fit_to_joints<M: DeformableModel + ?Sized>(
    model: &mut M,
    targets: &JointTargets,
    config: &FitConfig,
) -> FitReport {
    assert_eq!(
        targets.positions.len(),
        targets.indices.len(),
        "joint targets and indices must pair up"
    );
    let joint_count = model.joint_count();
    for &idx in &targets.indices {
        assert!(idx < joint_count, "joint target index {idx} out of range");
    }

    let pose_len = model.pose_len();
    let pose_prior = config.pose_prior_weight.max(0.0).sqrt();
    let prior_terms = if pose_prior > 0.0 { pose_len - 3 } else { 0 };
    let residual_len = 3 * targets.len() + prior_terms;

    let mut params = DVector::from_column_slice(model.pose());
    let mut summary = solver::minimize(
        &mut params,
        |p| joint_residuals(model, targets, pose_prior, residual_len, p),
        &config.solver,
    );

    // Targets half a turn from the start are a stationary point of the
    // objective: the gradient vanishes and no step is accepted. The
    // canonical upright rotation lands on it whenever predictions arrive in
    // the unflipped frame, so re-solve once from a nudged global rotation
    // and keep the better parameters.
    if !summary.converged && summary.iterations > 0 {
        let mut nudged = params.clone();
        for k in 0..3 {
            nudged[k] += GLOBAL_ROTATION_NUDGE;
        }
        let retry = solver::minimize(
            &mut nudged,
            |p| joint_residuals(model, targets, pose_prior, residual_len, p),
            &config.solver,
        );
        summary.iterations += retry.iterations;
        if retry.final_cost < summary.final_cost {
            params = nudged;
            summary.final_cost = retry.final_cost;
            summary.converged = retry.final_cost <= config.solver.absolute_tolerance
                || retry.final_cost < summary.initial_cost;
        }
    }
    model.set_pose(params.as_slice());

    debug!(
        "joint fit: cost {:.3e} -> {:.3e} in {} iterations",
        summary.initial_cost, summary.final_cost, summary.iterations
    );
    FitReport {
        converged: summary.converged,
        initial_cost: summary.initial_cost,
        final_cost: summary.final_cost,
        solver_iterations: summary.iterations,
        outer_rounds: 1,
        residual_count: residual_len,
    }
}

fn joint_residuals<M: DeformableModel + ?Sized>(
    model: &mut M,
    targets: &JointTargets,
    pose_prior: f64,
    residual_len: usize,
    p: &DVector<f64>,
) -> DVector<f64> {
    model.set_pose(p.as_slice());
    let joints = model.joints();
    let mut r = DVector::zeros(residual_len);
    for k in 0..targets.positions.len() {
        let d = joints[targets.indices[k]] - targets.positions[k];
        r[3 * k] = d.x;
        r[3 * k + 1] = d.y;
        r[3 * k + 2] = d.z;
    }
    if pose_prior > 0.0 {
        for i in 3..p.len() {
            r[3 * targets.positions.len() + (i - 3)] = pose_prior * p[i];
        }
    }
    r
}

// ── Stage 2: surface + joints ───────────────────────────────────────────────

/// Refine pose and shape against confidence-weighted surface points.
///
/// The model's joints at entry become soft anchors for the whole refinement.
/// Each round matches every target to its nearest model vertex, then runs one
/// damped least-squares solve with those matches frozen; rounds after the
/// first rebuild the matches from the deformed model when
/// `recompute_correspondences` is on.
///
/// `confidences` must pair up with `points`; zero-confidence points carry no
/// weight and cannot perturb the solve.
pub fn fit_to_surface<M: DeformableModel + ?Sized>(
    model: &mut M,
    points: &[Point3<f64>],
    confidences: &[f32],
    config: &FitConfig,
) -> FitReport {
    assert_eq!(
        points.len(),
        confidences.len(),
        "surface points and confidences must pair up"
    );

    let pose_len = model.pose_len();
    let shape_len = model.shape_len();
    let joint_count = model.joint_count();
    let anchors = model.joints();

    let (targets, weights) = subsample_targets(points, confidences, config);
    let joint_w = config.joint_weight.max(0.0).sqrt();
    let pose_prior = config.pose_prior_weight.max(0.0).sqrt();
    let shape_prior = config.shape_prior_weight.max(0.0).sqrt();
    let anchor_terms = if joint_w > 0.0 { 3 * joint_count } else { 0 };
    let pose_terms = if pose_prior > 0.0 { pose_len - 3 } else { 0 };
    let shape_terms = if shape_prior > 0.0 { shape_len } else { 0 };
    let residual_len = 3 * targets.len() + anchor_terms + pose_terms + shape_terms;

    let mut params = DVector::zeros(pose_len + shape_len);
    params.as_mut_slice()[..pose_len].copy_from_slice(model.pose());
    params.as_mut_slice()[pose_len..].copy_from_slice(model.shape());

    let rounds = config.outer_iterations.max(1);
    let mut matches = Vec::new();
    let mut report = FitReport {
        converged: false,
        initial_cost: 0.0,
        final_cost: 0.0,
        solver_iterations: 0,
        outer_rounds: rounds,
        residual_count: residual_len,
    };

    for round in 0..rounds {
        if round == 0 || config.recompute_correspondences {
            matches = nearest_vertex_indices(&model.vertices(), &targets);
        }

        let summary = solver::minimize(
            &mut params,
            |p| {
                model.set_pose(&p.as_slice()[..pose_len]);
                model.set_shape(&p.as_slice()[pose_len..]);
                let verts = model.vertices();
                let mut r = DVector::zeros(residual_len);
                let mut row = 0;
                for (k, &v_idx) in matches.iter().enumerate() {
                    let d = verts[v_idx] - targets[k];
                    r[row] = weights[k] * d.x;
                    r[row + 1] = weights[k] * d.y;
                    r[row + 2] = weights[k] * d.z;
                    row += 3;
                }
                if joint_w > 0.0 {
                    let joints = model.joints();
                    for j in 0..joint_count {
                        let d = joints[j] - anchors[j];
                        r[row] = joint_w * d.x;
                        r[row + 1] = joint_w * d.y;
                        r[row + 2] = joint_w * d.z;
                        row += 3;
                    }
                }
                if pose_prior > 0.0 {
                    for i in 3..pose_len {
                        r[row] = pose_prior * p[i];
                        row += 1;
                    }
                }
                if shape_prior > 0.0 {
                    for s in 0..shape_len {
                        r[row] = shape_prior * p[pose_len + s];
                        row += 1;
                    }
                }
                r
            },
            &config.solver,
        );
        model.set_pose(&params.as_slice()[..pose_len]);
        model.set_shape(&params.as_slice()[pose_len..]);

        debug!(
            "surface round {}: cost {:.3e} -> {:.3e} in {} iterations",
            round, summary.initial_cost, summary.final_cost, summary.iterations
        );
        if round == 0 {
            report.initial_cost = summary.initial_cost;
        }
        report.final_cost = summary.final_cost;
        report.solver_iterations += summary.iterations;
        report.converged |= summary.converged;
    }

    report
}

/// Apply the subsampling cap, returning targets with their sqrt-confidence
/// weights. Order within the original list is preserved.
fn subsample_targets(
    points: &[Point3<f64>],
    confidences: &[f32],
    config: &FitConfig,
) -> (Vec<Point3<f64>>, Vec<f64>) {
    use rand::{rngs::StdRng, SeedableRng};

    let weight = |c: f32| f64::from(c).max(0.0).sqrt();
    if config.max_surface_points == 0 || points.len() <= config.max_surface_points {
        return (
            points.to_vec(),
            confidences.iter().map(|&c| weight(c)).collect(),
        );
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut picked = sample_indices(&mut rng, points.len(), config.max_surface_points);
    picked.sort_unstable();
    (
        picked.iter().map(|&i| points[i]).collect(),
        picked.iter().map(|&i| weight(confidences[i])).collect(),
    )
}

/// Draw `k` distinct indices from `0..n` by partial Fisher-Yates.
fn sample_indices(rng: &mut impl rand::Rng, n: usize, k: usize) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..n).collect();
    for i in 0..k {
        let j = rng.gen_range(i..n);
        idx.swap(i, j);
    }
    idx.truncate(k);
    idx
}
