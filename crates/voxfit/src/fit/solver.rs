//! Damped least-squares solver with finite-difference Jacobians.
//!
//! The fitting stages evaluate residuals through the opaque deformable-model
//! capability, so derivatives are taken numerically: central differences per
//! parameter, normal equations JᵀJ + λI solved by Cholesky, damping adapted
//! multiplicatively on accepted and rejected steps.

use nalgebra::{Cholesky, DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Tuning knobs for [`minimize`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolveOptions {
    /// Iteration budget; each iteration builds one Jacobian.
    pub max_iterations: usize,
    /// Starting Levenberg-Marquardt damping.
    pub initial_lambda: f64,
    /// Damping multiplier after a rejected step.
    pub lambda_up: f64,
    /// Damping multiplier after an accepted step.
    pub lambda_down: f64,
    /// Damping ceiling; exceeding it stalls the solve.
    pub max_lambda: f64,
    /// Relative cost improvement below which the solve stops.
    pub relative_tolerance: f64,
    /// Cost below this value counts as converged outright.
    pub absolute_tolerance: f64,
    /// Base step for central-difference derivatives, scaled per parameter.
    pub derivative_step: f64,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            max_iterations: 40,
            initial_lambda: 1e-3,
            lambda_up: 10.0,
            lambda_down: 0.5,
            max_lambda: 1e10,
            relative_tolerance: 1e-10,
            absolute_tolerance: 1e-16,
            derivative_step: 1e-6,
        }
    }
}

/// Outcome of a [`minimize`] run. Cost is the squared residual norm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveSummary {
    pub initial_cost: f64,
    pub final_cost: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Minimize `||residuals(params)||²` in place.
///
/// `params` always holds the best accepted estimate: rejected trial steps
/// never leak out, so a stalled solve leaves the caller with the best-effort
/// parameters found so far. `converged` is false exactly when the solver
/// failed to reduce the cost at all (and the start was not already at the
/// absolute tolerance).
pub fn minimize<F>(params: &mut DVector<f64>, mut residuals: F, opts: &SolveOptions) -> SolveSummary
where
    F: FnMut(&DVector<f64>) -> DVector<f64>,
{
    let n = params.len();
    let lambda_up = opts.lambda_up.max(1.1);
    let mut r = residuals(params);
    let initial_cost = r.norm_squared();
    let mut cost = initial_cost;
    let mut lambda = opts.initial_lambda;
    let mut iterations = 0usize;

    'outer: for _ in 0..opts.max_iterations {
        if cost <= opts.absolute_tolerance {
            break;
        }
        iterations += 1;

        // Central-difference Jacobian, one column per parameter.
        let m = r.len();
        let mut jac = DMatrix::<f64>::zeros(m, n);
        for k in 0..n {
            let h = opts.derivative_step * (1.0 + params[k].abs());
            let saved = params[k];
            params[k] = saved + h;
            let fwd = residuals(params);
            params[k] = saved - h;
            let bwd = residuals(params);
            params[k] = saved;
            let scale = 1.0 / (2.0 * h);
            for i in 0..m {
                jac[(i, k)] = (fwd[i] - bwd[i]) * scale;
            }
        }

        let jt = jac.transpose();
        let h = &jt * &jac;
        let g = &jt * &r;
        let neg_g = -g;

        // Try increasingly damped steps until one reduces the cost.
        loop {
            let mut damped = h.clone();
            for k in 0..n {
                damped[(k, k)] += lambda;
            }
            let step = match Cholesky::new(damped) {
                Some(ch) => ch.solve(&neg_g),
                None => {
                    lambda *= lambda_up;
                    if lambda > opts.max_lambda {
                        break 'outer;
                    }
                    continue;
                }
            };
            if !step.iter().all(|v| v.is_finite()) {
                lambda *= lambda_up;
                if lambda > opts.max_lambda {
                    break 'outer;
                }
                continue;
            }

            let candidate = &*params + &step;
            let candidate_r = residuals(&candidate);
            let candidate_cost = candidate_r.norm_squared();
            if candidate_cost < cost {
                *params = candidate;
                r = candidate_r;
                let improvement = (cost - candidate_cost) / cost.max(f64::MIN_POSITIVE);
                cost = candidate_cost;
                lambda = (lambda * opts.lambda_down).max(1e-12);
                if improvement < opts.relative_tolerance {
                    break 'outer;
                }
                break;
            }

            lambda *= lambda_up;
            if lambda > opts.max_lambda {
                break 'outer;
            }
        }
    }

    SolveSummary {
        initial_cost,
        final_cost: cost,
        iterations,
        converged: cost <= opts.absolute_tolerance || cost < initial_cost,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn linear_residual_reaches_the_target() {
        let target = DVector::from_vec(vec![2.0, -1.5, 0.25]);
        let mut params = DVector::zeros(3);
        let t = target.clone();
        let summary = minimize(&mut params, |p| p - &t, &SolveOptions::default());
        assert!(summary.converged);
        assert!(summary.final_cost < 1e-15);
        assert_relative_eq!(params, target, epsilon = 1e-7);
    }

    #[test]
    fn exponential_curve_fit_recovers_coefficients() {
        let xs: Vec<f64> = (0..20).map(|i| i as f64 * 0.25).collect();
        let truth = (2.0, -0.7);
        let ys: Vec<f64> = xs.iter().map(|&x| truth.0 * (truth.1 * x).exp()).collect();

        let mut params = DVector::from_vec(vec![1.0, 0.0]);
        let summary = minimize(
            &mut params,
            |p| {
                DVector::from_iterator(
                    xs.len(),
                    xs.iter()
                        .zip(&ys)
                        .map(|(&x, &y)| p[0] * (p[1] * x).exp() - y),
                )
            },
            &SolveOptions::default(),
        );
        assert!(summary.converged);
        assert_relative_eq!(params[0], truth.0, epsilon = 1e-6);
        assert_relative_eq!(params[1], truth.1, epsilon = 1e-6);
    }

    #[test]
    fn zero_iteration_budget_reports_no_reduction() {
        let mut params = DVector::from_vec(vec![5.0]);
        let opts = SolveOptions {
            max_iterations: 0,
            ..SolveOptions::default()
        };
        let summary = minimize(&mut params, |p| p.clone_owned(), &opts);
        assert!(!summary.converged);
        assert_eq!(summary.iterations, 0);
        assert_eq!(summary.initial_cost, summary.final_cost);
        assert_eq!(params[0], 5.0);
    }

    #[test]
    fn redundant_parameter_is_handled_by_damping() {
        // Second parameter never appears in the residual; JᵀJ is singular.
        let mut params = DVector::from_vec(vec![0.0, 4.0]);
        let summary = minimize(
            &mut params,
            |p| DVector::from_vec(vec![p[0] - 3.0]),
            &SolveOptions::default(),
        );
        assert!(summary.converged);
        assert_relative_eq!(params[0], 3.0, epsilon = 1e-6);
        assert_relative_eq!(params[1], 4.0, epsilon = 1e-9);
    }

    #[test]
    fn start_at_minimum_converges_without_iterating() {
        let mut params = DVector::from_vec(vec![1.0, 2.0]);
        let opts = SolveOptions::default();
        let summary = minimize(
            &mut params,
            |p| DVector::from_vec(vec![p[0] - 1.0, p[1] - 2.0]),
            &opts,
        );
        assert!(summary.converged);
        assert_eq!(summary.iterations, 0);
    }
}
