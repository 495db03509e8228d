//! Levenberg–Marquardt least squares.
//!
//! Minimizes `Σ r_i(x)²` for a user-supplied residual function with:
//!
//! - forward-difference Jacobians, relative step `sqrt(epsfcn)` (the
//!   classic lmdif convention; `epsfcn` defaults to 1e-3)
//! - box bounds enforced by clamping trial points
//! - adaptive damping: accepted steps lower λ, rejected steps raise it
//! - standard errors from the scaled covariance `(JᵀJ)⁻¹ · s²` at the
//!   solution, `s² = chisq / (m − p)`
//!
//! Non-finite trial costs (the residual function wandering off the model
//! grid) are treated as rejected steps, so the iteration backs off instead
//! of aborting.

use nalgebra::{DMatrix, DVector};

use crate::error::FitError;
use crate::math::{solve_damped_step, solve_least_squares};

/// Tuning knobs for the Levenberg–Marquardt iteration.
#[derive(Debug, Clone)]
pub struct LeastSquaresOptions {
    /// Relative squared step for the finite-difference Jacobian.
    pub epsfcn: f64,
    /// Relative chi-square improvement below which we declare convergence.
    pub ftol: f64,
    /// Step-norm tolerance relative to the parameter norm.
    pub xtol: f64,
    /// Cap on residual-function evaluations.
    pub max_nfev: usize,
}

impl Default for LeastSquaresOptions {
    fn default() -> Self {
        Self {
            epsfcn: 1e-3,
            ftol: 1e-10,
            xtol: 1e-10,
            max_nfev: 2000,
        }
    }
}

/// Result of one least-squares run.
#[derive(Debug, Clone)]
pub struct LeastSquaresFit {
    pub values: Vec<f64>,
    /// Per-parameter standard error; `None` when the covariance is not
    /// estimable (fewer residuals than parameters, singular Jacobian).
    pub errors: Vec<Option<f64>>,
    pub chisq: f64,
    pub nfev: usize,
    pub converged: bool,
}

/// Minimize `Σ residual(x)²` starting from `x0`, keeping `x` inside
/// `bounds` (one `(min, max)` pair per parameter; infinities allowed).
pub fn least_squares<F>(
    mut residual: F,
    x0: &[f64],
    bounds: &[(f64, f64)],
    opts: &LeastSquaresOptions,
) -> Result<LeastSquaresFit, FitError>
where
    F: FnMut(&[f64]) -> Vec<f64>,
{
    let p = x0.len();
    if p == 0 {
        return Err(FitError::config("least_squares needs at least one parameter."));
    }
    if bounds.len() != p {
        return Err(FitError::config(format!(
            "Expected {p} bound pairs, got {}.",
            bounds.len()
        )));
    }

    let mut x: Vec<f64> = x0
        .iter()
        .zip(bounds.iter())
        .map(|(&v, &(lo, hi))| v.clamp(lo, hi))
        .collect();

    let mut nfev = 0usize;
    let mut r = DVector::from_vec(residual(&x));
    nfev += 1;
    let m = r.len();
    let mut cost = r.norm_squared();

    let mut lambda = 1e-3;
    let mut converged = false;
    let rel_step = opts.epsfcn.max(f64::EPSILON).sqrt();

    'outer: while nfev < opts.max_nfev {
        let jac = match jacobian(&mut residual, &x, &r, bounds, rel_step, &mut nfev) {
            Some(j) => j,
            None => break,
        };

        // Try steps with increasing damping until one improves the cost.
        let mut improved = false;
        for _ in 0..16 {
            let neg_r = -&r;
            let Some(delta) = solve_damped_step(&jac, &neg_r, lambda) else {
                lambda = (lambda * 10.0).min(1e12);
                continue;
            };

            let x_try: Vec<f64> = x
                .iter()
                .zip(delta.iter())
                .zip(bounds.iter())
                .map(|((&xi, &d), &(lo, hi))| (xi + d).clamp(lo, hi))
                .collect();
            let r_try = DVector::from_vec(residual(&x_try));
            nfev += 1;
            let cost_try = r_try.norm_squared();

            if cost_try.is_finite() && cost_try < cost {
                let step_norm = delta.norm();
                let x_norm = x.iter().map(|v| v * v).sum::<f64>().sqrt();
                let rel_drop = (cost - cost_try) / cost.max(f64::MIN_POSITIVE);

                x = x_try;
                r = r_try;
                cost = cost_try;
                lambda = (lambda * 0.1).max(1e-12);
                improved = true;

                if rel_drop <= opts.ftol || step_norm <= opts.xtol * (x_norm + opts.xtol) {
                    converged = true;
                    break 'outer;
                }
                break;
            }
            lambda = (lambda * 10.0).min(1e12);
            if nfev >= opts.max_nfev {
                break 'outer;
            }
        }

        if !improved {
            // Damping maxed out without progress: a (possibly local)
            // minimum within the step resolution.
            converged = cost.is_finite();
            break;
        }
    }

    let errors = standard_errors(&mut residual, &x, &r, bounds, rel_step, &mut nfev, cost, m);
    Ok(LeastSquaresFit {
        values: x,
        errors,
        chisq: cost,
        nfev,
        converged,
    })
}

/// Forward-difference Jacobian; steps flip direction at the upper bound so
/// trial points stay feasible.
fn jacobian<F>(
    residual: &mut F,
    x: &[f64],
    r0: &DVector<f64>,
    bounds: &[(f64, f64)],
    rel_step: f64,
    nfev: &mut usize,
) -> Option<DMatrix<f64>>
where
    F: FnMut(&[f64]) -> Vec<f64>,
{
    let m = r0.len();
    let p = x.len();
    let mut jac = DMatrix::<f64>::zeros(m, p);
    let mut x_step = x.to_vec();
    for j in 0..p {
        let (lo, hi) = bounds[j];
        let mut h = rel_step * x[j].abs().max(1e-8);
        if x[j] + h > hi {
            h = -h;
        }
        if x[j] + h < lo {
            // Interval narrower than the step; the column stays zero and
            // the damping keeps the system solvable.
            continue;
        }
        x_step[j] = x[j] + h;
        let r_step = residual(&x_step);
        *nfev += 1;
        x_step[j] = x[j];
        if r_step.len() != m {
            return None;
        }
        for i in 0..m {
            jac[(i, j)] = (r_step[i] - r0[i]) / h;
        }
    }
    jac.iter().all(|v| v.is_finite()).then_some(jac)
}

fn standard_errors<F>(
    residual: &mut F,
    x: &[f64],
    r: &DVector<f64>,
    bounds: &[(f64, f64)],
    rel_step: f64,
    nfev: &mut usize,
    cost: f64,
    m: usize,
) -> Vec<Option<f64>>
where
    F: FnMut(&[f64]) -> Vec<f64>,
{
    let p = x.len();
    if m <= p || !cost.is_finite() {
        return vec![None; p];
    }
    let Some(jac) = jacobian(residual, x, r, bounds, rel_step, nfev) else {
        return vec![None; p];
    };
    let jtj = jac.transpose() * &jac;
    let s2 = cost / (m - p) as f64;

    // Column-wise solve of JᵀJ · c = e_j gives the covariance diagonal
    // without forming an explicit inverse.
    let mut errors = Vec::with_capacity(p);
    for j in 0..p {
        let mut e = DVector::<f64>::zeros(p);
        e[j] = 1.0;
        match solve_least_squares(&jtj, &e) {
            Some(c) if c[j].is_finite() && c[j] >= 0.0 => {
                errors.push(Some((c[j] * s2).sqrt()));
            }
            _ => errors.push(None),
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_linear_model_parameters() {
        // y = 2 + 3x, exact data: residuals vanish at (2, 3).
        let xs: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 2.0 + 3.0 * x).collect();
        let residual = |p: &[f64]| -> Vec<f64> {
            xs.iter()
                .zip(ys.iter())
                .map(|(&x, &y)| y - (p[0] + p[1] * x))
                .collect()
        };
        let fit = least_squares(
            residual,
            &[0.0, 0.0],
            &[(f64::NEG_INFINITY, f64::INFINITY); 2],
            &LeastSquaresOptions::default(),
        )
        .unwrap();
        assert!(fit.converged);
        assert!((fit.values[0] - 2.0).abs() < 1e-5, "a = {}", fit.values[0]);
        assert!((fit.values[1] - 3.0).abs() < 1e-5, "b = {}", fit.values[1]);
        assert!(fit.chisq < 1e-8);
    }

    #[test]
    fn respects_box_bounds() {
        // Unconstrained optimum at p = 5; bound caps it at 4.
        let residual = |p: &[f64]| vec![p[0] - 5.0];
        let fit = least_squares(
            residual,
            &[0.0],
            &[(0.0, 4.0)],
            &LeastSquaresOptions::default(),
        )
        .unwrap();
        assert!(fit.values[0] <= 4.0 + 1e-12);
        assert!((fit.values[0] - 4.0).abs() < 1e-6);
    }

    #[test]
    fn reports_errors_on_noisy_fit() {
        // Slightly perturbed line: errors must be finite and positive.
        let xs: Vec<f64> = (0..20).map(|i| i as f64 / 2.0).collect();
        let noise = [0.03, -0.02, 0.01, -0.04, 0.02];
        let ys: Vec<f64> = xs
            .iter()
            .enumerate()
            .map(|(i, &x)| 1.0 + 0.5 * x + noise[i % noise.len()])
            .collect();
        let residual = |p: &[f64]| -> Vec<f64> {
            xs.iter()
                .zip(ys.iter())
                .map(|(&x, &y)| y - (p[0] + p[1] * x))
                .collect()
        };
        let fit = least_squares(
            residual,
            &[0.0, 0.0],
            &[(f64::NEG_INFINITY, f64::INFINITY); 2],
            &LeastSquaresOptions::default(),
        )
        .unwrap();
        for err in &fit.errors {
            let e = err.expect("error estimable");
            assert!(e.is_finite() && e > 0.0);
        }
    }

    #[test]
    fn nonlinear_exponential_decay() {
        let ts: Vec<f64> = (0..15).map(|i| i as f64 * 0.2).collect();
        let ys: Vec<f64> = ts.iter().map(|t| 4.0 * (-1.5 * t).exp()).collect();
        let residual = |p: &[f64]| -> Vec<f64> {
            ts.iter()
                .zip(ys.iter())
                .map(|(&t, &y)| y - p[0] * (-p[1] * t).exp())
                .collect()
        };
        let fit = least_squares(
            residual,
            &[1.0, 1.0],
            &[(0.0, 100.0), (0.0, 100.0)],
            &LeastSquaresOptions::default(),
        )
        .unwrap();
        assert!((fit.values[0] - 4.0).abs() < 1e-3, "amp = {}", fit.values[0]);
        assert!((fit.values[1] - 1.5).abs() < 1e-3, "rate = {}", fit.values[1]);
    }
}
