//! Least-squares solvers for the minimizer's inner step.
//!
//! The Levenberg–Marquardt iteration repeatedly solves small linear
//! least-squares problems (a Jacobian with a handful of columns against the
//! residual vector, optionally damped). Implementation choices:
//!
//! - SVD-based solve, robust for tall systems and near-collinear columns
//!   (finite-difference Jacobians of photometric models degenerate easily
//!   when a parameter barely moves the fluxes).
//! - A small ladder of tolerances: try strict first, loosen if the solve is
//!   rejected or non-finite.

use nalgebra::{DMatrix, DVector};

/// Solve `min ‖x·β − y‖²` via SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly at
/// any of the attempted tolerances.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }
    None
}

/// Solve the damped (Levenberg–Marquardt) step
/// `min ‖J·δ − r‖² + λ‖D·δ‖²` by stacking `sqrt(λ)·D` under the Jacobian.
///
/// `D` is the diagonal scaling `diag(‖J_col‖)`, which makes the damping
/// scale-invariant across parameters of very different magnitudes (teff in
/// the thousands vs. logg of order one).
pub fn solve_damped_step(
    jacobian: &DMatrix<f64>,
    residuals: &DVector<f64>,
    lambda: f64,
) -> Option<DVector<f64>> {
    let n = jacobian.nrows();
    let p = jacobian.ncols();

    let mut stacked = DMatrix::<f64>::zeros(n + p, p);
    let mut rhs = DVector::<f64>::zeros(n + p);
    stacked.view_mut((0, 0), (n, p)).copy_from(jacobian);
    rhs.rows_mut(0, n).copy_from(residuals);

    let sqrt_lambda = lambda.max(0.0).sqrt();
    for j in 0..p {
        let col_norm = jacobian.column(j).norm();
        // A column that does not move the residuals at all still needs a
        // non-zero damping entry or the system stays singular.
        let d = if col_norm > 0.0 { col_norm } else { 1.0 };
        stacked[(n + j, j)] = sqrt_lambda * d;
    }

    solve_least_squares(&stacked, &rhs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-10);
        assert!((beta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn undamped_step_matches_plain_least_squares() {
        let j = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let r = DVector::from_row_slice(&[2.0, 5.0, 8.0]);
        let plain = solve_least_squares(&j, &r).unwrap();
        let damped = solve_damped_step(&j, &r, 0.0).unwrap();
        assert!((plain - damped).norm() < 1e-10);
    }

    #[test]
    fn heavy_damping_shrinks_the_step() {
        let j = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let r = DVector::from_row_slice(&[2.0, 5.0, 8.0]);
        let small = solve_damped_step(&j, &r, 1e-6).unwrap();
        let large = solve_damped_step(&j, &r, 1e6).unwrap();
        assert!(large.norm() < small.norm());
    }
}
