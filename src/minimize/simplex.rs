//! Direct-search refinement (Nelder–Mead and Powell).
//!
//! A lighter alternative to the least-squares adapter: no parameter
//! bookkeeping, no Jacobians, just the scalar chi-square over the four
//! atmospheric parameters `[teff, logg, ebv, z]` of a single component
//! (unit radius; the flux scale still absorbs the normalization).
//!
//! Out-of-grid excursions cost `+inf` inside the search, which steers both
//! algorithms back toward the grid without special casing. If the final
//! point itself is off the grid, the result carries a dedicated warning
//! flag instead of an error.

use std::cell::Cell;

use tracing::{debug, warn};

use crate::domain::{ComponentParams, MeasurementSet, ParamPoint};
use crate::error::FitError;
use crate::model::ModelEvaluator;
use crate::stats::{Chi2, Statistic};

/// Which direct-search algorithm to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectMethod {
    NelderMead,
    Powell,
}

impl DirectMethod {
    /// Parse a method name. Only the two supported names are accepted.
    pub fn parse(name: &str) -> Result<Self, FitError> {
        match name {
            "fmin" => Ok(DirectMethod::NelderMead),
            "fmin_powell" => Ok(DirectMethod::Powell),
            other => Err(FitError::config(format!(
                "Unknown minimization method '{other}' (expected 'fmin' or 'fmin_powell')."
            ))),
        }
    }
}

/// Termination status of a direct search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarnFlag {
    Converged,
    MaxEvals,
    MaxIter,
    /// The final point has no synthetic photometry (off the model grid).
    OutOfGrid,
}

impl WarnFlag {
    pub fn code(self) -> u8 {
        match self {
            WarnFlag::Converged => 0,
            WarnFlag::MaxEvals => 1,
            WarnFlag::MaxIter => 2,
            WarnFlag::OutOfGrid => 3,
        }
    }
}

/// Tolerances and iteration caps. The evaluation cap leaves room for
/// Powell, whose line searches spend tens of evaluations per direction.
#[derive(Debug, Clone)]
pub struct DirectOptions {
    pub xtol: f64,
    pub ftol: f64,
    pub max_iter: usize,
    pub max_fev: usize,
}

impl Default for DirectOptions {
    fn default() -> Self {
        Self {
            xtol: 1e-4,
            ftol: 1e-4,
            max_iter: 800,
            max_fev: 8000,
        }
    }
}

/// Result of a direct search.
#[derive(Debug, Clone)]
pub struct DirectFit {
    /// Final `[teff, logg, ebv, z]`.
    pub values: [f64; 4],
    pub chisq: f64,
    pub scale: f64,
    pub e_scale: f64,
    pub lumi: f64,
    pub n_iter: usize,
    pub nfev: usize,
    pub warnflag: WarnFlag,
}

impl DirectFit {
    pub fn point(&self) -> ParamPoint {
        point_at(&self.values)
    }
}

fn point_at(x: &[f64; 4]) -> ParamPoint {
    ParamPoint {
        components: vec![ComponentParams {
            teff: x[0],
            logg: x[1],
            ebv: x[2],
            z: x[3],
            rad: 1.0,
        }],
    }
}

/// Minimize the chi-square of `model` against `meas` from `start`, using
/// the algorithm named by `method` (`"fmin"` or `"fmin_powell"`).
pub fn direct_minimize(
    meas: &MeasurementSet,
    model: &impl ModelEvaluator,
    start: [f64; 4],
    method: &str,
    opts: &DirectOptions,
) -> Result<DirectFit, FitError> {
    let method = DirectMethod::parse(method)?;
    let nfev = Cell::new(0usize);
    let mut objective = |x: &[f64; 4]| -> f64 {
        nfev.set(nfev.get() + 1);
        let (syn, _) = model.evaluate(&point_at(x), meas.photbands());
        let chisq = Chi2.evaluate(meas, &syn).chisq;
        if chisq.is_finite() {
            chisq
        } else {
            f64::INFINITY
        }
    };

    let (x, n_iter, mut warnflag) = match method {
        DirectMethod::NelderMead => nelder_mead(&mut objective, &nfev, start, opts),
        DirectMethod::Powell => powell(&mut objective, &nfev, start, opts),
    };
    let nfev = nfev.get();

    // Score the final point with the real statistic; a NaN here means the
    // search ended outside the grid, which outranks the other flags.
    let (syn, lumi) = model.evaluate(&point_at(&x), meas.photbands());
    let fit = Chi2.evaluate(meas, &syn);
    if syn.iter().any(|v| v.is_nan()) {
        warn!(teff = x[0], logg = x[1], "Direct search ended off the model grid");
        warnflag = WarnFlag::OutOfGrid;
    }
    debug!(
        chisq = fit.chisq,
        n_iter,
        nfev,
        flag = warnflag.code(),
        "Direct search finished"
    );
    Ok(DirectFit {
        values: x,
        chisq: fit.chisq,
        scale: fit.scale,
        e_scale: fit.e_scale,
        lumi,
        n_iter,
        nfev,
        warnflag,
    })
}

/// Downhill simplex with the standard reflection/expansion/contraction/
/// shrink moves. Converged when the vertices collapse within `xtol` and
/// their values within `ftol`.
fn nelder_mead(
    objective: &mut impl FnMut(&[f64; 4]) -> f64,
    nfev: &Cell<usize>,
    start: [f64; 4],
    opts: &DirectOptions,
) -> ([f64; 4], usize, WarnFlag) {
    const N: usize = 4;

    let mut simplex: Vec<[f64; 4]> = Vec::with_capacity(N + 1);
    simplex.push(start);
    for j in 0..N {
        let mut v = start;
        v[j] = if v[j] != 0.0 { v[j] * 1.05 } else { 2.5e-4 };
        simplex.push(v);
    }
    let mut values: Vec<f64> = simplex.iter().map(|v| objective(v)).collect();

    let mut flag = WarnFlag::MaxIter;
    let mut iter = 0usize;
    while iter < opts.max_iter {
        iter += 1;

        // Order best to worst.
        let mut order: Vec<usize> = (0..=N).collect();
        order.sort_by(|&a, &b| {
            values[a]
                .partial_cmp(&values[b])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let simplex_sorted: Vec<[f64; 4]> = order.iter().map(|&i| simplex[i]).collect();
        let values_sorted: Vec<f64> = order.iter().map(|&i| values[i]).collect();
        simplex = simplex_sorted;
        values = values_sorted;

        let x_spread = simplex[1..]
            .iter()
            .flat_map(|v| v.iter().zip(simplex[0].iter()).map(|(a, b)| (a - b).abs()))
            .fold(0.0f64, f64::max);
        let f_spread = values[1..]
            .iter()
            .map(|f| (f - values[0]).abs())
            .fold(0.0f64, f64::max);
        if x_spread <= opts.xtol && f_spread <= opts.ftol {
            flag = WarnFlag::Converged;
            break;
        }

        // Centroid of all but the worst vertex.
        let mut centroid = [0.0; 4];
        for v in &simplex[..N] {
            for (c, vi) in centroid.iter_mut().zip(v.iter()) {
                *c += vi / N as f64;
            }
        }
        let at = |alpha: f64| -> [f64; 4] {
            let mut x = [0.0; 4];
            for j in 0..N {
                x[j] = centroid[j] + alpha * (centroid[j] - simplex[N][j]);
            }
            x
        };

        let x_refl = at(1.0);
        let f_refl = objective(&x_refl);
        if f_refl < values[0] {
            let x_exp = at(2.0);
            let f_exp = objective(&x_exp);
            if f_exp < f_refl {
                simplex[N] = x_exp;
                values[N] = f_exp;
            } else {
                simplex[N] = x_refl;
                values[N] = f_refl;
            }
        } else if f_refl < values[N - 1] {
            simplex[N] = x_refl;
            values[N] = f_refl;
        } else {
            let x_con = at(-0.5);
            let f_con = objective(&x_con);
            if f_con < values[N] {
                simplex[N] = x_con;
                values[N] = f_con;
            } else {
                // Shrink toward the best vertex.
                for i in 1..=N {
                    for j in 0..N {
                        simplex[i][j] = simplex[0][j] + 0.5 * (simplex[i][j] - simplex[0][j]);
                    }
                    values[i] = objective(&simplex[i]);
                }
            }
        }

        if nfev.get() >= opts.max_fev {
            flag = WarnFlag::MaxEvals;
            break;
        }
    }

    let best = values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0);
    (simplex[best], iter, flag)
}

/// Powell's conjugate-direction method with a golden-section line search.
fn powell(
    objective: &mut impl FnMut(&[f64; 4]) -> f64,
    nfev: &Cell<usize>,
    start: [f64; 4],
    opts: &DirectOptions,
) -> ([f64; 4], usize, WarnFlag) {
    const N: usize = 4;
    let mut dirs: [[f64; 4]; 4] = [[0.0; 4]; 4];
    for (j, d) in dirs.iter_mut().enumerate() {
        d[j] = 1.0;
    }

    let mut x = start;
    let mut fx = objective(&x);
    let mut flag = WarnFlag::MaxIter;
    let mut iter = 0usize;

    while iter < opts.max_iter {
        iter += 1;
        let x_start = x;
        let f_start = fx;

        let mut biggest_drop = 0.0;
        let mut ibig = 0;
        for (i, d) in dirs.iter().enumerate() {
            let f_before = fx;
            let (x_new, f_new) = line_min(objective, &x, d, opts.xtol);
            x = x_new;
            fx = f_new;
            if f_before - f_new > biggest_drop {
                biggest_drop = f_before - f_new;
                ibig = i;
            }
        }

        if 2.0 * (f_start - fx) <= opts.ftol * (f_start.abs() + fx.abs()) + 1e-20 {
            flag = WarnFlag::Converged;
            break;
        }
        if nfev.get() >= opts.max_fev {
            flag = WarnFlag::MaxEvals;
            break;
        }

        // Powell's direction replacement: try the net displacement of this
        // sweep as a new search direction.
        let mut ext = [0.0; 4];
        for j in 0..N {
            ext[j] = x[j] - x_start[j];
        }
        let mut x_ext = [0.0; 4];
        for j in 0..N {
            x_ext[j] = x[j] + ext[j];
        }
        let f_ext = objective(&x_ext);
        if f_ext < f_start {
            let a = f_start - fx - biggest_drop;
            let b = f_start - f_ext;
            let t = 2.0 * (f_start - 2.0 * fx + f_ext) * a * a - biggest_drop * b * b;
            if t < 0.0 {
                let (x_new, f_new) = line_min(objective, &x, &ext, opts.xtol);
                x = x_new;
                fx = f_new;
                dirs[ibig] = dirs[N - 1];
                dirs[N - 1] = ext;
            }
        }
    }

    (x, iter, flag)
}

/// Minimize `objective` along `x + alpha·d`.
///
/// The minimum is first bracketed by golden-ratio expansion from a unit
/// step (both signs tried), then pinned down by golden-section reduction.
fn line_min(
    objective: &mut impl FnMut(&[f64; 4]) -> f64,
    x: &[f64; 4],
    d: &[f64; 4],
    xtol: f64,
) -> ([f64; 4], f64) {
    const GOLD: f64 = 1.618_033_988_749_895;

    let mut phi = |alpha: f64| -> ([f64; 4], f64) {
        let mut p = *x;
        for j in 0..4 {
            p[j] += alpha * d[j];
        }
        let f = objective(&p);
        (p, f)
    };

    let (_, f0) = phi(0.0);
    let mut step = 1.0;
    let (_, mut f1) = phi(step);
    if f1 > f0 {
        // Try the other direction before settling for a downhill bracket.
        let (_, f_neg) = phi(-step);
        if f_neg < f0 {
            step = -step;
            f1 = f_neg;
        } else {
            // Minimum already bracketed within one step either way.
            return golden_section(&mut phi, -step.abs(), step.abs(), xtol);
        }
    }

    // Expand until the function turns back up.
    let mut a = 0.0;
    let mut b = step;
    let mut fb = f1;
    for _ in 0..50 {
        let c = b * GOLD;
        let (_, fc) = phi(c);
        if fc >= fb {
            return golden_section(&mut phi, a, c, xtol);
        }
        a = b;
        b = c;
        fb = fc;
    }
    // Never turned up within the expansion budget; take the furthest point.
    let (p, f) = phi(b);
    (p, f)
}

fn golden_section(
    phi: &mut impl FnMut(f64) -> ([f64; 4], f64),
    mut lo: f64,
    mut hi: f64,
    xtol: f64,
) -> ([f64; 4], f64) {
    const INVPHI: f64 = 0.618_033_988_749_895;

    let mut m1 = hi - INVPHI * (hi - lo);
    let mut m2 = lo + INVPHI * (hi - lo);
    let (_, mut f1) = phi(m1);
    let (_, mut f2) = phi(m2);
    for _ in 0..60 {
        if (hi - lo).abs() <= xtol {
            break;
        }
        if f1 <= f2 {
            hi = m2;
            m2 = m1;
            f2 = f1;
            m1 = hi - INVPHI * (hi - lo);
            f1 = phi(m1).1;
        } else {
            lo = m1;
            m1 = m2;
            f1 = f2;
            m2 = lo + INVPHI * (hi - lo);
            f2 = phi(m2).1;
        }
    }
    let alpha = 0.5 * (lo + hi);
    phi(alpha)
}
