//! Chi-square statistic with an analytically-optimal flux scale.
//!
//! Observed photometry mixes two kinds of entries:
//!
//! - **colors** (flux ratios), which are independent of the stellar
//!   radius/distance normalization
//! - **absolute fluxes**, which all share one unknown multiplicative scale
//!
//! Rather than fitting the scale as an extra dimension, it has a closed
//! form: the error-weighted average of the per-band ratio `meas/syn` over
//! the absolute-flux entries,
//!
//! ```text
//! w_i = meas_i / e_meas_i
//! r_i = meas_i / syn_i
//! scale = Σ(w_i · r_i) / Σ w_i
//! e_scale = sqrt(Σ w_i (r_i − scale)² / Σ w_i)
//! ```
//!
//! With zero absolute-flux entries the scale degenerates to 0 (colors are
//! scale-invariant, so this is a valid fit, not an error).
//!
//! NaN synthetic values (out-of-grid points) flow through to a NaN
//! chi-square; the evaluator never errors and never mutates its inputs.

use nalgebra::DMatrix;

use crate::domain::MeasurementSet;

/// Statistic outputs for one candidate point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Chi2Fit {
    pub chisq: f64,
    pub scale: f64,
    pub e_scale: f64,
}

/// Statistic outputs for a batch of candidate points, column-aligned with
/// the synthetic input matrix.
#[derive(Debug, Clone, Default)]
pub struct Chi2Batch {
    pub chisq: Vec<f64>,
    pub scale: Vec<f64>,
    pub e_scale: Vec<f64>,
}

/// A goodness-of-fit statistic over a measurement set.
///
/// `evaluate` scores a single candidate (`syn` has one entry per
/// measurement); `evaluate_batch` scores M candidates at once (`syn` is
/// N×M, one column per candidate) with column-wise identical semantics.
/// The default batch implementation delegates to `evaluate` per column;
/// [`Chi2`] overrides it with a vectorized path.
pub trait Statistic: Sync {
    fn evaluate(&self, meas: &MeasurementSet, syn: &[f64]) -> Chi2Fit;

    fn evaluate_batch(&self, meas: &MeasurementSet, syn: &DMatrix<f64>) -> Chi2Batch {
        let mut out = Chi2Batch::default();
        let mut column = vec![0.0; syn.nrows()];
        for c in 0..syn.ncols() {
            for (i, v) in column.iter_mut().enumerate() {
                *v = syn[(i, c)];
            }
            let fit = self.evaluate(meas, &column);
            out.chisq.push(fit.chisq);
            out.scale.push(fit.scale);
            out.e_scale.push(fit.e_scale);
        }
        out
    }
}

/// Weighted-average flux scale and its spread over the absolute-flux
/// entries of `meas`.
///
/// This is the closed-form nuisance parameter shared by the grid statistic
/// and the minimizer's residual function. Returns `(0, 0)` when every entry
/// is a color.
pub fn flux_scale(meas: &MeasurementSet, syn: &[f64]) -> (f64, f64) {
    let mut w_sum = 0.0;
    let mut wr_sum = 0.0;
    for i in 0..meas.len() {
        if meas.is_color()[i] {
            continue;
        }
        let w = meas.meas()[i] / meas.e_meas()[i];
        let r = meas.meas()[i] / syn[i];
        w_sum += w;
        wr_sum += w * r;
    }
    if w_sum == 0.0 {
        // All entries are colors: the scale is unconstrained and unused.
        return (0.0, 0.0);
    }
    let scale = wr_sum / w_sum;
    let mut wd_sum = 0.0;
    for i in 0..meas.len() {
        if meas.is_color()[i] {
            continue;
        }
        let w = meas.meas()[i] / meas.e_meas()[i];
        let r = meas.meas()[i] / syn[i];
        let d = r - scale;
        wd_sum += w * d * d;
    }
    (scale, (wd_sum / w_sum).sqrt())
}

/// The default chi-square statistic.
pub struct Chi2;

impl Chi2 {
    /// Per-entry chi-square terms for one candidate (the `full_output` view).
    pub fn evaluate_terms(&self, meas: &MeasurementSet, syn: &[f64]) -> Vec<f64> {
        let (scale, _) = flux_scale(meas, syn);
        (0..meas.len())
            .map(|i| {
                let model = if meas.is_color()[i] {
                    syn[i]
                } else {
                    syn[i] * scale
                };
                let d = model - meas.meas()[i];
                d * d / (meas.e_meas()[i] * meas.e_meas()[i])
            })
            .collect()
    }
}

impl Statistic for Chi2 {
    fn evaluate(&self, meas: &MeasurementSet, syn: &[f64]) -> Chi2Fit {
        debug_assert_eq!(meas.len(), syn.len());
        let (scale, e_scale) = flux_scale(meas, syn);
        let chisq = self.evaluate_terms(meas, syn).iter().sum();
        Chi2Fit {
            chisq,
            scale,
            e_scale,
        }
    }

    fn evaluate_batch(&self, meas: &MeasurementSet, syn: &DMatrix<f64>) -> Chi2Batch {
        debug_assert_eq!(meas.len(), syn.nrows());
        let n = syn.nrows();
        let m = syn.ncols();

        // Column-wise weighted-average scales over the absolute-flux rows.
        // Weights depend only on the measurements, so Σw is shared.
        let mut w_sum = 0.0;
        for i in 0..n {
            if !meas.is_color()[i] {
                w_sum += meas.meas()[i] / meas.e_meas()[i];
            }
        }

        let mut scale = vec![0.0; m];
        let mut e_scale = vec![0.0; m];
        if w_sum != 0.0 {
            for c in 0..m {
                let mut wr_sum = 0.0;
                for i in 0..n {
                    if meas.is_color()[i] {
                        continue;
                    }
                    let w = meas.meas()[i] / meas.e_meas()[i];
                    wr_sum += w * meas.meas()[i] / syn[(i, c)];
                }
                scale[c] = wr_sum / w_sum;
            }
            for c in 0..m {
                let mut wd_sum = 0.0;
                for i in 0..n {
                    if meas.is_color()[i] {
                        continue;
                    }
                    let w = meas.meas()[i] / meas.e_meas()[i];
                    let d = meas.meas()[i] / syn[(i, c)] - scale[c];
                    wd_sum += w * d * d;
                }
                e_scale[c] = (wd_sum / w_sum).sqrt();
            }
        }

        let mut chisq = vec![0.0; m];
        for c in 0..m {
            let mut total = 0.0;
            for i in 0..n {
                let model = if meas.is_color()[i] {
                    syn[(i, c)]
                } else {
                    syn[(i, c)] * scale[c]
                };
                let d = model - meas.meas()[i];
                total += d * d / (meas.e_meas()[i] * meas.e_meas()[i]);
            }
            chisq[c] = total;
        }

        Chi2Batch {
            chisq,
            scale,
            e_scale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DefaultClassifier;

    fn measurements(meas: Vec<f64>, e_meas: Vec<f64>, photbands: Vec<&str>) -> MeasurementSet {
        MeasurementSet::new(
            meas,
            e_meas,
            photbands.into_iter().map(String::from).collect(),
            &DefaultClassifier,
        )
        .unwrap()
    }

    #[test]
    fn all_colors_degenerate_to_zero_scale() {
        let ms = measurements(
            vec![0.5, 0.3],
            vec![0.05, 0.03],
            vec!["GENEVA.B-V", "2MASS.J-H"],
        );
        let fit = Chi2.evaluate(&ms, &[0.5, 0.3]);
        assert_eq!(fit.scale, 0.0);
        assert_eq!(fit.e_scale, 0.0);
        assert_eq!(fit.chisq, 0.0);
    }

    #[test]
    fn single_flux_scales_perfectly() {
        // meas=[1.0], e=[0.1], candidates syn=[1.0, 2.0]: the scale absorbs
        // the mismatch exactly, so both columns are a perfect fit.
        let ms = measurements(vec![1.0], vec![0.1], vec!["GENEVA.G"]);
        let syn = DMatrix::from_row_slice(1, 2, &[1.0, 2.0]);
        let batch = Chi2.evaluate_batch(&ms, &syn);
        assert_eq!(batch.scale, vec![1.0, 0.5]);
        assert_eq!(batch.e_scale, vec![0.0, 0.0]);
        assert!(batch.chisq.iter().all(|&c| c.abs() < 1e-24));
    }

    #[test]
    fn batch_matches_repeated_single_evaluation() {
        let ms = measurements(
            vec![2.0, 1.5, 0.4],
            vec![0.2, 0.1, 0.04],
            vec!["GENEVA.G", "GENEVA.V", "GENEVA.B-V"],
        );
        let syn = DMatrix::from_row_slice(
            3,
            3,
            &[
                1.9, 2.5, 3.0, //
                1.4, 1.8, 2.1, //
                0.5, 0.4, 0.3,
            ],
        );
        let batch = Chi2.evaluate_batch(&ms, &syn);
        for c in 0..3 {
            let column: Vec<f64> = (0..3).map(|i| syn[(i, c)]).collect();
            let single = Chi2.evaluate(&ms, &column);
            assert!((batch.chisq[c] - single.chisq).abs() < 1e-12);
            assert!((batch.scale[c] - single.scale).abs() < 1e-12);
            assert!((batch.e_scale[c] - single.e_scale).abs() < 1e-12);
        }
    }

    #[test]
    fn default_batch_path_agrees_with_vectorized_path() {
        // A statistic relying on the trait's per-column default must agree
        // with Chi2's vectorized override.
        struct PlainChi2;
        impl Statistic for PlainChi2 {
            fn evaluate(&self, meas: &MeasurementSet, syn: &[f64]) -> Chi2Fit {
                Chi2.evaluate(meas, syn)
            }
        }
        let ms = measurements(
            vec![1.0, 0.5],
            vec![0.1, 0.05],
            vec!["GENEVA.G", "GENEVA.B-V"],
        );
        let syn = DMatrix::from_row_slice(2, 2, &[1.1, 0.9, 0.45, 0.55]);
        let a = Chi2.evaluate_batch(&ms, &syn);
        let b = PlainChi2.evaluate_batch(&ms, &syn);
        assert_eq!(a.chisq, b.chisq);
        assert_eq!(a.scale, b.scale);
        assert_eq!(a.e_scale, b.e_scale);
    }

    #[test]
    fn nan_synthetic_flux_propagates_to_nan_chisq() {
        let ms = measurements(vec![1.0, 0.5], vec![0.1, 0.05], vec!["GENEVA.G", "GENEVA.V"]);
        let fit = Chi2.evaluate(&ms, &[f64::NAN, 0.5]);
        assert!(fit.chisq.is_nan());
    }

    #[test]
    fn per_entry_terms_sum_to_total() {
        let ms = measurements(
            vec![2.0, 1.5, 0.4],
            vec![0.2, 0.1, 0.04],
            vec!["GENEVA.G", "GENEVA.V", "GENEVA.B-V"],
        );
        let syn = [1.9, 1.4, 0.5];
        let terms = Chi2.evaluate_terms(&ms, &syn);
        let fit = Chi2.evaluate(&ms, &syn);
        assert_eq!(terms.len(), 3);
        assert!((terms.iter().sum::<f64>() - fit.chisq).abs() < 1e-12);
    }
}
