//! Grid search driver.
//!
//! Walks every point of a [`SampleBatch`], obtains synthetic photometry from
//! the injected [`ModelEvaluator`] and scores it with the injected
//! [`Statistic`]. Two execution paths:
//!
//! - **sequential**: in batch order, ticking the progress reporter per point
//! - **parallel**: fixed-size chunks dispatched to rayon workers; each chunk
//!   carries its start index and the merge writes rows back by that index
//!
//! The ordering guarantee is the load-bearing property here: output row `i`
//! always describes input point `i`, never "whichever point finished i-th".
//! Out-of-grid points surface as NaN rows rather than errors; the caller
//! filters them afterwards.

use rayon::prelude::*;
use tracing::info;

use crate::domain::{GridSearchResult, MeasurementSet, SampleBatch};
use crate::model::{ModelEvaluator, ProgressReporter};
use crate::stats::Statistic;

/// Default number of points per parallel chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 256;

/// How the driver executes the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    /// One point at a time, in order, with progress reporting.
    Sequential,
    /// Chunks of the given size dispatched to the rayon pool. Progress
    /// reporting is suppressed (completion order is meaningless).
    Parallel { chunk_size: usize },
}

impl Default for Execution {
    fn default() -> Self {
        Execution::Parallel {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Score of a single evaluation point.
#[derive(Debug, Clone, Copy)]
struct PointScore {
    chisq: f64,
    scale: f64,
    e_scale: f64,
    lumi: f64,
}

/// Run a grid search over `batch`.
pub fn grid_search(
    meas: &MeasurementSet,
    batch: &SampleBatch,
    model: &impl ModelEvaluator,
    stat: &impl Statistic,
    execution: Execution,
    progress: &mut impl ProgressReporter,
) -> GridSearchResult {
    let n = batch.len();
    info!(n_points = n, ?execution, "Starting grid search");

    let result = match execution {
        Execution::Sequential => {
            let mut result = GridSearchResult::with_len(n);
            for i in 0..n {
                let score = score_point(meas, batch, model, stat, i);
                write_row(&mut result, i, score);
                progress.update(1);
            }
            result
        }
        Execution::Parallel { chunk_size } => {
            let chunk_size = chunk_size.max(1);
            let starts: Vec<usize> = (0..n).step_by(chunk_size).collect();
            let chunks: Vec<(usize, Vec<PointScore>)> = starts
                .par_iter()
                .map(|&start| {
                    let end = (start + chunk_size).min(n);
                    let rows = (start..end)
                        .map(|i| score_point(meas, batch, model, stat, i))
                        .collect();
                    (start, rows)
                })
                .collect();
            merge_chunks(n, chunks)
        }
    };

    info!(
        n_points = n,
        best = ?result.best_index(),
        "Grid search finished"
    );
    result
}

fn score_point(
    meas: &MeasurementSet,
    batch: &SampleBatch,
    model: &impl ModelEvaluator,
    stat: &impl Statistic,
    i: usize,
) -> PointScore {
    let point = batch.point(i);
    let (syn, lumi) = model.evaluate(&point, meas.photbands());
    let fit = stat.evaluate(meas, &syn);
    PointScore {
        chisq: fit.chisq,
        scale: fit.scale,
        e_scale: fit.e_scale,
        lumi,
    }
}

fn write_row(result: &mut GridSearchResult, i: usize, score: PointScore) {
    result.chisq[i] = score.chisq;
    result.scale[i] = score.scale;
    result.e_scale[i] = score.e_scale;
    result.lumis[i] = score.lumi;
}

/// Reattach chunk results to their original positions.
///
/// Chunks may arrive in any completion order; each carries the index its
/// first row belongs to, which is all that is needed to reconstruct the
/// batch-aligned output.
fn merge_chunks(n: usize, chunks: Vec<(usize, Vec<PointScore>)>) -> GridSearchResult {
    let mut result = GridSearchResult::with_len(n);
    for (start, rows) in chunks {
        for (offset, score) in rows.into_iter().enumerate() {
            write_row(&mut result, start + offset, score);
        }
    }
    result
}
