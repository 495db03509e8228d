//! Goodness-of-fit statistics.
//!
//! The chi-square statistic with its closed-form flux-scale nuisance
//! parameter lives here. Both the grid search driver and the minimizer
//! consume it through the [`Statistic`] trait so alternative statistics can
//! be plugged in without touching the orchestration code.

pub mod chi2;

pub use chi2::*;
