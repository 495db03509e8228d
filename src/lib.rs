//! `sed-fit` library crate.
//!
//! Grid-based fitting of stellar spectral energy distributions: score
//! candidate atmosphere parameters against observed photometry with a
//! chi-square whose flux scale has a closed form, sample candidates from
//! the irregular model grid (native nodes or stratified random draws),
//! sweep them sequentially or in parallel, and refine the survivors with a
//! local minimizer.
//!
//! The model grid itself is injected through the [`model::ModelEvaluator`]
//! and [`model::GridTopology`] traits, so the engine stays independent of
//! any particular atmosphere library or interpolation scheme.

pub mod constants;
pub mod domain;
pub mod error;
pub mod grid;
pub mod math;
pub mod minimize;
pub mod model;
pub mod search;
pub mod stats;
