//! Grid search orchestration.
//!
//! Responsibilities:
//!
//! - walk an evaluation batch in order, obtaining synthetic photometry from
//!   the model evaluator and scoring it with the statistic
//! - optionally fan the batch out to rayon workers in fixed-size chunks,
//!   merging results back by original index

pub mod driver;

pub use driver::*;
