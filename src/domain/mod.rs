//! Domain types used throughout the fitting pipeline.
//!
//! This module defines:
//!
//! - validated observation inputs (`MeasurementSet`)
//! - typed parameter-space configuration (`ParamRange`, `ComponentRanges`,
//!   `GridSpec`)
//! - columnar evaluation batches (`SampleBatch`, `ParamPoint`)
//! - fit outputs (`GridSearchResult`, `ParameterSet`, `MinimizeOutcome`)

pub mod types;

pub use types::*;
