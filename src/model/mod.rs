//! Collaborator interfaces of the fitting core.
//!
//! The core does not know how synthetic photometry is interpolated, how the
//! model grid is stored, or how passbands are catalogued. It consumes those
//! capabilities through the traits defined here:
//!
//! - [`ModelEvaluator`]: parameters → synthetic fluxes + absolute luminosity
//! - [`GridTopology`]: the native (irregular) grid node layout
//! - [`PassbandClassifier`]: color vs. absolute-flux passbands
//! - [`ProgressReporter`]: sequential-search progress ticks
//!
//! The contracts (notably the NaN semantics of out-of-grid evaluations) are
//! fixed here, not inferred from whichever implementation is plugged in.

pub mod topology;
pub mod traits;

pub use topology::*;
pub use traits::*;
