//! Local minimization of the photometric fit.
//!
//! Three layers:
//!
//! - `leastsq`: a Levenberg–Marquardt engine over nalgebra with
//!   finite-difference Jacobians and box bounds
//! - `adapter`: the named-parameter entry point (single or kicked
//!   multi-start) with profile-likelihood confidence intervals
//! - `simplex`: unconstrained direct search (Nelder–Mead / Powell) on the
//!   chi-square objective, for quick refinement without parameter
//!   bookkeeping

pub mod adapter;
pub mod leastsq;
pub mod simplex;

pub use adapter::*;
pub use leastsq::*;
pub use simplex::*;
