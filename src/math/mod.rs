//! Numerical utilities: least-squares step solvers.

pub mod lstsq;

pub use lstsq::*;
