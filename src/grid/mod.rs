//! Parameter-space grid generation.
//!
//! Responsibilities:
//!
//! - decompose the irregular (teff, logg) grid footprint into rectangular
//!   shelves (`strata`)
//! - produce evaluation batches either on the native grid nodes or by
//!   stratified random sampling (`generate`)
//! - assemble multi-component batches with shared reddening/metallicity and
//!   derived or sampled radii

pub mod generate;
pub mod strata;

pub use generate::*;
pub use strata::*;
