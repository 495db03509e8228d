//! Capability traits implemented by external collaborators.

use crate::domain::ParamPoint;

/// Translates an evaluation point into synthetic photometry.
///
/// Contract:
///
/// - returns one synthetic flux/color per entry of `photbands`, in matching
///   units and order, plus the absolute luminosity at unit radius
/// - for parameter combinations outside the model grid's support, returns
///   NaN entries instead of erroring — the search propagates NaN and the
///   caller filters afterwards
/// - must be pure given its inputs (the driver evaluates points from
///   multiple rayon workers concurrently)
pub trait ModelEvaluator: Sync {
    fn evaluate(&self, point: &ParamPoint, photbands: &[String]) -> (Vec<f64>, f64);
}

/// Classifies a passband name as a color (ratio) or an absolute flux.
pub trait PassbandClassifier {
    fn is_color(&self, photband: &str) -> bool;
}

/// Name-based classifier covering the common photometric systems.
///
/// A passband is a color when the band part (after the `SYSTEM.` prefix)
/// contains a `-` (e.g. `GENEVA.B-V`, `2MASS.J-H`) or is one of the Strömgren
/// curvature indices (`M1`, `C1`), which are color combinations despite the
/// plain name.
pub struct DefaultClassifier;

impl PassbandClassifier for DefaultClassifier {
    fn is_color(&self, photband: &str) -> bool {
        let band = photband.rsplit('.').next().unwrap_or(photband);
        band.contains('-') || matches!(band.to_ascii_uppercase().as_str(), "M1" | "C1")
    }
}

/// Receives progress ticks during a sequential grid search.
///
/// Not invoked on the parallel path: completion order is meaningless there.
pub trait ProgressReporter {
    fn update(&mut self, increment: usize);
}

/// Reporter that swallows all updates.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn update(&mut self, _increment: usize) {}
}

/// Reporter that counts completed points (useful for tests and embedding).
#[derive(Debug, Default)]
pub struct CountingProgress {
    pub completed: usize,
}

impl ProgressReporter for CountingProgress {
    fn update(&mut self, increment: usize) {
        self.completed += increment;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifier_detects_colors_and_fluxes() {
        let c = DefaultClassifier;
        assert!(c.is_color("GENEVA.B-V"));
        assert!(c.is_color("2MASS.J-H"));
        assert!(c.is_color("STROMGREN.M1"));
        assert!(c.is_color("STROMGREN.C1"));
        assert!(!c.is_color("GENEVA.G"));
        assert!(!c.is_color("2MASS.KS"));
    }

    #[test]
    fn counting_progress_accumulates() {
        let mut p = CountingProgress::default();
        p.update(1);
        p.update(2);
        assert_eq!(p.completed, 3);
    }
}
