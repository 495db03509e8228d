//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can
//! be:
//!
//! - used in-memory during fitting
//! - exported to JSON for later inspection
//! - built up by embedding applications without touching fit internals

use serde::{Deserialize, Serialize};

use crate::error::FitError;
use crate::model::PassbandClassifier;

/// A validated set of photometric observations.
///
/// Parallel arrays: `meas[i]` / `e_meas[i]` are the value and 1-sigma error
/// measured through passband `photbands[i]`. The `is_color` mask is derived
/// once at construction through a [`PassbandClassifier`]: color/ratio entries
/// are scale-invariant, absolute fluxes pick up the global flux scale.
///
/// Validation happens here, once, so the statistic evaluator can stay an
/// infallible pure function:
///
/// - all arrays must have the same, non-zero length
/// - `meas` must be finite
/// - `e_meas` must be finite and strictly positive (a zero error on an
///   absolute flux would make the scale weights undefined)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementSet {
    meas: Vec<f64>,
    e_meas: Vec<f64>,
    photbands: Vec<String>,
    is_color: Vec<bool>,
}

impl MeasurementSet {
    pub fn new(
        meas: Vec<f64>,
        e_meas: Vec<f64>,
        photbands: Vec<String>,
        classifier: &impl PassbandClassifier,
    ) -> Result<Self, FitError> {
        if meas.is_empty() {
            return Err(FitError::degenerate("Empty measurement set."));
        }
        if meas.len() != e_meas.len() || meas.len() != photbands.len() {
            return Err(FitError::degenerate(format!(
                "Measurement arrays disagree in length: meas={}, e_meas={}, photbands={}.",
                meas.len(),
                e_meas.len(),
                photbands.len()
            )));
        }
        for (i, (&m, &e)) in meas.iter().zip(e_meas.iter()).enumerate() {
            if !m.is_finite() {
                return Err(FitError::degenerate(format!(
                    "Non-finite measurement at index {i} ({}).",
                    photbands[i]
                )));
            }
            if !(e.is_finite() && e > 0.0) {
                return Err(FitError::degenerate(format!(
                    "Measurement error must be finite and > 0; got {e} at index {i} ({}).",
                    photbands[i]
                )));
            }
        }
        let is_color = photbands.iter().map(|p| classifier.is_color(p)).collect();
        Ok(Self {
            meas,
            e_meas,
            photbands,
            is_color,
        })
    }

    pub fn len(&self) -> usize {
        self.meas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meas.is_empty()
    }

    pub fn meas(&self) -> &[f64] {
        &self.meas
    }

    pub fn e_meas(&self) -> &[f64] {
        &self.e_meas
    }

    pub fn photbands(&self) -> &[String] {
        &self.photbands
    }

    pub fn is_color(&self) -> &[bool] {
        &self.is_color
    }
}

/// Inclusive range for one fit parameter.
///
/// `low == high` pins the parameter (a degenerate range); infinite bounds are
/// allowed and mean "whatever the model grid supports".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamRange {
    pub low: f64,
    pub high: f64,
}

impl ParamRange {
    pub fn new(low: f64, high: f64) -> Result<Self, FitError> {
        if low.is_nan() || high.is_nan() || low > high {
            return Err(FitError::config(format!(
                "Invalid parameter range ({low}, {high}): need low <= high and no NaN."
            )));
        }
        Ok(Self { low, high })
    }

    /// Unbounded range.
    pub fn open() -> Self {
        Self {
            low: f64::NEG_INFINITY,
            high: f64::INFINITY,
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.low == self.high
    }

    pub fn contains(&self, value: f64) -> bool {
        self.low <= value && value <= self.high
    }

    pub fn width(&self) -> f64 {
        self.high - self.low
    }

    /// Intersect with another range (used to clamp requests to grid extents).
    pub fn clamped_to(&self, low: f64, high: f64) -> Self {
        Self {
            low: self.low.max(low),
            high: self.high.min(high),
        }
    }
}

/// How component radii are assigned in multi-component grids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RadiusSampling {
    /// Derive each radius from the component mass and sampled logg,
    /// `r = sqrt(G·M/10^logg)` (converted to solar radii). Requires a mass
    /// on every component; any radius ranges are ignored.
    FromMass,
    /// Draw radii uniformly over the component radius range.
    Uniform,
    /// Draw radii log-uniformly over the component radius range (the
    /// canonical choice for binary/multiple fits, where radii span decades).
    LogUniform,
}

/// Parameter ranges for one component of the system.
///
/// `ebv`/`z` set to `None` mean "shared": the component reuses the first
/// component's sampled values (interstellar reddening and metallicity are
/// physically common to the system). Supplying an explicit range opts that
/// component out of sharing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentRanges {
    pub teff: ParamRange,
    pub logg: ParamRange,
    pub ebv: Option<ParamRange>,
    pub z: Option<ParamRange>,
    /// Radius range in solar radii; defaults to (0.1, 10) when sampled.
    pub rad: Option<ParamRange>,
    /// Component mass in solar masses (for [`RadiusSampling::FromMass`]).
    pub mass: Option<f64>,
}

impl ComponentRanges {
    /// Ranges with everything open except teff/logg.
    pub fn new(teff: ParamRange, logg: ParamRange) -> Self {
        Self {
            teff,
            logg,
            ebv: None,
            z: None,
            rad: None,
            mass: None,
        }
    }
}

/// Full description of a grid-generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridSpec {
    /// One entry per component; a single entry is a single-star fit.
    pub components: Vec<ComponentRanges>,
    /// `Some(p)`: stratified-random sampling with ~`p` points per component.
    /// `None`: return the native grid nodes within the ranges.
    pub points: Option<usize>,
    /// Optional decimation stride: keep every `res`-th point.
    pub res: Option<usize>,
    /// Radius assignment for multi-component systems (single-component grids
    /// always get unit radii).
    pub radius: RadiusSampling,
    /// Resample the secondary's teff below the primary's where it is hotter.
    pub primary_hottest: bool,
    /// RNG seed for reproducible sampling.
    pub seed: u64,
}

impl GridSpec {
    /// Single-component spec with native-grid sampling.
    pub fn single(ranges: ComponentRanges) -> Self {
        Self {
            components: vec![ranges],
            points: None,
            res: None,
            radius: RadiusSampling::LogUniform,
            primary_hottest: false,
            seed: 0,
        }
    }

    pub fn validate(&self) -> Result<(), FitError> {
        if self.components.is_empty() {
            return Err(FitError::config("GridSpec needs at least one component."));
        }
        if let Some(0) = self.points {
            return Err(FitError::config("points must be > 0 when supplied."));
        }
        if let Some(0) = self.res {
            return Err(FitError::config("res must be > 0 when supplied."));
        }
        let first = &self.components[0];
        if self.components.len() > 1 && (first.ebv.is_none() || first.z.is_none()) {
            return Err(FitError::config(
                "Multi-component specs must give ebv and z ranges on the first component \
                 (later components may share them).",
            ));
        }
        if self.radius == RadiusSampling::FromMass {
            for (i, comp) in self.components.iter().enumerate() {
                match comp.mass {
                    Some(m) if m.is_finite() && m > 0.0 => {}
                    _ => {
                        return Err(FitError::config(format!(
                            "Radius-from-mass requires a positive mass on every component \
                             (component {i})."
                        )));
                    }
                }
            }
        }
        for (i, comp) in self.components.iter().enumerate() {
            if let Some(rad) = &comp.rad {
                if !(rad.low > 0.0) {
                    return Err(FitError::config(format!(
                        "Radius range on component {i} must be strictly positive."
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Sampled parameter values for one component, as parallel columns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentColumns {
    pub teff: Vec<f64>,
    pub logg: Vec<f64>,
    pub ebv: Vec<f64>,
    pub z: Vec<f64>,
    pub rad: Vec<f64>,
}

impl ComponentColumns {
    pub fn len(&self) -> usize {
        self.teff.len()
    }

    pub fn is_empty(&self) -> bool {
        self.teff.is_empty()
    }

    pub fn truncate(&mut self, len: usize) {
        self.teff.truncate(len);
        self.logg.truncate(len);
        self.ebv.truncate(len);
        self.z.truncate(len);
        self.rad.truncate(len);
    }
}

/// Parameter values of a single evaluation point for one component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentParams {
    pub teff: f64,
    pub logg: f64,
    pub ebv: f64,
    pub z: f64,
    pub rad: f64,
}

/// One evaluation point of the (possibly multi-component) parameter space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamPoint {
    pub components: Vec<ComponentParams>,
}

/// An ordered batch of evaluation points, stored columnar per component.
///
/// All columns across all components have the same length; index `i` in any
/// column belongs to sample `i`. Downstream consumers rely only on this
/// index alignment, never on a particular ordering of the samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleBatch {
    pub components: Vec<ComponentColumns>,
}

impl SampleBatch {
    pub fn len(&self) -> usize {
        self.components.first().map_or(0, ComponentColumns::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn n_components(&self) -> usize {
        self.components.len()
    }

    /// Assemble the `i`-th evaluation point.
    ///
    /// # Panics
    /// Panics if `i` is out of bounds.
    pub fn point(&self, i: usize) -> ParamPoint {
        ParamPoint {
            components: self
                .components
                .iter()
                .map(|c| ComponentParams {
                    teff: c.teff[i],
                    logg: c.logg[i],
                    ebv: c.ebv[i],
                    z: c.z[i],
                    rad: c.rad[i],
                })
                .collect(),
        }
    }
}

/// Per-point outputs of a grid search, aligned to the input batch order.
///
/// Entries for parameter combinations outside the model grid are NaN; the
/// caller filters them after the search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridSearchResult {
    pub chisq: Vec<f64>,
    pub scale: Vec<f64>,
    pub e_scale: Vec<f64>,
    /// Absolute luminosity at unit radius, per point.
    pub lumis: Vec<f64>,
}

impl GridSearchResult {
    pub fn with_len(n: usize) -> Self {
        Self {
            chisq: vec![0.0; n],
            scale: vec![0.0; n],
            e_scale: vec![0.0; n],
            lumis: vec![0.0; n],
        }
    }

    pub fn len(&self) -> usize {
        self.chisq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chisq.is_empty()
    }

    /// Index of the lowest finite chi-square, if any point was in-grid.
    pub fn best_index(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, &c) in self.chisq.iter().enumerate() {
            if !c.is_finite() {
                continue;
            }
            if best.map_or(true, |b| c < self.chisq[b]) {
                best = Some(i);
            }
        }
        best
    }
}

/// One edge of a confidence interval.
///
/// CI estimation can fail per parameter (profile scan not converging); the
/// failure is carried explicitly rather than raised, so one bad parameter
/// never aborts the batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CiEdge {
    /// Edge found by the profile-likelihood scan.
    Profiled(f64),
    /// Scan failed; the parameter's hard bound is reported instead.
    AtBound(f64),
}

impl CiEdge {
    pub fn value(&self) -> f64 {
        match *self {
            CiEdge::Profiled(v) | CiEdge::AtBound(v) => v,
        }
    }

    pub fn is_profiled(&self) -> bool {
        matches!(self, CiEdge::Profiled(_))
    }
}

/// Confidence interval for one parameter at a given sigma level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub sigma: f64,
    pub lower: CiEdge,
    pub upper: CiEdge,
}

/// One named fit parameter with bounds and (after fitting) an error estimate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: f64,
    /// 1-sigma standard error; `None` until estimated.
    pub error: Option<f64>,
    pub min: f64,
    pub max: f64,
    /// Free to vary (`true`) or held fixed (`false`).
    pub vary: bool,
    pub ci: Option<ConfidenceInterval>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            error: None,
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
            vary: true,
            ci: None,
        }
    }

    pub fn with_bounds(mut self, min: f64, max: f64) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn fixed(mut self) -> Self {
        self.vary = false;
        self
    }
}

/// An ordered collection of named parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterSet {
    params: Vec<Parameter>,
}

impl ParameterSet {
    pub fn new(params: Vec<Parameter>) -> Result<Self, FitError> {
        for i in 0..params.len() {
            for j in (i + 1)..params.len() {
                if params[i].name == params[j].name {
                    return Err(FitError::config(format!(
                        "Duplicate parameter name '{}'.",
                        params[i].name
                    )));
                }
            }
        }
        Ok(Self { params })
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Parameter> {
        self.params.iter_mut()
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.params.iter_mut().find(|p| p.name == name)
    }

    pub fn values(&self) -> Vec<f64> {
        self.params.iter().map(|p| p.value).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.params.iter().map(|p| p.name.as_str()).collect()
    }

    /// Indices of the free (varying) parameters.
    pub fn free_indices(&self) -> Vec<usize> {
        self.params
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.vary.then_some(i))
            .collect()
    }

    pub fn set_values(&mut self, values: &[f64]) {
        for (p, &v) in self.params.iter_mut().zip(values.iter()) {
            p.value = v;
        }
    }
}

/// Everything a minimization run produces.
///
/// The per-start arrays (`chisq`, `nfev`, `scale`, `lumis` and the entries of
/// `traces`) are parallel: entry `k` belongs to start `k`. `parameters` holds
/// the best start's refined parameter set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinimizeOutcome {
    pub parameters: ParameterSet,
    /// Fitted value of every parameter for every start, keyed by name.
    pub traces: Vec<(String, Vec<f64>)>,
    pub chisq: Vec<f64>,
    pub nfev: Vec<usize>,
    pub scale: Vec<f64>,
    pub lumis: Vec<f64>,
}
