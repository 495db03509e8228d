//! Evaluation-batch generation.
//!
//! Two sampling modes, selected by `GridSpec::points`:
//!
//! - **native-grid**: the grid's own nodes, filtered to the requested ranges
//!   and optionally decimated
//! - **stratified-random**: ~`points` uniform draws distributed over the
//!   shelf decomposition of the (teff, logg) footprint, composed with
//!   independent uniform draws in ebv/z
//!
//! Multi-component batches are assembled from independent per-component
//! draws: each component block is permuted on its own (so the per-component
//! orderings are uncorrelated), all blocks are truncated to the shortest
//! length, shared parameters are broadcast from the first component, and
//! radii are derived from masses or sampled.

use rand::prelude::*;
use rand::rngs::StdRng;
use tracing::info;

use crate::constants::radius_from_mass;
use crate::domain::{ComponentColumns, GridSpec, ParamRange, RadiusSampling, SampleBatch};
use crate::error::FitError;
use crate::grid::strata::build_strata;
use crate::model::GridTopology;

/// Default radius range (solar radii) when none is configured.
const DEFAULT_RAD_RANGE: ParamRange = ParamRange { low: 0.1, high: 10.0 };

/// Ranges for one component after resolving the sharing rules.
struct ResolvedRanges {
    teff: ParamRange,
    logg: ParamRange,
    ebv: ParamRange,
    z: ParamRange,
}

/// Generate the evaluation batch described by `spec` on `topology`.
pub fn generate(spec: &GridSpec, topology: &impl GridTopology) -> Result<SampleBatch, FitError> {
    spec.validate()?;
    let mut rng = StdRng::seed_from_u64(spec.seed);

    info!(
        components = spec.components.len(),
        points = ?spec.points,
        res = ?spec.res,
        "Generating evaluation grid"
    );

    let multi = spec.components.len() > 1;
    let mut components: Vec<ComponentColumns> = Vec::with_capacity(spec.components.len());
    for comp in &spec.components {
        let first = &spec.components[0];
        let ranges = ResolvedRanges {
            teff: comp.teff,
            logg: comp.logg,
            ebv: comp.ebv.or(first.ebv).unwrap_or_else(ParamRange::open),
            z: comp.z.or(first.z).unwrap_or_else(ParamRange::open),
        };
        let mut columns = sample_component(topology, &ranges, spec.points, spec.res, &mut rng);
        if multi {
            permute_component(&mut columns, &mut rng);
        }
        components.push(columns);
    }

    // Stratified sampling does not guarantee an exact output count, so
    // align all components on the shortest one.
    let n = components.iter().map(ComponentColumns::len).min().unwrap_or(0);
    for columns in &mut components {
        columns.truncate(n);
    }

    // Shared parameters: unless a component opted out by supplying its own
    // range, it reuses the first component's sampled reddening/metallicity.
    if multi {
        let shared_ebv = components[0].ebv.clone();
        let shared_z = components[0].z.clone();
        for (i, columns) in components.iter_mut().enumerate().skip(1) {
            if spec.components[i].ebv.is_none() {
                columns.ebv = shared_ebv.clone();
            }
            if spec.components[i].z.is_none() {
                columns.z = shared_z.clone();
            }
        }
    }

    assign_radii(spec, &mut components, &mut rng);

    if spec.primary_hottest && multi {
        enforce_primary_hottest(&mut components, &mut rng);
    }

    info!(n_points = n, "Evaluation grid ready");
    Ok(SampleBatch { components })
}

/// Sample one component's (teff, logg, ebv, z) columns.
fn sample_component(
    topology: &impl GridTopology,
    ranges: &ResolvedRanges,
    points: Option<usize>,
    res: Option<usize>,
    rng: &mut StdRng,
) -> ComponentColumns {
    let mut columns = match points {
        None => native_nodes(topology, ranges),
        Some(p) => stratified(topology, ranges, p, rng),
    };

    // Inclusive range filter: stratified strata are already clamped, but the
    // fallback path and any future topology quirks go through the same gate.
    retain_in_ranges(&mut columns, ranges);

    if let Some(res) = res {
        decimate(&mut columns, res);
    }
    columns
}

fn native_nodes(topology: &impl GridTopology, ranges: &ResolvedRanges) -> ComponentColumns {
    let nodes = topology.nodes_within(&ranges.teff, &ranges.logg, &ranges.ebv, &ranges.z);
    let mut columns = ComponentColumns::default();
    for node in nodes {
        columns.teff.push(node.teff);
        columns.logg.push(node.logg);
        columns.ebv.push(node.ebv);
        columns.z.push(node.z);
        columns.rad.push(1.0);
    }
    columns
}

fn stratified(
    topology: &impl GridTopology,
    ranges: &ResolvedRanges,
    points: usize,
    rng: &mut StdRng,
) -> ComponentColumns {
    let strata = build_strata(
        topology,
        &ranges.teff,
        &ranges.logg,
        &ranges.ebv,
        &ranges.z,
        points,
    );

    let mut columns = ComponentColumns::default();
    if strata.is_empty() {
        // The requested window falls between grid nodes: no shelves, so draw
        // directly over the requested ranges (clamped to the grid extents).
        let teff = clamp_to_axis(&ranges.teff, topology.unique_teffs());
        let logg = clamp_to_axis(&ranges.logg, topology.unique_loggs());
        let ebv = clamp_to_axis(&ranges.ebv, topology.unique_ebvs());
        let z = clamp_to_axis(&ranges.z, topology.unique_zs());
        for _ in 0..points {
            columns.teff.push(draw(rng, &teff));
            columns.logg.push(draw(rng, &logg));
            columns.ebv.push(draw(rng, &ebv));
            columns.z.push(draw(rng, &z));
            columns.rad.push(1.0);
        }
        return columns;
    }

    let total: f64 = strata.iter().map(|s| s.size).sum();
    for stratum in &strata {
        let count = (stratum.size / total * points as f64).round() as usize;
        for _ in 0..count {
            columns.teff.push(draw(rng, &stratum.teff));
            columns.logg.push(draw(rng, &stratum.logg));
            columns.ebv.push(draw(rng, &stratum.ebv));
            columns.z.push(draw(rng, &stratum.z));
            columns.rad.push(1.0);
        }
    }
    columns
}

/// Uniform draw over an inclusive range; a collapsed range yields its exact
/// fixed value (how pinned parameters stay pinned through sampling).
fn draw(rng: &mut StdRng, range: &ParamRange) -> f64 {
    if range.high > range.low {
        rng.gen_range(range.low..range.high)
    } else {
        range.low
    }
}

fn clamp_to_axis(range: &ParamRange, unique: &[f64]) -> ParamRange {
    match (unique.first(), unique.last()) {
        (Some(&lo), Some(&hi)) => range.clamped_to(lo, hi),
        _ => *range,
    }
}

fn retain_in_ranges(columns: &mut ComponentColumns, ranges: &ResolvedRanges) {
    let keep: Vec<bool> = (0..columns.len())
        .map(|i| {
            ranges.teff.contains(columns.teff[i])
                && ranges.logg.contains(columns.logg[i])
                && ranges.ebv.contains(columns.ebv[i])
                && ranges.z.contains(columns.z[i])
        })
        .collect();
    if keep.iter().all(|&k| k) {
        return;
    }
    let filter = |col: &mut Vec<f64>| {
        let mut i = 0;
        col.retain(|_| {
            let k = keep[i];
            i += 1;
            k
        });
    };
    filter(&mut columns.teff);
    filter(&mut columns.logg);
    filter(&mut columns.ebv);
    filter(&mut columns.z);
    filter(&mut columns.rad);
}

/// Keep every `res`-th sample, preserving relative order.
fn decimate(columns: &mut ComponentColumns, res: usize) {
    let stride = res.max(1);
    let pick = |col: &Vec<f64>| -> Vec<f64> {
        col.iter().copied().step_by(stride).collect()
    };
    columns.teff = pick(&columns.teff);
    columns.logg = pick(&columns.logg);
    columns.ebv = pick(&columns.ebv);
    columns.z = pick(&columns.z);
    columns.rad = pick(&columns.rad);
}

/// Permute one component's columns with a single shared permutation, so the
/// per-sample alignment within the component survives but the ordering is
/// uncorrelated with the other components.
fn permute_component(columns: &mut ComponentColumns, rng: &mut StdRng) {
    let mut order: Vec<usize> = (0..columns.len()).collect();
    order.shuffle(rng);
    let apply = |col: &Vec<f64>| -> Vec<f64> { order.iter().map(|&i| col[i]).collect() };
    columns.teff = apply(&columns.teff);
    columns.logg = apply(&columns.logg);
    columns.ebv = apply(&columns.ebv);
    columns.z = apply(&columns.z);
    columns.rad = apply(&columns.rad);
}

fn assign_radii(spec: &GridSpec, components: &mut [ComponentColumns], rng: &mut StdRng) {
    if spec.components.len() == 1 {
        // Single-star fits carry the radius inside the flux scale; the
        // column stays at unit radius.
        return;
    }
    match spec.radius {
        RadiusSampling::FromMass => {
            for (comp, columns) in spec.components.iter().zip(components.iter_mut()) {
                // validate() guarantees the mass is present and positive.
                let mass = comp.mass.unwrap_or(1.0);
                columns.rad = columns
                    .logg
                    .iter()
                    .map(|&logg| radius_from_mass(mass, logg))
                    .collect();
            }
        }
        RadiusSampling::Uniform => {
            for (comp, columns) in spec.components.iter().zip(components.iter_mut()) {
                let range = comp.rad.unwrap_or(DEFAULT_RAD_RANGE);
                columns.rad = (0..columns.len()).map(|_| draw(rng, &range)).collect();
            }
        }
        RadiusSampling::LogUniform => {
            for (comp, columns) in spec.components.iter().zip(components.iter_mut()) {
                let range = comp.rad.unwrap_or(DEFAULT_RAD_RANGE);
                let log_range = ParamRange {
                    low: range.low.log10(),
                    high: range.high.log10(),
                };
                columns.rad = (0..columns.len())
                    .map(|_| 10f64.powf(draw(rng, &log_range)))
                    .collect();
            }
        }
    }
}

/// Where the secondary came out hotter than the primary, redraw its teff
/// uniformly below the primary's.
fn enforce_primary_hottest(components: &mut [ComponentColumns], rng: &mut StdRng) {
    let (primary, rest) = components.split_at_mut(1);
    let primary = &primary[0];
    for secondary in rest {
        let floor = secondary
            .teff
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min);
        let mut corrected = 0usize;
        for i in 0..secondary.teff.len() {
            if secondary.teff[i] > primary.teff[i] {
                secondary.teff[i] = if primary.teff[i] > floor {
                    rng.gen_range(floor..primary.teff[i])
                } else {
                    primary.teff[i]
                };
                corrected += 1;
            }
        }
        if corrected > 0 {
            info!(corrected, total = secondary.teff.len(), "Capped secondary teff at primary");
        }
    }
}
