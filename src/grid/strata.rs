//! Shelf decomposition of the irregular (teff, logg) grid footprint.
//!
//! Atmosphere grids are not rectangular in (teff, logg): the minimum valid
//! logg rises with temperature in steps. The footprint is therefore a union
//! of rectangular "shelves" — maximal teff intervals over which the minimum
//! logg is constant. Stratified sampling draws uniformly inside each shelf,
//! with per-shelf budgets proportional to shelf size, so samples respect the
//! footprint instead of piling into invalid corners.

use tracing::debug;

use crate::domain::ParamRange;
use crate::model::GridTopology;

/// Teff extent below which a shelf is treated as degenerate in temperature.
///
/// Together with [`LOGG_DEGENERATE_EXTENT`] this decides whether a shelf is
/// sized by area, by its one non-degenerate extent, or by an even split.
/// Tuned values inherited from long-standing practice, not hard invariants.
pub const TEFF_DEGENERATE_EXTENT: f64 = 1.0;

/// Logg extent (dex) below which a shelf is degenerate in gravity.
pub const LOGG_DEGENERATE_EXTENT: f64 = 0.01;

/// One rectangular stratum of the sampling region.
#[derive(Debug, Clone, PartialEq)]
pub struct Stratum {
    pub teff: ParamRange,
    pub logg: ParamRange,
    pub ebv: ParamRange,
    pub z: ParamRange,
    /// Relative sampling weight (area, extent, or an even-split share).
    pub size: f64,
}

/// Window the sorted unique axis values to the requested range, keeping one
/// native value beyond each edge when the edge falls between grid values.
///
/// Without the widening, a range narrower than one grid cell would see no
/// native values at all and the shelf decomposition would come up empty.
pub fn window_axis(unique: &[f64], range: &ParamRange) -> Vec<f64> {
    if unique.is_empty() {
        return Vec::new();
    }
    let lo = match unique.iter().position(|&v| v == range.low) {
        Some(i) => i,
        None => unique.partition_point(|&v| v < range.low).saturating_sub(1),
    };
    let hi = match unique.iter().position(|&v| v == range.high) {
        Some(i) => i,
        None => unique
            .partition_point(|&v| v < range.high)
            .min(unique.len() - 1),
    };
    unique[lo..=hi.max(lo)].to_vec()
}

/// Decompose the grid footprint within the requested ranges into strata.
///
/// `points` only matters for the even-split fallback weight of fully
/// degenerate shelves. Returns an empty vector when the requested teff
/// window brackets no shelf — the caller then falls back to direct uniform
/// sampling.
pub fn build_strata(
    topology: &impl GridTopology,
    teff_range: &ParamRange,
    logg_range: &ParamRange,
    ebv_range: &ParamRange,
    z_range: &ParamRange,
    points: usize,
) -> Vec<Stratum> {
    let teffs = window_axis(topology.unique_teffs(), teff_range);
    if teffs.is_empty() {
        return Vec::new();
    }

    // Minimum valid logg for every windowed teff.
    let mut min_logg_at: Vec<(f64, f64)> = Vec::with_capacity(teffs.len());
    for &teff in &teffs {
        let min_logg = topology
            .nodes()
            .iter()
            .filter(|n| n.teff == teff)
            .map(|n| n.logg)
            .fold(f64::INFINITY, f64::min);
        if min_logg.is_finite() {
            min_logg_at.push((teff, min_logg));
        }
    }
    if min_logg_at.is_empty() {
        return Vec::new();
    }

    let mut shelf_loggs: Vec<f64> = min_logg_at.iter().map(|&(_, g)| g).collect();
    shelf_loggs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    shelf_loggs.dedup();

    let grid_max_logg = topology
        .unique_loggs()
        .last()
        .copied()
        .unwrap_or(f64::INFINITY);

    // Clamp reddening/metallicity to what the grid actually covers.
    let (ebv_min, ebv_max) = axis_extent(topology.unique_ebvs());
    let (z_min, z_max) = axis_extent(topology.unique_zs());
    let ebv = ebv_range.clamped_to(ebv_min, ebv_max);
    let z = z_range.clamped_to(z_min, z_max);

    let mut strata = Vec::new();
    let mut prev_max_teff: Option<f64> = None;
    for &shelf_logg in &shelf_loggs {
        let shelf_teffs: Vec<f64> = min_logg_at
            .iter()
            .filter(|&&(_, g)| g == shelf_logg)
            .map(|&(t, _)| t)
            .collect();
        let mut min_teff = shelf_teffs.iter().copied().fold(f64::INFINITY, f64::min);
        let max_teff = shelf_teffs.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        // Close gaps between consecutive shelves so the union covers the
        // whole teff window contiguously.
        if let Some(prev) = prev_max_teff {
            min_teff = prev;
        }
        prev_max_teff = Some(max_teff);

        // Shelf entirely below the requested window.
        if max_teff < teff_range.low {
            continue;
        }

        let lo_t = teff_range.low.max(min_teff);
        let hi_t = teff_range.high.min(max_teff);
        let lo_g = logg_range.low.max(shelf_logg);
        let hi_g = logg_range.high.min(grid_max_logg);
        if lo_t > hi_t || lo_g > hi_g {
            continue;
        }

        let dt = hi_t - lo_t;
        let dg = hi_g - lo_g;
        let size = if dt > TEFF_DEGENERATE_EXTENT && dg > LOGG_DEGENERATE_EXTENT {
            dt * dg
        } else if dt > TEFF_DEGENERATE_EXTENT {
            dt
        } else if dg > LOGG_DEGENERATE_EXTENT {
            dg
        } else {
            // Fully degenerate shelf: give it an even share of the budget.
            ((points / shelf_loggs.len().max(1)).max(2)) as f64
        };

        strata.push(Stratum {
            teff: ParamRange { low: lo_t, high: hi_t },
            logg: ParamRange { low: lo_g, high: hi_g },
            ebv,
            z,
            size,
        });
    }

    debug!(
        n_strata = strata.len(),
        total_size = strata.iter().map(|s| s.size).sum::<f64>(),
        "Built sampling strata"
    );
    strata
}

fn axis_extent(unique: &[f64]) -> (f64, f64) {
    match (unique.first(), unique.last()) {
        (Some(&lo), Some(&hi)) => (lo, hi),
        _ => (f64::NEG_INFINITY, f64::INFINITY),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GridNode, TableTopology};

    /// Grid with a stepped footprint: cool stars reach logg 3.0, hot stars
    /// only 4.0.
    fn stepped_topology() -> TableTopology {
        let mut nodes = Vec::new();
        for &teff in &[4000.0, 5000.0, 6000.0] {
            for &logg in &[3.0, 4.0, 5.0] {
                nodes.push(GridNode { teff, logg, ebv: 0.0, z: 0.0 });
            }
        }
        for &teff in &[7000.0, 8000.0] {
            for &logg in &[4.0, 5.0] {
                nodes.push(GridNode { teff, logg, ebv: 0.0, z: 0.0 });
            }
        }
        TableTopology::new(nodes)
    }

    #[test]
    fn two_shelves_for_stepped_footprint() {
        let topo = stepped_topology();
        let strata = build_strata(
            &topo,
            &ParamRange::open(),
            &ParamRange::open(),
            &ParamRange::open(),
            &ParamRange::open(),
            1000,
        );
        assert_eq!(strata.len(), 2);
        assert_eq!(strata[0].logg.low, 3.0);
        assert_eq!(strata[1].logg.low, 4.0);
        // Gap closing: the second shelf starts where the first ends.
        assert_eq!(strata[0].teff.high, 6000.0);
        assert_eq!(strata[1].teff.low, 6000.0);
        assert_eq!(strata[1].teff.high, 8000.0);
    }

    #[test]
    fn strata_are_clamped_to_requested_ranges() {
        let topo = stepped_topology();
        let strata = build_strata(
            &topo,
            &ParamRange::new(4500.0, 7500.0).unwrap(),
            &ParamRange::new(4.2, 4.8).unwrap(),
            &ParamRange::open(),
            &ParamRange::open(),
            1000,
        );
        for s in &strata {
            assert!(s.teff.low >= 4500.0 && s.teff.high <= 7500.0);
            assert!(s.logg.low >= 4.2 && s.logg.high <= 4.8);
        }
    }

    #[test]
    fn shelf_below_window_is_skipped() {
        let topo = stepped_topology();
        let strata = build_strata(
            &topo,
            &ParamRange::new(6500.0, 8000.0).unwrap(),
            &ParamRange::open(),
            &ParamRange::open(),
            &ParamRange::open(),
            1000,
        );
        assert_eq!(strata.len(), 1);
        assert_eq!(strata[0].logg.low, 4.0);
    }

    #[test]
    fn degenerate_teff_window_collapses_stratum() {
        let topo = stepped_topology();
        let strata = build_strata(
            &topo,
            &ParamRange::new(6000.0, 6000.0).unwrap(),
            &ParamRange::open(),
            &ParamRange::open(),
            &ParamRange::open(),
            1000,
        );
        assert!(!strata.is_empty());
        for s in &strata {
            assert_eq!(s.teff.low, 6000.0);
            assert_eq!(s.teff.high, 6000.0);
        }
    }

    #[test]
    fn window_axis_keeps_bracketing_nodes() {
        let unique = [4000.0, 5000.0, 6000.0, 7000.0];
        let w = window_axis(&unique, &ParamRange::new(5200.0, 5800.0).unwrap());
        assert_eq!(w, vec![5000.0, 6000.0]);
        // Exact edges stay exact.
        let w = window_axis(&unique, &ParamRange::new(5000.0, 6000.0).unwrap());
        assert_eq!(w, vec![5000.0, 6000.0]);
    }
}
