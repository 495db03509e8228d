//! Native model-grid topology.
//!
//! Atmosphere-model grids are rectangular in (ebv, z) but irregular in
//! (teff, logg): the set of valid loggs depends on the temperature (hot
//! stars have no high-gravity models and vice versa), and no convexity can
//! be assumed. The grid generator needs two views of that layout:
//!
//! - the sorted unique values along each axis
//! - the native (teff, logg, ebv, z) nodes, filterable by rectangular bounds

use serde::{Deserialize, Serialize};

use crate::domain::ParamRange;

/// One native grid node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridNode {
    pub teff: f64,
    pub logg: f64,
    pub ebv: f64,
    pub z: f64,
}

/// Read-only view of the native grid layout.
///
/// Implementations must tolerate concurrent read access: the search runs the
/// same queries from multiple workers. The core never writes through this
/// trait; any caching/memoization belongs to the implementor.
pub trait GridTopology: Sync {
    /// Sorted unique effective temperatures present in the grid.
    fn unique_teffs(&self) -> &[f64];
    /// Sorted unique surface gravities present in the grid.
    fn unique_loggs(&self) -> &[f64];
    /// Sorted unique reddenings present in the grid.
    fn unique_ebvs(&self) -> &[f64];
    /// Sorted unique metallicities present in the grid.
    fn unique_zs(&self) -> &[f64];
    /// All native grid nodes, in the grid's natural storage order.
    fn nodes(&self) -> &[GridNode];

    /// Native nodes inside all four (inclusive) ranges, ordered by
    /// (teff, logg, ebv, z).
    fn nodes_within(
        &self,
        teff: &ParamRange,
        logg: &ParamRange,
        ebv: &ParamRange,
        z: &ParamRange,
    ) -> Vec<GridNode> {
        let mut out: Vec<GridNode> = self
            .nodes()
            .iter()
            .filter(|n| {
                teff.contains(n.teff)
                    && logg.contains(n.logg)
                    && ebv.contains(n.ebv)
                    && z.contains(n.z)
            })
            .copied()
            .collect();
        out.sort_by(|a, b| {
            (a.teff, a.logg, a.ebv, a.z)
                .partial_cmp(&(b.teff, b.logg, b.ebv, b.z))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        out
    }
}

/// Topology backed by an in-memory node table.
///
/// Construction derives the unique axis values once; the node list is kept
/// as supplied (plus the derived axes), so lookups are allocation-free.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableTopology {
    nodes: Vec<GridNode>,
    teffs: Vec<f64>,
    loggs: Vec<f64>,
    ebvs: Vec<f64>,
    zs: Vec<f64>,
}

impl TableTopology {
    pub fn new(nodes: Vec<GridNode>) -> Self {
        let teffs = unique_sorted(nodes.iter().map(|n| n.teff));
        let loggs = unique_sorted(nodes.iter().map(|n| n.logg));
        let ebvs = unique_sorted(nodes.iter().map(|n| n.ebv));
        let zs = unique_sorted(nodes.iter().map(|n| n.z));
        Self {
            nodes,
            teffs,
            loggs,
            ebvs,
            zs,
        }
    }

    /// Build a fully rectangular grid from per-axis values (test/demo
    /// convenience; real atmosphere grids are *not* rectangular in
    /// teff/logg, use `new` with the actual node list for those).
    pub fn rectangular(teffs: &[f64], loggs: &[f64], ebvs: &[f64], zs: &[f64]) -> Self {
        let mut nodes = Vec::with_capacity(teffs.len() * loggs.len() * ebvs.len() * zs.len());
        for &teff in teffs {
            for &logg in loggs {
                for &ebv in ebvs {
                    for &z in zs {
                        nodes.push(GridNode { teff, logg, ebv, z });
                    }
                }
            }
        }
        Self::new(nodes)
    }
}

impl GridTopology for TableTopology {
    fn unique_teffs(&self) -> &[f64] {
        &self.teffs
    }

    fn unique_loggs(&self) -> &[f64] {
        &self.loggs
    }

    fn unique_ebvs(&self) -> &[f64] {
        &self.ebvs
    }

    fn unique_zs(&self) -> &[f64] {
        &self.zs
    }

    fn nodes(&self) -> &[GridNode] {
        &self.nodes
    }
}

fn unique_sorted(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut out: Vec<f64> = values.filter(|v| v.is_finite()).collect();
    out.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    out.dedup();
    out
}
