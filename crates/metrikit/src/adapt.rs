//! The outer adaptation loop.
//!
//! Each sweep runs collapse, split, swap and smooth in that order, with
//! the global id space repaired and ghosts refreshed between passes. The
//! loop stops early once two successive sweeps change nothing anywhere.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::collapse::collapse_pass;
use crate::comm::Stopwatch;
use crate::error::Result;
use crate::grid::Grid;
use crate::smooth::smooth_pass;
use crate::split::split_pass;
use crate::swap::swap_pass;

/// Operator thresholds; the defaults carry most meshes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptParams {
    /// Sweep budget for one [`AdaptDriver::adapt`] call.
    pub sweeps: usize,
    /// Edges strictly shorter than this are collapse targets.
    pub collapse_ratio: f64,
    /// No merge may stretch a surviving edge beyond this ratio.
    pub collapse_ratio_limit: f64,
    /// Post-merge tets must stay at or above this quality.
    pub collapse_quality_absolute: f64,
    /// Edges strictly longer than this are split targets.
    pub split_ratio: f64,
    /// Accepted window for every edge a split creates.
    pub split_ratio_min: f64,
    pub split_ratio_max: f64,
    /// Post-split cells must stay at or above this quality.
    pub split_quality_absolute: f64,
    /// Normal-deviation floor for surface swaps.
    pub post_min_normdev: f64,
    /// A smoothing trial must beat the old worst quality by this much.
    pub smooth_min_improvement: f64,
}

impl Default for AdaptParams {
    fn default() -> Self {
        Self {
            sweeps: 4,
            collapse_ratio: 0.4,
            collapse_ratio_limit: 3.0,
            collapse_quality_absolute: 1.0e-3,
            split_ratio: 1.5,
            split_ratio_min: 1.0e-3,
            split_ratio_max: 3.0,
            split_quality_absolute: 1.0e-3,
            post_min_normdev: 0.9,
            smooth_min_improvement: 1.0e-12,
        }
    }
}

/// Per-pass bookkeeping, reported through the log and the driver.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PassCounts {
    pub attempted: usize,
    pub accepted: usize,
    pub rejected_mixed: usize,
    pub rejected_geometry: usize,
    pub rejected_cad: usize,
    pub rejected_normal: usize,
    pub rejected_quality: usize,
    pub rejected_ratio: usize,
    pub rejected_local: usize,
    pub rejected_topology: usize,
}

impl PassCounts {
    pub fn changed(&self) -> bool {
        self.accepted > 0
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SweepCounts {
    pub collapse: PassCounts,
    pub split: PassCounts,
    pub swap: PassCounts,
    pub smooth: PassCounts,
}

impl SweepCounts {
    pub fn accepted(&self) -> usize {
        self.collapse.accepted + self.split.accepted + self.swap.accepted + self.smooth.accepted
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AdaptReport {
    pub sweeps: Vec<SweepCounts>,
}

pub struct AdaptDriver {
    params: AdaptParams,
}

impl AdaptDriver {
    pub fn new(params: AdaptParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &AdaptParams {
        &self.params
    }

    /// Run sweeps until the budget is spent or the mesh settles.
    pub fn adapt(&self, grid: &mut Grid) -> Result<AdaptReport> {
        let mut watch = Stopwatch::start();
        let mut report = AdaptReport::default();
        let mut quiet_sweeps = 0;
        for sweep in 0..self.params.sweeps {
            let mut counts = SweepCounts::default();

            counts.collapse = collapse_pass(grid, &self.params)?;
            grid.nodes.synchronize_globals(&grid.comm)?;
            grid.nodes.ghost_real(&grid.comm)?;

            counts.split = split_pass(grid, &self.params)?;
            grid.nodes.synchronize_globals(&grid.comm)?;
            grid.nodes.ghost_real(&grid.comm)?;

            counts.swap = swap_pass(grid, &self.params)?;
            grid.nodes.synchronize_globals(&grid.comm)?;
            grid.nodes.ghost_real(&grid.comm)?;

            counts.smooth = smooth_pass(grid, &self.params)?;
            grid.nodes.ghost_real(&grid.comm)?;
            grid.nodes.collect_ghost_age(&grid.comm)?;

            watch.lap(&grid.comm, "adapt sweep")?;
            let accepted_everywhere = grid.comm.sum(&[counts.accepted() as i64])?[0];
            info!(
                sweep,
                accepted = accepted_everywhere,
                nodes = grid.nodes.n(),
                tets = grid.tet().n(),
                "adapt sweep"
            );
            report.sweeps.push(counts);

            if accepted_everywhere == 0 {
                quiet_sweeps += 1;
                if quiet_sweeps >= 2 {
                    break;
                }
            } else {
                quiet_sweeps = 0;
            }
        }
        grid.pack()?;
        Ok(report)
    }
}
