//! Node smoothing: move a node to raise the worst quality around it.
//!
//! Two strategies run in order. Exact-gradient ascent aims the node where
//! the derivative of its worst tet says quality grows, with a
//! backtracking line search; when that stalls, the node tries the
//! centroid of its neighbours. A trial is kept only when the minimum
//! incident quality strictly improves, so smoothing can never invert an
//! element that the quality floor would catch.

use tracing::info;

use crate::adapt::{AdaptParams, PassCounts};
use crate::cad::GeomClass;
use crate::error::Result;
use crate::grid::Grid;
use crate::measure::MetricMeasure;

/// Smooth every admissible owned node once.
pub fn smooth_pass(grid: &mut Grid, params: &AdaptParams) -> Result<PassCounts> {
    let mut counts = PassCounts::default();
    for node in grid.nodes.locals() {
        if !grid.nodes.owned(node) || grid.node_is_mixed(node) {
            continue;
        }
        if grid.tet().adj().is_empty(node) {
            continue;
        }
        match grid.node_geom_class(node) {
            GeomClass::Interior => {}
            GeomClass::Face(_) if grid.projection.is_some() => {}
            _ => continue, // pinned to a geometry edge or node
        }
        counts.attempted += 1;
        if smooth_node(grid, params, node)? {
            counts.accepted += 1;
        } else {
            grid.nodes.node_mut(node).age += 1;
            counts.rejected_quality += 1;
        }
    }
    info!(
        attempted = counts.attempted,
        accepted = counts.accepted,
        rejected_local = counts.rejected_local,
        "smooth pass"
    );
    Ok(counts)
}

/// Incident tets with `node` rotated to position 0, orientation kept.
fn star_of(grid: &Grid, node: usize) -> Vec<[usize; 4]> {
    grid.tet()
        .having_node(node)
        .iter()
        .map(|&cell| {
            let nodes: [usize; 4] = grid.tet().nodes(cell).try_into().expect("tet arity");
            let at = nodes.iter().position(|&n| n == node).expect("adjacency");
            // even permutations keep the signed volume
            match at {
                0 => nodes,
                1 => [nodes[1], nodes[0], nodes[3], nodes[2]],
                2 => [nodes[2], nodes[3], nodes[0], nodes[1]],
                _ => [nodes[3], nodes[2], nodes[1], nodes[0]],
            }
        })
        .collect()
}

fn star_min_quality(grid: &Grid, star: &[[usize; 4]]) -> Result<f64> {
    let mut worst = f64::INFINITY;
    for tet in star {
        worst = worst.min(grid.nodes.tet_quality(tet)?);
    }
    Ok(worst)
}

fn try_position(
    grid: &mut Grid,
    node: usize,
    star: &[[usize; 4]],
    floor: f64,
    xyz: [f64; 3],
) -> Result<bool> {
    let backup = *grid.nodes.xyz(node);
    let mut trial = xyz;
    if let (Some(projection), GeomClass::Face(id)) =
        (grid.projection.as_ref(), grid.node_geom_class(node))
    {
        if projection
            .project(&mut trial, crate::cad::GeomEntity::Face(id))
            .is_err()
        {
            return Ok(false);
        }
    }
    grid.nodes.node_mut(node).xyz = trial;
    if star_min_quality(grid, star)? > floor {
        return Ok(true);
    }
    grid.nodes.node_mut(node).xyz = backup;
    Ok(false)
}

fn smooth_node(grid: &mut Grid, params: &AdaptParams, node: usize) -> Result<bool> {
    let star = star_of(grid, node);
    for tet in &star {
        if tet.iter().any(|&n| !grid.nodes.owned(n)) {
            return Ok(false);
        }
    }
    let before = star_min_quality(grid, &star)?;
    let floor = before + params.smooth_min_improvement;

    // worst tet steers the gradient step
    let mut worst: Option<([usize; 4], f64)> = None;
    for tet in &star {
        let quality = grid.nodes.tet_quality(tet)?;
        if worst.as_ref().is_none_or(|(_, q)| quality < *q) {
            worst = Some((*tet, quality));
        }
    }
    let (worst_tet, worst_quality) = worst.expect("non-empty star");
    let (_, d_quality) = grid.nodes.tet_dquality_dnode0(&worst_tet)?;
    let d2 = crate::geometry::dot(&d_quality, &d_quality);

    if crate::geometry::divisible(1.0, d2) {
        // step sized to lift the worst tet to quality 1, then backtrack
        let scale = (1.0 - worst_quality) / d2;
        let origin = *grid.nodes.xyz(node);
        let mut step = 1.0;
        for _ in 0..6 {
            let trial = [
                origin[0] + step * scale * d_quality[0],
                origin[1] + step * scale * d_quality[1],
                origin[2] + step * scale * d_quality[2],
            ];
            if try_position(grid, node, &star, floor, trial)? {
                return Ok(true);
            }
            step *= 0.5;
        }
    }

    // fallback: relax toward the centroid of the neighbours
    let around = grid.node_list_around(node);
    if !around.is_empty() {
        let mut centroid = [0.0; 3];
        for &other in &around {
            for (slot, value) in centroid.iter_mut().zip(grid.nodes.xyz(other)) {
                *slot += value;
            }
        }
        for slot in centroid.iter_mut() {
            *slot /= around.len() as f64;
        }
        if try_position(grid, node, &star, floor, centroid)? {
            return Ok(true);
        }
    }
    Ok(false)
}
