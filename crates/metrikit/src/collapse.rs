//! Edge collapse: remove a node by merging it into a neighbour.
//!
//! The pass targets nodes whose shortest incident edge is below the
//! collapse ratio, shortest first. A merge commits only when the whole
//! admissibility cascade holds; the first admissible neighbour wins.

use tracing::info;

use crate::adapt::{AdaptParams, PassCounts};
use crate::cad::GeomClass;
use crate::cell::CellKind;
use crate::edge::EdgeIndex;
use crate::error::Result;
use crate::grid::Grid;
use crate::measure::MetricMeasure;
use crate::sort;

/// Collapse every admissible short edge once; returns the counters.
pub fn collapse_pass(grid: &mut Grid, params: &AdaptParams) -> Result<PassCounts> {
    let mut counts = PassCounts::default();
    let edges = EdgeIndex::new(grid);

    // per-node shortest incident ratio
    let watermark = 2.0 * params.collapse_ratio;
    let mut node_ratio = vec![watermark; grid.nodes.max()];
    for (_, [n0, n1]) in edges.edges() {
        let ratio = grid.nodes.ratio(n0, n1)?;
        node_ratio[n0] = node_ratio[n0].min(ratio);
        node_ratio[n1] = node_ratio[n1].min(ratio);
    }

    let mut targets = Vec::new();
    let mut node2target = vec![None; grid.nodes.max()];
    let mut target_ratio = Vec::new();
    for node in 0..grid.nodes.max() {
        if node_ratio[node] < params.collapse_ratio {
            node2target[node] = Some(targets.len());
            targets.push(node);
            target_ratio.push(node_ratio[node]);
        }
    }

    for i in sort::argsort_f64(&target_ratio) {
        if target_ratio[i] > params.collapse_ratio {
            continue; // invalidated by an accepted neighbour collapse
        }
        let node1 = targets[i];
        counts.attempted += 1;
        let node0 = collapse_to_remove_node1(grid, params, node1, &mut counts)?;
        if let Some(node0) = node0 {
            counts.accepted += 1;
            grid.nodes.node_mut(node0).age = 0;
            for cell in grid.tet().having_node(node0) {
                for &node in grid.tet().nodes(cell) {
                    if let Some(target) = node2target[node] {
                        target_ratio[target] = watermark;
                    }
                }
            }
        }
    }

    info!(
        attempted = counts.attempted,
        accepted = counts.accepted,
        rejected_geometry = counts.rejected_geometry,
        rejected_quality = counts.rejected_quality,
        rejected_local = counts.rejected_local,
        "collapse pass"
    );
    Ok(counts)
}

/// Try to remove `node1` by merging it into one of its neighbours,
/// nearest (in metric) first. Returns the surviving neighbour.
pub fn collapse_to_remove_node1(
    grid: &mut Grid,
    params: &AdaptParams,
    node1: usize,
    counts: &mut PassCounts,
) -> Result<Option<usize>> {
    let candidates = {
        let around = grid.tet().node_list_around(node1);
        if around.is_empty() {
            grid.tri().node_list_around(node1)
        } else {
            around
        }
    };
    let mut ratios = Vec::with_capacity(candidates.len());
    for &node0 in &candidates {
        ratios.push(grid.nodes.ratio(node0, node1)?);
    }

    for i in sort::argsort_f64(&ratios) {
        let node0 = candidates[i];

        if grid.node_is_mixed(node1) {
            counts.rejected_mixed += 1;
            continue;
        }
        if !edge_geometry_ok(grid, node0, node1)? {
            counts.rejected_geometry += 1;
            continue;
        }
        if grid.projection.is_some() && !edge_cad_constrained_ok(grid, node0, node1) {
            counts.rejected_cad += 1;
            continue;
        }
        if !edge_same_normal_ok(grid, node0, node1)? {
            counts.rejected_normal += 1;
            continue;
        }
        if !edge_quality_ok(grid, params, node0, node1, counts)? {
            continue;
        }
        if !edge_local_ok(grid, node0, node1) {
            counts.rejected_local += 1;
            grid.nodes.node_mut(node0).age += 1;
            grid.nodes.node_mut(node1).age += 1;
            continue;
        }

        collapse_edge(grid, node0, node1)?;
        return Ok(Some(node0));
    }
    Ok(None)
}

/// Merge `node1` into `node0`: degenerate cells go away, the rest are
/// rewritten, `node1` leaves the node table.
fn collapse_edge(grid: &mut Grid, node0: usize, node1: usize) -> Result<()> {
    for kind in [CellKind::Tet, CellKind::Tri, CellKind::Edg] {
        let table = grid.cell_mut(kind);
        for cell in table.list_with2(node0, node1) {
            table.remove(cell)?;
        }
        table.replace_node(node1, node0)?;
    }
    grid.nodes.remove(node1)?;
    Ok(())
}

/// Geometry admissibility, judged from boundary faceids around `node1`:
/// a geometry node never moves, a geometry-edge node merges only along
/// its edge, a face node merges only across that face.
fn edge_geometry_ok(grid: &Grid, node0: usize, node1: usize) -> Result<bool> {
    match grid.node_geom_class(node1) {
        GeomClass::Node => Ok(false),
        GeomClass::Edge(id_a, id_b) => {
            let shared = grid.tri().list_with2(node0, node1);
            if shared.len() != 2 {
                return Ok(false);
            }
            let id0 = grid.tri().id(shared[0]);
            let id1 = grid.tri().id(shared[1]);
            Ok((id0 == id_a && id1 == id_b) || (id1 == id_a && id0 == id_b))
        }
        GeomClass::Face(_) => Ok(grid.tri().has_side(node0, node1)),
        GeomClass::Interior => Ok(true),
    }
}

/// No post-merge triangle may be framed entirely by geometry-edge nodes;
/// such a face is pinned by CAD curves and cannot be re-meshed later.
fn edge_cad_constrained_ok(grid: &Grid, node0: usize, node1: usize) -> bool {
    for cell in grid.tri().having_node(node1) {
        let nodes = grid.tri().nodes(cell);
        if nodes.contains(&node0) {
            continue; // this triangle is collapsed away
        }
        let all_on_edges = nodes.iter().all(|&node| {
            let check = if node == node1 { node0 } else { node };
            grid.node_geom_class(check).on_edge_or_node()
        });
        if all_on_edges {
            return false;
        }
    }
    true
}

/// Every surviving triangle must keep its normal within tolerance.
fn edge_same_normal_ok(grid: &Grid, node0: usize, node1: usize) -> Result<bool> {
    for cell in grid.tri().having_node(node1) {
        let nodes: [usize; 3] = grid.tri().nodes(cell).try_into().expect("tri arity");
        if nodes.contains(&node0) {
            continue;
        }
        let mut before = grid.nodes.tri_normal(&nodes)?;
        if crate::geometry::normalize(&mut before).is_err() {
            return Err(crate::error::Error::Invalid(
                "existing triangle has zero area",
            ));
        }
        let merged = nodes.map(|n| if n == node1 { node0 } else { n });
        let mut after = grid.nodes.tri_normal(&merged)?;
        if crate::geometry::normalize(&mut after).is_err() {
            return Ok(false); // merged triangle would be degenerate
        }
        if crate::geometry::dot(&before, &after) < grid.nodes.same_normal_tol {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Post-merge tets must stay above the quality floor and their edges
/// under the ratio ceiling.
fn edge_quality_ok(
    grid: &Grid,
    params: &AdaptParams,
    node0: usize,
    node1: usize,
    counts: &mut PassCounts,
) -> Result<bool> {
    for cell in grid.tet().having_node(node1) {
        let nodes: [usize; 4] = grid.tet().nodes(cell).try_into().expect("tet arity");
        if nodes.contains(&node0) {
            continue;
        }
        for &node in &nodes {
            if node != node1 {
                let ratio = grid.nodes.ratio(node0, node)?;
                if ratio > params.collapse_ratio_limit {
                    counts.rejected_ratio += 1;
                    return Ok(false);
                }
            }
        }
        let merged = nodes.map(|n| if n == node1 { node0 } else { n });
        if grid.nodes.tet_quality(&merged)? < params.collapse_quality_absolute {
            counts.rejected_quality += 1;
            return Ok(false);
        }
    }
    Ok(true)
}

/// Both stars must be entirely local; two ranks may never rewrite
/// overlapping cell sets in one pass.
fn edge_local_ok(grid: &Grid, node0: usize, node1: usize) -> bool {
    for table in [grid.tet(), grid.tri()] {
        for node in [node0, node1] {
            for cell in table.having_node(node) {
                if table.nodes(cell).iter().any(|&n| !grid.nodes.owned(n)) {
                    return false;
                }
            }
        }
    }
    true
}
