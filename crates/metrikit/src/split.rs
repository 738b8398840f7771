//! Edge split: insert a node at the metric midpoint of a long edge and
//! bisect every cell sharing the edge.
//!
//! The pass visits edges longest first. A split is staged against copies
//! of the affected cells and committed only after every gate passes; a
//! rejected split releases its freshly minted global id back to the
//! unused list, leaving no trace.

use smallvec::SmallVec;
use tracing::info;

use crate::adapt::{AdaptParams, PassCounts};
use crate::cad::GeomEntity;
use crate::cell::CellKind;
use crate::edge::EdgeIndex;
use crate::error::Result;
use crate::grid::Grid;
use crate::measure::MetricMeasure;
use crate::sort;

/// Split every admissible long edge once; returns the counters.
pub fn split_pass(grid: &mut Grid, params: &AdaptParams) -> Result<PassCounts> {
    let mut counts = PassCounts::default();
    let edges = EdgeIndex::new(grid);

    let mut ratios = vec![0.0; edges.n()];
    for (edge, [n0, n1]) in edges.edges() {
        ratios[edge] = grid.nodes.ratio(n0, n1)?;
    }

    // one bite per cell neighbourhood per pass
    let mut locked = vec![false; grid.nodes.max()];

    for edge in sort::argsort_f64_desc(&ratios) {
        if ratios[edge] <= params.split_ratio {
            break;
        }
        let [n0, n1] = edges.nodes(edge);
        if locked[n0] || locked[n1] {
            continue;
        }
        counts.attempted += 1;
        if let Some(new_node) = split_edge(grid, params, n0, n1, &mut counts)? {
            counts.accepted += 1;
            locked.resize(grid.nodes.max(), false);
            locked[new_node] = true;
            for cell in grid.tet().having_node(new_node) {
                for &node in grid.tet().nodes(cell) {
                    locked[node] = true;
                }
            }
        }
    }

    info!(
        attempted = counts.attempted,
        accepted = counts.accepted,
        rejected_quality = counts.rejected_quality,
        rejected_ratio = counts.rejected_ratio,
        rejected_local = counts.rejected_local,
        "split pass"
    );
    Ok(counts)
}

/// Insert a node on `(node0, node1)` and bisect the cells around it.
/// Returns the new node, or `None` when a gate rejected the split.
pub fn split_edge(
    grid: &mut Grid,
    params: &AdaptParams,
    node0: usize,
    node1: usize,
    counts: &mut PassCounts,
) -> Result<Option<usize>> {
    for kind in [CellKind::Pyr, CellKind::Pri, CellKind::Hex] {
        if !grid.cell(kind).list_with2(node0, node1).is_empty() {
            counts.rejected_mixed += 1;
            return Ok(None);
        }
    }

    let tets = grid.tet().list_with2(node0, node1);
    let tris = grid.tri().list_with2(node0, node1);
    let edgs = grid.edg().list_with2(node0, node1);

    for (kind, cells) in [
        (CellKind::Tet, &tets),
        (CellKind::Tri, &tris),
        (CellKind::Edg, &edgs),
    ] {
        for &cell in cells {
            if grid
                .cell(kind)
                .nodes(cell)
                .iter()
                .any(|&n| !grid.nodes.owned(n))
            {
                counts.rejected_local += 1;
                grid.nodes.node_mut(node0).age += 1;
                grid.nodes.node_mut(node1).age += 1;
                return Ok(None);
            }
        }
    }

    let global = grid.nodes.next_global();
    let new_node = grid.nodes.add(global)?;
    grid.nodes.interpolate_edge(node0, node1, 0.5, new_node)?;

    // pull the midpoint onto the lowest-dimensional supporting entity
    if grid.projection.is_some() {
        let entity = if let Some(&edg) = edgs.first() {
            Some(GeomEntity::Edge(grid.edg().id(edg)))
        } else {
            tris.first().map(|&tri| GeomEntity::Face(grid.tri().id(tri)))
        };
        if let Some(entity) = entity {
            let mut xyz = *grid.nodes.xyz(new_node);
            let projection = grid.projection.as_ref().expect("checked above");
            if projection.project(&mut xyz, entity).is_err() {
                grid.nodes.remove(new_node)?;
                counts.rejected_cad += 1;
                return Ok(None);
            }
            grid.nodes.node_mut(new_node).xyz = xyz;
        }
    }

    // stage the children
    let mut tet_children: SmallVec<[[usize; 4]; 16]> = SmallVec::new();
    for &cell in &tets {
        let nodes: [usize; 4] = grid.tet().nodes(cell).try_into().expect("tet arity");
        tet_children.push(nodes.map(|n| if n == node1 { new_node } else { n }));
        tet_children.push(nodes.map(|n| if n == node0 { new_node } else { n }));
    }
    let mut tri_children: SmallVec<[([usize; 3], i32); 8]> = SmallVec::new();
    for &cell in &tris {
        let nodes: [usize; 3] = grid.tri().nodes(cell).try_into().expect("tri arity");
        let id = grid.tri().id(cell);
        tri_children.push((nodes.map(|n| if n == node1 { new_node } else { n }), id));
        tri_children.push((nodes.map(|n| if n == node0 { new_node } else { n }), id));
    }
    let mut edg_children: SmallVec<[([usize; 2], i32); 4]> = SmallVec::new();
    for &cell in &edgs {
        let nodes: [usize; 2] = grid.edg().nodes(cell).try_into().expect("edg arity");
        let id = grid.edg().id(cell);
        edg_children.push((nodes.map(|n| if n == node1 { new_node } else { n }), id));
        edg_children.push((nodes.map(|n| if n == node0 { new_node } else { n }), id));
    }

    // every edge the new node introduces must land in the ratio window
    let mut spokes: SmallVec<[usize; 32]> = SmallVec::new();
    spokes.push(node0);
    spokes.push(node1);
    for child in &tet_children {
        for &n in child {
            if n != new_node && !spokes.contains(&n) {
                spokes.push(n);
            }
        }
    }
    for spoke in spokes {
        let ratio = grid.nodes.ratio(new_node, spoke)?;
        if !(params.split_ratio_min..=params.split_ratio_max).contains(&ratio) {
            grid.nodes.remove(new_node)?;
            counts.rejected_ratio += 1;
            return Ok(None);
        }
    }
    for child in &tet_children {
        if grid.nodes.tet_quality(child)? < params.split_quality_absolute {
            grid.nodes.remove(new_node)?;
            counts.rejected_quality += 1;
            return Ok(None);
        }
    }
    for (child, _) in &tri_children {
        if grid.nodes.tri_quality(child)? < params.split_quality_absolute {
            grid.nodes.remove(new_node)?;
            counts.rejected_quality += 1;
            return Ok(None);
        }
    }

    // commit
    for (kind, cells) in [
        (CellKind::Tet, &tets),
        (CellKind::Tri, &tris),
        (CellKind::Edg, &edgs),
    ] {
        for &cell in cells {
            grid.cell_mut(kind).remove(cell)?;
        }
    }
    for child in &tet_children {
        grid.cell_mut(CellKind::Tet).add(child, 0)?;
    }
    for (child, id) in &tri_children {
        grid.cell_mut(CellKind::Tri).add(child, *id)?;
    }
    for (child, id) in &edg_children {
        grid.cell_mut(CellKind::Edg).add(child, *id)?;
    }
    Ok(Some(new_node))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cad::Projection;
    use crate::error::Error;
    use crate::fixtures;
    use crate::metric::SymTensor;
    use approx::assert_abs_diff_eq;

    fn params() -> AdaptParams {
        AdaptParams::default()
    }

    #[test]
    fn test_split_edge_bisects_both_tets() {
        let mut grid = fixtures::two_tets();
        let mut counts = PassCounts::default();
        let new_node = split_edge(&mut grid, &params(), 0, 1, &mut counts)
            .unwrap()
            .unwrap();
        assert_eq!(grid.nodes.xyz(new_node), &[0.5, 0.0, 0.0]);
        assert_eq!(grid.nodes.n(), 6);
        assert_eq!(grid.tet().n(), 4);
        for (_, row) in grid.tet().iter() {
            let nodes: [usize; 4] = row.nodes.as_slice().try_into().unwrap();
            assert!(grid.nodes.tet_vol(&nodes).unwrap() > 0.0);
        }
        grid.audit().unwrap();
    }

    #[test]
    fn test_split_carries_boundary_ids() {
        let mut grid = fixtures::tet_with_boundary();
        let mut counts = PassCounts::default();
        split_edge(&mut grid, &params(), 0, 1, &mut counts)
            .unwrap()
            .unwrap();
        // the two faces sharing edge (0, 1) are bisected
        assert_eq!(grid.tri().n(), 6);
        let mut ids: Vec<i32> = grid.tri().iter().map(|(_, row)| row.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3, 3, 4, 4]);
        grid.audit().unwrap();
    }

    #[test]
    fn test_rejected_split_recycles_global() {
        let mut grid = fixtures::two_tets();
        let mut strict = params();
        strict.split_quality_absolute = 0.99;
        let mut counts = PassCounts::default();
        let result = split_edge(&mut grid, &strict, 0, 1, &mut counts).unwrap();
        assert!(result.is_none());
        assert_eq!(counts.rejected_quality, 1);
        assert_eq!(grid.nodes.n(), 5);
        assert_eq!(grid.tet().n(), 2);
        // the minted global comes back on the next request
        assert_eq!(grid.nodes.next_global(), 5);
        grid.audit().unwrap();
    }

    #[test]
    fn test_split_interpolates_metric_log_euclidean() {
        let mut grid = fixtures::two_tets();
        grid.nodes.metric_set(0, SymTensor::from_h(0.1)).unwrap();
        grid.nodes.metric_set(1, SymTensor::from_h(10.0)).unwrap();
        let mut wide = params();
        wide.split_ratio_max = 1.0e3;
        let mut counts = PassCounts::default();
        let new_node = split_edge(&mut grid, &wide, 0, 1, &mut counts)
            .unwrap()
            .unwrap();
        // geometric mean of the endpoint spacings
        assert_abs_diff_eq!(grid.nodes.metric(new_node).0[0], 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_split_pass_refines_long_edges() {
        let mut grid = fixtures::tet_with_boundary();
        for local in grid.nodes.locals() {
            grid.nodes.metric_set(local, SymTensor::from_h(0.5)).unwrap();
        }
        let counts = split_pass(&mut grid, &params()).unwrap();
        assert!(counts.accepted >= 1);
        assert_eq!(grid.nodes.n(), 4 + counts.accepted);
        grid.audit().unwrap();
    }

    #[test]
    fn test_split_pass_leaves_unit_mesh_alone() {
        let mut grid = fixtures::regular_tet();
        let counts = split_pass(&mut grid, &params()).unwrap();
        assert_eq!(counts.attempted, 0);
        assert_eq!(grid.nodes.n(), 4);
    }

    struct RefusingCad;
    impl Projection for RefusingCad {
        fn project(&self, _xyz: &mut [f64; 3], _entity: GeomEntity) -> Result<()> {
            Err(Error::Invalid("off the model"))
        }
    }

    #[test]
    fn test_failed_projection_rejects_split() {
        let mut grid = fixtures::tet_with_boundary();
        grid.projection = Some(Box::new(RefusingCad));
        let mut counts = PassCounts::default();
        let result = split_edge(&mut grid, &params(), 0, 1, &mut counts).unwrap();
        assert!(result.is_none());
        assert_eq!(counts.rejected_cad, 1);
        assert_eq!(grid.nodes.n(), 4);
    }

    #[test]
    fn test_non_local_edge_ages_endpoints() {
        let mut grid = fixtures::two_tets();
        grid.nodes.node_mut(3).part = 1;
        let mut counts = PassCounts::default();
        let result = split_edge(&mut grid, &params(), 0, 1, &mut counts).unwrap();
        assert!(result.is_none());
        assert_eq!(counts.rejected_local, 1);
        assert!(grid.nodes.node(0).age > 0);
    }
}
