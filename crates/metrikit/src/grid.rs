//! The grid: node table, one cell table per kind, and the glue between
//! them. Owns the communicator and the optional CAD projection.

use rstar::RTree;
use rstar::primitives::GeomWithData;
use smallvec::SmallVec;

use crate::cad::{GeomClass, Projection};
use crate::cell::{CellKind, CellTable};
use crate::comm::Comm;
use crate::error::{Error, Result};
use crate::geometry;
use crate::node::NodeTable;

pub struct Grid {
    pub comm: Comm,
    pub nodes: NodeTable,
    cells: Vec<CellTable>,
    /// Extruded-2D grid: one prism layer, triangles in the z=0 plane.
    pub twod: bool,
    /// Surface-only grid: no volume cells expected.
    pub surf: bool,
    pub projection: Option<Box<dyn Projection>>,
}

const KINDS: [CellKind; 7] = [
    CellKind::Tet,
    CellKind::Pyr,
    CellKind::Pri,
    CellKind::Hex,
    CellKind::Tri,
    CellKind::Qua,
    CellKind::Edg,
];

fn kind_index(kind: CellKind) -> usize {
    KINDS.iter().position(|&k| k == kind).expect("all kinds listed")
}

impl Grid {
    pub fn new(comm: Comm) -> Self {
        let nodes = NodeTable::new(comm.rank());
        Self {
            comm,
            nodes,
            cells: KINDS.iter().map(|&kind| CellTable::new(kind)).collect(),
            twod: false,
            surf: false,
            projection: None,
        }
    }

    pub fn cell(&self, kind: CellKind) -> &CellTable {
        &self.cells[kind_index(kind)]
    }

    pub fn cell_mut(&mut self, kind: CellKind) -> &mut CellTable {
        &mut self.cells[kind_index(kind)]
    }

    pub fn tet(&self) -> &CellTable {
        self.cell(CellKind::Tet)
    }

    pub fn tri(&self) -> &CellTable {
        self.cell(CellKind::Tri)
    }

    pub fn qua(&self) -> &CellTable {
        self.cell(CellKind::Qua)
    }

    pub fn edg(&self) -> &CellTable {
        self.cell(CellKind::Edg)
    }

    /// Split borrows: the node table next to one cell table.
    pub fn nodes_and_cell_mut(&mut self, kind: CellKind) -> (&mut NodeTable, &mut CellTable) {
        (&mut self.nodes, &mut self.cells[kind_index(kind)])
    }

    pub fn volume_kinds(&self) -> impl Iterator<Item = &CellTable> {
        CellKind::VOLUME.iter().map(|&kind| self.cell(kind))
    }

    /// Count of volume cells of every kind.
    pub fn ncell_volume(&self) -> usize {
        self.volume_kinds().map(CellTable::n).sum()
    }

    /// A node is mixed when pyramids, prisms or hexes still use it.
    pub fn node_is_mixed(&self, node: usize) -> bool {
        !self.cell(CellKind::Pyr).adj().is_empty(node)
            || !self.cell(CellKind::Pri).adj().is_empty(node)
            || !self.cell(CellKind::Hex).adj().is_empty(node)
    }

    /// Distinct boundary face ids around `node`, capped at three; more
    /// never changes a decision.
    pub fn node_faceids(&self, node: usize) -> SmallVec<[i32; 3]> {
        let mut ids: SmallVec<[i32; 3]> = SmallVec::new();
        for cell in self.tri().adj().iter(node) {
            let id = self.tri().id(cell);
            if !ids.contains(&id) {
                ids.push(id);
                if ids.len() == 3 {
                    break;
                }
            }
        }
        ids
    }

    pub fn node_geom_class(&self, node: usize) -> GeomClass {
        GeomClass::from_faceids(&self.node_faceids(node))
    }

    /// Unique node neighbours of `node` through volume cells.
    pub fn node_list_around(&self, node: usize) -> Vec<usize> {
        let mut around: Vec<usize> = self
            .volume_kinds()
            .flat_map(|table| table.node_list_around(node))
            .collect();
        around.sort_unstable();
        around.dedup();
        around
    }

    /// Volume cell with exactly these nodes, any order; the arity picks
    /// the group.
    pub fn cell_with(&self, nodes: &[usize]) -> Option<(CellKind, usize)> {
        let kind = match nodes.len() {
            4 => CellKind::Tet,
            5 => CellKind::Pyr,
            6 => CellKind::Pri,
            8 => CellKind::Hex,
            _ => return None,
        };
        self.cell(kind).with(nodes).map(|cell| (kind, cell))
    }

    /// Boundary cell with exactly these nodes, any order.
    pub fn face_with(&self, nodes: &[usize]) -> Option<(CellKind, usize)> {
        let kind = match nodes.len() {
            3 => CellKind::Tri,
            4 => CellKind::Qua,
            2 => CellKind::Edg,
            _ => return None,
        };
        self.cell(kind).with(nodes).map(|cell| (kind, cell))
    }

    /// True when any volume cell carries this face.
    pub fn cell_has_face(&self, face: &[usize]) -> Result<bool> {
        for table in self.volume_kinds() {
            if table.with_face(face)?.0.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Min and max boundary id over triangles and quads (collective).
    pub fn faceid_range(&self) -> Result<(i32, i32)> {
        let mut lo = i32::MAX;
        let mut hi = i32::MIN;
        for table in [self.tri(), self.qua()] {
            for (_, row) in table.iter() {
                lo = lo.min(row.id);
                hi = hi.max(row.id);
            }
        }
        Ok((self.comm.min(lo)?, self.comm.max(hi)?))
    }

    /// Tet containing `xyz`, found by a barycentric walk from the tet
    /// nearest a seed node. Returns the tet and its barycentric
    /// coordinates; on a point outside the domain, the closest boundary
    /// tet with clipped coordinates.
    pub fn enclosing_tet(&self, xyz: &[f64; 3]) -> Result<(usize, [f64; 4])> {
        let tets = self.tet();
        if tets.is_empty() {
            return Err(Error::NotFound("grid has no tets"));
        }
        let tree: RTree<GeomWithData<[f64; 3], usize>> = RTree::bulk_load(
            self.nodes
                .iter()
                .map(|(local, node)| GeomWithData::new(node.xyz, local))
                .collect(),
        );
        let seed_node = tree
            .nearest_neighbor(xyz)
            .ok_or(Error::NotFound("empty node tree"))?
            .data;
        let mut cell = tets
            .adj()
            .iter(seed_node)
            .next()
            .ok_or(Error::NotFound("seed node has no tet"))?;

        let mut visited = 0;
        loop {
            let nodes: [usize; 4] = tets.nodes(cell).try_into().expect("tet arity");
            let (ok, bary) = self.nodes.bary4(&nodes, xyz);
            if ok && bary.iter().all(|&b| b >= -1.0e-12) {
                return Ok((cell, bary));
            }
            visited += 1;
            if visited > 2 * tets.n() {
                return Err(Error::Failure("enclosing tet walk did not terminate"));
            }
            let mut exit = 0;
            for i in 1..4 {
                if bary[i] < bary[exit] {
                    exit = i;
                }
            }
            let face: Vec<usize> = (0..4).filter(|&i| i != exit).map(|i| nodes[i]).collect();
            let (t0, t1) = tets.with_face(&face)?;
            let neighbor = match (t0, t1) {
                (Some(a), Some(b)) => {
                    if a == cell {
                        Some(b)
                    } else {
                        Some(a)
                    }
                }
                _ => None,
            };
            match neighbor {
                Some(next) => cell = next,
                None => {
                    // walked off the boundary; clamp to this tet
                    let mut clipped = bary.to_vec();
                    geometry::clip_bary(&mut clipped)?;
                    return Ok((cell, clipped.try_into().expect("bary arity")));
                }
            }
        }
    }

    /// Flip boundary triangles whose normal points into the volume.
    pub fn orient_outward(&mut self) -> Result<()> {
        let flips: Vec<usize> = {
            let tets = self.tet();
            let tris = self.tri();
            let mut flips = Vec::new();
            for (cell, row) in tris.iter() {
                let (t0, t1) = tets.with_face(&row.nodes)?;
                let Some(tet) = t0 else { continue };
                if t1.is_some() {
                    return Err(Error::Invalid("boundary tri has two tets, not manifold"));
                }
                let opposite = *tets
                    .nodes(tet)
                    .iter()
                    .find(|n| !row.nodes.contains(n))
                    .ok_or(Error::Failure("tri duplicates its tet"))?;
                // positive orientation means the normal points at the
                // opposite node, i.e. into the volume
                let sign = geometry::tet_orientation(
                    self.nodes.xyz(row.nodes[0]),
                    self.nodes.xyz(row.nodes[1]),
                    self.nodes.xyz(row.nodes[2]),
                    self.nodes.xyz(opposite),
                );
                if sign > 0.0 {
                    flips.push(cell);
                }
            }
            flips
        };
        for cell in flips {
            let mut nodes: Vec<usize> = self.tri().nodes(cell).to_vec();
            nodes.swap(0, 1);
            self.cell_mut(CellKind::Tri).replace_whole(cell, &nodes)?;
        }
        Ok(())
    }

    /// Orient extruded-2D triangles so their normals agree with +z.
    pub fn orient_twod(&mut self) -> Result<()> {
        let flips: Vec<usize> = {
            let tris = self.tri();
            let mut flips = Vec::new();
            for (cell, row) in tris.iter() {
                let nodes: [usize; 3] = row.nodes.as_slice().try_into().expect("tri arity");
                if !self.nodes.tri_twod_orientation(&nodes)? {
                    flips.push(cell);
                }
            }
            flips
        };
        for cell in flips {
            let mut nodes: Vec<usize> = self.tri().nodes(cell).to_vec();
            nodes.swap(0, 1);
            self.cell_mut(CellKind::Tri).replace_whole(cell, &nodes)?;
        }
        Ok(())
    }

    /// Drop volume cells, keeping the boundary discretization.
    pub fn drop_volume(&mut self) {
        for kind in CellKind::VOLUME {
            *self.cell_mut(kind) = CellTable::new(kind);
        }
        self.surf = true;
    }

    /// Compact node and cell storage after topology changes.
    pub fn pack(&mut self) -> Result<()> {
        let (o2n, _) = self.nodes.pack();
        for table in self.cells.iter_mut() {
            table.renumber_nodes(&o2n)?;
            table.pack();
        }
        Ok(())
    }

    /// Check the cross-table invariants; a violation is a defect in the
    /// operator that left the grid in this state.
    pub fn audit(&self) -> Result<()> {
        for (local, node) in self.nodes.iter() {
            if self.nodes.local(node.global) != Some(local) {
                return Err(Error::Failure("sorted globals disagree with slots"));
            }
            let round = node.log_metric.exp();
            for i in 0..6 {
                if (round.0[i] - node.metric.0[i]).abs() > 1.0e-8 * (1.0 + node.metric.0[i].abs())
                {
                    return Err(Error::Failure("metric log cache out of step"));
                }
            }
        }
        for table in &self.cells {
            for (cell, row) in table.iter() {
                for &node in &row.nodes {
                    if !self.nodes.valid(node) {
                        return Err(Error::Failure("cell references an invalid node"));
                    }
                    if !table.adj().contains(node, cell) {
                        return Err(Error::Failure("node adjacency misses its cell"));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn test_node_list_around_spans_groups() {
        let grid = fixtures::two_tets();
        // node 0 is on the shared face of both tets
        assert_eq!(grid.node_list_around(0), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_mixed_flags() {
        let grid = fixtures::one_prism();
        assert!(grid.node_is_mixed(0));
        let grid = fixtures::single_tet();
        assert!(!grid.node_is_mixed(0));
    }

    #[test]
    fn test_geom_classification() {
        let grid = fixtures::tet_with_boundary();
        // every corner of a fully-tagged tet touches three faceids
        assert_eq!(grid.node_geom_class(0), GeomClass::Node);
    }

    #[test]
    fn test_faceid_range() {
        let grid = fixtures::tet_with_boundary();
        assert_eq!(grid.faceid_range().unwrap(), (1, 4));
    }

    #[test]
    fn test_enclosing_tet_walk() {
        let grid = fixtures::two_tets();
        let inside = [0.3, 0.3, 0.2];
        let (cell, bary) = grid.enclosing_tet(&inside).unwrap();
        assert!(grid.tet().valid(cell));
        assert!(bary.iter().all(|&b| b >= 0.0));
        let sum: f64 = bary.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_enclosing_tet_outside_clips() {
        let grid = fixtures::two_tets();
        let outside = [10.0, 10.0, 10.0];
        let (_, bary) = grid.enclosing_tet(&outside).unwrap();
        assert!(bary.iter().all(|&b| b >= 0.0));
    }

    #[test]
    fn test_orient_outward_flips_inward_tri() {
        let mut grid = fixtures::single_tet();
        // bottom face oriented with its normal at the apex: inward
        let tri = grid.cell_mut(CellKind::Tri).add(&[0, 1, 2], 1).unwrap();
        grid.orient_outward().unwrap();
        assert_eq!(grid.tri().nodes(tri), &[1, 0, 2]);
        // a second pass leaves it alone
        grid.orient_outward().unwrap();
        assert_eq!(grid.tri().nodes(tri), &[1, 0, 2]);
    }

    #[test]
    fn test_cell_and_face_lookup() {
        let grid = fixtures::tet_with_boundary();
        assert_eq!(grid.cell_with(&[3, 2, 1, 0]), Some((CellKind::Tet, 0)));
        assert_eq!(grid.cell_with(&[0, 1, 2, 9]), None);
        let (kind, cell) = grid.face_with(&[3, 1, 0]).unwrap();
        assert_eq!(kind, CellKind::Tri);
        assert_eq!(grid.tri().id(cell), 3);
        assert!(grid.cell_has_face(&[0, 1, 2]).unwrap());
        assert!(!grid.cell_has_face(&[0, 1, 9]).unwrap());
    }

    #[test]
    fn test_orient_twod_restores_positive_normals() {
        let mut grid = fixtures::two_tri_square();
        let first = grid.tri().cells()[0];
        let mut nodes = grid.tri().nodes(first).to_vec();
        nodes.swap(0, 1);
        grid.cell_mut(CellKind::Tri).replace_whole(first, &nodes).unwrap();
        grid.orient_twod().unwrap();
        for (_, row) in grid.tri().iter() {
            let nodes: [usize; 3] = row.nodes.as_slice().try_into().unwrap();
            assert!(grid.nodes.tri_twod_orientation(&nodes).unwrap());
        }
    }

    #[test]
    fn test_drop_volume_keeps_surface() {
        let mut grid = fixtures::tet_with_boundary();
        grid.drop_volume();
        assert!(grid.surf);
        assert_eq!(grid.ncell_volume(), 0);
        assert_eq!(grid.tri().n(), 4);
        grid.audit().unwrap();
    }

    #[test]
    fn test_bounding_box_diagonal() {
        let grid = fixtures::single_tet();
        let diagonal = grid.nodes.bounding_box_diagonal(&grid.comm).unwrap();
        assert!((diagonal - 3.0f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_pack_after_removal() {
        let mut grid = fixtures::two_tets();
        let tet0 = grid.tet().cells()[0];
        grid.cell_mut(CellKind::Tet).remove(tet0).unwrap();
        // pack compacts cell storage; nodes stay even when unreferenced
        grid.pack().unwrap();
        assert_eq!(grid.nodes.n(), 5);
        assert_eq!(grid.tet().max(), 1);
        grid.audit().unwrap();
    }

    #[test]
    fn test_audit_catches_dangling_cell() {
        let mut grid = fixtures::single_tet();
        grid.nodes.remove(3).unwrap();
        assert!(grid.audit().is_err());
    }
}
