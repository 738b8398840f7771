//! Typed cell storage.
//!
//! One table per element kind. Rows are fixed arity; blank rows are
//! recycled LIFO through a free list, and a node-to-cell adjacency is
//! maintained on every insert and remove; it is the only way to answer
//! "which cells touch this node". Boundary kinds (tri, qua, edg) carry an
//! integer id tagging the geometry face or edge they discretize.

use arrayvec::ArrayVec;
use smallvec::SmallVec;

use crate::adjacency::Adjacency;
use crate::error::{Error, Result};
use crate::sort;

pub const MAX_NODE_PER: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellKind {
    Tet,
    Pyr,
    Pri,
    Hex,
    Tri,
    Qua,
    Edg,
}

/// Pyramids are quad base (0,1,2,3) with apex 4; prisms are bottom
/// triangle (0,1,2) under top triangle (3,4,5); hexes are bottom quad
/// (0,1,2,3) under top quad (4,5,6,7).
impl CellKind {
    pub const VOLUME: [CellKind; 4] = [CellKind::Tet, CellKind::Pyr, CellKind::Pri, CellKind::Hex];
    pub const SURFACE: [CellKind; 3] = [CellKind::Tri, CellKind::Qua, CellKind::Edg];
    pub const ALL: [CellKind; 7] = [
        CellKind::Tet,
        CellKind::Pyr,
        CellKind::Pri,
        CellKind::Hex,
        CellKind::Tri,
        CellKind::Qua,
        CellKind::Edg,
    ];

    pub fn node_per(self) -> usize {
        match self {
            CellKind::Tet => 4,
            CellKind::Pyr => 5,
            CellKind::Pri => 6,
            CellKind::Hex => 8,
            CellKind::Tri => 3,
            CellKind::Qua => 4,
            CellKind::Edg => 2,
        }
    }

    /// Boundary kinds store a geometry id alongside their nodes.
    pub fn has_id(self) -> bool {
        matches!(self, CellKind::Tri | CellKind::Qua | CellKind::Edg)
    }

    pub fn is_volume(self) -> bool {
        matches!(
            self,
            CellKind::Tet | CellKind::Pyr | CellKind::Pri | CellKind::Hex
        )
    }

    pub fn edges(self) -> &'static [[usize; 2]] {
        match self {
            CellKind::Tet => &[[0, 1], [0, 2], [0, 3], [1, 2], [1, 3], [2, 3]],
            CellKind::Pyr => &[
                [0, 1],
                [1, 2],
                [2, 3],
                [3, 0],
                [0, 4],
                [1, 4],
                [2, 4],
                [3, 4],
            ],
            CellKind::Pri => &[
                [0, 1],
                [1, 2],
                [2, 0],
                [3, 4],
                [4, 5],
                [5, 3],
                [0, 3],
                [1, 4],
                [2, 5],
            ],
            CellKind::Hex => &[
                [0, 1],
                [1, 2],
                [2, 3],
                [3, 0],
                [4, 5],
                [5, 6],
                [6, 7],
                [7, 4],
                [0, 4],
                [1, 5],
                [2, 6],
                [3, 7],
            ],
            CellKind::Tri => &[[0, 1], [1, 2], [2, 0]],
            CellKind::Qua => &[[0, 1], [1, 2], [2, 3], [3, 0]],
            CellKind::Edg => &[[0, 1]],
        }
    }

    /// Outward-oriented faces for positive-volume node order.
    pub fn faces(self) -> &'static [&'static [usize]] {
        match self {
            CellKind::Tet => &[&[1, 2, 3], &[0, 3, 2], &[0, 1, 3], &[0, 2, 1]],
            CellKind::Pyr => &[
                &[3, 2, 1, 0],
                &[0, 1, 4],
                &[1, 2, 4],
                &[2, 3, 4],
                &[3, 0, 4],
            ],
            CellKind::Pri => &[
                &[0, 2, 1],
                &[3, 4, 5],
                &[0, 1, 4, 3],
                &[1, 2, 5, 4],
                &[2, 0, 3, 5],
            ],
            CellKind::Hex => &[
                &[0, 3, 2, 1],
                &[4, 5, 6, 7],
                &[0, 1, 5, 4],
                &[1, 2, 6, 5],
                &[2, 3, 7, 6],
                &[3, 0, 4, 7],
            ],
            CellKind::Tri | CellKind::Qua | CellKind::Edg => &[],
        }
    }
}

#[derive(Debug, Clone)]
pub struct CellRow {
    pub nodes: ArrayVec<usize, MAX_NODE_PER>,
    pub id: i32,
}

#[derive(Debug)]
pub struct CellTable {
    kind: CellKind,
    rows: Vec<Option<CellRow>>,
    free: Vec<usize>,
    n: usize,
    adj: Adjacency,
    /// Per-cell global edge labels, filled in while an edge index exists.
    c2e: Vec<SmallVec<[usize; 12]>>,
}

impl CellTable {
    pub fn new(kind: CellKind) -> Self {
        Self {
            kind,
            rows: Vec::new(),
            free: Vec::new(),
            n: 0,
            adj: Adjacency::new(),
            c2e: Vec::new(),
        }
    }

    pub fn kind(&self) -> CellKind {
        self.kind
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn max(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn valid(&self, cell: usize) -> bool {
        self.rows.get(cell).is_some_and(Option::is_some)
    }

    pub fn row(&self, cell: usize) -> &CellRow {
        self.rows[cell].as_ref().expect("blank cell row")
    }

    pub fn nodes(&self, cell: usize) -> &[usize] {
        &self.row(cell).nodes
    }

    pub fn id(&self, cell: usize) -> i32 {
        self.row(cell).id
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &CellRow)> {
        self.rows
            .iter()
            .enumerate()
            .filter_map(|(cell, row)| row.as_ref().map(|r| (cell, r)))
    }

    pub fn cells(&self) -> Vec<usize> {
        self.iter().map(|(cell, _)| cell).collect()
    }

    pub fn adj(&self) -> &Adjacency {
        &self.adj
    }

    /// Cells touching `node`, in adjacency order.
    pub fn having_node(&self, node: usize) -> SmallVec<[usize; 16]> {
        self.adj.iter(node).collect()
    }

    pub fn add(&mut self, nodes: &[usize], id: i32) -> Result<usize> {
        if nodes.len() != self.kind.node_per() {
            return Err(Error::Invalid("cell arity mismatch"));
        }
        let row = CellRow {
            nodes: ArrayVec::try_from(nodes).expect("arity checked above"),
            id,
        };
        let cell = match self.free.pop() {
            Some(slot) => {
                self.rows[slot] = Some(row);
                slot
            }
            None => {
                self.rows.push(Some(row));
                self.rows.len() - 1
            }
        };
        if self.c2e.len() < self.rows.len() {
            self.c2e.resize(self.rows.len(), SmallVec::new());
        }
        self.c2e[cell] = SmallVec::from_elem(usize::MAX, self.kind.edges().len());
        for &node in nodes {
            self.adj.add(node, cell);
        }
        self.n += 1;
        Ok(cell)
    }

    pub fn remove(&mut self, cell: usize) -> Result<()> {
        let Some(row) = self.rows.get_mut(cell).and_then(Option::take) else {
            return Err(Error::Invalid("remove of a blank cell"));
        };
        for &node in &row.nodes {
            self.adj.remove(node, cell);
        }
        self.free.push(cell);
        self.n -= 1;
        Ok(())
    }

    /// Rewrite one cell in place, keeping its index and id.
    pub fn replace_whole(&mut self, cell: usize, nodes: &[usize]) -> Result<()> {
        if nodes.len() != self.kind.node_per() {
            return Err(Error::Invalid("cell arity mismatch"));
        }
        if !self.valid(cell) {
            return Err(Error::Invalid("replace of a blank cell"));
        }
        let old: ArrayVec<usize, MAX_NODE_PER> = self.row(cell).nodes.clone();
        for &node in &old {
            self.adj.remove(node, cell);
        }
        let row = self.rows[cell].as_mut().expect("validity checked above");
        row.nodes = ArrayVec::try_from(nodes).expect("arity checked above");
        for &node in nodes {
            self.adj.add(node, cell);
        }
        Ok(())
    }

    /// Rewrite every occurrence of `old` with `new`, adjacency included.
    pub fn replace_node(&mut self, old: usize, new: usize) -> Result<()> {
        let cells: SmallVec<[usize; 16]> = self.adj.iter(old).collect();
        for cell in cells {
            let row = self.rows[cell].as_mut().expect("adjacency lists blanks");
            for node in row.nodes.iter_mut() {
                if *node == old {
                    *node = new;
                }
            }
            self.adj.remove(old, cell);
            self.adj.add(new, cell);
        }
        Ok(())
    }

    /// Cell whose node set equals `nodes`, any order, ignoring the id.
    pub fn with(&self, nodes: &[usize]) -> Option<usize> {
        if nodes.len() != self.kind.node_per() {
            return None;
        }
        let want = sort::unique(nodes);
        self.adj
            .iter(nodes[0])
            .find(|&cell| sort::unique(self.nodes(cell)) == want)
    }

    /// Both cells incident to a face, for manifold checks. More than two
    /// is a broken volume mesh and surfaces as an error.
    pub fn with_face(&self, face: &[usize]) -> Result<(Option<usize>, Option<usize>)> {
        let want = sort::unique(face);
        let mut found = (None, None);
        for cell in self.adj.iter(face[0]) {
            let has_face = self
                .kind
                .faces()
                .iter()
                .any(|f| sort::unique(&f.iter().map(|&i| self.nodes(cell)[i]).collect::<Vec<_>>()) == want);
            if has_face {
                match found {
                    (None, _) => found.0 = Some(cell),
                    (Some(_), None) => found.1 = Some(cell),
                    _ => return Err(Error::Invalid("three or more cells share a face")),
                }
            }
        }
        Ok(found)
    }

    /// Cells containing both `node0` and `node1`.
    pub fn list_with2(&self, node0: usize, node1: usize) -> SmallVec<[usize; 16]> {
        self.adj
            .iter(node0)
            .filter(|&cell| self.nodes(cell).contains(&node1))
            .collect()
    }

    /// True when `(node0, node1)` lies on an edge of some cell.
    pub fn has_side(&self, node0: usize, node1: usize) -> bool {
        self.adj.iter(node0).any(|cell| {
            let nodes = self.nodes(cell);
            self.kind.edges().iter().any(|&[a, b]| {
                (nodes[a] == node0 && nodes[b] == node1)
                    || (nodes[a] == node1 && nodes[b] == node0)
            })
        })
    }

    /// Unique neighbours of `node` through this table's cells.
    pub fn node_list_around(&self, node: usize) -> Vec<usize> {
        let mut around: Vec<usize> = self
            .adj
            .iter(node)
            .flat_map(|cell| self.nodes(cell).iter().copied())
            .filter(|&n| n != node)
            .collect();
        around.sort_unstable();
        around.dedup();
        around
    }

    /// Node pairs of `cell`'s edges, table order.
    pub fn cell_edges(&self, cell: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
        let nodes = self.nodes(cell);
        self.kind
            .edges()
            .iter()
            .map(move |&[a, b]| (nodes[a], nodes[b]))
    }

    /// Node tuples of `cell`'s faces, outward order.
    pub fn cell_faces(&self, cell: usize) -> impl Iterator<Item = SmallVec<[usize; 4]>> + '_ {
        let nodes = self.nodes(cell);
        self.kind
            .faces()
            .iter()
            .map(move |face| face.iter().map(|&i| nodes[i]).collect())
    }

    // --- edge label cache ---

    pub fn empty_edges(&mut self) {
        for (cell, labels) in self.c2e.iter_mut().enumerate() {
            if self.rows[cell].is_some() {
                *labels = SmallVec::from_elem(usize::MAX, self.kind.edges().len());
            }
        }
    }

    pub fn c2e(&self, cell: usize, cell_edge: usize) -> Option<usize> {
        let label = *self.c2e.get(cell)?.get(cell_edge)?;
        (label != usize::MAX).then_some(label)
    }

    /// Label every cell edge matching `(node0, node1)` with `edge`.
    pub fn set_edge(&mut self, node0: usize, node1: usize, edge: usize) {
        let cells: SmallVec<[usize; 16]> = self.adj.iter(node0).collect();
        for cell in cells {
            let nodes: ArrayVec<usize, MAX_NODE_PER> = self.row(cell).nodes.clone();
            for (cell_edge, &[a, b]) in self.kind.edges().iter().enumerate() {
                if (nodes[a] == node0 && nodes[b] == node1)
                    || (nodes[a] == node1 && nodes[b] == node0)
                {
                    self.c2e[cell][cell_edge] = edge;
                }
            }
        }
    }

    // --- compaction ---

    /// Rewrite node references through an old-to-new node map.
    pub fn renumber_nodes(&mut self, o2n: &[Option<usize>]) -> Result<()> {
        let mut fresh = Adjacency::new();
        for (cell, row) in self.rows.iter_mut().enumerate() {
            let Some(row) = row.as_mut() else { continue };
            for node in row.nodes.iter_mut() {
                *node = o2n[*node].ok_or(Error::Failure("cell references a removed node"))?;
            }
            for &node in &row.nodes {
                fresh.add(node, cell);
            }
        }
        self.adj = fresh;
        Ok(())
    }

    /// Drop blank rows, renumbering cells to the compact order.
    pub fn pack(&mut self) {
        let mut rows = Vec::with_capacity(self.n);
        let mut adj = Adjacency::new();
        for row in self.rows.drain(..).flatten() {
            for &node in &row.nodes {
                adj.add(node, rows.len());
            }
            rows.push(Some(row));
        }
        self.rows = rows;
        self.free.clear();
        self.adj = adj;
        self.c2e = vec![SmallVec::new(); self.rows.len()];
        for cell in 0..self.rows.len() {
            self.c2e[cell] = SmallVec::from_elem(usize::MAX, self.kind.edges().len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_remove_adjacency() {
        let mut tets = CellTable::new(CellKind::Tet);
        let cell = tets.add(&[0, 1, 2, 3], 0).unwrap();
        assert_eq!(tets.n(), 1);
        for node in 0..4 {
            assert!(tets.adj().contains(node, cell));
        }
        tets.remove(cell).unwrap();
        assert_eq!(tets.n(), 0);
        assert!(tets.adj().is_empty(0));
        assert!(tets.remove(cell).is_err());
    }

    #[test]
    fn test_arity_checked() {
        let mut tets = CellTable::new(CellKind::Tet);
        assert!(tets.add(&[0, 1, 2], 0).is_err());
    }

    #[test]
    fn test_free_list_reuse() {
        let mut tris = CellTable::new(CellKind::Tri);
        let a = tris.add(&[0, 1, 2], 10).unwrap();
        tris.add(&[1, 2, 3], 10).unwrap();
        tris.remove(a).unwrap();
        let c = tris.add(&[2, 3, 4], 20).unwrap();
        assert_eq!(c, a);
        assert_eq!(tris.id(c), 20);
    }

    #[test]
    fn test_replace_node_updates_adjacency() {
        let mut tets = CellTable::new(CellKind::Tet);
        let cell = tets.add(&[0, 1, 2, 3], 0).unwrap();
        tets.replace_node(3, 9).unwrap();
        assert_eq!(tets.nodes(cell), &[0, 1, 2, 9]);
        assert!(!tets.adj().contains(3, cell));
        assert!(tets.adj().contains(9, cell));
    }

    #[test]
    fn test_with_any_order() {
        let mut tris = CellTable::new(CellKind::Tri);
        let cell = tris.add(&[4, 7, 2], 1).unwrap();
        assert_eq!(tris.with(&[2, 4, 7]), Some(cell));
        assert_eq!(tris.with(&[2, 4, 8]), None);
    }

    #[test]
    fn test_with_face_two_tets() {
        let mut tets = CellTable::new(CellKind::Tet);
        let a = tets.add(&[0, 1, 2, 3], 0).unwrap();
        let b = tets.add(&[1, 0, 2, 4], 0).unwrap();
        let (c0, c1) = tets.with_face(&[0, 1, 2]).unwrap();
        let mut both = vec![c0.unwrap(), c1.unwrap()];
        both.sort_unstable();
        assert_eq!(both, vec![a, b]);
        let (c0, c1) = tets.with_face(&[0, 1, 3]).unwrap();
        assert_eq!(c0, Some(a));
        assert_eq!(c1, None);
    }

    #[test]
    fn test_with_face_non_manifold_rejected() {
        let mut tets = CellTable::new(CellKind::Tet);
        tets.add(&[0, 1, 2, 3], 0).unwrap();
        tets.add(&[0, 1, 2, 4], 0).unwrap();
        tets.add(&[0, 1, 2, 5], 0).unwrap();
        assert!(tets.with_face(&[0, 1, 2]).is_err());
    }

    #[test]
    fn test_list_with2_and_has_side() {
        let mut tets = CellTable::new(CellKind::Tet);
        let a = tets.add(&[0, 1, 2, 3], 0).unwrap();
        let b = tets.add(&[0, 1, 3, 4], 0).unwrap();
        tets.add(&[5, 6, 7, 8], 0).unwrap();
        let mut with = tets.list_with2(0, 1).to_vec();
        with.sort_unstable();
        assert_eq!(with, vec![a, b]);
        assert!(tets.has_side(0, 1));
        assert!(!tets.has_side(2, 4));
    }

    #[test]
    fn test_node_list_around() {
        let mut tets = CellTable::new(CellKind::Tet);
        tets.add(&[0, 1, 2, 3], 0).unwrap();
        tets.add(&[0, 1, 3, 4], 0).unwrap();
        assert_eq!(tets.node_list_around(0), vec![1, 2, 3, 4]);
        assert!(tets.node_list_around(9).is_empty());
    }

    #[test]
    fn test_edge_labels() {
        let mut tets = CellTable::new(CellKind::Tet);
        let cell = tets.add(&[0, 1, 2, 3], 0).unwrap();
        assert_eq!(tets.c2e(cell, 0), None);
        tets.set_edge(2, 0, 42);
        // (0, 2) is cell edge 1 of a tet
        assert_eq!(tets.c2e(cell, 1), Some(42));
        tets.empty_edges();
        assert_eq!(tets.c2e(cell, 1), None);
    }

    #[test]
    fn test_tet_faces_orient_outward() {
        // positive-volume tet: every face normal points away from the
        // remaining node
        let xyz = [
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
        ];
        for face in CellKind::Tet.faces() {
            let opposite: Vec<usize> =
                (0..4).filter(|node| !face.contains(node)).collect();
            let normal = crate::geometry::tri_normal(
                &xyz[face[0]],
                &xyz[face[1]],
                &xyz[face[2]],
            );
            let center = crate::geometry::tri_centroid(
                &xyz[face[0]],
                &xyz[face[1]],
                &xyz[face[2]],
            );
            let toward = crate::geometry::sub(&xyz[opposite[0]], &center);
            assert!(crate::geometry::dot(&normal, &toward) < 0.0);
        }
    }

    #[test]
    fn test_pack_and_renumber() {
        let mut tris = CellTable::new(CellKind::Tri);
        let a = tris.add(&[0, 1, 2], 1).unwrap();
        tris.add(&[1, 2, 3], 1).unwrap();
        tris.remove(a).unwrap();
        tris.pack();
        assert_eq!(tris.max(), 1);
        assert_eq!(tris.nodes(0), &[1, 2, 3]);

        // node 0 removed, the rest shift down
        let o2n = vec![None, Some(0), Some(1), Some(2)];
        tris.renumber_nodes(&o2n).unwrap();
        assert_eq!(tris.nodes(0), &[0, 1, 2]);
        assert!(tris.adj().contains(0, 0));
    }
}
