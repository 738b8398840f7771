//! Unique undirected edge enumeration.
//!
//! Built on demand from the union of all volume cells; any topology
//! change invalidates the index, and passes rebuild it at their start.
//! Building also labels every cell edge with its global edge id (the c2e
//! cache), so sweeps can go from a cell edge to edge data in O(1).

use rustc_hash::FxHashMap;

use crate::adjacency::Adjacency;
use crate::cell::CellKind;
use crate::comm::{Comm, Word};
use crate::error::{Error, Result};
use crate::grid::Grid;
use crate::node::NodeTable;

#[derive(Debug)]
pub struct EdgeIndex {
    e2n: Vec<[usize; 2]>,
    adj: Adjacency,
}

impl EdgeIndex {
    /// Enumerate edges and label the volume cell tables.
    pub fn new(grid: &mut Grid) -> Self {
        let mut unique: FxHashMap<(usize, usize), usize> = FxHashMap::default();
        let mut e2n: Vec<[usize; 2]> = Vec::new();
        for kind in CellKind::VOLUME {
            grid.cell_mut(kind).empty_edges();
        }
        for kind in CellKind::VOLUME {
            let pairs: Vec<(usize, usize)> = grid
                .cell(kind)
                .iter()
                .flat_map(|(cell, _)| grid.cell(kind).cell_edges(cell))
                .collect();
            for (n0, n1) in pairs {
                let key = (n0.min(n1), n0.max(n1));
                if unique.contains_key(&key) {
                    continue;
                }
                let edge = e2n.len();
                unique.insert(key, edge);
                e2n.push([n0, n1]);
                for kind2 in CellKind::VOLUME {
                    grid.cell_mut(kind2).set_edge(n0, n1, edge);
                }
            }
        }
        let mut adj = Adjacency::new();
        for (edge, &[n0, n1]) in e2n.iter().enumerate() {
            adj.add(n0, edge);
            adj.add(n1, edge);
        }
        Self { e2n, adj }
    }

    pub fn n(&self) -> usize {
        self.e2n.len()
    }

    pub fn nodes(&self, edge: usize) -> [usize; 2] {
        self.e2n[edge]
    }

    pub fn edges(&self) -> impl Iterator<Item = (usize, [usize; 2])> + '_ {
        self.e2n.iter().copied().enumerate()
    }

    /// Edge id joining `node0` and `node1`, either direction.
    pub fn with(&self, node0: usize, node1: usize) -> Option<usize> {
        self.adj.iter(node0).find(|&edge| {
            let [a, b] = self.e2n[edge];
            (a == node0 && b == node1) || (a == node1 && b == node0)
        })
    }

    pub fn having_node(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.adj.iter(node)
    }

    /// The rank owning an edge: the owner of its lowest-global endpoint.
    pub fn part(&self, nodes: &NodeTable, edge: usize) -> usize {
        let [n0, n1] = self.e2n[edge];
        if nodes.global(n0) < nodes.global(n1) {
            nodes.part(n0)
        } else {
            nodes.part(n1)
        }
    }

    /// Overwrite non-owned rows of per-edge `data` (ldim per edge) with
    /// the owner's values. Requests travel as endpoint global pairs since
    /// edge ids are rank-local.
    pub fn ghost<T: Word>(
        &self,
        comm: &Comm,
        nodes: &NodeTable,
        data: &mut [T],
        ldim: usize,
    ) -> Result<()> {
        if !comm.para() {
            return Ok(());
        }
        if data.len() < ldim * self.n() {
            return Err(Error::IncreaseLimit("edge data shorter than ldim*n"));
        }
        let mut a_size = vec![0usize; comm.size()];
        for (edge, _) in self.edges() {
            let part = self.part(nodes, edge);
            if part != comm.rank() {
                a_size[part] += 1;
            }
        }
        let b_size: Vec<usize> = {
            let sent: Vec<i64> = a_size.iter().map(|&n| n as i64).collect();
            comm.alltoall(&sent)?.into_iter().map(|n| n as usize).collect()
        };
        let mut a_next = vec![0usize; comm.size()];
        for part in 1..comm.size() {
            a_next[part] = a_next[part - 1] + a_size[part - 1];
        }
        let a_total: usize = a_size.iter().sum();
        let mut a_globals = vec![0i64; 2 * a_total];
        let mut a_edges = vec![0usize; a_total];
        for (edge, [n0, n1]) in self.edges() {
            let part = self.part(nodes, edge);
            if part != comm.rank() {
                let at = a_next[part];
                a_globals[2 * at] = nodes.global(n0);
                a_globals[1 + 2 * at] = nodes.global(n1);
                a_edges[at] = edge;
                a_next[part] = at + 1;
            }
        }
        let b_globals = comm.alltoallv(&a_globals, &a_size, &b_size, 2)?;
        let b_total: usize = b_size.iter().sum();
        let mut b_data = vec![T::default(); ldim * b_total];
        for (row, pair) in b_globals.chunks_exact(2).enumerate() {
            let n0 = nodes
                .local(pair[0])
                .ok_or(Error::Failure("edge ghost request for unknown global"))?;
            let n1 = nodes
                .local(pair[1])
                .ok_or(Error::Failure("edge ghost request for unknown global"))?;
            let edge = self
                .with(n0, n1)
                .ok_or(Error::Failure("owner is missing a ghosted edge"))?;
            b_data[ldim * row..ldim * (row + 1)]
                .copy_from_slice(&data[ldim * edge..ldim * (edge + 1)]);
        }
        let a_data = comm.alltoallv(&b_data, &b_size, &a_size, ldim)?;
        for (row, &edge) in a_edges.iter().enumerate() {
            data[ldim * edge..ldim * (edge + 1)]
                .copy_from_slice(&a_data[ldim * row..ldim * (row + 1)]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn test_single_tet_has_six_edges() {
        let mut grid = fixtures::single_tet();
        let edges = EdgeIndex::new(&mut grid);
        assert_eq!(edges.n(), 6);
        for (a, b) in [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)] {
            assert!(edges.with(a, b).is_some());
            assert!(edges.with(b, a).is_some());
        }
        assert!(edges.with(0, 0).is_none());
    }

    #[test]
    fn test_shared_face_edges_counted_once() {
        let mut grid = fixtures::two_tets();
        let edges = EdgeIndex::new(&mut grid);
        // 5 nodes, two tets sharing a face: 6 + 6 - 3 shared
        assert_eq!(edges.n(), 9);
    }

    #[test]
    fn test_c2e_labels_match_index() {
        let mut grid = fixtures::two_tets();
        let edges = EdgeIndex::new(&mut grid);
        let tets = grid.tet();
        for (cell, _) in tets.iter() {
            for (cell_edge, (n0, n1)) in tets.cell_edges(cell).enumerate() {
                let label = tets.c2e(cell, cell_edge).expect("labelled");
                assert_eq!(edges.with(n0, n1), Some(label));
            }
        }
    }

    #[test]
    fn test_having_node() {
        let mut grid = fixtures::single_tet();
        let edges = EdgeIndex::new(&mut grid);
        assert_eq!(edges.having_node(0).count(), 3);
    }

    #[test]
    fn test_prism_edges() {
        let mut grid = fixtures::one_prism();
        let edges = EdgeIndex::new(&mut grid);
        assert_eq!(edges.n(), 9);
    }

    #[test]
    fn test_edge_ghost_fetches_owner_data() {
        let handles: Vec<_> = Comm::threads(2)
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    // identical tet on both ranks, nodes 0,1 owned by rank
                    // 0 and nodes 2,3 by rank 1
                    let mut grid = crate::grid::Grid::new(comm);
                    for global in 0..4 {
                        let local = grid.nodes.add(global).unwrap();
                        grid.nodes.node_mut(local).part = if global < 2 { 0 } else { 1 };
                    }
                    grid.nodes.initialize_n_global(4);
                    grid.cell_mut(crate::cell::CellKind::Tet)
                        .add(&[0, 1, 2, 3], 0)
                        .unwrap();
                    let edges = EdgeIndex::new(&mut grid);

                    let mut data = vec![0i64; edges.n()];
                    for (edge, _) in edges.edges() {
                        let part = edges.part(&grid.nodes, edge);
                        if part == grid.comm.rank() {
                            data[edge] = part as i64 + 10;
                        }
                    }
                    edges.ghost(&grid.comm, &grid.nodes, &mut data, 1).unwrap();
                    for (edge, _) in edges.edges() {
                        let part = edges.part(&grid.nodes, edge) as i64;
                        assert_eq!(data[edge], part + 10);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
