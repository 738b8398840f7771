//! Assemble the distributed mesh into one serial image, and scatter an
//! image back out over ranks.
//!
//! Nodes are gathered in global-id chunks through a sum reduction: every
//! rank contributes its owned rows plus a one-mask, so a dropped or
//! doubly-owned node shows up immediately in the mask. Cells are
//! gathered rank-major, each emitted exactly once by the rank owning its
//! first node.

use ndarray as nd;

use crate::cell::CellKind;
use crate::comm::Comm;
use crate::error::{Error, Result};
use crate::grid::Grid;
use crate::node::Global;

/// Serial image of a whole mesh, cells as 0-based global ids.
///
/// The vertex-to-CAD association lists and the byte flow are carried
/// verbatim for files that hold them; their semantic consumer is the
/// CAD layer behind the opaque projection callback, so scattering into
/// a grid drops them and gathering a grid leaves them empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatheredMesh {
    pub xyz: nd::Array2<f64>,
    pub metric: Option<nd::Array2<f64>>,
    pub tri: Vec<([Global; 3], i32)>,
    pub qua: Vec<([Global; 4], i32)>,
    pub edg: Vec<([Global; 2], i32)>,
    pub tet: Vec<[Global; 4]>,
    pub pyr: Vec<[Global; 5]>,
    pub pri: Vec<[Global; 6]>,
    pub hex: Vec<[Global; 8]>,
    /// Vertices pinned to geometry nodes, edges (curve parameter) and
    /// faces (surface uv pair).
    pub geom_node: Vec<(Global, i32)>,
    pub geom_edge: Vec<(Global, i32, f64)>,
    pub geom_face: Vec<(Global, i32, [f64; 2])>,
    /// Opaque CAD model bytes embedded next to the mesh.
    pub byte_flow: Vec<u8>,
}

impl GatheredMesh {
    pub fn nnode(&self) -> usize {
        self.xyz.nrows()
    }
}

fn gather_node_block(grid: &Grid, ldim: usize, fill: impl Fn(usize, &mut [f64])) -> Result<nd::Array2<f64>> {
    let nnode = grid.nodes.n_global() as usize;
    let mut out = nd::Array2::zeros((nnode, ldim));
    let chunk = nnode / grid.comm.size() + 1;
    let mut first = 0;
    while first < nnode {
        let n = chunk.min(nnode - first);
        // owned rows carry data plus a one-mask, the rest stay zero
        let mut local = vec![0.0f64; (ldim + 1) * n];
        for i in 0..n {
            let global = (first + i) as Global;
            if let Some(node) = grid.nodes.local(global) {
                if grid.nodes.owned(node) {
                    let row = &mut local[(ldim + 1) * i..(ldim + 1) * (i + 1)];
                    fill(node, &mut row[..ldim]);
                    row[ldim] = 1.0;
                }
            }
        }
        let summed = grid.comm.sum(&local)?;
        for i in 0..n {
            let row = &summed[(ldim + 1) * i..(ldim + 1) * (i + 1)];
            if (row[ldim] - 1.0).abs() > 0.1 {
                return Err(Error::Failure("node owned by zero or several ranks"));
            }
            for j in 0..ldim {
                out[(first + i, j)] = row[j];
            }
        }
        first += n;
    }
    Ok(out)
}

fn owns_cell(grid: &Grid, kind: CellKind, cell: usize) -> bool {
    grid.nodes.part(grid.cell(kind).nodes(cell)[0]) == grid.comm.rank()
}

fn gather_cells(grid: &Grid, kind: CellKind) -> Result<Vec<(Vec<Global>, i32)>> {
    let size_per = kind.node_per() + 1;
    let mut rows = Vec::new();
    for (cell, row) in grid.cell(kind).iter() {
        if !owns_cell(grid, kind, cell) {
            continue;
        }
        for &node in &row.nodes {
            rows.push(grid.nodes.global(node));
        }
        rows.push(row.id as Global);
    }
    let (all, _) = grid.comm.allgatherv(&rows)?;
    Ok(all
        .chunks_exact(size_per)
        .map(|chunk| (chunk[..kind.node_per()].to_vec(), chunk[kind.node_per()] as i32))
        .collect())
}

/// Gather the whole mesh; every rank ends with the same image.
pub fn gather_mesh(grid: &mut Grid) -> Result<GatheredMesh> {
    grid.nodes.synchronize_globals(&grid.comm)?;
    let xyz = gather_node_block(grid, 3, |node, row| {
        row.copy_from_slice(grid.nodes.xyz(node));
    })?;
    let metric = gather_node_block(grid, 6, |node, row| {
        row.copy_from_slice(&grid.nodes.metric(node).0);
    })?;

    let mut image = GatheredMesh {
        xyz,
        metric: Some(metric),
        ..GatheredMesh::default()
    };
    for (nodes, id) in gather_cells(grid, CellKind::Tri)? {
        image.tri.push((nodes.try_into().expect("tri arity"), id));
    }
    for (nodes, id) in gather_cells(grid, CellKind::Qua)? {
        image.qua.push((nodes.try_into().expect("qua arity"), id));
    }
    for (nodes, id) in gather_cells(grid, CellKind::Edg)? {
        image.edg.push((nodes.try_into().expect("edg arity"), id));
    }
    for (nodes, _) in gather_cells(grid, CellKind::Tet)? {
        image.tet.push(nodes.try_into().expect("tet arity"));
    }
    for (nodes, _) in gather_cells(grid, CellKind::Pyr)? {
        image.pyr.push(nodes.try_into().expect("pyr arity"));
    }
    for (nodes, _) in gather_cells(grid, CellKind::Pri)? {
        image.pri.push(nodes.try_into().expect("pri arity"));
    }
    for (nodes, _) in gather_cells(grid, CellKind::Hex)? {
        image.hex.push(nodes.try_into().expect("hex arity"));
    }
    Ok(image)
}

/// Gather only the metric field, one six-component row per global node.
pub fn gather_metric(grid: &mut Grid) -> Result<nd::Array2<f64>> {
    grid.nodes.synchronize_globals(&grid.comm)?;
    gather_node_block(grid, 6, |node, row| {
        row.copy_from_slice(&grid.nodes.metric(node).0);
    })
}

/// The contiguous-slice owner of a global id when scattering `nnode`
/// nodes over `size` ranks.
pub fn scatter_part(global: Global, nnode: usize, size: usize) -> usize {
    let chunk = nnode.div_ceil(size);
    ((global as usize) / chunk).min(size - 1)
}

/// Distribute an image: each rank keeps its node slice, every cell with
/// a node in the slice, and ghost copies of the rest of those cells.
pub fn scatter_mesh(comm: Comm, image: &GatheredMesh) -> Result<Grid> {
    let nnode = image.nnode();
    let size = comm.size();
    let rank = comm.rank();
    let mut grid = Grid::new(comm);
    grid.nodes.initialize_n_global(nnode as Global);

    let mut keep: Vec<Global> = (0..nnode as Global)
        .filter(|&g| scatter_part(g, nnode, size) == rank)
        .collect();
    let keep_cell = |nodes: &[Global]| -> bool {
        nodes
            .iter()
            .any(|&g| scatter_part(g, nnode, size) == rank)
    };
    macro_rules! collect_kind {
        ($rows:expr, $extract:expr) => {
            for row in $rows {
                let nodes: &[Global] = $extract(row);
                if keep_cell(nodes) {
                    keep.extend_from_slice(nodes);
                }
            }
        };
    }
    fn extract3(r: &([Global; 3], i32)) -> &[Global] {
        &r.0[..]
    }
    fn extract4t(r: &([Global; 4], i32)) -> &[Global] {
        &r.0[..]
    }
    fn extract2(r: &([Global; 2], i32)) -> &[Global] {
        &r.0[..]
    }
    fn extract4(r: &[Global; 4]) -> &[Global] {
        &r[..]
    }
    fn extract5(r: &[Global; 5]) -> &[Global] {
        &r[..]
    }
    fn extract6(r: &[Global; 6]) -> &[Global] {
        &r[..]
    }
    fn extract8(r: &[Global; 8]) -> &[Global] {
        &r[..]
    }
    collect_kind!(&image.tri, extract3);
    collect_kind!(&image.qua, extract4t);
    collect_kind!(&image.edg, extract2);
    collect_kind!(&image.tet, extract4);
    collect_kind!(&image.pyr, extract5);
    collect_kind!(&image.pri, extract6);
    collect_kind!(&image.hex, extract8);

    keep.sort_unstable();
    keep.dedup();
    for &global in &keep {
        let local = grid.nodes.add(global)?;
        grid.nodes.node_mut(local).part = scatter_part(global, nnode, size);
        let mut xyz = [0.0; 3];
        for i in 0..3 {
            xyz[i] = image.xyz[(global as usize, i)];
        }
        grid.nodes.node_mut(local).xyz = xyz;
        if let Some(metric) = &image.metric {
            let mut m = [0.0; 6];
            for i in 0..6 {
                m[i] = metric[(global as usize, i)];
            }
            grid.nodes.metric_set(local, crate::metric::SymTensor(m))?;
        }
    }

    let locals = |grid: &Grid, nodes: &[Global]| -> Vec<usize> {
        nodes
            .iter()
            .map(|&g| grid.nodes.local(g).expect("kept above"))
            .collect()
    };
    for (nodes, id) in &image.tri {
        if keep_cell(nodes) {
            let cells = locals(&grid, nodes);
            grid.cell_mut(CellKind::Tri).add(&cells, *id)?;
        }
    }
    for (nodes, id) in &image.qua {
        if keep_cell(nodes) {
            let cells = locals(&grid, nodes);
            grid.cell_mut(CellKind::Qua).add(&cells, *id)?;
        }
    }
    for (nodes, id) in &image.edg {
        if keep_cell(nodes) {
            let cells = locals(&grid, nodes);
            grid.cell_mut(CellKind::Edg).add(&cells, *id)?;
        }
    }
    for nodes in &image.tet {
        if keep_cell(nodes) {
            let cells = locals(&grid, nodes);
            grid.cell_mut(CellKind::Tet).add(&cells, 0)?;
        }
    }
    for nodes in &image.pyr {
        if keep_cell(nodes) {
            let cells = locals(&grid, nodes);
            grid.cell_mut(CellKind::Pyr).add(&cells, 0)?;
        }
    }
    for nodes in &image.pri {
        if keep_cell(nodes) {
            let cells = locals(&grid, nodes);
            grid.cell_mut(CellKind::Pri).add(&cells, 0)?;
        }
    }
    for nodes in &image.hex {
        if keep_cell(nodes) {
            let cells = locals(&grid, nodes);
            grid.cell_mut(CellKind::Hex).add(&cells, 0)?;
        }
    }
    Ok(grid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use std::thread;

    #[test]
    fn test_gather_solo_cube() {
        let mut grid = fixtures::cube_tets();
        let image = gather_mesh(&mut grid).unwrap();
        assert_eq!(image.nnode(), 8);
        assert_eq!(image.tet.len(), 6);
        assert_eq!(image.tri.len(), 12);
        assert!(image.pyr.is_empty());
        // globals are dense, coordinates land in global order
        assert_eq!(image.xyz[(7, 0)], 1.0);
        assert_eq!(image.xyz[(7, 2)], 1.0);
    }

    #[test]
    fn test_scatter_then_gather_round_trip() {
        let image = {
            let mut grid = fixtures::cube_tets();
            gather_mesh(&mut grid).unwrap()
        };
        let expected = image.clone();
        let handles: Vec<_> = Comm::threads(2)
            .into_iter()
            .map(move |comm| {
                let image = image.clone();
                thread::spawn(move || {
                    let mut grid = scatter_mesh(comm, &image).unwrap();
                    grid.audit().unwrap();
                    assert!(grid.tet().n() > 0);
                    gather_mesh(&mut grid).unwrap()
                })
            })
            .collect();
        for handle in handles {
            let round = handle.join().unwrap();
            assert_eq!(round.nnode(), expected.nnode());
            assert_eq!(round.xyz, expected.xyz);
            let mut tets = round.tet.clone();
            tets.sort_unstable();
            let mut expected_tets = expected.tet.clone();
            expected_tets.sort_unstable();
            assert_eq!(tets, expected_tets);
            let mut tris = round.tri.clone();
            tris.sort_unstable();
            let mut expected_tris = expected.tri.clone();
            expected_tris.sort_unstable();
            assert_eq!(tris, expected_tris);
        }
    }

    #[test]
    fn test_scatter_part_covers_all_ranks() {
        let nnode = 10;
        for size in 1..5 {
            let parts: Vec<usize> = (0..nnode as Global)
                .map(|g| scatter_part(g, nnode, size))
                .collect();
            assert!(parts.iter().all(|&p| p < size));
            for rank in 0..size {
                assert!(parts.contains(&rank));
            }
            // contiguous slices
            for window in parts.windows(2) {
                assert!(window[1] == window[0] || window[1] == window[0] + 1);
            }
        }
    }
}
