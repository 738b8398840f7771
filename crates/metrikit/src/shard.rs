//! Shard mixed elements into simplices.
//!
//! Every diagonal choice keys on global node ids, so two ranks (or two
//! neighbouring cells) cutting the same quad face always agree without
//! talking to each other.

use tracing::info;

use crate::cell::CellKind;
use crate::error::{Error, Result};
use crate::grid::Grid;
use crate::node::Global;

/// Convert quads to tris and pyramids, prisms and hexes to tets.
pub fn shard_to_simplices(grid: &mut Grid) -> Result<()> {
    let before = grid.ncell_volume();

    for cell in grid.cell(CellKind::Qua).cells() {
        let nodes: [usize; 4] = grid.qua().nodes(cell).try_into().expect("qua arity");
        let id = grid.qua().id(cell);
        grid.cell_mut(CellKind::Qua).remove(cell)?;
        for tri in split_quad(&globals(grid, &nodes), &nodes) {
            grid.cell_mut(CellKind::Tri).add(&tri, id)?;
        }
    }

    for cell in grid.cell(CellKind::Pyr).cells() {
        let nodes: [usize; 5] = grid.cell(CellKind::Pyr).nodes(cell).try_into().expect("pyr arity");
        grid.cell_mut(CellKind::Pyr).remove(cell)?;
        let base: [usize; 4] = nodes[..4].try_into().expect("pyr base");
        for tri in split_quad(&globals(grid, &base), &base) {
            add_tet(grid, [tri[0], tri[1], tri[2], nodes[4]])?;
        }
    }

    for cell in grid.cell(CellKind::Pri).cells() {
        let nodes: [usize; 6] = grid.cell(CellKind::Pri).nodes(cell).try_into().expect("pri arity");
        grid.cell_mut(CellKind::Pri).remove(cell)?;
        add_pri_as_tet(grid, &nodes)?;
    }

    for cell in grid.cell(CellKind::Hex).cells() {
        let nodes: [usize; 8] = grid.cell(CellKind::Hex).nodes(cell).try_into().expect("hex arity");
        grid.cell_mut(CellKind::Hex).remove(cell)?;
        add_hex_as_tet(grid, &nodes)?;
    }

    info!(
        volume_before = before,
        volume_after = grid.ncell_volume(),
        "sharded to simplices"
    );
    Ok(())
}

fn globals<const N: usize>(grid: &Grid, nodes: &[usize; N]) -> [Global; N] {
    nodes.map(|n| grid.nodes.global(n))
}

/// Positive-volume insert; the diagonal rules fix the topology and the
/// orientation is restored per tet with the exact predicate.
fn add_tet(grid: &mut Grid, mut nodes: [usize; 4]) -> Result<()> {
    let xyz = nodes.map(|n| *grid.nodes.xyz(n));
    if crate::geometry::tet_orientation(&xyz[0], &xyz[1], &xyz[2], &xyz[3]) < 0.0 {
        nodes.swap(0, 1);
    }
    grid.cell_mut(CellKind::Tet).add(&nodes, 0)?;
    Ok(())
}

/// Cut a quad along the diagonal through its lowest-global corner.
fn split_quad(global: &[Global; 4], nodes: &[usize; 4]) -> [[usize; 3]; 2] {
    let mut corner = 0;
    for i in 1..4 {
        if global[i] < global[corner] {
            corner = i;
        }
    }
    let pick = |i: usize| nodes[(corner + i) % 4];
    [
        [pick(0), pick(1), pick(2)],
        [pick(0), pick(2), pick(3)],
    ]
}

/// The prism cut: rotate the lowest global to corner 0, peel the tet off
/// the far triangle, then cut the remaining pyramid-pair by comparing
/// the globals across the middle quad.
fn add_pri_as_tet(grid: &mut Grid, nodes: &[usize; 6]) -> Result<()> {
    let global = globals(grid, nodes);
    let mut corner = 0;
    for i in 1..6 {
        if global[i] < global[corner] {
            corner = i;
        }
    }
    // rotations of the prism taking each corner to position 0
    const ROTATIONS: [[usize; 6]; 6] = [
        [0, 1, 2, 3, 4, 5],
        [1, 2, 0, 4, 5, 3],
        [2, 0, 1, 5, 3, 4],
        [3, 5, 4, 0, 2, 1],
        [4, 3, 5, 1, 0, 2],
        [5, 4, 3, 2, 1, 0],
    ];
    let pri: [usize; 6] = ROTATIONS[corner].map(|i| nodes[i]);
    let pri_global: [Global; 6] = pri.map(|n| grid.nodes.global(n));

    add_tet(grid, [pri[0], pri[4], pri[5], pri[3]])?;
    if (pri_global[1] < pri_global[2] && pri_global[1] < pri_global[4])
        || (pri_global[5] < pri_global[2] && pri_global[5] < pri_global[4])
    {
        add_tet(grid, [pri[0], pri[1], pri[5], pri[4]])?;
        add_tet(grid, [pri[0], pri[1], pri[2], pri[5]])?;
    } else {
        add_tet(grid, [pri[2], pri[0], pri[4], pri[5]])?;
        add_tet(grid, [pri[0], pri[1], pri[2], pri[4]])?;
    }
    Ok(())
}

/// Fan the hex into six tets from its lowest-global corner: the three
/// faces away from that corner are quad-split by their own lowest
/// corner, and each half becomes a tet with the anchor.
fn add_hex_as_tet(grid: &mut Grid, nodes: &[usize; 8]) -> Result<()> {
    let global = globals(grid, nodes);
    let mut anchor = 0;
    for i in 1..8 {
        if global[i] < global[anchor] {
            anchor = i;
        }
    }
    let mut fanned = 0;
    for face in CellKind::Hex.faces() {
        if face.contains(&anchor) {
            continue;
        }
        let quad: [usize; 4] = [
            nodes[face[0]],
            nodes[face[1]],
            nodes[face[2]],
            nodes[face[3]],
        ];
        for tri in split_quad(&globals(grid, &quad), &quad) {
            add_tet(grid, [tri[0], tri[1], tri[2], nodes[anchor]])?;
        }
        fanned += 1;
    }
    if fanned != 3 {
        return Err(Error::Failure("hex corner is not on exactly three faces"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    fn total_volume(grid: &Grid) -> f64 {
        let mut volume = 0.0;
        for (_, row) in grid.tet().iter() {
            let nodes: [usize; 4] = row.nodes.as_slice().try_into().unwrap();
            volume += grid.nodes.tet_vol(&nodes).unwrap();
        }
        volume
    }

    #[test]
    fn test_prism_becomes_three_positive_tets() {
        let mut grid = fixtures::one_prism();
        shard_to_simplices(&mut grid).unwrap();
        assert_eq!(grid.cell(CellKind::Pri).n(), 0);
        assert_eq!(grid.tet().n(), 3);
        for (_, row) in grid.tet().iter() {
            let nodes: [usize; 4] = row.nodes.as_slice().try_into().unwrap();
            assert!(grid.nodes.tet_vol(&nodes).unwrap() > 0.0);
        }
        assert!((total_volume(&grid) - 0.5).abs() < 1e-12);
        grid.audit().unwrap();
    }

    #[test]
    fn test_prism_stack_shares_diagonals() {
        let mut grid = fixtures::prism_stack();
        shard_to_simplices(&mut grid).unwrap();
        assert_eq!(grid.tet().n(), 6);
        assert!((total_volume(&grid) - 1.0).abs() < 1e-12);
        // conforming: every interior face is shared by exactly two tets
        for (cell, _) in grid.tet().iter() {
            for face in grid.tet().cell_faces(cell).collect::<Vec<_>>() {
                grid.tet().with_face(&face).unwrap();
            }
        }
        grid.audit().unwrap();
    }

    #[test]
    fn test_quad_split_follows_min_global() {
        let global = [7, 3, 9, 5];
        let nodes = [10, 11, 12, 13];
        let tris = split_quad(&global, &nodes);
        // the corner with global 3 anchors both triangles, so the cut
        // runs along the (3, 5) diagonal
        for tri in tris {
            assert!(tri.contains(&11));
            assert!(tri.contains(&13));
        }
    }

    #[test]
    fn test_hex_becomes_six_tets() {
        let mut grid = fixtures::grid_from_points(&[
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [1.0, 0.0, 1.0],
            [1.0, 1.0, 1.0],
            [0.0, 1.0, 1.0],
        ]);
        grid.cell_mut(CellKind::Hex)
            .add(&[0, 1, 2, 3, 4, 5, 6, 7], 0)
            .unwrap();
        shard_to_simplices(&mut grid).unwrap();
        assert_eq!(grid.cell(CellKind::Hex).n(), 0);
        assert_eq!(grid.tet().n(), 6);
        assert!((total_volume(&grid) - 1.0).abs() < 1e-12);
        grid.audit().unwrap();
    }

    #[test]
    fn test_pyramid_becomes_two_tets() {
        let mut grid = fixtures::grid_from_points(&[
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.5, 0.5, 1.0],
        ]);
        grid.cell_mut(CellKind::Pyr)
            .add(&[0, 1, 2, 3, 4], 0)
            .unwrap();
        shard_to_simplices(&mut grid).unwrap();
        assert_eq!(grid.cell(CellKind::Pyr).n(), 0);
        assert_eq!(grid.tet().n(), 2);
        assert!((total_volume(&grid) - 1.0 / 3.0).abs() < 1e-12);
        grid.audit().unwrap();
    }

    #[test]
    fn test_quad_boundary_becomes_tris() {
        let mut grid = fixtures::grid_from_points(&[
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
        ]);
        grid.cell_mut(CellKind::Qua).add(&[0, 1, 2, 3], 7).unwrap();
        shard_to_simplices(&mut grid).unwrap();
        assert_eq!(grid.qua().n(), 0);
        assert_eq!(grid.tri().n(), 2);
        for (_, row) in grid.tri().iter() {
            assert_eq!(row.id, 7);
        }
    }
}
