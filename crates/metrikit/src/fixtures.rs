//! Canonical little grids for tests and examples.

use crate::cell::CellKind;
use crate::comm::Comm;
use crate::error::Result;
use crate::grid::Grid;
use crate::node::Global;

/// Solo-rank grid over `points`, all nodes owned locally with dense
/// globals in point order.
pub fn grid_from_points(points: &[[f64; 3]]) -> Grid {
    let mut grid = Grid::new(Comm::solo());
    for (i, &xyz) in points.iter().enumerate() {
        let local = grid.nodes.add(i as Global).expect("fresh global");
        grid.nodes.node_mut(local).xyz = xyz;
    }
    grid.nodes.initialize_n_global(points.len() as Global);
    grid
}

fn add_cells(grid: &mut Grid, kind: CellKind, cells: &[&[usize]], id: i32) -> Result<()> {
    for nodes in cells {
        grid.cell_mut(kind).add(nodes, id)?;
    }
    Ok(())
}

/// The unit right tet (0,0,0), (1,0,0), (0,1,0), (0,0,1).
pub fn single_tet() -> Grid {
    let mut grid = grid_from_points(&[
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
    ]);
    add_cells(&mut grid, CellKind::Tet, &[&[0, 1, 2, 3]], 0).expect("fixture");
    grid
}

/// Edge-length-one regular tet; unit quality and unit ratios under the
/// identity metric.
pub fn regular_tet() -> Grid {
    let s3 = 3.0f64.sqrt();
    let s6 = 6.0f64.sqrt();
    let mut grid = grid_from_points(&[
        [s3 / 3.0, 0.0, 0.0],
        [-s3 / 6.0, 0.5, 0.0],
        [-s3 / 6.0, -0.5, 0.0],
        [0.0, 0.0, s6 / 3.0],
    ]);
    add_cells(&mut grid, CellKind::Tet, &[&[0, 1, 2, 3]], 0).expect("fixture");
    grid
}

/// Single tet with all four boundary triangles, face ids 1 to 4, oriented
/// outward.
pub fn tet_with_boundary() -> Grid {
    let mut grid = single_tet();
    let faces: [&[usize]; 4] = [&[1, 2, 3], &[0, 3, 2], &[0, 1, 3], &[0, 2, 1]];
    for (i, face) in faces.iter().enumerate() {
        grid.cell_mut(CellKind::Tri)
            .add(face, (i + 1) as i32)
            .expect("fixture");
    }
    grid
}

/// Two tets sharing the face (0, 1, 2), apexes above and below.
pub fn two_tets() -> Grid {
    let mut grid = grid_from_points(&[
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
        [0.0, 0.0, -1.0],
    ]);
    add_cells(
        &mut grid,
        CellKind::Tet,
        &[&[0, 1, 2, 3], &[0, 2, 1, 4]],
        0,
    )
    .expect("fixture");
    grid
}

/// Planar patch of two triangles on face id 1, sharing edge (0, 2).
/// Node 2 sits close to node 0, so the shared edge is the shortest one
/// at node 2.
pub fn two_tri_patch() -> Grid {
    let mut grid = grid_from_points(&[
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.1, 0.1, 0.0],
        [0.0, 1.0, 0.0],
    ]);
    add_cells(&mut grid, CellKind::Tri, &[&[0, 1, 2], &[0, 2, 3]], 1).expect("fixture");
    grid
}

/// Two right triangles sharing the diagonal (1, 2) of the unit square,
/// both on face id 1.
pub fn two_tri_square() -> Grid {
    let mut grid = grid_from_points(&[
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [1.0, 1.0, 0.0],
    ]);
    add_cells(&mut grid, CellKind::Tri, &[&[0, 1, 2], &[1, 3, 2]], 1).expect("fixture");
    grid
}

/// One prism extruded in z.
pub fn one_prism() -> Grid {
    let mut grid = grid_from_points(&[
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
        [1.0, 0.0, 1.0],
        [0.0, 1.0, 1.0],
    ]);
    add_cells(&mut grid, CellKind::Pri, &[&[0, 1, 2, 3, 4, 5]], 0).expect("fixture");
    grid
}

/// Two prisms stacked in z sharing the middle triangle.
pub fn prism_stack() -> Grid {
    let mut grid = grid_from_points(&[
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
        [1.0, 0.0, 1.0],
        [0.0, 1.0, 1.0],
        [0.0, 0.0, 2.0],
        [1.0, 0.0, 2.0],
        [0.0, 1.0, 2.0],
    ]);
    add_cells(
        &mut grid,
        CellKind::Pri,
        &[&[0, 1, 2, 3, 4, 5], &[3, 4, 5, 6, 7, 8]],
        0,
    )
    .expect("fixture");
    grid.twod = true;
    grid
}

/// Unit cube cut into six tets around the 0-7 diagonal, with all twelve
/// boundary triangles tagged per cube face (x=0 is 1, x=1 is 2, y=0 is 3,
/// y=1 is 4, z=0 is 5, z=1 is 6).
pub fn cube_tets() -> Grid {
    let points: Vec<[f64; 3]> = (0..8)
        .map(|i| {
            [
                (i & 1) as f64,
                ((i >> 1) & 1) as f64,
                ((i >> 2) & 1) as f64,
            ]
        })
        .collect();
    let mut grid = grid_from_points(&points);
    add_cells(
        &mut grid,
        CellKind::Tet,
        &[
            &[0, 1, 3, 7],
            &[0, 3, 2, 7],
            &[0, 2, 6, 7],
            &[0, 6, 4, 7],
            &[0, 4, 5, 7],
            &[0, 5, 1, 7],
        ],
        0,
    )
    .expect("fixture");
    let tris: [(&[usize], i32); 12] = [
        (&[0, 2, 6], 1),
        (&[0, 6, 4], 1),
        (&[1, 3, 7], 2),
        (&[1, 7, 5], 2),
        (&[0, 1, 5], 3),
        (&[0, 5, 4], 3),
        (&[2, 3, 7], 4),
        (&[2, 7, 6], 4),
        (&[0, 1, 3], 5),
        (&[0, 3, 2], 5),
        (&[4, 5, 7], 6),
        (&[4, 7, 6], 6),
    ];
    for (nodes, id) in tris {
        grid.cell_mut(CellKind::Tri).add(nodes, id).expect("fixture");
    }
    grid.orient_outward().expect("fixture");
    grid
}

/// [`cube_tets`] with the tet (0,1,3,7) split four ways at its centroid,
/// leaving node 8 interior.
pub fn cube_with_center() -> Grid {
    let mut grid = cube_tets();
    let tet0 = grid.tet().with(&[0, 1, 3, 7]).expect("fixture");
    let corners: [usize; 4] = grid.tet().nodes(tet0).try_into().expect("tet arity");
    let global = grid.nodes.next_global();
    let center = grid.nodes.add(global).expect("fixture");
    let mut xyz = [0.0; 3];
    for &corner in &corners {
        for (slot, value) in xyz.iter_mut().zip(grid.nodes.xyz(corner)) {
            *slot += value / 4.0;
        }
    }
    grid.nodes.node_mut(center).xyz = xyz;
    grid.cell_mut(CellKind::Tet).remove(tet0).expect("fixture");
    for face in 0..4 {
        let mut child = corners;
        child[face] = center;
        if grid.nodes.tet_vol(&child).expect("fixture") < 0.0 {
            child.swap(0, 1);
        }
        grid.cell_mut(CellKind::Tet).add(&child, 0).expect("fixture");
    }
    grid
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_with_center_volumes_positive() {
        let grid = cube_with_center();
        assert_eq!(grid.tet().n(), 9);
        assert_eq!(grid.nodes.n(), 9);
        for (_, row) in grid.tet().iter() {
            let nodes: [usize; 4] = row.nodes.as_slice().try_into().unwrap();
            assert!(grid.nodes.tet_vol(&nodes).unwrap() > 0.0);
        }
        grid.audit().unwrap();
    }

    #[test]
    fn test_fixtures_pass_audit() {
        for grid in [
            single_tet(),
            regular_tet(),
            tet_with_boundary(),
            two_tets(),
            two_tri_patch(),
            two_tri_square(),
            one_prism(),
            prism_stack(),
            cube_tets(),
        ] {
            grid.audit().unwrap();
        }
    }

    #[test]
    fn test_cube_tets_fill_the_cube() {
        let grid = cube_tets();
        let mut volume = 0.0;
        for (_, row) in grid.tet().iter() {
            let nodes: [usize; 4] = row.nodes.as_slice().try_into().unwrap();
            let vol = grid.nodes.tet_vol(&nodes).unwrap();
            assert!(vol > 0.0);
            volume += vol;
        }
        assert!((volume - 1.0).abs() < 1e-12);
        assert_eq!(grid.tri().n(), 12);
    }

    #[test]
    fn test_two_tets_positive() {
        let grid = two_tets();
        for (_, row) in grid.tet().iter() {
            let nodes: [usize; 4] = row.nodes.as_slice().try_into().unwrap();
            assert!(grid.nodes.tet_vol(&nodes).unwrap() > 0.0);
        }
    }
}
