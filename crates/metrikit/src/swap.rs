//! Edge swap: reconnect the cells around an edge without moving nodes.
//!
//! Surface swaps exchange the diagonal of the two triangles sharing an
//! edge (2-2). Volume swaps reconnect the shell of tets around an edge:
//! a three-tet shell collapses to two (3-2), a two-tet shell opens to
//! three through its shared face (2-3), and the degenerate two-tet case
//! re-diagonals a flat boundary quad together with its tets (2-2).
//! Degenerate tets pressed flat against the boundary are cleaned up by
//! retriangulating their exposed faces. All variants commit only when
//! the minimum local quality strictly improves and every touched cell is
//! locally owned.

use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use tracing::info;

use crate::adapt::{AdaptParams, PassCounts};
use crate::cell::CellKind;
use crate::edge::EdgeIndex;
use crate::error::{Error, Result};
use crate::geometry;
use crate::grid::Grid;
use crate::measure::MetricMeasure;

/// One sweep of surface swaps, volume swaps and sliver cleanup.
pub fn swap_pass(grid: &mut Grid, params: &AdaptParams) -> Result<PassCounts> {
    let mut counts = PassCounts::default();

    // surface edges, each once
    let mut seen: FxHashSet<(usize, usize)> = FxHashSet::default();
    let mut surface_edges: Vec<(usize, usize)> = Vec::new();
    for (cell, _) in grid.tri().iter() {
        for (n0, n1) in grid.tri().cell_edges(cell) {
            if seen.insert((n0.min(n1), n0.max(n1))) {
                surface_edges.push((n0, n1));
            }
        }
    }
    for (n0, n1) in surface_edges {
        if grid.tri().list_with2(n0, n1).is_empty() {
            continue; // consumed by an earlier swap this pass
        }
        counts.attempted += 1;
        if surface_swap_edge(grid, params, n0, n1, &mut counts)? {
            counts.accepted += 1;
        }
    }

    // edges with a two- or three-tet shell
    let pairs: Vec<[usize; 2]> = EdgeIndex::new(grid)
        .edges()
        .map(|(_, nodes)| nodes)
        .collect();
    for [n0, n1] in pairs {
        if !grid.nodes.valid(n0) || !grid.nodes.valid(n1) {
            continue;
        }
        let shell = grid.tet().list_with2(n0, n1).len();
        if shell != 2 && shell != 3 {
            continue;
        }
        counts.attempted += 1;
        if volume_swap_edge(grid, n0, n1, &mut counts)? {
            counts.accepted += 1;
        }
    }

    // tets squeezed flat onto the boundary
    for cell in grid.tet().cells() {
        if !grid.tet().valid(cell) {
            continue;
        }
        if grid
            .tet()
            .nodes(cell)
            .iter()
            .any(|&n| !grid.nodes.owned(n))
        {
            continue;
        }
        match boundary_faces_of(grid, cell)?.as_slice() {
            [(_, id0), (_, id1)] if id0 == id1 => {
                remove_two_face_cell(grid, cell)?;
                counts.accepted += 1;
            }
            [(_, a), (_, b), (_, c)] if a == b && b == c => {
                remove_three_face_cell(grid, cell)?;
                counts.accepted += 1;
            }
            _ => {}
        }
    }

    info!(
        attempted = counts.attempted,
        accepted = counts.accepted,
        rejected_topology = counts.rejected_topology,
        rejected_quality = counts.rejected_quality,
        rejected_local = counts.rejected_local,
        "swap pass"
    );
    Ok(counts)
}

/// The opposite corners of the two triangles around `(node0, node1)`:
/// `node2` from the triangle traversing the edge forward, `node3` from
/// the one traversing it backward.
fn swap_node23(grid: &Grid, node0: usize, node1: usize) -> Result<(usize, usize)> {
    let cells = grid.tri().list_with2(node0, node1);
    if cells.len() != 2 {
        return Err(Error::Invalid("swap edge must have exactly two triangles"));
    }
    let mut node2 = None;
    let mut node3 = None;
    for &cell in &cells {
        let nodes = grid.tri().nodes(cell);
        for i in 0..3 {
            let (a, b, c) = (nodes[i], nodes[(i + 1) % 3], nodes[(i + 2) % 3]);
            if a == node0 && b == node1 {
                node2 = Some(c);
            }
            if a == node1 && b == node0 {
                node3 = Some(c);
            }
        }
    }
    match (node2, node3) {
        (Some(n2), Some(n3)) => Ok((n2, n3)),
        _ => Err(Error::Invalid("swap triangles disagree on orientation")),
    }
}

fn surface_swap_edge(
    grid: &mut Grid,
    params: &AdaptParams,
    node0: usize,
    node1: usize,
    counts: &mut PassCounts,
) -> Result<bool> {
    // an edg cell or a tri/qua junction pins the edge
    if grid.edg().has_side(node0, node1) || grid.qua().has_side(node0, node1) {
        counts.rejected_topology += 1;
        return Ok(false);
    }
    // a boundary diagonal backed by volume cells only moves through the
    // volume 2-2 swap, which keeps the tets and their faces in step
    for kind in CellKind::VOLUME {
        if !grid.cell(kind).list_with2(node0, node1).is_empty() {
            counts.rejected_topology += 1;
            return Ok(false);
        }
    }
    let cells = grid.tri().list_with2(node0, node1);
    if cells.len() != 2 {
        counts.rejected_topology += 1;
        return Ok(false);
    }
    let id0 = grid.tri().id(cells[0]);
    let id1 = grid.tri().id(cells[1]);
    if id0 != id1 {
        counts.rejected_topology += 1;
        return Ok(false);
    }
    let Ok((node2, node3)) = swap_node23(grid, node0, node1) else {
        counts.rejected_topology += 1;
        return Ok(false);
    };

    // the reconnection must be new topology
    if grid.tri().with(&[node0, node3, node2]).is_some()
        || grid.tri().with(&[node1, node2, node3]).is_some()
        || grid.tri().has_side(node2, node3)
    {
        counts.rejected_topology += 1;
        return Ok(false);
    }

    let old0: [usize; 3] = grid.tri().nodes(cells[0]).try_into().expect("tri arity");
    let old1: [usize; 3] = grid.tri().nodes(cells[1]).try_into().expect("tri arity");
    let new0 = [node0, node3, node2];
    let new1 = [node1, node2, node3];

    // normals survive within tolerance, degenerate triangles never do
    let mut normals = Vec::with_capacity(4);
    for tri in [&old0, &old1, &new0, &new1] {
        let mut normal = grid.nodes.tri_normal(tri)?;
        if geometry::normalize(&mut normal).is_err() {
            counts.rejected_normal += 1;
            return Ok(false);
        }
        normals.push(normal);
    }
    let mut min_dev = 1.0f64;
    for new_normal in &normals[2..] {
        for old_normal in &normals[..2] {
            min_dev = min_dev.min(geometry::dot(new_normal, old_normal));
        }
    }
    if min_dev < params.post_min_normdev {
        counts.rejected_normal += 1;
        return Ok(false);
    }

    // the worst triangle must improve; on a patch flat to within the
    // same-normal tolerance, holding even is acceptable
    let before = grid
        .nodes
        .tri_quality(&old0)?
        .min(grid.nodes.tri_quality(&old1)?);
    let after = grid
        .nodes
        .tri_quality(&new0)?
        .min(grid.nodes.tri_quality(&new1)?);
    let improved = after > before;
    let relaxed = after >= before && min_dev >= grid.nodes.same_normal_tol;
    if !improved && !relaxed {
        counts.rejected_quality += 1;
        return Ok(false);
    }

    for tri in [&old0, &old1] {
        if tri.iter().any(|&n| !grid.nodes.owned(n)) {
            counts.rejected_local += 1;
            grid.nodes.node_mut(node0).age += 1;
            grid.nodes.node_mut(node1).age += 1;
            return Ok(false);
        }
    }

    grid.cell_mut(CellKind::Tri).remove(cells[0])?;
    grid.cell_mut(CellKind::Tri).remove(cells[1])?;
    grid.cell_mut(CellKind::Tri).add(&new0, id0)?;
    grid.cell_mut(CellKind::Tri).add(&new1, id0)?;
    Ok(true)
}

/// Reconnect the tet shell around `(node0, node1)`: 3-2 for a closed
/// three-tet shell, 2-3 or the degenerate boundary 2-2 for a two-tet
/// shell.
fn volume_swap_edge(
    grid: &mut Grid,
    node0: usize,
    node1: usize,
    counts: &mut PassCounts,
) -> Result<bool> {
    // an edge shared with mixed elements cannot be reconnected tet-wise
    for kind in [CellKind::Pyr, CellKind::Pri, CellKind::Hex] {
        if !grid.cell(kind).list_with2(node0, node1).is_empty() {
            counts.rejected_topology += 1;
            return Ok(false);
        }
    }
    match grid.tet().list_with2(node0, node1).len() {
        2 => swap_two_tet_shell(grid, node0, node1, counts),
        3 => swap_three_tet_shell(grid, node0, node1, counts),
        _ => {
            counts.rejected_topology += 1;
            Ok(false)
        }
    }
}

/// Open a two-tet shell into three tets around the apex-to-apex edge
/// (2-3), or, when the apex-quad candidate is flat on the boundary,
/// re-diagonal the quad and its two tets in place (2-2).
fn swap_two_tet_shell(
    grid: &mut Grid,
    node0: usize,
    node1: usize,
    counts: &mut PassCounts,
) -> Result<bool> {
    let shell = grid.tet().list_with2(node0, node1);
    let [t0, t1] = shell.as_slice() else {
        counts.rejected_topology += 1;
        return Ok(false);
    };
    let side = |cell: usize| -> SmallVec<[usize; 2]> {
        grid.tet()
            .nodes(cell)
            .iter()
            .copied()
            .filter(|&n| n != node0 && n != node1)
            .collect()
    };
    let side0 = side(*t0);
    let side1 = side(*t1);
    // the tets must share one face through the edge; its third corner is
    // the ring middle, the leftover corners are the apexes
    let Some(&middle) = side0.iter().find(|&&n| side1.contains(&n)) else {
        counts.rejected_topology += 1;
        return Ok(false);
    };
    let apex0 = *side0.iter().find(|&&n| n != middle).expect("tet corners");
    let apex1 = *side1.iter().find(|&&n| n != middle).expect("tet corners");
    if apex0 == apex1 {
        counts.rejected_topology += 1;
        return Ok(false);
    }

    // candidate tets around the new apex-to-apex edge, one per directed
    // ring edge; a valid reconnection gives every candidate one sign
    let ring = [(node0, middle), (middle, node1), (node1, node0)];
    let mut candidates = [[0usize; 4]; 3];
    let mut volumes = [0.0; 3];
    for (slot, &(r0, r1)) in ring.iter().enumerate() {
        candidates[slot] = [apex0, r0, r1, apex1];
        volumes[slot] = grid.nodes.tet_vol(&candidates[slot])?;
    }
    let flat: Vec<bool> = volumes
        .iter()
        .map(|v| v.abs() <= grid.nodes.min_volume)
        .collect();
    let solid_signs: Vec<bool> = volumes
        .iter()
        .zip(&flat)
        .filter(|&(_, &f)| !f)
        .map(|(&v, _)| v > 0.0)
        .collect();
    if solid_signs.is_empty() || solid_signs.windows(2).any(|w| w[0] != w[1]) {
        counts.rejected_topology += 1;
        return Ok(false);
    }
    if !solid_signs[0] {
        for candidate in candidates.iter_mut() {
            candidate.swap(0, 1);
        }
    }

    let before = grid
        .nodes
        .tet_quality(&tet_nodes(grid, *t0))?
        .min(grid.nodes.tet_quality(&tet_nodes(grid, *t1))?);

    match (flat[0], flat[1], flat[2]) {
        // full 2-3: the new edge crosses the shared face
        (false, false, false) => {
            for candidate in &candidates {
                if grid.tet().with(candidate).is_some() {
                    counts.rejected_topology += 1;
                    return Ok(false);
                }
            }
            let mut after = f64::INFINITY;
            for candidate in &candidates {
                after = after.min(grid.nodes.tet_quality(candidate)?);
            }
            if after <= before {
                counts.rejected_quality += 1;
                return Ok(false);
            }
            if !shell_local(grid, &shell) {
                counts.rejected_local += 1;
                grid.nodes.node_mut(node0).age += 1;
                grid.nodes.node_mut(node1).age += 1;
                return Ok(false);
            }
            for &cell in &shell {
                grid.cell_mut(CellKind::Tet).remove(cell)?;
            }
            for candidate in &candidates {
                grid.cell_mut(CellKind::Tet).add(candidate, 0)?;
            }
            Ok(true)
        }
        // degenerate 2-2: the apex quad is flat on the boundary, so the
        // two tets and the two boundary triangles re-diagonal together
        (false, false, true) => {
            let survivors = [candidates[0], candidates[1]];
            let tris = grid.tri().list_with2(node0, node1);
            if tris.len() != 2 {
                counts.rejected_topology += 1;
                return Ok(false);
            }
            let id0 = grid.tri().id(tris[0]);
            if id0 != grid.tri().id(tris[1]) {
                counts.rejected_topology += 1;
                return Ok(false);
            }
            // the triangles must be the two halves of the apex quad
            let corners: SmallVec<[usize; 2]> = tris
                .iter()
                .filter_map(|&tri| {
                    grid.tri()
                        .nodes(tri)
                        .iter()
                        .copied()
                        .find(|&n| n != node0 && n != node1)
                })
                .collect();
            if !(corners.contains(&apex0) && corners.contains(&apex1))
                || grid.tri().has_side(apex0, apex1)
            {
                counts.rejected_topology += 1;
                return Ok(false);
            }

            let mut after = f64::INFINITY;
            for survivor in &survivors {
                if grid.tet().with(survivor).is_some() {
                    counts.rejected_topology += 1;
                    return Ok(false);
                }
                after = after.min(grid.nodes.tet_quality(survivor)?);
            }
            if after <= before {
                counts.rejected_quality += 1;
                return Ok(false);
            }

            let local_tris = tris.iter().all(|&tri| {
                grid.tri()
                    .nodes(tri)
                    .iter()
                    .all(|&n| grid.nodes.owned(n))
            });
            if !shell_local(grid, &shell) || !local_tris {
                counts.rejected_local += 1;
                grid.nodes.node_mut(node0).age += 1;
                grid.nodes.node_mut(node1).age += 1;
                return Ok(false);
            }

            let first: [usize; 3] = grid.tri().nodes(tris[0]).try_into().expect("tri arity");
            let mut outward = grid.nodes.tri_normal(&first)?;
            geometry::normalize(&mut outward)
                .map_err(|_| Error::Invalid("boundary triangle has zero area"))?;

            for &cell in &shell {
                grid.cell_mut(CellKind::Tet).remove(cell)?;
            }
            for survivor in &survivors {
                grid.cell_mut(CellKind::Tet).add(survivor, 0)?;
            }
            for &tri in &tris {
                grid.cell_mut(CellKind::Tri).remove(tri)?;
            }
            for mut fresh in [[apex0, apex1, node0], [apex1, apex0, node1]] {
                let mut normal = grid.nodes.tri_normal(&fresh)?;
                geometry::normalize(&mut normal)
                    .map_err(|_| Error::Invalid("swapped triangle has zero area"))?;
                if geometry::dot(&normal, &outward) < 0.0 {
                    fresh.swap(0, 1);
                }
                grid.cell_mut(CellKind::Tri).add(&fresh, id0)?;
            }
            Ok(true)
        }
        _ => {
            counts.rejected_topology += 1;
            Ok(false)
        }
    }
}

fn tet_nodes(grid: &Grid, cell: usize) -> [usize; 4] {
    grid.tet().nodes(cell).try_into().expect("tet arity")
}

fn shell_local(grid: &Grid, shell: &[usize]) -> bool {
    shell.iter().all(|&cell| {
        grid.tet()
            .nodes(cell)
            .iter()
            .all(|&n| grid.nodes.owned(n))
    })
}

/// Reconnect a closed three-tet shell around `(node0, node1)` into two
/// tets through the ring triangle.
fn swap_three_tet_shell(
    grid: &mut Grid,
    node0: usize,
    node1: usize,
    counts: &mut PassCounts,
) -> Result<bool> {
    let shell = grid.tet().list_with2(node0, node1);
    if shell.len() != 3 {
        counts.rejected_topology += 1;
        return Ok(false);
    }
    // a boundary edge has an open shell
    if grid.tri().has_side(node0, node1) {
        counts.rejected_topology += 1;
        return Ok(false);
    }
    // ring nodes must close: each appears in exactly two shell tets
    let mut ring: SmallVec<[usize; 6]> = SmallVec::new();
    for &cell in &shell {
        for &node in grid.tet().nodes(cell) {
            if node != node0 && node != node1 {
                ring.push(node);
            }
        }
    }
    ring.sort_unstable();
    if ring.len() != 6 || ring.chunks_exact(2).any(|pair| pair[0] != pair[1]) {
        counts.rejected_topology += 1;
        return Ok(false);
    }
    let ring = [ring[0], ring[2], ring[4]];

    let mut before = f64::INFINITY;
    for &cell in &shell {
        let nodes: [usize; 4] = grid.tet().nodes(cell).try_into().expect("tet arity");
        before = before.min(grid.nodes.tet_quality(&nodes)?);
    }
    let mut new0 = [ring[0], ring[1], ring[2], node0];
    if grid.nodes.tet_vol(&new0)? < 0.0 {
        new0.swap(0, 1);
    }
    let mut new1 = [ring[0], ring[1], ring[2], node1];
    if grid.nodes.tet_vol(&new1)? < 0.0 {
        new1.swap(0, 1);
    }
    let after = grid
        .nodes
        .tet_quality(&new0)?
        .min(grid.nodes.tet_quality(&new1)?);
    if after <= before {
        counts.rejected_quality += 1;
        return Ok(false);
    }

    for &cell in &shell {
        if grid
            .tet()
            .nodes(cell)
            .iter()
            .any(|&n| !grid.nodes.owned(n))
        {
            counts.rejected_local += 1;
            grid.nodes.node_mut(node0).age += 1;
            grid.nodes.node_mut(node1).age += 1;
            return Ok(false);
        }
    }

    for &cell in &shell {
        grid.cell_mut(CellKind::Tet).remove(cell)?;
    }
    grid.cell_mut(CellKind::Tet).add(&new0, 0)?;
    grid.cell_mut(CellKind::Tet).add(&new1, 0)?;
    Ok(true)
}

/// Boundary triangles matching faces of `cell`, with their face ids.
fn boundary_faces_of(grid: &Grid, cell: usize) -> Result<SmallVec<[(usize, i32); 4]>> {
    let mut found = SmallVec::new();
    for face in grid.tet().cell_faces(cell) {
        if let Some(tri) = grid.tri().with(&face) {
            found.push((tri, grid.tri().id(tri)));
        }
    }
    Ok(found)
}

/// A tet with two same-id boundary faces is a sliver standing proud of
/// the surface: delete it and expose its other two faces instead.
pub fn remove_two_face_cell(grid: &mut Grid, cell: usize) -> Result<()> {
    let faces = boundary_faces_of(grid, cell)?;
    let [(tri0, id0), (tri1, id1)] = faces.as_slice() else {
        return Err(Error::Invalid("cell does not have exactly two boundary faces"));
    };
    if id0 != id1 {
        return Err(Error::Invalid("boundary faces carry different ids"));
    }
    let keep: Vec<SmallVec<[usize; 4]>> = {
        let exposed0: Vec<usize> = grid.tri().nodes(*tri0).to_vec();
        let exposed1: Vec<usize> = grid.tri().nodes(*tri1).to_vec();
        grid.tet()
            .cell_faces(cell)
            .filter(|face| {
                crate::sort::unique(face) != crate::sort::unique(&exposed0)
                    && crate::sort::unique(face) != crate::sort::unique(&exposed1)
            })
            .collect()
    };
    let id = *id0;
    grid.cell_mut(CellKind::Tri).remove(*tri0)?;
    grid.cell_mut(CellKind::Tri).remove(*tri1)?;
    for face in keep {
        grid.cell_mut(CellKind::Tri).add(&face, id)?;
    }
    grid.cell_mut(CellKind::Tet).remove(cell)?;
    Ok(())
}

/// A tet with three same-id boundary faces is a spike: delete it, its
/// apex node, and cover the hole with the remaining face.
pub fn remove_three_face_cell(grid: &mut Grid, cell: usize) -> Result<()> {
    let faces = boundary_faces_of(grid, cell)?;
    let [(tri0, id0), (tri1, id1), (tri2, id2)] = faces.as_slice() else {
        return Err(Error::Invalid(
            "cell does not have exactly three boundary faces",
        ));
    };
    if id0 != id1 || id1 != id2 {
        return Err(Error::Invalid("boundary faces carry different ids"));
    }
    // the node common to all three exposed faces
    let apex = *grid
        .tet()
        .nodes(cell)
        .iter()
        .find(|&&node| {
            [*tri0, *tri1, *tri2]
                .iter()
                .all(|&tri| grid.tri().nodes(tri).contains(&node))
        })
        .ok_or(Error::Invalid("three boundary faces share no apex"))?;
    if grid.tet().having_node(apex).len() != 1 {
        return Err(Error::Invalid("spike apex is shared by another tet"));
    }
    let keep: SmallVec<[usize; 4]> = grid
        .tet()
        .cell_faces(cell)
        .find(|face| !face.contains(&apex))
        .ok_or(Error::Failure("tet is missing its base face"))?;
    let id = *id0;
    for &tri in [tri0, tri1, tri2] {
        grid.cell_mut(CellKind::Tri).remove(tri)?;
    }
    grid.cell_mut(CellKind::Tri).add(&keep, id)?;
    grid.cell_mut(CellKind::Tet).remove(cell)?;
    grid.nodes.remove(apex)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    fn params() -> AdaptParams {
        AdaptParams::default()
    }

    #[test]
    fn test_square_diagonal_swap() {
        let mut grid = fixtures::two_tri_square();
        let counts = swap_pass(&mut grid, &params()).unwrap();
        assert_eq!(counts.accepted, 1);
        assert!(grid.tri().has_side(0, 3));
        assert!(!grid.tri().has_side(1, 2));
        assert_eq!(grid.tri().n(), 2);
        // both new triangles keep the +z orientation
        for (_, row) in grid.tri().iter() {
            let nodes: [usize; 3] = row.nodes.as_slice().try_into().unwrap();
            assert!(grid.nodes.tri_twod_orientation(&nodes).unwrap());
        }
        grid.audit().unwrap();
    }

    #[test]
    fn test_mismatched_faceids_block_swap() {
        let mut grid = fixtures::two_tri_square();
        let second = grid.tri().cells()[1];
        let nodes = grid.tri().nodes(second).to_vec();
        grid.cell_mut(CellKind::Tri).remove(second).unwrap();
        grid.cell_mut(CellKind::Tri).add(&nodes, 2).unwrap();

        let counts = swap_pass(&mut grid, &params()).unwrap();
        assert_eq!(counts.accepted, 0);
        assert!(counts.rejected_topology > 0);
        assert!(grid.tri().has_side(1, 2));
    }

    #[test]
    fn test_swap_needs_quality_improvement() {
        // trapezoid holding the short diagonal: the long one is worse
        let mut grid = fixtures::grid_from_points(&[
            [0.0, 0.0, 0.0],
            [2.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [3.0, 1.0, 0.0],
        ]);
        grid.cell_mut(CellKind::Tri).add(&[0, 1, 2], 1).unwrap();
        grid.cell_mut(CellKind::Tri).add(&[1, 3, 2], 1).unwrap();
        let mut counts = PassCounts::default();
        let swapped = surface_swap_edge(&mut grid, &params(), 1, 2, &mut counts).unwrap();
        assert!(!swapped);
        assert!(counts.rejected_quality > 0);
        assert!(grid.tri().has_side(1, 2));
    }

    #[test]
    fn test_non_local_tri_blocks_swap() {
        let mut grid = fixtures::two_tri_square();
        grid.nodes.node_mut(3).part = 1;
        let counts = swap_pass(&mut grid, &params()).unwrap();
        assert_eq!(counts.accepted, 0);
        assert!(counts.rejected_local > 0);
        assert!(grid.nodes.node(1).age > 0);
    }

    #[test]
    fn test_volume_swap_three_to_two() {
        // three sliver tets around a short interior edge
        let mut grid = fixtures::grid_from_points(&[
            [0.0, 0.0, 0.1],
            [0.0, 0.0, -0.1],
            [1.0, 0.0, 0.0],
            [-0.5, 0.866, 0.0],
            [-0.5, -0.866, 0.0],
        ]);
        for ring in [[2, 3], [3, 4], [4, 2]] {
            let mut tet = [0, 1, ring[0], ring[1]];
            if grid.nodes.tet_vol(&tet).unwrap() < 0.0 {
                tet.swap(2, 3);
            }
            grid.cell_mut(CellKind::Tet).add(&tet, 0).unwrap();
        }
        grid.audit().unwrap();

        let counts = swap_pass(&mut grid, &params()).unwrap();
        assert_eq!(counts.accepted, 1);
        assert_eq!(grid.tet().n(), 2);
        for (_, row) in grid.tet().iter() {
            let nodes: [usize; 4] = row.nodes.as_slice().try_into().unwrap();
            assert!(grid.nodes.tet_vol(&nodes).unwrap() > 0.0);
        }
        grid.audit().unwrap();
    }

    #[test]
    fn test_volume_swap_two_to_three() {
        // two tets over an obtuse shared face, one apex close and one
        // far: opening the shell through the face beats both slivers
        let mut grid = fixtures::grid_from_points(&[
            [-1.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 0.3, 0.0],
            [0.0, 0.1, 0.15],
            [0.0, 0.1, -2.0],
        ]);
        grid.cell_mut(CellKind::Tet).add(&[0, 1, 2, 3], 0).unwrap();
        grid.cell_mut(CellKind::Tet).add(&[0, 2, 1, 4], 0).unwrap();
        grid.audit().unwrap();
        let volume_before: f64 = grid
            .tet()
            .cells()
            .iter()
            .map(|&cell| grid.nodes.tet_vol(&tet_nodes(&grid, cell)).unwrap())
            .sum();

        let mut counts = PassCounts::default();
        let swapped = volume_swap_edge(&mut grid, 0, 1, &mut counts).unwrap();
        assert!(swapped);
        assert_eq!(grid.tet().n(), 3);
        // the three new tets close a ring around the apex-to-apex edge
        assert_eq!(grid.tet().list_with2(3, 4).len(), 3);
        let volume_after: f64 = grid
            .tet()
            .cells()
            .iter()
            .map(|&cell| grid.nodes.tet_vol(&tet_nodes(&grid, cell)).unwrap())
            .sum();
        assert!((volume_after - volume_before).abs() < 1e-12);
        for cell in grid.tet().cells() {
            assert!(grid.nodes.tet_vol(&tet_nodes(&grid, cell)).unwrap() > 0.0);
        }
        grid.audit().unwrap();
    }

    #[test]
    fn test_volume_swap_two_to_two_rediagonals_boundary() {
        // two tets over a flat boundary quad holding its long diagonal;
        // the swap moves tets and boundary triangles to the short one
        let mut grid = fixtures::grid_from_points(&[
            [0.0, 0.0, 0.0],
            [2.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [3.0, 1.0, 0.0],
            [1.2, 0.5, 0.8],
        ]);
        grid.cell_mut(CellKind::Tet).add(&[0, 1, 3, 4], 0).unwrap();
        grid.cell_mut(CellKind::Tet).add(&[0, 3, 2, 4], 0).unwrap();
        grid.cell_mut(CellKind::Tri).add(&[0, 3, 1], 1).unwrap();
        grid.cell_mut(CellKind::Tri).add(&[0, 2, 3], 1).unwrap();
        grid.audit().unwrap();

        let mut counts = PassCounts::default();
        let swapped = volume_swap_edge(&mut grid, 0, 3, &mut counts).unwrap();
        assert!(swapped);
        assert_eq!(grid.tet().n(), 2);
        assert_eq!(grid.tri().n(), 2);
        assert!(grid.tri().has_side(1, 2));
        assert!(!grid.tri().has_side(0, 3));
        // the new boundary triangles stay faces of the new tets
        for (cell, row) in grid.tri().iter() {
            assert_eq!(row.id, 1);
            let (t0, _) = grid.tet().with_face(grid.tri().nodes(cell)).unwrap();
            assert!(t0.is_some());
        }
        for cell in grid.tet().cells() {
            assert!(grid.nodes.tet_vol(&tet_nodes(&grid, cell)).unwrap() > 0.0);
        }
        grid.audit().unwrap();
    }

    #[test]
    fn test_two_shell_swaps_reject_cube_configurations() {
        let mut grid = fixtures::cube_tets();

        // a cube edge: the flat candidate sits against the ring middle,
        // no valid reconnection exists
        let mut counts = PassCounts::default();
        assert!(!volume_swap_edge(&mut grid, 0, 1, &mut counts).unwrap());
        assert!(counts.rejected_topology > 0);

        // a face diagonal: the 2-2 re-diagonal is admissible but no
        // better, and ties do not move
        let mut counts = PassCounts::default();
        assert!(!volume_swap_edge(&mut grid, 0, 3, &mut counts).unwrap());
        assert!(counts.rejected_quality > 0);

        assert_eq!(grid.tet().n(), 6);
        assert_eq!(grid.tri().n(), 12);
        grid.audit().unwrap();
    }

    #[test]
    fn test_remove_two_face_cell_retriangulates() {
        let mut grid = fixtures::single_tet();
        grid.cell_mut(CellKind::Tri).add(&[0, 2, 1], 1).unwrap();
        grid.cell_mut(CellKind::Tri).add(&[0, 1, 3], 1).unwrap();
        let tet = grid.tet().cells()[0];
        remove_two_face_cell(&mut grid, tet).unwrap();
        assert_eq!(grid.tet().n(), 0);
        assert_eq!(grid.tri().n(), 2);
        for (_, row) in grid.tri().iter() {
            assert_eq!(row.id, 1);
        }
        grid.audit().unwrap();
    }

    #[test]
    fn test_remove_three_face_cell_drops_spike() {
        let mut grid = fixtures::single_tet();
        // three faces meeting at node 3
        grid.cell_mut(CellKind::Tri).add(&[0, 3, 2], 1).unwrap();
        grid.cell_mut(CellKind::Tri).add(&[0, 1, 3], 1).unwrap();
        grid.cell_mut(CellKind::Tri).add(&[1, 2, 3], 1).unwrap();
        let tet = grid.tet().cells()[0];
        remove_three_face_cell(&mut grid, tet).unwrap();
        assert_eq!(grid.tet().n(), 0);
        assert_eq!(grid.tri().n(), 1);
        assert_eq!(grid.nodes.n(), 3);
        grid.audit().unwrap();
    }
}
