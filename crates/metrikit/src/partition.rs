//! Recursive coordinate bisection.
//!
//! Tuples of (position, weight) go in, a new owning rank per tuple comes
//! out. The split axis is always the widest one and the split point is
//! the weight median, so the recursion is deterministic for a given
//! input; every rank runs the same bisection on the same gathered tuples
//! and reads off its own answers.

use ndarray as nd;
use petgraph::unionfind::UnionFind;
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::grid::Grid;
use crate::node::Global;

/// Assign `nparts` parts to weighted points, balanced by weight.
pub fn rcb_parts(points: &nd::Array2<f64>, weights: &[f64], nparts: usize) -> Vec<usize> {
    assert_eq!(points.nrows(), weights.len());
    let mut parts = vec![0; weights.len()];
    let mut order: Vec<usize> = (0..weights.len()).collect();
    bisect(points, weights, &mut order, 0, nparts, &mut parts);
    parts
}

fn bisect(
    points: &nd::Array2<f64>,
    weights: &[f64],
    order: &mut [usize],
    part0: usize,
    nparts: usize,
    parts: &mut [usize],
) {
    if nparts <= 1 || order.len() < 2 {
        for &i in order.iter() {
            parts[i] = part0;
        }
        return;
    }
    // widest axis of the bounding box
    let mut lo = [f64::INFINITY; 3];
    let mut hi = [f64::NEG_INFINITY; 3];
    for &i in order.iter() {
        for axis in 0..3 {
            lo[axis] = lo[axis].min(points[(i, axis)]);
            hi[axis] = hi[axis].max(points[(i, axis)]);
        }
    }
    let mut axis = 0;
    for candidate in 1..3 {
        if hi[candidate] - lo[candidate] > hi[axis] - lo[axis] {
            axis = candidate;
        }
    }
    order.sort_by(|&a, &b| {
        points[(a, axis)]
            .total_cmp(&points[(b, axis)])
            .then(a.cmp(&b))
    });

    let half = nparts / 2;
    let total: f64 = order.iter().map(|&i| weights[i]).sum();
    let target = total * half as f64 / nparts as f64;
    let mut below = 0.0;
    let mut cut = 0;
    while cut < order.len() && below + weights[order[cut]] <= target {
        below += weights[order[cut]];
        cut += 1;
    }
    // never hand an empty side to a non-empty part range
    cut = cut.clamp(
        usize::from(half > 0),
        order.len() - usize::from(nparts - half > 0),
    );

    let (left, right) = order.split_at_mut(cut);
    bisect(points, weights, left, part0, half, parts);
    bisect(points, weights, right, part0 + half, nparts - half, parts);
}

/// Reassign every node's owning rank by RCB over the owned nodes of all
/// ranks. For extruded-2D grids, prism columns move as one point so a
/// layer never straddles ranks. Collective.
pub fn assign_new_parts(grid: &mut Grid) -> Result<()> {
    if !grid.comm.para() {
        return Ok(());
    }

    // fuse vertical prism columns for twod grids
    let max = grid.nodes.max();
    let column_of: Vec<usize> = if grid.twod {
        let mut union: UnionFind<usize> = UnionFind::new(max);
        for (cell, _) in grid.cell(crate::cell::CellKind::Pri).iter() {
            let nodes = grid.cell(crate::cell::CellKind::Pri).nodes(cell);
            for (bottom, top) in [(0, 3), (1, 4), (2, 5)] {
                union.union(nodes[bottom], nodes[top]);
            }
        }
        (0..max).map(|node| union.find(node)).collect()
    } else {
        (0..max).collect()
    };

    // one tuple per owned column representative
    let mut rep_weight: FxHashMap<usize, f64> = FxHashMap::default();
    let mut rep_xyz: FxHashMap<usize, [f64; 3]> = FxHashMap::default();
    for (local, node) in grid.nodes.iter() {
        if node.part != grid.comm.rank() {
            continue;
        }
        let rep = column_of[local];
        let entry = rep_weight.entry(rep).or_insert(0.0);
        *entry += 1.0;
        let xyz = rep_xyz.entry(rep).or_insert([0.0; 3]);
        for (slot, value) in xyz.iter_mut().zip(node.xyz) {
            *slot += value;
        }
    }

    let mut reps: Vec<usize> = rep_weight.keys().copied().collect();
    reps.sort_unstable();
    let mut rows = Vec::with_capacity(4 * reps.len());
    let mut rep_globals = Vec::with_capacity(reps.len());
    for &rep in &reps {
        let weight = rep_weight[&rep];
        let xyz = rep_xyz[&rep];
        rows.extend([xyz[0] / weight, xyz[1] / weight, xyz[2] / weight, weight]);
        rep_globals.push(grid.nodes.global(rep));
    }

    // every rank gathers identical tuples and bisects identically
    let (all_rows, _) = grid.comm.allgatherv(&rows)?;
    let (all_globals, _) = grid.comm.allgatherv(&rep_globals)?;
    let n = all_globals.len();
    let mut points = nd::Array2::zeros((n, 3));
    let mut weights = vec![0.0; n];
    for i in 0..n {
        for axis in 0..3 {
            points[(i, axis)] = all_rows[4 * i + axis];
        }
        weights[i] = all_rows[4 * i + 3];
    }
    let parts = rcb_parts(&points, &weights, grid.comm.size());
    let assignment: FxHashMap<Global, usize> = all_globals
        .into_iter()
        .zip(parts)
        .collect();

    // owned nodes read their column's destination, ghosts ask the owner
    let mut destination = vec![0i64; max];
    for (local, node) in grid.nodes.iter() {
        if node.part == grid.comm.rank() {
            let rep_global = grid.nodes.global(column_of[local]);
            destination[local] = *assignment
                .get(&rep_global)
                .ok_or(Error::Failure("owned node missing from rcb assignment"))?
                as i64;
        }
    }
    grid.nodes.ghost(&grid.comm, &mut destination, 1)?;
    for local in grid.nodes.locals() {
        grid.nodes.node_mut(local).part = destination[local] as usize;
    }
    Ok(())
}
