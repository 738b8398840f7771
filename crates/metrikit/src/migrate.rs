//! Migration: move nodes and cells to their newly assigned owners.
//!
//! The partitioner writes a destination rank into every node; migration
//! ships node data to those destinations, replicates each cell onto
//! every rank owning one of its nodes, and prunes what no longer belongs
//! here. Additions are idempotent on globals, so a rank receiving a node
//! or cell it already holds simply keeps it.

use tracing::info;

use crate::cell::CellKind;
use crate::comm::Comm;
use crate::error::Result;
use crate::grid::Grid;
use crate::node::{Global, NodeTable};
use crate::partition::assign_new_parts;
use crate::sort;

/// Repartition by RCB and shuffle the grid to match. Collective.
pub fn migrate_to_balance(grid: &mut Grid) -> Result<()> {
    grid.nodes.synchronize_globals(&grid.comm)?;
    if !grid.comm.para() {
        return Ok(());
    }
    assign_new_parts(grid)?;
    shufflin(grid)?;
    Ok(())
}

/// Ship data to the destinations already written into `part` fields.
pub fn shufflin(grid: &mut Grid) -> Result<()> {
    shufflin_node(&grid.comm, &mut grid.nodes)?;
    for kind in CellKind::ALL {
        shufflin_cell(grid, kind)?;
    }
    prune(grid)?;
    grid.nodes.ghost_real(&grid.comm)?;
    info!(
        nodes = grid.nodes.n(),
        tets = grid.tet().n(),
        "migration settled"
    );
    Ok(())
}

/// Send every non-owned node's payload to its new owner.
fn shufflin_node(comm: &Comm, nodes: &mut NodeTable) -> Result<()> {
    let ldim = 15 + nodes.naux();
    let mut a_size = vec![0usize; comm.size()];
    for (_, node) in nodes.iter() {
        if node.part != comm.rank() {
            a_size[node.part] += 1;
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
    let mut a_global = vec![0 as Global; a_total];
    let mut a_real = vec![0.0f64; ldim * a_total];
    for (_, node) in nodes.iter() {
        if node.part == comm.rank() {
            continue;
        }
        let at = a_next[node.part];
        a_global[at] = node.global;
        let row = &mut a_real[ldim * at..ldim * (at + 1)];
        row[..3].copy_from_slice(&node.xyz);
        row[3..9].copy_from_slice(&node.metric.0);
        row[9..15].copy_from_slice(&node.log_metric.0);
        row[15..].copy_from_slice(&node.aux);
        a_next[node.part] = at + 1;
    }
    let b_global = comm.alltoallv(&a_global, &a_size, &b_size, 1)?;
    let b_real = comm.alltoallv(&a_real, &a_size, &b_size, ldim)?;

    nodes.add_many(&b_global)?;
    for (i, &global) in b_global.iter().enumerate() {
        let local = nodes.local(global).expect("just added");
        let row = &b_real[ldim * i..ldim * (i + 1)];
        let node = nodes.node_mut(local);
        node.xyz.copy_from_slice(&row[..3]);
        node.metric = crate::metric::SymTensor(row[3..9].try_into().expect("metric width"));
        node.log_metric = crate::metric::SymTensor(row[9..15].try_into().expect("metric width"));
        node.aux.clear();
        node.aux.extend_from_slice(&row[15..]);
        node.part = comm.rank();
    }
    Ok(())
}

/// Replicate each cell onto every rank that owns one of its nodes.
fn shufflin_cell(grid: &mut Grid, kind: CellKind) -> Result<()> {
    let size_per = 2 * kind.node_per() + 1;
    let (a_buf, a_size) = {
        let comm = &grid.comm;
        let table = grid.cell(kind);
        let mut a_size = vec![0usize; comm.size()];
        let mut destinations: Vec<(usize, usize)> = Vec::new();
        for (cell, row) in table.iter() {
            let parts: Vec<usize> = row.nodes.iter().map(|&n| grid.nodes.part(n)).collect();
            for &part in sort::unique(&parts).iter() {
                if part != comm.rank() {
                    a_size[part] += 1;
                    destinations.push((part, cell));
                }
            }
        }
        destinations.sort_by_key(|&(part, _)| part);
        let mut a_buf = vec![0i64; size_per * destinations.len()];
        for (at, &(_, cell)) in destinations.iter().enumerate() {
            let row = table.row(cell);
            let out = &mut a_buf[size_per * at..size_per * (at + 1)];
            for (i, &node) in row.nodes.iter().enumerate() {
                out[i] = grid.nodes.global(node);
                out[kind.node_per() + i] = grid.nodes.part(node) as i64;
            }
            out[size_per - 1] = row.id as i64;
        }
        (a_buf, a_size)
    };
    let b_size: Vec<usize> = {
        let sent: Vec<i64> = a_size.iter().map(|&n| n as i64).collect();
        grid.comm
            .alltoall(&sent)?
            .into_iter()
            .map(|n| n as usize)
            .collect()
    };
    let b_buf = grid.comm.alltoallv(&a_buf, &a_size, &b_size, size_per)?;

    let (nodes, table) = grid.nodes_and_cell_mut(kind);
    for row in b_buf.chunks_exact(size_per) {
        let mut locals = Vec::with_capacity(kind.node_per());
        for i in 0..kind.node_per() {
            let global = row[i];
            let part = row[kind.node_per() + i] as usize;
            let local = match nodes.local(global) {
                Some(local) => local,
                None => {
                    let local = nodes.add(global)?;
                    nodes.node_mut(local).part = part;
                    local
                }
            };
            locals.push(local);
        }
        if table.with(&locals).is_none() {
            table.add(&locals, row[size_per - 1] as i32)?;
        }
    }
    Ok(())
}

/// Drop cells with no locally-owned node, then nodes nothing references.
fn prune(grid: &mut Grid) -> Result<()> {
    for kind in CellKind::ALL {
        let stale: Vec<usize> = grid
            .cell(kind)
            .iter()
            .filter(|(_, row)| row.nodes.iter().all(|&n| !grid.nodes.owned(n)))
            .map(|(cell, _)| cell)
            .collect();
        let table = grid.cell_mut(kind);
        for cell in stale {
            table.remove(cell)?;
        }
    }
    let orphans: Vec<usize> = grid
        .nodes
        .iter()
        .filter(|(local, node)| {
            node.part != grid.comm.rank()
                && CellKind::ALL
                    .iter()
                    .all(|&kind| grid.cell(kind).adj().is_empty(*local))
        })
        .map(|(local, _)| local)
        .collect();
    for local in orphans {
        grid.nodes.remove_without_global(local)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measure::MetricMeasure;
    use std::thread;

    /// Rank 0 starts with the whole two-tet mesh; rank 1 starts empty.
    fn build_shared_grid(comm: Comm) -> Grid {
        let mut grid = Grid::new(comm);
        grid.nodes.initialize_n_global(5);
        if grid.comm.rank() == 0 {
            let points = [
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 0.0, 1.0],
                [0.0, 0.0, -1.0],
            ];
            for (i, &xyz) in points.iter().enumerate() {
                let local = grid.nodes.add(i as Global).unwrap();
                grid.nodes.node_mut(local).xyz = xyz;
            }
            grid.cell_mut(CellKind::Tet).add(&[0, 1, 2, 3], 0).unwrap();
            grid.cell_mut(CellKind::Tet).add(&[0, 2, 1, 4], 0).unwrap();
        }
        grid
    }

    #[test]
    fn test_migration_rebalances_two_tets() {
        let handles: Vec<_> = Comm::threads(2)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let rank = comm.rank();
                    let mut grid = build_shared_grid(comm);
                    migrate_to_balance(&mut grid).unwrap();

                    // both ranks end with work and a consistent local view
                    assert!(grid.nodes.n() > 0, "rank {rank} kept no nodes");
                    assert!(grid.tet().n() > 0, "rank {rank} kept no tets");
                    grid.audit().unwrap();

                    // every local cell can still measure itself
                    for (_, row) in grid.tet().iter() {
                        let nodes: [usize; 4] =
                            row.nodes.as_slice().try_into().unwrap();
                        grid.nodes.tet_quality(&nodes).unwrap();
                    }

                    // total owned nodes across ranks is conserved
                    let owned = grid
                        .nodes
                        .iter()
                        .filter(|(local, _)| grid.nodes.owned(*local))
                        .count() as i64;
                    let total = grid.comm.sum(&[owned]).unwrap()[0];
                    assert_eq!(total, 5);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
