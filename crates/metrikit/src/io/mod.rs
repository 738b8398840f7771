//! Mesh and metric file I/O.
//!
//! Formats are dispatched by extension: `.lb8.ugrid` / `.b8.ugrid` for
//! the unformatted little/big-endian volume layout, `.meshb` for the
//! keyword-framed format, `.solb` for the metric field. Reading happens
//! on rank 0 and the image is broadcast; writing gathers to rank 0
//! first.

mod meshb;
mod solb;
mod ugrid;

use std::path::Path;

use ndarray as nd;

use crate::comm::Comm;
use crate::error::{Error, Result};
use crate::gather::{GatheredMesh, gather_mesh, gather_metric, scatter_mesh};
use crate::grid::Grid;
use crate::metric::SymTensor;
use crate::node::Global;

pub use meshb::{read_meshb, write_meshb};
pub use solb::{read_solb, write_solb};
pub use ugrid::{read_ugrid, write_ugrid};

fn endian_of(path: &Path) -> Option<bool> {
    let name = path.to_string_lossy();
    if name.ends_with(".lb8.ugrid") {
        Some(true)
    } else if name.ends_with(".b8.ugrid") {
        Some(false)
    } else {
        None
    }
}

/// Write the whole distributed mesh to one file. Collective.
pub fn write_mesh(grid: &mut Grid, path: &Path) -> Result<()> {
    let image = gather_mesh(grid)?;
    if !grid.comm.once() {
        return Ok(());
    }
    if let Some(little_endian) = endian_of(path) {
        return ugrid::write_ugrid(path, &image, little_endian);
    }
    if path.extension().is_some_and(|e| e == "meshb") {
        return meshb::write_meshb(path, &image);
    }
    Err(Error::Invalid("unknown mesh file extension"))
}

/// Read a mesh on rank 0, broadcast it and distribute over ranks.
pub fn read_mesh(comm: Comm, path: &Path) -> Result<Grid> {
    // validate the extension everywhere so no rank leaves a collective
    let endian = endian_of(path);
    if endian.is_none() && !path.extension().is_some_and(|e| e == "meshb") {
        return Err(Error::Invalid("unknown mesh file extension"));
    }
    let loaded = if comm.once() {
        Some(match endian {
            Some(little_endian) => ugrid::read_ugrid(path, little_endian),
            None => meshb::read_meshb(path),
        })
    } else {
        None
    };
    // share the outcome before the payload so a bad file fails all ranks
    let mut flag = vec![loaded.as_ref().is_none_or(|r| r.is_ok()) as u8];
    comm.bcast(&mut flag)?;
    if flag[0] == 0 {
        return Err(match loaded {
            Some(Err(e)) => e,
            _ => Error::Invalid("rank 0 failed to read the mesh"),
        });
    }
    let mut image = match loaded {
        Some(Ok(image)) => image,
        _ => GatheredMesh::default(),
    };
    bcast_image(&comm, &mut image)?;
    let mut grid = scatter_mesh(comm, &image)?;
    grid.orient_outward()?;
    Ok(grid)
}

/// Write the metric field next to the mesh. Collective.
pub fn write_metric(grid: &mut Grid, path: &Path) -> Result<()> {
    let metric = gather_metric(grid)?;
    if !grid.comm.once() {
        return Ok(());
    }
    if path.extension().is_some_and(|e| e == "solb") {
        return solb::write_solb(path, &metric);
    }
    Err(Error::Invalid("unknown metric file extension"))
}

/// Read a metric field and set it on every local node. Collective.
pub fn read_metric(grid: &mut Grid, path: &Path) -> Result<()> {
    if !path.extension().is_some_and(|e| e == "solb") {
        return Err(Error::Invalid("unknown metric file extension"));
    }
    let loaded = if grid.comm.once() {
        Some(solb::read_solb(path))
    } else {
        None
    };
    let mut flag = vec![loaded.as_ref().is_none_or(|r| r.is_ok()) as u8];
    grid.comm.bcast(&mut flag)?;
    if flag[0] == 0 {
        return Err(match loaded {
            Some(Err(e)) => e,
            _ => Error::Invalid("rank 0 failed to read the metric"),
        });
    }
    let mut rows = match loaded {
        Some(Ok(metric)) => metric.into_raw_vec_and_offset().0,
        _ => Vec::new(),
    };
    grid.comm.bcast(&mut rows)?;
    if rows.len() != 6 * grid.nodes.n_global() as usize {
        return Err(Error::Invalid("metric file does not match the mesh"));
    }
    for local in grid.nodes.locals() {
        let global = grid.nodes.global(local) as usize;
        let m: [f64; 6] = rows[6 * global..6 * (global + 1)]
            .try_into()
            .expect("row width");
        grid.nodes.metric_set(local, SymTensor(m))?;
    }
    Ok(())
}

fn bcast_image(comm: &Comm, image: &mut GatheredMesh) -> Result<()> {
    if !comm.para() {
        return Ok(());
    }
    // sizes first, then the flat payloads
    let mut counts: Vec<i64> = if comm.once() {
        vec![
            image.nnode() as i64,
            image.metric.is_some() as i64,
            image.tri.len() as i64,
            image.qua.len() as i64,
            image.edg.len() as i64,
            image.tet.len() as i64,
            image.pyr.len() as i64,
            image.pri.len() as i64,
            image.hex.len() as i64,
            image.geom_node.len() as i64,
            image.geom_edge.len() as i64,
            image.geom_face.len() as i64,
        ]
    } else {
        Vec::new()
    };
    comm.bcast(&mut counts)?;
    let nnode = counts[0] as usize;

    let mut xyz = if comm.once() {
        image.xyz.clone().into_raw_vec_and_offset().0
    } else {
        Vec::new()
    };
    comm.bcast(&mut xyz)?;
    if !comm.once() {
        image.xyz = nd::Array2::from_shape_vec((nnode, 3), xyz)
            .map_err(|_| Error::Invalid("broadcast image shape"))?;
    }
    if counts[1] != 0 {
        let mut metric = if comm.once() {
            image
                .metric
                .clone()
                .expect("counted above")
                .into_raw_vec_and_offset()
                .0
        } else {
            Vec::new()
        };
        comm.bcast(&mut metric)?;
        if !comm.once() {
            image.metric = Some(
                nd::Array2::from_shape_vec((nnode, 6), metric)
                    .map_err(|_| Error::Invalid("broadcast image shape"))?,
            );
        }
    }

    fn bcast_tagged<const N: usize>(
        comm: &Comm,
        rows: &mut Vec<([Global; N], i32)>,
        count: usize,
    ) -> Result<()> {
        let mut flat: Vec<Global> = if comm.once() {
            rows.iter()
                .flat_map(|(nodes, id)| {
                    nodes.iter().copied().chain([*id as Global])
                })
                .collect()
        } else {
            Vec::new()
        };
        comm.bcast(&mut flat)?;
        if !comm.once() {
            *rows = flat
                .chunks_exact(N + 1)
                .map(|chunk| {
                    let nodes: [Global; N] = chunk[..N].try_into().expect("row width");
                    (nodes, chunk[N] as i32)
                })
                .collect();
            debug_assert_eq!(rows.len(), count);
        }
        Ok(())
    }
    fn bcast_plain<const N: usize>(
        comm: &Comm,
        rows: &mut Vec<[Global; N]>,
        count: usize,
    ) -> Result<()> {
        let mut flat: Vec<Global> = if comm.once() {
            rows.iter().flatten().copied().collect()
        } else {
            Vec::new()
        };
        comm.bcast(&mut flat)?;
        if !comm.once() {
            *rows = flat
                .chunks_exact(N)
                .map(|chunk| chunk.try_into().expect("row width"))
                .collect();
            debug_assert_eq!(rows.len(), count);
        }
        Ok(())
    }

    bcast_tagged(comm, &mut image.tri, counts[2] as usize)?;
    bcast_tagged(comm, &mut image.qua, counts[3] as usize)?;
    bcast_tagged(comm, &mut image.edg, counts[4] as usize)?;
    bcast_plain(comm, &mut image.tet, counts[5] as usize)?;
    bcast_plain(comm, &mut image.pyr, counts[6] as usize)?;
    bcast_plain(comm, &mut image.pri, counts[7] as usize)?;
    bcast_plain(comm, &mut image.hex, counts[8] as usize)?;

    // CAD association records: (node, id) pairs then the parameter rows
    let mut geom_meta: Vec<Global> = if comm.once() {
        image
            .geom_node
            .iter()
            .flat_map(|&(node, id)| [node, id as Global])
            .chain(
                image
                    .geom_edge
                    .iter()
                    .flat_map(|&(node, id, _)| [node, id as Global]),
            )
            .chain(
                image
                    .geom_face
                    .iter()
                    .flat_map(|&(node, id, _)| [node, id as Global]),
            )
            .collect()
    } else {
        Vec::new()
    };
    comm.bcast(&mut geom_meta)?;
    let mut geom_params: Vec<f64> = if comm.once() {
        image
            .geom_edge
            .iter()
            .map(|&(_, _, t)| t)
            .chain(image.geom_face.iter().flat_map(|&(_, _, uv)| uv))
            .collect()
    } else {
        Vec::new()
    };
    comm.bcast(&mut geom_params)?;
    if !comm.once() {
        let n_node = counts[9] as usize;
        let n_edge = counts[10] as usize;
        let n_face = counts[11] as usize;
        let pair = |at: usize| (geom_meta[2 * at], geom_meta[2 * at + 1] as i32);
        image.geom_node = (0..n_node).map(pair).collect();
        image.geom_edge = (0..n_edge)
            .map(|at| {
                let (node, id) = pair(n_node + at);
                (node, id, geom_params[at])
            })
            .collect();
        image.geom_face = (0..n_face)
            .map(|at| {
                let (node, id) = pair(n_node + n_edge + at);
                let uv = [
                    geom_params[n_edge + 2 * at],
                    geom_params[n_edge + 2 * at + 1],
                ];
                (node, id, uv)
            })
            .collect();
    }

    let mut flow = if comm.once() {
        image.byte_flow.clone()
    } else {
        Vec::new()
    };
    comm.bcast(&mut flow)?;
    if !comm.once() {
        image.byte_flow = flow;
    }
    Ok(())
}
