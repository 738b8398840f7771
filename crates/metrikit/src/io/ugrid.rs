//! The unformatted `.ugrid` volume layout.
//!
//! Header of seven int32 counts `[nnode, ntri, nqua, ntet, npyr, npri,
//! nhex]`, node coordinates as three float64 each, then tri and qua
//! connectivity, tri and qua face ids, and finally all volume cells.
//! Node indices are 1-based on disk. `.lb8` is little-endian, `.b8` is
//! big-endian; nothing else differs.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use ndarray as nd;

use crate::error::{Error, Result};
use crate::gather::GatheredMesh;
use crate::node::Global;

struct Bin<W> {
    inner: W,
    little_endian: bool,
}

impl<W: Write> Bin<W> {
    fn put_i32(&mut self, value: i32) -> Result<()> {
        let bytes = if self.little_endian {
            value.to_le_bytes()
        } else {
            value.to_be_bytes()
        };
        self.inner.write_all(&bytes)?;
        Ok(())
    }

    fn put_f64(&mut self, value: f64) -> Result<()> {
        let bytes = if self.little_endian {
            value.to_le_bytes()
        } else {
            value.to_be_bytes()
        };
        self.inner.write_all(&bytes)?;
        Ok(())
    }
}

impl<R: Read> Bin<R> {
    fn get_i32(&mut self) -> Result<i32> {
        let mut bytes = [0u8; 4];
        self.inner.read_exact(&mut bytes)?;
        Ok(if self.little_endian {
            i32::from_le_bytes(bytes)
        } else {
            i32::from_be_bytes(bytes)
        })
    }

    fn get_f64(&mut self) -> Result<f64> {
        let mut bytes = [0u8; 8];
        self.inner.read_exact(&mut bytes)?;
        Ok(if self.little_endian {
            f64::from_le_bytes(bytes)
        } else {
            f64::from_be_bytes(bytes)
        })
    }
}

pub fn write_ugrid(path: &Path, image: &GatheredMesh, little_endian: bool) -> Result<()> {
    let mut out = Bin {
        inner: BufWriter::new(File::create(path)?),
        little_endian,
    };
    out.put_i32(image.nnode() as i32)?;
    out.put_i32(image.tri.len() as i32)?;
    out.put_i32(image.qua.len() as i32)?;
    out.put_i32(image.tet.len() as i32)?;
    out.put_i32(image.pyr.len() as i32)?;
    out.put_i32(image.pri.len() as i32)?;
    out.put_i32(image.hex.len() as i32)?;

    for row in image.xyz.rows() {
        for &value in row {
            out.put_f64(value)?;
        }
    }
    for (nodes, _) in &image.tri {
        for &node in nodes {
            out.put_i32(node as i32 + 1)?;
        }
    }
    for (nodes, _) in &image.qua {
        for &node in nodes {
            out.put_i32(node as i32 + 1)?;
        }
    }
    for (_, id) in &image.tri {
        out.put_i32(*id)?;
    }
    for (_, id) in &image.qua {
        out.put_i32(*id)?;
    }
    for nodes in &image.tet {
        for &node in nodes {
            out.put_i32(node as i32 + 1)?;
        }
    }
    for nodes in &image.pyr {
        for &node in nodes {
            out.put_i32(node as i32 + 1)?;
        }
    }
    for nodes in &image.pri {
        for &node in nodes {
            out.put_i32(node as i32 + 1)?;
        }
    }
    for nodes in &image.hex {
        for &node in nodes {
            out.put_i32(node as i32 + 1)?;
        }
    }
    out.inner.flush()?;
    Ok(())
}

pub fn read_ugrid(path: &Path, little_endian: bool) -> Result<GatheredMesh> {
    let mut file = Bin {
        inner: BufReader::new(File::open(path)?),
        little_endian,
    };
    let nnode = file.get_i32()? as usize;
    let ntri = file.get_i32()? as usize;
    let nqua = file.get_i32()? as usize;
    let ntet = file.get_i32()? as usize;
    let npyr = file.get_i32()? as usize;
    let npri = file.get_i32()? as usize;
    let nhex = file.get_i32()? as usize;

    let mut image = GatheredMesh {
        xyz: nd::Array2::zeros((nnode, 3)),
        ..GatheredMesh::default()
    };
    for node in 0..nnode {
        for i in 0..3 {
            image.xyz[(node, i)] = file.get_f64()?;
        }
    }
    let node = |file: &mut Bin<BufReader<File>>| -> Result<Global> {
        let raw = file.get_i32()?;
        if raw < 1 || raw as usize > nnode {
            return Err(Error::Invalid("node index out of range"));
        }
        Ok((raw - 1) as Global)
    };
    for _ in 0..ntri {
        let nodes = [node(&mut file)?, node(&mut file)?, node(&mut file)?];
        image.tri.push((nodes, 0));
    }
    for _ in 0..nqua {
        let nodes = [
            node(&mut file)?,
            node(&mut file)?,
            node(&mut file)?,
            node(&mut file)?,
        ];
        image.qua.push((nodes, 0));
    }
    for (_, id) in image.tri.iter_mut() {
        *id = file.get_i32()?;
    }
    for (_, id) in image.qua.iter_mut() {
        *id = file.get_i32()?;
    }
    for _ in 0..ntet {
        let mut nodes = [0 as Global; 4];
        for slot in nodes.iter_mut() {
            *slot = node(&mut file)?;
        }
        image.tet.push(nodes);
    }
    for _ in 0..npyr {
        let mut nodes = [0 as Global; 5];
        for slot in nodes.iter_mut() {
            *slot = node(&mut file)?;
        }
        image.pyr.push(nodes);
    }
    for _ in 0..npri {
        let mut nodes = [0 as Global; 6];
        for slot in nodes.iter_mut() {
            *slot = node(&mut file)?;
        }
        image.pri.push(nodes);
    }
    for _ in 0..nhex {
        let mut nodes = [0 as Global; 8];
        for slot in nodes.iter_mut() {
            *slot = node(&mut file)?;
        }
        image.hex.push(nodes);
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::gather::gather_mesh;

    #[test]
    fn test_round_trip_both_endians() {
        let image = {
            let mut grid = fixtures::cube_tets();
            gather_mesh(&mut grid).unwrap()
        };
        for little_endian in [true, false] {
            let dir = tempfile::tempdir().unwrap();
            let ext = if little_endian { "lb8" } else { "b8" };
            let path = dir.path().join(format!("cube.{ext}.ugrid"));
            write_ugrid(&path, &image, little_endian).unwrap();
            let mut round = read_ugrid(&path, little_endian).unwrap();
            round.metric = image.metric.clone();
            assert_eq!(round, image);
        }
    }

    #[test]
    fn test_write_twice_identical_bytes() {
        let image = {
            let mut grid = fixtures::prism_stack();
            gather_mesh(&mut grid).unwrap()
        };
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.lb8.ugrid");
        let b = dir.path().join("b.lb8.ugrid");
        write_ugrid(&a, &image, true).unwrap();
        write_ugrid(&b, &image, true).unwrap();
        assert_eq!(std::fs::read(a).unwrap(), std::fs::read(b).unwrap());
    }

    #[test]
    fn test_endian_mismatch_detected() {
        let image = {
            let mut grid = fixtures::single_tet();
            gather_mesh(&mut grid).unwrap()
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tet.b8.ugrid");
        write_ugrid(&path, &image, false).unwrap();
        // wrong-endian counts are absurd and the read fails fast
        assert!(read_ugrid(&path, true).is_err());
    }
}
