//! The keyword-framed `.meshb` format.
//!
//! Little-endian binary: an int32 cookie of 1, an int32 version, then a
//! sequence of keyword blocks. Each block is the keyword code, the file
//! position just past the block (int32 in version 2, int64 in version 3,
//! zero for the last block), and the payload. Counts follow the same
//! 32/64-bit choice. Unknown keywords are skipped through their recorded
//! next-position.
//!
//! The vertex-on-geometry keyword family 40+t (one record per vertex:
//! node, entity id, t curve/surface parameters and a trailing filler
//! when t > 0) and the byte-flow keyword 126 (an opaque CAD byte
//! stream) round-trip structurally; interpreting them is the CAD
//! layer's business.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use ndarray as nd;

use crate::error::{Error, Result};
use crate::gather::GatheredMesh;
use crate::node::Global;

pub const KW_DIMENSION: i32 = 3;
pub const KW_VERTICES: i32 = 4;
pub const KW_EDGES: i32 = 5;
pub const KW_TRIANGLES: i32 = 6;
pub const KW_TETRAHEDRA: i32 = 8;
pub const KW_GEOM_NODE: i32 = 40;
pub const KW_GEOM_EDGE: i32 = 41;
pub const KW_GEOM_FACE: i32 = 42;
pub const KW_END: i32 = 54;
pub const KW_SOL_AT_VERTICES: i32 = 62;
pub const KW_BYTE_FLOW: i32 = 126;

pub(super) struct MeshbWriter {
    file: BufWriter<File>,
    version: i32,
}

impl MeshbWriter {
    pub fn create(path: &Path, version: i32) -> Result<Self> {
        if version != 2 && version != 3 {
            return Err(Error::Implement("meshb version must be 2 or 3"));
        }
        let mut writer = Self {
            file: BufWriter::new(File::create(path)?),
            version,
        };
        writer.put_i32(1)?; // cookie
        writer.put_i32(version)?;
        Ok(writer)
    }

    fn put_i32(&mut self, value: i32) -> Result<()> {
        self.file.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    fn put_f64(&mut self, value: f64) -> Result<()> {
        self.file.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    /// Keyword code plus the next-position pointer.
    fn open_block(&mut self, keyword: i32, payload_bytes: u64) -> Result<()> {
        self.put_i32(keyword)?;
        let here = self.file.stream_position()?;
        let pos_bytes = if self.version == 2 { 4 } else { 8 };
        let next = here + pos_bytes + payload_bytes;
        if self.version == 2 {
            self.put_i32(next as i32)?;
        } else {
            self.file.write_all(&(next as i64).to_le_bytes())?;
        }
        Ok(())
    }

    fn count_bytes(&self) -> u64 {
        if self.version == 2 { 4 } else { 8 }
    }

    fn put_count(&mut self, count: usize) -> Result<()> {
        if self.version == 2 {
            self.put_i32(count as i32)
        } else {
            self.file.write_all(&(count as i64).to_le_bytes())?;
            Ok(())
        }
    }

    pub fn dimension(&mut self, dim: i32) -> Result<()> {
        self.open_block(KW_DIMENSION, 4)?;
        self.put_i32(dim)
    }

    pub fn vertices(&mut self, xyz: &nd::Array2<f64>) -> Result<()> {
        let payload = self.count_bytes() + xyz.nrows() as u64 * (3 * 8 + 4);
        self.open_block(KW_VERTICES, payload)?;
        self.put_count(xyz.nrows())?;
        for row in xyz.rows() {
            for &value in row {
                self.put_f64(value)?;
            }
            self.put_i32(0)?; // vertex reference
        }
        Ok(())
    }

    pub fn elements<const N: usize>(
        &mut self,
        keyword: i32,
        rows: &[([Global; N], i32)],
    ) -> Result<()> {
        let payload = self.count_bytes() + rows.len() as u64 * ((N as u64 + 1) * 4);
        self.open_block(keyword, payload)?;
        self.put_count(rows.len())?;
        for (nodes, id) in rows {
            for &node in nodes {
                self.put_i32(node as i32 + 1)?;
            }
            self.put_i32(*id)?;
        }
        Ok(())
    }

    pub fn solution(&mut self, rows: &nd::Array2<f64>) -> Result<()> {
        let payload = self.count_bytes() + 8 + rows.nrows() as u64 * rows.ncols() as u64 * 8;
        self.open_block(KW_SOL_AT_VERTICES, payload)?;
        self.put_count(rows.nrows())?;
        self.put_i32(1)?; // one field
        self.put_i32(3)?; // symmetric-matrix type
        for row in rows.rows() {
            for &value in row {
                self.put_f64(value)?;
            }
        }
        Ok(())
    }

    fn geom_header(&mut self, keyword: i32, params: u64, count: usize) -> Result<()> {
        let filler = if params > 0 { 8 } else { 0 };
        let payload = self.count_bytes() + count as u64 * (8 + 8 * params + filler);
        self.open_block(keyword, payload)?;
        self.put_count(count)
    }

    pub fn geom_nodes(&mut self, rows: &[(Global, i32)]) -> Result<()> {
        self.geom_header(KW_GEOM_NODE, 0, rows.len())?;
        for (node, id) in rows {
            self.put_i32(*node as i32 + 1)?;
            self.put_i32(*id)?;
        }
        Ok(())
    }

    pub fn geom_edges(&mut self, rows: &[(Global, i32, f64)]) -> Result<()> {
        self.geom_header(KW_GEOM_EDGE, 1, rows.len())?;
        for (node, id, t) in rows {
            self.put_i32(*node as i32 + 1)?;
            self.put_i32(*id)?;
            self.put_f64(*t)?;
            self.put_f64(0.0)?; // filler slot
        }
        Ok(())
    }

    pub fn geom_faces(&mut self, rows: &[(Global, i32, [f64; 2])]) -> Result<()> {
        self.geom_header(KW_GEOM_FACE, 2, rows.len())?;
        for (node, id, uv) in rows {
            self.put_i32(*node as i32 + 1)?;
            self.put_i32(*id)?;
            self.put_f64(uv[0])?;
            self.put_f64(uv[1])?;
            self.put_f64(0.0)?; // filler slot
        }
        Ok(())
    }

    pub fn byte_flow(&mut self, bytes: &[u8]) -> Result<()> {
        let payload = self.count_bytes() + bytes.len() as u64;
        self.open_block(KW_BYTE_FLOW, payload)?;
        self.put_count(bytes.len())?;
        self.file.write_all(bytes)?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.put_i32(KW_END)?;
        if self.version == 2 {
            self.put_i32(0)?;
        } else {
            self.file.write_all(&0i64.to_le_bytes())?;
        }
        self.file.flush()?;
        Ok(())
    }
}

pub(super) struct MeshbReader {
    file: BufReader<File>,
    version: i32,
}

impl MeshbReader {
    pub fn open(path: &Path) -> Result<Self> {
        let mut reader = Self {
            file: BufReader::new(File::open(path)?),
            version: 0,
        };
        if reader.get_i32()? != 1 {
            return Err(Error::Invalid("not a meshb file"));
        }
        let version = reader.get_i32()?;
        if version != 2 && version != 3 {
            return Err(Error::Implement("meshb version must be 2 or 3"));
        }
        reader.version = version;
        Ok(reader)
    }

    fn get_i32(&mut self) -> Result<i32> {
        let mut bytes = [0u8; 4];
        self.file.read_exact(&mut bytes)?;
        Ok(i32::from_le_bytes(bytes))
    }

    fn get_f64(&mut self) -> Result<f64> {
        let mut bytes = [0u8; 8];
        self.file.read_exact(&mut bytes)?;
        Ok(f64::from_le_bytes(bytes))
    }

    fn get_pos(&mut self) -> Result<u64> {
        if self.version == 2 {
            Ok(self.get_i32()? as u64)
        } else {
            let mut bytes = [0u8; 8];
            self.file.read_exact(&mut bytes)?;
            Ok(i64::from_le_bytes(bytes) as u64)
        }
    }

    fn get_count(&mut self) -> Result<usize> {
        Ok(self.get_pos()? as usize)
    }

    /// Next keyword and the position just past its block.
    pub fn next_block(&mut self) -> Result<Option<(i32, u64)>> {
        let keyword = match self.get_i32() {
            Ok(kw) => kw,
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let next = self.get_pos()?;
        Ok(Some((keyword, next)))
    }

    pub fn skip_to(&mut self, position: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(position))?;
        Ok(())
    }

    pub fn get_dimension(&mut self) -> Result<i32> {
        self.get_i32()
    }

    pub fn vertices(&mut self) -> Result<nd::Array2<f64>> {
        let count = self.get_count()?;
        let mut xyz = nd::Array2::zeros((count, 3));
        for node in 0..count {
            for i in 0..3 {
                xyz[(node, i)] = self.get_f64()?;
            }
            self.get_i32()?; // vertex reference
        }
        Ok(xyz)
    }

    pub fn elements<const N: usize>(&mut self, nnode: usize) -> Result<Vec<([Global; N], i32)>> {
        let count = self.get_count()?;
        let mut rows = Vec::with_capacity(count);
        for _ in 0..count {
            let mut nodes = [0 as Global; N];
            for slot in nodes.iter_mut() {
                let raw = self.get_i32()?;
                if raw < 1 || raw as usize > nnode {
                    return Err(Error::Invalid("node index out of range"));
                }
                *slot = (raw - 1) as Global;
            }
            let id = self.get_i32()?;
            rows.push((nodes, id));
        }
        Ok(rows)
    }

    pub fn solution(&mut self, width: usize) -> Result<nd::Array2<f64>> {
        let count = self.get_count()?;
        if self.get_i32()? != 1 {
            return Err(Error::Implement("only single-field solutions"));
        }
        if self.get_i32()? != 3 {
            return Err(Error::Implement("only symmetric-matrix solutions"));
        }
        let mut rows = nd::Array2::zeros((count, width));
        for at in 0..count {
            for i in 0..width {
                rows[(at, i)] = self.get_f64()?;
            }
        }
        Ok(rows)
    }

    fn geom_vertex(&mut self, nnode: usize) -> Result<(Global, i32)> {
        let raw = self.get_i32()?;
        if raw < 1 || raw as usize > nnode {
            return Err(Error::Invalid("node index out of range"));
        }
        let id = self.get_i32()?;
        Ok(((raw - 1) as Global, id))
    }

    pub fn geom_nodes(&mut self, nnode: usize) -> Result<Vec<(Global, i32)>> {
        let count = self.get_count()?;
        let mut rows = Vec::with_capacity(count);
        for _ in 0..count {
            rows.push(self.geom_vertex(nnode)?);
        }
        Ok(rows)
    }

    pub fn geom_edges(&mut self, nnode: usize) -> Result<Vec<(Global, i32, f64)>> {
        let count = self.get_count()?;
        let mut rows = Vec::with_capacity(count);
        for _ in 0..count {
            let (node, id) = self.geom_vertex(nnode)?;
            let t = self.get_f64()?;
            self.get_f64()?; // filler slot
            rows.push((node, id, t));
        }
        Ok(rows)
    }

    pub fn geom_faces(&mut self, nnode: usize) -> Result<Vec<(Global, i32, [f64; 2])>> {
        let count = self.get_count()?;
        let mut rows = Vec::with_capacity(count);
        for _ in 0..count {
            let (node, id) = self.geom_vertex(nnode)?;
            let uv = [self.get_f64()?, self.get_f64()?];
            self.get_f64()?; // filler slot
            rows.push((node, id, uv));
        }
        Ok(rows)
    }

    pub fn byte_flow(&mut self) -> Result<Vec<u8>> {
        let count = self.get_count()?;
        let mut bytes = vec![0u8; count];
        self.file.read_exact(&mut bytes)?;
        Ok(bytes)
    }
}

pub fn write_meshb(path: &Path, image: &GatheredMesh) -> Result<()> {
    let version = if image.nnode() > i32::MAX as usize { 3 } else { 2 };
    let mut writer = MeshbWriter::create(path, version)?;
    writer.dimension(3)?;
    writer.vertices(&image.xyz)?;
    if !image.edg.is_empty() {
        writer.elements(KW_EDGES, &image.edg)?;
    }
    if !image.tri.is_empty() {
        writer.elements(KW_TRIANGLES, &image.tri)?;
    }
    let tets: Vec<([Global; 4], i32)> = image.tet.iter().map(|&nodes| (nodes, 0)).collect();
    if !tets.is_empty() {
        writer.elements(KW_TETRAHEDRA, &tets)?;
    }
    if !image.geom_node.is_empty() {
        writer.geom_nodes(&image.geom_node)?;
    }
    if !image.geom_edge.is_empty() {
        writer.geom_edges(&image.geom_edge)?;
    }
    if !image.geom_face.is_empty() {
        writer.geom_faces(&image.geom_face)?;
    }
    if !image.byte_flow.is_empty() {
        writer.byte_flow(&image.byte_flow)?;
    }
    writer.finish()
}

pub fn read_meshb(path: &Path) -> Result<GatheredMesh> {
    let mut reader = MeshbReader::open(path)?;
    let mut image = GatheredMesh::default();
    let mut dim = 3;
    while let Some((keyword, next)) = reader.next_block()? {
        match keyword {
            KW_END => break,
            KW_DIMENSION => dim = reader.get_i32()?,
            KW_VERTICES => image.xyz = reader.vertices()?,
            KW_EDGES => image.edg = reader.elements(image.nnode())?,
            KW_TRIANGLES => image.tri = reader.elements(image.nnode())?,
            KW_TETRAHEDRA => {
                image.tet = reader
                    .elements::<4>(image.nnode())?
                    .into_iter()
                    .map(|(nodes, _)| nodes)
                    .collect();
            }
            KW_GEOM_NODE => image.geom_node = reader.geom_nodes(image.nnode())?,
            KW_GEOM_EDGE => image.geom_edge = reader.geom_edges(image.nnode())?,
            KW_GEOM_FACE => image.geom_face = reader.geom_faces(image.nnode())?,
            KW_BYTE_FLOW => image.byte_flow = reader.byte_flow()?,
            _ => reader.skip_to(next)?,
        }
    }
    if dim != 3 {
        return Err(Error::Implement("only three-dimensional meshb"));
    }
    Ok(image)
}
