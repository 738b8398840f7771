//! The `.solb` metric field: a solution-at-vertices block holding six
//! components per node.
//!
//! On disk the components run m11, m12, m22, m13, m23, m33; the third
//! column is transposed relative to this crate's row-major upper
//! triangle, so the writer and reader permute in and out.

use std::path::Path;

use ndarray as nd;

use crate::error::{Error, Result};

use super::meshb::{KW_DIMENSION, KW_END, KW_SOL_AT_VERTICES, MeshbReader, MeshbWriter};

/// Crate order [m11, m12, m13, m22, m23, m33] to file order.
const TO_FILE: [usize; 6] = [0, 1, 3, 2, 4, 5];

/// Write six-component metric rows (crate component order).
pub fn write_solb(path: &Path, metric: &nd::Array2<f64>) -> Result<()> {
    if metric.ncols() != 6 {
        return Err(Error::Invalid("metric rows must have six components"));
    }
    let mut on_disk = nd::Array2::zeros(metric.dim());
    for (row, values) in metric.rows().into_iter().enumerate() {
        for (at, &from) in TO_FILE.iter().enumerate() {
            on_disk[(row, at)] = values[from];
        }
    }
    let mut writer = MeshbWriter::create(path, 2)?;
    writer.dimension(3)?;
    writer.solution(&on_disk)?;
    writer.finish()
}

/// Read metric rows back into crate component order.
pub fn read_solb(path: &Path) -> Result<nd::Array2<f64>> {
    let mut reader = MeshbReader::open(path)?;
    let mut on_disk = None;
    while let Some((keyword, next)) = reader.next_block()? {
        match keyword {
            KW_END => break,
            KW_DIMENSION => {
                if reader.get_dimension()? != 3 {
                    return Err(Error::Implement("only three-dimensional solb"));
                }
            }
            KW_SOL_AT_VERTICES => on_disk = Some(reader.solution(6)?),
            _ => reader.skip_to(next)?,
        }
    }
    let on_disk = on_disk.ok_or(Error::Invalid("no solution block in solb file"))?;
    let mut metric = nd::Array2::zeros(on_disk.dim());
    for (row, values) in on_disk.rows().into_iter().enumerate() {
        for (at, &from) in TO_FILE.iter().enumerate() {
            metric[(row, from)] = values[at];
        }
    }
    Ok(metric)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_permutes_back() {
        let mut metric = nd::Array2::zeros((2, 6));
        for (i, value) in metric.iter_mut().enumerate() {
            *value = i as f64;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("field.solb");
        write_solb(&path, &metric).unwrap();
        let round = read_solb(&path).unwrap();
        assert_eq!(round, metric);
    }

    #[test]
    fn test_wrong_width_rejected() {
        let metric = nd::Array2::zeros((2, 5));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("field.solb");
        assert!(write_solb(&path, &metric).is_err());
    }
}
