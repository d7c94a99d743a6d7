//! fvecs reader: the one dataset-file format parsed directly by this
//! crate, used to load centroids for [`super::index::IvfAdcIndex::build_coarse_quantizer`].
//!
//! bvecs/ivecs/groundtruth readers are a benchmark harness's concern and
//! are out of scope here.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{Error, Result};

/// Reads every float32 vector record from an fvecs file.
///
/// Each record is a little-endian `int32` dimension `d` followed by `d`
/// `float32` elements; the file is a bare concatenation of such records.
///
/// # Errors
///
/// Returns [`Error::Io`] on a read failure, or [`Error::Format`] if a
/// record declares a non-positive dimension, a dimension inconsistent with
/// earlier records, or the file is truncated mid-record.
pub fn read_fvecs(path: impl AsRef<Path>) -> Result<Vec<Vec<f32>>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut out = Vec::new();
    let mut dim_buf = [0u8; 4];
    let mut expected_dim: Option<usize> = None;

    loop {
        match reader.read_exact(&mut dim_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(Error::Io(e)),
        }

        let d = i32::from_le_bytes(dim_buf);
        if d <= 0 {
            return Err(Error::Format(format!(
                "fvecs record has non-positive dimension {d}"
            )));
        }
        let d = d as usize;
        match expected_dim {
            Some(expected) if d != expected => {
                return Err(Error::Format(format!(
                    "fvecs record dimension {d} does not match prior records' dimension {expected}"
                )));
            }
            Some(_) => {}
            None => expected_dim = Some(d),
        }

        let mut bytes = vec![0u8; d * 4];
        reader.read_exact(&mut bytes)?;
        let vector: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().expect("chunk is exactly 4 bytes")))
            .collect();
        out.push(vector);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_fvecs(path: &Path, vectors: &[Vec<f32>]) {
        let mut f = File::create(path).unwrap();
        for v in vectors {
            f.write_all(&(v.len() as i32).to_le_bytes()).unwrap();
            for &x in v {
                f.write_all(&x.to_le_bytes()).unwrap();
            }
        }
    }

    #[test]
    fn round_trips_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("centroids.fvecs");
        let vectors = vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0], vec![7.0, 8.0, 9.0]];
        write_fvecs(&path, &vectors);

        let read = read_fvecs(&path).unwrap();
        assert_eq!(read, vectors);
    }

    #[test]
    fn rejects_inconsistent_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.fvecs");
        write_fvecs(&path, &[vec![1.0, 2.0], vec![3.0, 4.0, 5.0]]);
        assert!(read_fvecs(&path).is_err());
    }

    #[test]
    fn empty_file_yields_no_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.fvecs");
        File::create(&path).unwrap();
        assert!(read_fvecs(&path).unwrap().is_empty());
    }
}
