//! Binary persistence for the HNSW graph: an info file and an edges file.
//!
//! `size_t` fields are always written as a fixed 8-byte little-endian
//! unsigned integer, regardless of host pointer width, so a file written
//! on one build is readable on another (an Open Question resolution
//! recorded in DESIGN.md).
//!
//! Layout (little-endian throughout):
//!
//! **Info file**: `offset_data, max_elements, cur_element_count,
//! size_per_element, M, max_M, max_M0, ef_construction` (each `u64`),
//! `mult` (`f64`), `max_level` (`i32`), `enter_point` (`i32`), followed by
//! the raw data region — for each element in id order, `size_per_element`
//! bytes: a base-level neighbor-count header (`u32`), `max_M0` base-level
//! neighbor ids (`u32` each, zero-padded past the header's count), the
//! element's encoded payload, and its external label (`u64`).
//!
//! **Edges file**: for each element in id order, for each upper level
//! `1..=element_level`, `count` (`i32`) followed by `count` neighbor ids
//! (`i32` each).

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::config::HnswConfig;
use crate::distance::DistanceSpace;
use crate::error::{Error, Result};

use super::graph::Hnsw;

fn write_u64<W: Write>(w: &mut W, v: u64) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn write_u32<W: Write>(w: &mut W, v: u32) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn write_i32<W: Write>(w: &mut W, v: i32) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn read_u64<R: Read>(r: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_f64<R: Read>(r: &mut R) -> Result<f64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

fn read_i32<R: Read>(r: &mut R) -> Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Appends `.tmp` to the full file name (rather than replacing the
/// existing extension via [`Path::with_extension`]) so multi-dot names
/// like `index.hnsw.info` survive untouched.
fn tmp_path_for(path: &Path) -> std::path::PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    std::path::PathBuf::from(name)
}

impl<D: DistanceSpace> Hnsw<D> {
    /// Writes this graph's info file (topology + payloads + labels) and
    /// its edges file (upper-level neighbor lists) atomically, each via a
    /// temp-file-then-rename.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] on any file-system failure, or
    /// [`Error::Invariant`] if the graph is empty (nothing to persist).
    pub fn save(&self, path_info: impl AsRef<Path>, path_edges: impl AsRef<Path>) -> Result<()> {
        let (payloads, labels) = self.snapshot_payloads();
        if payloads.is_empty() {
            return Err(Error::Invariant(
                "cannot persist an empty hnsw graph".to_string(),
            ));
        }
        let links = self.snapshot_links();
        let (enter_point, max_level) = self.entry_state();
        let dim_bytes = self.space.encoded_len(&payloads[0]);

        write_info(
            path_info.as_ref(),
            &self.space,
            &payloads,
            &labels,
            &links,
            enter_point,
            max_level,
            self.m,
            self.m0,
            self.ef_construction,
            self.level_mult,
            dim_bytes,
        )?;
        write_edges(path_edges.as_ref(), &links)?;
        Ok(())
    }

    /// Loads a graph previously written by [`Self::save`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] if either file is truncated or carries
    /// a payload size inconsistent with its own header, or [`Error::Io`]
    /// on a file-system failure.
    pub fn load(
        space: D,
        config: &HnswConfig,
        path_info: impl AsRef<Path>,
        path_edges: impl AsRef<Path>,
    ) -> Result<Self> {
        let (payloads, labels, mut links, enter_point, max_level, max_m0) =
            read_info(path_info.as_ref(), &space)?;
        read_edges(path_edges.as_ref(), &mut links)?;
        let _ = max_m0;
        Ok(Self::from_parts(
            space,
            config,
            payloads,
            labels,
            links,
            enter_point,
            max_level,
        ))
    }
}

#[allow(clippy::too_many_arguments)]
fn write_info<D: DistanceSpace>(
    path: &Path,
    space: &D,
    payloads: &[D::Elem],
    labels: &[u64],
    links: &[Vec<Vec<u32>>],
    enter_point: Option<u32>,
    max_level: usize,
    m: usize,
    max_m0: usize,
    ef_construction: usize,
    level_mult: f64,
    dim_bytes: usize,
) -> Result<()> {
    let tmp_path = tmp_path_for(path);
    let n = payloads.len();
    let size_per_element = 4 + max_m0 * 4 + dim_bytes + 8;

    {
        let mut w = BufWriter::new(File::create(&tmp_path)?);

        // offset_data = 8 size_t fields + 1 f64 + 2 i32 fields
        let offset_data = 8 * 8 + 8 + 4 + 4;
        write_u64(&mut w, offset_data as u64)?;
        write_u64(&mut w, n as u64)?;
        write_u64(&mut w, n as u64)?;
        write_u64(&mut w, size_per_element as u64)?;
        write_u64(&mut w, m as u64)?;
        write_u64(&mut w, m as u64)?;
        write_u64(&mut w, max_m0 as u64)?;
        write_u64(&mut w, ef_construction as u64)?;
        w.write_all(&level_mult.to_le_bytes())?;
        write_i32(&mut w, max_level as i32)?;
        write_i32(&mut w, enter_point.map_or(-1, |id| id as i32))?;

        let mut payload_buf = Vec::with_capacity(dim_bytes);
        for i in 0..n {
            let base_neighbors = &links[i][0];
            let count = base_neighbors.len().min(max_m0);
            write_u32(&mut w, count as u32)?;
            for slot in 0..max_m0 {
                let id = base_neighbors.get(slot).copied().unwrap_or(0);
                write_u32(&mut w, id)?;
            }

            payload_buf.clear();
            space.encode_element(&payloads[i], &mut payload_buf);
            if payload_buf.len() != dim_bytes {
                return Err(Error::Invariant(
                    "hnsw graph holds elements of inconsistent encoded length".to_string(),
                ));
            }
            w.write_all(&payload_buf)?;
            write_u64(&mut w, labels[i])?;
        }
        w.flush()?;
    }

    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[allow(clippy::type_complexity)]
fn read_info<D: DistanceSpace>(
    path: &Path,
    space: &D,
) -> Result<(
    Vec<D::Elem>,
    Vec<u64>,
    Vec<Vec<Vec<u32>>>,
    Option<u32>,
    usize,
    usize,
)> {
    let mut r = BufReader::new(File::open(path)?);

    let _offset_data = read_u64(&mut r)?;
    let max_elements = read_u64(&mut r)? as usize;
    let cur_element_count = read_u64(&mut r)? as usize;
    let size_per_element = read_u64(&mut r)? as usize;
    let _m = read_u64(&mut r)?;
    let _max_m = read_u64(&mut r)?;
    let max_m0 = read_u64(&mut r)? as usize;
    let _ef_construction = read_u64(&mut r)?;
    let _mult = read_f64(&mut r)?;
    let max_level = read_i32(&mut r)?;
    let enter_point_raw = read_i32(&mut r)?;

    if cur_element_count > max_elements {
        return Err(Error::Format(
            "hnsw info file: cur_element_count exceeds max_elements".to_string(),
        ));
    }

    let n = cur_element_count;
    let mut payloads = Vec::with_capacity(n);
    let mut labels = Vec::with_capacity(n);
    let mut base_neighbors = Vec::with_capacity(n);

    let dim_bytes = size_per_element
        .checked_sub(4 + max_m0 * 4 + 8)
        .ok_or_else(|| Error::Format("hnsw info file: size_per_element too small".to_string()))?;

    for _ in 0..n {
        let count = read_u32(&mut r)? as usize;
        let mut neighbors = Vec::with_capacity(count.min(max_m0));
        for slot in 0..max_m0 {
            let id = read_u32(&mut r)?;
            if slot < count {
                neighbors.push(id);
            }
        }

        let mut payload_buf = vec![0u8; dim_bytes];
        r.read_exact(&mut payload_buf)?;
        payloads.push(space.decode_element(&payload_buf));

        let label = read_u64(&mut r)?;
        labels.push(label);
        base_neighbors.push(neighbors);
    }

    // Per-node neighbor arenas; level 0 is filled here, upper levels are
    // filled in by `read_edges` once element levels are known from the
    // edges file's own per-node framing.
    let links: Vec<Vec<Vec<u32>>> = base_neighbors.into_iter().map(|base| vec![base]).collect();

    let enter_point = if enter_point_raw < 0 {
        None
    } else {
        Some(enter_point_raw as u32)
    };

    Ok((payloads, labels, links, enter_point, max_level.max(0) as usize, max_m0))
}

/// Writes the edges file.
///
/// The distilled layout ("for each element, for each upper level 1..
/// `elementLevel`, count then ids") does not say how a reader learns
/// `elementLevel` without re-deriving it from the info file's data
/// region, which this crate's info-file layout does not carry per §6.
/// Each element's record is therefore prefixed with its own upper-level
/// count (`element_level` as `i32`), making the file self-describing;
/// this is recorded as an Open Question resolution in DESIGN.md.
fn write_edges(path: &Path, links: &[Vec<Vec<u32>>]) -> Result<()> {
    let tmp_path = tmp_path_for(path);
    {
        let mut w = BufWriter::new(File::create(&tmp_path)?);
        for node_links in links {
            let element_level = node_links.len() - 1;
            write_i32(&mut w, element_level as i32)?;
            for level in 1..node_links.len() {
                let neighbors = &node_links[level];
                write_i32(&mut w, neighbors.len() as i32)?;
                for &n in neighbors {
                    write_i32(&mut w, n as i32)?;
                }
            }
        }
        w.flush()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Reads the edges file, appending each element's upper-level neighbor
/// lists onto `links` (which on entry holds only each element's base
/// level, from [`read_info`]).
fn read_edges(path: &Path, links: &mut [Vec<Vec<u32>>]) -> Result<()> {
    let mut r = BufReader::new(File::open(path)?);

    for node_links in links.iter_mut() {
        let element_level = read_i32(&mut r)?;
        if element_level < 0 {
            return Err(Error::Format(
                "hnsw edges file: negative element level".to_string(),
            ));
        }
        for _ in 0..element_level {
            let count = read_i32(&mut r)?;
            if count < 0 {
                return Err(Error::Format(
                    "hnsw edges file: negative neighbor count".to_string(),
                ));
            }
            let mut neighbors = Vec::with_capacity(count as usize);
            for _ in 0..count {
                neighbors.push(read_u32(&mut r)?);
            }
            node_links.push(neighbors);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HnswConfig;
    use crate::distance::FloatL2Space;

    fn small_config() -> HnswConfig {
        HnswConfig {
            m: 8,
            ef_construction: 64,
        }
    }

    #[test]
    fn round_trip_preserves_search_results() {
        let dir = tempfile::tempdir().unwrap();
        let path_info = dir.path().join("graph.info");
        let path_edges = dir.path().join("graph.edges");

        let original = Hnsw::new(FloatL2Space, &small_config());
        for i in 0..300u32 {
            original.add_point(vec![i as f32, (i * 3) as f32]);
        }
        original.save(&path_info, &path_edges).unwrap();

        let loaded = Hnsw::load(FloatL2Space, &small_config(), &path_info, &path_edges).unwrap();
        assert_eq!(loaded.len(), original.len());

        for target in [0u32, 42, 150, 299] {
            let query = vec![target as f32, (target * 3) as f32];
            let before = original.search_knn(&query, 5, 64);
            let after = loaded.search_knn(&query, 5, 64);
            assert_eq!(before.len(), after.len());
            for (b, a) in before.iter().zip(&after) {
                assert_eq!(b.id, a.id);
                assert!((b.distance - a.distance).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn round_trip_preserves_labels_and_upper_level_edges() {
        let dir = tempfile::tempdir().unwrap();
        let path_info = dir.path().join("graph.info");
        let path_edges = dir.path().join("graph.edges");

        let original = Hnsw::new(FloatL2Space, &small_config());
        let mut ids = Vec::new();
        for i in 0..64u32 {
            ids.push(original.add_point_with_label(vec![i as f32, 0.0], u64::from(i) + 1000));
        }
        original.save(&path_info, &path_edges).unwrap();

        let loaded = Hnsw::load(FloatL2Space, &small_config(), &path_info, &path_edges).unwrap();
        for &id in &ids {
            assert_eq!(loaded.label(id).unwrap(), original.label(id).unwrap());
        }
    }

    #[test]
    fn save_of_empty_graph_is_an_invariant_error() {
        let dir = tempfile::tempdir().unwrap();
        let hnsw = Hnsw::new(FloatL2Space, &small_config());
        let result = hnsw.save(dir.path().join("info"), dir.path().join("edges"));
        assert!(matches!(result, Err(Error::Invariant(_))));
    }
}
