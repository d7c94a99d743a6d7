//! Distance computation over PQ-compressed codes.
//!
//! A trained [`Quantizer`] gives two distinct distance functions, both used
//! by this space:
//!
//! - **Construction tables** (symmetric, code-to-code): a `ksub * ksub`
//!   table of codeword-to-codeword squared distances per sub-quantizer,
//!   built once from the trained codebooks. [`PqAdcSpace`] implements
//!   [`super::DistanceSpace`] with `Elem = Vec<u8>` using these tables, so
//!   `Hnsw<PqAdcSpace<Q>>` can be built directly over PQ codes — the
//!   "PQ-compressed distance function during construction" SPEC_FULL §2
//!   names as an HNSW capability.
//! - **Query tables** (asymmetric, query-to-code): a `m * ksub` table of
//!   query-sub-vector-to-codeword squared distances, rebuilt per query by
//!   [`PqAdcSpace::compute_query_tables`] and evaluated by
//!   [`PqAdcSpace::adc_distance`]. This is the genuinely asymmetric ADC
//!   evaluator; it is not part of the `DistanceSpace` trait because a
//!   query is never the same representation as a stored code, so it could
//!   never be a node-to-node distance within one HNSW graph.
//!
//! A query handle (a `usize` index into the table most recently built by
//! [`PqAdcSpace::compute_query_tables`]) stands in for the query vector
//! itself, so the hot search loop never recomputes a table it already has.

use std::sync::Arc;

use super::DistanceSpace;
use crate::error::{Error, Result};
use crate::pq::Quantizer;

/// Distance space over codes produced by some [`Quantizer`] `Q`: symmetric
/// code-to-code distance (via [`DistanceSpace::distance`]) for HNSW
/// construction, asymmetric query-to-code ADC (via [`Self::adc_distance`])
/// for search.
pub struct PqAdcSpace<Q: Quantizer> {
    quantizer: Arc<Q>,
    /// Per-sub-quantizer `ksub * ksub` codeword-to-codeword squared
    /// distance table, built once from the trained codebooks.
    construction_tables: Vec<Vec<f32>>,
    /// Per-query `m * ksub` table, rebuilt by `compute_query_tables`.
    query_tables: Vec<Vec<f32>>,
}

impl<Q: Quantizer> PqAdcSpace<Q> {
    /// Creates a space over an already-trained quantizer, eagerly building
    /// the construction tables its `DistanceSpace` impl needs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotTrained`] if `quantizer` has not been trained
    /// (its codebooks are empty or the wrong shape).
    pub fn new(quantizer: Arc<Q>) -> Result<Self> {
        let construction_tables = build_construction_tables(quantizer.as_ref())?;
        Ok(Self {
            quantizer,
            construction_tables,
            query_tables: Vec::new(),
        })
    }

    /// Builds one per-query table for each of `n` query vectors (contiguous
    /// in `queries`, each `m * dsub` floats). Table `i`'s row for
    /// sub-quantizer `sub` holds, for every codeword `c`,
    /// `‖query_sub − codebook[sub][c]‖²`.
    ///
    /// Replaces any previously computed tables; query handles returned by
    /// [`Self::query_handle`] are only valid for the tables built by the
    /// most recent call.
    ///
    /// # Errors
    ///
    /// Returns an error if `queries.len() != n * m * dsub`.
    pub fn compute_query_tables(&mut self, queries: &[f32], n: usize) -> Result<()> {
        let d = self.quantizer.dsub() * self.quantizer.m();
        if queries.len() != n * d {
            return Err(Error::Format(format!(
                "query buffer length {} does not match n*d={}",
                queries.len(),
                n * d
            )));
        }

        let m = self.quantizer.m();
        let ksub = self.quantizer.ksub();
        let dsub = self.quantizer.dsub();

        let mut tables = Vec::with_capacity(n);
        for i in 0..n {
            let query = &queries[i * d..(i + 1) * d];
            let mut table = vec![0.0f32; m * ksub];
            for sub in 0..m {
                let q_sub = &query[sub * dsub..(sub + 1) * dsub];
                let codebook = self.quantizer.codebook(sub);
                let row = &mut table[sub * ksub..(sub + 1) * ksub];
                for (c, entry) in row.iter_mut().enumerate() {
                    let codeword = &codebook[c * dsub..(c + 1) * dsub];
                    *entry = crate::distance::float_l2::squared_l2(q_sub, codeword);
                }
            }
            tables.push(table);
        }
        self.query_tables = tables;
        Ok(())
    }

    /// Returns the query handle for the `i`-th vector passed to the most
    /// recent [`Self::compute_query_tables`] call.
    #[must_use]
    pub fn query_handle(&self, i: usize) -> usize {
        i
    }

    /// Number of query tables currently held.
    #[must_use]
    pub fn table_count(&self) -> usize {
        self.query_tables.len()
    }

    /// Reconstructs an approximate squared L2 distance between the query
    /// named by `query` (a handle from [`Self::query_handle`]) and `code`,
    /// as a sum of `m` table lookups, unrolled by 4 to match the rest of
    /// the crate's PQ code scans.
    #[inline]
    #[must_use]
    pub fn adc_distance(&self, query: usize, code: &[u8]) -> f32 {
        let table = &self.query_tables[query];
        let ksub = self.quantizer.ksub();
        let m = code.len();

        let chunks = m / 4;
        let mut sum0 = 0.0f32;
        let mut sum1 = 0.0f32;
        let mut sum2 = 0.0f32;
        let mut sum3 = 0.0f32;
        for i in 0..chunks {
            let base = i * 4;
            sum0 += table[ksub * base + code[base] as usize];
            sum1 += table[ksub * (base + 1) + code[base + 1] as usize];
            sum2 += table[ksub * (base + 2) + code[base + 2] as usize];
            sum3 += table[ksub * (base + 3) + code[base + 3] as usize];
        }
        let mut total = sum0 + sum1 + sum2 + sum3;
        for i in (chunks * 4)..m {
            total += table[ksub * i + code[i] as usize];
        }
        total
    }
}

impl<Q: Quantizer> DistanceSpace for PqAdcSpace<Q> {
    type Elem = Vec<u8>;

    /// Symmetric code-to-code distance: sum over sub-quantizers of the
    /// precomputed codeword-to-codeword squared distance, used when HNSW
    /// indexes PQ codes directly (construction over compressed payloads).
    #[inline]
    fn distance(&self, a: &Vec<u8>, b: &Vec<u8>) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        let ksub = self.quantizer.ksub();
        a.iter()
            .zip(b)
            .enumerate()
            .map(|(sub, (&ca, &cb))| self.construction_tables[sub][ca as usize * ksub + cb as usize])
            .sum()
    }

    fn encoded_len(&self, elem: &Vec<u8>) -> usize {
        elem.len()
    }

    fn encode_element(&self, elem: &Vec<u8>, out: &mut Vec<u8>) {
        out.extend_from_slice(elem);
    }

    fn decode_element(&self, bytes: &[u8]) -> Vec<u8> {
        bytes.to_vec()
    }
}

/// Builds the per-sub-quantizer `ksub * ksub` codeword-to-codeword squared
/// distance table from a trained quantizer's codebooks.
fn build_construction_tables<Q: Quantizer>(quantizer: &Q) -> Result<Vec<Vec<f32>>> {
    let m = quantizer.m();
    let ksub = quantizer.ksub();
    let dsub = quantizer.dsub();

    let mut tables = Vec::with_capacity(m);
    for sub in 0..m {
        let codebook = quantizer.codebook(sub);
        if codebook.len() != ksub * dsub {
            return Err(Error::NotTrained(
                "cannot build a PQ-ADC distance space over an untrained quantizer".to_string(),
            ));
        }
        let mut table = vec![0.0f32; ksub * ksub];
        for i in 0..ksub {
            let ci = &codebook[i * dsub..(i + 1) * dsub];
            for j in i..ksub {
                let cj = &codebook[j * dsub..(j + 1) * dsub];
                let dist = crate::distance::float_l2::squared_l2(ci, cj);
                table[i * ksub + j] = dist;
                table[j * ksub + i] = dist;
            }
        }
        tables.push(table);
    }
    Ok(tables)
}
