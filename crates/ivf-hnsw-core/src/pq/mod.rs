//! Product quantization.
//!
//! A product quantizer splits a `d`-dimensional vector space into `M`
//! sub-spaces of dimension `d/M`, and vector-quantizes each sub-space
//! independently with `ksub = 2^nbits` codewords. A vector is then
//! represented by `M` byte indices (its *code*), one per sub-quantizer.
//!
//! The distilled specification treats codebook training as an external
//! collaborator (a k-means procedure normally supplied by a separate
//! quantizer library). [`Quantizer`] names exactly the interface that
//! external contract requires; [`ProductQuantizer`] is this crate's own
//! reference implementation of it, so the crate is self-contained and
//! its recall/identity properties are actually exercisable in tests.

mod kmeans;
mod norm_pq;

pub use norm_pq::NormQuantizer;

use crate::error::{Error, Result};

/// The external-collaborator contract a product quantizer must satisfy:
/// train codebooks on residual vectors, encode vectors to codes, decode
/// codes back to (lossy) vectors, and expose the codebooks themselves
/// for ADC-table assembly.
pub trait Quantizer: Send + Sync {
    /// Number of sub-quantizers.
    fn m(&self) -> usize;
    /// Number of codewords per sub-quantizer (`2^nbits`).
    fn ksub(&self) -> usize;
    /// Dimension of each sub-vector (`d / m`).
    fn dsub(&self) -> usize;
    /// Bytes per encoded vector (equal to `m`).
    fn code_size(&self) -> usize {
        self.m()
    }

    /// Trains all `m` sub-quantizer codebooks on `n` training vectors of
    /// dimension `m * dsub`, stored contiguously in `x`.
    ///
    /// # Errors
    ///
    /// Returns an error if `x.len() != n * m * dsub`.
    fn train(&mut self, n: usize, x: &[f32]) -> Result<()>;

    /// Encodes `n` vectors (contiguous in `x`, each `m * dsub` floats)
    /// into `out` (contiguous, each `m` bytes).
    ///
    /// # Errors
    ///
    /// Returns an error if buffer sizes don't match or the quantizer has
    /// not been trained.
    fn compute_codes(&self, x: &[f32], out: &mut [u8], n: usize) -> Result<()>;

    /// Decodes `n` codes (contiguous in `codes`, each `m` bytes) into
    /// `out` (contiguous, each `m * dsub` floats).
    ///
    /// # Errors
    ///
    /// Returns an error if buffer sizes don't match or the quantizer has
    /// not been trained.
    fn decode(&self, codes: &[u8], out: &mut [f32], n: usize) -> Result<()>;

    /// Returns the flattened codebook for sub-quantizer `sub`
    /// (`ksub * dsub` floats, row-major by codeword).
    fn codebook(&self, sub: usize) -> &[f32];
}

/// A trained (or untrained) product quantizer.
///
/// Codebooks are stored as `m` flattened `ksub * dsub` float buffers,
/// one per sub-quantizer, each row being one codeword.
#[derive(Debug, Clone)]
pub struct ProductQuantizer {
    d: usize,
    m: usize,
    dsub: usize,
    nbits: u32,
    ksub: usize,
    codebooks: Vec<Vec<f32>>,
    trained: bool,
}

impl ProductQuantizer {
    /// Creates an untrained product quantizer over vectors of dimension
    /// `d`, split into `m` sub-quantizers of `nbits` bits each.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `m` does not evenly divide `d`, or if
    /// `m` or `nbits` is zero.
    pub fn new(d: usize, m: usize, nbits: u32) -> Result<Self> {
        if m == 0 {
            return Err(Error::Config("product quantizer m must be > 0".to_string()));
        }
        if nbits == 0 || nbits > 16 {
            return Err(Error::Config(format!(
                "product quantizer nbits {nbits} out of range [1, 16]"
            )));
        }
        if d % m != 0 {
            return Err(Error::Config(format!(
                "product quantizer dimension {d} is not divisible by m={m}"
            )));
        }
        let dsub = d / m;
        let ksub = 1usize << nbits;
        Ok(Self {
            d,
            m,
            dsub,
            nbits,
            ksub,
            codebooks: vec![Vec::new(); m],
            trained: false,
        })
    }

    /// Reconstructs an already-trained quantizer from its codebooks (used
    /// by `crate::ivf::persistence` on load, where codebooks are read back
    /// from disk rather than produced by [`Quantizer::train`]).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] under the same conditions as [`Self::new`],
    /// or [`Error::Format`] if `codebooks` does not have exactly `m`
    /// entries of length `ksub * dsub` each.
    pub fn from_codebooks(d: usize, m: usize, nbits: u32, codebooks: Vec<Vec<f32>>) -> Result<Self> {
        let mut pq = Self::new(d, m, nbits)?;
        if codebooks.len() != m {
            return Err(Error::Format(format!(
                "expected {m} codebooks, got {}",
                codebooks.len()
            )));
        }
        let expected_len = pq.ksub * pq.dsub;
        for cb in &codebooks {
            if cb.len() != expected_len {
                return Err(Error::Format(format!(
                    "codebook length {} does not match ksub*dsub={expected_len}",
                    cb.len()
                )));
            }
        }
        pq.codebooks = codebooks;
        pq.trained = true;
        Ok(pq)
    }

    /// Input vector dimension.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.d
    }

    /// Whether [`Quantizer::train`] has been called successfully.
    #[must_use]
    pub fn is_trained(&self) -> bool {
        self.trained
    }

    fn check_trained(&self) -> Result<()> {
        if !self.trained {
            return Err(Error::NotTrained(
                "product quantizer has not been trained".to_string(),
            ));
        }
        Ok(())
    }

    /// Computes the ADC inner-product table for `query`: for each
    /// sub-quantizer `m_idx` and codeword `c`, `table[m_idx * ksub + c] =
    /// ⟨query_sub(m_idx), codebook[m_idx][c]⟩`.
    ///
    /// `table` must have length `m * ksub`.
    ///
    /// # Errors
    ///
    /// Returns an error if the quantizer is untrained or buffer sizes
    /// are wrong.
    pub fn compute_inner_prod_table(&self, query: &[f32], table: &mut [f32]) -> Result<()> {
        self.check_trained()?;
        if query.len() != self.d {
            return Err(Error::DimensionMismatch {
                expected: self.d,
                actual: query.len(),
            });
        }
        if table.len() != self.m * self.ksub {
            return Err(Error::Format(format!(
                "query table length {} does not match m*ksub={}",
                table.len(),
                self.m * self.ksub
            )));
        }

        for sub in 0..self.m {
            let q_sub = &query[sub * self.dsub..(sub + 1) * self.dsub];
            let codebook = &self.codebooks[sub];
            let table_row = &mut table[sub * self.ksub..(sub + 1) * self.ksub];
            for (c, entry) in table_row.iter_mut().enumerate() {
                let codeword = &codebook[c * self.dsub..(c + 1) * self.dsub];
                let mut dot = 0.0f32;
                for (&a, &b) in q_sub.iter().zip(codeword) {
                    dot += a * b;
                }
                *entry = dot;
            }
        }
        Ok(())
    }
}

impl Quantizer for ProductQuantizer {
    fn m(&self) -> usize {
        self.m
    }

    fn ksub(&self) -> usize {
        self.ksub
    }

    fn dsub(&self) -> usize {
        self.dsub
    }

    fn train(&mut self, n: usize, x: &[f32]) -> Result<()> {
        if x.len() != n * self.d {
            return Err(Error::Format(format!(
                "training buffer length {} does not match n*d={}",
                x.len(),
                n * self.d
            )));
        }
        if n == 0 {
            return Err(Error::Format(
                "cannot train a product quantizer on zero vectors".to_string(),
            ));
        }

        tracing::info!(
            m = self.m,
            ksub = self.ksub,
            n,
            d = self.d,
            "training product quantizer"
        );

        for sub in 0..self.m {
            // Gather the contiguous per-sub-vector training slice.
            let mut sub_data = Vec::with_capacity(n * self.dsub);
            for i in 0..n {
                let row = &x[i * self.d + sub * self.dsub..i * self.d + (sub + 1) * self.dsub];
                sub_data.extend_from_slice(row);
            }
            // Seed deterministically but distinctly per sub-quantizer.
            let seed = 0x5DEE_CE66_D1A4_B5B5 ^ (sub as u64).wrapping_mul(0x9E37_79B9);
            let centroids = kmeans::train_kmeans(&sub_data, n, self.dsub, self.ksub, 25, seed);
            self.codebooks[sub] = centroids;
        }

        self.trained = true;
        tracing::info!("product quantizer training converged");
        Ok(())
    }

    fn compute_codes(&self, x: &[f32], out: &mut [u8], n: usize) -> Result<()> {
        self.check_trained()?;
        if x.len() != n * self.d {
            return Err(Error::Format(format!(
                "encode input length {} does not match n*d={}",
                x.len(),
                n * self.d
            )));
        }
        if out.len() != n * self.m {
            return Err(Error::Format(format!(
                "encode output length {} does not match n*m={}",
                out.len(),
                n * self.m
            )));
        }

        for i in 0..n {
            let vector = &x[i * self.d..(i + 1) * self.d];
            let code = &mut out[i * self.m..(i + 1) * self.m];
            for sub in 0..self.m {
                let v_sub = &vector[sub * self.dsub..(sub + 1) * self.dsub];
                let codebook = &self.codebooks[sub];
                let mut best = 0u8;
                let mut best_dist = f32::MAX;
                for c in 0..self.ksub {
                    let codeword = &codebook[c * self.dsub..(c + 1) * self.dsub];
                    let dist = crate::distance::float_l2::squared_l2(v_sub, codeword);
                    if dist < best_dist {
                        best_dist = dist;
                        best = c as u8;
                    }
                }
                code[sub] = best;
            }
        }
        Ok(())
    }

    fn decode(&self, codes: &[u8], out: &mut [f32], n: usize) -> Result<()> {
        self.check_trained()?;
        if codes.len() != n * self.m {
            return Err(Error::Format(format!(
                "decode input length {} does not match n*m={}",
                codes.len(),
                n * self.m
            )));
        }
        if out.len() != n * self.d {
            return Err(Error::Format(format!(
                "decode output length {} does not match n*d={}",
                out.len(),
                n * self.d
            )));
        }

        for i in 0..n {
            let code = &codes[i * self.m..(i + 1) * self.m];
            let vector = &mut out[i * self.d..(i + 1) * self.d];
            for sub in 0..self.m {
                let codeword_idx = code[sub] as usize;
                let codebook = &self.codebooks[sub];
                let codeword = &codebook[codeword_idx * self.dsub..(codeword_idx + 1) * self.dsub];
                vector[sub * self.dsub..(sub + 1) * self.dsub].copy_from_slice(codeword);
            }
        }
        Ok(())
    }

    fn codebook(&self, sub: usize) -> &[f32] {
        &self.codebooks[sub]
    }
}
