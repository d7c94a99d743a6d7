//! One-dimensional product quantizer specialization for reconstructed
//! vector norms.
//!
//! The IVF-ADC index needs `||x̂||²` per stored vector to evaluate the
//! distance identity in `crate::ivf::index`, but storing a full float32
//! per vector would dwarf the residual code's own size. Instead norms
//! are quantized with a dedicated 1-D, `ksub=256` product quantizer —
//! exactly [`ProductQuantizer`] with `d=1, m=1, nbits=8`.

use super::{ProductQuantizer, Quantizer};
use crate::error::Result;

/// A 1-D PQ over squared vector norms (`d=1`, `m=1`, `ksub=256`).
#[derive(Debug, Clone)]
pub struct NormQuantizer {
    inner: ProductQuantizer,
}

impl NormQuantizer {
    /// Creates an untrained norm quantizer.
    ///
    /// # Errors
    ///
    /// Never fails in practice (`d=1, m=1, nbits=8` is always valid) but
    /// returns a `Result` to match [`ProductQuantizer::new`]'s contract.
    pub fn new() -> Result<Self> {
        Ok(Self {
            inner: ProductQuantizer::new(1, 1, 8)?,
        })
    }

    /// Trains the norm codebook on `norms`.
    ///
    /// # Errors
    ///
    /// Returns an error if `norms` is empty.
    pub fn train(&mut self, norms: &[f32]) -> Result<()> {
        self.inner.train(norms.len(), norms)
    }

    /// Whether [`Self::train`] has run.
    #[must_use]
    pub fn is_trained(&self) -> bool {
        self.inner.is_trained()
    }

    /// Encodes `norms` into one byte per entry.
    ///
    /// # Errors
    ///
    /// Returns an error if untrained.
    pub fn encode(&self, norms: &[f32]) -> Result<Vec<u8>> {
        let n = norms.len();
        let mut out = vec![0u8; n];
        self.inner.compute_codes(norms, &mut out, n)?;
        Ok(out)
    }

    /// Decodes `codes` back into (lossy) norm values.
    ///
    /// # Errors
    ///
    /// Returns an error if untrained.
    pub fn decode(&self, codes: &[u8]) -> Result<Vec<f32>> {
        let n = codes.len();
        let mut out = vec![0.0f32; n];
        self.inner.decode(codes, &mut out, n)?;
        Ok(out)
    }

    /// Decodes `codes` into a caller-owned scratch buffer, resizing it to
    /// `codes.len()` first. Avoids a fresh allocation per query when called
    /// from a thread-local scratch buffer (see `crate::ivf::index::search`).
    ///
    /// # Errors
    ///
    /// Returns an error if untrained.
    pub fn decode_into(&self, codes: &[u8], out: &mut Vec<f32>) -> Result<()> {
        let n = codes.len();
        out.clear();
        out.resize(n, 0.0);
        self.inner.decode(codes, out, n)
    }

    /// Returns the 256-entry flattened codebook, for persistence.
    #[must_use]
    pub fn codebook(&self) -> &[f32] {
        self.inner.codebook(0)
    }

    /// Reconstructs an already-trained norm quantizer from its 256-entry
    /// codebook (used by `crate::ivf::persistence` on load).
    ///
    /// # Errors
    ///
    /// Returns an error if `codebook` does not have exactly 256 entries.
    pub fn from_codebook(codebook: Vec<f32>) -> Result<Self> {
        Ok(Self {
            inner: ProductQuantizer::from_codebooks(1, 1, 8, vec![codebook])?,
        })
    }
}

impl Default for NormQuantizer {
    fn default() -> Self {
        Self::new().expect("d=1, m=1, nbits=8 is always a valid configuration")
    }
}
