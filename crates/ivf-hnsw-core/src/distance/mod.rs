//! Distance spaces: the contract the generic HNSW graph is built against.
//!
//! [`DistanceSpace`] is symmetric (query and stored element share one
//! representation) because every node the graph itself stores must be
//! directly comparable to every other node during construction, not just
//! to an external query. Two variants are provided:
//!
//! - [`FloatL2Space`]: raw float32 vectors. Used for the IVF-ADC coarse
//!   quantizer, whose nodes are centroids, and for a standalone
//!   float-vector HNSW.
//! - [`IntL2Space`]: byte vectors, accumulated in 32-bit integers. Used
//!   when HNSW itself indexes byte-valued (e.g. `bvecs`-style) data.
//!
//! - [`PqAdcSpace`]: PQ-compressed codes (`Vec<u8>`). Its [`DistanceSpace`]
//!   impl sums precomputed codeword-to-codeword distances, so HNSW can be
//!   built directly over compressed codes. This is distinct from its
//!   asymmetric `adc_distance` method (query float32 vs. stored code),
//!   which is the IVF-ADC index's own inner-loop distance evaluator over
//!   posting lists (`crate::ivf::index`) and is not part of this trait,
//!   since a query is never the same representation as a stored code.
//!
//! Each [`DistanceSpace`] impl is a monomorphic type, so the generic HNSW
//! graph (`crate::hnsw::Hnsw<D>`) specializes per space at compile time
//! rather than paying virtual-dispatch overhead in its inner loop.

pub(crate) mod float_l2;
mod int_l2;
mod pq_adc;

pub use float_l2::FloatL2Space;
pub use int_l2::IntL2Space;
pub use pq_adc::PqAdcSpace;

/// A distance space: given two elements in the same representation,
/// produces a non-negative scalar whose ordering agrees with squared
/// Euclidean distance ordering.
///
/// Also knows how to flatten an element to and from bytes, since
/// `crate::hnsw::persistence` needs a homogeneous on-disk payload size
/// per node without caring whether the underlying scalar is `f32` or
/// `u8`.
pub trait DistanceSpace: Send + Sync {
    /// The shared query/stored representation (e.g. a raw vector).
    type Elem: Clone + Send + Sync;

    /// Computes the distance between `a` and `b`.
    fn distance(&self, a: &Self::Elem, b: &Self::Elem) -> f32;

    /// Byte length of `elem`'s encoded form.
    fn encoded_len(&self, elem: &Self::Elem) -> usize;

    /// Appends `elem`'s little-endian encoded form to `out`.
    fn encode_element(&self, elem: &Self::Elem, out: &mut Vec<u8>);

    /// Decodes an element previously written by [`Self::encode_element`].
    fn decode_element(&self, bytes: &[u8]) -> Self::Elem;
}
