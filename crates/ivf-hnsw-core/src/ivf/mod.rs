//! The IVF-ADC index: an HNSW coarse quantizer over centroids, plus
//! product-quantized residuals and norms in per-centroid posting lists.

mod fvecs;
mod index;
mod persistence;
mod posting_list;

pub use fvecs::read_fvecs;
pub use index::{IvfAdcIndex, IvfSearchResult};
pub use posting_list::PostingList;
