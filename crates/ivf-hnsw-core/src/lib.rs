//! Billion-scale approximate nearest neighbor search.
//!
//! An HNSW graph serves as the coarse quantizer over a set of centroids;
//! database vectors are assigned to their nearest centroid and stored as
//! a product-quantized residual plus a separately product-quantized norm,
//! in one posting list per centroid. Queries probe the `nprobe` nearest
//! centroids and rank candidates via asymmetric distance computation
//! (ADC) against the residual codes, reconstructing an exact-L2-comparable
//! distance from the identity in [`ivf::IvfAdcIndex::search`]'s docs.
//!
//! The generic [`hnsw::Hnsw`] graph is also usable standalone, over either
//! raw float vectors ([`distance::FloatL2Space`]) or byte vectors
//! ([`distance::IntL2Space`]).

pub mod config;
pub mod distance;
pub mod error;
pub mod hnsw;
pub mod ivf;
pub mod pq;
pub mod util;

pub use config::IvfHnswConfig;
pub use error::{Error, Result};
pub use ivf::{IvfAdcIndex, IvfSearchResult};
