//! Hierarchical Navigable Small World (HNSW) graph.
//!
//! A layered proximity graph used two ways in this crate: as the coarse
//! quantizer over IVF centroids (`crate::ivf::index` builds one with
//! [`crate::distance::FloatL2Space`]), and, standalone, as a byte-vector
//! index over [`crate::distance::IntL2Space`].

mod graph;
mod persistence;

pub use graph::{Hnsw, SearchResult};
