//! Small utilities shared by the HNSW graph and the IVF-ADC search loop.

pub mod ordered_float;

pub use ordered_float::OrderedFloat;
