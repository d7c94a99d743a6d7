//! Error types for `ivf-hnsw-core`.
//!
//! This module provides a unified error type for all index operations,
//! following the taxonomy of format, I/O, invariant, configuration, and
//! training errors.

use thiserror::Error;

/// Result type alias for `ivf-hnsw-core` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in `ivf-hnsw-core` operations.
///
/// Each variant carries a descriptive message. Error codes follow the
/// pattern `IVFHNSW-XXX` for easy debugging.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input record: wrong dimension, truncated file, bad magic bytes (IVFHNSW-001).
    #[error("[IVFHNSW-001] Format error: {0}")]
    Format(String),

    /// IO error (IVFHNSW-002).
    #[error("[IVFHNSW-002] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal invariant was violated: missing enter point, mismatched
    /// posting-list lengths, etc. Always a programmer bug (IVFHNSW-003).
    #[error("[IVFHNSW-003] Invariant violated: {0}")]
    Invariant(String),

    /// Configuration value out of range or malformed (IVFHNSW-004).
    #[error("[IVFHNSW-004] Configuration error: {0}")]
    Config(String),

    /// Operation requires a prior training/build step that has not run (IVFHNSW-005).
    #[error("[IVFHNSW-005] Not trained: {0}")]
    NotTrained(String),

    /// Vector dimension mismatch (IVFHNSW-006).
    #[error("[IVFHNSW-006] Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Actual dimension.
        actual: usize,
    },
}

impl Error {
    /// Returns the stable error code (e.g. `"IVFHNSW-001"`).
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Format(_) => "IVFHNSW-001",
            Self::Io(_) => "IVFHNSW-002",
            Self::Invariant(_) => "IVFHNSW-003",
            Self::Config(_) => "IVFHNSW-004",
            Self::NotTrained(_) => "IVFHNSW-005",
            Self::DimensionMismatch { .. } => "IVFHNSW-006",
        }
    }

    /// Returns true if this error indicates a non-recoverable (programmer-bug)
    /// condition rather than a user-correctable one.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Invariant(_))
    }
}
