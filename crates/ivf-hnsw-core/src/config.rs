//! Layered configuration for index tuning parameters.
//!
//! Provides configuration file support via `ivfhnsw.toml`, environment
//! variables, and runtime overrides.
//!
//! # Priority (highest to lowest)
//!
//! 1. Runtime overrides (constructed directly)
//! 2. Environment variables (`IVFHNSW_*`)
//! 3. Configuration file (`ivfhnsw.toml`)
//! 4. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Error;

/// HNSW coarse-quantizer construction parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswConfig {
    /// Connections per node at upper layers (M parameter).
    pub m: usize,
    /// Dynamic candidate-list size used during construction.
    pub ef_construction: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
        }
    }
}

/// IVF-ADC tuning parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IvfConfig {
    /// Number of coarse centroids (nc).
    pub nc: usize,
    /// Number of centroids probed per query.
    pub nprobe: usize,
    /// Soft cap on the cumulative number of codes scanned per query.
    pub max_codes: usize,
    /// Number of sub-quantizers (M) for the residual product quantizer.
    pub pq_m: usize,
    /// Bits per sub-quantizer index (ksub = 2^nbits).
    pub pq_nbits: u32,
}

impl Default for IvfConfig {
    fn default() -> Self {
        Self {
            nc: 1024,
            nprobe: 16,
            max_codes: usize::MAX,
            pq_m: 8,
            pq_nbits: 8,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace.
    pub level: String,
    /// Log format: text or json.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Top-level configuration for an `ivf-hnsw-core` index.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IvfHnswConfig {
    /// HNSW coarse-quantizer configuration.
    pub hnsw: HnswConfig,
    /// IVF-ADC configuration.
    pub ivf: IvfConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl IvfHnswConfig {
    /// Loads configuration from `ivfhnsw.toml` in the current directory,
    /// overridden by `IVFHNSW_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be parsed.
    pub fn load() -> Result<Self, Error> {
        Self::load_from_path("ivfhnsw.toml")
    }

    /// Loads configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration parsing fails.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("IVFHNSW_").split("_").lowercase(false));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Builds a configuration from a TOML string (used in tests).
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or validation fails.
    pub fn from_toml(toml_str: &str) -> Result<Self, Error> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::string(toml_str));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates range constraints on tuning parameters.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid field encountered.
    pub fn validate(&self) -> Result<(), Error> {
        if !(4..=128).contains(&self.hnsw.m) {
            return Err(Error::Config(format!(
                "hnsw.m value {} is out of range [4, 128]",
                self.hnsw.m
            )));
        }
        if !(16..=2000).contains(&self.hnsw.ef_construction) {
            return Err(Error::Config(format!(
                "hnsw.ef_construction value {} is out of range [16, 2000]",
                self.hnsw.ef_construction
            )));
        }
        if self.ivf.nc == 0 {
            return Err(Error::Config("ivf.nc must be > 0".to_string()));
        }
        if self.ivf.nprobe == 0 || self.ivf.nprobe > self.ivf.nc {
            return Err(Error::Config(format!(
                "ivf.nprobe value {} must be in (0, nc={}]",
                self.ivf.nprobe, self.ivf.nc
            )));
        }
        if self.ivf.pq_m == 0 {
            return Err(Error::Config("ivf.pq_m must be > 0".to_string()));
        }
        if !(1..=16).contains(&self.ivf.pq_nbits) {
            return Err(Error::Config(format!(
                "ivf.pq_nbits value {} is out of range [1, 16]",
                self.ivf.pq_nbits
            )));
        }
        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(Error::Config(format!(
                "logging.level value '{}' is invalid, expected one of: {:?}",
                self.logging.level, valid_levels
            )));
        }
        Ok(())
    }

    /// Returns `ksub = 2^nbits`, the number of codewords per sub-quantizer.
    #[must_use]
    pub fn ksub(&self) -> usize {
        1usize << self.ivf.pq_nbits
    }
}
