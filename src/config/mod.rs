//! Configuration management for the image server.
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Environment Variables
//!
//! Layered keys follow the pattern `IPX__<section>__<key>`:
//! - `IPX__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `IPX__SOURCES__MAX_AGE=3600`
//!
//! The flat names `IPX_DIR`, `IPX_DOMAINS`, `IPX_ALIAS`, `IPX_FETCH_OPTIONS`,
//! `IPX_MAX_AGE` and `IPX_CACHE_ENABLED` are also honored, applied last,
//! with permissive literal parsing (`IPX_DIR=false` disables the
//! filesystem supplier, `IPX_DOMAINS=a.com,b.com` is a list).
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/ipx.toml`.
//! This can be overridden using the `IPX_CONFIG` environment variable.

mod models;
mod sources;

pub use models::{
    CacheBackend, CacheConfig, Config, FetchConfig, ServerConfig, SourcesConfig,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        Ok(config)
    }
}
