//! Configuration module for vidprep
//!
//! Handles loading configuration from TOML files, environment variable overrides,
//! and the per-run processing settings handed to the pipeline.

pub mod config;
pub mod settings;

pub use config::*;
pub use settings::*;
