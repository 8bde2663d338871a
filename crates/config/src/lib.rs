//! Configuration module for riparr
//!
//! Handles loading configuration from TOML files and `RIPARR_*` environment variable overrides.

pub mod config;

pub use config::*;
