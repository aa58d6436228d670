//! Configuration module for Sumi-Ledger
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use sumi_ledger::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("crawler.toml")).unwrap();
//! println!("Crawler will use {} threads", config.crawler.num_threads);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    ChecksumConfig, Config, CrawlerConfig, DataStoreConfig, DocumentChecksumKind, OrphansStrategy,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
