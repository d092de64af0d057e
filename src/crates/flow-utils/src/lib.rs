//! HTTP client and configuration-loading helpers shared by `flow-core`.
//!
//! This crate holds the ambient plumbing that `flow-core` needs but that
//! isn't part of the flow execution semantics itself: an HTTP client (for
//! the `webhook` lifecycle action) and environment/file configuration
//! loading (for process-level defaults such as client timeouts or a
//! default embedding model). Inbound HTTP/WebSocket transport is out of
//! scope for the core, so unlike the crate this one is derived from there
//! is no server module here.
//!
//! # Modules
//!
//! ## Client (`client`)
//!
//! HTTP client utilities with retry logic and authentication helpers:
//!
//! ```rust,ignore
//! use flow_utils::client::{ClientConfig, HttpClient};
//! use std::time::Duration;
//!
//! let config = ClientConfig::new()
//!     .with_timeout(Duration::from_secs(30))
//!     .with_max_retries(3)
//!     .with_user_agent("flow-core");
//!
//! let client = HttpClient::new(config)?;
//! let response = client.get("https://api.example.com").await?;
//! ```
//!
//! ## Config (`config`)
//!
//! Configuration management utilities for environment variables and file loading:
//!
//! ```rust,ignore
//! use flow_utils::config::{get_env, get_env_parse, load_config_file};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct EngineDefaults {
//!     default_max_parallel_tasks: usize,
//! }
//!
//! let defaults: EngineDefaults = load_config_file("flow-core.yaml")?;
//! ```
//!
//! # Features
//!
//! - `client` - Client utilities (enabled by default)
//! - `config` - Configuration utilities (enabled by default)

pub mod error;

#[cfg(feature = "client")]
pub mod client;

#[cfg(feature = "config")]
pub mod config;

// Re-export commonly used types
pub use error::{Result, UtilsError};

#[cfg(feature = "client")]
pub use client::{AuthHelper, ClientConfig, HttpClient};

#[cfg(feature = "config")]
pub use config::{
    get_env, get_env_bool, get_env_bool_or, get_env_or, get_env_parse, get_env_parse_or,
    load_config_file, load_json_config, load_yaml_config, ConfigBuilder, FromEnv, ValidateConfig,
};
