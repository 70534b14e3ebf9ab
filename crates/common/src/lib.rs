//! imagetest Common Library
//!
//! Shared error taxonomy, configuration and resource types used by the
//! lifecycle harness and the command-line front end.

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{
    ClusterConfig, EngineConfig, HarnessConfig, HelmConfig, PollPolicy, PollingConfig,
};
pub use error::{Error, Result};
pub use types::*;

/// imagetest version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
