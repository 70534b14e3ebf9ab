//! CLI Commands

pub mod config;
pub mod container;
pub mod helm;
pub mod imagestreams;
pub mod openshift;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use imagetest_common::HarnessConfig;
use tracing::debug;

pub const DEFAULT_CONFIG_PATH: &str = "imagetest.toml";

/// Global options shared by every subcommand
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub config: Option<PathBuf>,
    pub engine: Option<String>,
    pub namespace: Option<String>,
}

impl GlobalOptions {
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Load the config file and apply command-line overrides
    pub fn load_config(&self) -> Result<HarnessConfig> {
        let path = self.config_path();
        let mut config = HarnessConfig::load(&path)
            .with_context(|| format!("loading {}", path.display()))?;
        if let Some(engine) = &self.engine {
            config.engine.binary = engine.clone();
        }
        if let Some(namespace) = &self.namespace {
            config.cluster.namespace = namespace.clone();
        }
        config.validate()?;
        debug!(
            "Loaded {} (engine {}, namespace {})",
            path.display(),
            config.engine.binary,
            config.cluster.namespace
        );
        Ok(config)
    }
}

/// Parse a `KEY=VALUE` argument
pub fn parse_pair(arg: &str) -> std::result::Result<(String, String), String> {
    match arg.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {arg:?}")),
    }
}

pub fn timeout(secs: Option<u64>) -> Option<Duration> {
    secs.map(Duration::from_secs)
}
