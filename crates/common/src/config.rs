//! Harness configuration
//!
//! Every binary name, namespace, timeout and polling interval the harness
//! uses is supplied here. The library never consults the environment; the
//! command-line front end is responsible for mapping environment variables
//! onto these values.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Top-level harness configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Container engine configuration
    pub engine: EngineConfig,

    /// Cluster client configuration
    pub cluster: ClusterConfig,

    /// Chart packaging configuration
    pub helm: HelmConfig,

    /// Polling policies for every waiting operation
    pub polling: PollingConfig,
}

/// Container engine (docker/podman) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine binary, e.g. `docker` or `podman`
    pub binary: String,

    /// Timeout for a single engine invocation, in seconds
    pub command_timeout_secs: u64,

    /// Seconds `stop` waits before the engine kills a container
    pub stop_grace_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            command_timeout_secs: 120,
            stop_grace_secs: 10,
        }
    }
}

impl EngineConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Cluster client (oc) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Cluster client binary
    pub binary: String,

    /// Project every cluster call is scoped to
    pub namespace: String,

    /// Delete the project on teardown when the harness created it
    pub delete_project: bool,

    /// Timeout for a single client invocation, in seconds
    pub command_timeout_secs: u64,

    /// Image of the helper pod that sends requests from inside the cluster
    pub helper_image: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            binary: "oc".to_string(),
            namespace: "default".to_string(),
            delete_project: true,
            command_timeout_secs: 120,
            helper_image: "registry.access.redhat.com/ubi8/ubi".to_string(),
        }
    }
}

impl ClusterConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Chart packaging (helm) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HelmConfig {
    /// Package manager binary
    pub binary: String,

    /// Timeout for a single helm invocation, in seconds
    pub command_timeout_secs: u64,
}

impl Default for HelmConfig {
    fn default() -> Self {
        Self {
            binary: "helm".to_string(),
            command_timeout_secs: 300,
        }
    }
}

impl HelmConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Interval and deadline for one waiting operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Pause between attempts, in milliseconds
    pub interval_ms: u64,

    /// Wall-clock budget for the whole wait, in seconds
    pub deadline_secs: u64,

    /// Back-to-back extraction failures tolerated before giving up
    #[serde(default = "default_max_extraction_errors")]
    pub max_extraction_errors: u32,
}

fn default_max_extraction_errors() -> u32 {
    3
}

impl PollPolicy {
    pub const fn new(interval_ms: u64, deadline_secs: u64) -> Self {
        Self {
            interval_ms,
            deadline_secs,
            max_extraction_errors: 3,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    pub fn validate(&self, name: &str) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(Error::InvalidConfig(format!(
                "polling.{name}: interval must be positive"
            )));
        }
        if self.deadline_secs == 0 {
            return Err(Error::InvalidConfig(format!(
                "polling.{name}: deadline must be positive"
            )));
        }
        Ok(())
    }
}

/// Polling policies, one per waiting operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub container_running: PollPolicy,
    pub container_ready: PollPolicy,
    /// Window in which a container is expected to die when creation should fail
    pub creation_failure: PollPolicy,
    pub image_pull: PollPolicy,
    pub pod_ready: PollPolicy,
    pub build_complete: PollPolicy,
    pub image_stream_tag: PollPolicy,
    pub deployment_ready: PollPolicy,
    /// Retries of an HTTP check against a route
    pub route_response: PollPolicy,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            container_running: PollPolicy::new(1_000, 30),
            container_ready: PollPolicy::new(2_000, 60),
            creation_failure: PollPolicy::new(2_000, 20),
            image_pull: PollPolicy::new(5_000, 300),
            pod_ready: PollPolicy::new(3_000, 540),
            build_complete: PollPolicy::new(3_000, 900),
            image_stream_tag: PollPolicy::new(1_000, 60),
            deployment_ready: PollPolicy::new(3_000, 300),
            route_response: PollPolicy::new(10_000, 60),
        }
    }
}

impl PollingConfig {
    fn policies(&self) -> [(&'static str, &PollPolicy); 9] {
        [
            ("container_running", &self.container_running),
            ("container_ready", &self.container_ready),
            ("creation_failure", &self.creation_failure),
            ("image_pull", &self.image_pull),
            ("pod_ready", &self.pod_ready),
            ("build_complete", &self.build_complete),
            ("image_stream_tag", &self.image_stream_tag),
            ("deployment_ready", &self.deployment_ready),
            ("route_response", &self.route_response),
        ]
    }
}

impl HarnessConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            debug!("Loaded configuration from {}", path.display());
            Ok(config)
        } else {
            debug!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        info!("Wrote configuration to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for (name, policy) in self.polling.policies() {
            policy.validate(name)?;
        }
        if self.engine.binary.trim().is_empty() {
            return Err(Error::InvalidConfig("engine.binary is empty".to_string()));
        }
        if self.cluster.binary.trim().is_empty() {
            return Err(Error::InvalidConfig("cluster.binary is empty".to_string()));
        }
        if self.cluster.namespace.trim().is_empty() {
            return Err(Error::InvalidConfig("cluster.namespace is empty".to_string()));
        }
        if self.cluster.helper_image.trim().is_empty() {
            return Err(Error::InvalidConfig("cluster.helper_image is empty".to_string()));
        }
        Ok(())
    }
}
