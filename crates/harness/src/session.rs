//! Test session
//!
//! A session owns the configuration, the command runner and one cleanup
//! registry. Managers handed out by the session share all three, so every
//! resource any of them creates is released when the session ends.

use std::sync::Arc;

use imagetest_common::{HarnessConfig, Result};
use tracing::warn;

use crate::cluster::ClusterManager;
use crate::container::ContainerManager;
use crate::exec::{CommandRunner, SystemRunner};
use crate::helm::ChartPackager;
use crate::registry::{CleanupRegistry, TeardownReport};

pub struct Session {
    config: Arc<HarnessConfig>,
    runner: Arc<dyn CommandRunner>,
    registry: Arc<CleanupRegistry>,
    containers: ContainerManager,
}

impl Session {
    /// Session that runs real binaries
    pub fn new(config: HarnessConfig) -> Result<Self> {
        Self::with_runner(config, Arc::new(SystemRunner::new()))
    }

    pub fn with_runner(config: HarnessConfig, runner: Arc<dyn CommandRunner>) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let registry = Arc::new(CleanupRegistry::new());
        let containers =
            ContainerManager::new(Arc::clone(&config), Arc::clone(&runner), Arc::clone(&registry));
        Ok(Self {
            config,
            runner,
            registry,
            containers,
        })
    }

    /// Run `body` in a fresh session and tear it down afterwards.
    ///
    /// An error from `body` is returned as is, even when teardown also
    /// fails. Teardown failures after a successful body are returned as
    /// `Error::Cleanup`.
    pub fn scoped<T, F>(config: HarnessConfig, body: F) -> Result<T>
    where
        F: FnOnce(&Session) -> Result<T>,
    {
        Self::new(config)?.run_scoped(body)
    }

    pub fn scoped_with_runner<T, F>(
        config: HarnessConfig,
        runner: Arc<dyn CommandRunner>,
        body: F,
    ) -> Result<T>
    where
        F: FnOnce(&Session) -> Result<T>,
    {
        Self::with_runner(config, runner)?.run_scoped(body)
    }

    fn run_scoped<T, F>(self, body: F) -> Result<T>
    where
        F: FnOnce(&Session) -> Result<T>,
    {
        // a panic in `body` unwinds through Drop, which tears down
        let outcome = body(&self);
        let report = self.teardown();
        match outcome {
            Ok(value) => report.into_result().map(|()| value),
            Err(e) => {
                if !report.is_clean() {
                    warn!(
                        "Teardown after a failed test left {} resource(s) behind",
                        report.failures.len()
                    );
                }
                Err(e)
            }
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    pub fn registry(&self) -> &Arc<CleanupRegistry> {
        &self.registry
    }

    pub fn containers(&self) -> ContainerManager {
        self.containers.clone()
    }

    pub fn cluster(&self) -> ClusterManager {
        ClusterManager::new(
            Arc::clone(&self.config),
            Arc::clone(&self.runner),
            Arc::clone(&self.registry),
        )
    }

    pub fn helm(&self) -> ChartPackager {
        ChartPackager::new(
            Arc::clone(&self.config),
            Arc::clone(&self.runner),
            Arc::clone(&self.registry),
        )
    }

    /// Release everything registered so far
    pub fn teardown(&self) -> TeardownReport {
        self.registry.teardown()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.registry.is_empty() {
            let report = self.registry.teardown();
            if !report.is_clean() {
                warn!("Session teardown failed for {} resource(s)", report.failures.len());
            }
        }
    }
}
