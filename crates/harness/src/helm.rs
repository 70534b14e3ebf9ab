//! Chart packaging
//!
//! Thin sequencing around `helm package`, `lint`, `install` and `list`.
//! Nothing here polls; every call is one synchronous invocation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use imagetest_common::{Error, HarnessConfig, ResourceHandle, ResourceKind, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::exec::{CommandResult, CommandRunner, Invocation};
use crate::extract::{parse_helm_releases, parse_package_path, reports_missing, HelmRelease};
use crate::registry::CleanupRegistry;

/// The fields of `Chart.yaml` the harness cares about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ChartMetadata {
    /// Archive name `helm package` produces, `<name>-<version>.tgz`
    pub fn archive_name(&self) -> String {
        format!("{}-{}.tgz", self.name, self.version)
    }

    /// Chart column of `helm list`, `<name>-<version>`
    pub fn chart_label(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }
}

pub fn chart_metadata(chart_dir: &Path) -> Result<ChartMetadata> {
    let content = std::fs::read_to_string(chart_dir.join("Chart.yaml"))?;
    Ok(serde_yaml::from_str(&content)?)
}

#[derive(Clone)]
pub struct ChartPackager {
    config: Arc<HarnessConfig>,
    runner: Arc<dyn CommandRunner>,
    registry: Arc<CleanupRegistry>,
    namespace: String,
}

impl ChartPackager {
    pub fn new(
        config: Arc<HarnessConfig>,
        runner: Arc<dyn CommandRunner>,
        registry: Arc<CleanupRegistry>,
    ) -> Self {
        let namespace = config.cluster.namespace.clone();
        Self {
            config,
            runner,
            registry,
            namespace,
        }
    }

    pub fn in_namespace(&self, namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..self.clone()
        }
    }

    fn helm(&self) -> Invocation {
        Invocation::new(&self.config.helm.binary).timeout(self.config.helm.command_timeout())
    }

    /// `helm package <chart_dir>`. A non-zero exit is returned, not raised.
    pub fn package(&self, chart_dir: &Path) -> Result<CommandResult> {
        let dir = chart_dir.display().to_string();
        info!("Packaging chart {}", dir);
        self.runner.run(&self.helm().args(["package", dir.as_str()]))
    }

    /// Package into `destination` and return the archive path, checking that
    /// helm produced the archive `Chart.yaml` promises.
    pub fn package_archive(&self, chart_dir: &Path, destination: &Path) -> Result<PathBuf> {
        let metadata = chart_metadata(chart_dir)?;
        let dir = chart_dir.display().to_string();
        let dest = destination.display().to_string();
        let result = self
            .runner
            .run(&self.helm().args(["package", dir.as_str(), "--destination", dest.as_str()]))?
            .ensure_success()?;

        let archive = parse_package_path(&result.stdout).ok_or_else(|| {
            Error::extraction(
                ResourceKind::HelmRelease,
                format!("helm package reported no archive: {}", result.stdout_trimmed()),
            )
        })?;
        let expected = metadata.archive_name();
        if archive.file_name().and_then(|n| n.to_str()) != Some(expected.as_str()) {
            return Err(Error::extraction(
                ResourceKind::HelmRelease,
                format!("expected {} but helm wrote {}", expected, archive.display()),
            ));
        }
        info!("Packaged {}", archive.display());
        Ok(archive)
    }

    /// Archive path `package_archive` will produce under `destination`
    pub fn expected_archive(&self, chart_dir: &Path, destination: &Path) -> Result<PathBuf> {
        Ok(destination.join(chart_metadata(chart_dir)?.archive_name()))
    }

    pub fn lint(&self, chart_dir: &Path) -> Result<CommandResult> {
        let dir = chart_dir.display().to_string();
        self.runner
            .run(&self.helm().args(["lint", dir.as_str()]))?
            .ensure_success()
    }

    pub fn releases(&self) -> Result<Vec<HelmRelease>> {
        let result = self
            .runner
            .run(&self.helm().args(["list", "-o", "json", "-n", self.namespace.as_str()]))?
            .ensure_success()?;
        parse_helm_releases(&result.stdout)
    }

    pub fn release(&self, name: &str) -> Result<Option<HelmRelease>> {
        Ok(self.releases()?.into_iter().find(|r| r.name == name))
    }

    pub fn is_installed(&self, name: &str) -> Result<bool> {
        Ok(self.release(name)?.is_some())
    }

    fn uninstall_invocation(&self, release: &str) -> Invocation {
        self.helm()
            .args(["uninstall", release, "-n", self.namespace.as_str()])
    }

    /// Install `archive` as `release`, replacing an earlier installation.
    ///
    /// The release is registered for uninstall before helm runs, and must be
    /// listed as `deployed` with the chart's version afterwards.
    pub fn install(
        &self,
        release: &str,
        archive: &Path,
        chart: &ChartMetadata,
        values: &[(String, String)],
    ) -> Result<HelmRelease> {
        if self.is_installed(release)? {
            info!("Release {} already installed, removing it first", release);
            self.uninstall(release)?;
        }

        let handle = ResourceHandle::new(ResourceKind::HelmRelease, release)
            .in_namespace(self.namespace.clone());
        if !self.registry.contains(&handle) {
            let runner = Arc::clone(&self.runner);
            let uninstall = self.uninstall_invocation(release);
            self.registry.register(handle, move || {
                let result = runner.run(&uninstall)?;
                if reports_missing(&result) {
                    return Ok(());
                }
                result.ensure_success().map(drop)
            });
        }

        let path = archive.display().to_string();
        let mut inv = self
            .helm()
            .args(["install", release, path.as_str(), "-n", self.namespace.as_str()]);
        for (key, value) in values {
            inv = inv.arg("--set").arg(format!("{key}={value}"));
        }
        inv = inv.args(["-o", "json"]);
        self.runner.run(&inv)?.ensure_success()?;

        let installed = self.release(release)?.ok_or_else(|| Error::NotFound {
            kind: ResourceKind::HelmRelease,
            id: release.to_string(),
        })?;
        debug!("helm list reports {:?}", installed);
        if installed.status != "deployed" || installed.chart != chart.chart_label() {
            return Err(Error::TerminalState {
                what: format!("helm release {release}"),
                reason: format!(
                    "status {} with chart {}, expected deployed {}",
                    installed.status,
                    installed.chart,
                    chart.chart_label()
                ),
            });
        }
        info!("Installed release {} ({})", release, installed.chart);
        Ok(installed)
    }

    /// Removing a release that is not installed succeeds
    pub fn uninstall(&self, release: &str) -> Result<()> {
        let result = self.runner.run(&self.uninstall_invocation(release))?;
        if !reports_missing(&result) {
            result.ensure_success()?;
        }
        self.registry.forget(
            &ResourceHandle::new(ResourceKind::HelmRelease, release)
                .in_namespace(self.namespace.clone()),
        );
        Ok(())
    }
}
