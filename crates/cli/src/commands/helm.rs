//! Helm Commands

use std::path::PathBuf;

use anyhow::Result;
use clap::Subcommand;
use imagetest_common::Error;
use imagetest_harness::{chart_metadata, ChartMetadata, Session};
use serde::Serialize;

use super::GlobalOptions;
use crate::output::{print_item, print_verdict, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum HelmCommands {
    /// Package a chart and verify the archive name
    Package {
        /// Chart directory containing Chart.yaml
        chart: PathBuf,

        /// Directory the archive is written to
        #[arg(short, long, default_value = ".")]
        destination: PathBuf,
    },

    /// Lint a chart
    Lint {
        /// Chart directory containing Chart.yaml
        chart: PathBuf,
    },
}

#[derive(Serialize)]
pub struct PackageDisplay {
    pub chart: String,
    pub version: String,
    pub app_version: String,
    pub archive: String,
}

impl PackageDisplay {
    fn new(metadata: ChartMetadata, archive: PathBuf) -> Self {
        Self {
            chart: metadata.name,
            version: metadata.version,
            app_version: metadata.app_version.unwrap_or_default(),
            archive: archive.display().to_string(),
        }
    }
}

impl TableDisplay for PackageDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Chart", "Version", "App Version", "Archive"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.chart.clone(),
            self.version.clone(),
            self.app_version.clone(),
            self.archive.clone(),
        ]
    }
}

pub fn execute(cmd: HelmCommands, global: &GlobalOptions, format: OutputFormat) -> Result<bool> {
    let session = Session::new(global.load_config()?)?;
    let helm = session.helm();

    match cmd {
        HelmCommands::Package { chart, destination } => {
            let metadata = chart_metadata(&chart)?;
            let archive = helm.package_archive(&chart, &destination)?;
            print_item(&PackageDisplay::new(metadata, archive), format)?;
            Ok(true)
        }

        HelmCommands::Lint { chart } => {
            match helm.lint(&chart) {
                Ok(_) => {
                    print_verdict(true, &format!("{} passed lint", chart.display()), format);
                    Ok(true)
                }
                Err(Error::CommandFailed { stderr, .. }) => {
                    print_verdict(false, &format!("{} failed lint: {stderr}", chart.display()), format);
                    Ok(false)
                }
                Err(e) => Err(e.into()),
            }
        }
    }
}
