//! Image Stream Commands

use std::path::PathBuf;

use anyhow::Result;
use clap::Subcommand;
use imagetest_harness::{FileReport, ImageStreamFiles};

use super::GlobalOptions;
use crate::output::{print_list, print_verdict, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum ImagestreamsCommands {
    /// Check that every definition carries the latest version
    Check {
        /// Directory holding the `*.json` definitions
        #[arg(long, default_value = "imagestreams")]
        dir: PathBuf,

        /// Makefile whose `VERSIONS =` line names the latest version
        #[arg(long, default_value = "Makefile")]
        makefile: PathBuf,

        /// Version to look for instead of the Makefile's latest
        #[arg(long)]
        version: Option<String>,
    },
}

impl TableDisplay for FileReport {
    fn headers() -> Vec<&'static str> {
        vec!["File", "Version Tag", "Latest Tag"]
    }

    fn row(&self) -> Vec<String> {
        let mark = |ok: bool| (if ok { "ok" } else { "missing" }).to_string();
        vec![
            self.file.display().to_string(),
            mark(self.version_tag_found),
            mark(self.latest_points_to_version),
        ]
    }
}

pub fn execute(cmd: ImagestreamsCommands, _global: &GlobalOptions, format: OutputFormat) -> Result<bool> {
    match cmd {
        ImagestreamsCommands::Check {
            dir,
            makefile,
            version,
        } => {
            let version = match version {
                Some(version) => version,
                None => ImageStreamFiles::latest_version(&makefile)?,
            };
            let reports = ImageStreamFiles::new(&dir).check(&version)?;
            print_list(&reports, format)?;

            let passed = reports.iter().all(FileReport::passed);
            if matches!(format, OutputFormat::Table | OutputFormat::Plain) {
                let message = if passed {
                    format!("image streams in {} carry version {}", dir.display(), version)
                } else {
                    format!("image streams in {} lack version {}", dir.display(), version)
                };
                print_verdict(passed, &message, format);
            }
            Ok(passed)
        }
    }
}
