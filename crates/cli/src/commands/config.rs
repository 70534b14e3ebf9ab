//! Config Commands

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Subcommand;
use imagetest_common::HarnessConfig;

use super::GlobalOptions;
use crate::output::{print_success, render, OutputFormat};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Write a configuration file with default values
    Init {
        /// Destination; defaults to the --config path
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub fn execute(cmd: ConfigCommands, global: &GlobalOptions, format: OutputFormat) -> Result<bool> {
    match cmd {
        ConfigCommands::Show => {
            let config = global.load_config()?;
            match format {
                OutputFormat::Json | OutputFormat::Yaml => println!("{}", render(&config, format)?),
                _ => print!("{}", toml::to_string_pretty(&config)?),
            }
            Ok(true)
        }

        ConfigCommands::Init { path, force } => {
            let path = path.unwrap_or_else(|| global.config_path());
            if path.exists() && !force {
                bail!("{} already exists; pass --force to overwrite", path.display());
            }
            HarnessConfig::default().save(&path)?;
            print_success(&format!("Wrote {}", path.display()));
            Ok(true)
        }
    }
}
