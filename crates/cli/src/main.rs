//! imagetest CLI - Main Entry Point

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use imagetest_cli::commands::{
    config, container, helm, imagestreams, openshift, GlobalOptions,
};
use imagetest_cli::output::{self, OutputFormat};
use imagetest_cli::{exit_code, EXIT_CHECK_FAILED};

/// imagetest - lifecycle checks for container images and OpenShift workloads
#[derive(Parser)]
#[command(name = "imagetest")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(long, env = "IMAGETEST_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Container engine binary (docker or podman)
    #[arg(long, env = "CONTAINER_ENGINE", global = true)]
    engine: Option<String>,

    /// OpenShift namespace
    #[arg(short, long, env = "IMAGETEST_NAMESPACE", global = true)]
    namespace: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value = "table", global = true)]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Container lifecycle checks
    #[command(subcommand)]
    Container(container::ContainerCommands),

    /// OpenShift resource checks
    #[command(subcommand)]
    Openshift(openshift::OpenshiftCommands),

    /// Helm chart packaging
    #[command(subcommand)]
    Helm(helm::HelmCommands),

    /// Image stream definition checks
    #[command(subcommand)]
    Imagestreams(imagestreams::ImagestreamsCommands),

    /// Manage the configuration file
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

fn run(cli: Cli) -> anyhow::Result<bool> {
    let global = GlobalOptions {
        config: cli.config,
        engine: cli.engine,
        namespace: cli.namespace,
    };
    let format = cli.format;

    match cli.command {
        Commands::Container(cmd) => container::execute(cmd, &global, format),
        Commands::Openshift(cmd) => openshift::execute(cmd, &global, format),
        Commands::Helm(cmd) => helm::execute(cmd, &global, format),
        Commands::Imagestreams(cmd) => imagestreams::execute(cmd, &global, format),
        Commands::Config(cmd) => config::execute(cmd, &global, format),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(EXIT_CHECK_FAILED),
        Err(e) => {
            output::print_error(&format!("{e:#}"));
            ExitCode::from(exit_code(&e))
        }
    }
}
