//! Container Commands

use anyhow::Result;
use clap::{Args, Subcommand};
use imagetest_common::Error;
use imagetest_harness::{ContainerOptions, Probe, Session};
use serde::Serialize;

use super::{parse_pair, timeout, GlobalOptions};
use crate::output::{print_item, print_verdict, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum ContainerCommands {
    /// Start a container and wait until it is ready
    Check(CheckArgs),

    /// Expect a container to fail to start
    AssertFails(RunArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Image reference
    pub image: String,

    /// Environment variable (KEY=VALUE), repeatable
    #[arg(short, long = "env", value_parser = parse_pair)]
    pub env: Vec<(String, String)>,

    /// Publish a port, repeatable
    #[arg(short, long = "publish")]
    pub publish: Vec<String>,

    /// Extra engine argument placed before the image, repeatable
    #[arg(long = "engine-arg", allow_hyphen_values = true)]
    pub engine_args: Vec<String>,

    /// Command to run instead of the image default
    #[arg(last = true)]
    pub command: Vec<String>,
}

impl RunArgs {
    fn options(&self) -> ContainerOptions {
        let mut options = ContainerOptions::new().command(self.command.clone());
        for (key, value) in &self.env {
            options = options.env(key, value);
        }
        for spec in &self.publish {
            options = options.publish(spec);
        }
        for arg in &self.engine_args {
            options = options.arg(arg);
        }
        options
    }
}

#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// HTTP readiness probe against this container port
    #[arg(long, conflicts_with_all = ["probe_tcp", "probe_exec"])]
    pub probe_http: Option<u16>,

    /// Path for the HTTP probe
    #[arg(long, default_value = "/")]
    pub probe_path: String,

    /// Expected HTTP status
    #[arg(long, default_value_t = 200)]
    pub expect_status: u16,

    /// Regular expression the HTTP response body must match
    #[arg(long)]
    pub expect_body: Option<String>,

    /// TCP readiness probe against this container port
    #[arg(long)]
    pub probe_tcp: Option<u16>,

    /// Readiness command run inside the container, split on whitespace
    #[arg(long)]
    pub probe_exec: Option<String>,

    /// Overall deadline in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

impl CheckArgs {
    fn probe(&self) -> Option<Probe> {
        if let Some(port) = self.probe_http {
            let mut probe = Probe::http(port, self.probe_path.clone()).expecting_status(self.expect_status);
            if let Some(body) = &self.expect_body {
                probe = probe.expecting_body(body.clone());
            }
            return Some(probe);
        }
        if let Some(port) = self.probe_tcp {
            return Some(Probe::tcp(port));
        }
        self.probe_exec
            .as_ref()
            .map(|cmd| Probe::command(cmd.split_whitespace()))
    }
}

/// Container check result
#[derive(Serialize)]
pub struct ContainerReport {
    pub image: String,
    pub id: String,
    pub status: String,
    pub ip: String,
    pub probe: String,
}

impl TableDisplay for ContainerReport {
    fn headers() -> Vec<&'static str> {
        vec!["Image", "ID", "Status", "IP", "Probe"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.image.clone(),
            self.id.chars().take(12).collect(),
            self.status.clone(),
            self.ip.clone(),
            self.probe.clone(),
        ]
    }
}

pub fn execute(cmd: ContainerCommands, global: &GlobalOptions, format: OutputFormat) -> Result<bool> {
    let config = global.load_config()?;
    match cmd {
        ContainerCommands::Check(args) => {
            let probe = args.probe();
            let report = Session::scoped(config, |session| {
                let containers = session.containers();
                let mut options = args.run.options();
                options.probe = probe.clone();
                let handle = containers.create(&args.run.image, &options)?;
                let state = containers.wait_ready(&handle, timeout(args.timeout))?;
                Ok(ContainerReport {
                    image: args.run.image.clone(),
                    id: handle.id.clone(),
                    status: state.status.unwrap_or_else(|| "running".to_string()),
                    ip: state.ip.unwrap_or_default(),
                    probe: probe
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_else(|| "none".to_string()),
                })
            })?;
            print_item(&report, format)?;
            Ok(true)
        }

        ContainerCommands::AssertFails(args) => {
            let outcome = Session::scoped(config, |session| {
                session
                    .containers()
                    .assert_creation_fails(&args.image, &args.options())
            });
            match outcome {
                Ok(()) => {
                    print_verdict(true, &format!("{} failed to start as expected", args.image), format);
                    Ok(true)
                }
                Err(Error::UnexpectedSuccess { what }) => {
                    print_verdict(false, &format!("expected {what} to fail"), format);
                    Ok(false)
                }
                Err(e) => Err(e.into()),
            }
        }
    }
}
