//! OpenShift Commands

use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use imagetest_harness::extract::{ObjectRef, PodState};
use imagetest_harness::{ManifestSource, PodSelector, S2iDeployment, Session};
use serde::Serialize;

use super::{parse_pair, timeout, GlobalOptions};
use crate::output::{print_item, print_list, print_verdict, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum OpenshiftCommands {
    /// Check that an image stream has a tag for a version
    CheckTag {
        /// Image stream name
        stream: String,

        /// Version the tag name must contain
        version: String,
    },

    /// Wait for exactly one ready pod
    WaitPod(WaitPodArgs),

    /// Wait for a build to complete
    WaitBuild {
        /// Build name, e.g. `python-sample-1`
        build: String,

        /// Deadline in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Apply a manifest or process and apply a template
    Apply {
        /// Local path or http(s) URL
        source: String,

        /// Treat the source as a template; repeat -p for parameters
        #[arg(long)]
        template: bool,

        /// Template parameter (KEY=VALUE), repeatable
        #[arg(short = 'p', long = "param", value_parser = parse_pair, requires = "template")]
        params: Vec<(String, String)>,
    },

    /// Request a service from a helper pod inside the cluster
    CheckService {
        /// Service name
        service: String,

        #[arg(long, default_value_t = 8080)]
        port: u16,

        #[arg(long, default_value = "/")]
        path: String,

        /// Expected HTTP status
        #[arg(long, default_value_t = 200)]
        expect_status: u16,

        /// Regular expression the response body must match
        #[arg(long)]
        expect_body: Option<String>,
    },

    /// Upload a builder image and deploy an S2I application on it
    DeployS2i {
        /// Builder image reference
        image: String,

        /// Version the builder is tagged with in the cluster
        version: String,

        /// Application repository URL or local directory
        app: String,

        #[arg(long)]
        context_dir: Option<String>,

        /// Service name; derived from the image when absent
        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct WaitPodArgs {
    /// Pod name prefix
    #[arg(long, conflicts_with = "selector", required_unless_present = "selector")]
    pub prefix: Option<String>,

    /// Label selector, e.g. `app=postgresql`
    #[arg(short = 'l', long)]
    pub selector: Option<String>,

    /// Deadline in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

impl WaitPodArgs {
    fn pod_selector(&self) -> Result<PodSelector> {
        match (&self.prefix, &self.selector) {
            (Some(prefix), None) => Ok(PodSelector::Prefix(prefix.clone())),
            (None, Some(label)) => Ok(PodSelector::Label(label.clone())),
            _ => bail!("pass exactly one of --prefix or --selector"),
        }
    }
}

#[derive(Serialize)]
pub struct PodDisplay {
    pub name: String,
    pub phase: String,
    pub ready: bool,
}

impl From<PodState> for PodDisplay {
    fn from(pod: PodState) -> Self {
        Self {
            name: pod.name,
            phase: pod.phase.to_string(),
            ready: pod.ready,
        }
    }
}

impl TableDisplay for PodDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Name", "Phase", "Ready"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.name.clone(), self.phase.clone(), self.ready.to_string()]
    }
}

impl TableDisplay for ObjectRef {
    fn headers() -> Vec<&'static str> {
        vec!["Kind", "Name"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.kind.clone(), self.name.clone()]
    }
}

pub fn execute(cmd: OpenshiftCommands, global: &GlobalOptions, format: OutputFormat) -> Result<bool> {
    let config = global.load_config()?;
    let session = Session::new(config)?;
    let cluster = session.cluster();

    match cmd {
        OpenshiftCommands::CheckTag { stream, version } => {
            let found = cluster.check_is_exists(&stream, &version)?;
            let message = if found {
                format!("image stream {stream} has a tag for {version}")
            } else {
                format!("image stream {stream} has no tag for {version}")
            };
            print_verdict(found, &message, format);
            Ok(found)
        }

        OpenshiftCommands::WaitPod(args) => {
            let pod = cluster.wait_pod_ready(&args.pod_selector()?, timeout(args.timeout))?;
            print_item(&PodDisplay::from(pod), format)?;
            Ok(true)
        }

        OpenshiftCommands::WaitBuild { build, timeout: secs } => {
            let state = cluster.wait_build_complete(&build, timeout(secs))?;
            print_verdict(true, &format!("build {} is {}", state.name, state.phase), format);
            Ok(true)
        }

        OpenshiftCommands::Apply {
            source,
            template,
            params,
        } => {
            let source = ManifestSource::parse(&source);
            let objects = if template {
                cluster.process_template(&source, &params)?
            } else {
                cluster.create_from_manifest(&source)?
            };
            // applied objects outlive this command
            for handle in session.registry().handles() {
                session.registry().forget(&handle);
            }
            print_list(&objects, format)?;
            Ok(true)
        }

        OpenshiftCommands::CheckService {
            service,
            port,
            path,
            expect_status,
            expect_body,
        } => {
            let result = cluster.check_response_inside_cluster(
                &service,
                port,
                &path,
                expect_status,
                expect_body.as_deref(),
            )?;
            print_verdict(result.passed, &result.detail, format);
            Ok(result.passed)
        }

        OpenshiftCommands::DeployS2i {
            image,
            version,
            app,
            context_dir,
            name,
        } => {
            let mut deployment = S2iDeployment::new(image, version, app);
            deployment.context_dir = context_dir;
            deployment.service_name = name;
            let service = cluster.deploy_s2i_app(&session.containers(), &deployment)?;
            // the application outlives this command
            for handle in session.registry().handles() {
                session.registry().forget(&handle);
            }
            print_verdict(true, &format!("deployed {service}"), format);
            Ok(true)
        }
    }
}
