//! imagetest Harness
//!
//! Lifecycle primitives for integration tests of container images and the
//! cluster workloads built from them. Every external resource is driven
//! through a CLI binary (`docker`/`podman`, `oc`, `helm`), observed by
//! polling its status with a wall-clock deadline, and registered for
//! teardown the moment it exists.
//!
//! ```no_run
//! use imagetest_common::HarnessConfig;
//! use imagetest_harness::{ContainerOptions, Probe, Session};
//!
//! Session::scoped(HarnessConfig::default(), |session| {
//!     let containers = session.containers();
//!     let options = ContainerOptions::new().probe(Probe::http(8080, "/"));
//!     let handle = containers.create("quay.io/sclorg/nginx-124-c9s", &options)?;
//!     containers.wait_ready(&handle, None)?;
//!     Ok(())
//! })?;
//! # Ok::<(), imagetest_common::Error>(())
//! ```

pub mod cluster;
pub mod container;
pub mod exec;
pub mod extract;
pub mod helm;
pub mod imagestreams;
pub mod manifest;
pub mod poll;
pub mod probe;
pub mod registry;
pub mod session;

#[cfg(any(test, feature = "test-harness"))]
pub mod test_harness;

pub use cluster::{AppSpec, ClusterManager, PodSelector, S2iDeployment};
pub use container::{ContainerManager, ContainerOptions};
pub use exec::{CommandResult, CommandRunner, Invocation, SystemRunner};
pub use extract::{extract, ResourceState};
pub use helm::{chart_metadata, ChartMetadata, ChartPackager};
pub use imagestreams::{FileReport, ImageStreamFiles};
pub use manifest::{LocalManifest, ManifestSource};
pub use poll::{PollOutcome, Poller};
pub use probe::{Probe, ProbeResult};
pub use registry::{CleanupRegistry, TeardownReport};
pub use session::Session;
