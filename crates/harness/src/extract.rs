//! State extraction from engine and cluster client output
//!
//! Every function here is pure: it looks only at a [`CommandResult`] or a
//! string and never runs anything. JSON payloads are read by key path;
//! plain-text output is trimmed and matched exactly.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;

use imagetest_common::{Error, ResourceKind, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::exec::CommandResult;

/// Facts extracted from one status query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "state", rename_all = "snake_case")]
pub enum ResourceState {
    Container(ContainerState),
    Image(ImageState),
    Pods(Vec<PodState>),
    Build(BuildState),
    ImageStream(ImageStreamState),
    Deployment(DeploymentState),
    Address(IpAddr),
    /// The queried resource does not exist
    Missing(ResourceKind),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerState {
    pub id: Option<String>,
    pub running: bool,
    pub status: Option<String>,
    pub exit_code: Option<i64>,
    pub health: Option<String>,
    pub ip: Option<String>,
    pub image: Option<String>,
}

impl ContainerState {
    /// Running and not reporting an unhealthy health check
    pub fn is_healthy(&self) -> bool {
        self.running && !matches!(self.health.as_deref(), Some("unhealthy") | Some("starting"))
    }

    /// Stopped for good, as opposed to not started yet
    pub fn has_exited(&self) -> bool {
        !self.running && !matches!(self.status.as_deref(), Some("created") | Some("restarting"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageState {
    pub id: String,
    pub digest: Option<String>,
    pub user: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl From<&str> for PodPhase {
    fn from(phase: &str) -> Self {
        match phase {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

impl std::fmt::Display for PodPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PodState {
    pub name: String,
    pub phase: PodPhase,
    /// Every container reports ready; false when no statuses are reported yet
    pub ready: bool,
    pub labels: BTreeMap<String, String>,
}

impl PodState {
    /// Pods spawned by builds and deployment rollouts rather than the workload
    pub fn is_helper(&self) -> bool {
        self.name.ends_with("-build") || self.name.ends_with("-deploy")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildPhase {
    New,
    Pending,
    Running,
    Complete,
    Failed,
    Error,
    Cancelled,
}

impl BuildPhase {
    /// Phases from which the build can never complete
    pub fn is_failure(self) -> bool {
        matches!(self, BuildPhase::Failed | BuildPhase::Error | BuildPhase::Cancelled)
    }
}

impl FromStr for BuildPhase {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "New" => Ok(BuildPhase::New),
            "Pending" => Ok(BuildPhase::Pending),
            "Running" => Ok(BuildPhase::Running),
            "Complete" => Ok(BuildPhase::Complete),
            "Failed" => Ok(BuildPhase::Failed),
            "Error" => Ok(BuildPhase::Error),
            "Cancelled" => Ok(BuildPhase::Cancelled),
            other => Err(Error::extraction(
                ResourceKind::Build,
                format!("unrecognized build phase {other:?}"),
            )),
        }
    }
}

impl std::fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildState {
    pub name: String,
    pub phase: BuildPhase,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagReference {
    pub name: String,
    /// Image or tag the tag points at, if declared
    pub from: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageStreamState {
    pub name: String,
    /// Tags declared in the stream's spec
    pub spec_tags: Vec<TagReference>,
    /// Tags that have been imported and resolved
    pub status_tags: Vec<String>,
}

impl ImageStreamState {
    /// Exact tag present in the spec or status tag list
    pub fn has_tag(&self, tag: &str) -> bool {
        self.spec_tags.iter().any(|t| t.name == tag) || self.status_tags.iter().any(|t| t == tag)
    }

    /// First spec tag whose name contains `version`
    pub fn tag_containing(&self, version: &str) -> Option<&TagReference> {
        self.spec_tags.iter().find(|t| t.name.contains(version))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentState {
    pub name: String,
    pub replicas: Option<u64>,
    pub ready_replicas: u64,
    pub available_replicas: u64,
}

impl DeploymentState {
    pub fn is_ready(&self) -> bool {
        let wanted = self.replicas.unwrap_or(1);
        self.ready_replicas >= wanted && self.available_replicas >= wanted
    }
}

/// A `kind/name` reference as printed by `-o name`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ObjectRef {
    /// Resource type without API group, e.g. `buildconfig`
    pub kind: String,
    pub name: String,
    /// Reference exactly as printed, suitable to pass back to the client
    pub full: String,
}

/// A release as listed by `helm list -o json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelmRelease {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub chart: String,
    #[serde(default)]
    pub app_version: String,
}

/// Extract the state of `kind` from one status query result
pub fn extract(kind: ResourceKind, result: &CommandResult) -> Result<ResourceState> {
    if !result.success() {
        if reports_missing(result) {
            return Ok(ResourceState::Missing(kind));
        }
        return Err(Error::CommandFailed {
            command: result.command_line(),
            exit_code: result.exit_code,
            stderr: result.stderr.trim().to_string(),
        });
    }

    let output = result.stdout_trimmed();
    if output.is_empty() || output == "[]" {
        return Ok(ResourceState::Missing(kind));
    }

    match kind {
        ResourceKind::Container => {
            let doc = first_document(kind, output)?;
            container_state(&doc).map(ResourceState::Container)
        }
        ResourceKind::Image => {
            let doc = first_document(kind, output)?;
            image_state(&doc).map(ResourceState::Image)
        }
        ResourceKind::Pod => pod_list(&parse_json(kind, output)?).map(ResourceState::Pods),
        ResourceKind::Build => build_state(&parse_json(kind, output)?).map(ResourceState::Build),
        ResourceKind::ImageStream => {
            image_stream_state(&parse_json(kind, output)?).map(ResourceState::ImageStream)
        }
        ResourceKind::Deployment => {
            deployment_state(&parse_json(kind, output)?).map(ResourceState::Deployment)
        }
        ResourceKind::Address => parse_address(output),
        other => Err(Error::extraction(other, "no state extractor for this kind")),
    }
}

impl ResourceState {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceState::Container(_) => ResourceKind::Container,
            ResourceState::Image(_) => ResourceKind::Image,
            ResourceState::Pods(_) => ResourceKind::Pod,
            ResourceState::Build(_) => ResourceKind::Build,
            ResourceState::ImageStream(_) => ResourceKind::ImageStream,
            ResourceState::Deployment(_) => ResourceKind::Deployment,
            ResourceState::Address(_) => ResourceKind::Address,
            ResourceState::Missing(kind) => *kind,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, ResourceState::Missing(_))
    }

    pub fn into_container(self) -> Result<Option<ContainerState>> {
        match self {
            ResourceState::Container(state) => Ok(Some(state)),
            ResourceState::Missing(_) => Ok(None),
            other => Err(mismatch(ResourceKind::Container, &other)),
        }
    }

    pub fn into_image(self) -> Result<Option<ImageState>> {
        match self {
            ResourceState::Image(state) => Ok(Some(state)),
            ResourceState::Missing(_) => Ok(None),
            other => Err(mismatch(ResourceKind::Image, &other)),
        }
    }

    /// A missing pod list is an empty one
    pub fn into_pods(self) -> Result<Vec<PodState>> {
        match self {
            ResourceState::Pods(pods) => Ok(pods),
            ResourceState::Missing(_) => Ok(Vec::new()),
            other => Err(mismatch(ResourceKind::Pod, &other)),
        }
    }

    pub fn into_build(self) -> Result<Option<BuildState>> {
        match self {
            ResourceState::Build(state) => Ok(Some(state)),
            ResourceState::Missing(_) => Ok(None),
            other => Err(mismatch(ResourceKind::Build, &other)),
        }
    }

    pub fn into_image_stream(self) -> Result<Option<ImageStreamState>> {
        match self {
            ResourceState::ImageStream(state) => Ok(Some(state)),
            ResourceState::Missing(_) => Ok(None),
            other => Err(mismatch(ResourceKind::ImageStream, &other)),
        }
    }

    pub fn into_deployment(self) -> Result<Option<DeploymentState>> {
        match self {
            ResourceState::Deployment(state) => Ok(Some(state)),
            ResourceState::Missing(_) => Ok(None),
            other => Err(mismatch(ResourceKind::Deployment, &other)),
        }
    }

    pub fn into_address(self) -> Result<Option<IpAddr>> {
        match self {
            ResourceState::Address(ip) => Ok(Some(ip)),
            ResourceState::Missing(_) => Ok(None),
            other => Err(mismatch(ResourceKind::Address, &other)),
        }
    }
}

fn mismatch(expected: ResourceKind, got: &ResourceState) -> Error {
    Error::extraction(expected, format!("got {} state instead", got.kind()))
}

/// Whether a failed query failed because the object does not exist
pub fn reports_missing(result: &CommandResult) -> bool {
    let mentions = |text: &str| {
        let text = text.to_ascii_lowercase();
        text.contains("not found") || text.contains("no such")
    };
    !result.success() && (mentions(&result.stderr) || mentions(&result.stdout))
}

fn parse_json(kind: ResourceKind, output: &str) -> Result<Value> {
    serde_json::from_str(output)
        .map_err(|e| Error::extraction(kind, format!("output is not JSON: {e}")))
}

/// `inspect` prints an array; the first element describes the object
fn first_document(kind: ResourceKind, output: &str) -> Result<Value> {
    match parse_json(kind, output)? {
        Value::Array(mut items) => {
            if items.is_empty() {
                Err(Error::extraction(kind, "empty inspect array"))
            } else {
                Ok(items.swap_remove(0))
            }
        }
        doc @ Value::Object(_) => Ok(doc),
        _ => Err(Error::extraction(kind, "expected a JSON object or array")),
    }
}

fn opt_str(doc: &Value, pointer: &str) -> Option<String> {
    doc.pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn req_str(kind: ResourceKind, doc: &Value, pointer: &str) -> Result<String> {
    opt_str(doc, pointer)
        .ok_or_else(|| Error::extraction(kind, format!("required field {pointer} is missing")))
}

fn container_state(doc: &Value) -> Result<ContainerState> {
    let running = doc
        .pointer("/State/Running")
        .and_then(Value::as_bool)
        .ok_or_else(|| {
            Error::extraction(ResourceKind::Container, "required field /State/Running is missing")
        })?;

    let ip = opt_str(doc, "/NetworkSettings/IPAddress").or_else(|| {
        doc.pointer("/NetworkSettings/Networks")
            .and_then(Value::as_object)
            .and_then(|networks| {
                networks
                    .values()
                    .find_map(|net| opt_str(net, "/IPAddress"))
            })
    });

    Ok(ContainerState {
        id: opt_str(doc, "/Id"),
        running,
        status: opt_str(doc, "/State/Status"),
        exit_code: doc.pointer("/State/ExitCode").and_then(Value::as_i64),
        health: opt_str(doc, "/State/Health/Status"),
        ip,
        image: opt_str(doc, "/Image"),
    })
}

fn image_state(doc: &Value) -> Result<ImageState> {
    Ok(ImageState {
        id: req_str(ResourceKind::Image, doc, "/Id")?,
        digest: opt_str(doc, "/RepoDigests/0"),
        user: opt_str(doc, "/Config/User"),
    })
}

fn pod_list(doc: &Value) -> Result<Vec<PodState>> {
    let items = doc
        .pointer("/items")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::extraction(ResourceKind::Pod, "required field /items is missing"))?;

    items.iter().map(pod_state).collect()
}

fn pod_state(item: &Value) -> Result<PodState> {
    let name = req_str(ResourceKind::Pod, item, "/metadata/name")?;
    let phase = req_str(ResourceKind::Pod, item, "/status/phase")?;

    let ready = item
        .pointer("/status/containerStatuses")
        .and_then(Value::as_array)
        .map(|statuses| {
            !statuses.is_empty()
                && statuses
                    .iter()
                    .all(|s| s.get("ready").and_then(Value::as_bool).unwrap_or(false))
        })
        .unwrap_or(false);

    let labels = item
        .pointer("/metadata/labels")
        .and_then(Value::as_object)
        .map(|labels| {
            labels
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default();

    Ok(PodState {
        name,
        phase: PodPhase::from(phase.as_str()),
        ready,
        labels,
    })
}

fn build_state(doc: &Value) -> Result<BuildState> {
    Ok(BuildState {
        name: req_str(ResourceKind::Build, doc, "/metadata/name")?,
        phase: req_str(ResourceKind::Build, doc, "/status/phase")?.parse()?,
        message: opt_str(doc, "/status/message"),
    })
}

fn image_stream_state(doc: &Value) -> Result<ImageStreamState> {
    let name = req_str(ResourceKind::ImageStream, doc, "/metadata/name")?;

    let spec_tags = doc
        .pointer("/spec/tags")
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(|tag| {
                    opt_str(tag, "/name").map(|name| TagReference {
                        name,
                        from: opt_str(tag, "/from/name"),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let status_tags = doc
        .pointer("/status/tags")
        .and_then(Value::as_array)
        .map(|tags| tags.iter().filter_map(|t| opt_str(t, "/tag")).collect())
        .unwrap_or_default();

    Ok(ImageStreamState {
        name,
        spec_tags,
        status_tags,
    })
}

fn deployment_state(doc: &Value) -> Result<DeploymentState> {
    let count = |pointer: &str| doc.pointer(pointer).and_then(Value::as_u64);
    Ok(DeploymentState {
        name: req_str(ResourceKind::Deployment, doc, "/metadata/name")?,
        replicas: count("/spec/replicas"),
        ready_replicas: count("/status/readyReplicas").unwrap_or(0),
        available_replicas: count("/status/availableReplicas").unwrap_or(0),
    })
}

fn parse_address(output: &str) -> Result<ResourceState> {
    // Go templates print this for an absent field
    if output == "<no value>" {
        return Ok(ResourceState::Missing(ResourceKind::Address));
    }
    output
        .parse::<IpAddr>()
        .map(ResourceState::Address)
        .map_err(|_| Error::extraction(ResourceKind::Address, format!("{output:?} is not an IP address")))
}

/// Parse a plain `true`/`false` answer
pub fn parse_flag(kind: ResourceKind, output: &str) -> Result<bool> {
    match output.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(Error::extraction(kind, format!("expected true or false, got {other:?}"))),
    }
}

/// Drop the `W...` warning lines helm interleaves with JSON output
pub fn strip_helm_warnings(output: &str) -> String {
    output
        .lines()
        .filter(|line| !line.starts_with('W'))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse `helm list -o json`
pub fn parse_helm_releases(output: &str) -> Result<Vec<HelmRelease>> {
    let cleaned = strip_helm_warnings(output);
    if cleaned.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&cleaned).map_err(|e| {
        Error::extraction(ResourceKind::HelmRelease, format!("release list is not JSON: {e}"))
    })
}

/// Archive path reported by `helm package`
pub fn parse_package_path(output: &str) -> Option<PathBuf> {
    static SAVED_TO: OnceLock<Regex> = OnceLock::new();
    let re = SAVED_TO.get_or_init(|| {
        Regex::new(r"Successfully packaged chart and saved it to:\s*(\S+)").expect("valid regex")
    });
    re.captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| PathBuf::from(m.as_str()))
}

/// Parse `-o name` output, one `type[.group]/name` per line
pub fn parse_object_refs(output: &str) -> Vec<ObjectRef> {
    output
        .lines()
        .map(str::trim)
        .filter_map(|line| {
            let (kind, name) = line.split_once('/')?;
            // `oc apply -o name` may append "configured" or "created"
            let name = name.split_whitespace().next()?;
            if kind.is_empty() || name.is_empty() {
                return None;
            }
            let short_kind = kind.split('.').next().unwrap_or(kind);
            Some(ObjectRef {
                kind: short_kind.to_string(),
                name: name.to_string(),
                full: format!("{kind}/{name}"),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use test_case::test_case;

    fn ok(stdout: &str) -> CommandResult {
        CommandResult {
            program: "docker".into(),
            args: vec!["inspect".into()],
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            duration: Duration::from_millis(5),
        }
    }

    fn failed(exit_code: i32, stderr: &str) -> CommandResult {
        CommandResult {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
            ..ok("")
        }
    }

    const CONTAINER: &str = r#"[{
        "Id": "3f2a9c",
        "Image": "sha256:abc",
        "State": {"Status": "running", "Running": true, "ExitCode": 0,
                  "Health": {"Status": "healthy"}},
        "NetworkSettings": {"IPAddress": "",
                            "Networks": {"bridge": {"IPAddress": "172.17.0.3"}}}
    }]"#;

    #[test]
    fn container_from_inspect_array() {
        let state = extract(ResourceKind::Container, &ok(CONTAINER))
            .unwrap()
            .into_container()
            .unwrap()
            .unwrap();
        assert!(state.running);
        assert!(state.is_healthy());
        assert_eq!(state.id.as_deref(), Some("3f2a9c"));
        assert_eq!(state.exit_code, Some(0));
        assert_eq!(state.ip.as_deref(), Some("172.17.0.3"));
    }

    #[test]
    fn exited_versus_not_started() {
        let out = r#"[{"State": {"Status": "created", "Running": false, "ExitCode": 0}}]"#;
        let created = extract(ResourceKind::Container, &ok(out)).unwrap().into_container().unwrap().unwrap();
        assert!(!created.has_exited());

        let out = r#"[{"State": {"Status": "exited", "Running": false, "ExitCode": 1}}]"#;
        let exited = extract(ResourceKind::Container, &ok(out)).unwrap().into_container().unwrap().unwrap();
        assert!(exited.has_exited());
        assert_eq!(exited.exit_code, Some(1));
    }

    #[test]
    fn container_without_running_flag_is_rejected() {
        let err = extract(ResourceKind::Container, &ok(r#"[{"Id": "x", "State": {}}]"#)).unwrap_err();
        assert!(err.is_extraction());
    }

    #[test_case("" ; "empty output")]
    #[test_case("  \n" ; "whitespace")]
    #[test_case("[]" ; "empty array")]
    fn empty_output_means_missing(stdout: &str) {
        let state = extract(ResourceKind::Container, &ok(stdout)).unwrap();
        assert_eq!(state, ResourceState::Missing(ResourceKind::Container));
    }

    #[test_case("Error: No such object: deadbeef" ; "docker")]
    #[test_case("Error from server (NotFound): builds.build.openshift.io \"app-1\" not found" ; "oc")]
    fn not_found_diagnostics_mean_missing(stderr: &str) {
        let state = extract(ResourceKind::Build, &failed(1, stderr)).unwrap();
        assert!(state.is_missing());
    }

    #[test]
    fn other_failures_are_command_failures() {
        let err = extract(ResourceKind::Pod, &failed(1, "Unable to connect to the server")).unwrap_err();
        assert!(matches!(err, Error::CommandFailed { exit_code: 1, .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn malformed_json_is_extraction_error() {
        let err = extract(ResourceKind::Build, &ok("{not json")).unwrap_err();
        assert!(err.is_extraction());
    }

    #[test]
    fn extraction_is_deterministic() {
        let a = extract(ResourceKind::Container, &ok(CONTAINER)).unwrap();
        let b = extract(ResourceKind::Container, &ok(CONTAINER)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn image_state_fields() {
        let out = r#"[{"Id": "sha256:1", "RepoDigests": ["quay.io/x@sha256:2"], "Config": {"User": "1001"}}]"#;
        let image = extract(ResourceKind::Image, &ok(out)).unwrap().into_image().unwrap().unwrap();
        assert_eq!(image.id, "sha256:1");
        assert_eq!(image.digest.as_deref(), Some("quay.io/x@sha256:2"));
        assert_eq!(image.user.as_deref(), Some("1001"));
    }

    #[test]
    fn pods_with_readiness_and_labels() {
        let out = r#"{"items": [
            {"metadata": {"name": "app-1-build", "labels": {"openshift.io/build.name": "app-1"}},
             "status": {"phase": "Succeeded"}},
            {"metadata": {"name": "app-7d9f", "labels": {"app": "app"}},
             "status": {"phase": "Running",
                        "containerStatuses": [{"ready": true}, {"ready": true}]}},
            {"metadata": {"name": "db-0"}, "status": {"phase": "Running",
                        "containerStatuses": [{"ready": false}]}}
        ]}"#;
        let pods = extract(ResourceKind::Pod, &ok(out)).unwrap().into_pods().unwrap();
        assert_eq!(pods.len(), 3);
        assert!(pods[0].is_helper());
        assert!(!pods[0].ready);
        assert!(pods[1].ready);
        assert_eq!(pods[1].labels.get("app").map(String::as_str), Some("app"));
        assert_eq!(pods[2].phase, PodPhase::Running);
        assert!(!pods[2].ready);
    }

    #[test]
    fn pod_list_without_items_is_rejected() {
        let err = extract(ResourceKind::Pod, &ok(r#"{"kind": "List"}"#)).unwrap_err();
        assert!(err.is_extraction());
    }

    #[test_case("Pending", PodPhase::Pending)]
    #[test_case("Running", PodPhase::Running)]
    #[test_case("Succeeded", PodPhase::Succeeded)]
    #[test_case("Failed", PodPhase::Failed)]
    #[test_case("Evicted", PodPhase::Unknown)]
    fn pod_phase_mapping(raw: &str, expected: PodPhase) {
        assert_eq!(PodPhase::from(raw), expected);
    }

    #[test_case("Complete", BuildPhase::Complete, false)]
    #[test_case("Running", BuildPhase::Running, false)]
    #[test_case("Failed", BuildPhase::Failed, true)]
    #[test_case("Error", BuildPhase::Error, true)]
    #[test_case("Cancelled", BuildPhase::Cancelled, true)]
    fn build_phase_mapping(raw: &str, expected: BuildPhase, failure: bool) {
        let out = format!(r#"{{"metadata": {{"name": "app-1"}}, "status": {{"phase": "{raw}"}}}}"#);
        let build = extract(ResourceKind::Build, &ok(&out)).unwrap().into_build().unwrap().unwrap();
        assert_eq!(build.phase, expected);
        assert_eq!(build.phase.is_failure(), failure);
    }

    #[test]
    fn unknown_build_phase_is_rejected() {
        let out = r#"{"metadata": {"name": "app-1"}, "status": {"phase": "Exploded"}}"#;
        assert!(extract(ResourceKind::Build, &ok(out)).unwrap_err().is_extraction());
    }

    #[test]
    fn image_stream_tags() {
        let out = r#"{"kind": "ImageStream", "metadata": {"name": "python"},
            "spec": {"tags": [
                {"name": "3.11-ubi9", "from": {"kind": "DockerImage", "name": "registry/python-311:latest"}},
                {"name": "latest", "from": {"kind": "ImageStreamTag", "name": "3.11-ubi9"}}]},
            "status": {"tags": [{"tag": "3.11-ubi9"}]}}"#;
        let stream = extract(ResourceKind::ImageStream, &ok(out))
            .unwrap()
            .into_image_stream()
            .unwrap()
            .unwrap();
        assert!(stream.has_tag("latest"));
        assert!(!stream.has_tag("3.11"));
        assert_eq!(stream.tag_containing("3.11").map(|t| t.name.as_str()), Some("3.11-ubi9"));
        assert!(stream.tag_containing("3.12").is_none());
        assert_eq!(stream.status_tags, vec!["3.11-ubi9".to_string()]);
    }

    #[test]
    fn deployment_readiness() {
        let out = r#"{"metadata": {"name": "web"}, "spec": {"replicas": 2},
                      "status": {"readyReplicas": 1, "availableReplicas": 1}}"#;
        let deployment = extract(ResourceKind::Deployment, &ok(out))
            .unwrap()
            .into_deployment()
            .unwrap()
            .unwrap();
        assert!(!deployment.is_ready());

        let out = r#"{"metadata": {"name": "web"}, "spec": {"replicas": 2},
                      "status": {"readyReplicas": 2, "availableReplicas": 2}}"#;
        let deployment = extract(ResourceKind::Deployment, &ok(out))
            .unwrap()
            .into_deployment()
            .unwrap()
            .unwrap();
        assert!(deployment.is_ready());
    }

    #[test_case("172.17.0.2\n", Some("172.17.0.2") ; "ipv4 with newline")]
    #[test_case("fe80::1", Some("fe80::1") ; "ipv6")]
    #[test_case("<no value>", None ; "template placeholder")]
    fn address_parsing(stdout: &str, expected: Option<&str>) {
        let ip = extract(ResourceKind::Address, &ok(stdout)).unwrap().into_address().unwrap();
        assert_eq!(ip.map(|ip| ip.to_string()).as_deref(), expected);
    }

    #[test]
    fn garbage_address_is_rejected() {
        let err = extract(ResourceKind::Address, &ok("172.17.0")).unwrap_err();
        assert!(err.is_extraction());
    }

    #[test]
    fn wrong_variant_is_a_mismatch() {
        let state = extract(ResourceKind::Address, &ok("10.0.0.1")).unwrap();
        assert!(state.into_container().unwrap_err().is_extraction());
    }

    #[test]
    fn flags() {
        assert!(parse_flag(ResourceKind::Container, "true\n").unwrap());
        assert!(!parse_flag(ResourceKind::Container, " false").unwrap());
        assert!(parse_flag(ResourceKind::Container, "yes").is_err());
    }

    #[test]
    fn helm_warnings_are_stripped() {
        let out = "W0412 10:00:00.000 warnings.go:70] deprecated API\n[{\"name\": \"pg\", \"namespace\": \"ci\", \"revision\": \"1\", \"status\": \"deployed\", \"chart\": \"postgresql-0.0.3\", \"app_version\": \"15\"}]\n";
        let releases = parse_helm_releases(out).unwrap();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].chart, "postgresql-0.0.3");
        assert_eq!(releases[0].status, "deployed");
        assert!(parse_helm_releases("").unwrap().is_empty());
    }

    #[test]
    fn package_path() {
        let out = "Successfully packaged chart and saved it to: /tmp/charts/postgresql-0.0.3.tgz\n";
        assert_eq!(
            parse_package_path(out),
            Some(PathBuf::from("/tmp/charts/postgresql-0.0.3.tgz"))
        );
        assert_eq!(parse_package_path("Error: Chart.yaml file is missing"), None);
    }

    #[test]
    fn object_refs() {
        let out = "buildconfig.build.openshift.io/app\nimagestream.image.openshift.io/app configured\nservice/app\n\nwarning text\n";
        let refs = parse_object_refs(out);
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[0].kind, "buildconfig");
        assert_eq!(refs[0].full, "buildconfig.build.openshift.io/app");
        assert_eq!(refs[1].name, "app");
        assert_eq!(refs[2].full, "service/app");
    }
}
