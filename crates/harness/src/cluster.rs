//! Cluster resource manager
//!
//! OpenShift counterpart of the container manager. Every call is scoped to
//! the manager's namespace with an explicit `-n`; the client's current
//! project is never consulted or changed.

use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use imagetest_common::{
    unique_name, Error, HarnessConfig, PollPolicy, ResourceHandle, ResourceKind, Result,
};
use tracing::{debug, info};

use crate::container::ContainerManager;
use crate::exec::{CommandResult, CommandRunner, Invocation};
use crate::extract::{
    extract, parse_object_refs, reports_missing, BuildPhase, BuildState, DeploymentState,
    ImageStreamState, ObjectRef, PodPhase, PodState,
};
use crate::manifest::{LocalManifest, ManifestSource};
use crate::poll::Poller;
use crate::probe::{self, ProbeResult};
use crate::registry::CleanupRegistry;

/// Where the cluster exposes its internal image registry
const REGISTRY_NAMESPACE: &str = "openshift-image-registry";
const REGISTRY_ROUTE: &str = "default-route";

/// Pod that sends requests from inside the cluster
const HELPER_POD: &str = "command-app";

/// Which pods a wait applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodSelector {
    /// Pods whose name starts with this prefix
    Prefix(String),
    /// A label selector such as `app=postgresql`
    Label(String),
}

impl PodSelector {
    fn matches(&self, pod: &PodState) -> bool {
        match self {
            PodSelector::Prefix(prefix) => pod.name.starts_with(prefix.as_str()),
            // already filtered by the server
            PodSelector::Label(_) => true,
        }
    }
}

impl std::fmt::Display for PodSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PodSelector::Prefix(prefix) => write!(f, "{prefix}*"),
            PodSelector::Label(selector) => write!(f, "-l {selector}"),
        }
    }
}

/// Arguments for `oc new-app`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppSpec {
    /// Image, `builder~repository`, or template reference
    pub source: String,
    pub name: String,
    pub context_dir: Option<String>,
    pub env: Vec<(String, String)>,
    /// Template parameters
    pub params: Vec<(String, String)>,
    pub extra_args: Vec<String>,
}

impl AppSpec {
    pub fn new(source: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn context_dir(mut self, dir: impl Into<String>) -> Self {
        self.context_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }
}

/// Image name without registry, repository path, tag or digest
fn image_base_name(image: &str) -> Option<&str> {
    let last = image.rsplit('/').next()?;
    let name = last.split(['@', ':']).next()?;
    (!name.is_empty()).then_some(name)
}

/// Image stream tag a builder image is uploaded as:
/// `rhel8/httpd-24:1` at version `2.4` becomes `httpd-24:2.4`
pub fn tagged_image(image: &str, version: &str) -> Option<String> {
    if version.is_empty() {
        return None;
    }
    image_base_name(image).map(|name| format!("{name}:{version}"))
}

/// Default service name for an application built on `image`
pub fn service_name_for(image: &str) -> Option<String> {
    image_base_name(image).map(|name| format!("{name}-testing"))
}

/// An S2I application built on a builder image uploaded into the cluster
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct S2iDeployment {
    /// Builder image reference to pull and upload
    pub image: String,
    /// Version the builder is tagged with in the cluster
    pub version: String,
    /// Repository URL, or a local directory sent with `start-build --from-dir`
    pub app: String,
    pub context_dir: Option<String>,
    /// Derived from the image name when absent
    pub service_name: Option<String>,
}

impl S2iDeployment {
    pub fn new(image: impl Into<String>, version: impl Into<String>, app: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            version: version.into(),
            app: app.into(),
            ..Self::default()
        }
    }

    pub fn context_dir(mut self, dir: impl Into<String>) -> Self {
        self.context_dir = Some(dir.into());
        self
    }

    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }
}

/// Creates, observes and deletes cluster objects in one namespace
#[derive(Clone)]
pub struct ClusterManager {
    config: Arc<HarnessConfig>,
    runner: Arc<dyn CommandRunner>,
    registry: Arc<CleanupRegistry>,
    namespace: String,
}

impl ClusterManager {
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

    /// Same manager scoped to another namespace
    pub fn in_namespace(&self, namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..self.clone()
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn client(&self) -> Invocation {
        Invocation::new(&self.config.cluster.binary).timeout(self.config.cluster.command_timeout())
    }

    /// Namespaced client invocation
    fn oc<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.client().args(args).args(["-n", self.namespace.as_str()])
    }

    fn run_ok(&self, invocation: &Invocation) -> Result<CommandResult> {
        self.runner.run(invocation)?.ensure_success()
    }

    fn poller(&self, policy: &PollPolicy, timeout: Option<Duration>) -> Result<Poller> {
        let poller = Poller::from_policy(policy)?;
        match timeout {
            Some(timeout) => poller.with_deadline(timeout),
            None => Ok(poller),
        }
    }

    /// Register `delete <target> --ignore-not-found` unless already registered
    fn register_deletion(&self, handle: ResourceHandle, delete: Invocation) {
        if self.registry.contains(&handle) {
            debug!("{} is already registered for cleanup", handle);
            return;
        }
        let runner = Arc::clone(&self.runner);
        let delete = delete.arg("--ignore-not-found");
        self.registry.register(handle, move || {
            runner.run(&delete)?.ensure_success().map(drop)
        });
    }

    fn register_object(&self, object: &ObjectRef) {
        let handle = ResourceHandle::new(ResourceKind::ClusterObject, object.full.clone())
            .in_namespace(self.namespace.clone());
        self.register_deletion(handle, self.oc(["delete", object.full.as_str()]));
    }

    /// Create `name` unless it exists; only a project created here is
    /// registered for deletion.
    pub fn create_project(&self, name: &str) -> Result<ResourceHandle> {
        let handle = ResourceHandle::new(ResourceKind::Project, name);
        if self.runner.run(&self.client().args(["get", "project", name]))?.success() {
            info!("Project {} already exists", name);
            return Ok(handle);
        }

        self.run_ok(&self.client().args(["new-project", name, "--skip-config-write"]))?;
        info!("Created project {}", name);
        if self.config.cluster.delete_project {
            self.register_deletion(handle.clone(), self.client().args(["delete", "project", name]));
        }
        Ok(handle)
    }

    /// Create a uniquely named project and return a manager scoped to it
    pub fn create_temporary_project(&self) -> Result<ClusterManager> {
        let name = unique_name("imagetest");
        self.create_project(&name)?;
        Ok(self.in_namespace(name))
    }

    pub fn delete_project(&self, name: &str) -> Result<()> {
        let result = self
            .runner
            .run(&self.client().args(["delete", "project", name]))?;
        if !reports_missing(&result) {
            result.ensure_success()?;
        }
        self.registry
            .forget(&ResourceHandle::new(ResourceKind::Project, name));
        info!("Deleted project {}", name);
        Ok(())
    }

    fn apply_file(&self, path: &Path) -> Result<Vec<ObjectRef>> {
        let path = path.display().to_string();
        let result = self
            .runner
            .run(&self.oc(["apply", "-f", path.as_str(), "-o", "name"]))?;
        // a partial apply still prints the objects it created
        let objects = parse_object_refs(&result.stdout);
        for object in &objects {
            self.register_object(object);
        }
        result.ensure_success()?;
        info!("Applied {} object(s) from {}", objects.len(), path);
        Ok(objects)
    }

    /// Apply a manifest. Applying the same manifest twice is not an error.
    pub fn create_from_manifest(&self, source: &ManifestSource) -> Result<Vec<ObjectRef>> {
        let local = source.fetch()?;
        self.apply_file(local.path())
    }

    /// Process a template with parameters and apply the result
    pub fn process_template(
        &self,
        source: &ManifestSource,
        params: &[(String, String)],
    ) -> Result<Vec<ObjectRef>> {
        let template = source.fetch()?;
        let mut inv = self.oc([
            "process".to_string(),
            "-f".to_string(),
            template.path().display().to_string(),
        ]);
        for (key, value) in params {
            inv = inv.arg("-p").arg(format!("{key}={value}"));
        }
        let processed = self.run_ok(&inv.args(["-o", "json"]))?;
        let local = LocalManifest::from_content(&processed.stdout, ".json")?;
        self.apply_file(local.path())
    }

    /// `oc new-app`; everything labelled with the app name is deleted on teardown
    pub fn new_app(&self, spec: &AppSpec) -> Result<ResourceHandle> {
        let label = format!("app={}", spec.name);
        let mut inv = self.oc([
            "new-app",
            spec.source.as_str(),
            "--name",
            spec.name.as_str(),
            "-l",
            label.as_str(),
        ]);
        if let Some(dir) = &spec.context_dir {
            inv = inv.arg(format!("--context-dir={dir}"));
        }
        for (key, value) in &spec.env {
            inv = inv.arg("-e").arg(format!("{key}={value}"));
        }
        for (key, value) in &spec.params {
            inv = inv.arg("-p").arg(format!("{key}={value}"));
        }
        inv = inv.args(&spec.extra_args);

        info!("Creating application {} from {}", spec.name, spec.source);
        let result = self.runner.run(&inv);
        // new-app can create some objects before failing
        let handle = ResourceHandle::new(ResourceKind::Application, spec.name.clone())
            .in_namespace(self.namespace.clone());
        self.register_deletion(handle.clone(), self.oc(["delete", "all", "-l", label.as_str()]));
        result?.ensure_success()?;
        Ok(handle)
    }

    /// Start a build and return the build name
    pub fn start_build(&self, build_config: &str, from_dir: Option<&Path>) -> Result<String> {
        let mut inv = self.oc(["start-build", build_config, "-o", "name"]);
        if let Some(dir) = from_dir {
            inv = inv.arg(format!("--from-dir={}", dir.display()));
        }
        let result = self.run_ok(&inv)?;

        let build = parse_object_refs(&result.stdout)
            .into_iter()
            .find(|object| object.kind == "build")
            .ok_or_else(|| {
                Error::extraction(
                    ResourceKind::Build,
                    format!("start-build printed no build reference: {}", result.stdout_trimmed()),
                )
            })?;

        info!("Started build {} from {}", build.name, build_config);
        let handle = ResourceHandle::new(ResourceKind::Build, build.name.clone())
            .in_namespace(self.namespace.clone());
        self.register_deletion(handle, self.oc(["delete", build.full.as_str()]));
        Ok(build.name)
    }

    /// Pods matching `selector`, helper pods included
    pub fn pods(&self, selector: &PodSelector) -> Result<Vec<PodState>> {
        let inv = match selector {
            PodSelector::Label(label) => self.oc(["get", "pods", "-l", label.as_str(), "-o", "json"]),
            PodSelector::Prefix(_) => self.oc(["get", "pods", "-o", "json"]),
        };
        let result = self.runner.run(&inv)?;
        Ok(extract(ResourceKind::Pod, &result)?
            .into_pods()?
            .into_iter()
            .filter(|pod| selector.matches(pod))
            .collect())
    }

    /// Wait for exactly one matching workload pod that is running with all
    /// containers ready. Build and deploy helper pods are ignored.
    pub fn wait_pod_ready(&self, selector: &PodSelector, timeout: Option<Duration>) -> Result<PodState> {
        let poller = self.poller(&self.config.polling.pod_ready, timeout)?;
        let what = format!("pod {selector} to be ready");
        let pods = poller
            .poll_until_or_fail(
                &what,
                || {
                    Ok(self
                        .pods(selector)?
                        .into_iter()
                        .filter(|pod| !pod.is_helper())
                        .collect::<Vec<_>>())
                },
                |pods| pods.len() == 1 && pods[0].phase == PodPhase::Running && pods[0].ready,
                |pods| {
                    (!pods.is_empty() && pods.iter().all(|p| p.phase == PodPhase::Failed))
                        .then(|| format!("pod {} failed", pods[0].name))
                },
            )
            .into_result(&what)?;

        pods.into_iter().next().ok_or_else(|| Error::NotFound {
            kind: ResourceKind::Pod,
            id: selector.to_string(),
        })
    }

    /// Wait for a matching pod to run to completion
    pub fn wait_pod_succeeded(
        &self,
        selector: &PodSelector,
        timeout: Option<Duration>,
    ) -> Result<PodState> {
        let poller = self.poller(&self.config.polling.build_complete, timeout)?;
        let what = format!("pod {selector} to succeed");
        let pods = poller
            .poll_until_or_fail(
                &what,
                || self.pods(selector),
                |pods| pods.iter().any(|p| p.phase == PodPhase::Succeeded),
                |pods| {
                    pods.iter()
                        .find(|p| p.phase == PodPhase::Failed)
                        .map(|p| format!("pod {} failed", p.name))
                },
            )
            .into_result(&what)?;

        pods.into_iter()
            .find(|p| p.phase == PodPhase::Succeeded)
            .ok_or_else(|| Error::NotFound {
                kind: ResourceKind::Pod,
                id: selector.to_string(),
            })
    }

    pub fn build(&self, name: &str) -> Result<Option<BuildState>> {
        let target = format!("build/{name}");
        let result = self.runner.run(&self.oc(["get", target.as_str(), "-o", "json"]))?;
        extract(ResourceKind::Build, &result)?.into_build()
    }

    /// Wait for `Complete`. `Failed`, `Error` and `Cancelled` end the wait at once.
    pub fn wait_build_complete(&self, name: &str, timeout: Option<Duration>) -> Result<BuildState> {
        let poller = self.poller(&self.config.polling.build_complete, timeout)?;
        let what = format!("build {}/{} to complete", self.namespace, name);
        poller
            .poll_until_or_fail(
                &what,
                || self.build(name),
                |build| {
                    build
                        .as_ref()
                        .is_some_and(|b| b.phase == BuildPhase::Complete)
                },
                |build| {
                    build
                        .as_ref()
                        .filter(|b| b.phase.is_failure())
                        .map(|b| match &b.message {
                            Some(message) => format!("build {} is {}: {}", b.name, b.phase, message),
                            None => format!("build {} is {}", b.name, b.phase),
                        })
                },
            )
            .into_result(&what)?
            .ok_or_else(|| Error::NotFound {
                kind: ResourceKind::Build,
                id: name.to_string(),
            })
    }

    pub fn image_stream(&self, name: &str) -> Result<Option<ImageStreamState>> {
        let target = format!("is/{name}");
        let result = self.runner.run(&self.oc(["get", target.as_str(), "-o", "json"]))?;
        extract(ResourceKind::ImageStream, &result)?.into_image_stream()
    }

    /// Whether stream `name` declares a tag containing `version`. One query,
    /// no waiting.
    pub fn check_is_exists(&self, name: &str, version: &str) -> Result<bool> {
        let found = self
            .image_stream(name)?
            .is_some_and(|stream| stream.tag_containing(version).is_some());
        debug!("Image stream {} tag matching {}: {}", name, version, found);
        Ok(found)
    }

    pub fn wait_image_stream_tag(
        &self,
        stream: &str,
        tag: &str,
        timeout: Option<Duration>,
    ) -> Result<ImageStreamState> {
        let poller = self.poller(&self.config.polling.image_stream_tag, timeout)?;
        let what = format!("image stream tag {stream}:{tag}");
        poller
            .poll_until(
                &what,
                || self.image_stream(stream),
                |state| state.as_ref().is_some_and(|s| s.has_tag(tag)),
            )
            .into_result(&what)?
            .ok_or_else(|| Error::NotFound {
                kind: ResourceKind::ImageStreamTag,
                id: format!("{stream}:{tag}"),
            })
    }

    /// Apply an image stream definition unless the stream already exists,
    /// then wait for it to appear.
    pub fn import_image_stream(&self, source: &ManifestSource, name: &str) -> Result<ImageStreamState> {
        if let Some(existing) = self.image_stream(name)? {
            info!("Image stream {} already present", name);
            return Ok(existing);
        }
        self.create_from_manifest(source)?;

        let poller = Poller::from_policy(&self.config.polling.image_stream_tag)?;
        let what = format!("image stream {name}");
        poller
            .poll_until(&what, || self.image_stream(name), Option::is_some)
            .into_result(&what)?
            .ok_or_else(|| Error::NotFound {
                kind: ResourceKind::ImageStream,
                id: name.to_string(),
            })
    }

    pub fn deployment(&self, name: &str) -> Result<Option<DeploymentState>> {
        let target = format!("deployment/{name}");
        let result = self.runner.run(&self.oc(["get", target.as_str(), "-o", "json"]))?;
        extract(ResourceKind::Deployment, &result)?.into_deployment()
    }

    pub fn wait_deployment_ready(
        &self,
        name: &str,
        timeout: Option<Duration>,
    ) -> Result<DeploymentState> {
        let poller = self.poller(&self.config.polling.deployment_ready, timeout)?;
        let what = format!("deployment {}/{} to be ready", self.namespace, name);
        poller
            .poll_until(
                &what,
                || self.deployment(name),
                |state| state.as_ref().is_some_and(DeploymentState::is_ready),
            )
            .into_result(&what)?
            .ok_or_else(|| Error::NotFound {
                kind: ResourceKind::Deployment,
                id: name.to_string(),
            })
    }

    /// Cluster IP of a service; `None` for headless services
    pub fn service_ip(&self, service: &str) -> Result<Option<IpAddr>> {
        let target = format!("svc/{service}");
        let result = self.runner.run(&self.oc([
            "get",
            target.as_str(),
            "-o",
            "jsonpath={.spec.clusterIP}",
        ]))?;
        if result.success() && result.stdout_trimmed() == "None" {
            return Ok(None);
        }
        extract(ResourceKind::Address, &result)?.into_address()
    }

    pub fn route_host(&self, route: &str) -> Result<String> {
        let target = format!("route/{route}");
        let result = self.runner.run(&self.oc([
            "get",
            target.as_str(),
            "-o",
            "jsonpath={.spec.host}",
        ]))?;
        let not_found = || Error::NotFound {
            kind: ResourceKind::ClusterObject,
            id: target.clone(),
        };
        if reports_missing(&result) {
            return Err(not_found());
        }
        let host = result.ensure_success()?.stdout_trimmed().to_string();
        if host.is_empty() {
            return Err(not_found());
        }
        Ok(host)
    }

    pub fn pod_logs(&self, pod: &str) -> Result<String> {
        let target = format!("pod/{pod}");
        Ok(self.run_ok(&self.oc(["logs", target.as_str()]))?.stdout)
    }

    /// Run a command in a pod; a non-zero exit is returned, not raised
    pub fn exec_in_pod<S: AsRef<str>>(&self, pod: &str, argv: &[S]) -> Result<CommandResult> {
        self.runner.run(
            &self
                .client()
                .args(["exec", pod, "-n", self.namespace.as_str(), "--"])
                .args(argv.iter().map(|a| a.as_ref())),
        )
    }

    /// GET the route until it answers with `expected_status` (and body)
    pub fn check_route_response(
        &self,
        route: &str,
        path: &str,
        expected_status: u16,
        expected_body: Option<&str>,
    ) -> Result<ProbeResult> {
        let host = self.route_host(route)?;
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        let url = format!("http://{host}{path}");

        let poller = Poller::from_policy(&self.config.polling.route_response)?;
        let what = format!("response from {url}");
        poller
            .poll_until(
                &what,
                || Ok(probe::check_url(&url, expected_status, expected_body)),
                |result| result.passed,
            )
            .into_result(&what)
    }

    /// Host of the route exposing the internal image registry
    pub fn registry_host(&self) -> Result<String> {
        self.in_namespace(REGISTRY_NAMESPACE).route_host(REGISTRY_ROUTE)
    }

    /// Pull `source_image` and push it into the cluster registry as
    /// `<registry>/<namespace>/<tagged_image>`, returning that reference.
    ///
    /// The image stream the push creates is deleted on teardown.
    pub fn upload_image(
        &self,
        containers: &ContainerManager,
        source_image: &str,
        tagged_image: &str,
    ) -> Result<String> {
        containers.pull_image(source_image)?;

        let registry = self.registry_host()?;
        let token = self.run_ok(&self.client().args(["whoami", "-t"]))?;
        let user = self.run_ok(&self.client().arg("whoami"))?;
        containers.login(&registry, user.stdout_trimmed(), token.stdout_trimmed())?;

        let target = format!("{registry}/{}/{tagged_image}", self.namespace);
        containers.tag_image(source_image, &target)?;

        let stream = tagged_image.split(':').next().unwrap_or(tagged_image);
        let stream_ref = format!("is/{stream}");
        let handle = ResourceHandle::new(ResourceKind::ImageStream, stream)
            .in_namespace(self.namespace.clone());
        self.register_deletion(handle, self.oc(["delete", stream_ref.as_str()]));

        containers.push_image(&target)?;
        info!("Uploaded {} as {}", source_image, target);
        Ok(target)
    }

    /// Upload the builder image and create an S2I application on top of it.
    /// Returns the service name.
    pub fn deploy_s2i_app(
        &self,
        containers: &ContainerManager,
        deployment: &S2iDeployment,
    ) -> Result<String> {
        let tagged = tagged_image(&deployment.image, &deployment.version).ok_or_else(|| {
            Error::InvalidConfig(format!(
                "cannot tag image {:?} with version {:?}",
                deployment.image, deployment.version
            ))
        })?;
        let service = match &deployment.service_name {
            Some(name) => name.clone(),
            None => service_name_for(&deployment.image).ok_or_else(|| {
                Error::InvalidConfig(format!("cannot name a service after {:?}", deployment.image))
            })?,
        };

        self.upload_image(containers, &deployment.image, &tagged)?;

        let mut app = AppSpec::new(format!("{tagged}~{}", deployment.app), service.clone())
            .arg("--strategy=source");
        if let Some(dir) = &deployment.context_dir {
            app = app.context_dir(dir.clone());
        }
        self.new_app(&app)?;

        let local = Path::new(&deployment.app);
        if local.is_dir() {
            self.start_build(&service, Some(local))?;
        }
        Ok(service)
    }

    /// Run the helper pod once and wait for it to be ready
    pub fn ensure_helper_pod(&self) -> Result<PodState> {
        let selector = PodSelector::Prefix(HELPER_POD.to_string());
        if let Some(pod) = self
            .pods(&selector)?
            .into_iter()
            .find(|pod| pod.name == HELPER_POD && pod.phase == PodPhase::Running && pod.ready)
        {
            return Ok(pod);
        }

        let manifest = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": HELPER_POD },
            "spec": {
                "restartPolicy": "OnFailure",
                "containers": [{
                    "name": "command-container",
                    "image": self.config.cluster.helper_image,
                    "command": ["sleep"],
                    "args": ["3h"],
                }],
            },
        });
        let local = LocalManifest::from_content(&manifest.to_string(), ".json")?;
        self.apply_file(local.path())?;
        self.wait_pod_ready(&selector, None)
    }

    /// GET a service on its cluster IP from the helper pod until it answers
    /// with `expected_status` and, when given, a body matching `expected_body`
    pub fn check_response_inside_cluster(
        &self,
        service: &str,
        port: u16,
        path: &str,
        expected_status: u16,
        expected_body: Option<&str>,
    ) -> Result<ProbeResult> {
        let ip = self.service_ip(service)?.ok_or_else(|| Error::NotFound {
            kind: ResourceKind::Address,
            id: format!("svc/{service}"),
        })?;
        let url = probe::url_for(ip, port, path);
        let pod = self.ensure_helper_pod()?;

        let poller = Poller::from_policy(&self.config.polling.route_response)?;
        let what = format!("in-cluster response from {url}");
        poller
            .poll_until(
                &what,
                || {
                    let curl = [
                        "curl",
                        "--connect-timeout",
                        "10",
                        "-k",
                        "-s",
                        "-w",
                        "\n%{http_code}",
                        url.as_str(),
                    ];
                    let result = self.exec_in_pod(&pod.name, &curl)?;
                    Ok(curl_verdict(&url, &result, expected_status, expected_body))
                },
                |result| result.passed,
            )
            .into_result(&what)
    }
}

/// Judge `curl -w '\n%{http_code}'` output
fn curl_verdict(
    url: &str,
    result: &CommandResult,
    expected_status: u16,
    expected_body: Option<&str>,
) -> ProbeResult {
    if !result.success() {
        return ProbeResult::failed(format!(
            "{url}: curl exit code {}: {}",
            result.exit_code,
            result.stderr.trim()
        ));
    }
    let (body, code) = result
        .stdout
        .rsplit_once('\n')
        .unwrap_or(("", result.stdout.as_str()));
    match code.trim().parse::<u16>() {
        Ok(status) if status == expected_status => match expected_body {
            None => ProbeResult::passed(format!("{url}: status {status}")),
            Some(pattern) => probe::match_body(url, body, pattern),
        },
        Ok(status) => ProbeResult::failed(format!("{url}: status {status}, expected {expected_status}")),
        Err(_) => ProbeResult::failed(format!("{url}: no status code in {:?}", code.trim())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_harness::{fast_config, Reply, ScriptedRunner};
    use std::time::Instant;
    use test_case::test_case;

    fn manager(runner: &Arc<ScriptedRunner>) -> (ClusterManager, Arc<CleanupRegistry>) {
        let registry = Arc::new(CleanupRegistry::new());
        let mut config = fast_config();
        config.cluster.namespace = "ci-1".to_string();
        let manager = ClusterManager::new(
            Arc::new(config),
            Arc::clone(runner) as Arc<dyn CommandRunner>,
            Arc::clone(&registry),
        );
        (manager, registry)
    }

    fn containers(runner: &Arc<ScriptedRunner>, registry: &Arc<CleanupRegistry>) -> ContainerManager {
        ContainerManager::new(
            Arc::new(fast_config()),
            Arc::clone(runner) as Arc<dyn CommandRunner>,
            Arc::clone(registry),
        )
    }

    const REGISTRY_HOST: &str = "default-route-openshift-image-registry.apps.ci.example";

    /// Builder image already present locally, registry reachable
    fn script_registry(runner: &ScriptedRunner) {
        runner
            .on("image inspect", Reply::ok(r#"[{"Id": "sha256:1"}]"#))
            .on("route/default-route", Reply::ok(REGISTRY_HOST))
            .on("whoami -t", Reply::ok("sha256~token\n"))
            .on("whoami", Reply::ok("developer\n"));
    }

    fn pod(name: &str, phase: &str, ready: bool) -> String {
        format!(
            r#"{{"metadata": {{"name": "{name}"}}, "status": {{"phase": "{phase}",
                 "containerStatuses": [{{"ready": {ready}}}]}}}}"#
        )
    }

    fn pod_list(pods: &[String]) -> String {
        format!(r#"{{"items": [{}]}}"#, pods.join(","))
    }

    fn build(phase: &str) -> String {
        format!(
            r#"{{"metadata": {{"name": "app-1"}}, "status": {{"phase": "{phase}", "message": "assemble script failed"}}}}"#
        )
    }

    #[test]
    fn wait_pod_ready_ignores_helper_pods() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on_sequence(
            "get pods",
            [
                Reply::ok(pod_list(&[pod("app-1-build", "Running", true)])),
                Reply::ok(pod_list(&[
                    pod("app-1-build", "Succeeded", false),
                    pod("app-1-abcde", "Pending", false),
                ])),
                Reply::ok(pod_list(&[
                    pod("app-1-build", "Succeeded", false),
                    pod("app-1-abcde", "Running", true),
                ])),
            ],
        );
        let (cluster, _registry) = manager(&runner);

        let pod = cluster
            .wait_pod_ready(&PodSelector::Prefix("app-1".into()), None)
            .unwrap();
        assert_eq!(pod.name, "app-1-abcde");
        assert_eq!(runner.calls()[0], "oc get pods -o json -n ci-1");
    }

    #[test]
    fn wait_pod_ready_requires_exactly_one_pod() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(
            "get pods",
            Reply::ok(pod_list(&[pod("web-a", "Running", true), pod("web-b", "Running", true)])),
        );
        let (cluster, _registry) = manager(&runner);

        let err = cluster
            .wait_pod_ready(&PodSelector::Label("app=web".into()), None)
            .unwrap_err();
        assert!(matches!(err, Error::PollTimedOut { .. }));
        assert!(runner.calls()[0].contains("-l app=web"));
    }

    #[test]
    fn wait_pod_succeeded_fails_on_failed_pod() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on("get pods", Reply::ok(pod_list(&[pod("migrate-1", "Failed", false)])));
        let (cluster, _registry) = manager(&runner);

        let err = cluster
            .wait_pod_succeeded(&PodSelector::Prefix("migrate".into()), None)
            .unwrap_err();
        assert!(matches!(err, Error::TerminalState { .. }));
    }

    #[test]
    fn failed_build_ends_the_wait_immediately() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on_sequence(
            "get build/app-1",
            [
                Reply::ok(build("Pending")),
                Reply::ok(build("Running")),
                Reply::ok(build("Failed")),
            ],
        );
        let (cluster, _registry) = manager(&runner);

        let start = Instant::now();
        let err = cluster
            .wait_build_complete("app-1", Some(Duration::from_secs(300)))
            .unwrap_err();
        assert!(matches!(err, Error::TerminalState { ref reason, .. } if reason.contains("assemble script failed")));
        assert_eq!(runner.count("get build/app-1"), 3);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn build_not_visible_yet_keeps_polling() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on_sequence(
            "get build/app-1",
            [
                Reply::fail(1, "Error from server (NotFound): builds.build.openshift.io \"app-1\" not found"),
                Reply::ok(build("Complete")),
            ],
        );
        let (cluster, _registry) = manager(&runner);

        let state = cluster.wait_build_complete("app-1", None).unwrap();
        assert_eq!(state.phase, BuildPhase::Complete);
    }

    #[test]
    fn check_is_exists_is_a_single_query() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .on(
                "get is/python",
                Reply::ok(r#"{"metadata": {"name": "python"}, "spec": {"tags": [{"name": "3.11-ubi9"}]}}"#),
            )
            .on("get is/missing", Reply::fail(1, "Error from server (NotFound): imagestreams \"missing\" not found"));
        let (cluster, _registry) = manager(&runner);

        assert!(cluster.check_is_exists("python", "3.11").unwrap());
        assert!(!cluster.check_is_exists("python", "3.12").unwrap());
        assert!(!cluster.check_is_exists("missing", "1").unwrap());
        assert_eq!(runner.calls().len(), 3);
    }

    #[test]
    fn manifest_objects_are_registered_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("is.json");
        std::fs::write(&path, "{}").unwrap();

        let runner = Arc::new(ScriptedRunner::new());
        runner.on(
            "apply -f",
            Reply::ok("imagestream.image.openshift.io/python\nservice/web\n"),
        );
        let (cluster, registry) = manager(&runner);

        let source = ManifestSource::Path(path);
        let objects = cluster.create_from_manifest(&source).unwrap();
        assert_eq!(objects.len(), 2);
        cluster.create_from_manifest(&source).unwrap();
        assert_eq!(registry.len(), 2);

        let report = registry.teardown();
        assert!(report.is_clean());
        let calls = runner.calls();
        let deletes: Vec<_> = calls.iter().filter(|c| c.contains("delete")).collect();
        assert_eq!(
            deletes,
            vec![
                "oc delete service/web -n ci-1 --ignore-not-found",
                "oc delete imagestream.image.openshift.io/python -n ci-1 --ignore-not-found",
            ]
        );
    }

    #[test]
    fn partial_apply_registers_what_it_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("web.yaml");
        std::fs::write(&path, "kind: List").unwrap();

        let runner = Arc::new(ScriptedRunner::new());
        runner.on(
            "apply -f",
            Reply::Output {
                exit_code: 1,
                stdout: "service/web\ndeployment.apps/web\n".to_string(),
                stderr: "error: unable to recognize \"route\": no matches for kind".to_string(),
            },
        );
        let (cluster, registry) = manager(&runner);

        let err = cluster
            .create_from_manifest(&ManifestSource::Path(path))
            .unwrap_err();
        assert!(matches!(err, Error::CommandFailed { exit_code: 1, .. }));
        assert_eq!(registry.len(), 2);

        assert!(registry.teardown().is_clean());
        assert_eq!(runner.count("delete deployment.apps/web"), 1);
        assert_eq!(runner.count("delete service/web"), 1);
    }

    #[test]
    fn processed_template_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("template.yaml");
        std::fs::write(&path, "kind: Template").unwrap();

        let runner = Arc::new(ScriptedRunner::new());
        runner
            .on("process -f", Reply::ok(r#"{"kind": "List", "items": []}"#))
            .on("apply -f", Reply::ok("deployment.apps/postgresql\n"));
        let (cluster, _registry) = manager(&runner);

        let params = vec![("POSTGRESQL_VERSION".to_string(), "15".to_string())];
        let objects = cluster
            .process_template(&ManifestSource::Path(path), &params)
            .unwrap();
        assert_eq!(objects[0].kind, "deployment");
        assert!(runner.calls()[0].contains("-p POSTGRESQL_VERSION=15 -o json"));
    }

    #[test]
    fn new_app_then_build_register_in_order() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on("start-build", Reply::ok("build.build.openshift.io/app-1\n"));
        let (cluster, registry) = manager(&runner);

        let spec = AppSpec::new("python:3.11~https://github.com/sclorg/django-ex", "app")
            .context_dir("src")
            .env("APP_MODULE", "wsgi");
        cluster.new_app(&spec).unwrap();
        let build = cluster.start_build("app", None).unwrap();
        assert_eq!(build, "app-1");

        assert_eq!(
            runner.calls()[0],
            "oc new-app python:3.11~https://github.com/sclorg/django-ex --name app -l app=app -n ci-1 --context-dir=src -e APP_MODULE=wsgi"
        );
        let kinds: Vec<_> = registry.handles().iter().map(|h| h.kind).collect();
        assert_eq!(kinds, vec![ResourceKind::Application, ResourceKind::Build]);
    }

    #[test]
    fn failed_new_app_is_still_registered() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on("new-app", Reply::fail(1, "error: unable to locate any images"));
        let (cluster, registry) = manager(&runner);

        assert!(cluster.new_app(&AppSpec::new("nope", "app")).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn temporary_project_is_created_and_registered() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on("get project", Reply::fail(1, "Error from server (NotFound): namespaces not found"));
        let (cluster, registry) = manager(&runner);

        let scoped = cluster.create_temporary_project().unwrap();
        assert!(scoped.namespace().starts_with("imagetest-"));
        assert_eq!(runner.count("new-project"), 1);
        assert_eq!(registry.handles()[0].kind, ResourceKind::Project);

        cluster.delete_project(scoped.namespace()).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn existing_project_is_left_alone() {
        let runner = Arc::new(ScriptedRunner::new());
        let (cluster, registry) = manager(&runner);

        cluster.create_project("shared").unwrap();
        assert_eq!(runner.count("new-project"), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn headless_service_has_no_ip() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .on("svc/headless", Reply::ok("None"))
            .on("svc/web", Reply::ok("172.30.12.4"));
        let (cluster, _registry) = manager(&runner);

        assert_eq!(cluster.service_ip("headless").unwrap(), None);
        assert_eq!(
            cluster.service_ip("web").unwrap().map(|ip| ip.to_string()).as_deref(),
            Some("172.30.12.4")
        );
    }

    #[test]
    fn exec_places_namespace_before_the_command() {
        let runner = Arc::new(ScriptedRunner::new());
        let (cluster, _registry) = manager(&runner);

        cluster.exec_in_pod("db-0", &["psql", "-c", "select 1"]).unwrap();
        assert_eq!(runner.calls()[0], "oc exec db-0 -n ci-1 -- psql -c select 1");
    }

    #[test_case("rhel8/httpd-24:1", "2.4", Some("httpd-24:2.4") ; "repository and tag")]
    #[test_case("/httpd-24:1", "2.4", Some("httpd-24:2.4") ; "leading slash")]
    #[test_case("rhel8/httpd", "2.4", Some("httpd:2.4") ; "untagged")]
    #[test_case("quay.io:443/sclorg/nginx-124-c9s@sha256:ab", "1.24", Some("nginx-124-c9s:1.24") ; "registry port and digest")]
    #[test_case("", "2.4", None ; "empty image")]
    #[test_case("rhel8/httpd", "", None ; "empty version")]
    fn image_stream_tags(image: &str, version: &str, expected: Option<&str>) {
        assert_eq!(tagged_image(image, version).as_deref(), expected);
    }

    #[test_case("rhel8/httpd-24:1", Some("httpd-24-testing") ; "tagged")]
    #[test_case("rhel8/httpd", Some("httpd-testing") ; "untagged")]
    #[test_case("", None ; "empty")]
    fn service_names(image: &str, expected: Option<&str>) {
        assert_eq!(service_name_for(image).as_deref(), expected);
    }

    #[test]
    fn upload_pushes_into_the_project_registry() {
        let runner = Arc::new(ScriptedRunner::new());
        script_registry(&runner);
        let (cluster, registry) = manager(&runner);
        let engine = containers(&runner, &registry);

        let target = cluster
            .upload_image(&engine, "quay.io/sclorg/httpd-24-c9s", "httpd-24-c9s:2.4")
            .unwrap();

        assert_eq!(target, format!("{REGISTRY_HOST}/ci-1/httpd-24-c9s:2.4"));
        assert!(runner.calls().iter().any(|c| c.contains("route/default-route") && c.ends_with("-n openshift-image-registry")));
        assert_eq!(
            runner.count(&format!("docker login -u developer --password-stdin {REGISTRY_HOST}")),
            1
        );
        assert_eq!(runner.count(&format!("docker push {target}")), 1);
        let kinds: Vec<_> = registry.handles().iter().map(|h| h.kind).collect();
        assert_eq!(kinds, vec![ResourceKind::Image, ResourceKind::ImageStream]);
    }

    #[test]
    fn failed_push_still_cleans_up_the_stream() {
        let runner = Arc::new(ScriptedRunner::new());
        script_registry(&runner);
        runner.on("push", Reply::fail(1, "unauthorized: authentication required"));
        let (cluster, registry) = manager(&runner);
        let engine = containers(&runner, &registry);

        assert!(cluster
            .upload_image(&engine, "quay.io/sclorg/httpd-24-c9s", "httpd-24-c9s:2.4")
            .is_err());
        assert_eq!(registry.len(), 2);
        assert!(registry.teardown().is_clean());
        assert_eq!(runner.count("delete is/httpd-24-c9s -n ci-1"), 1);
    }

    #[test]
    fn s2i_app_from_repository_needs_no_manual_build() {
        let runner = Arc::new(ScriptedRunner::new());
        script_registry(&runner);
        let (cluster, registry) = manager(&runner);
        let engine = containers(&runner, &registry);

        let deployment = S2iDeployment::new(
            "quay.io/sclorg/httpd-24-c9s",
            "2.4",
            "https://github.com/sclorg/httpd-ex.git",
        );
        let service = cluster.deploy_s2i_app(&engine, &deployment).unwrap();

        assert_eq!(service, "httpd-24-c9s-testing");
        assert_eq!(
            runner.count(
                "new-app httpd-24-c9s:2.4~https://github.com/sclorg/httpd-ex.git --name httpd-24-c9s-testing"
            ),
            1
        );
        assert_eq!(runner.count("--strategy=source"), 1);
        assert_eq!(runner.count("start-build"), 0);
    }

    #[test]
    fn s2i_app_from_local_directory_starts_a_build() {
        let app_dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        script_registry(&runner);
        runner.on("start-build", Reply::ok("build.build.openshift.io/frontend-1\n"));
        let (cluster, registry) = manager(&runner);
        let engine = containers(&runner, &registry);

        let deployment = S2iDeployment::new(
            "quay.io/sclorg/nodejs-20-c9s",
            "20",
            app_dir.path().display().to_string(),
        )
        .context_dir("app")
        .service_name("frontend");
        cluster.deploy_s2i_app(&engine, &deployment).unwrap();

        assert_eq!(runner.count("--context-dir=app --strategy=source"), 1);
        assert_eq!(
            runner.count(&format!("start-build frontend -o name -n ci-1 --from-dir={}", app_dir.path().display())),
            1
        );
    }

    #[test]
    fn response_inside_cluster_waits_for_status_then_body() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .on("svc/web", Reply::ok("172.30.0.9"))
            .on_sequence(
                "get pods",
                [
                    Reply::ok(pod_list(&[])),
                    Reply::ok(pod_list(&[pod("command-app", "Running", true)])),
                ],
            )
            .on("apply -f", Reply::ok("pod/command-app\n"))
            .on_sequence(
                "exec command-app",
                [
                    Reply::fail(7, "Failed to connect"),
                    Reply::ok("starting\n503"),
                    Reply::ok("Welcome to your static httpd application\n200"),
                ],
            );
        let (cluster, registry) = manager(&runner);

        let result = cluster
            .check_response_inside_cluster("web", 8080, "/", 200, Some("Welcome to your .* application"))
            .unwrap();

        assert!(result.passed, "{}", result.detail);
        assert_eq!(runner.count("exec command-app"), 3);
        assert!(runner.calls().iter().any(|c| c.ends_with("http://172.30.0.9:8080/")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn running_helper_pod_is_reused() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on("get pods", Reply::ok(pod_list(&[pod("command-app", "Running", true)])));
        let (cluster, registry) = manager(&runner);

        assert_eq!(cluster.ensure_helper_pod().unwrap().name, "command-app");
        assert_eq!(runner.count("apply"), 0);
        assert!(registry.is_empty());
    }

    #[test_case("<h1>ok</h1>\n200", 0, true ; "status and body")]
    #[test_case("oops\n500", 0, false ; "wrong status")]
    #[test_case("", 0, false ; "no output")]
    #[test_case("", 7, false ; "connection refused")]
    fn curl_output_verdicts(stdout: &str, exit_code: i32, passed: bool) {
        let result = CommandResult {
            program: "oc".into(),
            args: Vec::new(),
            exit_code,
            stdout: stdout.to_string(),
            stderr: String::new(),
            duration: Duration::from_millis(1),
        };
        assert_eq!(curl_verdict("http://svc", &result, 200, Some("ok")).passed, passed);
    }

    #[test]
    fn missing_route_is_not_found() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on("route/web", Reply::fail(1, "Error from server (NotFound): routes.route.openshift.io \"web\" not found"));
        let (cluster, _registry) = manager(&runner);

        assert!(matches!(cluster.route_host("web"), Err(Error::NotFound { .. })));
    }
}
