//! Container lifecycle manager
//!
//! Drives a container engine (docker or podman) through
//! create -> running -> ready -> removed. Every container that is created is
//! registered for removal before this module returns it to the caller.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use imagetest_common::{
    unique_name, EngineConfig, Error, HarnessConfig, ResourceHandle, ResourceKind, Result,
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::exec::{CommandResult, CommandRunner, Invocation};
use crate::extract::{extract, reports_missing, ContainerState, ImageState};
use crate::poll::{PollOutcome, Poller};
use crate::probe::{self, Probe, ProbeResult};
use crate::registry::CleanupRegistry;

/// How to start a container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerOptions {
    /// Container name; a unique one is generated when absent
    pub name: Option<String>,
    pub env: Vec<(String, String)>,
    /// `-p` publish specs, e.g. `8080` or `127.0.0.1:8080:8080`
    pub ports: Vec<String>,
    /// Extra engine arguments placed before the image name
    pub extra_args: Vec<String>,
    /// Command and arguments placed after the image name
    pub command: Vec<String>,
    /// Readiness probe `wait_ready` polls for containers created with these options
    pub probe: Option<Probe>,
}

impl ContainerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn publish(mut self, spec: impl Into<String>) -> Self {
        self.ports.push(spec.into());
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    pub fn command<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = argv.into_iter().map(Into::into).collect();
        self
    }

    pub fn probe(mut self, probe: Probe) -> Self {
        self.probe = Some(probe);
        self
    }
}

/// Creates, observes and removes containers
///
/// Clones share the readiness probes declared at creation.
#[derive(Clone)]
pub struct ContainerManager {
    config: Arc<HarnessConfig>,
    runner: Arc<dyn CommandRunner>,
    registry: Arc<CleanupRegistry>,
    probes: Arc<Mutex<HashMap<String, Probe>>>,
}

impl ContainerManager {
    pub fn new(
        config: Arc<HarnessConfig>,
        runner: Arc<dyn CommandRunner>,
        registry: Arc<CleanupRegistry>,
    ) -> Self {
        Self {
            config,
            runner,
            registry,
            probes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn engine(&self) -> Invocation {
        Invocation::new(&self.config.engine.binary).timeout(self.config.engine.command_timeout())
    }

    fn run_invocation(
        &self,
        mode: &[&str],
        name: &str,
        image: &str,
        options: &ContainerOptions,
    ) -> Invocation {
        let mut inv = self.engine().args(mode.iter().copied()).args(["--name", name]);
        for (key, value) in &options.env {
            inv = inv.arg("-e").arg(format!("{key}={value}"));
        }
        for spec in &options.ports {
            inv = inv.arg("-p").arg(spec);
        }
        inv.args(&options.extra_args).arg(image).args(&options.command)
    }

    /// Start a detached container and register it for removal
    pub fn create(&self, image: &str, options: &ContainerOptions) -> Result<ResourceHandle> {
        if let Some(probe) = &options.probe {
            probe.validate()?;
        }
        let name = options
            .name
            .clone()
            .unwrap_or_else(|| unique_name("imagetest"));
        info!("Creating container {} from {}", name, image);

        let inv = self.run_invocation(&["run", "-d"], &name, image, options);
        let result = match self.runner.run(&inv).and_then(CommandResult::ensure_success) {
            Ok(result) => result,
            Err(e) => {
                // `run` can fail after the container was created
                if let Err(cleanup) =
                    remove_container(self.runner.as_ref(), &self.config.engine, &name)
                {
                    debug!("Discarding {} after failed run: {}", name, cleanup);
                }
                return Err(e);
            }
        };

        let id = result
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .unwrap_or(name.as_str())
            .to_string();

        let handle = ResourceHandle::new(ResourceKind::Container, id);
        self.register_removal(&handle);
        if let Some(probe) = &options.probe {
            self.probes.lock().insert(handle.id.clone(), probe.clone());
        }
        Ok(handle)
    }

    fn register_removal(&self, handle: &ResourceHandle) {
        let runner = Arc::clone(&self.runner);
        let engine = self.config.engine.clone();
        let id = handle.id.clone();
        self.registry.register(handle.clone(), move || {
            remove_container(runner.as_ref(), &engine, &id)
        });
    }

    /// Current state, or `None` when the container does not exist
    pub fn state(&self, handle: &ResourceHandle) -> Result<Option<ContainerState>> {
        let result = self.runner.run(&self.engine().args(["inspect", handle.id.as_str()]))?;
        extract(ResourceKind::Container, &result)?.into_container()
    }

    fn require_state(&self, handle: &ResourceHandle) -> Result<ContainerState> {
        self.state(handle)?.ok_or_else(|| Error::NotFound {
            kind: ResourceKind::Container,
            id: handle.id.clone(),
        })
    }

    /// Wait until the engine reports the container running
    pub fn wait_running(&self, handle: &ResourceHandle) -> Result<ContainerState> {
        self.wait_running_within(handle, None)
    }

    fn wait_running_within(
        &self,
        handle: &ResourceHandle,
        timeout: Option<Duration>,
    ) -> Result<ContainerState> {
        let mut poller = Poller::from_policy(&self.config.polling.container_running)?;
        if let Some(timeout) = timeout {
            poller = poller.with_deadline(timeout)?;
        }

        let what = format!("{handle} to run");
        poller
            .poll_until_or_fail(
                &what,
                || self.state(handle),
                |state| state.as_ref().is_some_and(|s| s.running),
                |state| match state {
                    None => Some("container no longer exists".to_string()),
                    Some(s) if s.has_exited() => Some(describe_exit(s)),
                    Some(_) => None,
                },
            )
            .into_result(&what)?
            .ok_or_else(|| Error::NotFound {
                kind: ResourceKind::Container,
                id: handle.id.clone(),
            })
    }

    /// Readiness probe declared when `handle` was created
    pub fn probe_for(&self, handle: &ResourceHandle) -> Option<Probe> {
        self.probes.lock().get(&handle.id).cloned()
    }

    /// Wait for the container to run and then for its readiness probe to pass.
    ///
    /// Without a probe the container is ready as soon as it runs. `timeout`,
    /// or the `container_ready` deadline when absent, bounds the whole wait.
    pub fn wait_ready(&self, handle: &ResourceHandle, timeout: Option<Duration>) -> Result<ContainerState> {
        let probe = self.probe_for(handle);
        self.wait_ready_with(handle, probe.as_ref(), timeout)
    }

    /// [`wait_ready`](Self::wait_ready) with an explicit probe
    pub fn wait_ready_with(
        &self,
        handle: &ResourceHandle,
        probe: Option<&Probe>,
        timeout: Option<Duration>,
    ) -> Result<ContainerState> {
        let start = Instant::now();
        let polling = &self.config.polling;
        let budget = timeout.unwrap_or_else(|| polling.container_ready.deadline());
        let running_budget = match timeout {
            Some(timeout) => timeout,
            None => polling.container_running.deadline().min(budget),
        };

        let running = self.wait_running_within(handle, Some(running_budget))?;
        let Some(probe) = probe else {
            info!("{} is running, no readiness probe configured", handle);
            return Ok(running);
        };

        let what = format!("{handle} to become ready");
        let remaining = budget.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            return Err(Error::PollTimedOut {
                what,
                elapsed: start.elapsed(),
                last_state: format!("{running:?}"),
            });
        }
        let poller = Poller::from_policy(&polling.container_ready)?.with_deadline(remaining)?;

        let (state, result) = poller
            .poll_until_or_fail(
                &what,
                || {
                    let state = self.require_state(handle)?;
                    let result = if state.running {
                        self.run_probe(handle, &state, probe)?
                    } else {
                        ProbeResult::failed("not running")
                    };
                    Ok((state, result))
                },
                |(_, result)| result.passed,
                |(state, _)| state.has_exited().then(|| describe_exit(state)),
            )
            .into_result(&what)?;

        info!("{} is ready: {}", handle, result.detail);
        Ok(state)
    }

    fn run_probe(
        &self,
        handle: &ResourceHandle,
        state: &ContainerState,
        probe: &Probe,
    ) -> Result<ProbeResult> {
        match probe {
            Probe::Command(argv) => {
                let result = self.exec(handle, argv.as_slice())?;
                let output = format!("{}{}", result.stdout, result.stderr);
                Ok(if result.success() {
                    ProbeResult::passed(output.trim())
                } else {
                    ProbeResult::failed(format!("exit code {}: {}", result.exit_code, output.trim()))
                })
            }
            Probe::Http {
                port,
                path,
                expected_status,
                expected_body,
            } => Ok(match self.address_of(handle, state)? {
                Some(ip) => probe::check_url(
                    &probe::url_for(ip, *port, path),
                    *expected_status,
                    expected_body.as_deref(),
                ),
                None => ProbeResult::failed("container has no address yet"),
            }),
            Probe::Tcp { port } => Ok(match self.address_of(handle, state)? {
                Some(ip) => probe::check_tcp(ip, *port),
                None => ProbeResult::failed("container has no address yet"),
            }),
        }
    }

    fn address_of(&self, handle: &ResourceHandle, state: &ContainerState) -> Result<Option<IpAddr>> {
        match state.ip.as_deref().and_then(|ip| ip.parse().ok()) {
            Some(ip) => Ok(Some(ip)),
            None => self.ip_address(handle),
        }
    }

    /// Succeed only if a container from `image` fails to come up.
    ///
    /// A failing `run`, or a container that exits non-zero inside the
    /// `creation_failure` window, is the expected outcome. A container still
    /// running at the end of the window, or one that exits 0, is
    /// [`Error::UnexpectedSuccess`].
    pub fn assert_creation_fails(&self, image: &str, options: &ContainerOptions) -> Result<()> {
        let what = format!("container from {image}");
        let handle = match self.create(image, options) {
            Ok(handle) => handle,
            Err(Error::CommandFailed {
                exit_code, stderr, ..
            }) => {
                info!(
                    "Creating {} failed as expected (exit code {}): {}",
                    what, exit_code, stderr
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let poller = Poller::from_policy(&self.config.polling.creation_failure)?;
        let outcome = poller.poll_until(
            &format!("{handle} to exit"),
            || self.state(&handle),
            |state| state.as_ref().map_or(true, ContainerState::has_exited),
        );

        let verdict = match outcome {
            PollOutcome::Satisfied(None) => {
                info!("{} disappeared, treating as failed start", handle);
                Ok(())
            }
            PollOutcome::Satisfied(Some(state)) if state.exit_code != Some(0) => {
                info!("{} failed as expected: {}", handle, describe_exit(&state));
                Ok(())
            }
            PollOutcome::Satisfied(Some(_)) => Err(Error::UnexpectedSuccess {
                what: format!("{what} (exited with code 0)"),
            }),
            PollOutcome::TimedOut { elapsed, .. } => Err(Error::UnexpectedSuccess {
                what: format!("{what} (still running after {elapsed:?})"),
            }),
            PollOutcome::Failed(reason) => Err(Error::TerminalState { what, reason }),
        };

        if let Err(e) = self.cleanup(&handle) {
            warn!("Failed to remove {}, left for teardown: {}", handle, e);
        }
        verdict
    }

    /// Stop and remove the container. Removing a missing container succeeds.
    pub fn cleanup(&self, handle: &ResourceHandle) -> Result<()> {
        remove_container(self.runner.as_ref(), &self.config.engine, &handle.id)?;
        self.registry.forget(handle);
        self.probes.lock().remove(&handle.id);
        Ok(())
    }

    /// Engine-reported address on the default network
    pub fn ip_address(&self, handle: &ResourceHandle) -> Result<Option<IpAddr>> {
        let result = self.runner.run(&self.engine().args([
            "inspect",
            "--format",
            "{{.NetworkSettings.IPAddress}}",
            handle.id.as_str(),
        ]))?;
        if let Some(ip) = extract(ResourceKind::Address, &result)?.into_address()? {
            return Ok(Some(ip));
        }
        // User-defined networks leave the top-level address empty
        Ok(self
            .state(handle)?
            .and_then(|s| s.ip)
            .and_then(|ip| ip.parse().ok()))
    }

    /// Run a command inside the container; a non-zero exit is returned, not raised
    pub fn exec<S: AsRef<str>>(&self, handle: &ResourceHandle, argv: &[S]) -> Result<CommandResult> {
        self.runner.run(
            &self
                .engine()
                .args(["exec", handle.id.as_str()])
                .args(argv.iter().map(|a| a.as_ref())),
        )
    }

    /// Combined stdout and stderr of the container
    pub fn logs(&self, handle: &ResourceHandle) -> Result<String> {
        let result = self
            .runner
            .run(&self.engine().args(["logs", handle.id.as_str()]))?
            .ensure_success()?;
        Ok(format!("{}{}", result.stdout, result.stderr))
    }

    /// Run a container to completion with `--rm` and return its output
    pub fn run_once(&self, image: &str, options: &ContainerOptions) -> Result<CommandResult> {
        let name = options
            .name
            .clone()
            .unwrap_or_else(|| unique_name("imagetest-run"));
        // Covers a client killed by its timeout before `--rm` could act
        let handle = ResourceHandle::new(ResourceKind::Container, name.clone());
        self.register_removal(&handle);

        let result = self
            .runner
            .run(&self.run_invocation(&["run", "--rm"], &name, image, options));
        if result.is_ok() {
            self.registry.forget(&handle);
        }
        result
    }

    fn image_state(&self, image: &str) -> Result<Option<ImageState>> {
        let result = self
            .runner
            .run(&self.engine().args(["image", "inspect", image]))?;
        extract(ResourceKind::Image, &result)?.into_image()
    }

    pub fn image_exists(&self, image: &str) -> Result<bool> {
        Ok(self.image_state(image)?.is_some())
    }

    pub fn inspect_image(&self, image: &str) -> Result<ImageState> {
        self.image_state(image)?.ok_or_else(|| Error::NotFound {
            kind: ResourceKind::Image,
            id: image.to_string(),
        })
    }

    /// Pull `image` unless present, retrying transient registry failures
    pub fn pull_image(&self, image: &str) -> Result<ImageState> {
        if let Some(state) = self.image_state(image)? {
            debug!("Image {} already present", image);
            return Ok(state);
        }

        let poller = Poller::from_policy(&self.config.polling.image_pull)?;
        let what = format!("pull of {image}");
        poller
            .poll_until(
                &what,
                || {
                    self.runner
                        .run(&self.engine().args(["pull", image]).timeout(poller.deadline()))?
                        .ensure_success()?;
                    self.image_state(image)
                },
                Option::is_some,
            )
            .into_result(&what)?
            .ok_or_else(|| Error::NotFound {
                kind: ResourceKind::Image,
                id: image.to_string(),
            })
    }

    /// Log in to `registry`; the password goes over stdin
    pub fn login(&self, registry: &str, user: &str, password: &str) -> Result<()> {
        self.runner
            .run(
                &self
                    .engine()
                    .args(["login", "-u", user, "--password-stdin", registry])
                    .stdin(password),
            )?
            .ensure_success()?;
        info!("Logged in to {} as {}", registry, user);
        Ok(())
    }

    /// Tag `source` as `target`; the new tag is removed on teardown
    pub fn tag_image(&self, source: &str, target: &str) -> Result<ResourceHandle> {
        self.runner
            .run(&self.engine().args(["tag", source, target]))?
            .ensure_success()?;

        let handle = ResourceHandle::new(ResourceKind::Image, target);
        let runner = Arc::clone(&self.runner);
        let rmi = self.engine().args(["rmi", target]);
        self.registry.register(handle.clone(), move || {
            let result = runner.run(&rmi)?;
            if reports_missing(&result) {
                return Ok(());
            }
            result.ensure_success().map(drop)
        });
        debug!("Tagged {} as {}", source, target);
        Ok(handle)
    }

    pub fn push_image(&self, image: &str) -> Result<()> {
        info!("Pushing {}", image);
        self.runner
            .run(&self.engine().args(["push", image]))?
            .ensure_success()?;
        Ok(())
    }
}

fn describe_exit(state: &ContainerState) -> String {
    match state.exit_code {
        Some(code) => format!("container exited with code {code}"),
        None => "container exited".to_string(),
    }
}

/// Stop then force-remove. A container that is already gone counts as removed.
fn remove_container(runner: &dyn CommandRunner, engine: &EngineConfig, id: &str) -> Result<()> {
    let grace = engine.stop_grace_secs.to_string();
    let stop_timeout = engine.command_timeout() + Duration::from_secs(engine.stop_grace_secs);

    // `rm -f` kills whatever `stop` left running
    match runner.run(
        &Invocation::new(&engine.binary)
            .args(["stop", "-t", grace.as_str(), id])
            .timeout(stop_timeout),
    ) {
        Ok(stop) if !stop.success() && !reports_missing(&stop) => {
            warn!("Stopping container {} failed: {}", id, stop.stderr.trim());
        }
        Ok(_) => {}
        Err(e) => warn!("Stopping container {} failed, forcing removal: {}", id, e),
    }

    let rm = runner.run(
        &Invocation::new(&engine.binary)
            .args(["rm", "-f", "-v", id])
            .timeout(engine.command_timeout()),
    )?;
    if reports_missing(&rm) {
        debug!("Container {} already removed", id);
        return Ok(());
    }
    rm.ensure_success()?;
    info!("Removed container {}", id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_harness::{fast_config, Reply, ScriptedRunner};
    use test_case::test_case;

    fn container_json(status: &str, running: bool, exit_code: i64) -> String {
        format!(
            r#"[{{"Id": "abc123", "State": {{"Status": "{status}", "Running": {running}, "ExitCode": {exit_code}}},
                 "NetworkSettings": {{"IPAddress": "172.17.0.5"}}}}]"#
        )
    }

    fn manager(runner: &Arc<ScriptedRunner>) -> (ContainerManager, Arc<CleanupRegistry>) {
        let registry = Arc::new(CleanupRegistry::new());
        let manager = ContainerManager::new(
            Arc::new(fast_config()),
            Arc::clone(runner) as Arc<dyn CommandRunner>,
            Arc::clone(&registry),
        );
        (manager, registry)
    }

    #[test]
    fn create_registers_the_container() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on("run -d", Reply::ok("abc123\n"));
        let (containers, registry) = manager(&runner);

        let options = ContainerOptions::new()
            .name("web")
            .env("POSTGRESQL_USER", "user")
            .publish("5432");
        let handle = containers.create("quay.io/sclorg/postgresql-15-c9s", &options).unwrap();

        assert_eq!(handle.id, "abc123");
        assert_eq!(registry.handles().len(), 1);
        assert_eq!(
            runner.calls()[0],
            "docker run -d --name web -e POSTGRESQL_USER=user -p 5432 quay.io/sclorg/postgresql-15-c9s"
        );
    }

    #[test]
    fn failed_run_is_discarded_and_not_registered() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on("run -d", Reply::fail(125, "port is already allocated"));
        let (containers, registry) = manager(&runner);

        let err = containers
            .create("img", &ContainerOptions::new().name("dup"))
            .unwrap_err();
        assert!(matches!(err, Error::CommandFailed { exit_code: 125, .. }));
        assert_eq!(runner.count("rm -f -v dup"), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn wait_ready_polls_the_command_probe() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .on("run -d", Reply::ok("abc123"))
            .on_sequence(
                "inspect abc123",
                [
                    Reply::ok(container_json("created", false, 0)),
                    Reply::ok(container_json("running", true, 0)),
                ],
            )
            .on_sequence(
                "exec abc123",
                [Reply::fail(2, "no response"), Reply::ok("accepting connections")],
            );
        let (containers, _registry) = manager(&runner);

        let options = ContainerOptions::new().probe(Probe::command(["pg_isready"]));
        let handle = containers.create("img", &options).unwrap();
        let state = containers.wait_ready(&handle, None).unwrap();

        assert!(state.running);
        assert_eq!(runner.count("exec abc123 pg_isready"), 2);
    }

    #[test]
    fn late_start_and_probe_share_one_deadline() {
        let mut inspect = vec![Reply::ok(container_json("created", false, 0)); 40];
        inspect.push(Reply::ok(container_json("running", true, 0)));
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .on("run -d", Reply::ok("abc123"))
            .on_sequence("inspect abc123", inspect)
            .on("exec abc123", Reply::fail(1, "no response"));
        let (containers, _registry) = manager(&runner);

        let options = ContainerOptions::new().probe(Probe::command(["pg_isready"]));
        let handle = containers.create("img", &options).unwrap();
        let deadline = Duration::from_millis(600);
        let start = Instant::now();
        let err = containers.wait_ready(&handle, Some(deadline)).unwrap_err();

        assert!(matches!(err, Error::PollTimedOut { .. }));
        // one deadline plus one 10ms interval and scheduling slack
        assert!(start.elapsed() <= deadline + Duration::from_millis(250));
        assert!(runner.count("exec abc123") >= 1);
    }

    #[test]
    fn probe_is_ignored_after_cleanup() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on("run -d", Reply::ok("abc123"));
        let (containers, _registry) = manager(&runner);

        let options = ContainerOptions::new().probe(Probe::tcp(5432));
        let handle = containers.create("img", &options).unwrap();
        assert_eq!(containers.probe_for(&handle), Some(Probe::tcp(5432)));
        containers.cleanup(&handle).unwrap();
        assert_eq!(containers.probe_for(&handle), None);
    }

    #[test]
    fn wait_ready_without_probe_returns_once_running() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on("inspect abc123", Reply::ok(container_json("running", true, 0)));
        let (containers, _registry) = manager(&runner);

        let handle = ResourceHandle::new(ResourceKind::Container, "abc123");
        let state = containers
            .wait_ready(&handle, Some(Duration::from_secs(30)))
            .unwrap();
        assert!(state.running);
        assert_eq!(runner.count("inspect"), 1);
    }

    #[test]
    fn exited_container_fails_fast() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on("inspect abc123", Reply::ok(container_json("exited", false, 1)));
        let (containers, _registry) = manager(&runner);

        let handle = ResourceHandle::new(ResourceKind::Container, "abc123");
        let err = containers.wait_running(&handle).unwrap_err();
        assert!(matches!(err, Error::TerminalState { ref reason, .. } if reason.contains("code 1")));
        assert_eq!(runner.count("inspect"), 1);
    }

    #[test]
    fn creation_failure_on_run_is_expected() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on("run -d", Reply::fail(125, "invalid reference format"));
        let (containers, registry) = manager(&runner);

        containers
            .assert_creation_fails("img", &ContainerOptions::new())
            .unwrap();
        assert!(registry.is_empty());
    }

    #[test_case("exited", false, 1, true ; "non-zero exit is the expected failure")]
    #[test_case("exited", false, 0, false ; "clean exit is unexpected success")]
    #[test_case("running", true, 0, false ; "still running is unexpected success")]
    fn creation_failure_verdicts(status: &str, running: bool, exit_code: i64, expected_ok: bool) {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .on("run -d", Reply::ok("abc123"))
            .on("inspect abc123", Reply::ok(container_json(status, running, exit_code)));
        let (containers, registry) = manager(&runner);

        let options = ContainerOptions::new().env("POSTGRESQL_USER", "");
        let result = containers.assert_creation_fails("img", &options);
        if expected_ok {
            result.unwrap();
        } else {
            assert!(matches!(result, Err(Error::UnexpectedSuccess { .. })));
        }
        assert!(registry.is_empty());
        assert_eq!(runner.count("rm -f -v abc123"), 1);
    }

    #[test]
    fn cleanup_is_idempotent() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .on("run -d", Reply::ok("abc123"))
            .on_sequence(
                "stop -t 10 abc123",
                [Reply::ok("abc123"), Reply::fail(1, "Error: No such container: abc123")],
            )
            .on_sequence(
                "rm -f -v abc123",
                [Reply::ok("abc123"), Reply::fail(1, "Error: No such container: abc123")],
            );
        let (containers, registry) = manager(&runner);

        let handle = containers.create("img", &ContainerOptions::new()).unwrap();
        containers.cleanup(&handle).unwrap();
        containers.cleanup(&handle).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn hung_stop_still_forces_removal() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .on("run -d", Reply::ok("abc123"))
            .on("stop -t", Reply::Timeout);
        let (containers, registry) = manager(&runner);

        containers.create("img", &ContainerOptions::new()).unwrap();
        let report = registry.teardown();

        assert!(report.is_clean(), "{:?}", report.failures);
        assert_eq!(runner.count("rm -f -v abc123"), 1);
    }

    #[test]
    fn failed_removal_stays_registered() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .on("run -d", Reply::ok("abc123"))
            .on("rm -f -v abc123", Reply::fail(1, "device or resource busy"));
        let (containers, registry) = manager(&runner);

        let handle = containers.create("img", &ContainerOptions::new()).unwrap();
        assert!(containers.cleanup(&handle).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn invalid_probe_pattern_fails_before_run() {
        let runner = Arc::new(ScriptedRunner::new());
        let (containers, registry) = manager(&runner);

        let options = ContainerOptions::new().probe(Probe::http(8080, "/").expecting_body("(unclosed"));
        let err = containers.create("img", &options).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert!(runner.calls().is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn login_sends_the_password_on_stdin() {
        let runner = Arc::new(ScriptedRunner::new());
        let (containers, _registry) = manager(&runner);

        containers
            .login("registry.apps.ci.example", "developer", "sha256~token")
            .unwrap();
        let invocation = &runner.invocations()[0];
        assert_eq!(
            invocation.command_line(),
            "docker login -u developer --password-stdin registry.apps.ci.example"
        );
        assert_eq!(invocation.stdin.as_deref(), Some("sha256~token"));
    }

    #[test]
    fn tagged_image_is_removed_on_teardown() {
        let runner = Arc::new(ScriptedRunner::new());
        let (containers, registry) = manager(&runner);

        let handle = containers
            .tag_image("quay.io/sclorg/httpd-24-c9s", "registry.ci/ns/httpd-24:2.4")
            .unwrap();
        assert_eq!(handle.kind, ResourceKind::Image);
        assert!(registry.teardown().is_clean());
        assert_eq!(runner.count("rmi registry.ci/ns/httpd-24:2.4"), 1);
    }

    #[test]
    fn pull_retries_transient_failures() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .on_sequence(
                "image inspect quay.io/x",
                [
                    Reply::fail(1, "Error: No such image: quay.io/x"),
                    Reply::fail(1, "Error: No such image: quay.io/x"),
                    Reply::ok(r#"[{"Id": "sha256:1"}]"#),
                ],
            )
            .on_sequence(
                "pull quay.io/x",
                [Reply::fail(1, "net/http: TLS handshake timeout"), Reply::ok("")],
            );
        let (containers, _registry) = manager(&runner);

        let image = containers.pull_image("quay.io/x").unwrap();
        assert_eq!(image.id, "sha256:1");
        assert_eq!(runner.count("pull quay.io/x"), 3);
    }

    #[test]
    fn image_exists_maps_missing_to_false() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on("image inspect nope", Reply::fail(1, "Error: No such image: nope"));
        let (containers, _registry) = manager(&runner);

        assert!(!containers.image_exists("nope").unwrap());
        assert!(matches!(
            containers.inspect_image("nope"),
            Err(Error::NotFound { kind: ResourceKind::Image, .. })
        ));
    }

    #[test]
    fn ip_address_falls_back_to_network_list() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .on("--format", Reply::ok("\n"))
            .on(
                "inspect abc123",
                Reply::ok(
                    r#"[{"State": {"Running": true},
                         "NetworkSettings": {"IPAddress": "", "Networks": {"ci": {"IPAddress": "10.88.0.4"}}}}]"#,
                ),
            );
        let (containers, _registry) = manager(&runner);

        let handle = ResourceHandle::new(ResourceKind::Container, "abc123");
        let ip = containers.ip_address(&handle).unwrap();
        assert_eq!(ip.map(|ip| ip.to_string()).as_deref(), Some("10.88.0.4"));
    }

    #[test]
    fn run_once_forgets_the_container_after_it_exits() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on("run --rm", Reply::ok("Python 3.11.7\n"));
        let (containers, registry) = manager(&runner);

        let result = containers
            .run_once("img", &ContainerOptions::new().command(["python3", "--version"]))
            .unwrap();
        assert_eq!(result.stdout_trimmed(), "Python 3.11.7");
        assert!(registry.is_empty());
    }
}
