//! Command execution adapter
//!
//! Runs one external program per call with discrete arguments (no shell),
//! captures stdout/stderr, and normalizes the outcome into a
//! [`CommandResult`]. A non-zero exit is a normal result, not an error; only
//! a program that cannot be started or one that outlives its timeout is.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use imagetest_common::{Error, Result};
use tracing::{debug, warn};

/// How often a running child is checked for exit
const WAIT_STEP: Duration = Duration::from_millis(10);

/// Time between SIGTERM and SIGKILL for a timed-out child
const KILL_GRACE: Duration = Duration::from_millis(500);

/// One external program invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Option<Duration>,
    pub current_dir: Option<PathBuf>,
    /// Written to the child's stdin, which is then closed
    pub stdin: Option<String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
            current_dir: None,
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Human-readable command line, for logs and error messages
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Normalized outcome of one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub program: String,
    pub args: Vec<String>,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }

    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Turn a non-zero exit into [`Error::CommandFailed`]
    pub fn ensure_success(self) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            let stderr = if self.stderr.trim().is_empty() {
                self.stdout.trim().to_string()
            } else {
                self.stderr.trim().to_string()
            };
            Err(Error::CommandFailed {
                command: self.command_line(),
                exit_code: self.exit_code,
                stderr,
            })
        }
    }
}

/// Executes invocations.
///
/// Managers hold a shared runner so tests can substitute a scripted one.
pub trait CommandRunner: Send + Sync {
    fn run(&self, invocation: &Invocation) -> Result<CommandResult>;
}

/// Runs invocations as real subprocesses
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandResult> {
        let command_line = invocation.command_line();
        debug!("Executing: {}", command_line);

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &invocation.current_dir {
            cmd.current_dir(dir);
        }

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|e| Error::LaunchFailed {
            program: invocation.program.clone(),
            reason: e.to_string(),
        })?;

        if let (Some(mut pipe), Some(input)) = (child.stdin.take(), invocation.stdin.clone()) {
            // a child that never reads must not block the timeout
            thread::spawn(move || {
                let _ = pipe.write_all(input.as_bytes());
            });
        }
        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);

        let status = match wait_with_deadline(&mut child, invocation.timeout)? {
            Some(status) => status,
            None => {
                // Readers finish once the killed child's pipes close
                let _ = join_reader(stdout_reader);
                let _ = join_reader(stderr_reader);
                let timeout = invocation.timeout.unwrap_or_default();
                warn!("Command timed out after {:?}: {}", timeout, command_line);
                return Err(Error::TimeoutExceeded {
                    command: command_line,
                    timeout,
                });
            }
        };

        let result = CommandResult {
            program: invocation.program.clone(),
            args: invocation.args.clone(),
            exit_code: exit_code(status),
            stdout: join_reader(stdout_reader),
            stderr: join_reader(stderr_reader),
            duration: start.elapsed(),
        };

        debug!(
            "Finished with exit code {} in {:?}: {}",
            result.exit_code, result.duration, command_line
        );
        Ok(result)
    }
}

/// Wait for the child, terminating it if the deadline passes.
///
/// Returns `None` when the child had to be terminated.
fn wait_with_deadline(child: &mut Child, timeout: Option<Duration>) -> Result<Option<ExitStatus>> {
    let Some(timeout) = timeout else {
        return Ok(Some(child.wait()?));
    };

    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if start.elapsed() >= timeout {
            terminate(child);
            return Ok(None);
        }
        thread::sleep(WAIT_STEP);
    }
}

/// Ask politely, then kill, then reap
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let pid = Pid::from_raw(child.id() as i32);
        if kill(pid, Signal::SIGTERM).is_ok() {
            let start = Instant::now();
            while start.elapsed() < KILL_GRACE {
                if let Ok(Some(_)) = child.try_wait() {
                    return;
                }
                thread::sleep(WAIT_STEP);
            }
        }
    }

    let _ = child.kill();
    let _ = child.wait();
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_reader(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}
