//! Scripted command runner for tests
//!
//! Replies are matched by substring against the full command line, first
//! rule first. A rule with several replies hands them out in order and then
//! keeps repeating the last one. Commands no rule matches succeed with empty
//! output. Every invocation is recorded.

use std::time::Duration;

use imagetest_common::{Error, HarnessConfig, PollPolicy, Result};
use parking_lot::Mutex;

use crate::exec::{CommandResult, CommandRunner, Invocation};

/// One scripted answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Output {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
    Timeout,
    LaunchFailure,
}

impl Reply {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Reply::Output {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn fail(exit_code: i32, stderr: impl Into<String>) -> Self {
        Reply::Output {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

struct Rule {
    pattern: String,
    replies: Vec<Reply>,
    served: usize,
}

impl Rule {
    fn next(&mut self) -> Reply {
        let index = self.served.min(self.replies.len() - 1);
        self.served += 1;
        self.replies[index].clone()
    }
}

#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands containing `pattern` with `reply`.
    ///
    /// Calling this again with the same pattern queues another reply.
    pub fn on(&self, pattern: &str, reply: Reply) -> &Self {
        let mut rules = self.rules.lock();
        match rules.iter_mut().find(|r| r.pattern == pattern) {
            Some(rule) => rule.replies.push(reply),
            None => rules.push(Rule {
                pattern: pattern.to_string(),
                replies: vec![reply],
                served: 0,
            }),
        }
        self
    }

    pub fn on_sequence<I>(&self, pattern: &str, replies: I) -> &Self
    where
        I: IntoIterator<Item = Reply>,
    {
        for reply in replies {
            self.on(pattern, reply);
        }
        self
    }

    /// Command lines run so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().iter().map(Invocation::command_line).collect()
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.calls.lock().clone()
    }

    /// How many command lines contained `pattern`
    pub fn count(&self, pattern: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(pattern)).count()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandResult> {
        let command_line = invocation.command_line();
        self.calls.lock().push(invocation.clone());

        let reply = self
            .rules
            .lock()
            .iter_mut()
            .find(|rule| command_line.contains(&rule.pattern))
            .map(Rule::next)
            .unwrap_or_else(|| Reply::ok(""));

        match reply {
            Reply::Output {
                exit_code,
                stdout,
                stderr,
            } => Ok(CommandResult {
                program: invocation.program.clone(),
                args: invocation.args.clone(),
                exit_code,
                stdout,
                stderr,
                duration: Duration::from_millis(1),
            }),
            Reply::Timeout => Err(Error::TimeoutExceeded {
                command: command_line,
                timeout: invocation.timeout.unwrap_or_default(),
            }),
            Reply::LaunchFailure => Err(Error::LaunchFailed {
                program: invocation.program.clone(),
                reason: "No such file or directory (os error 2)".to_string(),
            }),
        }
    }
}

/// Defaults with every wait shortened to a 10ms interval and 1s deadline
pub fn fast_config() -> HarnessConfig {
    let quick = PollPolicy::new(10, 1);
    let mut config = HarnessConfig::default();
    let polling = &mut config.polling;
    polling.container_running = quick;
    polling.container_ready = quick;
    polling.creation_failure = quick;
    polling.image_pull = quick;
    polling.pod_ready = quick;
    polling.build_complete = quick;
    polling.image_stream_tag = quick;
    polling.deployment_ready = quick;
    polling.route_response = quick;
    config
}
