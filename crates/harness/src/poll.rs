//! Poll-until engine
//!
//! Repeatedly runs an action that produces a state until a predicate holds,
//! a deadline passes, or the state (or the error) says success is no longer
//! possible. The first attempt is immediate and the loop never sleeps past
//! the deadline.

use std::fmt::Debug;
use std::thread;
use std::time::{Duration, Instant};

use imagetest_common::{Error, PollPolicy, Result};
use tracing::{debug, info, warn};

/// Terminal result of one polling loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<S> {
    /// The predicate held for this state
    Satisfied(S),
    /// The deadline passed; carries the last state observed, if any
    TimedOut { last: Option<S>, elapsed: Duration },
    /// A terminal state or a non-retryable error was observed
    Failed(String),
}

impl<S: Debug> PollOutcome<S> {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, PollOutcome::Satisfied(_))
    }

    /// Map the outcome onto the error taxonomy
    pub fn into_result(self, what: &str) -> Result<S> {
        match self {
            PollOutcome::Satisfied(state) => Ok(state),
            PollOutcome::TimedOut { last, elapsed } => Err(Error::PollTimedOut {
                what: what.to_string(),
                elapsed,
                last_state: match last {
                    Some(state) => format!("{state:?}"),
                    None => "none observed".to_string(),
                },
            }),
            PollOutcome::Failed(reason) => Err(Error::TerminalState {
                what: what.to_string(),
                reason,
            }),
        }
    }
}

/// Interval, deadline and error tolerance for one wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poller {
    interval: Duration,
    deadline: Duration,
    max_extraction_errors: u32,
}

impl Poller {
    pub fn new(interval: Duration, deadline: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(Error::InvalidConfig("poll interval must be positive".to_string()));
        }
        if deadline.is_zero() {
            return Err(Error::InvalidConfig("poll deadline must be positive".to_string()));
        }
        Ok(Self {
            interval,
            deadline,
            max_extraction_errors: 3,
        })
    }

    pub fn from_policy(policy: &PollPolicy) -> Result<Self> {
        Ok(Self::new(policy.interval(), policy.deadline())?
            .with_max_extraction_errors(policy.max_extraction_errors))
    }

    /// Back-to-back extraction failures tolerated before the loop fails
    pub fn with_max_extraction_errors(mut self, max: u32) -> Self {
        self.max_extraction_errors = max;
        self
    }

    /// Same policy with a different deadline, keeping the interval
    pub fn with_deadline(mut self, deadline: Duration) -> Result<Self> {
        if deadline.is_zero() {
            return Err(Error::InvalidConfig("poll deadline must be positive".to_string()));
        }
        self.deadline = deadline;
        Ok(self)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Poll until `predicate` holds or the deadline passes
    pub fn poll_until<S, A, P>(&self, what: &str, action: A, predicate: P) -> PollOutcome<S>
    where
        S: Debug,
        A: FnMut() -> Result<S>,
        P: Fn(&S) -> bool,
    {
        self.poll_until_or_fail(what, action, predicate, |_| None)
    }

    /// Poll until `predicate` holds, stopping early when `terminal` names a
    /// reason the state can never satisfy it.
    pub fn poll_until_or_fail<S, A, P, T>(
        &self,
        what: &str,
        mut action: A,
        predicate: P,
        terminal: T,
    ) -> PollOutcome<S>
    where
        S: Debug,
        A: FnMut() -> Result<S>,
        P: Fn(&S) -> bool,
        T: Fn(&S) -> Option<String>,
    {
        info!(
            "Waiting for {} (interval {:?}, deadline {:?})",
            what, self.interval, self.deadline
        );

        let start = Instant::now();
        let mut last: Option<S> = None;
        let mut extraction_streak = 0u32;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match action() {
                Ok(state) => {
                    extraction_streak = 0;
                    if predicate(&state) {
                        info!("{} satisfied after {:?}", what, start.elapsed());
                        return PollOutcome::Satisfied(state);
                    }
                    if let Some(reason) = terminal(&state) {
                        warn!("{} reached a terminal state: {}", what, reason);
                        return PollOutcome::Failed(reason);
                    }
                    debug!("Attempt {} for {}: {:?}", attempt, what, state);
                    last = Some(state);
                }
                Err(e) if e.is_extraction() => {
                    extraction_streak += 1;
                    if extraction_streak > self.max_extraction_errors {
                        warn!("Giving up on {}: {}", what, e);
                        return PollOutcome::Failed(format!(
                            "{e} ({extraction_streak} consecutive extraction failures)"
                        ));
                    }
                    warn!("Attempt {} for {} could not be read: {}", attempt, what, e);
                }
                Err(e) if e.is_transient() => {
                    warn!("Attempt {} for {} failed, retrying: {}", attempt, what, e);
                }
                Err(e) => {
                    warn!("Giving up on {}: {}", what, e);
                    return PollOutcome::Failed(e.to_string());
                }
            }

            let elapsed = start.elapsed();
            if elapsed >= self.deadline {
                break;
            }
            thread::sleep(self.interval.min(self.deadline - elapsed));
            if start.elapsed() >= self.deadline {
                break;
            }
        }

        let elapsed = start.elapsed();
        warn!("Timed out after {:?} waiting for {}", elapsed, what);
        PollOutcome::TimedOut { last, elapsed }
    }
}
