//! Cleanup registry
//!
//! Every resource the harness creates is registered here, together with the
//! closure that releases it, before anything else can fail. Teardown drains
//! the registry in reverse creation order and keeps going past individual
//! failures.

use std::panic::{self, AssertUnwindSafe};

use imagetest_common::{Error, ResourceHandle, Result};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

type Release = Box<dyn FnOnce() -> Result<()> + Send>;

struct Obligation {
    handle: ResourceHandle,
    release: Release,
}

/// Ordered release obligations for one session
#[derive(Default)]
pub struct CleanupRegistry {
    obligations: Mutex<Vec<Obligation>>,
}

/// What teardown managed to release
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub released: Vec<ResourceHandle>,
    pub failures: Vec<(ResourceHandle, String)>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn into_result(self) -> Result<()> {
        if self.is_clean() {
            Ok(())
        } else {
            Err(Error::Cleanup {
                failures: self
                    .failures
                    .into_iter()
                    .map(|(handle, reason)| format!("{handle}: {reason}"))
                    .collect(),
            })
        }
    }
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a release obligation for a freshly created resource
    pub fn register<F>(&self, handle: ResourceHandle, release: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        debug!("Registered {} for cleanup", handle);
        self.obligations.lock().push(Obligation {
            handle,
            release: Box::new(release),
        });
    }

    /// Drop the obligation for a resource that was released explicitly.
    ///
    /// Returns false when nothing was registered for it.
    pub fn forget(&self, handle: &ResourceHandle) -> bool {
        let mut obligations = self.obligations.lock();
        match obligations.iter().rposition(|o| o.handle.same_resource(handle)) {
            Some(index) => {
                obligations.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, handle: &ResourceHandle) -> bool {
        self.obligations
            .lock()
            .iter()
            .any(|o| o.handle.same_resource(handle))
    }

    /// Registered handles in creation order
    pub fn handles(&self) -> Vec<ResourceHandle> {
        self.obligations.lock().iter().map(|o| o.handle.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.obligations.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.obligations.lock().is_empty()
    }

    /// Release everything, newest first. The registry is empty afterwards
    /// whatever the individual outcomes.
    pub fn teardown(&self) -> TeardownReport {
        let obligations = std::mem::take(&mut *self.obligations.lock());
        let mut report = TeardownReport::default();
        if obligations.is_empty() {
            return report;
        }

        info!("Tearing down {} resource(s)", obligations.len());
        for Obligation { handle, release } in obligations.into_iter().rev() {
            match panic::catch_unwind(AssertUnwindSafe(release)) {
                Ok(Ok(())) => {
                    debug!("Released {}", handle);
                    report.released.push(handle);
                }
                Ok(Err(e)) => {
                    warn!("Failed to release {}: {}", handle, e);
                    report.failures.push((handle, e.to_string()));
                }
                Err(_) => {
                    warn!("Release of {} panicked", handle);
                    report.failures.push((handle, "release panicked".to_string()));
                }
            }
        }
        report
    }
}

impl std::fmt::Debug for CleanupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupRegistry")
            .field("handles", &self.handles())
            .finish()
    }
}

impl Drop for CleanupRegistry {
    fn drop(&mut self) {
        if !self.obligations.get_mut().is_empty() {
            let report = self.teardown();
            if !report.is_clean() {
                warn!(
                    "{} resource(s) could not be released on drop",
                    report.failures.len()
                );
            }
        }
    }
}
