//! imagetest CLI
//!
//! Command-line front end over the lifecycle harness: one-shot container
//! checks, OpenShift waits, chart packaging and image stream checks.

pub mod commands;
pub mod output;

use imagetest_common::Error;

/// A check ran and did not pass
pub const EXIT_CHECK_FAILED: u8 = 1;
/// The command line or configuration is unusable
pub const EXIT_USAGE: u8 = 2;

/// Map an error to the process exit code
pub fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<Error>() {
        Some(Error::InvalidConfig(_) | Error::ConfigParse(_) | Error::ConfigWrite(_)) => EXIT_USAGE,
        _ => EXIT_CHECK_FAILED,
    }
}
