//! Readiness probes
//!
//! A probe answers "is it serving yet". A negative answer is a normal
//! outcome fed back into polling, never an error.

use std::net::{IpAddr, SocketAddr, TcpStream};
use std::time::Duration;

use imagetest_common::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Per-request timeout for HTTP and TCP probes
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// How to decide a workload is ready
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Probe {
    /// GET against the container address
    Http {
        port: u16,
        path: String,
        expected_status: u16,
        /// Regular expression the response body must match
        expected_body: Option<String>,
    },
    /// Command run inside the container; exit 0 means ready
    Command(Vec<String>),
    /// TCP connect to the container address
    Tcp { port: u16 },
}

impl Probe {
    pub fn http(port: u16, path: impl Into<String>) -> Self {
        Probe::Http {
            port,
            path: path.into(),
            expected_status: 200,
            expected_body: None,
        }
    }

    pub fn command<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Probe::Command(argv.into_iter().map(Into::into).collect())
    }

    pub fn tcp(port: u16) -> Self {
        Probe::Tcp { port }
    }

    /// Require the body to match a regular expression (HTTP probes only)
    pub fn expecting_body(mut self, body: impl Into<String>) -> Self {
        if let Probe::Http { expected_body, .. } = &mut self {
            *expected_body = Some(body.into());
        }
        self
    }

    /// Require a status code other than 200 (HTTP probes only)
    pub fn expecting_status(mut self, status: u16) -> Self {
        if let Probe::Http {
            expected_status, ..
        } = &mut self
        {
            *expected_status = status;
        }
        self
    }

    /// Reject a body pattern that is not a valid regular expression
    pub fn validate(&self) -> Result<()> {
        if let Probe::Http {
            expected_body: Some(pattern),
            ..
        } = self
        {
            Regex::new(pattern)
                .map_err(|e| Error::InvalidConfig(format!("probe body pattern {pattern:?}: {e}")))?;
        }
        Ok(())
    }
}

impl std::fmt::Display for Probe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Probe::Http {
                port,
                path,
                expected_status,
                ..
            } => write!(f, "GET :{port}{path} -> {expected_status}"),
            Probe::Command(argv) => write!(f, "exec {}", argv.join(" ")),
            Probe::Tcp { port } => write!(f, "tcp :{port}"),
        }
    }
}

/// Result of one probe attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub passed: bool,
    pub detail: String,
}

impl ProbeResult {
    pub fn passed(detail: impl Into<String>) -> Self {
        Self {
            passed: true,
            detail: detail.into(),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            passed: false,
            detail: detail.into(),
        }
    }
}

/// URL for `path` on `ip:port`, bracketing IPv6 addresses
pub fn url_for(ip: IpAddr, port: u16, path: &str) -> String {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    format!("http://{}{}", SocketAddr::new(ip, port), path)
}

/// GET `url` and compare status and body
pub fn check_url(url: &str, expected_status: u16, expected_body: Option<&str>) -> ProbeResult {
    debug!("Probing {}", url);
    let client = match reqwest::blocking::Client::builder()
        .timeout(PROBE_TIMEOUT)
        .danger_accept_invalid_certs(true)
        .build()
    {
        Ok(client) => client,
        Err(e) => return ProbeResult::failed(format!("cannot build HTTP client: {e}")),
    };

    let response = match client.get(url).send() {
        Ok(response) => response,
        Err(e) => return ProbeResult::failed(format!("{url}: {e}")),
    };

    let status = response.status().as_u16();
    if status != expected_status {
        return ProbeResult::failed(format!(
            "{url}: status {status}, expected {expected_status}"
        ));
    }

    match expected_body {
        None => ProbeResult::passed(format!("{url}: status {status}")),
        Some(pattern) => match response.text() {
            Ok(body) => match_body(url, &body, pattern),
            Err(e) => ProbeResult::failed(format!("{url}: cannot read body: {e}")),
        },
    }
}

/// Match a response body against `pattern`, a regular expression
pub fn match_body(source: &str, body: &str, pattern: &str) -> ProbeResult {
    match Regex::new(pattern) {
        Ok(re) if re.is_match(body) => ProbeResult::passed(format!("{source}: body matched")),
        Ok(_) => ProbeResult::failed(format!("{source}: body does not match {pattern:?}")),
        Err(e) => ProbeResult::failed(format!("{source}: invalid body pattern: {e}")),
    }
}

/// Open and close a TCP connection
pub fn check_tcp(ip: IpAddr, port: u16) -> ProbeResult {
    let addr = SocketAddr::new(ip, port);
    match TcpStream::connect_timeout(&addr, PROBE_TIMEOUT) {
        Ok(_) => ProbeResult::passed(format!("{addr} accepts connections")),
        Err(e) => ProbeResult::failed(format!("{addr}: {e}")),
    }
}
