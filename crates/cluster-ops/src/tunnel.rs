//! Ingress tunnel status and DNS routing.
//!
//! The tunnel client offers no structured status endpoint we can rely on, so
//! [`LogScrapeTunnelStatus`] classifies log lines. That heuristic lives here
//! and nowhere else; callers only see [`TunnelStatus`].

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::command::{CommandRunner, Invocation, ToolError};
use crate::kubectl::Kubectl;

/// Suffix of the CNAME target a tunnel-routed hostname points at.
pub const TUNNEL_CNAME_SUFFIX: &str = ".cfargotunnel.com";

// cloudflared: "Registered tunnel connection connIndex=0 connection=... location=ams01"
// older builds: "Connection 1a2b registered connIndex=0"
static REGISTERED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(registered tunnel connection|connection \S+ registered)").unwrap()
});
static CONN_INDEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"connIndex=(\d+)").unwrap());
static AUTH_FAILURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bERR\b.*(unauthorized|invalid tunnel secret|tunnel not found|authentication)")
        .unwrap()
});

/// Connection state of the tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TunnelStatus {
    ConnectionEstablished { connections: usize },
    NotYetConnected { detail: String },
    Error { detail: String },
}

/// Anything that can report tunnel connection state.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait TunnelStatusSource {
    /// Current connection state.
    ///
    /// # Errors
    ///
    /// Returns an error when the status cannot be queried at all.
    fn connection_status(&self) -> Result<TunnelStatus, ToolError>;
}

/// Reads the tunnel deployment log through kubectl.
pub struct LogScrapeTunnelStatus<'a> {
    kubectl: Kubectl<'a>,
    namespace: String,
    selector: String,
    lines: u32,
}

impl<'a> LogScrapeTunnelStatus<'a> {
    #[must_use]
    pub fn new(
        runner: &'a dyn CommandRunner,
        kubeconfig: Option<&Path>,
        namespace: impl Into<String>,
        selector: impl Into<String>,
        lines: u32,
    ) -> Self {
        Self {
            kubectl: Kubectl::new(runner, kubeconfig),
            namespace: namespace.into(),
            selector: selector.into(),
            lines,
        }
    }
}

impl TunnelStatusSource for LogScrapeTunnelStatus<'_> {
    fn connection_status(&self) -> Result<TunnelStatus, ToolError> {
        let logs = self
            .kubectl
            .logs_tail(&self.namespace, &self.selector, self.lines)?;
        Ok(classify_log(&logs))
    }
}

/// Classify a log tail.
#[must_use]
pub fn classify_log(logs: &str) -> TunnelStatus {
    let mut indices = BTreeSet::new();
    let mut registered_lines = 0usize;
    let mut last_error = None;

    for line in logs.lines() {
        if REGISTERED.is_match(line) {
            registered_lines += 1;
            if let Some(caps) = CONN_INDEX.captures(line) {
                indices.insert(caps[1].to_string());
            }
        } else if AUTH_FAILURE.is_match(line) {
            last_error = Some(line.trim().to_string());
        }
    }

    if registered_lines > 0 {
        let connections = if indices.is_empty() {
            registered_lines
        } else {
            indices.len()
        };
        TunnelStatus::ConnectionEstablished { connections }
    } else if let Some(detail) = last_error {
        TunnelStatus::Error { detail }
    } else {
        let detail = logs
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("no tunnel log output yet")
            .trim()
            .to_string();
        TunnelStatus::NotYetConnected { detail }
    }
}

/// Where a public hostname's DNS points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "routing", content = "target", rename_all = "snake_case")]
pub enum DnsRouting {
    Tunnel(String),
    Other(String),
    Missing,
}

/// Resolve the CNAME of a hostname with `dig`.
///
/// # Errors
///
/// Returns an error if dig cannot be started.
pub fn dns_cname(runner: &dyn CommandRunner, host: &str) -> Result<DnsRouting, ToolError> {
    let out = runner.run(&Invocation::new("dig").args(["+short", "CNAME", host]))?;
    let target = out
        .stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|l| l.trim_end_matches('.').to_string());
    debug!(host, ?target, "CNAME lookup");

    Ok(match target {
        Some(t) if t.ends_with(TUNNEL_CNAME_SUFFIX) => DnsRouting::Tunnel(t),
        Some(t) => DnsRouting::Other(t),
        None => DnsRouting::Missing,
    })
}
