//! Mesh VPN status through `tailscale status --json`.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::command::{run_checked, CommandRunner, Invocation, ToolError};

const TAILSCALE: &str = "tailscale";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawStatus {
    #[serde(default)]
    backend_state: String,
    #[serde(rename = "Self")]
    self_node: Option<RawPeer>,
    #[serde(default)]
    peer: BTreeMap<String, RawPeer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawPeer {
    #[serde(default)]
    host_name: String,
    #[serde(rename = "DNSName", default)]
    dns_name: String,
    #[serde(rename = "TailscaleIPs", default)]
    tailscale_ips: Vec<String>,
    #[serde(default)]
    online: bool,
}

/// A machine visible on the mesh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MeshPeer {
    pub host_name: String,
    pub dns_name: String,
    pub ips: Vec<String>,
    pub online: bool,
}

impl MeshPeer {
    fn from_raw(raw: RawPeer) -> Self {
        Self {
            host_name: raw.host_name,
            dns_name: raw.dns_name.trim_end_matches('.').to_string(),
            ips: raw.tailscale_ips,
            online: raw.online,
        }
    }

    /// Matches on host name or the first label of the DNS name.
    #[must_use]
    pub fn matches(&self, host: &str) -> bool {
        self.host_name.eq_ignore_ascii_case(host)
            || self
                .dns_name
                .split('.')
                .next()
                .is_some_and(|label| label.eq_ignore_ascii_case(host))
    }

    /// First IPv4 mesh address.
    #[must_use]
    pub fn ipv4(&self) -> Option<&str> {
        self.ips
            .iter()
            .map(String::as_str)
            .find(|ip| ip.parse::<Ipv4Addr>().is_ok())
    }
}

/// Local view of the mesh.
#[derive(Debug, Clone, Serialize)]
pub struct MeshStatus {
    pub backend_state: String,
    pub self_node: Option<MeshPeer>,
    pub peers: Vec<MeshPeer>,
}

impl MeshStatus {
    /// Parse `tailscale status --json` output.
    ///
    /// # Errors
    ///
    /// Returns `ToolError::Parse` on malformed JSON.
    pub fn parse(json: &str) -> Result<Self, ToolError> {
        let raw: RawStatus =
            serde_json::from_str(json).map_err(|e| ToolError::parse("tailscale status", e))?;
        Ok(Self {
            backend_state: raw.backend_state,
            self_node: raw.self_node.map(MeshPeer::from_raw),
            peers: raw.peer.into_values().map(MeshPeer::from_raw).collect(),
        })
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.backend_state == "Running"
    }

    /// Find a machine (self included) by name.
    #[must_use]
    pub fn find(&self, host: &str) -> Option<&MeshPeer> {
        self.self_node
            .iter()
            .chain(self.peers.iter())
            .find(|p| p.matches(host))
    }

    /// Mesh IPv4 address of a host that is currently online.
    #[must_use]
    pub fn address_of(&self, host: &str) -> Option<&str> {
        self.find(host).filter(|p| p.online).and_then(MeshPeer::ipv4)
    }
}

/// Query the local mesh client.
///
/// # Errors
///
/// Returns an error if tailscale is not running or emits bad JSON.
pub fn status(runner: &dyn CommandRunner) -> Result<MeshStatus, ToolError> {
    let out = run_checked(runner, &Invocation::new(TAILSCALE).args(["status", "--json"]))?;
    MeshStatus::parse(&out.stdout)
}

/// Whether an address lies in the mesh CGNAT range `100.64.0.0/10`.
#[must_use]
pub fn is_mesh_address(addr: &str) -> bool {
    addr.parse::<Ipv4Addr>().is_ok_and(|ip| {
        let [a, b, ..] = ip.octets();
        a == 100 && (64..128).contains(&b)
    })
}
