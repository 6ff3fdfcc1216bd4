//! Host registry reader.
//!
//! Parses the INI-style inventory shared with the configuration-management
//! tool:
//!
//! ```text
//! [control-plane]
//! home-cp ansible_host=192.168.1.10 ansible_user=pi
//!
//! [workers]
//! vps-1 ansible_host=203.0.113.7 taint=true
//!
//! [all:vars]
//! ansible_user=ubuntu
//! ```
//!
//! The registry is re-read on every call site and never cached across phases,
//! because the mesh phase rewrites addresses mid-run and operators edit the
//! file by hand.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{ProvisionError, ProvisionResult};

/// Attribute keys that carry a connection address, in lookup order.
pub const ADDRESS_KEYS: &[&str] = &["ansible_host", "addr", "address"];
/// Attribute keys that carry a login identity, in lookup order.
pub const IDENTITY_KEYS: &[&str] = &["ansible_user", "user"];

/// Interchangeable group names.
const GROUP_ALIASES: &[&[&str]] = &[
    &["control-plane", "control_plane", "masters"],
    &["worker", "workers", "nodes"],
    &["load-balancer", "load_balancer", "lb"],
];

const MAX_CHILD_DEPTH: usize = 8;

/// Canonical name of the control-plane group.
pub const CONTROL_PLANE: &str = "control-plane";
/// Canonical name of the worker group.
pub const WORKERS: &str = "workers";

/// Where a host's connection address came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", content = "key", rename_all = "snake_case")]
pub enum AddressSource {
    Attribute(String),
    LogicalName,
}

/// Where a host's login identity came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", content = "section", rename_all = "snake_case")]
pub enum IdentitySource {
    HostAttribute,
    GroupDefault(String),
    Operator,
}

impl fmt::Display for AddressSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attribute(key) => write!(f, "{key}="),
            Self::LogicalName => write!(f, "logical name"),
        }
    }
}

impl fmt::Display for IdentitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HostAttribute => write!(f, "host attribute"),
            Self::GroupDefault(section) => write!(f, "[{section}]"),
            Self::Operator => write!(f, "operator"),
        }
    }
}

/// One resolved machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostRecord {
    pub name: String,
    pub address: String,
    pub identity: String,
    pub address_source: AddressSource,
    pub identity_source: IdentitySource,
    /// Every `key=value` on the host line, passed through untouched.
    pub attributes: BTreeMap<String, String>,
}

impl HostRecord {
    /// Attribute key that holds (or should hold) the address.
    #[must_use]
    pub fn address_key(&self) -> &str {
        match self.address_source {
            AddressSource::Attribute(ref key) => key,
            AddressSource::LogicalName => ADDRESS_KEYS[0],
        }
    }

    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone)]
struct HostLine {
    name: String,
    attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
struct Section {
    hosts: Vec<HostLine>,
    children: Vec<String>,
}

/// Parsed view of the inventory file.
#[derive(Debug, Clone)]
pub struct HostRegistry {
    path: PathBuf,
    /// Host sections in file order.
    sections: Vec<(String, Section)>,
    /// First group-wide identity in the file, with the section it came from.
    group_identity: Option<(String, String)>,
}

impl HostRegistry {
    /// Read and parse the registry file.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file does not exist.
    pub fn load(path: &Path) -> ProvisionResult<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProvisionError::configuration(
                    format!("host registry {} does not exist", path.display()),
                    "Run `hybrid secrets` to create it from templates/hosts.ini.example, then fill in your hosts",
                ));
            }
            Err(e) => return Err(ProvisionError::io(path, e)),
        };
        Ok(Self::parse(path, &content))
    }

    /// Parse registry text. Malformed lines are skipped with a debug log.
    #[must_use]
    pub fn parse(path: &Path, content: &str) -> Self {
        let mut sections: Vec<(String, Section)> = Vec::new();
        let mut group_identity = None;
        let mut current: Option<(String, SectionKind)> = None;

        for (lineno, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(header) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let (name, kind) = match header.split_once(':') {
                    Some((name, "vars")) => (name, SectionKind::Vars),
                    Some((name, "children")) => (name, SectionKind::Children),
                    Some((name, other)) => {
                        debug!(line = lineno + 1, section = %header, "Unknown section suffix {other}");
                        (name, SectionKind::Ignored)
                    }
                    None => (header, SectionKind::Hosts),
                };
                let name = name.trim().to_string();
                if !sections.iter().any(|(n, _)| *n == name) {
                    sections.push((name.clone(), Section::default()));
                }
                current = Some((name, kind));
                continue;
            }

            let Some((ref name, kind)) = current else {
                debug!(line = lineno + 1, "Host line outside any section, ignored");
                continue;
            };
            let Some(section) = sections
                .iter_mut()
                .find(|(n, _)| n.as_str() == name.as_str())
                .map(|(_, s)| s)
            else {
                continue;
            };

            match kind {
                SectionKind::Hosts => {
                    let mut tokens = line.split_whitespace();
                    let Some(host) = tokens.next() else { continue };
                    let attributes = tokens.filter_map(parse_pair).collect();
                    section.hosts.push(HostLine {
                        name: host.to_string(),
                        attributes,
                    });
                }
                SectionKind::Children => section.children.push(line.to_string()),
                SectionKind::Vars => {
                    if let Some((key, value)) = parse_pair(line) {
                        if group_identity.is_none() && IDENTITY_KEYS.contains(&key.as_str()) {
                            group_identity = Some((format!("{name}:vars"), value));
                        }
                    }
                }
                SectionKind::Ignored => {}
            }
        }

        Self {
            path: path.to_path_buf(),
            sections,
            group_identity,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Section names that carry hosts or children, in file order.
    #[must_use]
    pub fn groups(&self) -> Vec<&str> {
        self.sections
            .iter()
            .filter(|(_, s)| !s.hosts.is_empty() || !s.children.is_empty())
            .map(|(n, _)| n.as_str())
            .collect()
    }

    /// Every host of a group, in file order.
    ///
    /// Aliases (`workers`/`worker`/`nodes`, ...) and `:children` sections are
    /// followed.
    ///
    /// # Errors
    ///
    /// Returns `GroupNotFound` when the group resolves to zero hosts.
    pub fn resolve(&self, group: &str) -> ProvisionResult<Vec<HostRecord>> {
        for candidate in candidates(group) {
            let mut lines = Vec::new();
            self.collect(candidate, 0, &mut lines);
            if !lines.is_empty() {
                if candidate != group {
                    debug!(group, section = candidate, "Resolved group through alias");
                }
                return Ok(lines.into_iter().map(|h| self.to_record(h)).collect());
            }
        }
        Err(ProvisionError::GroupNotFound {
            group: group.to_string(),
            path: self.path.clone(),
        })
    }

    /// The authoritative single host of a group: its first entry.
    ///
    /// # Errors
    ///
    /// Returns `GroupNotFound` when the group has no hosts.
    pub fn resolve_first(&self, group: &str) -> ProvisionResult<HostRecord> {
        let mut hosts = self.resolve(group)?;
        Ok(hosts.remove(0))
    }

    /// Every host in the file, first occurrence wins.
    #[must_use]
    pub fn all_hosts(&self) -> Vec<HostRecord> {
        let mut seen = Vec::<&str>::new();
        let mut records = Vec::new();
        for (_, section) in &self.sections {
            for host in &section.hosts {
                if !seen.contains(&host.name.as_str()) {
                    seen.push(&host.name);
                    records.push(self.to_record(host));
                }
            }
        }
        records
    }

    fn collect<'a>(&'a self, group: &str, depth: usize, out: &mut Vec<&'a HostLine>) {
        if depth > MAX_CHILD_DEPTH {
            return;
        }
        let Some((_, section)) = self.sections.iter().find(|(n, _)| n.as_str() == group) else {
            return;
        };
        for host in &section.hosts {
            if !out.iter().any(|h| h.name == host.name) {
                out.push(host);
            }
        }
        for child in &section.children {
            self.collect(child, depth + 1, out);
        }
    }

    fn to_record(&self, host: &HostLine) -> HostRecord {
        let (address, address_source) = ADDRESS_KEYS
            .iter()
            .find_map(|k| {
                host.attributes
                    .get(*k)
                    .map(|v| (v.clone(), AddressSource::Attribute((*k).to_string())))
            })
            .unwrap_or_else(|| {
                info!(
                    host = %host.name,
                    "No address attribute; using the logical name as connection address"
                );
                (host.name.clone(), AddressSource::LogicalName)
            });

        let (identity, identity_source) = if let Some(user) = IDENTITY_KEYS
            .iter()
            .find_map(|k| host.attributes.get(*k))
        {
            (user.clone(), IdentitySource::HostAttribute)
        } else if let Some((ref section, ref user)) = self.group_identity {
            info!(host = %host.name, user = %user, section = %section, "Login identity taken from group vars");
            (user.clone(), IdentitySource::GroupDefault(section.clone()))
        } else {
            let user = operator_identity();
            info!(host = %host.name, user = %user, "No login identity in registry; using the operator's");
            (user, IdentitySource::Operator)
        };

        HostRecord {
            name: host.name.clone(),
            address,
            identity,
            address_source,
            identity_source,
            attributes: host.attributes.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum SectionKind {
    Hosts,
    Vars,
    Children,
    Ignored,
}

fn parse_pair(token: &str) -> Option<(String, String)> {
    let (key, value) = token.split_once('=')?;
    let value = value.trim().trim_matches('"').trim_matches('\'');
    Some((key.trim().to_string(), value.to_string()))
}

fn candidates(group: &str) -> Vec<&str> {
    let mut out = vec![group];
    if let Some(set) = GROUP_ALIASES.iter().find(|set| set.contains(&group)) {
        out.extend(set.iter().copied().filter(|g| *g != group));
    }
    out
}

/// Login name of whoever runs the pipeline.
#[must_use]
pub fn operator_identity() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .ok()
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| "root".to_string())
}

/// Set `key=value` on a host's line, rewriting the file atomically.
///
/// With `group` set only that group (or an alias of it) is touched; with
/// `None` every plain host section listing the host is updated. Comments,
/// ordering and other attributes are preserved. Returns `false` when nothing
/// needed to change and nothing was written.
///
/// # Errors
///
/// Returns `GroupNotFound` when the host is not listed where expected, or an
/// I/O error if the rewrite fails.
pub fn set_host_attribute(
    path: &Path,
    group: Option<&str>,
    host: &str,
    key: &str,
    value: &str,
) -> ProvisionResult<bool> {
    let content = std::fs::read_to_string(path).map_err(|e| ProvisionError::io(path, e))?;
    let groups = group.map(candidates);

    let mut in_group = false;
    let mut found = false;
    let mut changed = false;
    let mut out = String::with_capacity(content.len() + key.len() + value.len() + 2);

    for raw in content.split_inclusive('\n') {
        let line = raw.trim_end_matches(['\n', '\r']);
        let trimmed = line.trim();

        if let Some(header) = trimmed.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let header = header.trim();
            in_group = !header.contains(':')
                && groups.as_ref().map_or(true, |g| g.contains(&header));
        } else if in_group
            && !trimmed.starts_with('#')
            && trimmed.split_whitespace().next() == Some(host)
        {
            found = true;
            if let Some(rewritten) = rewrite_host_line(trimmed, key, value) {
                changed = true;
                out.push_str(&rewritten);
                out.push_str(&raw[line.len()..]);
                continue;
            }
        }
        out.push_str(raw);
    }

    if !found {
        return Err(ProvisionError::GroupNotFound {
            group: format!("{} (host {host})", group.unwrap_or("any")),
            path: path.to_path_buf(),
        });
    }
    if !changed {
        return Ok(false);
    }

    write_atomic(path, &out)?;
    info!(host, key, value, inventory = %path.display(), "Updated host registry");
    Ok(true)
}

/// `None` when the line already carries `key` with this value.
fn rewrite_host_line(line: &str, key: &str, value: &str) -> Option<String> {
    let mut tokens: Vec<String> = line.split_whitespace().map(str::to_string).collect();
    let new_token = format!("{key}={value}");
    match tokens
        .iter_mut()
        .skip(1)
        .find(|t| t.split_once('=').is_some_and(|(k, _)| k == key))
    {
        Some(token) => {
            if parse_pair(token).is_some_and(|(_, current)| current == value) {
                return None;
            }
            *token = new_token;
        }
        None => tokens.push(new_token),
    }
    Some(tokens.join(" "))
}

fn write_atomic(path: &Path, content: &str) -> ProvisionResult<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| ProvisionError::io(dir, e))?;
    tmp.write_all(content.as_bytes())
        .map_err(|e| ProvisionError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| ProvisionError::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const INVENTORY: &str = "\
# Hybrid cluster
[control-plane]
home-cp ansible_host=192.168.1.10 ansible_user=pi

[workers]
# public VPS
vps-1 ansible_host=203.0.113.7 taint=true
vps-2

[k3s_cluster:children]
control-plane
workers

[all:vars]
ansible_user=ubuntu
";

    fn registry(content: &str) -> HostRegistry {
        HostRegistry::parse(Path::new("hosts.ini"), content)
    }

    #[test]
    fn test_first_line_is_authoritative_and_all_keeps_order() {
        let reg = registry("[lb]\n# comment\n\nhost-a addr=10.0.0.1\nhost-b addr=10.0.0.2\n");

        let first = reg.resolve_first("lb").unwrap();
        assert_eq!(first.name, "host-a");
        assert_eq!(first.address, "10.0.0.1");

        let all = reg.resolve("lb").unwrap();
        let names: Vec<_> = all.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, ["host-a", "host-b"]);
        assert_eq!(all[1].address, "10.0.0.2");
    }

    #[test]
    fn test_identity_resolution_order() {
        let reg = registry(INVENTORY);
        let cp = reg.resolve_first("control-plane").unwrap();
        assert_eq!(cp.identity, "pi");
        assert_eq!(cp.identity_source, IdentitySource::HostAttribute);

        let workers = reg.resolve("workers").unwrap();
        assert_eq!(workers[0].identity, "ubuntu");
        assert_eq!(
            workers[0].identity_source,
            IdentitySource::GroupDefault("all:vars".into())
        );
        assert_eq!(workers[0].attribute("taint"), Some("true"));
    }

    #[test]
    fn test_address_falls_back_to_logical_name() {
        let reg = registry(INVENTORY);
        let vps2 = reg.resolve("workers").unwrap().remove(1);
        assert_eq!(vps2.address, "vps-2");
        assert_eq!(vps2.address_source, AddressSource::LogicalName);
        assert_eq!(vps2.address_key(), "ansible_host");
    }

    #[test]
    #[serial]
    fn test_identity_falls_back_to_operator() {
        let previous = std::env::var("USER").ok();
        std::env::set_var("USER", "operator-x");

        let reg = registry("[workers]\nvps-1\n");
        let host = reg.resolve_first("workers").unwrap();
        assert_eq!(host.identity, "operator-x");
        assert_eq!(host.identity_source, IdentitySource::Operator);

        match previous {
            Some(v) => std::env::set_var("USER", v),
            None => std::env::remove_var("USER"),
        }
    }

    #[test]
    fn test_missing_or_empty_group_is_an_error() {
        let reg = registry("[workers]\n# none yet\n\n[control-plane]\nhome-cp\n");
        assert!(matches!(
            reg.resolve("workers"),
            Err(ProvisionError::GroupNotFound { ref group, .. }) if group == "workers"
        ));
        assert!(reg.resolve("load-balancer").is_err());
    }

    #[test]
    fn test_aliases_and_children() {
        let reg = registry(INVENTORY);
        assert_eq!(reg.resolve("worker").unwrap().len(), 2);
        assert_eq!(reg.resolve("nodes").unwrap().len(), 2);
        assert_eq!(reg.resolve_first("masters").unwrap().name, "home-cp");

        let cluster: Vec<_> = reg
            .resolve("k3s_cluster")
            .unwrap()
            .into_iter()
            .map(|h| h.name)
            .collect();
        assert_eq!(cluster, ["home-cp", "vps-1", "vps-2"]);
        assert_eq!(reg.all_hosts().len(), 3);
        assert_eq!(reg.groups(), ["control-plane", "workers", "k3s_cluster"]);
    }

    #[test]
    fn test_load_missing_file_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = HostRegistry::load(&dir.path().join("hosts.ini")).unwrap_err();
        assert!(matches!(err, ProvisionError::Configuration { .. }));
    }

    #[test]
    fn test_set_host_attribute_rewrites_only_target_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.ini");
        std::fs::write(&path, INVENTORY).unwrap();

        assert!(set_host_attribute(&path, Some("workers"), "vps-1", "ansible_host", "100.101.1.2").unwrap());
        assert!(set_host_attribute(&path, Some("worker"), "vps-2", "ansible_host", "100.101.1.3").unwrap());
        assert!(!set_host_attribute(&path, None, "vps-1", "ansible_host", "100.101.1.2").unwrap());

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("vps-1 ansible_host=100.101.1.2 taint=true\n"));
        assert!(content.contains("vps-2 ansible_host=100.101.1.3\n"));
        assert!(content.contains("# public VPS\n"));
        assert!(content.contains("home-cp ansible_host=192.168.1.10 ansible_user=pi\n"));

        let reg = HostRegistry::load(&path).unwrap();
        assert_eq!(reg.resolve("workers").unwrap()[0].address, "100.101.1.2");
    }

    #[test]
    fn test_set_host_attribute_leaves_matching_value_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.ini");
        let content = "[workers]\n  vps-1\tansible_host=\"100.101.1.2\"   taint=true\n";
        std::fs::write(&path, content).unwrap();
        let modified = std::fs::metadata(&path).unwrap().modified().unwrap();

        assert!(!set_host_attribute(&path, Some("workers"), "vps-1", "ansible_host", "100.101.1.2").unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), content);
        assert_eq!(std::fs::metadata(&path).unwrap().modified().unwrap(), modified);
    }

    #[test]
    fn test_group_identity_accepts_short_user_key() {
        let reg = registry("[workers]\nvps-1 ansible_host=10.0.0.2\n\n[all:vars]\nuser=deploy\n");
        let host = reg.resolve_first("workers").unwrap();
        assert_eq!(host.identity, "deploy");
        assert_eq!(host.identity_source, IdentitySource::GroupDefault("all:vars".into()));
    }

    #[test]
    fn test_set_host_attribute_unknown_host() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.ini");
        std::fs::write(&path, INVENTORY).unwrap();

        let err = set_host_attribute(&path, Some("workers"), "home-cp", "ansible_host", "x").unwrap_err();
        assert!(matches!(err, ProvisionError::GroupNotFound { .. }));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), INVENTORY);
    }
}
