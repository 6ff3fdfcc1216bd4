//! Pipeline configuration.
//!
//! Loaded from an optional `hybrid.yaml` at the project root. Every field has
//! a default, so an empty or missing file describes the standard layout.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ProvisionError, ProvisionResult};

/// Default config file name, looked up in the project root.
pub const CONFIG_FILE: &str = "hybrid.yaml";

/// Token in `.sops.yaml` replaced by the real age public key.
pub const DEFAULT_AGE_PLACEHOLDER: &str = "AGE_PUBLIC_KEY_PLACEHOLDER";

/// Attempt budget for one readiness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeBudget {
    pub max_attempts: u32,
    pub interval_secs: u64,
}

impl ProbeBudget {
    #[must_use]
    pub const fn new(max_attempts: u32, interval_secs: u64) -> Self {
        Self {
            max_attempts,
            interval_secs,
        }
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Budgets for each kind of convergence wait.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Inventory hosts showing up online on the mesh.
    pub mesh_peers: ProbeBudget,
    pub node_ready: ProbeBudget,
    pub pod_ready: ProbeBudget,
    pub coredns: ProbeBudget,
    pub tunnel: ProbeBudget,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            mesh_peers: ProbeBudget::new(12, 5),
            node_ready: ProbeBudget::new(30, 10),
            pod_ready: ProbeBudget::new(30, 10),
            coredns: ProbeBudget::new(24, 5),
            tunnel: ProbeBudget::new(12, 5),
        }
    }
}

/// A playbook and how to invoke it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Host pattern passed as `--limit`.
    #[serde(default)]
    pub limit: Option<String>,
    #[serde(default)]
    pub extra_vars: BTreeMap<String, String>,
}

impl PlaybookConfig {
    fn at(path: &str) -> Self {
        Self {
            path: PathBuf::from(path),
            tags: Vec::new(),
            limit: None,
            extra_vars: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybooksConfig {
    pub mesh: PlaybookConfig,
    pub cluster: PlaybookConfig,
}

impl Default for PlaybooksConfig {
    fn default() -> Self {
        Self {
            mesh: PlaybookConfig::at("ansible/playbooks/mesh.yml"),
            cluster: PlaybookConfig::at("ansible/playbooks/cluster.yml"),
        }
    }
}

/// Ingress tunnel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    pub enabled: bool,
    pub namespace: String,
    /// Label selector of the tunnel client pods.
    pub selector: String,
    /// Public hostnames routed through the tunnel.
    pub hostnames: Vec<String>,
    pub log_lines: u32,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: "cloudflared".to_string(),
            selector: "app=cloudflared".to_string(),
            hostnames: Vec::new(),
            log_lines: 200,
        }
    }
}

/// Full pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory every relative path below resolves against.
    #[serde(skip)]
    pub project_root: PathBuf,

    // Host registry
    pub inventory: PathBuf,
    /// Holds `hosts.ini.example` and `vault.yml.example`.
    pub templates_dir: PathBuf,

    // Secrets
    pub vault_password_file: PathBuf,
    pub vault_vars_file: PathBuf,
    pub age_key_file: PathBuf,
    pub sops_config: PathBuf,
    pub age_placeholder: String,
    pub ssh_private_key: PathBuf,

    // Cluster
    pub kubeconfig: Option<PathBuf>,
    pub helmfile: PathBuf,
    pub playbooks: PlaybooksConfig,
    pub required_namespaces: Vec<String>,
    pub optional_namespaces: Vec<String>,

    pub tunnel: TunnelConfig,
    pub probe: ProbeConfig,

    /// Run journal and lock file location.
    pub state_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            inventory: PathBuf::from("ansible/inventory/hosts.ini"),
            templates_dir: PathBuf::from("templates"),
            vault_password_file: PathBuf::from(".vault_pass"),
            vault_vars_file: PathBuf::from("ansible/group_vars/all/vault.yml"),
            age_key_file: PathBuf::from("~/.config/sops/age/keys.txt"),
            sops_config: PathBuf::from(".sops.yaml"),
            age_placeholder: DEFAULT_AGE_PLACEHOLDER.to_string(),
            ssh_private_key: PathBuf::from("~/.ssh/id_ed25519"),
            kubeconfig: None,
            helmfile: PathBuf::from("helmfile.yaml"),
            playbooks: PlaybooksConfig::default(),
            required_namespaces: vec!["kube-system".to_string()],
            optional_namespaces: vec!["monitoring".to_string()],
            tunnel: TunnelConfig::default(),
            probe: ProbeConfig::default(),
            state_dir: PathBuf::from(".hybrid"),
        }
    }
}

impl PipelineConfig {
    /// Load the configuration for a project.
    ///
    /// With `explicit` set the file must exist; otherwise `hybrid.yaml` in the
    /// project root is used when present and defaults apply when it is not.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file is missing (explicit only)
    /// or is not valid YAML.
    pub fn load(project_root: &Path, explicit: Option<&Path>) -> ProvisionResult<Self> {
        let path = match explicit {
            Some(p) if p.is_absolute() => p.to_path_buf(),
            Some(p) => project_root.join(p),
            None => project_root.join(CONFIG_FILE),
        };

        let mut config = if path.exists() {
            let content =
                std::fs::read_to_string(&path).map_err(|e| ProvisionError::io(&path, e))?;
            let parsed: Self = if content.trim().is_empty() {
                Self::default()
            } else {
                serde_yaml::from_str(&content).map_err(|e| {
                    ProvisionError::configuration(
                        format!("{} is not valid: {e}", path.display()),
                        format!("Fix the YAML in {}", path.display()),
                    )
                })?
            };
            info!(config = %path.display(), "Loaded pipeline configuration");
            parsed
        } else if explicit.is_some() {
            return Err(ProvisionError::configuration(
                format!("config file {} does not exist", path.display()),
                "Pass an existing file to --config, or omit it to use defaults",
            ));
        } else {
            debug!(config = %path.display(), "No config file, using defaults");
            Self::default()
        };

        config.resolve_paths(project_root);
        Ok(config)
    }

    /// Make every path absolute (relative to the project root, `~` expanded).
    pub fn resolve_paths(&mut self, project_root: &Path) {
        let root = project_root.to_path_buf();
        let fix = |p: &mut PathBuf| *p = resolve_path(&root, p);

        fix(&mut self.inventory);
        fix(&mut self.templates_dir);
        fix(&mut self.vault_password_file);
        fix(&mut self.vault_vars_file);
        fix(&mut self.age_key_file);
        fix(&mut self.sops_config);
        fix(&mut self.ssh_private_key);
        fix(&mut self.helmfile);
        fix(&mut self.playbooks.mesh.path);
        fix(&mut self.playbooks.cluster.path);
        fix(&mut self.state_dir);
        if let Some(ref mut kc) = self.kubeconfig {
            fix(kc);
        }
        self.project_root = root;
    }

    /// Template the host registry is created from.
    #[must_use]
    pub fn inventory_template(&self) -> PathBuf {
        self.templates_dir.join("hosts.ini.example")
    }

    /// Template the vault variable file is created from.
    #[must_use]
    pub fn vault_vars_template(&self) -> PathBuf {
        self.templates_dir.join("vault.yml.example")
    }

    #[must_use]
    pub fn kubeconfig(&self) -> Option<&Path> {
        self.kubeconfig.as_deref()
    }
}

/// Expand `~/` with the home directory and join relative paths onto `root`.
#[must_use]
pub fn resolve_path(root: &Path, path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
