//! Provisioning phases.
//!
//! Each phase pairs a side-effect-free idempotency probe ("is this already
//! in place?") with the action that puts it in place. The probe only ever
//! reports done for a complete effect; partial state reads as not done so
//! the action is re-run.

mod cluster;
mod mesh;
mod prerequisites;
mod secrets;
mod services;
mod tunnel;
mod validate;

use std::fmt;

use clap::ValueEnum;
use cluster_ops::ansible::PlaybookRun;
use cluster_ops::CommandRunner;
use serde::{Deserialize, Serialize};

use crate::config::{PipelineConfig, PlaybookConfig};
use crate::confirm::Prompter;
use crate::error::ProvisionResult;

pub use cluster::ClusterPhase;
pub use mesh::MeshPhase;
pub use prerequisites::PrerequisitesPhase;
pub use secrets::SecretsPhase;
pub use services::ServicesPhase;
pub use tunnel::{wait_for_tunnel, TunnelPhase};
pub use validate::ValidatePhase;

/// Pipeline phases, in execution order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum PhaseId {
    /// Preflight battery.
    Prerequisites,
    /// Vault password, vault variables, host registry and age keypair.
    Secrets,
    /// Mesh VPN on every host.
    Mesh,
    /// Control plane and worker join.
    Cluster,
    /// Chart releases.
    Services,
    /// Ingress tunnel connection and DNS.
    Tunnel,
    /// Deployment battery.
    Validate,
}

impl PhaseId {
    pub const ALL: [Self; 7] = [
        Self::Prerequisites,
        Self::Secrets,
        Self::Mesh,
        Self::Cluster,
        Self::Services,
        Self::Tunnel,
        Self::Validate,
    ];

    #[allow(clippy::cast_possible_truncation)]
    pub const TOTAL_STEPS: u8 = Self::ALL.len() as u8;

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prerequisites => "prerequisites",
            Self::Secrets => "secrets",
            Self::Mesh => "mesh",
            Self::Cluster => "cluster",
            Self::Services => "services",
            Self::Tunnel => "tunnel",
            Self::Validate => "validate",
        }
    }

    /// Human-readable description of the phase.
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::Prerequisites => "Validating prerequisites",
            Self::Secrets => "Bootstrapping secrets",
            Self::Mesh => "Bringing up the mesh network",
            Self::Cluster => "Bringing up the cluster",
            Self::Services => "Deploying services",
            Self::Tunnel => "Validating the ingress tunnel",
            Self::Validate => "Validating the deployment",
        }
    }

    /// 1-based position in the pipeline.
    #[must_use]
    pub fn step_number(self) -> u8 {
        match self {
            Self::Prerequisites => 1,
            Self::Secrets => 2,
            Self::Mesh => 3,
            Self::Cluster => 4,
            Self::Services => 5,
            Self::Tunnel => 6,
            Self::Validate => 7,
        }
    }

    #[must_use]
    pub fn next(self) -> Option<Self> {
        Self::ALL.get(usize::from(self.step_number())).copied()
    }

    #[must_use]
    pub fn confirmation(self) -> Confirmation {
        match self {
            Self::Mesh | Self::Cluster => Confirmation::PreConfirm,
            Self::Tunnel => Confirmation::WarnOnFailure,
            Self::Prerequisites | Self::Secrets | Self::Services | Self::Validate => {
                Confirmation::None
            }
        }
    }

    /// Whether the action changes anything outside the process.
    #[must_use]
    pub fn mutates(self) -> bool {
        matches!(
            self,
            Self::Secrets | Self::Mesh | Self::Cluster | Self::Services
        )
    }

    /// Question asked before a pre-confirm phase runs.
    #[must_use]
    pub fn gate_prompt(self) -> String {
        match self {
            Self::Mesh => {
                "Install and join the mesh VPN on every inventory host? This rewrites host addresses in the inventory".to_string()
            }
            Self::Cluster => {
                "Install Kubernetes on the control plane and join the workers?".to_string()
            }
            other => format!("Run the {other} phase?"),
        }
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator involvement a phase requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confirmation {
    None,
    /// Ask before the action; a "no" halts the run awaiting input.
    PreConfirm,
    /// Never asks; any failure is downgraded to a warning.
    WarnOnFailure,
}

/// Everything a phase may touch. Nothing parsed is cached here: phases
/// re-read the host registry each time they need it.
pub struct PhaseContext<'a> {
    pub config: &'a PipelineConfig,
    pub runner: &'a dyn CommandRunner,
    pub prompter: &'a dyn Prompter,
}

impl<'a> PhaseContext<'a> {
    #[must_use]
    pub fn new(
        config: &'a PipelineConfig,
        runner: &'a dyn CommandRunner,
        prompter: &'a dyn Prompter,
    ) -> Self {
        Self {
            config,
            runner,
            prompter,
        }
    }

    /// Run a configured playbook against the host registry.
    ///
    /// # Errors
    ///
    /// Returns the playbook failure, carrying its output tail.
    pub fn run_playbook(&self, playbook: &PlaybookConfig) -> ProvisionResult<()> {
        let mut run = PlaybookRun::new(&playbook.path, &self.config.inventory)
            .with_tags(&playbook.tags)
            .with_vault_password_file(&self.config.vault_password_file);
        if let Some(ref limit) = playbook.limit {
            run = run.with_limit(limit.as_str());
        }
        for (key, value) in &playbook.extra_vars {
            run = run.with_extra_var(key.as_str(), value.as_str());
        }
        run.run(self.runner)?;
        Ok(())
    }
}

/// What a finished action reports back.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PhaseReport {
    pub summary: String,
    /// Non-blocking problems found along the way.
    pub warnings: Vec<String>,
}

impl PhaseReport {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            warnings: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }
}

/// One step of the pipeline.
pub trait Phase {
    fn id(&self) -> PhaseId;

    /// Whether the phase's effect is already fully in place.
    ///
    /// Must not change anything. Errors while probing count as not done.
    fn is_done(&self, ctx: &PhaseContext<'_>) -> bool;

    /// Perform the action.
    ///
    /// # Errors
    ///
    /// Any error aborts the pipeline unless the phase is warn-on-failure.
    fn execute(&self, ctx: &PhaseContext<'_>) -> ProvisionResult<PhaseReport>;
}

/// The implementation behind a phase id.
#[must_use]
pub fn phase(id: PhaseId) -> Box<dyn Phase> {
    match id {
        PhaseId::Prerequisites => Box::new(PrerequisitesPhase),
        PhaseId::Secrets => Box::new(SecretsPhase),
        PhaseId::Mesh => Box::new(MeshPhase),
        PhaseId::Cluster => Box::new(ClusterPhase),
        PhaseId::Services => Box::new(ServicesPhase),
        PhaseId::Tunnel => Box::new(TunnelPhase),
        PhaseId::Validate => Box::new(ValidatePhase),
    }
}
