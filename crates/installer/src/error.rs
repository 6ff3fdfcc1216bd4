//! Provisioning error taxonomy.
//!
//! Every component returns [`ProvisionError`]; the pipeline controller is the
//! only place that decides whether an error aborts the run, and it uses
//! [`ProvisionError::remediation`] and [`ProvisionError::last_output`] to
//! tell the operator what to do next.

use std::path::PathBuf;

use cluster_ops::ToolError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Missing file, template or inventory group. Raised before any side effect.
    #[error("configuration error: {what}")]
    Configuration { what: String, remediation: String },

    /// Prerequisite validation found error-severity failures.
    #[error("prerequisites not met: {summary}")]
    PreconditionUnmet { summary: String },

    /// A readiness probe ran out of attempts.
    #[error("{resource} did not converge after {attempts} attempts")]
    ConvergenceTimeout {
        resource: String,
        attempts: u32,
        detail: String,
    },

    /// A readiness probe hit a condition that will not resolve by waiting.
    #[error("{resource} probe failed: {detail}")]
    ProbeFailed { resource: String, detail: String },

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("inventory group [{group}] has no hosts in {}", path.display())]
    GroupNotFound { group: String, path: PathBuf },

    /// The operator could not acknowledge a pause; the run stops before the
    /// step that depends on it.
    #[error("waiting for operator: {what}")]
    AwaitingInput { what: String, remediation: String },

    #[error("another run holds the lock {} ({holder})", path.display())]
    Locked { path: PathBuf, holder: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ProvisionError {
    pub fn configuration(what: impl Into<String>, remediation: impl Into<String>) -> Self {
        Self::Configuration {
            what: what.into(),
            remediation: remediation.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Suggested next step for the operator.
    #[must_use]
    pub fn remediation(&self) -> Option<String> {
        match self {
            Self::Configuration { remediation, .. } | Self::AwaitingInput { remediation, .. } => {
                Some(remediation.clone())
            }
            Self::PreconditionUnmet { .. } => Some(
                "Install the missing tools listed above, then re-run `hybrid validate --preflight`"
                    .to_string(),
            ),
            Self::ConvergenceTimeout { resource, .. } => Some(format!(
                "Inspect {resource} with kubectl, then re-run `hybrid run`; finished phases are skipped"
            )),
            Self::ProbeFailed { resource, .. } => {
                Some(format!("Fix {resource} by hand, then re-run `hybrid run`"))
            }
            Self::Tool(ToolError::Spawn { program, .. }) => Some(format!(
                "Install {program} and make sure it is on PATH"
            )),
            Self::Tool(_) => None,
            Self::GroupNotFound { group, path } => Some(format!(
                "Add at least one host under [{group}] in {}",
                path.display()
            )),
            Self::Locked { path, .. } => Some(format!(
                "Wait for the other run to finish, or remove {} if it is stale",
                path.display()
            )),
            Self::Io { .. } => None,
        }
    }

    /// Last captured output of the failing external tool or probe.
    #[must_use]
    pub fn last_output(&self) -> Option<&str> {
        match self {
            Self::Tool(e) => e.output_tail(),
            Self::ConvergenceTimeout { detail, .. } | Self::ProbeFailed { detail, .. }
                if !detail.is_empty() =>
            {
                Some(detail)
            }
            _ => None,
        }
    }
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;
