//! Chart releases through `helmfile`.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::command::{run_checked, CommandRunner, Invocation, ToolError, ToolOutput, DEFAULT_TAIL_LINES};

const HELMFILE: &str = "helmfile";

/// Result of `helmfile diff --detailed-exitcode`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffStatus {
    /// Every release matches the declared state.
    InSync,
    /// Releases would change; holds the diff text.
    Pending(String),
}

/// A helmfile bound to one kubeconfig.
pub struct Helmfile<'a> {
    runner: &'a dyn CommandRunner,
    file: PathBuf,
    kubeconfig: Option<PathBuf>,
}

impl<'a> Helmfile<'a> {
    #[must_use]
    pub fn new(runner: &'a dyn CommandRunner, file: &Path, kubeconfig: Option<&Path>) -> Self {
        Self {
            runner,
            file: file.to_path_buf(),
            kubeconfig: kubeconfig.map(Path::to_path_buf),
        }
    }

    fn invocation(&self) -> Invocation {
        let inv = Invocation::new(HELMFILE).arg("-f").path_arg(&self.file);
        match self.kubeconfig {
            Some(ref kc) => inv.env("KUBECONFIG", kc.to_string_lossy().into_owned()),
            None => inv,
        }
    }

    /// Apply every release.
    ///
    /// # Errors
    ///
    /// Returns `ToolError::Failed` when helmfile exits non-zero.
    pub fn apply(&self) -> Result<ToolOutput, ToolError> {
        info!(helmfile = %self.file.display(), "Applying releases");
        run_checked(self.runner, &self.invocation().args(["apply", "--suppress-secrets"]))
    }

    /// Compare declared releases against the cluster.
    ///
    /// # Errors
    ///
    /// Returns `ToolError::Failed` for exit codes other than 0 and 2.
    pub fn diff(&self) -> Result<DiffStatus, ToolError> {
        let out = self.runner.run(
            &self
                .invocation()
                .args(["diff", "--detailed-exitcode", "--suppress-secrets"]),
        )?;
        match out.code {
            0 => Ok(DiffStatus::InSync),
            2 => Ok(DiffStatus::Pending(out.stdout)),
            code => Err(ToolError::Failed {
                program: HELMFILE.to_string(),
                code,
                tail: out.tail(DEFAULT_TAIL_LINES),
            }),
        }
    }
}
