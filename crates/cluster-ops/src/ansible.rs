//! Configuration management through `ansible-playbook` / `ansible-vault`.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::command::{run_checked, CommandRunner, Invocation, ToolError, ToolOutput};

const PLAYBOOK: &str = "ansible-playbook";
const VAULT: &str = "ansible-vault";

/// Header every ansible-vault encrypted file starts with.
pub const VAULT_HEADER: &str = "$ANSIBLE_VAULT;";

/// One `ansible-playbook` run.
#[derive(Debug, Clone)]
pub struct PlaybookRun {
    pub playbook: PathBuf,
    pub inventory: PathBuf,
    pub tags: Vec<String>,
    pub limit: Option<String>,
    pub vault_password_file: Option<PathBuf>,
    pub extra_vars: Vec<(String, String)>,
}

impl PlaybookRun {
    #[must_use]
    pub fn new(playbook: impl Into<PathBuf>, inventory: impl Into<PathBuf>) -> Self {
        Self {
            playbook: playbook.into(),
            inventory: inventory.into(),
            tags: Vec::new(),
            limit: None,
            vault_password_file: None,
            extra_vars: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: impl Into<String>) -> Self {
        self.limit = Some(limit.into());
        self
    }

    /// Only attached when the password file actually exists.
    #[must_use]
    pub fn with_vault_password_file(mut self, path: &Path) -> Self {
        if path.exists() {
            self.vault_password_file = Some(path.to_path_buf());
        }
        self
    }

    #[must_use]
    pub fn with_extra_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_vars.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn invocation(&self) -> Invocation {
        let mut inv = Invocation::new(PLAYBOOK)
            .arg("-i")
            .path_arg(&self.inventory)
            .path_arg(&self.playbook)
            .env("ANSIBLE_FORCE_COLOR", "0");

        if !self.tags.is_empty() {
            inv = inv.arg("--tags").arg(self.tags.join(","));
        }
        if let Some(ref limit) = self.limit {
            inv = inv.arg("--limit").arg(limit.clone());
        }
        if let Some(ref file) = self.vault_password_file {
            inv = inv.arg("--vault-password-file").path_arg(file);
        }
        for (key, value) in &self.extra_vars {
            inv = inv.arg("--extra-vars").arg(format!("{key}={value}"));
        }
        inv
    }

    /// Run the playbook; any non-zero exit is fatal.
    ///
    /// # Errors
    ///
    /// Returns `ToolError::Failed` with the play recap tail on failure.
    pub fn run(&self, runner: &dyn CommandRunner) -> Result<ToolOutput, ToolError> {
        info!(
            playbook = %self.playbook.display(),
            tags = %self.tags.join(","),
            "Running playbook"
        );
        run_checked(runner, &self.invocation())
    }
}

/// Encrypt a variable file in place.
///
/// # Errors
///
/// Returns an error if ansible-vault fails.
pub fn vault_encrypt(
    runner: &dyn CommandRunner,
    file: &Path,
    password_file: &Path,
) -> Result<(), ToolError> {
    let inv = Invocation::new(VAULT)
        .arg("encrypt")
        .path_arg(file)
        .arg("--vault-password-file")
        .path_arg(password_file);
    run_checked(runner, &inv)?;
    info!(file = %file.display(), "Encrypted with ansible-vault");
    Ok(())
}

/// Whether a file carries the ansible-vault header.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub fn is_vault_encrypted(path: &Path) -> Result<bool, ToolError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content.trim_start().starts_with(VAULT_HEADER)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(ToolError::io(path, e)),
    }
}
