//! Secret bootstrap.
//!
//! Creates, at most once, the four local artifacts a run depends on:
//!
//! 1. the vault password file (random),
//! 2. the vault variable file (from template, edited by the operator, then
//!    encrypted in place),
//! 3. the host registry (from template),
//! 4. the age keypair, whose public half is pushed into `.sops.yaml`.
//!
//! An artifact that already exists is never rewritten.

use std::fmt;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use cluster_ops::ansible::{is_vault_encrypted, vault_encrypt};
use cluster_ops::sops::{self, KeyPropagation};
use cluster_ops::CommandRunner;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::confirm::Prompter;
use crate::error::{ProvisionError, ProvisionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Artifact {
    VaultPassword,
    VaultVariables,
    HostRegistry,
    AgeKey,
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::VaultPassword => "vault password",
            Self::VaultVariables => "vault variables",
            Self::HostRegistry => "host registry",
            Self::AgeKey => "age keypair",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactOutcome {
    AlreadyPresent,
    Created,
    CreatedAndEncrypted,
    /// Existed in plaintext from an interrupted run and was encrypted now.
    Encrypted,
}

impl fmt::Display for ArtifactOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AlreadyPresent => "already present",
            Self::Created => "created",
            Self::CreatedAndEncrypted => "created and encrypted",
            Self::Encrypted => "encrypted",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactReport {
    pub artifact: Artifact,
    pub path: PathBuf,
    pub outcome: ArtifactOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct BootstrapReport {
    pub artifacts: Vec<ArtifactReport>,
    /// Whether the routing config's placeholder was replaced on this run.
    pub key_propagated: bool,
}

impl BootstrapReport {
    #[must_use]
    pub fn outcome(&self, artifact: Artifact) -> Option<ArtifactOutcome> {
        self.artifacts
            .iter()
            .find(|a| a.artifact == artifact)
            .map(|a| a.outcome)
    }

    /// Nothing was created or rewritten.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        !self.key_propagated
            && self
                .artifacts
                .iter()
                .all(|a| a.outcome == ArtifactOutcome::AlreadyPresent)
    }
}

pub struct SecretBootstrap<'a> {
    config: &'a PipelineConfig,
    runner: &'a dyn CommandRunner,
    prompter: &'a dyn Prompter,
}

impl<'a> SecretBootstrap<'a> {
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

    /// Every artifact exists, the vault variable file is encrypted and the
    /// routing config holds no placeholder.
    ///
    /// # Errors
    ///
    /// Returns an error if the vault variable file or the routing config
    /// exists but cannot be read.
    pub fn is_complete(&self) -> ProvisionResult<bool> {
        let c = self.config;
        let present = [
            &c.vault_password_file,
            &c.vault_vars_file,
            &c.inventory,
            &c.age_key_file,
        ]
        .iter()
        .all(|p| p.exists());
        Ok(present
            && is_vault_encrypted(&c.vault_vars_file)?
            && !sops::has_placeholder(&c.sops_config, &c.age_placeholder)?)
    }

    /// Fail before any write if a needed template is missing.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the template to create.
    pub fn check_templates(&self) -> ProvisionResult<()> {
        let c = self.config;
        for (target, template) in [
            (&c.vault_vars_file, c.vault_vars_template()),
            (&c.inventory, c.inventory_template()),
        ] {
            if !target.exists() && !template.exists() {
                return Err(ProvisionError::configuration(
                    format!(
                        "{} is missing and so is its template {}",
                        target.display(),
                        template.display()
                    ),
                    format!(
                        "Create {} (or copy an existing {} into place by hand)",
                        template.display(),
                        target.display()
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Encrypt a secrets file with the project age key, unless it is
    /// already sealed. Returns whether the file was encrypted.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file or the age key is missing,
    /// or the sops failure.
    pub fn seal(&self, file: &Path) -> ProvisionResult<bool> {
        let key = &self.config.age_key_file;
        if !key.exists() {
            return Err(ProvisionError::configuration(
                format!("age key {} does not exist", key.display()),
                "Run `hybrid secrets` to generate it",
            ));
        }
        if !file.exists() {
            return Err(ProvisionError::configuration(
                format!("{} does not exist", file.display()),
                "Pass the path of an existing secrets file",
            ));
        }
        if sops::is_sops_encrypted(file)? {
            info!(file = %file.display(), "Already sealed");
            return Ok(false);
        }
        sops::encrypt_in_place(self.runner, file, key)?;
        Ok(true)
    }

    /// Create whatever is missing.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for missing templates (before any
    /// write), or the first tool/I/O failure.
    pub fn run(&self) -> ProvisionResult<BootstrapReport> {
        self.check_templates()?;
        let c = self.config;

        let artifacts = vec![
            self.ensure_vault_password()?,
            self.ensure_vault_variables()?,
            self.ensure_from_template(Artifact::HostRegistry, &c.inventory, &c.inventory_template())?,
            self.ensure_age_key()?,
        ];
        let key_propagated = self.propagate_key()?;

        Ok(BootstrapReport {
            artifacts,
            key_propagated,
        })
    }

    fn ensure_vault_password(&self) -> ProvisionResult<ArtifactReport> {
        let path = &self.config.vault_password_file;
        if path.exists() {
            return Ok(present(Artifact::VaultPassword, path));
        }
        let password = format!(
            "{}{}",
            uuid::Uuid::new_v4().simple(),
            uuid::Uuid::new_v4().simple()
        );
        create_new(path, &password, true)?;
        info!(path = %path.display(), "Generated vault password");
        Ok(report(Artifact::VaultPassword, path, ArtifactOutcome::Created))
    }

    fn ensure_vault_variables(&self) -> ProvisionResult<ArtifactReport> {
        let c = self.config;
        let path = &c.vault_vars_file;
        let outcome = if path.exists() {
            if is_vault_encrypted(path)? {
                return Ok(present(Artifact::VaultVariables, path));
            }
            warn!(path = %path.display(), "Vault variable file is not encrypted yet; resuming");
            ArtifactOutcome::Encrypted
        } else {
            copy_template(&c.vault_vars_template(), path)?;
            ArtifactOutcome::CreatedAndEncrypted
        };

        let message = format!(
            "Fill in the secrets in {} before it is encrypted",
            path.display()
        );
        if !self.prompter.pause(&message) {
            return Err(ProvisionError::AwaitingInput {
                what: format!("{} is filled in but not encrypted", path.display()),
                remediation: format!(
                    "Edit {}, then re-run `hybrid secrets` to encrypt it",
                    path.display()
                ),
            });
        }
        vault_encrypt(self.runner, path, &c.vault_password_file)?;
        info!(path = %path.display(), "Encrypted vault variable file");
        Ok(report(Artifact::VaultVariables, path, outcome))
    }

    fn ensure_from_template(
        &self,
        artifact: Artifact,
        path: &Path,
        template: &Path,
    ) -> ProvisionResult<ArtifactReport> {
        if path.exists() {
            return Ok(present(artifact, path));
        }
        copy_template(template, path)?;
        info!(path = %path.display(), template = %template.display(), "Created {artifact} from template");
        Ok(report(artifact, path, ArtifactOutcome::Created))
    }

    fn ensure_age_key(&self) -> ProvisionResult<ArtifactReport> {
        let path = &self.config.age_key_file;
        if path.exists() {
            return Ok(present(Artifact::AgeKey, path));
        }
        sops::generate_keypair(self.runner, path)?;
        Ok(report(Artifact::AgeKey, path, ArtifactOutcome::Created))
    }

    fn propagate_key(&self) -> ProvisionResult<bool> {
        let c = self.config;
        if !sops::has_placeholder(&c.sops_config, &c.age_placeholder)? {
            return Ok(false);
        }
        let key = sops::public_key(self.runner, &c.age_key_file)?;
        let outcome = sops::propagate_public_key(&c.sops_config, &c.age_placeholder, &key)?;
        Ok(outcome == KeyPropagation::Replaced)
    }
}

fn present(artifact: Artifact, path: &Path) -> ArtifactReport {
    report(artifact, path, ArtifactOutcome::AlreadyPresent)
}

fn report(artifact: Artifact, path: &Path, outcome: ArtifactOutcome) -> ArtifactReport {
    ArtifactReport {
        artifact,
        path: path.to_path_buf(),
        outcome,
    }
}

fn copy_template(template: &Path, target: &Path) -> ProvisionResult<()> {
    let content =
        std::fs::read_to_string(template).map_err(|e| ProvisionError::io(template, e))?;
    create_new(target, &content, false)
}

/// Write a file that must not exist yet.
fn create_new(path: &Path, content: &str, private: bool) -> ProvisionResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ProvisionError::io(parent, e))?;
    }

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    if private {
        owner_only(&mut options);
    }

    let mut file = options.open(path).map_err(|e| {
        if e.kind() == ErrorKind::AlreadyExists {
            warn!(path = %path.display(), "Refusing to overwrite existing file");
        }
        ProvisionError::io(path, e)
    })?;
    file.write_all(content.as_bytes())
        .map_err(|e| ProvisionError::io(path, e))
}

#[cfg(unix)]
fn owner_only(options: &mut OpenOptions) {
    use std::os::unix::fs::OpenOptionsExt;
    options.mode(0o600);
}

#[cfg(not(unix))]
fn owner_only(_options: &mut OpenOptions) {}
