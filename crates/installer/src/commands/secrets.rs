use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use cluster_ops::SystemRunner;

use super::PromptArgs;
use crate::config::{resolve_path, PipelineConfig};
use crate::error::ProvisionError;
use crate::lock::RunLock;
use crate::secrets::SecretBootstrap;
use crate::ui;

/// Create missing secret artifacts without running the pipeline.
#[derive(Args, Debug, Clone, Default)]
pub struct SecretsCommand {
    /// Afterwards, encrypt this file with sops and the project age key
    /// (repeatable; files already sealed are left alone).
    #[arg(long, value_name = "FILE")]
    seal: Vec<PathBuf>,

    #[command(flatten)]
    prompt: PromptArgs,
}

impl SecretsCommand {
    /// Run the bootstrap.
    ///
    /// # Errors
    ///
    /// Returns an error if a template is missing or a tool fails. Returns
    /// exit code 2 when the operator could not confirm the vault variables.
    pub fn run(&self, config: &PipelineConfig) -> Result<i32> {
        let _lock = RunLock::acquire(&config.state_dir)?;
        let prompter = self.prompt.prompter();
        let runner = SystemRunner;

        ui::print_section("Secret Bootstrap");
        let bootstrap = SecretBootstrap::new(config, &runner, prompter.as_ref());
        let report = match bootstrap.run() {
            Ok(report) => report,
            Err(e @ ProvisionError::AwaitingInput { .. }) => {
                ui::print_warning(&e.to_string());
                if let Some(next) = e.remediation() {
                    ui::print_info(&next);
                }
                return Ok(2);
            }
            Err(e) => return Err(e.into()),
        };

        for a in &report.artifacts {
            let value = format!("{} ({})", a.outcome, a.path.display());
            ui::print_kv(&a.artifact.to_string(), &value);
        }
        if report.key_propagated {
            ui::print_success(&format!(
                "Age public key written to {}",
                config.sops_config.display()
            ));
        }
        if report.is_noop() {
            ui::print_info("Nothing to do");
        }

        for file in &self.seal {
            let path = resolve_path(&config.project_root, file);
            if bootstrap.seal(&path)? {
                ui::print_success(&format!("Sealed {}", path.display()));
            } else {
                ui::print_info(&format!("{} is already sealed", path.display()));
            }
        }
        Ok(0)
    }
}
