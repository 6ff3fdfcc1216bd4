//! Hybrid cluster provisioning pipeline.
//!
//! Brings up a Kubernetes cluster whose control plane sits behind a home
//! NAT and whose workers have public addresses: prerequisites, secrets,
//! mesh VPN, cluster, services, ingress tunnel, then a health battery.
//!
//! # Example
//!
//! ```ignore
//! use cluster_ops::SystemRunner;
//! use hybrid_cli::{AutoAnswer, PhaseContext, Pipeline, PipelineConfig, RunOptions};
//!
//! let config = PipelineConfig::load(std::path::Path::new("."), None)?;
//! let prompter = AutoAnswer(true);
//! let mut pipeline = Pipeline::new(PhaseContext::new(&config, &SystemRunner, &prompter))?;
//! std::process::exit(pipeline.run(&RunOptions::default()).exit_code());
//! ```

// Allow product names without backticks in doc comments
#![allow(clippy::doc_markdown)]

pub mod commands;
pub mod config;
pub mod confirm;
pub mod error;
pub mod inventory;
pub mod lock;
pub mod orchestrator;
pub mod phases;
pub mod probe;
pub mod secrets;
pub mod state;
pub mod ui;
pub mod validation;

// Re-export commonly used types at the crate root
pub use config::{PipelineConfig, ProbeBudget};
pub use confirm::{AutoAnswer, ConsolePrompter, Prompter};
pub use error::{ProvisionError, ProvisionResult};
pub use inventory::{HostRecord, HostRegistry};
pub use orchestrator::{Pipeline, PipelineOutcome, RunOptions};
pub use phases::{PhaseContext, PhaseId};
pub use probe::{poll, Observation, ProbeOutcome, ProbeResult};
pub use secrets::{BootstrapReport, SecretBootstrap};
pub use state::{PhaseStatus, RunJournal};
pub use validation::{Battery, ValidationReport};
