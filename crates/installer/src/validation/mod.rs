//! Validation aggregator.
//!
//! A battery is an ordered list of independent checks. Every check runs no
//! matter what the previous ones returned, and the resulting
//! [`ValidationReport`] fails only when an error-severity check fails;
//! warnings are reported but never block.

pub mod checks;
pub mod report;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub use report::{CheckResult, ValidationReport};

/// What a failing check means for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Result of evaluating one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckOutcome {
    Pass,
    Warn,
    Fail,
}

impl fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Warn => write!(f, "warn"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

impl Severity {
    /// Outcome of a failed check with this severity.
    #[must_use]
    pub fn failed_outcome(self) -> CheckOutcome {
        match self {
            Self::Error => CheckOutcome::Fail,
            Self::Warning => CheckOutcome::Warn,
        }
    }
}

/// `Ok(detail)` passes, `Err(detail)` fails at the check's severity.
pub type Probe<'a> = Box<dyn Fn() -> Result<String, String> + 'a>;

struct Check<'a> {
    name: String,
    severity: Severity,
    remediation: String,
    probe: Probe<'a>,
}

/// An ordered set of independent checks.
pub struct Battery<'a> {
    name: String,
    checks: Vec<Check<'a>>,
}

impl<'a> Battery<'a> {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            checks: Vec::new(),
        }
    }

    /// Append a check.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        severity: Severity,
        remediation: impl Into<String>,
        probe: impl Fn() -> Result<String, String> + 'a,
    ) -> &mut Self {
        self.checks.push(Check {
            name: name.into(),
            severity,
            remediation: remediation.into(),
            probe: Box::new(probe),
        });
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    #[must_use]
    pub fn check_names(&self) -> Vec<&str> {
        self.checks.iter().map(|c| c.name.as_str()).collect()
    }

    /// Evaluate every check in order.
    #[must_use]
    pub fn run(&self) -> ValidationReport {
        let results = self
            .checks
            .iter()
            .map(|check| {
                let (outcome, message) = match (check.probe)() {
                    Ok(detail) => (CheckOutcome::Pass, detail),
                    Err(detail) => (check.severity.failed_outcome(), detail),
                };
                debug!(check = %check.name, %outcome, message = %message, "Check evaluated");
                CheckResult {
                    name: check.name.clone(),
                    severity: check.severity,
                    outcome,
                    message,
                    remediation: check.remediation.clone(),
                }
            })
            .collect();

        ValidationReport::new(&self.name, results)
    }
}
