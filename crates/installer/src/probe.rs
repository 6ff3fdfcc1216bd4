//! Readiness prober.
//!
//! One bounded-retry loop shared by every convergence wait: node Ready, pod
//! Running, CoreDNS replicas and tunnel connection.

use std::fmt;
use std::thread;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::ProbeBudget;
use crate::error::ProvisionError;

/// What one predicate evaluation observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    Ready(String),
    /// Not there yet; worth asking again.
    Pending(String),
}

impl Observation {
    pub fn ready(detail: impl Into<String>) -> Self {
        Self::Ready(detail.into())
    }

    pub fn pending(detail: impl Into<String>) -> Self {
        Self::Pending(detail.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    Success,
    Timeout,
    FatalError,
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Timeout => write!(f, "timeout"),
            Self::FatalError => write!(f, "fatal error"),
        }
    }
}

/// Result of one [`poll`] call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub outcome: ProbeOutcome,
    /// Number of predicate evaluations performed.
    pub attempts: u32,
    /// Last thing the predicate reported.
    pub detail: String,
}

impl ProbeResult {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome == ProbeOutcome::Success
    }

    /// Turn anything but success into the matching error.
    ///
    /// # Errors
    ///
    /// `ConvergenceTimeout` on timeout, `ProbeFailed` on a fatal predicate.
    pub fn into_result(self, resource: &str) -> Result<Self, ProvisionError> {
        match self.outcome {
            ProbeOutcome::Success => Ok(self),
            ProbeOutcome::Timeout => Err(ProvisionError::ConvergenceTimeout {
                resource: resource.to_string(),
                attempts: self.attempts,
                detail: self.detail,
            }),
            ProbeOutcome::FatalError => Err(ProvisionError::ProbeFailed {
                resource: resource.to_string(),
                detail: self.detail,
            }),
        }
    }
}

/// Evaluate `predicate` until it reports ready, the budget runs out, or it
/// returns an error.
///
/// Sleeps `interval` between attempts, never after the last one. An error
/// from the predicate stops polling immediately with `FatalError`.
pub fn poll<F, E>(mut predicate: F, max_attempts: u32, interval: Duration) -> ProbeResult
where
    F: FnMut() -> Result<Observation, E>,
    E: fmt::Display,
{
    let mut detail = String::new();
    let max_attempts = max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match predicate() {
            Ok(Observation::Ready(d)) => {
                debug!(attempt, detail = %d, "Probe succeeded");
                return ProbeResult {
                    outcome: ProbeOutcome::Success,
                    attempts: attempt,
                    detail: d,
                };
            }
            Ok(Observation::Pending(d)) => {
                debug!(attempt, max_attempts, detail = %d, "Not ready yet");
                detail = d;
            }
            Err(e) => {
                warn!(attempt, error = %e, "Probe hit a fatal condition");
                return ProbeResult {
                    outcome: ProbeOutcome::FatalError,
                    attempts: attempt,
                    detail: e.to_string(),
                };
            }
        }

        if attempt < max_attempts && !interval.is_zero() {
            thread::sleep(interval);
        }
    }

    ProbeResult {
        outcome: ProbeOutcome::Timeout,
        attempts: max_attempts,
        detail,
    }
}

/// [`poll`] with a budget from configuration and a spinner on the terminal.
pub fn poll_with_spinner<F, E>(label: &str, budget: ProbeBudget, mut predicate: F) -> ProbeResult
where
    F: FnMut() -> Result<Observation, E>,
    E: fmt::Display,
{
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("  {spinner:.cyan} {msg}") {
        spinner.set_style(style);
    }
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner.set_message(label.to_string());

    let mut attempt = 0u32;
    let result = poll(
        || {
            attempt += 1;
            let observed = predicate();
            if let Ok(Observation::Pending(ref d)) = observed {
                spinner.set_message(format!(
                    "{label} ({attempt}/{}): {d}",
                    budget.max_attempts
                ));
            }
            observed
        },
        budget.max_attempts,
        budget.interval(),
    );

    spinner.finish_and_clear();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_success_on_nth_attempt_evaluates_exactly_n_times() {
        for n in 1..=5u32 {
            let calls = Cell::new(0u32);
            let result = poll(
                || -> Result<Observation, String> {
                    calls.set(calls.get() + 1);
                    if calls.get() == n {
                        Ok(Observation::ready("3/3 nodes Ready"))
                    } else {
                        Ok(Observation::pending("waiting"))
                    }
                },
                5,
                Duration::ZERO,
            );
            assert_eq!(result.outcome, ProbeOutcome::Success);
            assert_eq!(result.attempts, n);
            assert_eq!(calls.get(), n);
        }
    }

    #[test]
    fn test_never_ready_times_out_after_exactly_max_attempts() {
        let calls = Cell::new(0u32);
        let result = poll(
            || -> Result<Observation, String> {
                calls.set(calls.get() + 1);
                Ok(Observation::pending(format!("vps-1 NotReady ({})", calls.get())))
            },
            4,
            Duration::ZERO,
        );
        assert_eq!(result.outcome, ProbeOutcome::Timeout);
        assert_eq!(result.attempts, 4);
        assert_eq!(calls.get(), 4);
        assert_eq!(result.detail, "vps-1 NotReady (4)");
    }

    #[test]
    fn test_predicate_error_is_fatal_and_stops() {
        let calls = Cell::new(0u32);
        let result = poll(
            || -> Result<Observation, String> {
                calls.set(calls.get() + 1);
                if calls.get() == 2 {
                    Err("tunnel credentials rejected".to_string())
                } else {
                    Ok(Observation::pending("connecting"))
                }
            },
            10,
            Duration::ZERO,
        );
        assert_eq!(result.outcome, ProbeOutcome::FatalError);
        assert_eq!(result.attempts, 2);
        assert_eq!(calls.get(), 2);
        assert!(matches!(
            result.into_result("tunnel"),
            Err(ProvisionError::ProbeFailed { .. })
        ));
    }

    #[test]
    fn test_timeout_maps_to_convergence_error() {
        let result = poll(
            || -> Result<Observation, String> { Ok(Observation::pending("0/1 ready")) },
            2,
            Duration::ZERO,
        );
        match result.into_result("coredns") {
            Err(ProvisionError::ConvergenceTimeout {
                resource,
                attempts,
                detail,
            }) => {
                assert_eq!(resource, "coredns");
                assert_eq!(attempts, 2);
                assert_eq!(detail, "0/1 ready");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_spinner_variant_respects_budget() {
        let calls = Cell::new(0u32);
        let result = poll_with_spinner("nodes", ProbeBudget::new(3, 0), || -> Result<Observation, String> {
            calls.set(calls.get() + 1);
            Ok(Observation::pending("waiting"))
        });
        assert_eq!(result.outcome, ProbeOutcome::Timeout);
        assert_eq!(calls.get(), 3);
    }
}
