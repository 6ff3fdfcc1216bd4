//! Validation report formatting.

use serde::{Deserialize, Serialize};

use super::{CheckOutcome, Severity};
use crate::ui;

/// A single validation check result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub severity: Severity,
    pub outcome: CheckOutcome,
    pub message: String,
    pub remediation: String,
}

/// The complete result of one battery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub battery: String,
    pub timestamp: String,
    pub results: Vec<CheckResult>,
    pub passed: usize,
    pub warned: usize,
    pub failed: usize,
}

impl ValidationReport {
    #[must_use]
    pub fn new(battery: &str, results: Vec<CheckResult>) -> Self {
        let count = |o: CheckOutcome| results.iter().filter(|r| r.outcome == o).count();
        let (passed, warned, failed) = (
            count(CheckOutcome::Pass),
            count(CheckOutcome::Warn),
            count(CheckOutcome::Fail),
        );
        Self {
            battery: battery.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            results,
            passed,
            warned,
            failed,
        }
    }

    /// `(passed, warned, failed)`.
    #[must_use]
    pub fn counts(&self) -> (usize, usize, usize) {
        (self.passed, self.warned, self.failed)
    }

    /// No error-severity check failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// `1` if any error-severity check failed, `0` otherwise.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.is_success())
    }

    /// Names of the failed error-severity checks.
    #[must_use]
    pub fn failures(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.outcome == CheckOutcome::Fail)
            .map(|r| r.name.as_str())
            .collect()
    }

    /// Print one line per check.
    pub fn print_results(&self) {
        for r in &self.results {
            ui::print_check_result(&r.name, r.outcome, &r.message, &r.remediation);
        }
    }

    /// Print a boxed summary of the counts.
    pub fn print_summary(&self) {
        let title = format!("{} validation", self.battery).to_uppercase();
        println!();
        println!("╔══════════════════════════════════════════════════════════════╗");
        println!("║ {title:<60} ║");
        println!("╠══════════════════════════════════════════════════════════════╣");
        println!("║ Time:    {:<52} ║", truncate(&self.timestamp, 52));
        println!(
            "║ Passed:  {:<52} ║",
            format!("{}/{}", self.passed, self.results.len())
        );
        println!("║ Warned:  {:<52} ║", self.warned);
        println!("║ Failed:  {:<52} ║", self.failed);
        println!("╠══════════════════════════════════════════════════════════════╣");
        if !self.is_success() {
            println!("║ ✗ VALIDATION FAILED                                          ║");
        } else if self.warned > 0 {
            println!("║ ⚠ VALIDATION PASSED WITH WARNINGS                            ║");
        } else {
            println!("║ ✓ VALIDATION PASSED                                          ║");
        }
        println!("╚══════════════════════════════════════════════════════════════╝");
        println!();
    }
}

/// Truncate a string to a maximum length.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len - 3).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, severity: Severity, outcome: CheckOutcome) -> CheckResult {
        CheckResult {
            name: name.into(),
            severity,
            outcome,
            message: String::new(),
            remediation: String::new(),
        }
    }

    #[test]
    fn test_counts_and_failures() {
        let report = ValidationReport::new(
            "deployment",
            vec![
                result("api", Severity::Error, CheckOutcome::Pass),
                result("nodes", Severity::Error, CheckOutcome::Fail),
                result("tunnel", Severity::Warning, CheckOutcome::Warn),
            ],
        );
        assert_eq!(report.counts(), (1, 1, 1));
        assert_eq!(report.failures(), ["nodes"]);
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_json_shape() {
        let report = ValidationReport::new(
            "preflight",
            vec![result("kubectl", Severity::Error, CheckOutcome::Pass)],
        );
        let json: serde_json::Value = serde_json::to_value(&report).unwrap();
        assert_eq!(json["battery"], "preflight");
        assert_eq!(json["passed"], 1);
        assert_eq!(json["results"][0]["severity"], "error");
        assert_eq!(json["results"][0]["outcome"], "pass");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
    }
}
