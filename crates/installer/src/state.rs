//! Run journal.
//!
//! Records what each phase did in the most recent runs, for `hybrid status`
//! and for post-mortems. It is never consulted to decide whether a phase
//! runs; the phase's own idempotency probe does that.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ProvisionError, ProvisionResult};
use crate::phases::PhaseId;

const JOURNAL_FILE: &str = "run-state.json";

/// Last known status of a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    /// Probe reported done; action not run.
    Skipped,
    Done,
    Aborted,
    AwaitingInput,
    /// Completed with warnings (warn-on-failure phases).
    Warned,
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Skipped => "skipped",
            Self::Done => "done",
            Self::Aborted => "aborted",
            Self::AwaitingInput => "awaiting input",
            Self::Warned => "done with warnings",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub status: PhaseStatus,
    /// How many times the action has been started.
    pub attempts: u32,
    pub last_error: Option<String>,
    pub updated_at: String,
}

/// Persistent per-phase history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunJournal {
    #[serde(skip)]
    path: PathBuf,
    /// Identifier of the run that last wrote the journal.
    pub run_id: String,
    pub started_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub phases: BTreeMap<PhaseId, PhaseRecord>,
}

impl RunJournal {
    /// Journal file for a state directory.
    #[must_use]
    pub fn journal_file(state_dir: &Path) -> PathBuf {
        state_dir.join(JOURNAL_FILE)
    }

    /// Load the previous journal, or start an empty one.
    ///
    /// A corrupt journal is replaced rather than failing the run.
    #[must_use]
    pub fn load_or_new(state_dir: &Path) -> Self {
        let path = Self::journal_file(state_dir);
        let now = chrono::Utc::now().to_rfc3339();
        let fresh = |path: PathBuf| Self {
            path,
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: now.clone(),
            updated_at: now.clone(),
            phases: BTreeMap::new(),
        };

        let Ok(content) = std::fs::read_to_string(&path) else {
            return fresh(path);
        };
        match serde_json::from_str::<Self>(&content) {
            Ok(mut journal) => {
                info!(journal = %path.display(), phases = journal.phases.len(), "Loaded run journal");
                journal.path = path;
                journal.run_id = uuid::Uuid::new_v4().to_string();
                journal.started_at = now.clone();
                journal
            }
            Err(e) => {
                warn!(journal = %path.display(), error = %e, "Run journal unreadable; starting a new one");
                fresh(path)
            }
        }
    }

    /// Read the journal without claiming it for a new run.
    #[must_use]
    pub fn peek(state_dir: &Path) -> Option<Self> {
        let path = Self::journal_file(state_dir);
        let content = std::fs::read_to_string(&path).ok()?;
        let mut journal: Self = serde_json::from_str(&content).ok()?;
        journal.path = path;
        Some(journal)
    }

    /// Save to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the state directory or file cannot be written.
    pub fn save(&mut self) -> ProvisionResult<()> {
        self.updated_at = chrono::Utc::now().to_rfc3339();
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| ProvisionError::io(dir, e))?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            ProvisionError::io(&self.path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        std::fs::write(&self.path, content).map_err(|e| ProvisionError::io(&self.path, e))
    }

    /// Record a phase transition and save.
    ///
    /// # Errors
    ///
    /// Returns an error if saving fails.
    pub fn record(
        &mut self,
        phase: PhaseId,
        status: PhaseStatus,
        error: Option<&str>,
    ) -> ProvisionResult<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let entry = self.phases.entry(phase).or_insert_with(|| PhaseRecord {
            status,
            attempts: 0,
            last_error: None,
            updated_at: now.clone(),
        });
        if matches!(status, PhaseStatus::Done | PhaseStatus::Aborted | PhaseStatus::Warned) {
            entry.attempts += 1;
        }
        entry.status = status;
        entry.last_error = error.map(str::to_string);
        entry.updated_at = now;
        self.save()
    }

    #[must_use]
    pub fn get(&self, phase: PhaseId) -> Option<&PhaseRecord> {
        self.phases.get(&phase)
    }

    /// Most recently updated phase.
    #[must_use]
    pub fn last_entry(&self) -> Option<(PhaseId, &PhaseRecord)> {
        self.phases
            .iter()
            .max_by(|a, b| a.1.updated_at.cmp(&b.1.updated_at).then(a.0.cmp(b.0)))
            .map(|(id, rec)| (*id, rec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = RunJournal::load_or_new(dir.path());
        journal.record(PhaseId::Secrets, PhaseStatus::Done, None).unwrap();
        journal
            .record(PhaseId::Mesh, PhaseStatus::AwaitingInput, None)
            .unwrap();

        let reloaded = RunJournal::peek(dir.path()).unwrap();
        assert_eq!(reloaded.get(PhaseId::Secrets).unwrap().status, PhaseStatus::Done);
        assert_eq!(reloaded.get(PhaseId::Secrets).unwrap().attempts, 1);
        let (last, record) = reloaded.last_entry().unwrap();
        assert_eq!(last, PhaseId::Mesh);
        assert_eq!(record.status, PhaseStatus::AwaitingInput);
    }

    #[test]
    fn test_errors_are_kept_and_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = RunJournal::load_or_new(dir.path());
        journal
            .record(PhaseId::Cluster, PhaseStatus::Aborted, Some("vps-1 NotReady"))
            .unwrap();
        assert_eq!(
            journal.get(PhaseId::Cluster).unwrap().last_error.as_deref(),
            Some("vps-1 NotReady")
        );
        journal.record(PhaseId::Cluster, PhaseStatus::Done, None).unwrap();
        let rec = journal.get(PhaseId::Cluster).unwrap();
        assert!(rec.last_error.is_none());
        assert_eq!(rec.attempts, 2);
    }

    #[test]
    fn test_corrupt_journal_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(RunJournal::journal_file(dir.path()), "{not json").unwrap();
        let journal = RunJournal::load_or_new(dir.path());
        assert!(journal.phases.is_empty());
        assert!(RunJournal::peek(dir.path()).is_none());
    }
}
