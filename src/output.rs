//! Run results: what happened to each entry, and to the run as a whole.

use crate::error::EntryError;
use serde::{Deserialize, Serialize};

/// Where an entry is in the pipeline.
///
/// ```text
/// Pending → Acquiring → Transforming → Recognizing → Persisting → Acknowledged
///                 ╲            ╲              ╲             ╲
///                  └────────────┴──────────────┴─────────────┴──▶ Failed
/// ```
///
/// `Acknowledged` and `Failed` are terminal. A `Failed` entry is still in
/// the waiting list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Pending,
    Acquiring,
    Transforming,
    Recognizing,
    Persisting,
    Acknowledged,
    Failed,
}

impl std::fmt::Display for EntryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntryState::Pending => "pending",
            EntryState::Acquiring => "acquiring",
            EntryState::Transforming => "transforming",
            EntryState::Recognizing => "recognizing",
            EntryState::Persisting => "persisting",
            EntryState::Acknowledged => "acknowledged",
            EntryState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Result of processing a single queue entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryOutcome {
    /// Waiting-list row id.
    pub entry_id: i64,
    /// Target record id.
    pub target_id: i64,
    /// Terminal state: `Acknowledged` or `Failed`.
    pub state: EntryState,
    /// The stage that was running when the entry failed.
    pub failed_at: Option<EntryState>,
    /// Characters of recognized text written to the record (0 on failure).
    pub text_chars: usize,
    /// Recognition attempts made (0 if the entry never got that far).
    pub recognition_attempts: u32,
    /// Wall-clock time spent on this entry.
    pub duration_ms: u64,
    /// Why the entry failed, if it did.
    pub error: Option<EntryError>,
}

impl EntryOutcome {
    pub fn is_acknowledged(&self) -> bool {
        self.state == EntryState::Acknowledged
    }
}

/// Summary of one drain run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    /// Entries waiting when the run started.
    pub pending: usize,
    /// Entries the run took on (≤ budget).
    pub attempted: usize,
    /// Entries whose text was committed and queue row deleted.
    pub completed: usize,
    /// Entries that failed and remain queued.
    pub failed: usize,
    /// Entries left untouched because the budget ran out.
    pub deferred: usize,
    /// Per-entry outcomes in processing order.
    pub outcomes: Vec<EntryOutcome>,
    /// Wall-clock time for the whole run.
    pub duration_ms: u64,
}

impl RunReport {
    /// True when every attempted entry was acknowledged.
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}
