//! Queue storage: the waiting list of OCR work and the records it feeds.
//!
//! The orchestrator talks to storage through [`QueueStore`] only. The trait
//! has exactly two operations because a run needs exactly two things from the
//! store: the list of pending entries, and an atomic "write the text onto the
//! target record and remove the entry" step.
//!
//! ## Transaction discipline
//!
//! [`QueueStore::complete`] owns its transaction from `BEGIN` to
//! `COMMIT`/`ROLLBACK`. Nothing transactional escapes the call, so a failed
//! statement can never leave a transaction open across entries.
//!
//! Two implementations exist:
//!
//! * [`mysql::MySqlQueueStore`] — production store over a sqlx MySQL pool.
//! * [`memory::MemoryQueueStore`] — in-process store with the same contract
//!   and fault injection hooks, used by tests.

pub mod memory;
pub mod mysql;

use crate::error::DrainError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub use memory::MemoryQueueStore;
pub use mysql::MySqlQueueStore;

/// One unit of pending OCR work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Waiting-list row id.
    pub id: i64,
    /// Id of the record that receives the recognized text.
    pub target_id: i64,
    /// Source image URLs, in stored order. Only the first one is used.
    pub image_locations: Vec<String>,
}

impl QueueEntry {
    pub fn new(id: i64, target_id: i64, image_locations: Vec<String>) -> Self {
        Self {
            id,
            target_id,
            image_locations,
        }
    }

    /// The image the pipeline actually processes.
    pub fn primary_image(&self) -> Option<&str> {
        self.image_locations.first().map(String::as_str)
    }

    /// Key the staged image is stored under.
    pub fn staging_key(&self) -> String {
        self.target_id.to_string()
    }
}

/// Result of an attempt to persist recognized text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Record updated and entry deleted in one committed transaction.
    Committed,
    /// The target record does not exist; the transaction was rolled back and
    /// the entry is still queued.
    TargetMissing,
}

/// Read/write access to the waiting list.
///
/// Every error returned from this trait is run-fatal: without a working store
/// no further progress or correctness guarantee is possible.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// All entries currently waiting, in store order.
    async fn pending(&self) -> Result<Vec<QueueEntry>, DrainError>;

    /// Set the target record's content and delete the entry, atomically.
    async fn complete(&self, entry: &QueueEntry, content: &str)
        -> Result<Completion, DrainError>;
}

/// Decode the stored image-location column.
///
/// The column holds either a JSON array of URLs or a single bare URL.
/// A malformed array decodes to no locations at all, which makes the entry
/// fail with [`crate::error::EntryError::NoImageLocation`] and stay queued.
pub fn parse_image_locations(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }

    if raw.starts_with('[') {
        return match serde_json::from_str::<Vec<String>>(raw) {
            Ok(urls) => urls
                .into_iter()
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty())
                .collect(),
            Err(e) => {
                warn!("Unparseable image location list {:?}: {}", raw, e);
                Vec::new()
            }
        };
    }

    vec![raw.to_string()]
}
