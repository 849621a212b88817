//! In-process [`QueueStore`] with the same transactional contract as MySQL.
//!
//! The record update and the queue delete happen under one lock acquisition,
//! so observers see both or neither. Fault hooks let tests simulate a store
//! that dies mid-run.

use super::{Completion, QueueEntry, QueueStore};
use crate::error::DrainError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct State {
    queue: Vec<QueueEntry>,
    records: BTreeMap<i64, Option<String>>,
    fail_reads: bool,
    fail_commits: bool,
    commits: usize,
    rollbacks: usize,
}

/// Waiting list and target records held in memory.
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    state: Mutex<State>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a queue entry together with an empty target record.
    pub fn with_entry(self, entry: QueueEntry) -> Self {
        {
            let mut s = self.lock();
            s.records.entry(entry.target_id).or_insert(None);
            s.queue.push(entry);
        }
        self
    }

    /// Enqueue an entry without creating its target record.
    pub fn push_entry(&self, entry: QueueEntry) {
        self.lock().queue.push(entry);
    }

    /// Create (or reset) a target record.
    pub fn insert_record(&self, id: i64, content: Option<String>) {
        self.lock().records.insert(id, content);
    }

    /// Entries still waiting.
    pub fn queued(&self) -> Vec<QueueEntry> {
        self.lock().queue.clone()
    }

    /// Current content of a target record; `None` if the record is missing
    /// or its content is still empty.
    pub fn content(&self, target_id: i64) -> Option<String> {
        self.lock().records.get(&target_id).cloned().flatten()
    }

    /// Make every subsequent `pending` call fail.
    pub fn fail_reads(&self, on: bool) {
        self.lock().fail_reads = on;
    }

    /// Make every subsequent commit fail (after rolling back).
    pub fn fail_commits(&self, on: bool) {
        self.lock().fail_commits = on;
    }

    pub fn commit_count(&self) -> usize {
        self.lock().commits
    }

    pub fn rollback_count(&self) -> usize {
        self.lock().rollbacks
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn pending(&self) -> Result<Vec<QueueEntry>, DrainError> {
        let s = self.lock();
        if s.fail_reads {
            return Err(DrainError::store("select", "simulated read failure"));
        }
        Ok(s.queue.clone())
    }

    async fn complete(
        &self,
        entry: &QueueEntry,
        content: &str,
    ) -> Result<Completion, DrainError> {
        let mut s = self.lock();

        if !s.records.contains_key(&entry.target_id) {
            s.rollbacks += 1;
            return Ok(Completion::TargetMissing);
        }
        if s.fail_commits {
            s.rollbacks += 1;
            return Err(DrainError::store("commit", "simulated commit failure"));
        }

        s.records.insert(entry.target_id, Some(content.to_string()));
        s.queue.retain(|e| e.id != entry.id);
        s.commits += 1;
        Ok(Completion::Committed)
    }
}
