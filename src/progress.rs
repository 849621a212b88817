//! Progress-callback trait for per-entry drain events.
//!
//! Inject an [`Arc<dyn DrainProgressCallback>`] via
//! [`crate::config::DrainConfigBuilder::progress_callback`] to receive
//! events as the orchestrator works through the waiting list. The library
//! knows nothing about how the host reports them: the CLI draws a terminal
//! progress bar, a scheduler might forward them to its own log.
//!
//! # Example
//!
//! ```rust
//! use recruit_ocr::{DrainConfig, DrainProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     acknowledged: AtomicUsize,
//! }
//!
//! impl DrainProgressCallback for CountingCallback {
//!     fn on_entry_complete(&self, entry_id: i64, target_id: i64, text_chars: usize) {
//!         self.acknowledged.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("entry {entry_id} → record {target_id} ({text_chars} chars)");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { acknowledged: AtomicUsize::new(0) });
//! let config = DrainConfig::builder()
//!     .progress_callback(counter as Arc<dyn DrainProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::EntryState;
use std::sync::Arc;

/// Called by the orchestrator as it processes each entry.
///
/// Entries are processed strictly one after another, so events for
/// different entries never interleave. All methods default to no-ops.
pub trait DrainProgressCallback: Send + Sync {
    /// Called once after the waiting list has been read.
    ///
    /// # Arguments
    /// * `pending` — entries waiting in the store
    /// * `planned` — entries this run will attempt (`min(pending, budget)`)
    fn on_run_start(&self, pending: usize, planned: usize) {
        let _ = (pending, planned);
    }

    /// Called when the orchestrator picks up an entry.
    fn on_entry_start(&self, entry_id: i64, target_id: i64) {
        let _ = (entry_id, target_id);
    }

    /// Called as the entry moves into each non-terminal stage.
    fn on_stage(&self, entry_id: i64, stage: EntryState) {
        let _ = (entry_id, stage);
    }

    /// Called after the entry's transaction committed.
    fn on_entry_complete(&self, entry_id: i64, target_id: i64, text_chars: usize) {
        let _ = (entry_id, target_id, text_chars);
    }

    /// Called when the entry failed and was left queued.
    ///
    /// # Arguments
    /// * `failed_at` — stage that was running
    /// * `error`     — human-readable error description
    fn on_entry_error(&self, entry_id: i64, failed_at: EntryState, error: &str) {
        let _ = (entry_id, failed_at, error);
    }

    /// Called once when the run finishes without a fatal error.
    fn on_run_complete(&self, attempted: usize, completed: usize) {
        let _ = (attempted, completed);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl DrainProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::DrainConfig`].
pub type ProgressCallback = Arc<dyn DrainProgressCallback>;
