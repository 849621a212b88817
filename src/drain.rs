//! The queue-draining orchestrator.
//!
//! One call to [`drain`] reads the waiting list once and walks it in store
//! order, strictly one entry at a time:
//!
//! ```text
//! for each entry (until the budget runs out)
//!  ├─ 1. Acquire    download the first image into the run's staging area
//!  ├─ 2. Transform  resize to `width`, PNG-encode, base64
//!  ├─ 3. Recognize  VLM call with the fixed instruction (+ optional retries)
//!  ├─ 4. Persist    UPDATE record + DELETE entry in one transaction
//!  └─ 5. Ack        entry gone from the queue
//! ```
//!
//! ## Failure policy
//!
//! * A failure in steps 1–3 is local to the entry: it is recorded in the
//!   [`EntryOutcome`], nothing is written, the entry stays queued, and the
//!   run moves on to the next entry.
//! * Any store failure is fatal: `drain` returns `Err(DrainError::Store)`
//!   immediately. The store has already rolled back the entry's transaction,
//!   and every entry not yet reached stays queued.
//!
//! ## Budget
//!
//! The budget is charged when an entry is picked up, before any work, so a
//! failing entry costs the same as a successful one. When it is exhausted
//! the run stops early and returns normally.

use crate::config::{DrainConfig, StoreConfig};
use crate::error::{DrainError, EntryError};
use crate::output::{EntryOutcome, EntryState, RunReport};
use crate::pipeline::acquire::{HttpAcquirer, ImageAcquirer};
use crate::pipeline::recognize::{Recognizer, VisionRecognizer};
use crate::pipeline::staging::StagingArea;
use crate::pipeline::transform::{ImageTransformer, PngTransformer};
use crate::progress::ProgressCallback;
use crate::store::{Completion, MySqlQueueStore, QueueEntry, QueueStore};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// The three per-entry stages the orchestrator drives.
#[derive(Clone)]
pub struct Stages {
    pub acquirer: Arc<dyn ImageAcquirer>,
    pub transformer: Arc<dyn ImageTransformer>,
    pub recognizer: Arc<dyn Recognizer>,
}

impl Stages {
    pub fn new(
        acquirer: Arc<dyn ImageAcquirer>,
        transformer: Arc<dyn ImageTransformer>,
        recognizer: Arc<dyn Recognizer>,
    ) -> Self {
        Self {
            acquirer,
            transformer,
            recognizer,
        }
    }

    /// Production stages: HTTP download, PNG transform, VLM recognition.
    pub fn from_config(config: &DrainConfig) -> Result<Self, DrainError> {
        let acquirer = HttpAcquirer::new(config.download_timeout_secs)
            .map_err(|e| DrainError::Internal(format!("HTTP client: {e}")))?;
        let recognizer = VisionRecognizer::from_config(config)?;
        Ok(Self::new(
            Arc::new(acquirer),
            Arc::new(PngTransformer),
            Arc::new(recognizer),
        ))
    }
}

/// Processing budget for one run.
#[derive(Debug, Clone, Copy)]
struct Budget {
    remaining: usize,
}

impl Budget {
    fn new(limit: usize) -> Self {
        Self { remaining: limit }
    }

    /// Charge one entry. `false` once the budget is exhausted.
    fn take(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }
}

/// Drain the waiting list once.
///
/// # Returns
/// `Ok(RunReport)` when the run finished, even if some entries failed
/// (check `report.failed`).
///
/// # Errors
/// Returns `Err(DrainError)` only for fatal errors: the store could not be
/// read or an entry's transaction could not be written or committed.
pub async fn drain<S>(
    store: &S,
    stages: &Stages,
    config: &DrainConfig,
) -> Result<RunReport, DrainError>
where
    S: QueueStore + ?Sized,
{
    let run_start = Instant::now();

    // ── Step 1: Read the waiting list ────────────────────────────────────
    let entries = store.pending().await?;
    let pending = entries.len();
    let planned = pending.min(config.budget);
    info!(
        "Waiting list has {} entries; this run will attempt {}",
        pending, planned
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_run_start(pending, planned);
    }

    let mut report = RunReport {
        pending,
        ..RunReport::default()
    };

    if entries.is_empty() || planned == 0 {
        report.deferred = pending;
        report.duration_ms = run_start.elapsed().as_millis() as u64;
        if let Some(ref cb) = config.progress_callback {
            cb.on_run_complete(0, 0);
        }
        return Ok(report);
    }

    // ── Step 2: Per-run staging directory ────────────────────────────────
    // An unusable root fails each entry at acquisition, not the run.
    let staging = StagingArea::for_run(&config.staging_root).await;

    // ── Step 3: Walk the entries sequentially ────────────────────────────
    let mut budget = Budget::new(config.budget);
    for entry in &entries {
        if !budget.take() {
            info!(
                "Budget of {} exhausted; {} entries left for the next run",
                config.budget,
                pending - report.attempted
            );
            break;
        }

        report.attempted += 1;
        let outcome = process_entry(store, stages, &staging, entry, config).await?;
        if outcome.is_acknowledged() {
            report.completed += 1;
        } else {
            report.failed += 1;
        }
        report.outcomes.push(outcome);
    }

    report.deferred = pending - report.attempted;
    report.duration_ms = run_start.elapsed().as_millis() as u64;

    info!(
        "Run complete: {}/{} entries acknowledged, {} failed, {} deferred, {}ms",
        report.completed, report.attempted, report.failed, report.deferred, report.duration_ms
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_run_complete(report.attempted, report.completed);
    }

    Ok(report)
}

/// List the waiting entries without processing anything.
///
/// Needs no recognition provider.
pub async fn peek<S>(store: &S) -> Result<Vec<QueueEntry>, DrainError>
where
    S: QueueStore + ?Sized,
{
    store.pending().await
}

/// Connect to MySQL, drain once, and close the connection on every exit path.
///
/// The recognition provider is resolved before connecting, so a missing API
/// key never opens a database connection.
pub async fn drain_mysql(
    store_config: &StoreConfig,
    config: &DrainConfig,
) -> Result<RunReport, DrainError> {
    let stages = Stages::from_config(config)?;
    let store = MySqlQueueStore::connect(store_config).await?;
    let result = drain(&store, &stages, config).await;
    store.close().await;
    result
}

// ── Per-entry state machine ──────────────────────────────────────────────

/// Tracks which stage an entry is in and reports transitions.
struct EntryRun<'a> {
    entry: &'a QueueEntry,
    state: EntryState,
    recognition_attempts: u32,
    callback: Option<&'a ProgressCallback>,
}

impl<'a> EntryRun<'a> {
    fn new(entry: &'a QueueEntry, callback: Option<&'a ProgressCallback>) -> Self {
        Self {
            entry,
            state: EntryState::Pending,
            recognition_attempts: 0,
            callback,
        }
    }

    fn enter(&mut self, stage: EntryState) {
        debug!(entry = self.entry.id, "{} → {}", self.state, stage);
        self.state = stage;
        if let Some(cb) = self.callback {
            cb.on_stage(self.entry.id, stage);
        }
    }

    fn acknowledged(self, text_chars: usize, started: Instant) -> EntryOutcome {
        if let Some(cb) = self.callback {
            cb.on_entry_complete(self.entry.id, self.entry.target_id, text_chars);
        }
        EntryOutcome {
            entry_id: self.entry.id,
            target_id: self.entry.target_id,
            state: EntryState::Acknowledged,
            failed_at: None,
            text_chars,
            recognition_attempts: self.recognition_attempts,
            duration_ms: started.elapsed().as_millis() as u64,
            error: None,
        }
    }

    fn failed(self, error: EntryError, started: Instant) -> EntryOutcome {
        warn!(
            entry = self.entry.id,
            target = self.entry.target_id,
            "Entry failed while {}; left queued: {}",
            self.state,
            error
        );
        if let Some(cb) = self.callback {
            cb.on_entry_error(self.entry.id, self.state, &error.to_string());
        }
        EntryOutcome {
            entry_id: self.entry.id,
            target_id: self.entry.target_id,
            state: EntryState::Failed,
            failed_at: Some(self.state),
            text_chars: 0,
            recognition_attempts: self.recognition_attempts,
            duration_ms: started.elapsed().as_millis() as u64,
            error: Some(error),
        }
    }
}

/// Take one entry from `Pending` to a terminal state.
///
/// Entry-local failures come back as a `Failed` outcome; only store errors
/// are returned as `Err`.
async fn process_entry<S>(
    store: &S,
    stages: &Stages,
    staging: &StagingArea,
    entry: &QueueEntry,
    config: &DrainConfig,
) -> Result<EntryOutcome, DrainError>
where
    S: QueueStore + ?Sized,
{
    let started = Instant::now();
    let mut run = EntryRun::new(entry, config.progress_callback.as_ref());
    if let Some(ref cb) = config.progress_callback {
        cb.on_entry_start(entry.id, entry.target_id);
    }
    info!(entry = entry.id, target = entry.target_id, "Processing queue entry");

    let key = entry.staging_key();
    let extracted = extract_text(stages, staging, entry, &key, config, &mut run).await;
    staging.discard(&key).await;

    let text = match extracted {
        Ok(text) => text,
        Err(e) => return Ok(run.failed(e, started)),
    };

    run.enter(EntryState::Persisting);
    match store.complete(entry, &text).await? {
        Completion::Committed => {
            let chars = text.chars().count();
            info!(
                entry = entry.id,
                target = entry.target_id,
                "Stored {} chars and removed entry",
                chars
            );
            Ok(run.acknowledged(chars, started))
        }
        Completion::TargetMissing => Ok(run.failed(
            EntryError::TargetMissing {
                target: entry.target_id,
            },
            started,
        )),
    }
}

/// Acquire → Transform → Recognize for one entry.
async fn extract_text(
    stages: &Stages,
    staging: &StagingArea,
    entry: &QueueEntry,
    key: &str,
    config: &DrainConfig,
    run: &mut EntryRun<'_>,
) -> Result<String, EntryError> {
    run.enter(EntryState::Acquiring);
    let url = entry
        .primary_image()
        .ok_or(EntryError::NoImageLocation { entry: entry.id })?;
    if entry.image_locations.len() > 1 {
        debug!(
            entry = entry.id,
            "{} image locations; only the first is processed",
            entry.image_locations.len()
        );
    }
    stages.acquirer.acquire(url, staging, key).await?;

    run.enter(EntryState::Transforming);
    let image = stages.transformer.transform(staging, key, config.width).await?;

    run.enter(EntryState::Recognizing);
    recognize_with_retry(stages.recognizer.as_ref(), &image, config, run).await
}

/// Call the recognizer, retrying with exponential backoff.
///
/// Whitespace-only output counts as a failed attempt. Anything else is
/// returned unchanged.
async fn recognize_with_retry(
    recognizer: &dyn Recognizer,
    image: &str,
    config: &DrainConfig,
    run: &mut EntryRun<'_>,
) -> Result<String, EntryError> {
    let mut last_err: Option<EntryError> = None;

    for attempt in 0..=config.recognition_retries {
        if attempt > 0 {
            let backoff = config
                .retry_backoff_ms
                .saturating_mul(1u64 << (attempt - 1).min(16));
            warn!(
                entry = run.entry.id,
                "Recognition retry {}/{} after {}ms",
                attempt,
                config.recognition_retries,
                backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        run.recognition_attempts += 1;
        match recognizer.recognize(image).await {
            Ok(text) if !text.trim().is_empty() => return Ok(text),
            Ok(_) => {
                last_err = Some(EntryError::Recognition {
                    detail: "response carried no text".into(),
                });
            }
            Err(e) => {
                warn!(entry = run.entry.id, "Recognition attempt {} failed: {}", attempt + 1, e);
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| EntryError::Recognition {
        detail: "no attempt was made".into(),
    }))
}
