//! Integration tests for the drain orchestrator.
//!
//! The orchestrator runs against [`MemoryQueueStore`] with scripted stage
//! fakes, so no network, model, or database is needed.
//!
//! Run with:
//!   cargo test --test drain -- --nocapture

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use recruit_ocr::{
    drain, peek, DrainConfig, DrainError, DrainProgressCallback, EntryError,
    EntryState, ImageAcquirer, ImageTransformer, MemoryQueueStore, PngTransformer, QueueEntry,
    QueueStore, Recognizer, Stages, StagingArea,
};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// ── Stage fakes ──────────────────────────────────────────────────────────────

/// Writes the URL itself as the staged payload; fails for listed URLs.
#[derive(Default)]
struct ScriptedAcquirer {
    failing: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedAcquirer {
    fn failing(urls: &[&str]) -> Self {
        Self {
            failing: urls.iter().map(|u| u.to_string()).collect(),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageAcquirer for ScriptedAcquirer {
    async fn acquire(
        &self,
        url: &str,
        staging: &StagingArea,
        id: &str,
    ) -> Result<PathBuf, EntryError> {
        self.calls.lock().unwrap().push(url.to_string());
        if self.failing.contains(url) {
            return Err(EntryError::Fetch {
                url: url.to_string(),
                reason: "HTTP 404 Not Found".into(),
            });
        }
        staging.ensure_dir().await.map_err(|e| EntryError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let path = staging.path_for(id);
        tokio::fs::write(&path, url.as_bytes()).await.unwrap();
        Ok(path)
    }
}

/// Serves a real PNG of the given size for every URL.
struct PngAcquirer {
    width: u32,
    height: u32,
}

#[async_trait]
impl ImageAcquirer for PngAcquirer {
    async fn acquire(
        &self,
        _url: &str,
        staging: &StagingArea,
        id: &str,
    ) -> Result<PathBuf, EntryError> {
        let img = image::DynamicImage::new_rgb8(self.width, self.height);
        let mut buf = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        staging.ensure_dir().await.unwrap();
        let path = staging.path_for(id);
        tokio::fs::write(&path, buf.into_inner()).await.unwrap();
        Ok(path)
    }
}

/// Reads the staged payload back and tags it, so recognition input can be
/// traced to the entry's image.
#[derive(Default)]
struct EchoTransformer {
    widths: Mutex<Vec<u32>>,
}

#[async_trait]
impl ImageTransformer for EchoTransformer {
    async fn transform(
        &self,
        staging: &StagingArea,
        id: &str,
        width: u32,
    ) -> Result<String, EntryError> {
        self.widths.lock().unwrap().push(width);
        let bytes = tokio::fs::read(staging.path_for(id))
            .await
            .map_err(|e| EntryError::Transform {
                id: id.to_string(),
                detail: e.to_string(),
            })?;
        Ok(format!("img:{}", String::from_utf8_lossy(&bytes)))
    }
}

/// Returns queued responses in order, then echoes the payload.
#[derive(Default)]
struct ScriptedRecognizer {
    responses: Mutex<VecDeque<Result<String, EntryError>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRecognizer {
    fn with_responses(responses: Vec<Result<String, EntryError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Recognizer for ScriptedRecognizer {
    async fn recognize(&self, base64_image: &str) -> Result<String, EntryError> {
        self.calls.lock().unwrap().push(base64_image.to_string());
        match self.responses.lock().unwrap().pop_front() {
            Some(r) => r,
            None => Ok(format!("text from {base64_image}")),
        }
    }
}

/// Fails every image; the recognizer must never see the entry.
struct FailingTransformer;

#[async_trait]
impl ImageTransformer for FailingTransformer {
    async fn transform(
        &self,
        _staging: &StagingArea,
        id: &str,
        _width: u32,
    ) -> Result<String, EntryError> {
        Err(EntryError::Transform {
            id: id.to_string(),
            detail: "unsupported image format".into(),
        })
    }
}

fn recognition_error(detail: &str) -> EntryError {
    EntryError::Recognition {
        detail: detail.to_string(),
    }
}

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Route library logs to the test harness; `RUST_LOG=debug` to see them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Harness {
    acquirer: Arc<ScriptedAcquirer>,
    transformer: Arc<EchoTransformer>,
    recognizer: Arc<ScriptedRecognizer>,
    stages: Stages,
}

impl Harness {
    fn new(acquirer: ScriptedAcquirer, recognizer: ScriptedRecognizer) -> Self {
        let acquirer = Arc::new(acquirer);
        let transformer = Arc::new(EchoTransformer::default());
        let recognizer = Arc::new(recognizer);
        let stages = Stages::new(acquirer.clone(), transformer.clone(), recognizer.clone());
        Self {
            acquirer,
            transformer,
            recognizer,
            stages,
        }
    }

    fn happy() -> Self {
        Self::new(ScriptedAcquirer::default(), ScriptedRecognizer::default())
    }
}

fn config(staging: &Path, budget: usize) -> DrainConfig {
    DrainConfig::builder()
        .staging_root(staging)
        .budget(budget)
        .retry_backoff_ms(1)
        .build()
        .unwrap()
}

fn entry(id: i64, target: i64, url: &str) -> QueueEntry {
    QueueEntry::new(id, target, vec![url.to_string()])
}

fn two_entry_store() -> MemoryQueueStore {
    MemoryQueueStore::new()
        .with_entry(entry(1, 101, "u1"))
        .with_entry(entry(2, 102, "u2"))
}

fn leftover_run_dirs(root: &Path) -> usize {
    std::fs::read_dir(root).map(|d| d.count()).unwrap_or(0)
}

// ── Core flow ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn drains_all_entries_in_order() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let store = two_entry_store();
    let h = Harness::happy();

    let report = drain(&store, &h.stages, &config(tmp.path(), 10)).await.unwrap();

    assert_eq!(h.recognizer.calls(), vec!["img:u1", "img:u2"]);
    assert_eq!(store.content(101).as_deref(), Some("text from img:u1"));
    assert_eq!(store.content(102).as_deref(), Some("text from img:u2"));
    assert!(store.queued().is_empty());

    assert_eq!(report.pending, 2);
    assert_eq!(report.attempted, 2);
    assert_eq!(report.completed, 2);
    assert_eq!(report.deferred, 0);
    assert!(report.all_succeeded());
    assert!(report.outcomes.iter().all(|o| o.state == EntryState::Acknowledged));
    assert_eq!(*h.transformer.widths.lock().unwrap(), vec![500, 500]);
}

#[tokio::test]
async fn fetch_failure_leaves_entry_queued() {
    let tmp = TempDir::new().unwrap();
    let store = MemoryQueueStore::new().with_entry(entry(1, 101, "u1"));
    let h = Harness::new(ScriptedAcquirer::failing(&["u1"]), ScriptedRecognizer::default());

    let report = drain(&store, &h.stages, &config(tmp.path(), 10)).await.unwrap();

    assert!(h.recognizer.calls().is_empty());
    assert_eq!(store.queued().len(), 1);
    assert_eq!(store.content(101), None);
    assert_eq!(store.commit_count(), 0);

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.state, EntryState::Failed);
    assert_eq!(outcome.failed_at, Some(EntryState::Acquiring));
    assert!(matches!(outcome.error, Some(EntryError::Fetch { .. })));
}

#[tokio::test]
async fn budget_limits_attempts() {
    let tmp = TempDir::new().unwrap();
    let store = two_entry_store();
    let h = Harness::happy();

    let report = drain(&store, &h.stages, &config(tmp.path(), 1)).await.unwrap();

    assert_eq!(h.acquirer.calls(), vec!["u1"]);
    assert_eq!(store.queued(), vec![entry(2, 102, "u2")]);
    assert_eq!(report.attempted, 1);
    assert_eq!(report.deferred, 1);
}

#[tokio::test]
async fn failures_consume_budget() {
    let tmp = TempDir::new().unwrap();
    let store = two_entry_store();
    let h = Harness::new(ScriptedAcquirer::failing(&["u1"]), ScriptedRecognizer::default());

    let report = drain(&store, &h.stages, &config(tmp.path(), 1)).await.unwrap();

    assert_eq!(h.acquirer.calls(), vec!["u1"]);
    assert_eq!(report.failed, 1);
    assert_eq!(report.completed, 0);
    assert_eq!(store.queued().len(), 2);
}

#[tokio::test]
async fn empty_queue_touches_no_stage() {
    let tmp = TempDir::new().unwrap();
    let store = MemoryQueueStore::new();
    let h = Harness::happy();

    let report = drain(&store, &h.stages, &config(tmp.path(), 10)).await.unwrap();

    assert!(h.acquirer.calls().is_empty());
    assert!(h.recognizer.calls().is_empty());
    assert_eq!(report.attempted, 0);
    assert!(report.outcomes.is_empty());
}

#[tokio::test]
async fn second_run_is_a_no_op() {
    let tmp = TempDir::new().unwrap();
    let store = two_entry_store();
    let h = Harness::happy();
    let cfg = config(tmp.path(), 10);

    drain(&store, &h.stages, &cfg).await.unwrap();
    let second = drain(&store, &h.stages, &cfg).await.unwrap();

    assert_eq!(second.attempted, 0);
    assert_eq!(h.recognizer.calls().len(), 2);
    assert_eq!(store.commit_count(), 2);
}

#[tokio::test]
async fn failed_entry_does_not_block_later_ones() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let store = two_entry_store();
    let h = Harness::new(
        ScriptedAcquirer::default(),
        ScriptedRecognizer::with_responses(vec![Err(recognition_error("HTTP 500"))]),
    );

    let report = drain(&store, &h.stages, &config(tmp.path(), 10)).await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(report.outcomes[0].failed_at, Some(EntryState::Recognizing));
    assert_eq!(store.queued(), vec![entry(1, 101, "u1")]);
    assert_eq!(store.content(101), None);
    assert_eq!(store.content(102).as_deref(), Some("text from img:u2"));
}

#[tokio::test]
async fn stored_text_replaces_existing_content() {
    let tmp = TempDir::new().unwrap();
    let store = MemoryQueueStore::new();
    store.insert_record(101, Some("stale".into()));
    store.push_entry(entry(1, 101, "u1"));
    let h = Harness::happy();

    drain(&store, &h.stages, &config(tmp.path(), 10)).await.unwrap();

    assert_eq!(store.content(101).as_deref(), Some("text from img:u1"));
}

// ── Fatal store errors ───────────────────────────────────────────────────────

#[tokio::test]
async fn commit_failure_aborts_the_run() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let store = two_entry_store();
    store.fail_commits(true);
    let h = Harness::happy();

    let err = drain(&store, &h.stages, &config(tmp.path(), 10))
        .await
        .unwrap_err();

    assert!(err.is_store());
    // The run stopped at the first entry.
    assert_eq!(h.acquirer.calls(), vec!["u1"]);
    assert_eq!(store.queued().len(), 2);
    assert_eq!(store.content(101), None);
    assert_eq!(store.rollback_count(), 1);
}

#[tokio::test]
async fn unreadable_queue_aborts_before_any_work() {
    let tmp = TempDir::new().unwrap();
    let store = two_entry_store();
    store.fail_reads(true);
    let h = Harness::happy();

    let err = drain(&store, &h.stages, &config(tmp.path(), 10))
        .await
        .unwrap_err();

    assert!(matches!(err, DrainError::Store { op: "select", .. }));
    assert!(h.acquirer.calls().is_empty());
}

// ── Entry-local edge cases ───────────────────────────────────────────────────

#[tokio::test]
async fn missing_target_record_is_entry_local() {
    let tmp = TempDir::new().unwrap();
    let store = MemoryQueueStore::new().with_entry(entry(2, 102, "u2"));
    store.push_entry(entry(1, 999, "u1"));
    let h = Harness::happy();

    let report = drain(&store, &h.stages, &config(tmp.path(), 10)).await.unwrap();

    let orphan = report.outcomes.iter().find(|o| o.entry_id == 1).unwrap();
    assert_eq!(orphan.failed_at, Some(EntryState::Persisting));
    assert_eq!(orphan.error, Some(EntryError::TargetMissing { target: 999 }));
    assert_eq!(store.queued(), vec![entry(1, 999, "u1")]);
    assert_eq!(report.completed, 1);
}

#[tokio::test]
async fn entry_without_image_fails_without_fetching() {
    let tmp = TempDir::new().unwrap();
    let store = MemoryQueueStore::new().with_entry(QueueEntry::new(1, 101, vec![]));
    let h = Harness::happy();

    let report = drain(&store, &h.stages, &config(tmp.path(), 10)).await.unwrap();

    assert!(h.acquirer.calls().is_empty());
    assert_eq!(
        report.outcomes[0].error,
        Some(EntryError::NoImageLocation { entry: 1 })
    );
    assert_eq!(store.queued().len(), 1);
}

#[tokio::test]
async fn only_first_image_is_processed() {
    let tmp = TempDir::new().unwrap();
    let store = MemoryQueueStore::new().with_entry(QueueEntry::new(
        1,
        101,
        vec!["first".into(), "second".into()],
    ));
    let h = Harness::happy();

    drain(&store, &h.stages, &config(tmp.path(), 10)).await.unwrap();

    assert_eq!(h.acquirer.calls(), vec!["first"]);
    assert_eq!(h.recognizer.calls(), vec!["img:first"]);
}

#[tokio::test]
async fn recognition_is_retried_when_configured() {
    let tmp = TempDir::new().unwrap();
    let store = MemoryQueueStore::new().with_entry(entry(1, 101, "u1"));
    let h = Harness::new(
        ScriptedAcquirer::default(),
        ScriptedRecognizer::with_responses(vec![
            Err(recognition_error("rate limited")),
            Ok("[담당업무]\n- 백엔드 개발".into()),
        ]),
    );
    let cfg = DrainConfig::builder()
        .staging_root(tmp.path())
        .recognition_retries(2)
        .retry_backoff_ms(1)
        .build()
        .unwrap();

    let report = drain(&store, &h.stages, &cfg).await.unwrap();

    assert_eq!(h.recognizer.calls().len(), 2);
    assert_eq!(report.outcomes[0].recognition_attempts, 2);
    assert_eq!(store.content(101).as_deref(), Some("[담당업무]\n- 백엔드 개발"));
}

#[tokio::test]
async fn recognized_text_is_stored_verbatim() {
    let tmp = TempDir::new().unwrap();
    let store = MemoryQueueStore::new().with_entry(entry(1, 101, "u1"));
    let recognized = "```\n[담당업무]  \r\n\r\n\r\n\r\n- 백엔드\u{200d}개발\n```";
    let h = Harness::new(
        ScriptedAcquirer::default(),
        ScriptedRecognizer::with_responses(vec![Ok(recognized.into())]),
    );

    let report = drain(&store, &h.stages, &config(tmp.path(), 10)).await.unwrap();

    assert!(report.all_succeeded());
    assert_eq!(store.content(101).as_deref(), Some(recognized));
    assert_eq!(report.outcomes[0].text_chars, recognized.chars().count());
}

#[tokio::test]
async fn no_retry_by_default() {
    let tmp = TempDir::new().unwrap();
    let store = MemoryQueueStore::new().with_entry(entry(1, 101, "u1"));
    let h = Harness::new(
        ScriptedAcquirer::default(),
        ScriptedRecognizer::with_responses(vec![Err(recognition_error("timeout"))]),
    );

    let report = drain(&store, &h.stages, &config(tmp.path(), 10)).await.unwrap();

    assert_eq!(h.recognizer.calls().len(), 1);
    assert_eq!(report.failed, 1);
}

#[tokio::test]
async fn blank_recognition_is_not_persisted() {
    let tmp = TempDir::new().unwrap();
    let store = MemoryQueueStore::new().with_entry(entry(1, 101, "u1"));
    let h = Harness::new(
        ScriptedAcquirer::default(),
        ScriptedRecognizer::with_responses(vec![Ok(" \n\t \r\n".into())]),
    );

    let report = drain(&store, &h.stages, &config(tmp.path(), 10)).await.unwrap();

    assert!(matches!(
        report.outcomes[0].error,
        Some(EntryError::Recognition { .. })
    ));
    assert_eq!(store.content(101), None);
    assert_eq!(store.queued().len(), 1);
}

#[tokio::test]
async fn transform_failure_skips_recognition() {
    let tmp = TempDir::new().unwrap();
    let store = MemoryQueueStore::new();
    store.insert_record(101, Some("previous".into()));
    store.push_entry(entry(1, 101, "u1"));
    let acquirer = Arc::new(ScriptedAcquirer::default());
    let recognizer = Arc::new(ScriptedRecognizer::default());
    let stages = Stages::new(acquirer.clone(), Arc::new(FailingTransformer), recognizer.clone());

    let report = drain(&store, &stages, &config(tmp.path(), 10)).await.unwrap();

    assert_eq!(acquirer.calls(), vec!["u1"]);
    assert!(recognizer.calls().is_empty());
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.state, EntryState::Failed);
    assert_eq!(outcome.failed_at, Some(EntryState::Transforming));
    assert!(matches!(outcome.error, Some(EntryError::Transform { .. })));
    assert_eq!(outcome.recognition_attempts, 0);
    assert_eq!(store.queued(), vec![entry(1, 101, "u1")]);
    assert_eq!(store.content(101).as_deref(), Some("previous"));
    assert_eq!(store.commit_count(), 0);
}

// ── Staging ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unusable_staging_root_fails_entries_not_the_run() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("staging");
    std::fs::write(&root, b"not a directory").unwrap();
    let store = two_entry_store();
    let h = Harness::happy();

    let report = drain(&store, &h.stages, &config(&root, 10)).await.unwrap();

    assert_eq!(report.attempted, 2);
    assert_eq!(report.failed, 2);
    assert_eq!(report.completed, 0);
    for outcome in &report.outcomes {
        assert_eq!(outcome.failed_at, Some(EntryState::Acquiring));
        assert!(matches!(outcome.error, Some(EntryError::Fetch { .. })));
    }
    assert!(h.recognizer.calls().is_empty());
    assert_eq!(store.queued().len(), 2);
    assert_eq!(store.commit_count(), 0);
    assert!(root.is_file());
}

#[tokio::test]
async fn staging_is_removed_after_the_run() {
    let tmp = TempDir::new().unwrap();
    let store = two_entry_store();
    let h = Harness::happy();

    drain(&store, &h.stages, &config(tmp.path(), 10)).await.unwrap();

    assert_eq!(leftover_run_dirs(tmp.path()), 0);
}

#[tokio::test]
async fn real_transformer_sends_500px_png() {
    let tmp = TempDir::new().unwrap();
    let store = MemoryQueueStore::new().with_entry(entry(1, 101, "https://img/1.jpg"));
    let recognizer = Arc::new(ScriptedRecognizer::default());
    let stages = Stages::new(
        Arc::new(PngAcquirer {
            width: 1000,
            height: 2000,
        }),
        Arc::new(PngTransformer),
        recognizer.clone(),
    );

    let report = drain(&store, &stages, &config(tmp.path(), 10)).await.unwrap();
    assert!(report.all_succeeded());

    let sent = recognizer.calls().remove(0);
    let png = STANDARD.decode(sent).unwrap();
    assert!(png.starts_with(&[0x89, b'P', b'N', b'G']));
    let img = image::load_from_memory(&png).unwrap();
    assert_eq!((img.width(), img.height()), (500, 1000));
}

// ── Progress & peek ──────────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingCallback {
    events: Mutex<Vec<String>>,
}

impl DrainProgressCallback for RecordingCallback {
    fn on_run_start(&self, pending: usize, planned: usize) {
        self.events.lock().unwrap().push(format!("run {pending}/{planned}"));
    }
    fn on_stage(&self, entry_id: i64, stage: EntryState) {
        self.events.lock().unwrap().push(format!("{entry_id} {stage}"));
    }
    fn on_entry_complete(&self, entry_id: i64, _target_id: i64, _text_chars: usize) {
        self.events.lock().unwrap().push(format!("{entry_id} ok"));
    }
    fn on_entry_error(&self, entry_id: i64, failed_at: EntryState, _error: &str) {
        self.events.lock().unwrap().push(format!("{entry_id} failed at {failed_at}"));
    }
    fn on_run_complete(&self, attempted: usize, completed: usize) {
        self.events.lock().unwrap().push(format!("done {completed}/{attempted}"));
    }
}

#[tokio::test]
async fn progress_events_follow_the_state_machine() {
    let tmp = TempDir::new().unwrap();
    let store = two_entry_store();
    let h = Harness::new(ScriptedAcquirer::failing(&["u2"]), ScriptedRecognizer::default());
    let cb = Arc::new(RecordingCallback::default());
    let cfg = DrainConfig::builder()
        .staging_root(tmp.path())
        .progress_callback(cb.clone() as Arc<dyn DrainProgressCallback>)
        .build()
        .unwrap();

    drain(&store, &h.stages, &cfg).await.unwrap();

    let events = cb.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            "run 2/2",
            "1 acquiring",
            "1 transforming",
            "1 recognizing",
            "1 persisting",
            "1 ok",
            "2 acquiring",
            "2 failed at acquiring",
            "done 1/2",
        ]
    );
}

#[tokio::test]
async fn peek_lists_without_side_effects() {
    let store = two_entry_store();

    let listed = peek(&store).await.unwrap();

    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].primary_image(), Some("u1"));
    assert_eq!(store.queued().len(), 2);
    assert_eq!(store.commit_count(), 0);
}

#[tokio::test]
async fn store_trait_object_can_drive_a_run() {
    let tmp = TempDir::new().unwrap();
    let store: Arc<dyn QueueStore> = Arc::new(two_entry_store());
    let h = Harness::happy();

    let report = drain(store.as_ref(), &h.stages, &config(tmp.path(), 10))
        .await
        .unwrap();
    assert_eq!(report.completed, 2);
    assert!(store.pending().await.unwrap().is_empty());
}
