//! Integration tests for the study-set pipeline.
//!
//! The PDF extractor, the chat model and the Batch API are replaced by
//! in-memory fakes so the orchestration (chunking, checkpoints, resume,
//! batch routing, CSV output) runs without pdfium or network access.

use async_trait::async_trait;
use edgequake_pdf2cards::pipeline::batch::single_document_mapping;
use edgequake_pdf2cards::pipeline::batcher::Chunk;
use edgequake_pdf2cards::pipeline::checkpoint::parse_checkpoint;
use edgequake_pdf2cards::study_set::MULTI_BATCH_CHECKPOINT;
use edgequake_pdf2cards::{
    BatchChannel, BatchStatus, Card, ChannelError, Checkpoint, CompletionClient, JobHandle, PageExtractor,
    PageRecord, Pdf2CardsError, PollPolicy, ProcessingMode, ProgressTracker, RemoteBatch, StudySetConfig,
    StudySetCreator, StudySetProgressCallback, UnitError,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// ── Fakes ────────────────────────────────────────────────────────────────────

/// Serves a fixed page count per file name; unknown files are "missing".
struct FakeExtractor {
    pages: BTreeMap<String, usize>,
    calls: Mutex<Vec<PathBuf>>,
}

impl FakeExtractor {
    fn new(docs: &[(&str, usize)]) -> Arc<Self> {
        Arc::new(Self {
            pages: docs.iter().map(|(n, c)| (n.to_string(), *c)).collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl PageExtractor for FakeExtractor {
    async fn extract(&self, path: &Path, _text_only: bool) -> Result<Vec<PageRecord>, Pdf2CardsError> {
        self.calls.lock().unwrap().push(path.to_path_buf());
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        match self.pages.get(name) {
            Some(&count) => Ok((0..count)
                .map(|i| PageRecord::text(i, format!("{name} page {i}")))
                .collect()),
            None => Err(Pdf2CardsError::FileNotFound {
                path: path.to_path_buf(),
            }),
        }
    }
}

/// One card per page; records the chunk starts it saw and the checkpoint
/// offset on disk at that moment.
struct RecordingCompletion {
    checkpoint: Option<PathBuf>,
    fail_at: BTreeSet<usize>,
    starts: Mutex<Vec<usize>>,
    offsets_on_disk: Mutex<Vec<usize>>,
}

impl RecordingCompletion {
    fn new() -> Arc<Self> {
        Self::build(None, &[])
    }

    fn watching(checkpoint: &Path) -> Arc<Self> {
        Self::build(Some(checkpoint.to_path_buf()), &[])
    }

    fn failing_at(starts: &[usize]) -> Arc<Self> {
        Self::build(None, starts)
    }

    fn build(checkpoint: Option<PathBuf>, fail_at: &[usize]) -> Arc<Self> {
        Arc::new(Self {
            checkpoint,
            fail_at: fail_at.iter().copied().collect(),
            starts: Mutex::new(Vec::new()),
            offsets_on_disk: Mutex::new(Vec::new()),
        })
    }

    fn starts(&self) -> Vec<usize> {
        self.starts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionClient for RecordingCompletion {
    async fn complete(&self, system_prompt: &str, _schema: &Value, chunk: &Chunk<'_>) -> Result<Vec<Card>, UnitError> {
        assert!(system_prompt.contains("english"), "language must be substituted");
        self.starts.lock().unwrap().push(chunk.start);

        if let Some(ref path) = self.checkpoint {
            let offset = match std::fs::read_to_string(path) {
                Ok(raw) => match parse_checkpoint(&raw).unwrap() {
                    Checkpoint::InProgress { offset, .. } => offset,
                    other => panic!("unexpected checkpoint {other:?}"),
                },
                Err(_) => 0,
            };
            self.offsets_on_disk.lock().unwrap().push(offset);
        }

        if self.fail_at.contains(&chunk.start) {
            return Err(UnitError::CompletionFailed {
                start: chunk.start,
                retries: 0,
                detail: "scripted failure".into(),
            });
        }

        Ok(chunk
            .pages
            .iter()
            .map(|p| card(&format!("Q{}", p.index), &format!("A{}", p.index)))
            .collect())
    }
}

/// Batch API that answers every submitted request with one card named
/// after its `custom_id`. Results come back in reverse order.
struct EchoChannel {
    custom_ids: Mutex<Vec<String>>,
    submissions: Mutex<usize>,
    broken: Option<String>,
}

impl EchoChannel {
    fn new() -> Arc<Self> {
        Self::build(&[], None)
    }

    fn breaking(custom_id: &str) -> Arc<Self> {
        Self::build(&[], Some(custom_id))
    }

    /// A channel whose job was already submitted by an earlier run.
    fn already_submitted(custom_ids: &[&str]) -> Arc<Self> {
        Self::build(custom_ids, None)
    }

    fn build(custom_ids: &[&str], broken: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            custom_ids: Mutex::new(custom_ids.iter().map(|s| s.to_string()).collect()),
            submissions: Mutex::new(0),
            broken: broken.map(str::to_string),
        })
    }

    fn submissions(&self) -> usize {
        *self.submissions.lock().unwrap()
    }
}

#[async_trait]
impl BatchChannel for EchoChannel {
    async fn submit(&self, jsonl: Vec<u8>) -> Result<JobHandle, ChannelError> {
        *self.submissions.lock().unwrap() += 1;
        let text = String::from_utf8(jsonl).unwrap();
        let ids = text
            .lines()
            .map(|line| {
                let request: Value = serde_json::from_str(line).unwrap();
                assert_eq!(request["url"], "/v1/chat/completions");
                request["custom_id"].as_str().unwrap().to_string()
            })
            .collect();
        *self.custom_ids.lock().unwrap() = ids;
        Ok(JobHandle::new("batch_echo"))
    }

    async fn status(&self, _handle: &JobHandle) -> Result<RemoteBatch, ChannelError> {
        Ok(RemoteBatch {
            status: BatchStatus::Completed,
            output_file_id: Some("file_echo".into()),
        })
    }

    async fn fetch_output(&self, _file_id: &str) -> Result<String, ChannelError> {
        let ids = self.custom_ids.lock().unwrap().clone();
        let lines: Vec<String> = ids
            .iter()
            .rev()
            .map(|id| {
                let content = if self.broken.as_deref() == Some(id.as_str()) {
                    "this is not json".to_string()
                } else {
                    json!({"study_cards": [{"question": format!("Q {id}"), "answer": "A"}]}).to_string()
                };
                json!({
                    "custom_id": id,
                    "response": {
                        "status_code": 200,
                        "body": {"choices": [{"message": {"role": "assistant", "content": content}}]}
                    },
                    "error": null
                })
                .to_string()
            })
            .collect();
        Ok(lines.join("\n"))
    }
}

/// Reads the checkpoint when the CSV has been written, just before it is
/// cleared.
struct FinalOffsetWatcher {
    checkpoint: PathBuf,
    seen: Mutex<Option<usize>>,
}

impl StudySetProgressCallback for FinalOffsetWatcher {
    fn on_document_complete(&self, _output: &Path, _card_count: usize) {
        let raw = std::fs::read_to_string(&self.checkpoint).unwrap();
        if let Checkpoint::InProgress { offset, .. } = parse_checkpoint(&raw).unwrap() {
            *self.seen.lock().unwrap() = Some(offset);
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn card(q: &str, a: &str) -> Card {
    Card::new(q, a).unwrap()
}

fn direct_config(chunk_size: usize) -> StudySetConfig {
    StudySetConfig::builder().chunk_size(chunk_size).build().unwrap()
}

fn batch_config(work_dir: &Path) -> StudySetConfig {
    StudySetConfig::builder()
        .mode(ProcessingMode::Batch)
        .chunk_size(10)
        .work_dir(work_dir)
        .poll(PollPolicy::immediate(3))
        .build()
        .unwrap()
}

fn read_rows(path: &Path) -> Vec<(String, String)> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    assert_eq!(reader.headers().unwrap().iter().collect::<Vec<_>>(), vec!["Question", "Answer"]);
    reader
        .records()
        .map(|r| {
            let r = r.unwrap();
            (r[0].to_string(), r[1].to_string())
        })
        .collect()
}

fn questions(path: &Path) -> Vec<String> {
    read_rows(path).into_iter().map(|(q, _)| q).collect()
}

fn checkpoint_of(output: &Path) -> PathBuf {
    output.with_extension("progress.json")
}

fn save_checkpoint(path: &Path, checkpoint: &Checkpoint) {
    let tracker = ProgressTracker::open(path, false).unwrap();
    tracker.save(checkpoint).unwrap();
}

// ── Direct mode ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn direct_run_checkpoints_after_every_chunk() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("lecture.csv");
    let completion = RecordingCompletion::watching(&checkpoint_of(&output));
    let watcher = Arc::new(FinalOffsetWatcher {
        checkpoint: checkpoint_of(&output),
        seen: Mutex::new(None),
    });
    let config = StudySetConfig::builder()
        .chunk_size(10)
        .progress_callback(watcher.clone())
        .build()
        .unwrap();

    let summary = StudySetCreator::new(config)
        .with_extractor(FakeExtractor::new(&[("lecture.pdf", 25)]))
        .with_completion(completion.clone())
        .create_study_set(dir.path().join("lecture.pdf"), &output)
        .await
        .unwrap();

    assert_eq!(completion.starts(), vec![0, 10, 20]);
    assert_eq!(*completion.offsets_on_disk.lock().unwrap(), vec![0, 10, 20]);
    assert_eq!(*watcher.seen.lock().unwrap(), Some(25));
    assert_eq!(summary.total_pages, Some(25));
    assert_eq!(summary.cards_written, 25);
    assert!(!summary.resumed);
    assert!(summary.unit_errors.is_empty());
    assert!(!checkpoint_of(&output).exists(), "checkpoint cleared on success");

    let rows = read_rows(&output);
    assert_eq!(rows.len(), 25);
    assert_eq!(rows[0], ("Q0".to_string(), "A0".to_string()));
    assert_eq!(rows[24], ("Q24".to_string(), "A24".to_string()));
}

#[tokio::test]
async fn direct_run_resumes_from_offset() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("lecture.csv");
    save_checkpoint(
        &checkpoint_of(&output),
        &Checkpoint::InProgress {
            offset: 10,
            cards: vec![card("earlier question", "earlier answer")],
        },
    );
    let completion = RecordingCompletion::new();

    let summary = StudySetCreator::new(direct_config(10))
        .with_extractor(FakeExtractor::new(&[("lecture.pdf", 25)]))
        .with_completion(completion.clone())
        .create_study_set(dir.path().join("lecture.pdf"), &output)
        .await
        .unwrap();

    assert_eq!(completion.starts(), vec![10, 20]);
    assert!(summary.resumed);
    assert_eq!(summary.cards_written, 16);

    let q = questions(&output);
    assert_eq!(q[0], "earlier question");
    assert_eq!(q[1], "Q10");
    assert_eq!(q.last().map(String::as_str), Some("Q24"));
}

#[tokio::test]
async fn legacy_checkpoint_is_resumed() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("lecture.csv");
    std::fs::write(checkpoint_of(&output), r#"{"progress": 20, "batch_job_id": null}"#).unwrap();
    let completion = RecordingCompletion::new();

    StudySetCreator::new(direct_config(10))
        .with_extractor(FakeExtractor::new(&[("lecture.pdf", 25)]))
        .with_completion(completion.clone())
        .create_study_set(dir.path().join("lecture.pdf"), &output)
        .await
        .unwrap();

    assert_eq!(completion.starts(), vec![20]);
    assert_eq!(questions(&output).len(), 5);
}

#[tokio::test]
async fn no_resume_starts_over() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("lecture.csv");
    save_checkpoint(&checkpoint_of(&output), &Checkpoint::InProgress { offset: 15, cards: Vec::new() });
    let completion = RecordingCompletion::new();

    let config = StudySetConfig::builder().chunk_size(5).no_resume(true).build().unwrap();
    let summary = StudySetCreator::new(config)
        .with_extractor(FakeExtractor::new(&[("lecture.pdf", 25)]))
        .with_completion(completion.clone())
        .create_study_set(dir.path().join("lecture.pdf"), &output)
        .await
        .unwrap();

    assert_eq!(completion.starts(), vec![0, 5, 10, 15, 20]);
    assert!(!summary.resumed);
    assert_eq!(summary.cards_written, 25);
}

#[tokio::test]
async fn offset_from_another_chunk_size_is_rejected() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("lecture.csv");
    save_checkpoint(&checkpoint_of(&output), &Checkpoint::InProgress { offset: 15, cards: Vec::new() });

    let err = StudySetCreator::new(direct_config(10))
        .with_extractor(FakeExtractor::new(&[("lecture.pdf", 25)]))
        .with_completion(RecordingCompletion::new())
        .create_study_set(dir.path().join("lecture.pdf"), &output)
        .await
        .unwrap_err();

    assert!(matches!(err, Pdf2CardsError::CheckpointMismatch { .. }), "{err}");
    assert!(checkpoint_of(&output).exists(), "checkpoint kept for inspection");
    assert!(!output.exists());
}

#[tokio::test]
async fn failed_chunk_is_reported_and_skipped() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("lecture.csv");
    let completion = RecordingCompletion::failing_at(&[10]);

    let summary = StudySetCreator::new(direct_config(10))
        .with_extractor(FakeExtractor::new(&[("lecture.pdf", 25)]))
        .with_completion(completion.clone())
        .create_study_set(dir.path().join("lecture.pdf"), &output)
        .await
        .unwrap();

    assert_eq!(completion.starts(), vec![0, 10, 20]);
    assert_eq!(summary.cards_written, 15);
    assert_eq!(summary.unit_errors.len(), 1);
    assert!(matches!(summary.unit_errors[0], UnitError::CompletionFailed { start: 10, .. }));
    assert!(!questions(&output).contains(&"Q10".to_string()));
}

#[tokio::test]
async fn concurrent_run_is_locked_out() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("lecture.csv");
    let _held = ProgressTracker::open(checkpoint_of(&output), false).unwrap();

    let err = StudySetCreator::new(direct_config(10))
        .with_extractor(FakeExtractor::new(&[("lecture.pdf", 5)]))
        .with_completion(RecordingCompletion::new())
        .create_study_set(dir.path().join("lecture.pdf"), &output)
        .await
        .unwrap_err();

    assert!(matches!(err, Pdf2CardsError::CheckpointLocked { .. }), "{err}");
}

#[tokio::test]
async fn lock_file_of_a_killed_run_does_not_block() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("lecture.csv");
    save_checkpoint(&checkpoint_of(&output), &Checkpoint::InProgress { offset: 15, cards: Vec::new() });
    let mut lock_name = checkpoint_of(&output).into_os_string();
    lock_name.push(".lock");
    std::fs::write(&lock_name, "999999").unwrap();

    let config = StudySetConfig::builder().chunk_size(5).no_resume(true).build().unwrap();
    let summary = StudySetCreator::new(config)
        .with_extractor(FakeExtractor::new(&[("lecture.pdf", 25)]))
        .with_completion(RecordingCompletion::new())
        .create_study_set(dir.path().join("lecture.pdf"), &output)
        .await
        .unwrap();

    assert_eq!(summary.cards_written, 25);
    assert!(!PathBuf::from(lock_name).exists(), "lock released at the end of the run");
}

#[tokio::test]
async fn unvalidated_zero_chunk_size_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("lecture.csv");
    save_checkpoint(&checkpoint_of(&output), &Checkpoint::InProgress { offset: 10, cards: Vec::new() });
    let mut config = StudySetConfig::default();
    config.chunk_size = 0;

    let err = StudySetCreator::new(config)
        .with_extractor(FakeExtractor::new(&[("lecture.pdf", 25)]))
        .with_completion(RecordingCompletion::new())
        .create_study_set(dir.path().join("lecture.pdf"), &output)
        .await
        .unwrap_err();

    assert!(matches!(err, Pdf2CardsError::InvalidConfig(_)), "{err}");
}

#[tokio::test]
async fn empty_document_writes_header_only() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("blank.csv");
    let completion = RecordingCompletion::new();

    let summary = StudySetCreator::new(direct_config(10))
        .with_extractor(FakeExtractor::new(&[("blank.pdf", 0)]))
        .with_completion(completion.clone())
        .create_study_set(dir.path().join("blank.pdf"), &output)
        .await
        .unwrap();

    assert!(completion.starts().is_empty());
    assert_eq!(summary.cards_written, 0);
    assert!(read_rows(&output).is_empty());
}

// ── Batch mode ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn single_document_batch_run() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("lecture.csv");
    let channel = EchoChannel::new();

    let summary = StudySetCreator::new(batch_config(dir.path()))
        .with_extractor(FakeExtractor::new(&[("lecture.pdf", 25)]))
        .with_batch_channel(channel.clone())
        .create_study_set(dir.path().join("lecture.pdf"), &output)
        .await
        .unwrap();

    assert_eq!(channel.submissions(), 1);
    assert_eq!(summary.cards_written, 3);
    assert_eq!(questions(&output), vec!["Q task-0", "Q task-1", "Q task-2"]);
    assert!(!checkpoint_of(&output).exists());
    assert!(!dir.path().join("batch_tasks.jsonl").exists(), "request file discarded");
}

#[tokio::test]
async fn awaiting_batch_checkpoint_skips_submission() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("lecture.csv");
    save_checkpoint(
        &checkpoint_of(&output),
        &Checkpoint::AwaitingBatch {
            job_id: JobHandle::new("batch_earlier"),
            routes: single_document_mapping(25, 10, &output).unwrap(),
        },
    );
    let extractor = FakeExtractor::new(&[("lecture.pdf", 25)]);
    let channel = EchoChannel::already_submitted(&["task-0", "task-1", "task-2"]);

    let summary = StudySetCreator::new(batch_config(dir.path()))
        .with_extractor(extractor.clone())
        .with_batch_channel(channel.clone())
        .create_study_set(dir.path().join("lecture.pdf"), &output)
        .await
        .unwrap();

    assert_eq!(channel.submissions(), 0, "the earlier job is reused");
    assert_eq!(extractor.call_count(), 0, "stored routes make extraction unnecessary");
    assert!(summary.resumed);
    assert_eq!(summary.total_pages, None);
    assert_eq!(questions(&output), vec!["Q task-0", "Q task-1", "Q task-2"]);
    assert!(!checkpoint_of(&output).exists());
}

#[tokio::test]
async fn batch_checkpoint_for_another_output_is_rejected() {
    let dir = TempDir::new().unwrap();
    let shared = dir.path().join("shared.progress.json");
    let old_output = dir.path().join("old.csv");
    let new_output = dir.path().join("new.csv");
    save_checkpoint(
        &shared,
        &Checkpoint::AwaitingBatch {
            job_id: JobHandle::new("batch_earlier"),
            routes: single_document_mapping(25, 10, &old_output).unwrap(),
        },
    );
    let channel = EchoChannel::already_submitted(&["task-0", "task-1", "task-2"]);
    let config = StudySetConfig::builder()
        .mode(ProcessingMode::Batch)
        .chunk_size(10)
        .checkpoint_path(&shared)
        .work_dir(dir.path())
        .poll(PollPolicy::immediate(3))
        .build()
        .unwrap();

    let err = StudySetCreator::new(config)
        .with_extractor(FakeExtractor::new(&[("lecture.pdf", 25)]))
        .with_batch_channel(channel)
        .create_study_set(dir.path().join("lecture.pdf"), &new_output)
        .await
        .unwrap_err();

    assert!(matches!(err, Pdf2CardsError::CheckpointMismatch { .. }), "{err}");
    assert!(shared.exists(), "the job can still be resumed for its own output");
    assert!(!new_output.exists());
}

#[tokio::test]
async fn malformed_record_is_isolated() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("lecture.csv");

    let summary = StudySetCreator::new(batch_config(dir.path()))
        .with_extractor(FakeExtractor::new(&[("lecture.pdf", 25)]))
        .with_batch_channel(EchoChannel::breaking("task-1"))
        .create_study_set(dir.path().join("lecture.pdf"), &output)
        .await
        .unwrap();

    assert_eq!(questions(&output), vec!["Q task-0", "Q task-2"]);
    assert_eq!(summary.unit_errors.len(), 1);
    assert!(matches!(
        &summary.unit_errors[0],
        UnitError::RecordParseFailed { custom_id, .. } if custom_id == "task-1"
    ));
}

#[tokio::test]
async fn two_documents_share_one_batch_job() {
    let dir = TempDir::new().unwrap();
    let out_dir = dir.path().join("cards");
    let jobs = vec![
        (dir.path().join("a.pdf"), out_dir.join("a.csv")),
        (dir.path().join("b.pdf"), out_dir.join("b.csv")),
    ];
    let channel = EchoChannel::new();

    let summary = StudySetCreator::new(batch_config(dir.path()))
        .with_extractor(FakeExtractor::new(&[("a.pdf", 3), ("b.pdf", 2)]))
        .with_batch_channel(channel.clone())
        .create_study_sets(&jobs)
        .await
        .unwrap();

    assert_eq!(channel.submissions(), 1);
    assert_eq!(summary.documents.len(), 2);
    assert_eq!(summary.total_cards(), 5);
    assert!(summary.failures.is_empty());
    assert_eq!(
        questions(&out_dir.join("a.csv")),
        vec!["Q doc-0-page-0", "Q doc-0-page-1", "Q doc-0-page-2"]
    );
    assert_eq!(questions(&out_dir.join("b.csv")), vec!["Q doc-1-page-0", "Q doc-1-page-1"]);
    assert!(!out_dir.join(MULTI_BATCH_CHECKPOINT).exists());

    let a = summary.documents.iter().find(|d| d.output.ends_with("a.csv")).unwrap();
    assert_eq!(a.input, dir.path().join("a.pdf"));
    assert_eq!(a.total_pages, Some(3));
}

#[tokio::test]
async fn unreadable_document_is_left_out_of_the_batch() {
    let dir = TempDir::new().unwrap();
    let out_dir = dir.path().join("cards");
    let jobs = vec![
        (dir.path().join("a.pdf"), out_dir.join("a.csv")),
        (dir.path().join("missing.pdf"), out_dir.join("missing.csv")),
        (dir.path().join("b.pdf"), out_dir.join("b.csv")),
    ];

    let summary = StudySetCreator::new(batch_config(dir.path()))
        .with_extractor(FakeExtractor::new(&[("a.pdf", 1), ("b.pdf", 1)]))
        .with_batch_channel(EchoChannel::new())
        .create_study_sets(&jobs)
        .await
        .unwrap();

    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].input, dir.path().join("missing.pdf"));
    assert_eq!(summary.documents.len(), 2);
    assert!(!out_dir.join("missing.csv").exists());
    assert_eq!(questions(&out_dir.join("b.csv")), vec!["Q doc-1-page-0"]);
}

#[tokio::test]
async fn direct_mode_keeps_going_after_a_failed_document() {
    let dir = TempDir::new().unwrap();
    let jobs = vec![
        (dir.path().join("missing.pdf"), dir.path().join("missing.csv")),
        (dir.path().join("a.pdf"), dir.path().join("a.csv")),
    ];

    let summary = StudySetCreator::new(direct_config(10))
        .with_extractor(FakeExtractor::new(&[("a.pdf", 4)]))
        .with_completion(RecordingCompletion::new())
        .create_study_sets(&jobs)
        .await
        .unwrap();

    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.documents.len(), 1);
    assert_eq!(summary.total_cards(), 4);
}

// ── Directory mode ───────────────────────────────────────────────────────────

#[tokio::test]
async fn directory_mode_processes_every_pdf() {
    let dir = TempDir::new().unwrap();
    let in_dir = dir.path().join("lectures");
    let out_dir = dir.path().join("cards");
    std::fs::create_dir_all(&in_dir).unwrap();
    for name in ["a.pdf", "B.PDF", "notes.txt"] {
        std::fs::write(in_dir.join(name), b"%PDF-1.7").unwrap();
    }

    let summary = StudySetCreator::new(direct_config(10))
        .with_extractor(FakeExtractor::new(&[("a.pdf", 2), ("B.PDF", 3)]))
        .with_completion(RecordingCompletion::new())
        .process_directory(&in_dir, &out_dir)
        .await
        .unwrap();

    assert_eq!(summary.documents.len(), 2);
    assert_eq!(summary.total_cards(), 5);
    assert_eq!(questions(&out_dir.join("a.csv")).len(), 2);
    assert_eq!(questions(&out_dir.join("B.csv")).len(), 3);
    assert!(!out_dir.join("notes.csv").exists());
}

#[tokio::test]
async fn directory_without_pdfs_is_an_error() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("readme.md"), b"# nothing").unwrap();

    let err = StudySetCreator::new(direct_config(10))
        .with_extractor(FakeExtractor::new(&[]))
        .with_completion(RecordingCompletion::new())
        .process_directory(dir.path(), dir.path().join("out"))
        .await
        .unwrap_err();

    assert!(matches!(err, Pdf2CardsError::NoDocuments { .. }), "{err}");
}
