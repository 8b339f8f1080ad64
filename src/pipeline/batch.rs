//! Batch coordination: submit work units as one asynchronous job, poll it to
//! a terminal state, fetch the result lines and route them back to their
//! destinations.
//!
//! ```text
//! NotSubmitted ─submit─▶ Submitted ─poll─▶ Polling ─┬─▶ Completed ─retrieve─▶ demultiplex
//!                                                   ├─▶ Failed    (failed / expired / cancelled)
//!                                                   └─▶ TimedOut  (poll budget exhausted)
//! ```
//!
//! The remote side is abstracted behind [`BatchChannel`]; the production
//! implementation is [`crate::pipeline::openai::OpenAiBatchChannel`].

use super::batcher::{self, Chunk};
use super::completion::parse_cards;
use super::encode::content_part;
use super::extract::PageRecord;
use crate::config::{PollPolicy, StudySetConfig};
use crate::error::{ChannelError, Pdf2CardsError, UnitError};
use crate::output::Card;
use crate::progress::ProgressCallback;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name of the request file written to the work directory before upload.
pub const REQUEST_FILE_NAME: &str = "batch_tasks.jsonl";

// ── Remote job types ─────────────────────────────────────────────────────────

/// Identifier of a remote batch job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalised status of a remote batch job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStatus {
    /// Accepted, not yet running (`validating`).
    Pending,
    /// Being processed (`in_progress`, `finalizing`).
    Running,
    /// Results are available.
    Completed,
    /// Terminal failure (`failed`, `expired`, `cancelled`); holds the raw status.
    Failed(String),
    /// Any other non-terminal status, e.g. `cancelling`.
    Other(String),
}

impl BatchStatus {
    /// Map an OpenAI batch status string.
    pub fn from_remote(status: &str) -> Self {
        match status {
            "validating" => BatchStatus::Pending,
            "in_progress" | "finalizing" => BatchStatus::Running,
            "completed" => BatchStatus::Completed,
            "failed" | "expired" | "cancelled" => BatchStatus::Failed(status.to_string()),
            other => BatchStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchStatus::Pending => f.write_str("pending"),
            BatchStatus::Running => f.write_str("running"),
            BatchStatus::Completed => f.write_str("completed"),
            BatchStatus::Failed(s) | BatchStatus::Other(s) => f.write_str(s),
        }
    }
}

/// Snapshot of a remote job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteBatch {
    pub status: BatchStatus,
    /// Set once the job completed with at least one result.
    pub output_file_id: Option<String>,
}

/// Transport to an asynchronous batch completion service.
#[async_trait]
pub trait BatchChannel: Send + Sync {
    /// Upload a JSONL request file and create a job for it.
    async fn submit(&self, jsonl: Vec<u8>) -> Result<JobHandle, ChannelError>;

    /// Current state of a job.
    async fn status(&self, handle: &JobHandle) -> Result<RemoteBatch, ChannelError>;

    /// Raw content of a result file.
    async fn fetch_output(&self, file_id: &str) -> Result<String, ChannelError>;
}

// ── Identifier mapping ───────────────────────────────────────────────────────

/// Where the cards of one request end up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Output CSV of the document the request came from.
    pub destination: PathBuf,
    /// First page of the request within that document; orders the cards.
    pub page_index: usize,
}

/// `custom_id` → [`Route`] for one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierMapping {
    routes: BTreeMap<String, Route>,
    destinations: Vec<PathBuf>,
}

impl IdentifierMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a destination; it appears in the demultiplexed output even
    /// if no result is routed to it.
    pub fn add_destination(&mut self, destination: impl Into<PathBuf>) {
        let destination = destination.into();
        if !self.destinations.contains(&destination) {
            self.destinations.push(destination);
        }
    }

    /// Route `custom_id` to `destination`, registering the destination.
    pub fn insert(&mut self, custom_id: impl Into<String>, destination: impl Into<PathBuf>, page_index: usize) {
        let destination = destination.into();
        self.add_destination(destination.clone());
        self.routes.insert(
            custom_id.into(),
            Route {
                destination,
                page_index,
            },
        );
    }

    pub fn get(&self, custom_id: &str) -> Option<&Route> {
        self.routes.get(custom_id)
    }

    pub fn contains(&self, custom_id: &str) -> bool {
        self.routes.contains_key(custom_id)
    }

    pub fn destinations(&self) -> &[PathBuf] {
        &self.destinations
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// One request of a batch job.
#[derive(Debug, Clone)]
pub struct WorkUnit<'a> {
    pub custom_id: String,
    pub pages: &'a [PageRecord],
}

/// Mapping for a single document split into `task-{n}` chunks.
///
/// Depends only on the page count, so a resumed run can rebuild it without
/// extracting the document again.
pub fn single_document_mapping(
    total_pages: usize,
    chunk_size: usize,
    destination: &Path,
) -> Result<IdentifierMapping, Pdf2CardsError> {
    if chunk_size == 0 {
        return Err(Pdf2CardsError::InvalidConfig("Chunk size must be ≥ 1".into()));
    }
    let mut mapping = IdentifierMapping::new();
    mapping.add_destination(destination);
    for n in 0..batcher::chunk_count(total_pages, chunk_size) {
        mapping.insert(format!("task-{n}"), destination, n * chunk_size);
    }
    Ok(mapping)
}

/// One unit per chunk of a single document.
pub fn single_document_units<'a>(
    pages: &'a [PageRecord],
    chunk_size: usize,
    destination: &Path,
) -> Result<(Vec<WorkUnit<'a>>, IdentifierMapping), Pdf2CardsError> {
    let mapping = single_document_mapping(pages.len(), chunk_size, destination)?;
    let units = batcher::chunks(pages, chunk_size)?
        .enumerate()
        .map(|(n, chunk): (usize, Chunk<'a>)| WorkUnit {
            custom_id: format!("task-{n}"),
            pages: chunk.pages,
        })
        .collect();
    Ok((units, mapping))
}

/// One unit per page across several documents, `doc-{d}-page-{p}`.
///
/// `documents` pairs each destination with its extracted pages.
pub fn multi_document_units<'a>(
    documents: &'a [(PathBuf, Vec<PageRecord>)],
) -> (Vec<WorkUnit<'a>>, IdentifierMapping) {
    let mut mapping = IdentifierMapping::new();
    let mut units = Vec::new();

    for (d, (destination, pages)) in documents.iter().enumerate() {
        mapping.add_destination(destination.clone());
        for (p, page) in pages.iter().enumerate() {
            let custom_id = format!("doc-{d}-page-{p}");
            mapping.insert(custom_id.clone(), destination.clone(), page.index);
            units.push(WorkUnit {
                custom_id,
                pages: std::slice::from_ref(page),
            });
        }
    }

    (units, mapping)
}

// ── Coordinator ──────────────────────────────────────────────────────────────

/// Drives one batch job through submission, polling and retrieval.
pub struct BatchCoordinator {
    channel: Arc<dyn BatchChannel>,
    model: String,
    temperature: f32,
    max_tokens: usize,
    poll: PollPolicy,
    work_dir: PathBuf,
    progress: Option<ProgressCallback>,
}

impl BatchCoordinator {
    pub fn new(channel: Arc<dyn BatchChannel>, config: &StudySetConfig, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            channel,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            poll: config.poll,
            work_dir: work_dir.into(),
            progress: config.progress_callback.clone(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Local copy of a job's result file.
    pub fn output_path(&self, handle: &JobHandle) -> PathBuf {
        self.work_dir
            .join(format!("batch-{}.output.jsonl", sanitize_file_component(handle.as_str())))
    }

    /// Build the JSONL request file for `units`.
    ///
    /// Every unit identifier must be routed by `mapping`.
    pub fn build_requests(
        &self,
        units: &[WorkUnit<'_>],
        mapping: &IdentifierMapping,
        system_prompt: &str,
        schema: &Value,
    ) -> Result<Vec<u8>, Pdf2CardsError> {
        let mut jsonl = Vec::new();
        for unit in units {
            if !mapping.contains(&unit.custom_id) {
                return Err(Pdf2CardsError::Internal(format!(
                    "work unit '{}' has no route",
                    unit.custom_id
                )));
            }
            let content: Vec<Value> = unit.pages.iter().map(content_part).collect();
            let line = json!({
                "custom_id": unit.custom_id,
                "method": "POST",
                "url": "/v1/chat/completions",
                "body": {
                    "model": self.model,
                    "temperature": self.temperature,
                    "max_tokens": self.max_tokens,
                    "messages": [
                        { "role": "system", "content": [{ "type": "text", "text": system_prompt }] },
                        { "role": "user", "content": content }
                    ],
                    "response_format": schema
                }
            });
            serde_json::to_writer(&mut jsonl, &line)
                .map_err(|e| Pdf2CardsError::Internal(format!("serialising request: {}", e)))?;
            jsonl.push(b'\n');
        }
        Ok(jsonl)
    }

    /// Write the request file and create the remote job.
    pub async fn submit(
        &self,
        units: &[WorkUnit<'_>],
        mapping: &IdentifierMapping,
        system_prompt: &str,
        schema: &Value,
    ) -> Result<JobHandle, Pdf2CardsError> {
        let jsonl = self.build_requests(units, mapping, system_prompt, schema)?;

        let request_path = self.work_dir.join(REQUEST_FILE_NAME);
        write_atomic(&request_path, &jsonl).map_err(|e| Pdf2CardsError::SubmissionFailed {
            detail: format!("writing {}: {}", request_path.display(), e),
        })?;
        info!(
            "Batch request file: {} requests → {}",
            units.len(),
            request_path.display()
        );

        let handle = self
            .channel
            .submit(jsonl)
            .await
            .map_err(|e| Pdf2CardsError::SubmissionFailed {
                detail: e.to_string(),
            })?;

        info!("Batch job created: {}", handle);
        if let Some(ref cb) = self.progress {
            cb.on_batch_submitted(handle.as_str(), units.len());
        }
        Ok(handle)
    }

    /// Poll until the job completes, fails or the poll budget runs out.
    pub async fn poll(&self, handle: &JobHandle) -> Result<RemoteBatch, Pdf2CardsError> {
        let mut interval = self.poll.initial_interval;

        for poll in 1..=self.poll.max_polls {
            let remote = self
                .channel
                .status(handle)
                .await
                .map_err(|e| Pdf2CardsError::PollFailed {
                    job_id: handle.to_string(),
                    detail: e.to_string(),
                })?;

            if let Some(ref cb) = self.progress {
                cb.on_batch_status(handle.as_str(), &remote.status, poll);
            }

            match remote.status {
                BatchStatus::Completed => {
                    info!("Batch job {} completed after {} status checks", handle, poll);
                    return Ok(remote);
                }
                BatchStatus::Failed(status) => {
                    return Err(Pdf2CardsError::BatchFailed {
                        job_id: handle.to_string(),
                        status,
                    });
                }
                ref status => {
                    info!("Batch job {} is {}; next check in {:?}", handle, status, interval);
                }
            }

            if poll < self.poll.max_polls {
                tokio::time::sleep(interval).await;
                interval = self.poll.next_interval(interval);
            }
        }

        Err(Pdf2CardsError::PollTimeout {
            job_id: handle.to_string(),
            polls: self.poll.max_polls,
        })
    }

    /// Result lines of a job, polling it to completion first.
    ///
    /// A local copy from an earlier run is replayed without contacting the
    /// remote side.
    pub async fn retrieve(&self, handle: &JobHandle) -> Result<Vec<String>, Pdf2CardsError> {
        let local = self.output_path(handle);
        if local.exists() {
            info!("Replaying stored results of {} from {}", handle, local.display());
            let content = std::fs::read_to_string(&local).map_err(|e| Pdf2CardsError::RetrieveFailed {
                job_id: handle.to_string(),
                detail: format!("reading {}: {}", local.display(), e),
            })?;
            return Ok(split_lines(&content));
        }

        let remote = self.poll(handle).await?;
        let Some(file_id) = remote.output_file_id else {
            warn!("Batch job {} completed without an output file", handle);
            return Ok(Vec::new());
        };

        let content = self
            .channel
            .fetch_output(&file_id)
            .await
            .map_err(|e| Pdf2CardsError::RetrieveFailed {
                job_id: handle.to_string(),
                detail: e.to_string(),
            })?;

        write_atomic(&local, content.as_bytes()).map_err(|e| Pdf2CardsError::RetrieveFailed {
            job_id: handle.to_string(),
            detail: format!("storing {}: {}", local.display(), e),
        })?;
        debug!("Stored {} bytes of results at {}", content.len(), local.display());

        Ok(split_lines(&content))
    }

    /// Remove the request and result files of a finished job.
    pub fn discard_artifacts(&self, handle: &JobHandle) {
        for path in [self.work_dir.join(REQUEST_FILE_NAME), self.output_path(handle)] {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Could not remove {}: {}", path.display(), e),
            }
        }
    }
}

fn split_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn sanitize_file_component(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Write via a temp file in the same directory, then rename over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

// ── Demultiplexing ───────────────────────────────────────────────────────────

/// Cards and per-record failures, grouped by destination.
#[derive(Debug, Default)]
pub struct Demultiplexed {
    /// Every destination of the mapping, possibly with no cards.
    pub outputs: BTreeMap<PathBuf, Vec<Card>>,
    /// Failed records that could be attributed to a destination.
    pub errors: BTreeMap<PathBuf, Vec<UnitError>>,
    /// Failed records with a missing or unknown identifier.
    pub unrouted: Vec<UnitError>,
}

impl Demultiplexed {
    pub fn error_count(&self) -> usize {
        self.errors.values().map(Vec::len).sum::<usize>() + self.unrouted.len()
    }
}

/// Route result lines to their destinations.
///
/// Malformed records are logged and skipped. Within a destination, cards are
/// ordered by the page index of their route; records for the same page keep
/// their order of appearance. Nothing is deduplicated.
pub fn demultiplex(lines: &[String], mapping: &IdentifierMapping) -> Demultiplexed {
    let mut result = Demultiplexed::default();
    let mut routed: BTreeMap<PathBuf, Vec<(usize, Vec<Card>)>> = BTreeMap::new();

    for destination in mapping.destinations() {
        result.outputs.insert(destination.clone(), Vec::new());
        routed.insert(destination.clone(), Vec::new());
    }

    for (n, line) in lines.iter().enumerate() {
        let record: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                let err = UnitError::RecordParseFailed {
                    custom_id: format!("line {}", n + 1),
                    detail: format!("invalid JSON: {}", e),
                };
                warn!("{}", err);
                result.unrouted.push(err);
                continue;
            }
        };

        let Some(custom_id) = record.get("custom_id").and_then(Value::as_str) else {
            let err = UnitError::RecordParseFailed {
                custom_id: format!("line {}", n + 1),
                detail: "missing custom_id".into(),
            };
            warn!("{}", err);
            result.unrouted.push(err);
            continue;
        };

        let Some(route) = mapping.get(custom_id) else {
            let err = UnitError::UnknownIdentifier {
                custom_id: custom_id.to_string(),
            };
            warn!("{}", err);
            result.unrouted.push(err);
            continue;
        };

        match record_cards(&record) {
            Ok(cards) => {
                debug!("{} → {} cards for {}", custom_id, cards.len(), route.destination.display());
                routed
                    .entry(route.destination.clone())
                    .or_default()
                    .push((route.page_index, cards));
            }
            Err(detail) => {
                let err = UnitError::RecordParseFailed {
                    custom_id: custom_id.to_string(),
                    detail,
                };
                warn!("{}", err);
                result
                    .errors
                    .entry(route.destination.clone())
                    .or_default()
                    .push(err);
            }
        }
    }

    for (destination, mut entries) in routed {
        entries.sort_by_key(|(page_index, _)| *page_index);
        let cards = entries.into_iter().flat_map(|(_, cards)| cards).collect();
        result.outputs.insert(destination, cards);
    }

    result
}

/// Cards carried by one result record.
fn record_cards(record: &Value) -> Result<Vec<Card>, String> {
    if let Some(error) = record.get("error").filter(|e| !e.is_null()) {
        return Err(format!("request failed: {}", error));
    }

    let response = record
        .get("response")
        .ok_or_else(|| "missing response".to_string())?;

    if let Some(code) = response.get("status_code").and_then(Value::as_u64) {
        if code != 200 {
            return Err(format!("status code {}", code));
        }
    }

    let content = response
        .pointer("/body/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing message content".to_string())?;

    parse_cards(content)
}
