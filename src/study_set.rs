//! Study-set orchestration: PDF(s) in, one `Question,Answer` CSV per PDF out.
//!
//! [`StudySetCreator`] owns the configuration and the three collaborators
//! (page extractor, completion client, batch channel). Per-document state
//! travels in a [`DocumentContext`] value, so one creator can process many
//! documents in sequence.
//!
//! | Entry point                              | Direct mode                        | Batch mode                             |
//! |------------------------------------------|------------------------------------|----------------------------------------|
//! | [`create_study_set`](StudySetCreator::create_study_set)   | chunk loop, offset checkpoint      | one job of `task-{n}` chunks           |
//! | [`create_study_sets`](StudySetCreator::create_study_sets) | each document on its own           | one job of `doc-{d}-page-{p}` requests |
//! | [`process_directory`](StudySetCreator::process_directory) | `in_dir/*.pdf` → `out_dir/<stem>.csv` | same                                 |

use crate::config::{ProcessingMode, StudySetConfig};
use crate::error::{Pdf2CardsError, UnitError};
use crate::output::{Card, DocumentFailure, DocumentSummary, RunSummary};
use crate::pipeline::batch::{self, BatchChannel, BatchCoordinator, IdentifierMapping, JobHandle};
use crate::pipeline::batcher;
use crate::pipeline::checkpoint::{self, Checkpoint, ProgressTracker};
use crate::pipeline::completion::{CompletionClient, LlmCompletionClient};
use crate::pipeline::extract::{PageExtractor, PageRecord, PdfiumExtractor};
use crate::pipeline::openai::OpenAiBatchChannel;
use crate::pipeline::writer;
use crate::prompts;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// File name of the shared checkpoint of a multi-document batch run.
pub const MULTI_BATCH_CHECKPOINT: &str = ".pdf2cards-batch.progress.json";

/// One input document and where its results and resume state live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentContext {
    pub input: PathBuf,
    pub output: PathBuf,
    pub checkpoint: PathBuf,
}

impl DocumentContext {
    /// Context with the default checkpoint `<output>.progress.json`.
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        let output = output.into();
        Self {
            input: input.into(),
            checkpoint: output.with_extension("progress.json"),
            output,
        }
    }

    pub fn with_checkpoint(mut self, checkpoint: impl Into<PathBuf>) -> Self {
        self.checkpoint = checkpoint.into();
        self
    }
}

/// Prompt and response schema shared by every request of a run.
struct RunPrompts {
    system_prompt: String,
    schema: Value,
}

impl RunPrompts {
    fn load(config: &StudySetConfig) -> Result<Self, Pdf2CardsError> {
        Ok(Self {
            system_prompt: prompts::load_prompt(config)?,
            schema: prompts::load_schema(config)?,
        })
    }
}

/// Generates study sets from PDFs.
///
/// # Example
/// ```rust,no_run
/// use edgequake_pdf2cards::{StudySetConfig, StudySetCreator};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = StudySetConfig::builder().chunk_size(5).build()?;
///     let creator = StudySetCreator::new(config);
///     let summary = creator.create_study_set("lecture.pdf", "lecture.csv").await?;
///     println!("{} cards", summary.cards_written);
///     Ok(())
/// }
/// ```
pub struct StudySetCreator {
    config: StudySetConfig,
    extractor: Arc<dyn PageExtractor>,
    completion: Option<Arc<dyn CompletionClient>>,
    batch_channel: Option<Arc<dyn BatchChannel>>,
}

impl StudySetCreator {
    /// Creator with the pdfium extractor. The completion client and batch
    /// channel are resolved from the configuration on first use.
    pub fn new(config: StudySetConfig) -> Self {
        let extractor = Arc::new(PdfiumExtractor::from_config(&config));
        Self {
            config,
            extractor,
            completion: None,
            batch_channel: None,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn PageExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_completion(mut self, completion: Arc<dyn CompletionClient>) -> Self {
        self.completion = Some(completion);
        self
    }

    pub fn with_batch_channel(mut self, channel: Arc<dyn BatchChannel>) -> Self {
        self.batch_channel = Some(channel);
        self
    }

    pub fn config(&self) -> &StudySetConfig {
        &self.config
    }

    // ── Entry points ─────────────────────────────────────────────────────

    /// Generate the study set of one PDF.
    ///
    /// `config.checkpoint_path` overrides the default checkpoint location.
    pub async fn create_study_set(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> Result<DocumentSummary, Pdf2CardsError> {
        let mut ctx = DocumentContext::new(input.as_ref(), output.as_ref());
        if let Some(ref path) = self.config.checkpoint_path {
            ctx = ctx.with_checkpoint(path);
        }
        let prompts = RunPrompts::load(&self.config)?;

        match self.config.mode {
            ProcessingMode::Direct => {
                let completion = self.completion_client()?;
                self.run_direct(&ctx, completion.as_ref(), &prompts).await
            }
            ProcessingMode::Batch => {
                let coordinator = self.coordinator(work_dir_for(&self.config, &ctx.output))?;
                self.run_single_batch(&ctx, &coordinator, &prompts).await
            }
        }
    }

    /// Generate study sets for several `(input, output)` pairs.
    ///
    /// Direct mode processes the documents one after another, each with its
    /// own checkpoint; a failing document is reported and the rest continue.
    /// Batch mode combines all pages into a single job with one shared
    /// checkpoint; documents that cannot be extracted are reported and left
    /// out.
    pub async fn create_study_sets(&self, jobs: &[(PathBuf, PathBuf)]) -> Result<RunSummary, Pdf2CardsError> {
        if jobs.is_empty() {
            return Ok(RunSummary::default());
        }
        let started = Instant::now();
        let prompts = RunPrompts::load(&self.config)?;

        let summary = match self.config.mode {
            ProcessingMode::Direct => {
                let completion = self.completion_client()?;
                let mut summary = RunSummary::default();
                for (input, output) in jobs {
                    let ctx = DocumentContext::new(input, output);
                    match self.run_direct(&ctx, completion.as_ref(), &prompts).await {
                        Ok(doc) => summary.documents.push(doc),
                        Err(e) => {
                            warn!("Skipping {}: {}", input.display(), e);
                            summary.failures.push(DocumentFailure {
                                input: input.clone(),
                                error: e.to_string(),
                            });
                        }
                    }
                }
                summary
            }
            ProcessingMode::Batch if jobs.len() == 1 => {
                let (input, output) = &jobs[0];
                let doc = self.create_study_set(input, output).await?;
                RunSummary {
                    documents: vec![doc],
                    ..Default::default()
                }
            }
            ProcessingMode::Batch => {
                let out_dir = parent_or_cwd(&jobs[0].1);
                let checkpoint = self
                    .config
                    .checkpoint_path
                    .clone()
                    .unwrap_or_else(|| out_dir.join(MULTI_BATCH_CHECKPOINT));
                let work_dir = self.config.work_dir.clone().unwrap_or(out_dir);
                let coordinator = self.coordinator(work_dir)?;
                self.run_multi_batch(jobs, &checkpoint, &coordinator, &prompts).await?
            }
        };

        info!(
            "Run complete: {} documents, {} cards, {} failed units, {} skipped documents, {:?}",
            summary.documents.len(),
            summary.total_cards(),
            summary.total_unit_errors(),
            summary.failures.len(),
            started.elapsed()
        );
        Ok(summary)
    }

    /// Process every PDF in `in_dir`, writing `out_dir/<stem>.csv` for each.
    pub async fn process_directory(
        &self,
        in_dir: impl AsRef<Path>,
        out_dir: impl AsRef<Path>,
    ) -> Result<RunSummary, Pdf2CardsError> {
        let in_dir = in_dir.as_ref();
        let out_dir = out_dir.as_ref();

        let inputs = discover_pdfs(in_dir)?;
        if inputs.is_empty() {
            return Err(Pdf2CardsError::NoDocuments {
                dir: in_dir.to_path_buf(),
            });
        }
        std::fs::create_dir_all(out_dir).map_err(|e| Pdf2CardsError::OutputWriteFailed {
            path: out_dir.to_path_buf(),
            detail: e.to_string(),
        })?;
        info!("Found {} PDFs in {}", inputs.len(), in_dir.display());

        let jobs: Vec<(PathBuf, PathBuf)> = inputs
            .into_iter()
            .map(|input| {
                let output = output_path_for(&input, out_dir);
                (input, output)
            })
            .collect();
        self.create_study_sets(&jobs).await
    }

    // ── Collaborators ────────────────────────────────────────────────────

    fn completion_client(&self) -> Result<Arc<dyn CompletionClient>, Pdf2CardsError> {
        match self.completion {
            Some(ref client) => Ok(Arc::clone(client)),
            None => Ok(Arc::new(LlmCompletionClient::from_config(&self.config)?)),
        }
    }

    fn coordinator(&self, work_dir: PathBuf) -> Result<BatchCoordinator, Pdf2CardsError> {
        let channel: Arc<dyn BatchChannel> = match self.batch_channel {
            Some(ref channel) => Arc::clone(channel),
            None => Arc::new(OpenAiBatchChannel::from_config(&self.config)?),
        };
        Ok(BatchCoordinator::new(channel, &self.config, work_dir))
    }

    async fn extract(&self, input: &Path) -> Result<Vec<PageRecord>, Pdf2CardsError> {
        let started = Instant::now();
        let pages = self.extractor.extract(input, self.config.text_only).await?;
        info!(
            "Extracted {} pages ({} rendered) from {} in {}ms",
            pages.len(),
            pages.iter().filter(|p| p.is_image()).count(),
            input.display(),
            started.elapsed().as_millis()
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_document_start(input, pages.len());
        }
        Ok(pages)
    }

    // ── Direct mode ──────────────────────────────────────────────────────

    async fn run_direct(
        &self,
        ctx: &DocumentContext,
        completion: &dyn CompletionClient,
        prompts: &RunPrompts,
    ) -> Result<DocumentSummary, Pdf2CardsError> {
        info!("Generating study set: {} → {}", ctx.input.display(), ctx.output.display());
        let chunk_size = self.config.chunk_size;
        let tracker = ProgressTracker::open(&ctx.checkpoint, self.config.no_resume)?;
        let pages = self.extract(&ctx.input).await?;

        let (offset, mut cards, resumed) = match tracker.load()? {
            Checkpoint::NotStarted => (0, Vec::new(), false),
            Checkpoint::InProgress { offset, cards } => {
                checkpoint::validate_offset(tracker.path(), offset, chunk_size, pages.len())?;
                info!("Resuming at page {} with {} cards", offset, cards.len());
                (offset, cards, true)
            }
            Checkpoint::AwaitingBatch { job_id, .. } => {
                return Err(Pdf2CardsError::CheckpointMismatch {
                    path: tracker.path().to_path_buf(),
                    detail: format!("it tracks batch job '{}', but this is a direct run", job_id),
                });
            }
        };

        let total_chunks = batcher::chunk_count(pages.len(), chunk_size);
        let resumed_chunks = batcher::chunk_count(offset, chunk_size);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_chunks_start(total_chunks, resumed_chunks);
        }

        let mut unit_errors: Vec<UnitError> = Vec::new();

        for chunk in batcher::chunks_from(&pages, chunk_size, offset)? {
            let chunk_num = chunk.start / chunk_size + 1;
            if let Some(ref cb) = self.config.progress_callback {
                cb.on_chunk_start(chunk_num, total_chunks);
            }

            match completion.complete(&prompts.system_prompt, &prompts.schema, &chunk).await {
                Ok(new_cards) => {
                    debug!("Chunk {}/{}: {} cards", chunk_num, total_chunks, new_cards.len());
                    if let Some(ref cb) = self.config.progress_callback {
                        cb.on_chunk_complete(chunk_num, total_chunks, new_cards.len());
                    }
                    cards.extend(new_cards);
                }
                Err(e) => {
                    warn!("Chunk {}/{} skipped: {}", chunk_num, total_chunks, e);
                    if let Some(ref cb) = self.config.progress_callback {
                        cb.on_chunk_error(chunk_num, total_chunks, &e.to_string());
                    }
                    unit_errors.push(e);
                }
            }

            tracker.save(&Checkpoint::InProgress {
                offset: chunk.end(),
                cards: cards.clone(),
            })?;
        }

        self.finish_document(&ctx.output, &cards).await?;
        tracker.clear()?;

        Ok(DocumentSummary {
            input: ctx.input.clone(),
            output: ctx.output.clone(),
            total_pages: Some(pages.len()),
            cards_written: cards.len(),
            unit_errors,
            resumed,
        })
    }

    // ── Batch mode ───────────────────────────────────────────────────────

    async fn run_single_batch(
        &self,
        ctx: &DocumentContext,
        coordinator: &BatchCoordinator,
        prompts: &RunPrompts,
    ) -> Result<DocumentSummary, Pdf2CardsError> {
        info!("Generating study set (batch): {} → {}", ctx.input.display(), ctx.output.display());
        let chunk_size = self.config.chunk_size;
        let tracker = ProgressTracker::open(&ctx.checkpoint, self.config.no_resume)?;

        let (handle, mapping, total_pages, resumed) = match tracker.load()? {
            Checkpoint::AwaitingBatch { job_id, routes } if !routes.is_empty() => {
                if let Some(other) = routes
                    .destinations()
                    .iter()
                    .find(|d| d.as_path() != ctx.output.as_path())
                {
                    return Err(Pdf2CardsError::CheckpointMismatch {
                        path: tracker.path().to_path_buf(),
                        detail: format!(
                            "batch job '{}' writes to {}, not {}",
                            job_id,
                            other.display(),
                            ctx.output.display()
                        ),
                    });
                }
                info!("Resuming batch job {}", job_id);
                (job_id, routes, None, true)
            }
            Checkpoint::AwaitingBatch { job_id, .. } => {
                info!("Resuming batch job {} (rebuilding routes)", job_id);
                let pages = self.extract(&ctx.input).await?;
                let mapping = batch::single_document_mapping(pages.len(), chunk_size, &ctx.output)?;
                (job_id, mapping, Some(pages.len()), true)
            }
            Checkpoint::NotStarted => {
                let pages = self.extract(&ctx.input).await?;
                let (units, mapping) = batch::single_document_units(&pages, chunk_size, &ctx.output)?;
                if units.is_empty() {
                    info!("{} has no pages; nothing to submit", ctx.input.display());
                    self.finish_document(&ctx.output, &[]).await?;
                    tracker.clear()?;
                    return Ok(DocumentSummary {
                        input: ctx.input.clone(),
                        output: ctx.output.clone(),
                        total_pages: Some(0),
                        cards_written: 0,
                        unit_errors: Vec::new(),
                        resumed: false,
                    });
                }
                let handle = coordinator
                    .submit(&units, &mapping, &prompts.system_prompt, &prompts.schema)
                    .await?;
                tracker.save(&Checkpoint::AwaitingBatch {
                    job_id: handle.clone(),
                    routes: mapping.clone(),
                })?;
                (handle, mapping, Some(pages.len()), false)
            }
            Checkpoint::InProgress { offset, .. } => {
                return Err(Pdf2CardsError::CheckpointMismatch {
                    path: tracker.path().to_path_buf(),
                    detail: format!("it tracks a direct run at page {}, but this is a batch run", offset),
                });
            }
        };

        let mut demuxed = self.collect_results(coordinator, &handle, &mapping).await?;
        let cards = demuxed.outputs.remove(&ctx.output).unwrap_or_default();
        let mut unit_errors = demuxed.errors.remove(&ctx.output).unwrap_or_default();
        unit_errors.append(&mut demuxed.unrouted);

        self.finish_document(&ctx.output, &cards).await?;
        tracker.clear()?;
        coordinator.discard_artifacts(&handle);

        Ok(DocumentSummary {
            input: ctx.input.clone(),
            output: ctx.output.clone(),
            total_pages,
            cards_written: cards.len(),
            unit_errors,
            resumed,
        })
    }

    async fn run_multi_batch(
        &self,
        jobs: &[(PathBuf, PathBuf)],
        checkpoint_path: &Path,
        coordinator: &BatchCoordinator,
        prompts: &RunPrompts,
    ) -> Result<RunSummary, Pdf2CardsError> {
        info!("Generating {} study sets in one batch job", jobs.len());
        let tracker = ProgressTracker::open(checkpoint_path, self.config.no_resume)?;
        let inputs: BTreeMap<&Path, &Path> = jobs.iter().map(|(i, o)| (o.as_path(), i.as_path())).collect();

        let mut failures = Vec::new();
        let mut page_counts: BTreeMap<PathBuf, usize> = BTreeMap::new();

        let (handle, mapping, resumed) = match tracker.load()? {
            Checkpoint::AwaitingBatch { job_id, routes } => {
                if routes.is_empty() {
                    return Err(Pdf2CardsError::CheckpointMismatch {
                        path: tracker.path().to_path_buf(),
                        detail: format!("batch job '{}' has no stored routes", job_id),
                    });
                }
                if let Some(unknown) = routes
                    .destinations()
                    .iter()
                    .find(|d| !inputs.contains_key(d.as_path()))
                {
                    return Err(Pdf2CardsError::CheckpointMismatch {
                        path: tracker.path().to_path_buf(),
                        detail: format!("batch job '{}' writes to {}, which is not part of this run", job_id, unknown.display()),
                    });
                }
                info!("Resuming batch job {} for {} documents", job_id, routes.destinations().len());
                (job_id, routes, true)
            }
            Checkpoint::NotStarted => {
                let mut documents: Vec<(PathBuf, Vec<PageRecord>)> = Vec::new();
                for (input, output) in jobs {
                    match self.extract(input).await {
                        Ok(pages) => {
                            page_counts.insert(output.clone(), pages.len());
                            documents.push((output.clone(), pages));
                        }
                        Err(e) if e.is_extraction_error() => {
                            warn!("Skipping {}: {}", input.display(), e);
                            failures.push(DocumentFailure {
                                input: input.clone(),
                                error: e.to_string(),
                            });
                        }
                        Err(e) => return Err(e),
                    }
                }

                let (units, mapping) = batch::multi_document_units(&documents);
                if units.is_empty() {
                    info!("No pages to submit");
                    let mut documents_out = Vec::new();
                    for destination in mapping.destinations() {
                        self.finish_document(destination, &[]).await?;
                        documents_out.push(self.document_summary(&inputs, destination, &page_counts, 0, Vec::new(), false));
                    }
                    tracker.clear()?;
                    return Ok(RunSummary {
                        documents: documents_out,
                        failures,
                        unrouted: Vec::new(),
                    });
                }

                let handle = coordinator
                    .submit(&units, &mapping, &prompts.system_prompt, &prompts.schema)
                    .await?;
                tracker.save(&Checkpoint::AwaitingBatch {
                    job_id: handle.clone(),
                    routes: mapping.clone(),
                })?;
                (handle, mapping, false)
            }
            Checkpoint::InProgress { offset, .. } => {
                return Err(Pdf2CardsError::CheckpointMismatch {
                    path: tracker.path().to_path_buf(),
                    detail: format!("it tracks a direct run at page {}, but this is a batch run", offset),
                });
            }
        };

        let mut demuxed = self.collect_results(coordinator, &handle, &mapping).await?;

        let mut documents = Vec::new();
        for (destination, cards) in &demuxed.outputs {
            self.finish_document(destination, cards).await?;
            let errors = demuxed.errors.remove(destination).unwrap_or_default();
            documents.push(self.document_summary(&inputs, destination, &page_counts, cards.len(), errors, resumed));
        }

        tracker.clear()?;
        coordinator.discard_artifacts(&handle);

        Ok(RunSummary {
            documents,
            failures,
            unrouted: std::mem::take(&mut demuxed.unrouted),
        })
    }

    async fn collect_results(
        &self,
        coordinator: &BatchCoordinator,
        handle: &JobHandle,
        mapping: &IdentifierMapping,
    ) -> Result<batch::Demultiplexed, Pdf2CardsError> {
        let lines = coordinator.retrieve(handle).await?;
        let demuxed = batch::demultiplex(&lines, mapping);
        info!(
            "Batch job {}: {} result records, {} failed",
            handle,
            lines.len(),
            demuxed.error_count()
        );
        Ok(demuxed)
    }

    fn document_summary(
        &self,
        inputs: &BTreeMap<&Path, &Path>,
        destination: &Path,
        page_counts: &BTreeMap<PathBuf, usize>,
        cards_written: usize,
        unit_errors: Vec<UnitError>,
        resumed: bool,
    ) -> DocumentSummary {
        DocumentSummary {
            input: inputs
                .get(destination)
                .map(|p| p.to_path_buf())
                .unwrap_or_default(),
            output: destination.to_path_buf(),
            total_pages: page_counts.get(destination).copied(),
            cards_written,
            unit_errors,
            resumed,
        }
    }

    async fn finish_document(&self, output: &Path, cards: &[Card]) -> Result<(), Pdf2CardsError> {
        writer::write_cards(output, cards).await?;
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_document_complete(output, cards.len());
        }
        Ok(())
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

/// Every `*.pdf` (case-insensitive) directly inside `dir`, sorted by name.
pub fn discover_pdfs(dir: &Path) -> Result<Vec<PathBuf>, Pdf2CardsError> {
    let entries = std::fs::read_dir(dir).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => Pdf2CardsError::PermissionDenied {
            path: dir.to_path_buf(),
        },
        _ => Pdf2CardsError::NoDocuments {
            dir: dir.to_path_buf(),
        },
    })?;

    let mut pdfs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
        })
        .collect();
    pdfs.sort();
    Ok(pdfs)
}

/// `out_dir/<stem>.csv` for `input`.
pub fn output_path_for(input: &Path, out_dir: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| "study_set".into());
    let mut name = stem;
    name.push(".csv");
    out_dir.join(name)
}

fn parent_or_cwd(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn work_dir_for(config: &StudySetConfig, output: &Path) -> PathBuf {
    config
        .work_dir
        .clone()
        .unwrap_or_else(|| parent_or_cwd(output))
}
