//! Configuration types for study-set generation.
//!
//! All run behaviour is controlled through [`StudySetConfig`], built via its
//! [`StudySetConfigBuilder`]. The builder validates the knobs whose bad values
//! would only surface deep inside a run (chunk size, poll budget).

use crate::error::Pdf2CardsError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default OpenAI REST endpoint used by the batch channel.
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Configuration for a study-set run.
///
/// # Example
/// ```rust
/// use edgequake_pdf2cards::{ProcessingMode, StudySetConfig};
///
/// let config = StudySetConfig::builder()
///     .chunk_size(5)
///     .mode(ProcessingMode::Batch)
///     .language("french")
///     .build()
///     .unwrap();
/// assert_eq!(config.chunk_size, 5);
/// ```
#[derive(Clone)]
pub struct StudySetConfig {
    /// LLM model identifier. Default: `gpt-4o-mini`.
    pub model: String,

    /// LLM provider name for direct mode (e.g. "openai", "anthropic").
    /// If None along with `provider`, the provider is auto-detected.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pages per completion request. Default: 10.
    pub chunk_size: usize,

    /// Direct chat completions or the asynchronous Batch API. Default: direct.
    pub mode: ProcessingMode,

    /// Never render pages; always send the text layer. Default: false.
    pub text_only: bool,

    /// Language the cards are written in; substituted for `[LANGUAGE]` in the
    /// prompt. Default: `english`.
    pub language: String,

    /// Discard any existing checkpoint before starting. Default: false.
    pub no_resume: bool,

    /// Sampling temperature. Default: 1.0.
    pub temperature: f32,

    /// Maximum tokens generated per request. Default: 4095.
    pub max_tokens: usize,

    /// Retries per chunk in direct mode. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled on every attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Literal system prompt. Takes precedence over `prompt_file`.
    pub system_prompt: Option<String>,

    /// File holding the system prompt template.
    pub prompt_file: Option<PathBuf>,

    /// File holding the `response_format` JSON schema.
    pub schema_file: Option<PathBuf>,

    /// Checkpoint location. Default: derived from the output path.
    pub checkpoint_path: Option<PathBuf>,

    /// Directory for batch request/result files. Default: next to the output.
    pub work_dir: Option<PathBuf>,

    /// How the batch job is polled.
    pub poll: PollPolicy,

    /// Shorter edge, in pixels, of rendered image pages. Default: 500.
    pub render_short_edge_px: u32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// OpenAI API key for batch mode. Falls back to `OPENAI_API_KEY`.
    pub api_key: Option<String>,

    /// OpenAI REST base URL for batch mode.
    pub base_url: String,

    /// Batch completion window. Default: `24h`.
    pub completion_window: String,

    /// Optional progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for StudySetConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            provider_name: None,
            provider: None,
            chunk_size: 10,
            mode: ProcessingMode::default(),
            text_only: false,
            language: "english".to_string(),
            no_resume: false,
            temperature: 1.0,
            max_tokens: 4095,
            max_retries: 2,
            retry_backoff_ms: 500,
            system_prompt: None,
            prompt_file: None,
            schema_file: None,
            checkpoint_path: None,
            work_dir: None,
            poll: PollPolicy::default(),
            render_short_edge_px: 500,
            password: None,
            api_key: None,
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            completion_window: "24h".to_string(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for StudySetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StudySetConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("chunk_size", &self.chunk_size)
            .field("mode", &self.mode)
            .field("text_only", &self.text_only)
            .field("language", &self.language)
            .field("no_resume", &self.no_resume)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("prompt_file", &self.prompt_file)
            .field("schema_file", &self.schema_file)
            .field("checkpoint_path", &self.checkpoint_path)
            .field("work_dir", &self.work_dir)
            .field("poll", &self.poll)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl StudySetConfig {
    /// Create a new builder for `StudySetConfig`.
    pub fn builder() -> StudySetConfigBuilder {
        StudySetConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`StudySetConfig`].
#[derive(Debug)]
pub struct StudySetConfigBuilder {
    config: StudySetConfig,
}

impl StudySetConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn chunk_size(mut self, n: usize) -> Self {
        self.config.chunk_size = n;
        self
    }

    pub fn mode(mut self, mode: ProcessingMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn text_only(mut self, v: bool) -> Self {
        self.config.text_only = v;
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.config.language = language.into();
        self
    }

    pub fn no_resume(mut self, v: bool) -> Self {
        self.config.no_resume = v;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn prompt_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.prompt_file = Some(path.into());
        self
    }

    pub fn schema_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.schema_file = Some(path.into());
        self
    }

    pub fn checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.checkpoint_path = Some(path.into());
        self
    }

    pub fn work_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.work_dir = Some(path.into());
        self
    }

    pub fn poll(mut self, policy: PollPolicy) -> Self {
        self.config.poll = policy;
        self
    }

    pub fn render_short_edge_px(mut self, px: u32) -> Self {
        self.config.render_short_edge_px = px.max(64);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn completion_window(mut self, window: impl Into<String>) -> Self {
        self.config.completion_window = window.into();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<StudySetConfig, Pdf2CardsError> {
        let c = &self.config;
        if c.chunk_size == 0 {
            return Err(Pdf2CardsError::InvalidConfig(
                "Chunk size must be ≥ 1".into(),
            ));
        }
        if c.model.trim().is_empty() {
            return Err(Pdf2CardsError::InvalidConfig("Model must not be empty".into()));
        }
        if c.max_tokens == 0 {
            return Err(Pdf2CardsError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        c.poll.validate()?;
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How completion requests reach the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProcessingMode {
    /// One chat completion per chunk, checkpointing the page offset. (default)
    #[default]
    Direct,
    /// One asynchronous Batch API job, checkpointing the job identifier.
    Batch,
}

/// Bounded exponential backoff for batch status polling.
///
/// The wait starts at `initial_interval`, is multiplied by `multiplier` after
/// every non-terminal status and never exceeds `max_interval`. After
/// `max_polls` status checks the run stops with
/// [`Pdf2CardsError::PollTimeout`], leaving the checkpoint for a later resume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PollPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    pub max_polls: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        // 10 s doubling up to 5 min; 320 polls comfortably covers a 24 h window.
        Self {
            initial_interval: Duration::from_secs(10),
            max_interval: Duration::from_secs(300),
            multiplier: 2.0,
            max_polls: 320,
        }
    }
}

impl PollPolicy {
    /// A policy that re-polls after a millisecond; useful in tests.
    pub fn immediate(max_polls: u32) -> Self {
        Self {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(1),
            multiplier: 1.0,
            max_polls,
        }
    }

    /// Wait to apply after a poll that used `current`.
    ///
    /// Saturates at `max_interval` instead of overflowing.
    pub fn next_interval(&self, current: Duration) -> Duration {
        Duration::try_from_secs_f64(current.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max_interval)
            .min(self.max_interval)
    }

    fn validate(&self) -> Result<(), Pdf2CardsError> {
        if self.max_polls == 0 {
            return Err(Pdf2CardsError::InvalidConfig(
                "max_polls must be ≥ 1".into(),
            ));
        }
        if self.initial_interval.is_zero() {
            return Err(Pdf2CardsError::InvalidConfig(
                "Poll interval must be greater than zero".into(),
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(Pdf2CardsError::InvalidConfig(format!(
                "Poll multiplier must be ≥ 1.0, got {}",
                self.multiplier
            )));
        }
        if self.initial_interval > self.max_interval {
            return Err(Pdf2CardsError::InvalidConfig(
                "Initial poll interval exceeds the maximum interval".into(),
            ));
        }
        Ok(())
    }
}
