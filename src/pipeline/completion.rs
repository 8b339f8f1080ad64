//! Direct-mode completion: one chat request per chunk, parsed into cards.
//!
//! The [`CompletionClient`] trait is the seam the orchestrator talks to;
//! [`LlmCompletionClient`] implements it over any edgequake-llm provider.
//!
//! ## Retry Strategy
//!
//! Provider errors (429, 503, dropped connections) are retried with
//! exponential backoff (`retry_backoff_ms * 2^attempt`). A reply that arrives
//! but cannot be parsed is not retried.

use super::batcher::Chunk;
use super::encode::encode_chunk;
use crate::config::StudySetConfig;
use crate::error::{Pdf2CardsError, UnitError};
use crate::output::{Card, RawCard};
use crate::prompts::schema_instructions;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Turns one chunk into study cards.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Request cards for `chunk`.
    ///
    /// Errors are scoped to the chunk; the caller logs them and moves on.
    async fn complete(
        &self,
        system_prompt: &str,
        schema: &Value,
        chunk: &Chunk<'_>,
    ) -> Result<Vec<Card>, UnitError>;
}

/// [`CompletionClient`] backed by an edgequake-llm provider.
pub struct LlmCompletionClient {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl LlmCompletionClient {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &StudySetConfig) -> Self {
        Self {
            provider,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        }
    }

    /// Resolve a provider from `config` and wrap it.
    pub fn from_config(config: &StudySetConfig) -> Result<Self, Pdf2CardsError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl CompletionClient for LlmCompletionClient {
    async fn complete(
        &self,
        system_prompt: &str,
        schema: &Value,
        chunk: &Chunk<'_>,
    ) -> Result<Vec<Card>, UnitError> {
        let started = Instant::now();
        let messages = build_messages(system_prompt, schema, chunk);
        let options = self.options();
        let mut last_err: Option<String> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "Chunk @{}: retry {}/{} after {}ms",
                    chunk.start, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match self.provider.chat(&messages, Some(&options)).await {
                Ok(response) => {
                    debug!(
                        "Chunk @{}: {} input tokens, {} output tokens, {:?}",
                        chunk.start,
                        response.prompt_tokens,
                        response.completion_tokens,
                        started.elapsed()
                    );
                    return parse_cards(&response.content).map_err(|detail| {
                        UnitError::InvalidResponse {
                            start: chunk.start,
                            detail,
                        }
                    });
                }
                Err(e) => {
                    let msg = e.to_string();
                    warn!("Chunk @{}: attempt {} failed: {}", chunk.start, attempt + 1, msg);
                    last_err = Some(msg);
                }
            }
        }

        Err(UnitError::CompletionFailed {
            start: chunk.start,
            retries: self.max_retries,
            detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}

/// System message (prompt + schema instructions) and one user message
/// carrying the chunk.
fn build_messages(system_prompt: &str, schema: &Value, chunk: &Chunk<'_>) -> Vec<ChatMessage> {
    let system = system_text(system_prompt, schema);
    let encoded = encode_chunk(chunk);

    let user = if encoded.images.is_empty() {
        ChatMessage::user(encoded.text.as_str())
    } else {
        ChatMessage::user_with_images(encoded.text.as_str(), encoded.images)
    };

    vec![ChatMessage::system(system.as_str()), user]
}

fn system_text(system_prompt: &str, schema: &Value) -> String {
    format!("{}\n\n{}", system_prompt, schema_instructions(schema))
}

// ── Response parsing ─────────────────────────────────────────────────────────

static RE_JSON_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json)?\s*\n(.*?)\n?```\s*$").unwrap());

#[derive(Deserialize)]
struct CardEnvelope {
    study_cards: Vec<RawCard>,
}

/// Parse a model reply of the form `{"study_cards": [{question, answer}, ...]}`.
///
/// Markdown fences around the JSON are tolerated. Cards with a blank side are
/// dropped; a reply that is not the expected object is an error.
pub fn parse_cards(content: &str) -> Result<Vec<Card>, String> {
    let trimmed = content.trim();
    let body = match RE_JSON_FENCES.captures(trimmed) {
        Some(caps) => caps.get(1).map_or(trimmed, |m| m.as_str()),
        None => trimmed,
    };

    let envelope: CardEnvelope =
        serde_json::from_str(body).map_err(|e| format!("not a study_cards object: {}", e))?;

    let total = envelope.study_cards.len();
    let cards: Vec<Card> = envelope
        .study_cards
        .into_iter()
        .filter_map(|raw| Card::new(&raw.question, &raw.answer))
        .collect();

    if cards.len() < total {
        debug!("Dropped {} blank card(s) of {}", total - cards.len(), total);
    }
    Ok(cards)
}

// ── Provider resolution ──────────────────────────────────────────────────────

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, Pdf2CardsError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        Pdf2CardsError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. `config.provider`, used as-is.
/// 2. `config.provider_name` with `config.model`.
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` when both are set.
/// 4. OpenAI when `OPENAI_API_KEY` is set.
/// 5. Whatever [`ProviderFactory::from_env`] detects.
pub fn resolve_provider(config: &StudySetConfig) -> Result<Arc<dyn LLMProvider>, Pdf2CardsError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        return create_provider(name, &config.model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|key| !key.is_empty()) {
        return create_provider("openai", &config.model);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| Pdf2CardsError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
