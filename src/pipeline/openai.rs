//! [`BatchChannel`] over the OpenAI Files + Batches REST API.
//!
//! | Step          | Request                                          |
//! |---------------|--------------------------------------------------|
//! | upload        | `POST {base}/files` (multipart, `purpose=batch`)  |
//! | create job    | `POST {base}/batches`                            |
//! | status        | `GET  {base}/batches/{id}`                       |
//! | output        | `GET  {base}/files/{id}/content`                 |
//!
//! GET requests are retried on 429/5xx and connection errors; POSTs are sent
//! once.

use super::batch::{BatchChannel, BatchStatus, JobHandle, RemoteBatch, REQUEST_FILE_NAME};
use crate::config::StudySetConfig;
use crate::error::{ChannelError, Pdf2CardsError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{multipart, Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

const CHAT_COMPLETIONS_ENDPOINT: &str = "/v1/chat/completions";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const MAX_ATTEMPTS: u32 = 4;

/// OpenAI Batch API client.
#[derive(Clone)]
pub struct OpenAiBatchChannel {
    client: Client,
    base_url: String,
    completion_window: String,
}

impl OpenAiBatchChannel {
    pub fn new(
        api_key: &str,
        base_url: &str,
        completion_window: impl Into<String>,
    ) -> Result<Self, Pdf2CardsError> {
        if api_key.trim().is_empty() {
            return Err(Pdf2CardsError::MissingCredentials {
                var: "OPENAI_API_KEY".into(),
            });
        }

        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
            .map_err(|_| Pdf2CardsError::InvalidConfig("OpenAI API key is not a valid header value".into()))?;
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .default_headers(headers)
            .build()
            .map_err(|e| Pdf2CardsError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            completion_window: completion_window.into(),
        })
    }

    /// Build from `config.api_key`, falling back to `OPENAI_API_KEY`.
    pub fn from_config(config: &StudySetConfig) -> Result<Self, Pdf2CardsError> {
        let api_key = match config.api_key {
            Some(ref key) => key.clone(),
            None => std::env::var("OPENAI_API_KEY").map_err(|_| Pdf2CardsError::MissingCredentials {
                var: "OPENAI_API_KEY".into(),
            })?,
        };
        Self::new(&api_key, &config.base_url, config.completion_window.clone())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Send a GET, retrying transient failures with exponential backoff.
    async fn get_with_retry(&self, url: &str) -> Result<Response, ChannelError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.client.get(url).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => {
                    let status = resp.status();
                    if should_retry(status) && attempt < MAX_ATTEMPTS {
                        warn!("GET {} returned {}; retrying ({}/{})", url, status, attempt, MAX_ATTEMPTS - 1);
                        tokio::time::sleep(retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(status_error(resp).await);
                }
                Err(err) => {
                    if is_retryable_error(&err) && attempt < MAX_ATTEMPTS {
                        warn!("GET {} failed: {}; retrying ({}/{})", url, err, attempt, MAX_ATTEMPTS - 1);
                        tokio::time::sleep(retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(ChannelError::Http(err.to_string()));
                }
            }
        }
    }
}

#[async_trait]
impl BatchChannel for OpenAiBatchChannel {
    async fn submit(&self, jsonl: Vec<u8>) -> Result<JobHandle, ChannelError> {
        let size = jsonl.len();
        let part = multipart::Part::bytes(jsonl)
            .file_name(REQUEST_FILE_NAME)
            .mime_str("application/jsonl")
            .map_err(|e| ChannelError::Http(e.to_string()))?;
        let form = multipart::Form::new().text("purpose", "batch").part("file", part);

        let file: FileObject = send_json(self.client.post(self.url("files")).multipart(form)).await?;
        debug!("Uploaded request file {} ({} bytes)", file.id, size);

        let body = json!({
            "input_file_id": file.id,
            "endpoint": CHAT_COMPLETIONS_ENDPOINT,
            "completion_window": self.completion_window,
        });
        let batch: BatchObject = send_json(self.client.post(self.url("batches")).json(&body)).await?;
        Ok(JobHandle::new(batch.id))
    }

    async fn status(&self, handle: &JobHandle) -> Result<RemoteBatch, ChannelError> {
        let url = self.url(&format!("batches/{}", handle.as_str()));
        let batch: BatchObject = decode(self.get_with_retry(&url).await?).await?;
        Ok(RemoteBatch {
            status: BatchStatus::from_remote(&batch.status),
            output_file_id: batch.output_file_id,
        })
    }

    async fn fetch_output(&self, file_id: &str) -> Result<String, ChannelError> {
        let url = self.url(&format!("files/{}/content", file_id));
        self.get_with_retry(&url)
            .await?
            .text()
            .await
            .map_err(|e| ChannelError::Decode(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct FileObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct BatchObject {
    id: String,
    status: String,
    #[serde(default)]
    output_file_id: Option<String>,
}

async fn send_json<T: serde::de::DeserializeOwned>(request: RequestBuilder) -> Result<T, ChannelError> {
    let resp = request
        .send()
        .await
        .map_err(|e| ChannelError::Http(e.to_string()))?;
    if !resp.status().is_success() {
        return Err(status_error(resp).await);
    }
    decode(resp).await
}

async fn decode<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T, ChannelError> {
    resp.json::<T>()
        .await
        .map_err(|e| ChannelError::Decode(e.to_string()))
}

async fn status_error(resp: Response) -> ChannelError {
    let status = resp.status().as_u16();
    let body = resp
        .text()
        .await
        .unwrap_or_else(|_| "<body unavailable>".to_string());
    ChannelError::Status { status, body }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_body() || err.is_request()
}

fn retry_backoff(attempt: u32) -> Duration {
    Duration::from_millis(500 * (1 << attempt.min(5)))
}
