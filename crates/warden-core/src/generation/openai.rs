//! OpenAI-compatible chat completions client
//!
//! Streams `POST {base_url}/chat/completions` with `stream: true` and yields
//! `choices[0].delta.content` fragments until the `[DONE]` marker.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, Response};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::retry::{parse_retry_after, with_retry, RetryConfig};
use super::{FragmentStream, TextGenerator};
use crate::config::GenerationConfig;
use crate::constants;
use crate::error::GenerationError;
use crate::sse::SseDecoder;

const SYSTEM_PROMPT: &str = "You are a security assistant. Answer precisely and \
cite the tool output you were given when it is relevant.";

/// What one `data:` payload contributed
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ChunkEvent {
    Text(String),
    /// Role preamble, usage report, empty delta
    Skip,
    Done,
}

/// Interpret one SSE `data:` payload
pub(crate) fn parse_chunk(data: &str) -> Result<ChunkEvent, GenerationError> {
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(ChunkEvent::Done);
    }
    if data.is_empty() {
        return Ok(ChunkEvent::Skip);
    }

    let json: Value = serde_json::from_str(data)
        .map_err(|e| GenerationError::Stream(format!("invalid chunk: {}", e)))?;

    if let Some(error) = json.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(GenerationError::Stream(message));
    }

    match json
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
    {
        Some(text) if !text.is_empty() => Ok(ChunkEvent::Text(text.to_string())),
        _ => Ok(ChunkEvent::Skip),
    }
}

pub struct OpenAiCompatibleGenerator {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    timeout: Duration,
    retry: RetryConfig,
}

impl OpenAiCompatibleGenerator {
    pub fn from_config(config: &GenerationConfig) -> Result<Self, GenerationError> {
        let base = config.base_url.trim().trim_end_matches('/');
        if base.is_empty() {
            return Err(GenerationError::NotConfigured(
                "generation.base_url is empty".into(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(constants::generation::CONNECT_TIMEOUT)
            .build()?;

        let api_key = config.api_key();
        if api_key.is_none() {
            debug!(
                env = %config.api_key_env,
                "No API key in environment, sending unauthenticated requests"
            );
        }

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: config.timeout(),
            retry: RetryConfig::with_max_retries(config.max_retries),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_body(&self, prompt: &str) -> Value {
        let mut body = json!({
            "model": self.model,
            "stream": true,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt},
            ],
        });
        if let Some(temperature) = self.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.api_key {
            match HeaderValue::from_str(&format!("Bearer {}", key)) {
                Ok(value) => {
                    headers.insert(AUTHORIZATION, value);
                }
                Err(_) => warn!("API key contains invalid header characters, omitting it"),
            }
        }
        headers
    }

    async fn send(&self, body: &Value) -> Result<Response, GenerationError> {
        let response = self
            .client
            .post(&self.endpoint)
            .headers(self.headers())
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_http(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(GenerationError::Status {
            status: status.as_u16(),
            message,
            retry_after,
        })
    }

    fn map_http(&self, error: reqwest::Error) -> GenerationError {
        if error.is_timeout() {
            GenerationError::Timeout(self.timeout)
        } else {
            GenerationError::Http(error)
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiCompatibleGenerator {
    async fn generate(&self, prompt: &str) -> Result<FragmentStream, GenerationError> {
        let started = Instant::now();
        let body = self.request_body(prompt);
        let response = with_retry(&self.retry, || self.send(&body)).await?;
        info!(
            model = %self.model,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Generation stream opened"
        );
        Ok(Box::pin(fragments(response.bytes_stream(), self.timeout)))
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

struct FragmentState {
    bytes: ByteStream,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    error: Option<GenerationError>,
    timeout: Duration,
    finished: bool,
}

/// Turn a raw SSE body into text fragments
fn fragments<S>(bytes: S, timeout: Duration) -> impl Stream<Item = Result<String, GenerationError>>
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    let state = FragmentState {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        error: None,
        timeout,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(text) = state.pending.pop_front() {
                return Some((Ok(text), state));
            }
            if let Some(err) = state.error.take() {
                return Some((Err(err), state));
            }
            if state.finished {
                return None;
            }

            let frames = match state.bytes.next().await {
                Some(Ok(chunk)) => state.decoder.push(&chunk),
                Some(Err(e)) => {
                    state.finished = true;
                    let err = if e.is_timeout() {
                        GenerationError::Timeout(state.timeout)
                    } else {
                        GenerationError::Stream(e.to_string())
                    };
                    return Some((Err(err), state));
                }
                None => {
                    state.finished = true;
                    state.decoder.finish().into_iter().collect()
                }
            };

            for frame in frames {
                match parse_chunk(&frame.data) {
                    Ok(ChunkEvent::Text(text)) => state.pending.push_back(text),
                    Ok(ChunkEvent::Skip) => {}
                    Ok(ChunkEvent::Done) => {
                        debug!(
                            frames = state.decoder.frames_dispatched(),
                            "Generation stream done"
                        );
                        state.finished = true;
                        break;
                    }
                    // Fragments decoded before the error still go out first
                    Err(e) => {
                        state.finished = true;
                        state.error = Some(e);
                        break;
                    }
                }
            }
        }
    })
}
