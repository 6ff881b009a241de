//! HTTP transports: streamable HTTP and legacy HTTP+SSE

use std::collections::{BTreeMap, VecDeque};
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response, Url};
use serde_json::Value;
use tracing::{debug, trace};

use crate::constants;
use crate::error::ToolError;
use crate::sse::{SseDecoder, SseFrame};

use super::jsonrpc::{parse_message, Notification, Request};
use super::RpcChannel;

const SESSION_HEADER: &str = "mcp-session-id";

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, ToolError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ToolError::InvalidConfig(format!("invalid header name '{}'", name)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| ToolError::InvalidConfig(format!("invalid value for header '{}'", name)))?;
        map.insert(name, value);
    }
    Ok(map)
}

fn check_status(response: &Response) -> Result<(), ToolError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(ToolError::Connect(format!("HTTP {}", status)))
    }
}

/// Pulls SSE frames out of a byte stream
struct FrameReader {
    body: ByteStream,
    decoder: SseDecoder,
    pending: VecDeque<SseFrame>,
}

impl FrameReader {
    fn new(response: Response) -> Self {
        Self {
            body: Box::pin(response.bytes_stream()),
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
        }
    }

    async fn next_frame(&mut self) -> Result<Option<SseFrame>, ToolError> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(Some(frame));
            }
            match self.body.next().await {
                Some(Ok(chunk)) => self.pending.extend(self.decoder.push(&chunk)),
                Some(Err(e)) => return Err(ToolError::Http(e)),
                None => return Ok(self.decoder.finish()),
            }
        }
    }

    /// Read frames until the response to `id` arrives
    async fn response_to(&mut self, id: i64) -> Result<Value, ToolError> {
        while let Some(frame) = self.next_frame().await? {
            if !matches!(frame.event.as_deref(), None | Some("message")) {
                trace!("Skipping SSE event {:?}", frame.event);
                continue;
            }
            match parse_message(&frame.data) {
                Some(message) if message.answers(id) => return message.into_result(),
                _ => trace!("Skipping unrelated SSE frame"),
            }
        }
        Err(ToolError::Protocol(format!(
            "event stream ended before response to request {}",
            id
        )))
    }
}

/// Streamable HTTP: every message is a POST to one endpoint
pub(crate) struct StreamableHttpChannel {
    name: String,
    client: Client,
    url: Url,
    headers: HeaderMap,
    session_id: Option<String>,
    next_id: i64,
}

impl StreamableHttpChannel {
    pub(crate) fn new(
        name: &str,
        client: Client,
        url: &str,
        headers: &BTreeMap<String, String>,
    ) -> Result<Self, ToolError> {
        let url = Url::parse(url).map_err(|e| ToolError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            name: name.to_string(),
            client,
            url,
            headers: header_map(headers)?,
            session_id: None,
            next_id: 1,
        })
    }

    async fn post(&mut self, body: String) -> Result<Response, ToolError> {
        let mut request = self
            .client
            .post(self.url.clone())
            .headers(self.headers.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(session_id) = &self.session_id {
            request = request.header(SESSION_HEADER, session_id.as_str());
        }

        let response = request.send().await?;
        check_status(&response)?;

        if let Some(session_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            if self.session_id.as_deref() != Some(session_id) {
                debug!(connection = %self.name, "Tool server assigned session id");
                self.session_id = Some(session_id.to_string());
            }
        }
        Ok(response)
    }
}

#[async_trait]
impl RpcChannel for StreamableHttpChannel {
    async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value, ToolError> {
        let id = self.next_id;
        self.next_id += 1;

        let body = serde_json::to_string(&Request::new(id, method, params))?;
        debug!(connection = %self.name, "Tool request [{}]: {}", id, method);
        let response = self.post(body).await?;

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if is_event_stream {
            return FrameReader::new(response).response_to(id).await;
        }

        let text = response.text().await?;
        match parse_message(&text) {
            Some(message) if message.answers(id) => message.into_result(),
            _ => Err(ToolError::Protocol(format!(
                "unexpected response to request {}",
                id
            ))),
        }
    }

    async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), ToolError> {
        let body = serde_json::to_string(&Notification::new(method, params))?;
        debug!(connection = %self.name, "Tool notification: {}", method);
        self.post(body).await?;
        Ok(())
    }

    async fn shutdown(&mut self) {
        let Some(session_id) = self.session_id.take() else {
            return;
        };
        let result = self
            .client
            .delete(self.url.clone())
            .headers(self.headers.clone())
            .header(SESSION_HEADER, session_id)
            .timeout(constants::tools::CLOSE_TIMEOUT)
            .send()
            .await;
        if let Err(e) = result {
            debug!(connection = %self.name, "Session termination failed: {}", e);
        }
    }
}

/// Legacy HTTP+SSE: responses arrive on a long-lived GET stream
pub(crate) struct SseChannel {
    name: String,
    client: Client,
    endpoint: Url,
    headers: HeaderMap,
    events: FrameReader,
    next_id: i64,
}

impl SseChannel {
    /// Open the event stream and wait for the `endpoint` announcement
    pub(crate) async fn connect(
        name: &str,
        client: Client,
        url: &str,
        headers: &BTreeMap<String, String>,
    ) -> Result<Self, ToolError> {
        let base = Url::parse(url).map_err(|e| ToolError::InvalidConfig(e.to_string()))?;
        let headers = header_map(headers)?;

        let response = client
            .get(base.clone())
            .headers(headers.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        check_status(&response)?;

        let mut events = FrameReader::new(response);
        let endpoint = loop {
            match events.next_frame().await? {
                Some(frame) if frame.event.as_deref() == Some("endpoint") => {
                    break base.join(frame.data.trim()).map_err(|e| {
                        ToolError::Protocol(format!("invalid endpoint '{}': {}", frame.data, e))
                    })?;
                }
                Some(_) => continue,
                None => {
                    return Err(ToolError::Protocol(
                        "event stream closed before endpoint announcement".into(),
                    ))
                }
            }
        };
        debug!(connection = %name, "SSE endpoint: {}", endpoint.path());

        Ok(Self {
            name: name.to_string(),
            client,
            endpoint,
            headers,
            events,
            next_id: 1,
        })
    }

    async fn post(&mut self, body: String) -> Result<(), ToolError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        check_status(&response)
    }
}

#[async_trait]
impl RpcChannel for SseChannel {
    async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value, ToolError> {
        let id = self.next_id;
        self.next_id += 1;

        let body = serde_json::to_string(&Request::new(id, method, params))?;
        debug!(connection = %self.name, "Tool request [{}]: {}", id, method);
        self.post(body).await?;
        self.events.response_to(id).await
    }

    async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), ToolError> {
        let body = serde_json::to_string(&Notification::new(method, params))?;
        debug!(connection = %self.name, "Tool notification: {}", method);
        self.post(body).await
    }

    async fn shutdown(&mut self) {
        // Dropping the GET stream ends the session server-side
        debug!(connection = %self.name, "Closing SSE session");
    }
}
