//! Streaming transport: the trait seam and the SSE implementation.
//!
//! The connection manager only sees [`EventTransport`]; tests substitute a
//! scripted transport, production uses [`SseTransport`] over a long-lived
//! HTTP streaming response where each message is a discrete frame with a
//! `type` discriminator and a JSON payload.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use tracing::{debug, trace};

use crate::config::StreamConfig;
use crate::error::TransportError;

/// One discrete message unit delivered over the streaming transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// The `event` discriminator; `message` when the server sent none.
    pub event_type: String,
    /// Raw JSON body of the frame.
    pub data: String,
    /// Server-assigned frame id, used for replay on reconnect.
    pub id: Option<String>,
}

/// Parameters for one connection attempt.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub tenant_id: String,
    pub location_id: Option<String>,
    /// Frame id of the last frame seen, for `Last-Event-ID` replay.
    pub last_event_id: Option<String>,
}

pub type FrameStream = Pin<Box<dyn Stream<Item = Result<RawFrame, TransportError>> + Send>>;

/// The transport seam the connection manager drives.
#[async_trait]
pub trait EventTransport: Send + Sync {
    /// Open a streaming connection and return the frame stream.
    ///
    /// A returned stream that ends is treated as a transport failure by
    /// the caller; the server is expected to hold the connection open.
    async fn open(&self, params: &ConnectParams) -> Result<FrameStream, TransportError>;
}

// ============================================================================
// SSE Transport
// ============================================================================

/// Server-sent-events transport over reqwest.
pub struct SseTransport {
    client: reqwest::Client,
    base_url: String,
    headers: HeaderMap,
}

impl SseTransport {
    pub fn new(config: &StreamConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            // One long-lived streaming connection per host.
            .pool_max_idle_per_host(1)
            .build()
            .map_err(|e| TransportError::Connection(format!("failed to build HTTP client: {e}")))?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        for (name, value) in &config.auth_headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                TransportError::Connection(format!("invalid header name '{name}': {e}"))
            })?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::Connection(format!("invalid header value: {e}")))?;
            headers.insert(name, value);
        }

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            headers,
        })
    }
}

#[async_trait]
impl EventTransport for SseTransport {
    async fn open(&self, params: &ConnectParams) -> Result<FrameStream, TransportError> {
        let url = format!("{}/events/stream", self.base_url);

        let mut query: Vec<(&str, String)> = vec![("tenantId", params.tenant_id.clone())];
        if let Some(location_id) = &params.location_id {
            query.push(("locationId", location_id.clone()));
        }

        let mut request = self.client.get(&url).headers(self.headers.clone()).query(&query);
        if let Some(last_id) = &params.last_event_id {
            request = request.header("Last-Event-ID", last_id);
        }

        let response = request.send().await.map_err(TransportError::from)?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(TransportError::Http { status, message });
        }

        debug!("connected to event stream at {url}");

        let mut parser = SseParser::default();
        let frames = response.bytes_stream().flat_map(move |chunk| {
            let items = match chunk {
                Ok(bytes) => parser.push(bytes.as_ref()),
                Err(e) => vec![Err(TransportError::from(e))],
            };
            futures::stream::iter(items)
        });

        Ok(Box::pin(frames))
    }
}

// ============================================================================
// SSE wire parsing
// ============================================================================

/// Incremental SSE parser. Frames may span chunk boundaries, so bytes are
/// buffered until a complete line (and a blank-line frame terminator) has
/// arrived.
#[derive(Debug, Default)]
struct SseParser {
    buffer: String,
    event_type: String,
    data: String,
    id: Option<String>,
}

impl SseParser {
    /// Feed a chunk of bytes; returns every frame completed by it.
    fn push(&mut self, chunk: &[u8]) -> Vec<Result<RawFrame, TransportError>> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut out = Vec::new();
        while let Some(newline_idx) = self.buffer.find('\n') {
            let mut line = self.buffer[..newline_idx].to_string();
            if line.ends_with('\r') {
                line.pop();
            }
            self.buffer.drain(..=newline_idx);

            if line.is_empty() {
                if let Some(frame) = self.take_frame() {
                    out.push(Ok(frame));
                }
                continue;
            }
            if line.starts_with(':') {
                // Comment/keepalive line.
                continue;
            }

            let (key, value) = match line.split_once(':') {
                Some((key, value)) => (key, value.strip_prefix(' ').unwrap_or(value)),
                None => (line.as_str(), ""),
            };
            match key {
                "event" => self.event_type = value.to_string(),
                "data" => {
                    if !self.data.is_empty() {
                        self.data.push('\n');
                    }
                    self.data.push_str(value);
                }
                "id" => self.id = Some(value.to_string()),
                // Server retry hints are ignored; the connection manager
                // owns the backoff schedule.
                "retry" => {}
                _ => trace!("unknown SSE field: {key}"),
            }
        }
        out
    }

    fn take_frame(&mut self) -> Option<RawFrame> {
        if self.data.is_empty() {
            // Blank line without accumulated data: nothing to dispatch.
            self.event_type.clear();
            self.id = None;
            return None;
        }

        let event_type = if self.event_type.is_empty() {
            "message".to_string()
        } else {
            std::mem::take(&mut self.event_type)
        };
        self.event_type.clear();

        Some(RawFrame {
            event_type,
            data: std::mem::take(&mut self.data),
            id: self.id.take(),
        })
    }
}
