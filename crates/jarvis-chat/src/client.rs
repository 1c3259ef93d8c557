//! Streaming chat client.
//!
//! Submits a turn and decodes the `data:` event stream incrementally: chunks
//! may split a line anywhere, and unknown event types are skipped rather than
//! failing the turn.

use crate::protocol::{ChatEvent, TurnRequest};
use futures::future::BoxFuture;
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Chat API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Something that can run one chat turn, streaming events as they arrive.
/// The returned future resolves when the stream finishes; dropping it aborts
/// the turn.
pub trait ChatBackend: Send + Sync + 'static {
    fn submit(
        &self,
        request: TurnRequest,
        events: mpsc::UnboundedSender<ChatEvent>,
    ) -> BoxFuture<'static, Result<(), ChatError>>;
}

/// Incremental decoder for the `data: {json}` line protocol.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of the body; returns the events completed by it.
    pub fn push(&mut self, chunk: &str) -> Vec<ChatEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            if let Some(event) = Self::decode_line(line.trim()) {
                events.push(event);
            }
        }
        events
    }

    /// Decode whatever remains after the stream ends (a final unterminated line).
    pub fn finish(&mut self) -> Option<ChatEvent> {
        let rest = std::mem::take(&mut self.buffer);
        Self::decode_line(rest.trim())
    }

    fn decode_line(line: &str) -> Option<ChatEvent> {
        if line.is_empty() {
            return None;
        }
        let payload = line.strip_prefix("data:")?.trim_start();
        match serde_json::from_str::<ChatEvent>(payload) {
            Ok(event) => Some(event),
            Err(e) => {
                debug!("SseDecoder: skipping undecodable event: {}", e);
                None
            }
        }
    }
}

/// HTTP chat client against the assistant's chat endpoint.
#[derive(Debug, Clone)]
pub struct ChatClient {
    endpoint: String,
    client: reqwest::Client,
}

impl ChatClient {
    /// Build from environment: `JARVIS_CHAT_URL`.
    pub fn from_env() -> Result<Self, ChatError> {
        let endpoint = std::env::var("JARVIS_CHAT_URL")
            .map_err(|_| ChatError::Config("JARVIS_CHAT_URL not set".to_string()))?;
        Self::new(endpoint)
    }

    pub fn new(endpoint: impl Into<String>) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()?;
        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }
}

impl ChatBackend for ChatClient {
    fn submit(
        &self,
        request: TurnRequest,
        events: mpsc::UnboundedSender<ChatEvent>,
    ) -> BoxFuture<'static, Result<(), ChatError>> {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        Box::pin(async move {
            let response = client.post(&endpoint).json(&request).send().await?;
            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                warn!("ChatClient: API error {}: {}", status, body);
                return Err(ChatError::Api { status, body });
            }

            let mut decoder = SseDecoder::new();
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                for event in decoder.push(&String::from_utf8_lossy(&chunk)) {
                    let finished = matches!(event, ChatEvent::Finish);
                    let _ = events.send(event);
                    if finished {
                        return Ok(());
                    }
                }
            }
            if let Some(event) = decoder.finish() {
                let _ = events.send(event);
            }
            Ok(())
        })
    }
}
