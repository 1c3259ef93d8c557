//! Wire types for the assistant chat service.
//!
//! The service streams newline-delimited `data: {json}` events; each event is
//! tagged with a `type` of `text-delta`, `sources`, or `finish`. Field names
//! on the wire are camelCase.

use serde::{Deserialize, Serialize};

/// Message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Request body for one turn: full history plus the mode flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    pub messages: Vec<ChatMessage>,
    /// Ask the service to run its multi-source web search for this turn.
    pub deep_search: bool,
    /// Real-time data mode (weather, prices, headlines).
    pub is_live_mode: bool,
    /// Caller-supplied API key forwarded to the model provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_api_key: Option<String>,
}

impl TurnRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            deep_search: false,
            is_live_mode: false,
            user_api_key: None,
        }
    }
}

/// A search hit attached to an assistant reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
    /// Which provider produced the hit (e.g. "Stack Overflow").
    #[serde(default)]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
}

/// One streamed event from the chat service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChatEvent {
    #[serde(rename = "text-delta")]
    TextDelta {
        #[serde(rename = "textDelta")]
        text_delta: String,
    },
    #[serde(rename = "sources")]
    Sources { sources: Vec<Source> },
    #[serde(rename = "finish")]
    Finish,
}
