//! # JARVIS Chat — streaming chat-service client
//!
//! Wire protocol types and a streaming HTTP client for the assistant's chat
//! endpoint. The service answers a `TurnRequest` with newline-delimited
//! `data: {json}` events (`text-delta`, `sources`, `finish`); the
//! `ChatBackend` trait is the seam the voice coordinator consumes, so tests
//! can substitute a scripted stream for the real endpoint.

pub mod client;
pub mod protocol;

pub use client::{ChatBackend, ChatClient, ChatError, SseDecoder};
pub use protocol::{ChatEvent, ChatMessage, Role, Source, TurnRequest};
