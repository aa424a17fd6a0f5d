//! vlchat: chatting with a multimodal vision-language model over images and
//! video, with optional "thinking" output and character-level streaming.
//!
//! # Overview
//! The inference endpoint answers either with one complete text or with a
//! stream of cumulative snapshots framed as server-sent events. This crate
//! holds the client side of that contract:
//!
//! - Conversation data model and media placeholder encoding
//! - Post-processing: markup sanitizing, thinking/answer split, display layout
//! - A pull-based character feed over the snapshot stream, with cancellation
//! - Session state and the controller driving chat and few-shot turns
//! - An HTTP implementation of the endpoint (feature `http-client`)

/// Conversation turns, content items and attachments
pub mod chat;

/// Client configuration file
pub mod config;

/// Chat and few-shot flows over a session
pub mod controller;

/// Endpoint trait, wire types and the HTTP client
pub mod endpoint;

/// Error types and handling
pub mod error;

/// Generation parameters and decode presets
pub mod params;

pub mod session;

/// SSE framing and the character feed
pub mod stream;

pub mod text;

pub use chat::{Attachment, ChatRole, Content, ConversationTurn, MediaKind, UserInput};
pub use config::ClientConfig;
pub use controller::{ChatController, ControllerConfig, Reply, StreamingTurn, TurnOptions, TurnReport};
#[cfg(feature = "http-client")]
pub use endpoint::HttpEndpoint;
pub use endpoint::{Completion, EndpointRequest, InferenceEndpoint};
pub use error::DemoError;
pub use params::{DecodeMode, GenerationParams};
pub use session::{ChatMode, Session, SessionId, TranscriptEntry, TurnStatus};
pub use stream::{CancelFlag, CharStream, StreamEvent, StreamState};
pub use text::{DisplayPayload, ParsedResponse, Section};
