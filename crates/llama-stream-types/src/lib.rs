//! Shared request, conversation and stream-event types.
//!
//! These are the immutable inputs a caller builds once per request and the
//! events the engine hands back. Nothing here knows about a specific model.

mod dialect;
mod event;
mod message;

pub use dialect::DialectKind;
pub use event::StreamEvent;
pub use message::{GenerateRequest, Message, Role, ToolCall, ToolDefinition};

/// Opaque token id. Meaning is owned by the token codec of the inference engine.
pub type TokenId = i32;
