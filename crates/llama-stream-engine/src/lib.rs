//! Prompt templating and streaming output classification for chat models.
//!
//! A request flows through three stages:
//! - [`prompt::assemble`] renders the conversation in the dialect's grammar
//!   and tokenizes it;
//! - the engine's [`Generator`] produces token ids;
//! - [`StreamClassifier`] turns those ids back into text, control-token and
//!   tool-call events.
//!
//! [`SessionRegistry`] ties the stages together around the single shared
//! engine and owns shutdown.

pub mod backend;
pub mod cancel;
pub mod classifier;
pub mod dialect;
pub mod error;
pub mod mock;
pub mod prompt;
pub mod session;
pub mod tools;

pub use backend::{Engine, Generator, SamplingParams, StopPredicate, TokenCodec, TokenStream};
pub use cancel::CancellationToken;
pub use classifier::{ClassifierState, StreamClassifier};
pub use dialect::{dialect_for, Dialect, Segment};
pub use error::{EngineError, EngineResult, SessionError, ToolCallSyntaxError, ValidationError};
pub use session::{run_session, ActiveSession, EventStream, SessionRegistry, ShutdownOutcome, DEFAULT_MAX_TOKENS};
pub use tools::{ToolCallCodec, ToolWhitelist};
