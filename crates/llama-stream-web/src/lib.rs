//! HTTP front end: Basic auth, a single-worker generation queue and NDJSON
//! streaming of session events.

pub mod auth;
pub mod generation_queue;
pub mod request_parsing;
pub mod response_helpers;
pub mod routes;
pub mod server;
pub mod shutdown;

pub use server::{handle_request, serve, AppState};
