//! Tool-call codecs: conversion between structured [`ToolCall`]s and the
//! text a model writes inside a tool region.

pub mod catalog;
pub mod json;
pub mod pythonic;

use std::collections::HashSet;

use llama_stream_types::{ToolCall, ToolDefinition};

use crate::error::ToolCallSyntaxError;

pub use json::JsonCodec;
pub use pythonic::PythonicCodec;

/// Text <-> structured tool call conversion for one call syntax.
pub trait ToolCallCodec: Send + Sync {
    /// Parse every call in `text`. Invalid calls are dropped with a warning;
    /// if none survive the raw text comes back in the error.
    fn parse(&self, text: &str, whitelist: &ToolWhitelist) -> Result<Vec<ToolCall>, ToolCallSyntaxError>;

    /// Render one call the way the model would have written it.
    fn format(&self, call: &ToolCall) -> String;
}

/// Names a generated call may use.
///
/// Catalog functions are always allowed (subject to their signature); any
/// other name must have been declared in the request.
#[derive(Debug, Clone, Default)]
pub struct ToolWhitelist {
    declared: HashSet<String>,
}

impl ToolWhitelist {
    pub fn from_definitions(tools: &[ToolDefinition]) -> Self {
        Self {
            declared: tools.iter().filter_map(|t| t.name()).map(str::to_string).collect(),
        }
    }

    pub fn check(&self, call: &ToolCall) -> Result<(), String> {
        match catalog::lookup(&call.name) {
            Some(sig) => sig.validate(&call.arguments),
            None if self.declared.contains(&call.name) => Ok(()),
            None => Err(format!("{} is neither built in nor declared", call.name)),
        }
    }
}

/// Canonical wire form of a batch of calls: a JSON array.
pub fn encode_calls(calls: &[ToolCall]) -> String {
    serde_json::to_string(calls).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_whitelist_declared_and_catalog() {
        let wl = ToolWhitelist::from_definitions(&[ToolDefinition(json!({"function": {"name": "search"}}))]);
        assert!(wl.check(&ToolCall::new("search").arg("q", "x")).is_ok());
        assert!(wl.check(&ToolCall::new("other")).is_err());
        let valid = ToolCall::new("getRecentChannelMessages").arg("channelIndex", 1).arg("limit", 2);
        assert!(wl.check(&valid).is_ok());
        let invalid = ToolCall::new("getRecentChannelMessages").arg("channelIndex", 1);
        assert!(wl.check(&invalid).is_err());
    }

    #[test]
    fn test_encode_calls_is_array() {
        let out = encode_calls(&[ToolCall::new("a").arg("x", 1)]);
        assert_eq!(out, r#"[{"name":"a","arguments":{"x":1}}]"#);
    }
}
