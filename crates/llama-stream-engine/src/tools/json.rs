//! JSON call syntax: `{"name": .., "arguments": {..}}`, an array of those,
//! or one object per line.

use log::warn;
use serde_json::{Map, Value};

use llama_stream_types::ToolCall;

use super::{ToolCallCodec, ToolWhitelist};
use crate::error::ToolCallSyntaxError;

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

fn call_from_value(value: Value) -> Result<ToolCall, String> {
    let mut obj = match value {
        Value::Object(obj) => obj,
        other => return Err(format!("expected an object, got {other}")),
    };
    let name = match obj.remove("name") {
        Some(Value::String(name)) if !name.is_empty() => name,
        _ => return Err("missing function name".to_string()),
    };
    let arguments = match obj.remove("arguments") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(args)) => args,
        // Some models double-encode the arguments.
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(args)) => args,
            _ => return Err(format!("arguments of {name} are not an object: {raw:?}")),
        },
        Some(other) => return Err(format!("arguments of {name} are not an object: {other}")),
    };
    Ok(ToolCall { name, arguments })
}

/// Split the region text into candidate call values.
fn candidates(text: &str) -> Vec<Result<Value, String>> {
    let trimmed = text.trim();
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(items)) => items.into_iter().map(Ok).collect(),
        Ok(value) => vec![Ok(value)],
        Err(_) => trimmed
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|line| serde_json::from_str::<Value>(line).map_err(|e| format!("{line:?}: {e}")))
            .collect(),
    }
}

impl ToolCallCodec for JsonCodec {
    fn parse(&self, text: &str, whitelist: &ToolWhitelist) -> Result<Vec<ToolCall>, ToolCallSyntaxError> {
        let mut calls = Vec::new();
        for candidate in candidates(text) {
            let checked = candidate
                .and_then(call_from_value)
                .and_then(|call| whitelist.check(&call).map(|()| call));
            match checked {
                Ok(call) => calls.push(call),
                Err(reason) => warn!("[TOOLS] Dropping tool call: {reason}"),
            }
        }
        if calls.is_empty() {
            return Err(ToolCallSyntaxError::new(text));
        }
        Ok(calls)
    }

    fn format(&self, call: &ToolCall) -> String {
        serde_json::json!({"name": call.name, "arguments": call.arguments}).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llama_stream_types::ToolDefinition;
    use serde_json::json;

    fn declared(names: &[&str]) -> ToolWhitelist {
        let defs: Vec<_> = names
            .iter()
            .map(|n| ToolDefinition(json!({"type": "function", "function": {"name": n}})))
            .collect();
        ToolWhitelist::from_definitions(&defs)
    }

    #[test]
    fn test_parse_single_object() {
        let calls = JsonCodec
            .parse(r#"{"name": "search", "arguments": {"q": "rust"}}"#, &declared(&["search"]))
            .unwrap();
        assert_eq!(calls, vec![ToolCall::new("search").arg("q", "rust")]);
    }

    #[test]
    fn test_parse_array_with_string_arguments() {
        let text = r#"[{"name":"getRecentChannelMessages","arguments":"{\"channelIndex\":1,\"limit\":4}"}]"#;
        let calls = JsonCodec.parse(text, &ToolWhitelist::default()).unwrap();
        assert_eq!(calls[0].arguments["limit"], json!(4));
    }

    #[test]
    fn test_parse_json_lines() {
        let text = "\n{\"name\":\"a\",\"arguments\":{}}\nnot json\n{\"name\":\"b\"}\n";
        let calls = JsonCodec.parse(text, &declared(&["a", "b"])).unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].arguments.is_empty());
    }

    #[test]
    fn test_undeclared_and_invalid_calls_dropped() {
        let wl = declared(&["search"]);
        let text = r#"[{"name":"search","arguments":{}},{"name":"rm","arguments":{}},{"name":"getRecentChannelMessages","arguments":{"channelIndex":-2,"limit":1}}]"#;
        let calls = JsonCodec.parse(text, &wl).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "search");
    }

    #[test]
    fn test_nothing_survives_returns_raw_text() {
        let err = JsonCodec.parse("{\"name\": \"rm\"}", &ToolWhitelist::default()).unwrap_err();
        assert_eq!(err.text, "{\"name\": \"rm\"}");
    }

    #[test]
    fn test_format_round_trip() {
        let call = ToolCall::new("getChannelMessagesRange")
            .arg("channelIndex", 1)
            .arg("startDate", "2024-03-01")
            .arg("endDate", "2024-03-02");
        let text = JsonCodec.format(&call);
        assert_eq!(JsonCodec.parse(&text, &ToolWhitelist::default()).unwrap(), vec![call]);
    }
}
