use serde::{Deserialize, Serialize};

/// One classified unit of generated output.
///
/// Serialised as one NDJSON line on the wire. At most one of the three flags
/// is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub text: String,
    pub is_special: bool,
    pub is_tool: bool,
    pub is_error: bool,
}

impl StreamEvent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_special: false,
            is_tool: false,
            is_error: false,
        }
    }

    pub fn special(text: impl Into<String>) -> Self {
        Self {
            is_special: true,
            ..Self::text(text)
        }
    }

    pub fn tool(text: impl Into<String>) -> Self {
        Self {
            is_tool: true,
            ..Self::text(text)
        }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Self {
            is_error: true,
            ..Self::text(format!("Error: {message}"))
        }
    }

    /// Serialise as a single newline-terminated JSON line.
    pub fn to_ndjson(&self) -> String {
        let mut line = serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"text":"","is_special":false,"is_tool":false,"is_error":true}"#.to_string());
        line.push('\n');
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ndjson_line_shape() {
        let line = StreamEvent::text("hello").to_ndjson();
        assert_eq!(
            line,
            "{\"text\":\"hello\",\"is_special\":false,\"is_tool\":false,\"is_error\":false}\n"
        );
    }

    #[test]
    fn test_error_event_prefix() {
        let ev = StreamEvent::error("Server is shutting down");
        assert!(ev.is_error);
        assert_eq!(ev.text, "Error: Server is shutting down");
    }

    #[test]
    fn test_flags_are_exclusive() {
        let ev = StreamEvent::tool("[]");
        assert!(ev.is_tool && !ev.is_special && !ev.is_error);
        let ev = StreamEvent::special("<eos>");
        assert!(ev.is_special && !ev.is_tool && !ev.is_error);
    }
}
