use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Conversation role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One conversation message.
///
/// For `Role::Tool` the content is itself JSON: a list of tool-result objects
/// (or a single object, depending on the dialect).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    /// Only meaningful on assistant messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(Role::Tool, content)
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = Some(calls);
        self
    }
}

/// A structured function invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Map::new(),
        }
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }
}

/// A tool declaration as supplied by the caller.
///
/// Opaque apart from its name. Both the OpenAI wrapper shape
/// (`{"type":"function","function":{"name":..}}`) and a flat
/// `{"name":..}` object are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolDefinition(pub Value);

impl ToolDefinition {
    pub fn name(&self) -> Option<&str> {
        self.0
            .get("function")
            .and_then(|f| f.get("name"))
            .or_else(|| self.0.get("name"))
            .and_then(Value::as_str)
    }

    pub fn as_json(&self) -> &Value {
        &self.0
    }
}

/// Inbound body of a generation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
}

impl GenerateRequest {
    /// Declared tools, with a missing or empty list treated as "no tools".
    pub fn tools(&self) -> &[ToolDefinition] {
        self.tools.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_definition_name_openai_shape() {
        let def = ToolDefinition(json!({
            "type": "function",
            "function": {"name": "getRecentChannelMessages", "parameters": {}}
        }));
        assert_eq!(def.name(), Some("getRecentChannelMessages"));
    }

    #[test]
    fn test_tool_definition_name_flat_shape() {
        let def = ToolDefinition(json!({"name": "lookup", "description": "x"}));
        assert_eq!(def.name(), Some("lookup"));
    }

    #[test]
    fn test_tool_definition_without_name() {
        let def = ToolDefinition(json!({"description": "nameless"}));
        assert_eq!(def.name(), None);
    }

    #[test]
    fn test_request_parses_roles_and_tool_calls() {
        let body = r#"{
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "", "tool_calls": [
                    {"name": "getRecentChannelMessages", "arguments": {"channelIndex": 1, "limit": 3}}
                ]},
                {"role": "tool", "content": "[{\"ok\":true}]"}
            ],
            "tools": []
        }"#;
        let req: GenerateRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.messages.len(), 4);
        assert_eq!(req.messages[2].role, Role::Assistant);
        let calls = req.messages[2].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].arguments["limit"], json!(3));
        assert!(req.tools().is_empty());
    }

    #[test]
    fn test_request_without_tools_field() {
        let req: GenerateRequest =
            serde_json::from_str(r#"{"messages":[{"role":"system","content":"x"}]}"#).unwrap();
        assert!(req.tools().is_empty());
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        let res: Result<Message, _> = serde_json::from_str(r#"{"role":"narrator","content":"x"}"#);
        assert!(res.is_err());
    }
}
