//! Qwen 2.5 (ChatML): `<|im_start|>role\n .. <|im_end|>\n`, Hermes-style
//! tool definitions and `<tool_call>` control tokens.

use llama_stream_types::{DialectKind, ToolCall, ToolDefinition};

use super::{Dialect, Frame, Grammar, Segment, ToolFraming, ToolsPlacement};
use crate::backend::SamplingParams;
use crate::tools::{JsonCodec, ToolCallCodec};

const TOOLS_QUERY_START: &str = "\n\n# Tools\n\nYou may call one or more functions to assist with the user query.\n\n\
You are provided with function signatures within <tools></tools> XML tags:\n<tools>\n";

const TOOLS_QUERY_END: &str = "</tools>\n\nFor each function call, return a json object with function name and arguments within <tool_call></tool_call> XML tags:\n\
<tool_call>\n{\"name\": <function-name>, \"arguments\": <args-json-object>}\n</tool_call>";

const GRAMMAR: Grammar = Grammar {
    kind: DialectKind::Qwen,
    prefix: "",
    system: Frame::control("<|im_start|>system\n", "<|im_end|>\n"),
    after_system: "",
    tools_placement: ToolsPlacement::InsideSystem,
    user: Frame::control("<|im_start|>user\n", "<|im_end|>\n"),
    assistant: Frame::control("<|im_start|>assistant\n", "<|im_end|>\n"),
    tool_turn: Some(Frame::control("<|im_start|>user\n", "<|im_end|>\n")),
    tool_result: Frame::control("<tool_response>\n", "\n</tool_response>\n"),
    tool_results_must_be_list: false,
    second_message_must_be_user: false,
    generation_prompt: "<|im_start|>assistant\n",
    end_of_turn: "<|im_end|>",
    control_tokens: &[
        "<|endoftext|>",
        "<|im_start|>",
        "<|im_end|>",
        "<tool_call>",
        "</tool_call>",
        "<tool_response>",
        "</tool_response>",
    ],
    tool_framing: ToolFraming::SpecialTokens {
        open: "<tool_call>",
        close: Some("</tool_call>"),
    },
    sampling: SamplingParams {
        top_k: 40,
        top_p: 0.95,
        min_p: None,
        temperature: 0.15,
        repeat_penalty: 1.0,
    },
};

#[derive(Debug, Default, Clone, Copy)]
pub struct Qwen;

impl Dialect for Qwen {
    fn grammar(&self) -> &Grammar {
        &GRAMMAR
    }

    fn codec(&self) -> &dyn ToolCallCodec {
        &JsonCodec
    }

    fn render_tool_defs(&self, tools: &[ToolDefinition]) -> Vec<Segment> {
        if tools.is_empty() {
            return Vec::new();
        }
        let lines: Vec<String> = tools.iter().map(|t| t.as_json().to_string()).collect();
        vec![
            Segment::control(TOOLS_QUERY_START),
            Segment::literal(lines.join("\n")),
            Segment::control(TOOLS_QUERY_END),
        ]
    }

    fn render_tool_calls(&self, calls: &[ToolCall]) -> Vec<Segment> {
        calls
            .iter()
            .flat_map(|call| {
                [
                    Segment::control("<tool_call>\n"),
                    Segment::literal(self.render_tool_call(call)),
                    Segment::control("\n</tool_call>\n"),
                ]
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_defs_one_json_per_line() {
        let tools = vec![
            ToolDefinition(json!({"name": "a"})),
            ToolDefinition(json!({"name": "b"})),
        ];
        let segments = Qwen.render_tool_defs(&tools);
        assert_eq!(segments.len(), 3);
        assert!(segments[0].text().contains("# Tools"));
        assert_eq!(segments[1], Segment::literal("{\"name\":\"a\"}\n{\"name\":\"b\"}"));
        assert!(segments[2].text().ends_with("</tool_call>"));
    }

    #[test]
    fn test_tool_calls_wrapped_individually() {
        let calls = vec![ToolCall::new("a"), ToolCall::new("b").arg("n", 1)];
        let segments = Qwen.render_tool_calls(&calls);
        assert_eq!(segments.len(), 6);
        assert_eq!(segments[0], Segment::control("<tool_call>\n"));
        let second: serde_json::Value = serde_json::from_str(segments[4].text()).unwrap();
        assert_eq!(second, json!({"name": "b", "arguments": {"n": 1}}));
    }
}
