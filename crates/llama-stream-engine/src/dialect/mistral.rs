//! Mistral Small 3.1: bracketed control tokens, JSON tool calls after
//! `[TOOL_CALLS]` with no closing token.

use llama_stream_types::{DialectKind, ToolCall, ToolDefinition};

use super::{Dialect, Frame, Grammar, Segment, ToolFraming, ToolsPlacement};
use crate::backend::SamplingParams;
use crate::tools::{JsonCodec, ToolCallCodec};

const TOOL_CALLS: &str = "[TOOL_CALLS]";

const GRAMMAR: Grammar = Grammar {
    kind: DialectKind::Mistral,
    prefix: "<s>",
    system: Frame::control("[SYSTEM_PROMPT]", "[/SYSTEM_PROMPT]"),
    after_system: "",
    tools_placement: ToolsPlacement::AfterSystem,
    user: Frame::control("[INST]", "[/INST]"),
    assistant: Frame::control("", "</s>"),
    tool_turn: None,
    tool_result: Frame::control("[TOOL_RESULTS]", "[/TOOL_RESULTS]"),
    tool_results_must_be_list: false,
    second_message_must_be_user: false,
    generation_prompt: "",
    end_of_turn: "</s>",
    control_tokens: &[
        "<s>",
        "</s>",
        "[SYSTEM_PROMPT]",
        "[/SYSTEM_PROMPT]",
        "[AVAILABLE_TOOLS]",
        "[/AVAILABLE_TOOLS]",
        "[INST]",
        "[/INST]",
        "[TOOL_CALLS]",
        "[TOOL_RESULTS]",
        "[/TOOL_RESULTS]",
    ],
    tool_framing: ToolFraming::SpecialTokens {
        open: TOOL_CALLS,
        close: None,
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
pub struct Mistral;

impl Dialect for Mistral {
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
        let defs: Vec<_> = tools.iter().map(ToolDefinition::as_json).collect();
        let json = serde_json::to_string(&defs).unwrap_or_else(|_| "[]".to_string());
        vec![
            Segment::control("[AVAILABLE_TOOLS]"),
            Segment::literal(json),
            Segment::control("[/AVAILABLE_TOOLS]"),
        ]
    }

    fn render_tool_calls(&self, calls: &[ToolCall]) -> Vec<Segment> {
        let body: Vec<String> = calls.iter().map(|call| self.render_tool_call(call)).collect();
        vec![
            Segment::control(TOOL_CALLS),
            Segment::literal(format!("[{}]", body.join(","))),
        ]
    }
}
