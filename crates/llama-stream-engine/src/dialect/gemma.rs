//! Gemma 3: `<start_of_turn>role\n .. <end_of_turn>\n` turns, no system
//! role, tool calls as Python expressions in ```` ```tool_code ```` blocks.

use log::warn;

use llama_stream_types::{DialectKind, ToolCall, ToolDefinition};

use super::{Dialect, Frame, Grammar, NewlineRule, Segment, ToolFraming, ToolsPlacement};
use crate::backend::SamplingParams;
use crate::tools::{catalog, PythonicCodec, ToolCallCodec};

const TOOL_CODE_OPEN: &str = "```tool_code\n";
const TOOL_CODE_CLOSE: &str = "\n```";

const TOOLS_START: &str = r#"
At each turn, if you decide to invoke any of the function(s), it should be wrapped with ```tool_code```. The python methods described below are available. The generated code should be readable and efficient. The response to a method will be wrapped in ```tool_output``` use it to call more tools or generate a helpful, friendly response. When using a ```tool_call``` think step by step why and how it should be used.

You can make multiple tool calls within one ```tool_code``` block, just separate them with a new line. This is the ONLY format that the tool call parser understands. Example:

```tool_code
allowedFunctionA(index=7, startDate="2024-01-01")
allowedFunctionB(arg1=0, arg2=10)
```

Tool calls WILL NOT be evaluated but only parsed, you MUST NEVER call ANY other python methods or functions than the ones described below. Using any other function will break the tool call parser.

The following Python methods are available:

```python
"#;

const TOOLS_END: &str = "\n```\n";

const GRAMMAR: Grammar = Grammar {
    kind: DialectKind::Gemma,
    prefix: "<bos>",
    system: Frame::control("<start_of_turn>user\n", "<end_of_turn>\n").with_newline(NewlineRule::Always),
    // Gemma has no system role; the instructions go in a user turn the model
    // has already acknowledged.
    after_system: "<start_of_turn>model\nI understand.\n<end_of_turn>\n",
    tools_placement: ToolsPlacement::InsideSystem,
    user: Frame::control("<start_of_turn>user\n", "<end_of_turn>\n"),
    assistant: Frame::control("<start_of_turn>model\n", "<end_of_turn>\n").with_newline(NewlineRule::Ensure),
    tool_turn: Some(Frame::control("<start_of_turn>user\n", "\n<end_of_turn>\n")),
    tool_result: Frame::control("```tool_output\n", "```\n")
        .with_newline(NewlineRule::Ensure)
        .literal(),
    tool_results_must_be_list: true,
    second_message_must_be_user: true,
    generation_prompt: "<start_of_turn>model\n",
    end_of_turn: "<end_of_turn>",
    control_tokens: &["<bos>", "<eos>", "<start_of_turn>", "<end_of_turn>"],
    tool_framing: ToolFraming::TextMarkers {
        open: TOOL_CODE_OPEN,
        close: TOOL_CODE_CLOSE,
    },
    sampling: SamplingParams {
        top_k: 64,
        top_p: 0.95,
        min_p: Some(0.01),
        temperature: 1.0,
        repeat_penalty: 1.0,
    },
};

#[derive(Debug, Default, Clone, Copy)]
pub struct Gemma;

impl Dialect for Gemma {
    fn grammar(&self) -> &Grammar {
        &GRAMMAR
    }

    fn codec(&self) -> &dyn ToolCallCodec {
        &PythonicCodec
    }

    /// Only built-in functions can be described to Gemma; anything else is
    /// left out of the prompt.
    fn render_tool_defs(&self, tools: &[ToolDefinition]) -> Vec<Segment> {
        let mut stubs = Vec::new();
        for tool in tools {
            match tool.name().and_then(catalog::lookup) {
                Some(sig) => stubs.push(sig.python_stub),
                None => warn!(
                    "[PROMPT] Skipping tool {:?}: not a built-in function",
                    tool.name().unwrap_or("<unnamed>")
                ),
            }
        }
        if stubs.is_empty() {
            return Vec::new();
        }
        vec![Segment::literal(format!("{TOOLS_START}{}{TOOLS_END}", stubs.join("\n")))]
    }

    fn render_tool_calls(&self, calls: &[ToolCall]) -> Vec<Segment> {
        let text: String = calls
            .iter()
            .map(|call| format!("{TOOL_CODE_OPEN}{}{TOOL_CODE_CLOSE}\n", self.render_tool_call(call)))
            .collect();
        vec![Segment::literal(text)]
    }
}
