//! Per-family prompt grammars.
//!
//! Each model family was trained on its own chat format. A dialect is mostly
//! const data ([`Grammar`]) plus the few renderings that differ in shape:
//! tool definitions and assistant tool calls.

mod gemma;
mod mistral;
mod qwen;

use llama_stream_types::{DialectKind, ToolCall, ToolDefinition};

use crate::backend::SamplingParams;
use crate::tools::ToolCallCodec;

pub use gemma::Gemma;
pub use mistral::Mistral;
pub use qwen::Qwen;

/// A run of prompt text and how it must be tokenized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Delimiter text; control-token spellings are parsed into special ids.
    Control(String),
    /// User-controlled or generated text; always tokenized literally.
    Literal(String),
}

impl Segment {
    pub fn control(text: impl Into<String>) -> Self {
        Segment::Control(text.into())
    }

    pub fn literal(text: impl Into<String>) -> Self {
        Segment::Literal(text.into())
    }

    pub fn text(&self) -> &str {
        match self {
            Segment::Control(t) | Segment::Literal(t) => t,
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, Segment::Control(_))
    }
}

/// Newline handling between a turn's body and its closing delimiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewlineRule {
    None,
    /// Always append one.
    Always,
    /// Append one unless the body already ends with it.
    Ensure,
}

/// Opening and closing delimiters around one body.
#[derive(Debug, Clone, Copy)]
pub struct Frame {
    pub open: &'static str,
    pub close: &'static str,
    pub newline: NewlineRule,
    /// Whether `open`/`close` are control text or plain literal text.
    pub control: bool,
}

impl Frame {
    pub const fn control(open: &'static str, close: &'static str) -> Self {
        Self {
            open,
            close,
            newline: NewlineRule::None,
            control: true,
        }
    }

    pub const fn with_newline(self, newline: NewlineRule) -> Self {
        Self { newline, ..self }
    }

    pub const fn literal(self) -> Self {
        Self { control: false, ..self }
    }

    pub fn open_segment(&self) -> Segment {
        self.segment(self.open)
    }

    pub fn close_segment(&self) -> Segment {
        self.segment(self.close)
    }

    fn segment(&self, text: &str) -> Segment {
        if self.control {
            Segment::control(text)
        } else {
            Segment::literal(text)
        }
    }
}

/// Where tool definitions go relative to the system turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolsPlacement {
    /// After the system content, before the system turn closes.
    InsideSystem,
    /// After the system turn has closed.
    AfterSystem,
}

/// How the model delimits a tool-call region in its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolFraming {
    /// Dedicated control tokens. Without a close token the region runs to
    /// the end of generation.
    SpecialTokens {
        open: &'static str,
        close: Option<&'static str>,
    },
    /// Plain text markers, matched byte for byte.
    TextMarkers {
        open: &'static str,
        close: &'static str,
    },
}

/// Fixed, hand-specified chat grammar of one model family.
#[derive(Debug, Clone, Copy)]
pub struct Grammar {
    pub kind: DialectKind,
    /// Control text that starts every prompt.
    pub prefix: &'static str,
    pub system: Frame,
    /// Fixed control text emitted after the system turn.
    pub after_system: &'static str,
    pub tools_placement: ToolsPlacement,
    pub user: Frame,
    pub assistant: Frame,
    /// Wrapper around all results of one tool message, if any.
    pub tool_turn: Option<Frame>,
    /// Wrapper around each individual result.
    pub tool_result: Frame,
    /// Reject a single result object; require a list.
    pub tool_results_must_be_list: bool,
    pub second_message_must_be_user: bool,
    /// Opens the assistant turn the model completes.
    pub generation_prompt: &'static str,
    pub end_of_turn: &'static str,
    /// Every control-token spelling the grammar uses.
    pub control_tokens: &'static [&'static str],
    pub tool_framing: ToolFraming,
    pub sampling: SamplingParams,
}

/// One model family's prompt grammar and tool-call syntax.
pub trait Dialect: Send + Sync {
    fn grammar(&self) -> &Grammar;

    /// Syntax the model uses inside a tool region.
    fn codec(&self) -> &dyn ToolCallCodec;

    /// Tool definitions block. Empty when nothing should be rendered.
    fn render_tool_defs(&self, tools: &[ToolDefinition]) -> Vec<Segment>;

    /// The assistant's previous tool calls, as the model would have written them.
    fn render_tool_calls(&self, calls: &[ToolCall]) -> Vec<Segment>;

    fn render_tool_call(&self, call: &ToolCall) -> String {
        self.codec().format(call)
    }

    fn kind(&self) -> DialectKind {
        self.grammar().kind
    }
}

static GEMMA: Gemma = Gemma;
static MISTRAL: Mistral = Mistral;
static QWEN: Qwen = Qwen;

/// The grammar registered for `kind`.
pub fn dialect_for(kind: DialectKind) -> &'static dyn Dialect {
    match kind {
        DialectKind::Gemma => &GEMMA,
        DialectKind::Mistral => &MISTRAL,
        DialectKind::Qwen => &QWEN,
    }
}
