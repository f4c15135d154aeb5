//! Conversation + tool definitions -> prompt tokens.
//!
//! Rendering happens in two steps. [`render_segments`] walks the
//! conversation and produces an ordered list of control and literal text
//! runs according to the dialect grammar; [`assemble`] tokenizes each run,
//! with special-token parsing only for control runs. User text can therefore
//! never smuggle in a control token.

use log::debug;
use serde_json::Value;

use llama_stream_types::{Message, Role, TokenId, ToolDefinition};

use crate::backend::TokenCodec;
use crate::dialect::{Dialect, Frame, NewlineRule, Segment, ToolsPlacement};
use crate::error::{SessionError, ValidationError};

/// Segment list that merges adjacent runs of the same kind and drops empty ones.
#[derive(Debug, Default)]
struct Segments(Vec<Segment>);

impl Segments {
    fn push(&mut self, segment: Segment) {
        if segment.text().is_empty() {
            return;
        }
        match self.0.last_mut() {
            Some(Segment::Control(prev)) if segment.is_control() => prev.push_str(segment.text()),
            Some(Segment::Literal(prev)) if !segment.is_control() => prev.push_str(segment.text()),
            _ => self.0.push(segment),
        }
    }

    fn extend(&mut self, segments: impl IntoIterator<Item = Segment>) {
        for segment in segments {
            self.push(segment);
        }
    }

    /// `open`, body, newline rule, `trailer`, `close`.
    fn framed(&mut self, frame: &Frame, body: Vec<Segment>, trailer: Vec<Segment>) {
        let ends_with_newline = body
            .iter()
            .rev()
            .find(|s| !s.text().is_empty())
            .is_some_and(|s| s.text().ends_with('\n'));
        self.push(frame.open_segment());
        self.extend(body);
        match frame.newline {
            NewlineRule::None => {}
            NewlineRule::Always => self.push(Segment::literal("\n")),
            NewlineRule::Ensure if !ends_with_newline => self.push(Segment::literal("\n")),
            NewlineRule::Ensure => {}
        }
        self.extend(trailer);
        self.push(frame.close_segment());
    }
}

fn validate(dialect: &dyn Dialect, messages: &[Message]) -> Result<(), ValidationError> {
    let first = messages
        .first()
        .ok_or_else(|| ValidationError::new("No messages provided"))?;
    if first.role != Role::System {
        return Err(ValidationError::new("First message must be a system message"));
    }
    if dialect.grammar().second_message_must_be_user && messages.get(1).map(|m| m.role) != Some(Role::User) {
        return Err(ValidationError::new("Second message must be a user message"));
    }
    Ok(())
}

/// Decode a tool message into the individual result objects.
fn tool_results(dialect: &dyn Dialect, content: &str) -> Result<Vec<Value>, ValidationError> {
    let invalid = || ValidationError::new(format!("Invalid tool results: {content}"));
    let results = match serde_json::from_str::<Value>(content).map_err(|_| invalid())? {
        Value::Array(items) => items,
        obj @ Value::Object(_) if !dialect.grammar().tool_results_must_be_list => vec![obj],
        _ => return Err(invalid()),
    };
    if results.is_empty() || !results.iter().all(Value::is_object) {
        return Err(invalid());
    }
    Ok(results)
}

/// Render the full prompt as control/literal segments, ending with the
/// opened assistant turn.
pub fn render_segments(
    dialect: &dyn Dialect,
    messages: &[Message],
    tools: &[ToolDefinition],
) -> Result<Vec<Segment>, ValidationError> {
    validate(dialect, messages)?;
    let grammar = dialect.grammar();
    let tool_defs = if tools.is_empty() {
        Vec::new()
    } else {
        dialect.render_tool_defs(tools)
    };

    let mut out = Segments::default();
    out.push(Segment::control(grammar.prefix));

    let (inside, after) = match grammar.tools_placement {
        ToolsPlacement::InsideSystem => (tool_defs, Vec::new()),
        ToolsPlacement::AfterSystem => (Vec::new(), tool_defs),
    };
    out.framed(&grammar.system, vec![Segment::literal(&messages[0].content)], inside);
    out.push(Segment::control(grammar.after_system));
    out.extend(after);

    for message in &messages[1..] {
        match message.role {
            Role::User => out.framed(&grammar.user, vec![Segment::literal(&message.content)], Vec::new()),
            Role::Assistant => {
                let mut body = vec![Segment::literal(&message.content)];
                if let Some(calls) = message.tool_calls.as_deref().filter(|c| !c.is_empty()) {
                    if !message.content.is_empty() && !message.content.ends_with('\n') {
                        body.push(Segment::literal("\n"));
                    }
                    body.extend(dialect.render_tool_calls(calls));
                }
                out.framed(&grammar.assistant, body, Vec::new());
            }
            Role::Tool => {
                let results = tool_results(dialect, &message.content)?;
                if let Some(turn) = &grammar.tool_turn {
                    out.push(turn.open_segment());
                }
                for result in results {
                    out.framed(&grammar.tool_result, vec![Segment::literal(result.to_string())], Vec::new());
                }
                if let Some(turn) = &grammar.tool_turn {
                    out.push(turn.close_segment());
                }
            }
            Role::System => {
                return Err(ValidationError::new("Only the first message may be a system message"));
            }
        }
    }

    out.push(Segment::control(grammar.generation_prompt));
    Ok(out.0)
}

/// Flatten segments back to the prompt text, for logging and inspection.
pub fn render_text(segments: &[Segment]) -> String {
    segments.iter().map(Segment::text).collect()
}

/// Tokenize already rendered segments.
pub fn tokenize_segments(codec: &dyn TokenCodec, segments: &[Segment]) -> Result<Vec<TokenId>, SessionError> {
    let mut tokens = Vec::new();
    for segment in segments {
        tokens.extend(codec.tokenize(segment.text().as_bytes(), segment.is_control())?);
    }
    Ok(tokens)
}

/// Conversation + tools -> prompt token ids.
pub fn assemble(
    dialect: &dyn Dialect,
    codec: &dyn TokenCodec,
    messages: &[Message],
    tools: &[ToolDefinition],
) -> Result<Vec<TokenId>, SessionError> {
    let segments = render_segments(dialect, messages, tools)?;
    debug!("[PROMPT] Rendered {} prompt:\n{}", dialect.kind(), render_text(&segments));
    tokenize_segments(codec, &segments)
}
