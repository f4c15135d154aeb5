//! Token-by-token classification of generated output into [`StreamEvent`]s.
//!
//! The classifier sits between the decode loop and the caller. It rebuilds
//! UTF-8 text from arbitrary token boundaries, separates control tokens from
//! text, and cuts tool-call regions out of the text so they can be parsed
//! into structured calls. Events are only emitted once they are final: bytes
//! that might still turn out to be part of a delimiter are held back.

use std::sync::Arc;

use log::{debug, error, warn};

use llama_stream_types::{StreamEvent, TokenId};

use crate::backend::TokenCodec;
use crate::dialect::{Dialect, ToolFraming};
use crate::error::EngineResult;
use crate::tools::{encode_calls, ToolWhitelist};

/// More undecodable tokens than this are decoded lossily instead of
/// gathered further.
const MAX_PENDING_TOKENS: usize = 8;

/// Observable classifier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierState {
    Normal,
    MatchingOpenDelimiter,
    InToolRegion,
    MatchingCloseDelimiter,
    GatheringInvalidUtf8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Region {
    Normal,
    InTool,
}

/// Special token ids the classifier reacts to, resolved once per session.
#[derive(Debug, Clone, Copy)]
struct ControlIds {
    end_of_turn: TokenId,
    tool_open: Option<TokenId>,
    tool_close: Option<TokenId>,
}

pub struct StreamClassifier {
    codec: Arc<dyn TokenCodec>,
    dialect: &'static dyn Dialect,
    whitelist: ToolWhitelist,
    ids: ControlIds,
    /// Prompt plus every decoded generated token; the detokenizer's prior context.
    context: Vec<TokenId>,
    region: Region,
    /// Withheld bytes that may be the start of a text marker.
    marker_buf: String,
    tool_buf: String,
    /// Tokens whose bytes did not yet form valid UTF-8.
    pending: Vec<TokenId>,
    finished: bool,
}

impl StreamClassifier {
    pub fn new(
        dialect: &'static dyn Dialect,
        codec: Arc<dyn TokenCodec>,
        prompt: &[TokenId],
        whitelist: ToolWhitelist,
    ) -> EngineResult<Self> {
        let grammar = dialect.grammar();
        let end_of_turn = codec.special_token_id(grammar.end_of_turn)?;
        let (tool_open, tool_close) = match grammar.tool_framing {
            ToolFraming::SpecialTokens { open, close } => (
                Some(codec.special_token_id(open)?),
                close.map(|c| codec.special_token_id(c)).transpose()?,
            ),
            ToolFraming::TextMarkers { .. } => (None, None),
        };
        Ok(Self {
            codec,
            dialect,
            whitelist,
            ids: ControlIds {
                end_of_turn,
                tool_open,
                tool_close,
            },
            context: prompt.to_vec(),
            region: Region::Normal,
            marker_buf: String::new(),
            tool_buf: String::new(),
            pending: Vec::new(),
            finished: false,
        })
    }

    pub fn end_of_turn_id(&self) -> TokenId {
        self.ids.end_of_turn
    }

    /// True once the end-of-turn token has been seen.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn state(&self) -> ClassifierState {
        if !self.pending.is_empty() {
            return ClassifierState::GatheringInvalidUtf8;
        }
        match (self.region, self.marker_buf.is_empty()) {
            (Region::Normal, true) => ClassifierState::Normal,
            (Region::Normal, false) => ClassifierState::MatchingOpenDelimiter,
            (Region::InTool, true) => ClassifierState::InToolRegion,
            (Region::InTool, false) => ClassifierState::MatchingCloseDelimiter,
        }
    }

    /// Classify one generated token.
    pub fn push(&mut self, token: TokenId) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }

        let (plain, special) = match self.render(token) {
            Ok(pair) => pair,
            Err(e) => {
                warn!("[CLASSIFIER] Skipping token {token}: {e}");
                return Vec::new();
            }
        };

        // Tool tokens may be user-defined and render identically either way,
        // so framing ids are matched before the renderings are compared.
        if self.is_framing_token(token) || plain != special {
            let mut events = self.flush_pending();
            self.context.push(token);
            events.extend(self.control_token(token, &special));
            return events;
        }

        if !self.pending.is_empty() {
            return self.push_pending(token);
        }

        match String::from_utf8(plain) {
            Ok(text) => {
                self.context.push(token);
                self.feed_text(&text)
            }
            Err(_) => {
                debug!("[CLASSIFIER] Token {token} is not valid UTF-8 on its own, gathering");
                self.pending.push(token);
                Vec::new()
            }
        }
    }

    /// Flush everything still held back. Safe to call more than once.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if !self.pending.is_empty() {
            debug!(
                "[CLASSIFIER] Dropping {} trailing tokens that never formed valid UTF-8",
                self.pending.len()
            );
            self.pending.clear();
        }
        let held = std::mem::take(&mut self.marker_buf);
        let mut events = Vec::new();
        match self.region {
            Region::Normal => push_text(&mut events, held),
            Region::InTool => {
                self.tool_buf.push_str(&held);
                if self.tool_buf.trim().is_empty() {
                    self.tool_buf.clear();
                    self.region = Region::Normal;
                } else {
                    events.push(self.close_tool_region());
                }
            }
        }
        self.finished = true;
        events
    }

    fn control_token(&mut self, token: TokenId, special: &[u8]) -> Vec<StreamEvent> {
        if token == self.ids.end_of_turn {
            self.finished = true;
            return Vec::new();
        }
        if Some(token) == self.ids.tool_open {
            if self.region == Region::InTool {
                debug!("[CLASSIFIER] Tool region already open, ignoring second open token");
            }
            self.region = Region::InTool;
            return Vec::new();
        }
        if Some(token) == self.ids.tool_close && self.region == Region::InTool {
            return vec![self.close_tool_region()];
        }
        let mut events = Vec::new();
        let held = std::mem::take(&mut self.marker_buf);
        match self.region {
            Region::Normal => push_text(&mut events, held),
            Region::InTool => self.tool_buf.push_str(&held),
        }
        events.push(StreamEvent::special(String::from_utf8_lossy(special)));
        events
    }

    /// Token rendered with special rendering off and on.
    fn render(&self, token: TokenId) -> EngineResult<(Vec<u8>, Vec<u8>)> {
        let plain = self.codec.detokenize(&[token], &self.context, false)?;
        let special = self.codec.detokenize(&[token], &self.context, true)?;
        Ok((plain, special))
    }

    fn is_framing_token(&self, token: TokenId) -> bool {
        token == self.ids.end_of_turn || Some(token) == self.ids.tool_open || Some(token) == self.ids.tool_close
    }

    fn push_pending(&mut self, token: TokenId) -> Vec<StreamEvent> {
        self.pending.push(token);
        let bytes = match self.codec.detokenize(&self.pending, &self.context, false) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("[CLASSIFIER] Skipping token {token}: {e}");
                self.pending.pop();
                return Vec::new();
            }
        };
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) if self.pending.len() >= MAX_PENDING_TOKENS => {
                warn!(
                    "[CLASSIFIER] {} tokens still not valid UTF-8, decoding lossily",
                    self.pending.len()
                );
                String::from_utf8_lossy(e.as_bytes()).into_owned()
            }
            Err(_) => return Vec::new(),
        };
        self.context.append(&mut self.pending);
        self.feed_text(&text)
    }

    /// Decode gathered bytes lossily ahead of a control token.
    fn flush_pending(&mut self) -> Vec<StreamEvent> {
        if self.pending.is_empty() {
            return Vec::new();
        }
        match self.codec.detokenize(&self.pending, &self.context, false) {
            Ok(bytes) => {
                debug!(
                    "[CLASSIFIER] Control token interrupted {} undecoded tokens, flushing lossily",
                    self.pending.len()
                );
                self.context.append(&mut self.pending);
                self.feed_text(&String::from_utf8_lossy(&bytes))
            }
            Err(e) => {
                warn!("[CLASSIFIER] Dropping {} undecoded tokens: {e}", self.pending.len());
                self.pending.clear();
                Vec::new()
            }
        }
    }

    fn feed_text(&mut self, text: &str) -> Vec<StreamEvent> {
        match self.dialect.grammar().tool_framing {
            ToolFraming::TextMarkers { open, close } => self.feed_with_markers(text, open, close),
            ToolFraming::SpecialTokens { .. } => {
                let mut events = Vec::new();
                match self.region {
                    Region::Normal => push_text(&mut events, text.to_string()),
                    Region::InTool => self.tool_buf.push_str(text),
                }
                events
            }
        }
    }

    fn feed_with_markers(&mut self, text: &str, open: &str, close: &str) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let mut input = std::mem::take(&mut self.marker_buf);
        input.push_str(text);
        loop {
            let marker = match self.region {
                Region::Normal => open,
                Region::InTool => close,
            };
            if let Some(at) = input.find(marker) {
                let rest = input.split_off(at + marker.len());
                input.truncate(at);
                match self.region {
                    Region::Normal => {
                        push_text(&mut events, input);
                        self.region = Region::InTool;
                    }
                    Region::InTool => {
                        self.tool_buf.push_str(&input);
                        events.push(self.close_tool_region());
                    }
                }
                input = rest;
                continue;
            }
            let keep = input.split_off(input.len() - partial_marker_len(&input, marker));
            match self.region {
                Region::Normal => push_text(&mut events, input),
                Region::InTool => self.tool_buf.push_str(&input),
            }
            self.marker_buf = keep;
            return events;
        }
    }

    fn close_tool_region(&mut self) -> StreamEvent {
        self.region = Region::Normal;
        let raw = std::mem::take(&mut self.tool_buf);
        match self.dialect.codec().parse(&raw, &self.whitelist) {
            Ok(calls) => {
                debug!("[TOOLS] Parsed {} tool call(s)", calls.len());
                StreamEvent::tool(encode_calls(&calls))
            }
            Err(e) => {
                error!("[TOOLS] {e}");
                StreamEvent::tool(raw)
            }
        }
    }
}

impl std::fmt::Debug for StreamClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClassifier")
            .field("dialect", &self.dialect.kind())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn push_text(events: &mut Vec<StreamEvent>, text: String) {
    if !text.is_empty() {
        events.push(StreamEvent::text(text));
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of `marker`.
fn partial_marker_len(text: &str, marker: &str) -> usize {
    (1..marker.len().min(text.len() + 1))
        .rev()
        .find(|&k| {
            marker.is_char_boundary(k) && text.is_char_boundary(text.len() - k) && text.ends_with(&marker[..k])
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::dialect_for;
    use crate::mock::MockCodec;
    use llama_stream_types::DialectKind;

    fn classifier(kind: DialectKind) -> (StreamClassifier, Arc<MockCodec>) {
        let dialect = dialect_for(kind);
        let codec = Arc::new(MockCodec::for_dialect(dialect).with_pieces(&[&b"```tool"[..], &b"_code\n"[..]]));
        let classifier = StreamClassifier::new(dialect, codec.clone(), &[], ToolWhitelist::default()).unwrap();
        (classifier, codec)
    }

    fn run(classifier: &mut StreamClassifier, tokens: &[TokenId]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for &t in tokens {
            events.extend(classifier.push(t));
        }
        events.extend(classifier.finish());
        events
    }

    #[test]
    fn test_partial_marker_len() {
        assert_eq!(partial_marker_len("abc``", "```tool_code\n"), 2);
        assert_eq!(partial_marker_len("abc", "```tool_code\n"), 0);
        assert_eq!(partial_marker_len("x\n`", "\n```"), 2);
        assert_eq!(partial_marker_len("", "\n```"), 0);
    }

    #[test]
    fn test_text_then_end_of_turn() {
        let dialect = dialect_for(DialectKind::Gemma);
        let codec = Arc::new(MockCodec::for_dialect(dialect).with_pieces(&[&b"hello"[..]]));
        let mut c = StreamClassifier::new(dialect, codec.clone(), &[], ToolWhitelist::default()).unwrap();
        let tokens = [codec.piece_token(b"hello").unwrap(), c.end_of_turn_id()];
        let events = run(&mut c, &tokens);
        assert_eq!(events, vec![StreamEvent::text("hello")]);
        assert!(c.is_finished());
    }

    #[test]
    fn test_tokens_after_end_of_turn_are_ignored() {
        let (mut c, codec) = classifier(DialectKind::Qwen);
        assert!(c.push(c.end_of_turn_id()).is_empty());
        assert!(c.push(codec.encode("x")[0]).is_empty());
    }

    #[test]
    fn test_open_marker_split_across_tokens() {
        let (mut c, codec) = classifier(DialectKind::Gemma);
        let first = codec.piece_token(b"```tool").unwrap();
        let second = codec.piece_token(b"_code\n").unwrap();
        assert!(c.push(first).is_empty());
        assert_eq!(c.state(), ClassifierState::MatchingOpenDelimiter);
        assert!(c.push(second).is_empty());
        assert_eq!(c.state(), ClassifierState::InToolRegion);
    }

    #[test]
    fn test_gemma_tool_region_parsed() {
        let (mut c, codec) = classifier(DialectKind::Gemma);
        let tokens = codec.encode("Let me check.\n```tool_code\ngetRecentChannelMessages(channelIndex=2, limit=5)\n```\nDone");
        let events = run(&mut c, &tokens);
        let tools: Vec<_> = events.iter().filter(|e| e.is_tool).collect();
        assert_eq!(tools.len(), 1);
        assert_eq!(
            tools[0].text,
            r#"[{"name":"getRecentChannelMessages","arguments":{"channelIndex":2,"limit":5}}]"#
        );
        let text: String = events.iter().filter(|e| !e.is_tool).map(|e| e.text.as_str()).collect();
        assert_eq!(text, "Let me check.\n\nDone");
    }

    #[test]
    fn test_invalid_tool_call_passes_raw_text() {
        let (mut c, codec) = classifier(DialectKind::Gemma);
        let events = run(&mut c, &codec.encode("```tool_code\nunknownFn(x=1)\n```"));
        assert_eq!(events, vec![StreamEvent::tool("unknownFn(x=1)")]);
    }

    #[test]
    fn test_diverging_prefix_is_flushed_as_text() {
        let (mut c, codec) = classifier(DialectKind::Gemma);
        let mut events = c.push(codec.byte_token(b'`'));
        events.extend(c.push(codec.byte_token(b'`')));
        assert!(events.is_empty());
        events.extend(c.push(codec.byte_token(b'x')));
        assert_eq!(events, vec![StreamEvent::text("``x")]);
        assert_eq!(c.state(), ClassifierState::Normal);
    }

    #[test]
    fn test_withheld_prefix_flushed_at_end() {
        let (mut c, codec) = classifier(DialectKind::Gemma);
        let events = run(&mut c, &codec.encode("a ``"));
        let text: String = events.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(text, "a ``");
    }

    #[test]
    fn test_unmatched_close_marker_is_text() {
        let (mut c, codec) = classifier(DialectKind::Gemma);
        let events = run(&mut c, &codec.encode("x\n```"));
        let text: String = events.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(text, "x\n```");
        assert!(events.iter().all(|e| !e.is_tool));
    }

    #[test]
    fn test_multibyte_split_across_tokens() {
        let (mut c, codec) = classifier(DialectKind::Qwen);
        let bytes = "é".as_bytes();
        assert!(c.push(codec.byte_token(bytes[0])).is_empty());
        assert_eq!(c.state(), ClassifierState::GatheringInvalidUtf8);
        assert_eq!(c.push(codec.byte_token(bytes[1])), vec![StreamEvent::text("é")]);
        assert_eq!(c.state(), ClassifierState::Normal);
    }

    #[test]
    fn test_pending_bytes_dropped_at_end() {
        let (mut c, codec) = classifier(DialectKind::Qwen);
        c.push(codec.byte_token(0xE2));
        assert!(c.finish().is_empty());
    }

    #[test]
    fn test_qwen_special_token_region() {
        let (mut c, codec) = classifier(DialectKind::Qwen);
        let mut tokens = codec.tokenize(b"<tool_call>", true).unwrap();
        tokens.extend(codec.encode("\n{\"name\": \"getRecentChannelMessages\", \"arguments\": {\"channelIndex\": 0, \"limit\": 3}}\n"));
        tokens.extend(codec.tokenize(b"</tool_call>", true).unwrap());
        tokens.push(c.end_of_turn_id());
        let events = run(&mut c, &tokens);
        assert_eq!(events.len(), 1);
        assert!(events[0].is_tool);
        assert!(events[0].text.starts_with("[{\"name\":\"getRecentChannelMessages\""));
    }

    fn qwen_tool_call(codec: &MockCodec) -> Vec<TokenId> {
        let mut tokens = codec.tokenize(b"<tool_call>", true).unwrap();
        tokens.extend(codec.encode(r#"{"name": "getRecentChannelMessages", "arguments": {"channelIndex": 1, "limit": 4}}"#));
        tokens.extend(codec.tokenize(b"</tool_call>", true).unwrap());
        tokens
    }

    #[test]
    fn test_user_defined_tool_tokens_open_region() {
        let dialect = dialect_for(DialectKind::Qwen);
        let codec = Arc::new(MockCodec::for_dialect(dialect).with_user_defined(&["<tool_call>", "</tool_call>"]));
        let mut c = StreamClassifier::new(dialect, codec.clone(), &[], ToolWhitelist::default()).unwrap();
        let mut tokens = codec.encode("ok ");
        tokens.extend(qwen_tool_call(&codec));
        tokens.push(c.end_of_turn_id());
        let events = run(&mut c, &tokens);
        let tools: Vec<_> = events.iter().filter(|e| e.is_tool).collect();
        assert_eq!(tools.len(), 1);
        assert_eq!(
            tools[0].text,
            r#"[{"name":"getRecentChannelMessages","arguments":{"channelIndex":1,"limit":4}}]"#
        );
        let text: String = events.iter().filter(|e| !e.is_tool).map(|e| e.text.as_str()).collect();
        assert_eq!(text, "ok ");
    }

    #[test]
    fn test_control_token_interrupts_gathering() {
        let (mut c, codec) = classifier(DialectKind::Qwen);
        let mut tokens = vec![codec.byte_token(0xE2)];
        tokens.extend(qwen_tool_call(&codec));
        let events = run(&mut c, &tokens);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], StreamEvent::text("\u{FFFD}"));
        assert!(events[1].is_tool);
        assert!(events[1].text.starts_with(r#"[{"name":"getRecentChannelMessages""#));
        assert_eq!(c.state(), ClassifierState::Normal);
    }

    #[test]
    fn test_lossy_decode_after_pending_cap() {
        let (mut c, codec) = classifier(DialectKind::Qwen);
        let mut tokens = vec![codec.byte_token(0x80)];
        tokens.extend(codec.encode("abcdefgh"));
        let events = run(&mut c, &tokens);
        assert_eq!(events, vec![StreamEvent::text("\u{FFFD}abcdefg"), StreamEvent::text("h")]);
    }

    #[test]
    fn test_mistral_region_completes_at_end_of_stream() {
        let (mut c, codec) = classifier(DialectKind::Mistral);
        let mut tokens = codec.tokenize(b"[TOOL_CALLS]", true).unwrap();
        tokens.extend(codec.encode(r#"[{"name":"getRecentChannelMessages","arguments":{"channelIndex":1,"limit":2}}]"#));
        let mut events = Vec::new();
        for t in tokens {
            events.extend(c.push(t));
        }
        assert!(events.is_empty());
        assert_eq!(c.state(), ClassifierState::InToolRegion);
        let events = c.finish();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_tool);
    }

    #[test]
    fn test_other_control_token_is_special_event() {
        let (mut c, codec) = classifier(DialectKind::Qwen);
        let token = codec.special_token_id("<|endoftext|>").unwrap();
        assert_eq!(c.push(token), vec![StreamEvent::special("<|endoftext|>")]);
    }

    #[test]
    fn test_unknown_token_is_skipped() {
        let (mut c, codec) = classifier(DialectKind::Qwen);
        assert!(c.push(100_000).is_empty());
        assert_eq!(c.push(codec.encode("a")[0]), vec![StreamEvent::text("a")]);
    }
}
