//! Deterministic in-process engine.
//!
//! [`MockCodec`] is a byte-level vocabulary with a handful of control tokens
//! and optional multi-byte pieces; [`MockGenerator`] replays a scripted list
//! of token ids. Together they let sessions run end to end without model
//! weights, which is what the tests and the mock build of the server use.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use llama_stream_types::TokenId;

use crate::backend::{Engine, Generator, SamplingParams, StopPredicate, TokenCodec, TokenStream};
use crate::dialect::Dialect;
use crate::error::{EngineError, EngineResult};

/// Byte-level vocabulary.
///
/// Ids `0..n` are the control tokens, `n..n+256` single bytes, and anything
/// above that a multi-byte piece. Control tokens render as nothing unless
/// special rendering is on, except user-defined ones, which always render.
#[derive(Debug, Clone, Default)]
pub struct MockCodec {
    specials: Vec<String>,
    /// Ids of specials that render the same with special rendering on or off.
    user_defined: Vec<usize>,
    pieces: Vec<Vec<u8>>,
}

impl MockCodec {
    pub fn new(specials: &[&str]) -> Self {
        Self {
            specials: specials.iter().map(|s| s.to_string()).collect(),
            user_defined: Vec::new(),
            pieces: Vec::new(),
        }
    }

    /// Vocabulary covering every control token of `dialect`.
    pub fn for_dialect(dialect: &dyn Dialect) -> Self {
        Self::new(dialect.grammar().control_tokens)
    }

    /// Add multi-byte pieces, preferred over single bytes when tokenizing.
    pub fn with_pieces(mut self, pieces: &[&[u8]]) -> Self {
        self.pieces.extend(pieces.iter().map(|p| p.to_vec()));
        self
    }

    /// Mark registered specials as user-defined: still matched as one token
    /// when tokenizing with special parsing, but always rendered as text.
    pub fn with_user_defined(mut self, specials: &[&str]) -> Self {
        for special in specials {
            if let Some(id) = self.specials.iter().position(|s| s == special) {
                self.user_defined.push(id);
            }
        }
        self
    }

    fn byte_base(&self) -> usize {
        self.specials.len()
    }

    fn piece_base(&self) -> usize {
        self.specials.len() + 256
    }

    /// Id of a single byte.
    pub fn byte_token(&self, byte: u8) -> TokenId {
        (self.byte_base() + byte as usize) as TokenId
    }

    /// One token per byte of `bytes`, bypassing pieces.
    pub fn byte_tokens(&self, bytes: &[u8]) -> Vec<TokenId> {
        bytes.iter().map(|&b| self.byte_token(b)).collect()
    }

    /// Id of a registered piece.
    pub fn piece_token(&self, piece: &[u8]) -> Option<TokenId> {
        self.pieces
            .iter()
            .position(|p| p == piece)
            .map(|i| (self.piece_base() + i) as TokenId)
    }

    /// Literal tokenization that cannot fail.
    pub fn encode(&self, text: &str) -> Vec<TokenId> {
        self.encode_bytes(text.as_bytes(), false)
    }

    fn longest_match<'a>(candidates: impl Iterator<Item = (usize, &'a [u8])>, rest: &[u8]) -> Option<(usize, usize)> {
        candidates
            .filter(|(_, c)| !c.is_empty() && rest.starts_with(c))
            .max_by_key(|(_, c)| c.len())
            .map(|(i, c)| (i, c.len()))
    }

    fn encode_bytes(&self, text: &[u8], special: bool) -> Vec<TokenId> {
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < text.len() {
            let rest = &text[pos..];
            if special {
                let specials = self.specials.iter().map(|s| s.as_bytes()).enumerate();
                if let Some((id, len)) = Self::longest_match(specials, rest) {
                    out.push(id as TokenId);
                    pos += len;
                    continue;
                }
            }
            let pieces = self.pieces.iter().map(Vec::as_slice).enumerate();
            if let Some((index, len)) = Self::longest_match(pieces, rest).filter(|&(_, len)| len > 1) {
                out.push((self.piece_base() + index) as TokenId);
                pos += len;
                continue;
            }
            out.push(self.byte_token(rest[0]));
            pos += 1;
        }
        out
    }
}

impl TokenCodec for MockCodec {
    fn tokenize(&self, text: &[u8], special: bool) -> EngineResult<Vec<TokenId>> {
        Ok(self.encode_bytes(text, special))
    }

    fn detokenize(&self, tokens: &[TokenId], _prior: &[TokenId], render_special: bool) -> EngineResult<Vec<u8>> {
        let mut out = Vec::new();
        for &token in tokens {
            let id = usize::try_from(token).map_err(|_| EngineError::Detokenize(format!("negative token id {token}")))?;
            if let Some(special) = self.specials.get(id) {
                if render_special || self.user_defined.contains(&id) {
                    out.extend_from_slice(special.as_bytes());
                }
            } else if id < self.piece_base() {
                out.push((id - self.byte_base()) as u8);
            } else {
                let piece = self
                    .pieces
                    .get(id - self.piece_base())
                    .ok_or_else(|| EngineError::Detokenize(format!("token id {token} is out of vocabulary")))?;
                out.extend_from_slice(piece);
            }
        }
        Ok(out)
    }

    fn special_token_id(&self, text: &str) -> EngineResult<TokenId> {
        self.specials
            .iter()
            .position(|s| s == text)
            .map(|i| i as TokenId)
            .ok_or_else(|| EngineError::UnknownSpecialToken(text.to_string()))
    }
}

/// Shared counters describing what a [`MockGenerator`] was asked to do.
#[derive(Debug, Clone, Default)]
pub struct MockStats {
    invocations: Arc<AtomicUsize>,
    resets: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl MockStats {
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Replays a fixed token script on every `generate` call.
#[derive(Debug, Clone, Default)]
pub struct MockGenerator {
    script: Vec<TokenId>,
    fail_at: Option<usize>,
    stats: MockStats,
    last_prompt: Arc<std::sync::Mutex<Vec<TokenId>>>,
}

impl MockGenerator {
    pub fn new(script: Vec<TokenId>) -> Self {
        Self {
            script,
            ..Self::default()
        }
    }

    /// Fail with a generation error when the `n`th token (1-based) is due.
    pub fn failing_at(mut self, n: usize) -> Self {
        self.fail_at = Some(n);
        self
    }

    pub fn stats(&self) -> MockStats {
        self.stats.clone()
    }

    /// Prompt passed to the most recent `generate` call.
    pub fn last_prompt(&self) -> Vec<TokenId> {
        self.last_prompt.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

struct Replay<'a> {
    script: std::vec::IntoIter<TokenId>,
    stop: StopPredicate<'a>,
    count: usize,
    fail_at: Option<usize>,
    done: bool,
}

impl Iterator for Replay<'_> {
    type Item = EngineResult<TokenId>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        self.count += 1;
        if self.fail_at == Some(self.count) {
            self.done = true;
            return Some(Err(EngineError::Generation(format!("decode failed at token {}", self.count))));
        }
        let token = self.script.next()?;
        if (self.stop)(token, self.count) {
            self.done = true;
            return None;
        }
        Some(Ok(token))
    }
}

impl Generator for MockGenerator {
    fn generate<'a>(
        &'a mut self,
        prompt: &[TokenId],
        _sampling: &SamplingParams,
        stop: StopPredicate<'a>,
    ) -> EngineResult<TokenStream<'a>> {
        self.stats.invocations.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_prompt.lock() {
            *last = prompt.to_vec();
        }
        Ok(Box::new(Replay {
            script: self.script.clone().into_iter(),
            stop,
            count: 0,
            fail_at: self.fail_at,
            done: false,
        }))
    }

    fn reset(&mut self) {
        self.stats.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&mut self) {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Engine that answers every request with `reply` followed by end of turn.
pub fn canned_engine(dialect: &dyn Dialect, reply: &str) -> EngineResult<Engine> {
    let codec = MockCodec::for_dialect(dialect);
    let mut script = codec.encode(reply);
    script.push(codec.special_token_id(dialect.grammar().end_of_turn)?);
    Ok(Engine::new(Arc::new(codec), Box::new(MockGenerator::new(script))))
}
