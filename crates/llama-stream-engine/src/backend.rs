//! Seams to the external inference engine.
//!
//! The engine is consumed through two capabilities only: a token codec and a
//! generation loop. They are separate objects so that the classifier can keep
//! detokenizing while the generator is mutably borrowed by a running stream.

use std::sync::Arc;

use llama_stream_types::TokenId;

use crate::error::EngineResult;

/// Byte string <-> token id conversion.
pub trait TokenCodec: Send + Sync {
    /// Tokenize `text`. With `special` set, control-token text such as
    /// `<|im_end|>` is parsed into its special id; otherwise everything is
    /// literal.
    fn tokenize(&self, text: &[u8], special: bool) -> EngineResult<Vec<TokenId>>;

    /// Render `tokens` to bytes. The rendering may depend on `prior` (merges
    /// across the boundary) and on `render_special`.
    fn detokenize(
        &self,
        tokens: &[TokenId],
        prior: &[TokenId],
        render_special: bool,
    ) -> EngineResult<Vec<u8>>;

    /// Id of a special token given its text form.
    fn special_token_id(&self, text: &str) -> EngineResult<TokenId> {
        self.tokenize(text.as_bytes(), true)?
            .first()
            .copied()
            .ok_or_else(|| crate::error::EngineError::UnknownSpecialToken(text.to_string()))
    }
}

/// Sampling parameters handed to the engine. The arithmetic is the engine's.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub top_k: i32,
    pub top_p: f32,
    pub min_p: Option<f32>,
    pub temperature: f32,
    pub repeat_penalty: f32,
}

/// Stop predicate: `(token, generated_count) -> stop?`. The count is 1-based.
pub type StopPredicate<'a> = Box<dyn FnMut(TokenId, usize) -> bool + Send + 'a>;

/// Lazily generated token ids.
pub type TokenStream<'a> = Box<dyn Iterator<Item = EngineResult<TokenId>> + 'a>;

/// The decode loop.
///
/// The predicate is evaluated for every sampled token before it is yielded;
/// when it returns `true` the stream ends without yielding that token.
pub trait Generator: Send {
    fn generate<'a>(
        &'a mut self,
        prompt: &[TokenId],
        sampling: &SamplingParams,
        stop: StopPredicate<'a>,
    ) -> EngineResult<TokenStream<'a>>;

    /// Drop any evaluation state (KV cache) held between calls.
    fn reset(&mut self);

    /// Free the underlying resources. Called exactly once, after `reset`.
    fn close(&mut self) {}
}

/// The exclusive inference resource: one codec plus one generator.
pub struct Engine {
    pub codec: Arc<dyn TokenCodec>,
    pub generator: Box<dyn Generator>,
}

impl Engine {
    pub fn new(codec: Arc<dyn TokenCodec>, generator: Box<dyn Generator>) -> Self {
        Self { codec, generator }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}
