//! Generation sessions against the one shared engine.
//!
//! [`SessionRegistry`] owns the engine, the process-wide cancellation token
//! and the "generation in progress" flag. A session borrows the engine
//! exclusively for its whole lifetime; events are pulled lazily from
//! [`EventStream`], so nothing runs ahead of the caller.
//!
//! Shutdown ordering: [`SessionRegistry::request_shutdown`] sets the
//! cancellation flag *before* trying to take the engine. If the engine is
//! idle it is released right there; otherwise the running session sees the
//! flag on its next token and releases the engine when it is dropped, still
//! holding the lock. Either way the engine is reset and closed exactly once.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

use log::{error, info, warn};
use uuid::Uuid;

use llama_stream_types::{GenerateRequest, Message, StreamEvent, TokenId, ToolDefinition};

use crate::backend::{Engine, TokenStream};
use crate::cancel::CancellationToken;
use crate::classifier::StreamClassifier;
use crate::dialect::Dialect;
use crate::error::SessionError;
use crate::prompt;
use crate::tools::ToolWhitelist;

/// Hard ceiling on generated tokens per request.
pub const DEFAULT_MAX_TOKENS: usize = 2048;

/// What a shutdown request did with the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Engine was idle and has been released.
    ReleasedNow,
    /// A session is running; it releases the engine when it ends.
    Deferred,
    /// Nothing left to release.
    AlreadyReleased,
}

pub struct SessionRegistry {
    dialect: &'static dyn Dialect,
    engine: Mutex<Option<Engine>>,
    cancel: CancellationToken,
    generating: AtomicBool,
    max_tokens: usize,
}

/// Reset and close the engine if it is still there.
fn release(slot: &mut Option<Engine>) -> bool {
    match slot.take() {
        Some(mut engine) => {
            engine.generator.reset();
            engine.generator.close();
            info!("Inference engine closed");
            true
        }
        None => false,
    }
}

impl SessionRegistry {
    pub fn new(dialect: &'static dyn Dialect, engine: Engine) -> Self {
        Self {
            dialect,
            engine: Mutex::new(Some(engine)),
            cancel: CancellationToken::new(),
            generating: AtomicBool::new(false),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn dialect(&self) -> &'static dyn Dialect {
        self.dialect
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_generating(&self) -> bool {
        self.generating.load(Ordering::SeqCst)
    }

    /// Take exclusive use of the engine. Blocks while another session runs.
    pub fn begin(&self) -> Result<ActiveSession<'_>, SessionError> {
        if self.cancel.is_cancelled() {
            return Err(SessionError::ShuttingDown);
        }
        let mut guard = self.engine.lock().unwrap_or_else(PoisonError::into_inner);
        if self.cancel.is_cancelled() {
            // Shutdown came in while we waited and deferred the release to us.
            release(&mut guard);
            return Err(SessionError::ShuttingDown);
        }
        if guard.is_none() {
            return Err(SessionError::EngineReleased);
        }
        self.generating.store(true, Ordering::SeqCst);
        Ok(ActiveSession {
            registry: self,
            engine: guard,
            id: Uuid::new_v4(),
        })
    }

    /// Set the cancellation flag and release the engine now if it is idle.
    pub fn request_shutdown(&self) -> ShutdownOutcome {
        if self.cancel.cancel() {
            info!("Shutting down...");
        }
        match self.engine.try_lock() {
            Ok(mut guard) => Self::released(release(&mut guard)),
            Err(TryLockError::Poisoned(poisoned)) => Self::released(release(&mut poisoned.into_inner())),
            Err(TryLockError::WouldBlock) => {
                info!("Generation in progress, engine will be released when it stops");
                ShutdownOutcome::Deferred
            }
        }
    }

    fn released(now: bool) -> ShutdownOutcome {
        if now {
            ShutdownOutcome::ReleasedNow
        } else {
            ShutdownOutcome::AlreadyReleased
        }
    }

    pub fn is_released(&self) -> bool {
        match self.engine.try_lock() {
            Ok(guard) => guard.is_none(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().is_none(),
            Err(TryLockError::WouldBlock) => false,
        }
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("dialect", &self.dialect.kind())
            .field("shutting_down", &self.is_shutting_down())
            .field("generating", &self.is_generating())
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

/// Exclusive hold on the engine for one request.
pub struct ActiveSession<'r> {
    registry: &'r SessionRegistry,
    engine: MutexGuard<'r, Option<Engine>>,
    id: Uuid,
}

impl ActiveSession<'_> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Start generating. Failures before the first token become a single
    /// error event (suppressed during shutdown).
    pub fn stream(&mut self, messages: &[Message], tools: &[ToolDefinition]) -> EventStream<'_> {
        let id = self.id;
        let cancel = self.registry.cancel.clone();
        match self.start(messages, tools) {
            Ok(stream) => stream,
            Err(e) => EventStream::failed(id, cancel, e),
        }
    }

    fn start(&mut self, messages: &[Message], tools: &[ToolDefinition]) -> Result<EventStream<'_>, SessionError> {
        let registry = self.registry;
        let dialect = registry.dialect;
        let engine = self.engine.as_mut().ok_or(SessionError::EngineReleased)?;

        let prompt = prompt::assemble(dialect, engine.codec.as_ref(), messages, tools)?;
        let classifier = StreamClassifier::new(
            dialect,
            engine.codec.clone(),
            &prompt,
            ToolWhitelist::from_definitions(tools),
        )?;
        info!("[SESSION {}] Generation started, num tokens: {}", self.id, prompt.len());

        let end_of_turn = classifier.end_of_turn_id();
        let max_tokens = registry.max_tokens;
        let cancel = registry.cancel.clone();
        let stop_cancel = cancel.clone();
        let tokens = engine.generator.generate(
            &prompt,
            &dialect.grammar().sampling,
            Box::new(move |token: TokenId, count: usize| token == end_of_turn || count > max_tokens || stop_cancel.is_cancelled()),
        )?;

        Ok(EventStream {
            id: self.id,
            cancel,
            tokens: Some(tokens),
            classifier: Some(classifier),
            queue: VecDeque::new(),
            generated: 0,
            prompt_len: prompt.len(),
        })
    }
}

impl Drop for ActiveSession<'_> {
    fn drop(&mut self) {
        self.registry.generating.store(false, Ordering::SeqCst);
        if self.registry.cancel.is_cancelled() && release(&mut self.engine) {
            info!("[SESSION {}] Released engine after shutdown request", self.id);
        }
    }
}

/// Lazily produced events of one session.
pub struct EventStream<'s> {
    id: Uuid,
    cancel: CancellationToken,
    tokens: Option<TokenStream<'s>>,
    classifier: Option<StreamClassifier>,
    queue: VecDeque<StreamEvent>,
    generated: usize,
    prompt_len: usize,
}

impl EventStream<'_> {
    fn failed(id: Uuid, cancel: CancellationToken, e: SessionError) -> Self {
        let mut stream = Self {
            id,
            cancel,
            tokens: None,
            classifier: None,
            queue: VecDeque::new(),
            generated: 0,
            prompt_len: 0,
        };
        stream.fail(e);
        stream
    }

    fn fail(&mut self, e: SessionError) {
        self.tokens = None;
        self.classifier = None;
        if self.cancel.is_cancelled() {
            warn!("[SESSION {}] Suppressed error during shutdown: {e}", self.id);
        } else {
            error!("[SESSION {}] {e}", self.id);
            self.queue.push_back(StreamEvent::error(e));
        }
    }

    /// Generated tokens seen so far.
    pub fn generated(&self) -> usize {
        self.generated
    }

    fn complete(&mut self) {
        self.tokens = None;
        if let Some(mut classifier) = self.classifier.take() {
            self.queue.extend(classifier.finish());
        }
        info!(
            "[SESSION {}] Generation finished, num tokens: {}",
            self.id,
            self.prompt_len + self.generated
        );
    }
}

impl Iterator for EventStream<'_> {
    type Item = StreamEvent;

    fn next(&mut self) -> Option<StreamEvent> {
        loop {
            if let Some(event) = self.queue.pop_front() {
                return Some(event);
            }
            let tokens = self.tokens.as_mut()?;
            match tokens.next() {
                Some(Ok(token)) => {
                    self.generated += 1;
                    if let Some(classifier) = self.classifier.as_mut() {
                        self.queue.extend(classifier.push(token));
                        if classifier.is_finished() {
                            self.complete();
                        }
                    }
                }
                Some(Err(e)) => self.fail(e.into()),
                None => self.complete(),
            }
        }
    }
}

/// Run one request to completion, handing each event to `emit`.
///
/// `emit` returns `false` when the consumer has gone away; generation stops
/// at that point.
pub fn run_session<F>(registry: &SessionRegistry, request: &GenerateRequest, mut emit: F)
where
    F: FnMut(StreamEvent) -> bool,
{
    let mut session = match registry.begin() {
        Ok(session) => session,
        Err(e) => {
            info!("Rejecting request: {e}");
            emit(StreamEvent::error(e));
            return;
        }
    };
    let id = session.id();
    for event in session.stream(&request.messages, request.tools()) {
        if !emit(event) {
            info!("[SESSION {id}] Client disconnected, stopping generation");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::dialect_for;
    use crate::mock::{MockCodec, MockGenerator};
    use llama_stream_types::DialectKind;
    use std::sync::Arc;

    fn registry(script: impl FnOnce(&MockCodec) -> Vec<i32>) -> (SessionRegistry, crate::mock::MockStats) {
        let dialect = dialect_for(DialectKind::Qwen);
        let codec = MockCodec::for_dialect(dialect);
        let generator = MockGenerator::new(script(&codec));
        let stats = generator.stats();
        let engine = Engine::new(Arc::new(codec), Box::new(generator));
        (SessionRegistry::new(dialect, engine), stats)
    }

    fn request() -> GenerateRequest {
        GenerateRequest {
            messages: vec![Message::system("s"), Message::user("u")],
            tools: None,
        }
    }

    #[test]
    fn test_shutdown_when_idle_releases_once() {
        let (registry, stats) = registry(|c| c.encode("x"));
        assert_eq!(registry.request_shutdown(), ShutdownOutcome::ReleasedNow);
        assert_eq!(registry.request_shutdown(), ShutdownOutcome::AlreadyReleased);
        assert_eq!((stats.resets(), stats.closes()), (1, 1));
        assert!(registry.is_released());
    }

    #[test]
    fn test_generating_flag_follows_session() {
        let (registry, _) = registry(|c| c.encode("x"));
        {
            let _session = registry.begin().unwrap();
            assert!(registry.is_generating());
        }
        assert!(!registry.is_generating());
    }

    #[test]
    fn test_shutdown_during_session_is_deferred() {
        let (registry, stats) = registry(|c| c.encode("abc"));
        let mut session = registry.begin().unwrap();
        let mut stream = session.stream(&request().messages, &[]);
        assert_eq!(stream.next(), Some(StreamEvent::text("a")));
        assert_eq!(registry.request_shutdown(), ShutdownOutcome::Deferred);
        assert_eq!(stats.closes(), 0);
        // Cancellation is observed on the very next token.
        assert_eq!(stream.next(), None);
        drop(stream);
        drop(session);
        assert_eq!((stats.resets(), stats.closes()), (1, 1));
        assert!(registry.is_released());
    }

    #[test]
    fn test_max_tokens_ceiling() {
        let (registry, _) = registry(|c| c.encode("abcdef"));
        let registry = registry.with_max_tokens(3);
        let mut out = String::new();
        run_session(&registry, &request(), |ev| {
            out.push_str(&ev.text);
            true
        });
        assert_eq!(out, "abc");
    }

    #[test]
    fn test_validation_error_becomes_error_event() {
        let (registry, stats) = registry(|c| c.encode("x"));
        let bad = GenerateRequest {
            messages: vec![Message::user("no system")],
            tools: None,
        };
        let mut events = Vec::new();
        run_session(&registry, &bad, |ev| {
            events.push(ev);
            true
        });
        assert_eq!(events, vec![StreamEvent::error("First message must be a system message")]);
        assert_eq!(stats.invocations(), 0);
    }

    #[test]
    fn test_consumer_gone_stops_generation() {
        let (registry, _) = registry(|c| c.encode("abcdef"));
        let mut seen = 0;
        run_session(&registry, &request(), |_| {
            seen += 1;
            seen < 2
        });
        assert_eq!(seen, 2);
        assert!(!registry.is_generating());
    }
}
