// conduit-core/src/services/window.rs
//! Window engine: buffers chunks per turn and decides when a run of them is
//! ready to become one coherent output.
//!
//! ```text
//! Empty -> Accumulating -> Ready -> Flushing -> Empty | Accumulating(remainder)
//! ```
//!
//! - A policy firing, or a completion marker arriving, makes a window ready.
//! - A flush takes the whole buffer in one step; nothing is counted twice.
//! - Policies may ask for already-flushed chunks to stay visible as lookback;
//!   lookback is read-only and never flushed again.

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;

use crate::entry::{Reagent, Record};
use crate::services::pump::{RouteContext, Stage, TransformError};
use crate::services::shatter::{BoundaryDetector, ShatterPolicy};

/// Records without a turn share this window.
pub const DEFAULT_TURN: &str = "";

// a completion that keeps yielding remainders is a transform bug
const MAX_COMPLETION_PASSES: usize = 16;

#[derive(Debug, Error)]
pub enum WindowError {
    #[error("window for turn `{turn}` was flushed with no chunks")]
    Empty { turn: String },

    #[error("window transform failed for turn `{turn}`: {reason}")]
    Transform { turn: String, reason: String },

    #[error("turn `{turn}` kept producing remainders after completion")]
    UnboundedRemainder { turn: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushCause {
    Policy,
    Completion,
}

// ----------------- Window -----------------

#[derive(Debug, Clone)]
pub struct Window<E> {
    turn: String,
    chunks: Vec<E>,
    lookback: VecDeque<E>,
    chars: usize,
}

impl<E: Record> Window<E> {
    fn new(turn: &str, lookback: VecDeque<E>) -> Self {
        Self {
            turn: turn.to_string(),
            chunks: Vec::new(),
            lookback,
            chars: 0,
        }
    }

    fn push(&mut self, chunk: E) {
        self.chars += chunk.payload().chars().count();
        self.chunks.push(chunk);
    }

    pub fn turn(&self) -> &str {
        &self.turn
    }

    pub fn chunks(&self) -> &[E] {
        &self.chunks
    }

    /// Already-flushed chunks, oldest first.
    pub fn lookback(&self) -> impl Iterator<Item = &E> {
        self.lookback.iter()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Pending length in chars, not bytes.
    pub fn char_len(&self) -> usize {
        self.chars
    }

    pub fn text(&self) -> String {
        self.chunks.iter().map(Record::payload).collect()
    }

    /// Concatenated payloads of the newest `n` lookback chunks.
    pub fn lookback_text(&self, n: usize) -> String {
        let skip = self.lookback.len().saturating_sub(n);
        self.lookback.iter().skip(skip).map(Record::payload).collect()
    }
}

// ----------------- Policies -----------------

pub trait WindowPolicy<E>: Send + Sync {
    fn should_emit(&self, window: &Window<E>) -> bool;

    /// How many flushed chunks this policy wants kept as lookback.
    fn min_lookback(&self) -> usize {
        0
    }
}

/// Ready once the pending text reaches `max_chars` characters.
#[derive(Debug, Clone, Copy)]
pub struct MaxLengthPolicy {
    pub max_chars: usize,
}

impl MaxLengthPolicy {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }
}

impl<E: Record> WindowPolicy<E> for MaxLengthPolicy {
    fn should_emit(&self, window: &Window<E>) -> bool {
        window.char_len() >= self.max_chars
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MaxChunksPolicy {
    pub max_chunks: usize,
}

impl MaxChunksPolicy {
    pub fn new(max_chunks: usize) -> Self {
        Self { max_chunks }
    }
}

impl<E: Record> WindowPolicy<E> for MaxChunksPolicy {
    fn should_emit(&self, window: &Window<E>) -> bool {
        window.len() >= self.max_chunks
    }
}

/// Ready when a content boundary completes in the pending text. Lookback lets
/// a boundary whose marker straddles the previous flush be seen. A boundary
/// that starts exactly where the pending text starts is a carried-over
/// heading and does not fire again.
#[derive(Clone)]
pub struct BoundaryPolicy {
    detector: Arc<dyn BoundaryDetector>,
    lookback: usize,
}

impl BoundaryPolicy {
    pub fn new(detector: impl BoundaryDetector + 'static) -> Self {
        Self {
            detector: Arc::new(detector),
            lookback: 0,
        }
    }

    pub fn with_lookback(mut self, chunks: usize) -> Self {
        self.lookback = chunks;
        self
    }
}

impl<E: Record> WindowPolicy<E> for BoundaryPolicy {
    fn should_emit(&self, window: &Window<E>) -> bool {
        let prefix = window.lookback_text(self.lookback);
        let text = format!("{prefix}{}", window.text());
        let start = prefix.len();
        self.detector
            .spans(&text)
            .into_iter()
            .any(|span| span.start != start && span.end.max(span.start + 1) > start)
    }

    fn min_lookback(&self) -> usize {
        self.lookback
    }
}

/// Logical OR of its members. An empty composite never fires, leaving only
/// completion markers to flush.
pub struct CompositeWindowPolicy<E> {
    policies: Vec<Box<dyn WindowPolicy<E>>>,
}

impl<E> CompositeWindowPolicy<E> {
    pub fn new() -> Self {
        Self {
            policies: Vec::new(),
        }
    }

    pub fn with(mut self, policy: impl WindowPolicy<E> + 'static) -> Self {
        self.policies.push(Box::new(policy));
        self
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl<E> Default for CompositeWindowPolicy<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Record> WindowPolicy<E> for CompositeWindowPolicy<E> {
    fn should_emit(&self, window: &Window<E>) -> bool {
        self.policies.iter().any(|p| p.should_emit(window))
    }

    fn min_lookback(&self) -> usize {
        self.policies
            .iter()
            .map(|p| p.min_lookback())
            .max()
            .unwrap_or(0)
    }
}

// ----------------- Batch transform -----------------

pub struct Flushed<E, T> {
    pub output: T,
    /// Re-seeds a fresh window for the same turn.
    pub remainder: Option<E>,
}

pub trait WindowTransform<E, T>: Send + Sync {
    fn flush(&self, turn: &str, chunks: Vec<E>, cause: FlushCause) -> Result<Flushed<E, T>, WindowError>;
}

type BuildFn<E, T> = dyn Fn(&E, &str, String) -> T + Send + Sync;

/// Concatenates payloads into one output built by `build(first_chunk, turn, text)`.
/// With a boundary detector, policy flushes cut at the last boundary and carry
/// the tail as the remainder; completion flushes never split.
pub struct ConcatTransform<E, T> {
    build: Arc<BuildFn<E, T>>,
    boundary: Option<Arc<dyn BoundaryDetector>>,
}

impl<E: Record, T> ConcatTransform<E, T> {
    pub fn new(build: impl Fn(&E, &str, String) -> T + Send + Sync + 'static) -> Self {
        Self {
            build: Arc::new(build),
            boundary: None,
        }
    }

    pub fn split_at_boundary(mut self, detector: impl BoundaryDetector + 'static) -> Self {
        self.boundary = Some(Arc::new(detector));
        self
    }
}

impl ConcatTransform<crate::entry::Entry, crate::entry::Entry> {
    /// Turns a window of chunks into one `summary` entry.
    pub fn summaries() -> Self {
        Self::new(|first: &crate::entry::Entry, turn: &str, text: String| {
            crate::entry::Entry::summary(first.sender(), turn, text)
        })
    }
}

impl<E: Record, T> WindowTransform<E, T> for ConcatTransform<E, T> {
    fn flush(&self, turn: &str, chunks: Vec<E>, cause: FlushCause) -> Result<Flushed<E, T>, WindowError> {
        let (Some(first), Some(last)) = (chunks.first(), chunks.last()) else {
            return Err(WindowError::Empty {
                turn: turn.to_string(),
            });
        };
        let text: String = chunks.iter().map(Record::payload).collect();

        let cut = match (&self.boundary, cause) {
            (Some(detector), FlushCause::Policy) => detector
                .last(&text)
                .filter(|at| *at > 0 && *at < text.len() && text.is_char_boundary(*at)),
            _ => None,
        };

        Ok(match cut {
            Some(at) => Flushed {
                output: (self.build)(first, turn, text[..at].to_string()),
                remainder: Some(last.with_payload(text[at..].to_string())),
            },
            None => Flushed {
                output: (self.build)(first, turn, text),
                remainder: None,
            },
        })
    }
}

// ----------------- Engine -----------------

/// Owns one window per open turn. Not shared: exactly one task drives it.
pub struct WindowEngine<E, T> {
    policy: Box<dyn WindowPolicy<E>>,
    transform: Box<dyn WindowTransform<E, T>>,
    windows: BTreeMap<String, Window<E>>,
    history: BTreeMap<String, VecDeque<E>>,
    flushes: u64,
}

impl<E: Record, T> WindowEngine<E, T> {
    pub fn new(
        policy: impl WindowPolicy<E> + 'static,
        transform: impl WindowTransform<E, T> + 'static,
    ) -> Self {
        Self {
            policy: Box::new(policy),
            transform: Box::new(transform),
            windows: BTreeMap::new(),
            history: BTreeMap::new(),
            flushes: 0,
        }
    }

    /// Buffer one chunk; returns the output if this chunk made the window ready.
    pub fn push(&mut self, chunk: E) -> Result<Option<T>, WindowError> {
        let turn = chunk.turn().unwrap_or(DEFAULT_TURN).to_string();
        let history = &mut self.history;
        let window = self
            .windows
            .entry(turn.clone())
            .or_insert_with(|| Window::new(&turn, history.remove(&turn).unwrap_or_default()));
        window.push(chunk);

        if self.policy.should_emit(window) {
            return self.flush(&turn, FlushCause::Policy);
        }
        Ok(None)
    }

    /// Forced flush for a completion marker. Pending chunks (and any
    /// remainder they leave) always come out; the turn is then forgotten.
    pub fn complete(&mut self, turn: &str) -> Result<Vec<T>, WindowError> {
        let mut out = Vec::new();
        for _ in 0..MAX_COMPLETION_PASSES {
            match self.flush(turn, FlushCause::Completion)? {
                Some(output) => out.push(output),
                None => break,
            }
            if !self.windows.contains_key(turn) {
                break;
            }
        }
        self.history.remove(turn);
        if self.windows.remove(turn).is_some() {
            return Err(WindowError::UnboundedRemainder {
                turn: turn.to_string(),
            });
        }
        Ok(out)
    }

    pub fn pending(&self, turn: &str) -> usize {
        self.windows.get(turn).map(Window::len).unwrap_or(0)
    }

    pub fn window(&self, turn: &str) -> Option<&Window<E>> {
        self.windows.get(turn)
    }

    pub fn open_turns(&self) -> impl Iterator<Item = &str> {
        self.windows.keys().map(String::as_str)
    }

    pub fn flush_count(&self) -> u64 {
        self.flushes
    }

    fn flush(&mut self, turn: &str, cause: FlushCause) -> Result<Option<T>, WindowError> {
        let Some(mut window) = self.windows.remove(turn) else {
            return Ok(None);
        };
        if window.chunks.is_empty() {
            return Ok(None);
        }

        let chunks = std::mem::take(&mut window.chunks);
        let keep = self.policy.min_lookback();
        let count = chunks.len();
        let mut recent: Vec<E> = chunks[count.saturating_sub(keep + 1)..].to_vec();

        let Flushed { output, remainder } = self.transform.flush(turn, chunks, cause)?;
        self.flushes += 1;

        // a chunk whose tail was carried forward is not history yet
        if remainder.is_some() {
            recent.pop();
        }
        let mut lookback = window.lookback;
        lookback.extend(recent);
        while lookback.len() > keep {
            lookback.pop_front();
        }
        tracing::debug!(turn, chunks = count, ?cause, carried = remainder.is_some(), "window flushed");

        match remainder {
            Some(rest) => {
                let mut next = Window::new(turn, lookback);
                next.push(rest);
                self.windows.insert(turn.to_string(), next);
            }
            None if cause == FlushCause::Policy && keep > 0 => {
                self.history.insert(turn.to_string(), lookback);
            }
            None => {}
        }
        Ok(Some(output))
    }
}

// ----------------- Pump stage -----------------

/// Drives a [`WindowEngine`] from inside a pump: exact-kind chunks are
/// shattered then buffered, exact-kind completion markers force a flush.
pub struct WindowStage<E, T> {
    chunk_kind: &'static str,
    completion_kind: &'static str,
    shatter: Option<Box<dyn ShatterPolicy<E>>>,
    engine: WindowEngine<E, T>,
}

impl<E: Record, T> WindowStage<E, T> {
    pub fn new(chunk_kind: &'static str, completion_kind: &'static str, engine: WindowEngine<E, T>) -> Self {
        Self {
            chunk_kind,
            completion_kind,
            shatter: None,
            engine,
        }
    }

    pub fn with_shatter(mut self, policy: impl ShatterPolicy<E> + 'static) -> Self {
        self.shatter = Some(Box::new(policy));
        self
    }

    pub fn engine(&self) -> &WindowEngine<E, T> {
        &self.engine
    }
}

#[async_trait]
impl<E: Record, T: Record> Stage<E, T> for WindowStage<E, T> {
    fn accepts(&self, entry: &E) -> bool {
        let kind = entry.kind();
        kind == self.chunk_kind || kind == self.completion_kind
    }

    async fn process(&mut self, entry: E, _reagent: Reagent, _ctx: &RouteContext) -> Result<Vec<T>, TransformError> {
        if entry.kind() == self.completion_kind {
            let turn = entry.turn().unwrap_or(DEFAULT_TURN).to_string();
            return Ok(self.engine.complete(&turn)?);
        }

        let mut pieces = match &self.shatter {
            Some(policy) => policy.shatter(&entry),
            None => Vec::new(),
        };
        if pieces.is_empty() {
            pieces.push(entry);
        }

        let mut out = Vec::new();
        for piece in pieces {
            if let Some(output) = self.engine.push(piece)? {
                out.push(output);
            }
        }
        Ok(out)
    }
}
