//! journal/
//!
//! Append-only, position-addressed logs of [`Record`]s.
//!
//! # Semantics
//! - `append` assigns the next position (starting at 0); positions are never
//!   reused or rewritten.
//! - `tail_from(p)` replays every entry `>= p`, then follows the head live until
//!   the cancel token fires or the journal is closed. Both endings are clean
//!   (the stream simply ends).
//! - `read_backward(p)` is a finite, newest-first scan of entries `<= p`.
//! - Any number of tailers may run concurrently with appenders.

mod file;
mod memory;

pub use file::FileJournal;
pub use memory::MemoryJournal;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::entry::{Journaled, Position, Record};

pub type JournalStream<E> = BoxStream<'static, Result<Journaled<E>, JournalError>>;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal `{0}` is closed")]
    Closed(String),

    #[error("journal io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("journal codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("journal `{journal}` is corrupt at line {line}: {reason}")]
    Corrupt {
        journal: String,
        line: usize,
        reason: String,
    },

    #[error("journal `{0}` lock poisoned")]
    Poisoned(String),
}

#[async_trait]
pub trait Journal<E: Record>: Send + Sync {
    fn name(&self) -> &str;

    /// Append and return the assigned position.
    async fn append(&self, entry: E) -> Result<Position, JournalError>;

    /// Replay from `from`, then follow live.
    fn tail_from(&self, from: Position, cancel: CancellationToken) -> JournalStream<E>;

    /// Newest-first scan starting at `from` (clamped to the last entry).
    fn read_backward(&self, from: Position, cancel: CancellationToken) -> JournalStream<E>;

    /// Position the next append will receive.
    fn head(&self) -> Position;

    /// Stop accepting appends and let live tails finish once drained.
    fn close(&self);
}
