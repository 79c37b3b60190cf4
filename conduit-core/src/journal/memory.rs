use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::{Journal, JournalError, JournalStream};
use crate::entry::{Journaled, Position, Record};

// tailers copy at most this many entries per lock acquisition
const TAIL_BATCH: usize = 256;

#[derive(Debug, Clone, Copy, Default)]
struct Head {
    len: u64,
    closed: bool,
}

/// Ordered entry storage plus the head signal tailers wait on. Shared by the
/// in-memory and file-backed journals.
pub(crate) struct LogCore<E> {
    name: String,
    entries: RwLock<Vec<E>>,
    head: watch::Sender<Head>,
}

impl<E: Record> LogCore<E> {
    pub(crate) fn new(name: impl Into<String>, seed: Vec<E>) -> Arc<Self> {
        let (head, _) = watch::channel(Head {
            len: seed.len() as u64,
            closed: false,
        });
        Arc::new(Self {
            name: name.into(),
            entries: RwLock::new(seed),
            head,
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.head.borrow().closed
    }

    pub(crate) fn push(&self, entry: E) -> Result<Position, JournalError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| JournalError::Poisoned(self.name.clone()))?;
        if self.is_closed() {
            return Err(JournalError::Closed(self.name.clone()));
        }
        let position = entries.len() as Position;
        entries.push(entry);
        let len = entries.len() as u64;
        // still under the write lock, so the head never moves backwards
        self.head.send_modify(|h| h.len = len);
        Ok(position)
    }

    pub(crate) fn len(&self) -> u64 {
        self.head.borrow().len
    }

    pub(crate) fn close(&self) {
        self.head.send_modify(|h| h.closed = true);
    }

    fn slice(&self, from: u64, to: u64) -> Result<Vec<E>, JournalError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| JournalError::Poisoned(self.name.clone()))?;
        let from = from as usize;
        let to = (to as usize).min(entries.len()).min(from + TAIL_BATCH);
        Ok(entries.get(from..to).map(<[E]>::to_vec).unwrap_or_default())
    }

    fn get(&self, position: u64) -> Result<Option<E>, JournalError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| JournalError::Poisoned(self.name.clone()))?;
        Ok(entries.get(position as usize).cloned())
    }

    pub(crate) fn tail(self: &Arc<Self>, from: Position, cancel: CancellationToken) -> JournalStream<E> {
        let state = TailState {
            core: Arc::clone(self),
            rx: self.head.subscribe(),
            cursor: from,
            pending: VecDeque::new(),
            cancel,
            failed: false,
        };

        stream::unfold(state, |mut st| async move {
            loop {
                if st.failed || st.cancel.is_cancelled() {
                    return None;
                }
                if let Some(item) = st.pending.pop_front() {
                    return Some((Ok(item), st));
                }

                let head = *st.rx.borrow_and_update();
                if st.cursor < head.len {
                    match st.core.slice(st.cursor, head.len) {
                        Ok(batch) => {
                            for entry in batch {
                                st.pending.push_back(Journaled {
                                    position: st.cursor,
                                    entry,
                                });
                                st.cursor += 1;
                            }
                            continue;
                        }
                        Err(e) => {
                            st.failed = true;
                            return Some((Err(e), st));
                        }
                    }
                }
                if head.closed {
                    return None;
                }

                tokio::select! {
                    _ = st.cancel.cancelled() => return None,
                    changed = st.rx.changed() => {
                        if changed.is_err() {
                            return None;
                        }
                    }
                }
            }
        })
        .boxed()
    }

    pub(crate) fn backward(self: &Arc<Self>, from: Position, cancel: CancellationToken) -> JournalStream<E> {
        let len = self.len();
        let start = if len == 0 { None } else { Some(from.min(len - 1)) };
        let core = Arc::clone(self);

        stream::unfold((core, start, cancel), |(core, next, cancel)| async move {
            let position = next?;
            if cancel.is_cancelled() {
                return None;
            }
            let following = position.checked_sub(1);
            match core.get(position) {
                Ok(Some(entry)) => Some((Ok(Journaled { position, entry }), (core, following, cancel))),
                Ok(None) => None,
                Err(e) => Some((Err(e), (core, None, cancel))),
            }
        })
        .boxed()
    }
}

struct TailState<E> {
    core: Arc<LogCore<E>>,
    rx: watch::Receiver<Head>,
    cursor: Position,
    pending: VecDeque<Journaled<E>>,
    cancel: CancellationToken,
    failed: bool,
}

/// Journal kept entirely in memory.
pub struct MemoryJournal<E> {
    core: Arc<LogCore<E>>,
}

impl<E: Record> MemoryJournal<E> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            core: LogCore::new(name, Vec::new()),
        }
    }

    pub fn shared(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(name))
    }
}

#[async_trait]
impl<E: Record> Journal<E> for MemoryJournal<E> {
    fn name(&self) -> &str {
        self.core.name()
    }

    async fn append(&self, entry: E) -> Result<Position, JournalError> {
        self.core.push(entry)
    }

    fn tail_from(&self, from: Position, cancel: CancellationToken) -> JournalStream<E> {
        self.core.tail(from, cancel)
    }

    fn read_backward(&self, from: Position, cancel: CancellationToken) -> JournalStream<E> {
        self.core.backward(from, cancel)
    }

    fn head(&self) -> Position {
        self.core.len()
    }

    fn close(&self) {
        self.core.close();
    }
}
