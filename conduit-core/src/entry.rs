//! Entry model shared by every journal.
//!
//! - [`Record`] is what a journal can hold: an exact kind tag, a role, a sender
//!   and a text payload.
//! - [`Entry`] is the canonical tagged union used inside a session.
//! - Kind tags double as covenant type names, so they are `&'static str`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonic, never reused, assigned at append.
pub type Position = u64;

/// Classification of a record for windowing and bridging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryRole {
    Normal,
    Chunk,
    Acknowledgement,
    Completion,
}

pub trait Record: Clone + fmt::Debug + Send + Sync + 'static {
    /// Exact runtime type tag. Pumps filter on equality of this value only.
    fn kind(&self) -> &'static str;
    fn role(&self) -> EntryRole;
    fn sender(&self) -> &str;
    fn payload(&self) -> &str;

    /// Logical turn for chunk/completion records.
    fn turn(&self) -> Option<&str> {
        None
    }

    /// Same kind, sender and turn, different payload. Used when a chunk is
    /// split or a remainder is carried over.
    fn with_payload(&self, payload: String) -> Self;
}

/// Correlation value threaded through a transform: the source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reagent(pub Position);

impl Reagent {
    pub fn position(&self) -> Position {
        self.0
    }
}

/// One record together with the position the journal assigned it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Journaled<E> {
    pub position: Position,
    pub entry: E,
}

pub mod kinds {
    pub const AFFERENT: &str = "afferent";
    pub const EFFERENT: &str = "efferent";
    pub const CHUNK: &str = "chunk";
    pub const DRAFT: &str = "draft";
    pub const COMPLETION: &str = "completion";
    pub const ACKNOWLEDGEMENT: &str = "acknowledgement";
    pub const SUMMARY: &str = "summary";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Entry {
    /// Inbound to the core.
    Afferent {
        sender: String,
        payload: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reagent: Option<Reagent>,
    },
    /// Outbound from the core.
    Efferent {
        sender: String,
        payload: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reagent: Option<Reagent>,
    },
    Chunk {
        sender: String,
        turn: String,
        payload: String,
    },
    /// Provisional preview of an outbound message; never bridged.
    Draft {
        sender: String,
        turn: String,
        payload: String,
    },
    Completion {
        sender: String,
        turn: String,
        #[serde(default)]
        payload: String,
    },
    Acknowledgement {
        sender: String,
        reagent: Reagent,
        #[serde(default)]
        payload: String,
    },
    /// Coherent text assembled from a window of chunks.
    Summary {
        sender: String,
        turn: String,
        payload: String,
    },
}

impl Entry {
    pub fn afferent(sender: impl Into<String>, payload: impl Into<String>) -> Self {
        Entry::Afferent {
            sender: sender.into(),
            payload: payload.into(),
            reagent: None,
        }
    }

    pub fn efferent(sender: impl Into<String>, payload: impl Into<String>) -> Self {
        Entry::Efferent {
            sender: sender.into(),
            payload: payload.into(),
            reagent: None,
        }
    }

    pub fn chunk(
        sender: impl Into<String>,
        turn: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Entry::Chunk {
            sender: sender.into(),
            turn: turn.into(),
            payload: payload.into(),
        }
    }

    pub fn draft(
        sender: impl Into<String>,
        turn: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Entry::Draft {
            sender: sender.into(),
            turn: turn.into(),
            payload: payload.into(),
        }
    }

    pub fn completion(sender: impl Into<String>, turn: impl Into<String>) -> Self {
        Entry::Completion {
            sender: sender.into(),
            turn: turn.into(),
            payload: String::new(),
        }
    }

    pub fn acknowledgement(
        sender: impl Into<String>,
        reagent: Reagent,
        payload: impl Into<String>,
    ) -> Self {
        Entry::Acknowledgement {
            sender: sender.into(),
            reagent,
            payload: payload.into(),
        }
    }

    pub fn summary(
        sender: impl Into<String>,
        turn: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Entry::Summary {
            sender: sender.into(),
            turn: turn.into(),
            payload: payload.into(),
        }
    }

    /// Fresh turn identifier for a new run of chunks.
    pub fn new_turn() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Attach a reagent to afferent/efferent entries; other kinds are returned as-is.
    pub fn imbued(self, with: Reagent) -> Self {
        match self {
            Entry::Afferent { sender, payload, .. } => Entry::Afferent {
                sender,
                payload,
                reagent: Some(with),
            },
            Entry::Efferent { sender, payload, .. } => Entry::Efferent {
                sender,
                payload,
                reagent: Some(with),
            },
            other => other,
        }
    }

    pub fn reagent(&self) -> Option<Reagent> {
        match self {
            Entry::Afferent { reagent, .. } | Entry::Efferent { reagent, .. } => *reagent,
            Entry::Acknowledgement { reagent, .. } => Some(*reagent),
            _ => None,
        }
    }
}

impl Record for Entry {
    fn kind(&self) -> &'static str {
        match self {
            Entry::Afferent { .. } => kinds::AFFERENT,
            Entry::Efferent { .. } => kinds::EFFERENT,
            Entry::Chunk { .. } => kinds::CHUNK,
            Entry::Draft { .. } => kinds::DRAFT,
            Entry::Completion { .. } => kinds::COMPLETION,
            Entry::Acknowledgement { .. } => kinds::ACKNOWLEDGEMENT,
            Entry::Summary { .. } => kinds::SUMMARY,
        }
    }

    fn role(&self) -> EntryRole {
        match self {
            Entry::Afferent { .. } | Entry::Efferent { .. } | Entry::Summary { .. } => {
                EntryRole::Normal
            }
            Entry::Chunk { .. } | Entry::Draft { .. } => EntryRole::Chunk,
            Entry::Completion { .. } => EntryRole::Completion,
            Entry::Acknowledgement { .. } => EntryRole::Acknowledgement,
        }
    }

    fn sender(&self) -> &str {
        match self {
            Entry::Afferent { sender, .. }
            | Entry::Efferent { sender, .. }
            | Entry::Chunk { sender, .. }
            | Entry::Draft { sender, .. }
            | Entry::Completion { sender, .. }
            | Entry::Acknowledgement { sender, .. }
            | Entry::Summary { sender, .. } => sender,
        }
    }

    fn payload(&self) -> &str {
        match self {
            Entry::Afferent { payload, .. }
            | Entry::Efferent { payload, .. }
            | Entry::Chunk { payload, .. }
            | Entry::Draft { payload, .. }
            | Entry::Completion { payload, .. }
            | Entry::Acknowledgement { payload, .. }
            | Entry::Summary { payload, .. } => payload,
        }
    }

    fn turn(&self) -> Option<&str> {
        match self {
            Entry::Chunk { turn, .. }
            | Entry::Draft { turn, .. }
            | Entry::Completion { turn, .. }
            | Entry::Summary { turn, .. } => Some(turn),
            _ => None,
        }
    }

    fn with_payload(&self, payload: String) -> Self {
        let mut next = self.clone();
        match &mut next {
            Entry::Afferent { payload: p, .. }
            | Entry::Efferent { payload: p, .. }
            | Entry::Chunk { payload: p, .. }
            | Entry::Draft { payload: p, .. }
            | Entry::Completion { payload: p, .. }
            | Entry::Acknowledgement { payload: p, .. }
            | Entry::Summary { payload: p, .. } => *p = payload,
        }
        next
    }
}
