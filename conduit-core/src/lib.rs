//! conduit-core: journals, pumps and windowing for event-routed sessions.
//!
//! Components talk through append-only [`journal`]s. [`services::pump`] moves
//! entries between journals, [`services::window`] reassembles streamed chunks
//! inside a pump, and [`services::routing`] refuses to build pumps for a
//! covenant that does not validate.

pub mod config;
pub mod entry;
pub mod journal;
pub mod services;
pub mod utils;

pub use config::CoreConfig;
pub use entry::{Entry, EntryRole, Journaled, Position, Reagent, Record, kinds};
pub use journal::{FileJournal, Journal, JournalError, JournalStream, MemoryJournal};

pub use covenant;
