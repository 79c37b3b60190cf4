// conduit-core/src/services/pump.rs
//! Pump: tails one journal, hands matching entries to a stage, appends what the
//! stage produces to another journal.
//!
//! The loop is strictly sequential, so the target sees outputs in source order.
//! Failures are not retried: the first transform or write error ends the pump.

use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::entry::{Journaled, Position, Reagent, Record};
use crate::journal::{Journal, JournalError};
use crate::services::window::WindowError;

#[derive(Debug, Error)]
pub enum TransformError {
    /// The transform has no case for this entry kind.
    #[error("no transform case for entry kind `{0}`")]
    UnexpectedKind(&'static str),

    #[error("transform failed: {0}")]
    Failed(String),

    #[error(transparent)]
    Window(#[from] WindowError),
}

#[derive(Debug, Error)]
pub enum PumpError {
    #[error("pump `{pump}` lost its source: {source}")]
    Source { pump: String, source: JournalError },

    #[error("pump `{pump}` could not write to its target: {source}")]
    Target { pump: String, source: JournalError },

    #[error("pump `{pump}` failed at position {position}: {source}")]
    Transform {
        pump: String,
        position: Position,
        source: TransformError,
    },
}

impl PumpError {
    pub fn pump(&self) -> &str {
        match self {
            PumpError::Source { pump, .. }
            | PumpError::Target { pump, .. }
            | PumpError::Transform { pump, .. } => pump,
        }
    }
}

/// Explicit routing scope handed to every stage call.
#[derive(Debug, Clone)]
pub struct RouteContext {
    pump: String,
    tags: BTreeMap<String, String>,
    cancel: CancellationToken,
}

impl RouteContext {
    pub fn new(pump: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            pump: pump.into(),
            tags: BTreeMap::new(),
            cancel,
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn pump(&self) -> &str {
        &self.pump
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Which entries a stage looks at. Matching is on the exact kind tag only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryFilter {
    Exact(&'static str),
    Excluding(Vec<&'static str>),
}

impl EntryFilter {
    pub fn matches(&self, kind: &str) -> bool {
        match self {
            EntryFilter::Exact(k) => *k == kind,
            EntryFilter::Excluding(skip) => !skip.contains(&kind),
        }
    }
}

/// One entry in, one entry out.
#[async_trait]
pub trait Transmuter<S, T>: Send + Sync {
    async fn transmute(&self, entry: S, reagent: Reagent, ctx: &RouteContext) -> Result<T, TransformError>;
}

/// Adapts a synchronous closure into a [`Transmuter`].
pub struct FnTransmuter<F>(pub F);

#[async_trait]
impl<S, T, F> Transmuter<S, T> for FnTransmuter<F>
where
    S: Record,
    T: Record,
    F: Fn(S, Reagent) -> Result<T, TransformError> + Send + Sync,
{
    async fn transmute(&self, entry: S, reagent: Reagent, _ctx: &RouteContext) -> Result<T, TransformError> {
        (self.0)(entry, reagent)
    }
}

/// What the pump loop drives. A stage may emit nothing (buffering) or many
/// outputs for one input.
#[async_trait]
pub trait Stage<S, T>: Send {
    fn accepts(&self, entry: &S) -> bool;

    async fn process(&mut self, entry: S, reagent: Reagent, ctx: &RouteContext) -> Result<Vec<T>, TransformError>;
}

pub struct TransformStage<S, T> {
    filter: EntryFilter,
    transmuter: Box<dyn Transmuter<S, T>>,
}

impl<S: Record, T: Record> TransformStage<S, T> {
    pub fn new(filter: EntryFilter, transmuter: impl Transmuter<S, T> + 'static) -> Self {
        Self {
            filter,
            transmuter: Box::new(transmuter),
        }
    }

    pub fn exact(kind: &'static str, transmuter: impl Transmuter<S, T> + 'static) -> Self {
        Self::new(EntryFilter::Exact(kind), transmuter)
    }

    pub(crate) fn boxed(filter: EntryFilter, transmuter: Box<dyn Transmuter<S, T>>) -> Self {
        Self { filter, transmuter }
    }

    pub fn filter(&self) -> &EntryFilter {
        &self.filter
    }
}

#[async_trait]
impl<S: Record, T: Record> Stage<S, T> for TransformStage<S, T> {
    fn accepts(&self, entry: &S) -> bool {
        self.filter.matches(entry.kind())
    }

    async fn process(&mut self, entry: S, reagent: Reagent, ctx: &RouteContext) -> Result<Vec<T>, TransformError> {
        Ok(vec![self.transmuter.transmute(entry, reagent, ctx).await?])
    }
}

/// Counters returned when a pump stops cleanly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpReport {
    /// Source entries seen, matching or not.
    pub observed: u64,
    /// Entries the stage accepted.
    pub forwarded: u64,
    /// Entries appended to the target.
    pub written: u64,
    /// Next source position to read; restart from here.
    pub cursor: Position,
    pub cancelled: bool,
}

pub struct Pump<S: Record, T: Record> {
    name: String,
    source: Arc<dyn Journal<S>>,
    target: Arc<dyn Journal<T>>,
    stage: Box<dyn Stage<S, T>>,
    cursor: Position,
    tags: BTreeMap<String, String>,
}

impl<S: Record, T: Record> Pump<S, T> {
    pub fn new(
        name: impl Into<String>,
        source: Arc<dyn Journal<S>>,
        target: Arc<dyn Journal<T>>,
        stage: impl Stage<S, T> + 'static,
    ) -> Self {
        Self::with_stage(name, source, target, Box::new(stage))
    }

    pub fn with_stage(
        name: impl Into<String>,
        source: Arc<dyn Journal<S>>,
        target: Arc<dyn Journal<T>>,
        stage: Box<dyn Stage<S, T>>,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            target,
            stage,
            cursor: 0,
            tags: BTreeMap::new(),
        }
    }

    /// Exact-kind pump over a one-to-one transmuter.
    pub fn exact(
        name: impl Into<String>,
        source: Arc<dyn Journal<S>>,
        target: Arc<dyn Journal<T>>,
        kind: &'static str,
        transmuter: impl Transmuter<S, T> + 'static,
    ) -> Self {
        Self::new(name, source, target, TransformStage::exact(kind, transmuter))
    }

    pub fn starting_at(mut self, position: Position) -> Self {
        self.cursor = position;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cursor(&self) -> Position {
        self.cursor
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<Result<PumpReport, PumpError>> {
        tokio::spawn(self.run(cancel))
    }

    /// Run until `cancel` fires or the source is closed and drained.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<PumpReport, PumpError> {
        let mut ctx = RouteContext::new(self.name.clone(), cancel.clone());
        for (k, v) in std::mem::take(&mut self.tags) {
            ctx = ctx.with_tag(k, v);
        }

        tracing::debug!(
            pump = %self.name,
            source = self.source.name(),
            target = self.target.name(),
            from = self.cursor,
            "pump started"
        );

        let result = self.pump_loop(&ctx, &cancel).await;
        match &result {
            Ok(report) if report.cancelled => {
                tracing::debug!(pump = %self.name, cursor = report.cursor, written = report.written, "pump cancelled");
            }
            Ok(report) => {
                tracing::debug!(pump = %self.name, cursor = report.cursor, written = report.written, "pump drained");
            }
            Err(e) => tracing::error!(pump = %self.name, error = %e, "pump failed"),
        }
        result
    }

    async fn pump_loop(&mut self, ctx: &RouteContext, cancel: &CancellationToken) -> Result<PumpReport, PumpError> {
        let mut report = PumpReport::default();
        let mut stream = self.source.tail_from(self.cursor, cancel.clone());

        while let Some(item) = stream.next().await {
            let Journaled { position, entry } = item.map_err(|source| PumpError::Source {
                pump: self.name.clone(),
                source,
            })?;
            report.observed += 1;

            if !self.stage.accepts(&entry) {
                self.cursor = position + 1;
                continue;
            }
            report.forwarded += 1;

            let processed = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = self.stage.process(entry, Reagent(position), ctx) => Some(result),
            };
            // cancelled mid-transform: the cursor stays on this entry
            let Some(result) = processed else { break };
            let outputs = result.map_err(|source| PumpError::Transform {
                pump: self.name.clone(),
                position,
                source,
            })?;

            for output in outputs {
                self.target
                    .append(output)
                    .await
                    .map_err(|source| PumpError::Target {
                        pump: self.name.clone(),
                        source,
                    })?;
                report.written += 1;
            }
            self.cursor = position + 1;
        }

        report.cursor = self.cursor;
        report.cancelled = cancel.is_cancelled();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_filter_is_equality_only() {
        let f = EntryFilter::Exact("afferent");
        assert!(f.matches("afferent"));
        assert!(!f.matches("afferent_chunk"));
        assert!(!f.matches("affer"));
    }

    #[test]
    fn excluding_filter_skips_listed_kinds() {
        let f = EntryFilter::Excluding(vec!["draft", "acknowledgement"]);
        assert!(f.matches("chunk"));
        assert!(!f.matches("draft"));
    }

    #[test]
    fn context_carries_tags() {
        let ctx = RouteContext::new("p", CancellationToken::new()).with_tag("session", "s1");
        assert_eq!(ctx.pump(), "p");
        assert_eq!(ctx.tag("session"), Some("s1"));
        assert_eq!(ctx.tag("missing"), None);
    }
}
