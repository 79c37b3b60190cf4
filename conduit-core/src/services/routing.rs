// conduit-core/src/services/routing.rs
//! Typed route registry. Routes are registered as factories keyed by
//! `(source_kind, target_kind)`; the registry renders itself into a covenant
//! and only builds pumps once that covenant validates.

use covenant::{Covenant, CovenantError};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;

use crate::entry::Record;
use crate::journal::Journal;
use crate::services::pump::{Pump, Stage, TransformStage, Transmuter};

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("route `{source_kind}` -> `{target_kind}` is already registered")]
    Duplicate {
        source_kind: &'static str,
        target_kind: &'static str,
    },

    #[error("`{0}` is registered both as a route source and as a terminal")]
    TerminalConflict(&'static str),

    #[error(transparent)]
    Covenant(#[from] CovenantError),
}

type StageFactory<S, T> = Box<dyn Fn() -> Box<dyn Stage<S, T>> + Send + Sync>;

pub struct RouteRegistry<S, T> {
    routes: BTreeMap<(&'static str, &'static str), StageFactory<S, T>>,
    terminals: BTreeSet<&'static str>,
}

impl<S: Record, T: Record> RouteRegistry<S, T> {
    pub fn new() -> Self {
        Self {
            routes: BTreeMap::new(),
            terminals: BTreeSet::new(),
        }
    }

    /// Register a stage factory for one route.
    pub fn register<St, F>(
        &mut self,
        source_kind: &'static str,
        target_kind: &'static str,
        factory: F,
    ) -> Result<&mut Self, RouteError>
    where
        St: Stage<S, T> + 'static,
        F: Fn() -> St + Send + Sync + 'static,
    {
        if self.terminals.contains(source_kind) {
            return Err(RouteError::TerminalConflict(source_kind));
        }
        if self.routes.contains_key(&(source_kind, target_kind)) {
            return Err(RouteError::Duplicate {
                source_kind,
                target_kind,
            });
        }
        self.routes.insert(
            (source_kind, target_kind),
            Box::new(move || Box::new(factory()) as Box<dyn Stage<S, T>>),
        );
        Ok(self)
    }

    /// Register an exact-kind one-to-one route.
    pub fn transmute<Tr, F>(
        &mut self,
        source_kind: &'static str,
        target_kind: &'static str,
        factory: F,
    ) -> Result<&mut Self, RouteError>
    where
        Tr: Transmuter<S, T> + 'static,
        F: Fn() -> Tr + Send + Sync + 'static,
    {
        self.register(source_kind, target_kind, move || {
            TransformStage::exact(source_kind, factory())
        })
    }

    /// Declare a produced kind as deliberately unrouted.
    pub fn terminal(&mut self, kind: &'static str) -> Result<&mut Self, RouteError> {
        if self.routes.keys().any(|(source, _)| *source == kind) {
            return Err(RouteError::TerminalConflict(kind));
        }
        self.terminals.insert(kind);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// `base` plus one route per source kind and one terminal per terminal kind.
    pub fn covenant(&self, base: Covenant) -> Covenant {
        let mut grouped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for &(source, target) in self.routes.keys() {
            grouped.entry(source).or_default().push(target);
        }
        let mut out = grouped
            .into_iter()
            .fold(base, |c, (source, targets)| c.route(source, targets));
        for kind in &self.terminals {
            out = out.terminal(*kind);
        }
        out
    }

    /// Validate the merged covenant, then build one pump per route. Nothing is
    /// built when validation fails.
    pub fn build(
        &self,
        base: Covenant,
        source: Arc<dyn Journal<S>>,
        target: Arc<dyn Journal<T>>,
    ) -> Result<Vec<Pump<S, T>>, RouteError> {
        let covenant = self.covenant(base);
        covenant.validate()?;

        let pumps: Vec<Pump<S, T>> = self
            .routes
            .iter()
            .map(|((src, tgt), factory)| {
                Pump::with_stage(
                    format!("{}:{src}->{tgt}", covenant.name),
                    Arc::clone(&source),
                    Arc::clone(&target),
                    factory(),
                )
                .with_tag("covenant", covenant.name.as_str())
            })
            .collect();
        tracing::info!(covenant = %covenant.name, pumps = pumps.len(), "routes built");
        Ok(pumps)
    }
}

impl<S: Record, T: Record> Default for RouteRegistry<S, T> {
    fn default() -> Self {
        Self::new()
    }
}
