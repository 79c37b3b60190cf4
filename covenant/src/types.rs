use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// What one component declares about the entry types it touches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct BranchManifest {
    pub name: String,
    #[serde(default)]
    pub produces: BTreeSet<String>,
    #[serde(default)]
    pub consumes: BTreeSet<String>,

    // background services the branch needs running; carried, not validated
    #[serde(default)]
    pub services: BTreeSet<String>,
}

impl BranchManifest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn produces(mut self, kind: impl Into<String>) -> Self {
        self.produces.insert(kind.into());
        self
    }

    pub fn consumes(mut self, kind: impl Into<String>) -> Self {
        self.consumes.insert(kind.into());
        self
    }

    pub fn requires_service(mut self, service: impl Into<String>) -> Self {
        self.services.insert(service.into());
        self
    }
}

/// One source type forwarded to one or more target types.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Route {
    pub source: String,
    pub targets: BTreeSet<String>,
}

/// A produced type that is explicitly left unrouted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Terminal {
    pub kind: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// A declared routing graph for one protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Covenant {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub manifests: Vec<BranchManifest>,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub terminals: Vec<Terminal>,

    // produced outside the graph (adapters, hosts)
    #[serde(default)]
    pub externals: BTreeSet<String>,
    #[serde(default)]
    pub sources: BTreeSet<String>,
    #[serde(default)]
    pub sinks: BTreeSet<String>,
}

impl Covenant {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn manifest(mut self, manifest: BranchManifest) -> Self {
        self.manifests.push(manifest);
        self
    }

    pub fn route<I, S>(mut self, source: impl Into<String>, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.routes.push(Route {
            source: source.into(),
            targets: targets.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn terminal(mut self, kind: impl Into<String>) -> Self {
        self.terminals.push(Terminal {
            kind: kind.into(),
            reason: None,
        });
        self
    }

    pub fn external(mut self, kind: impl Into<String>) -> Self {
        self.externals.insert(kind.into());
        self
    }

    pub fn source(mut self, kind: impl Into<String>) -> Self {
        self.sources.insert(kind.into());
        self
    }

    pub fn sink(mut self, kind: impl Into<String>) -> Self {
        self.sinks.insert(kind.into());
        self
    }

    /// Run the connectivity check. See [`crate::validator::validate`].
    pub fn validate(&self) -> Result<crate::CovenantGraph, crate::CovenantError> {
        crate::validator::validate(self)
    }
}
