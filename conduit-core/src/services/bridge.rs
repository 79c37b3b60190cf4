// conduit-core/src/services/bridge.rs
//! Session bridge: two opposing pumps between an external (adapter-facing)
//! journal and the internal session journal.
//!
//! Correlation needs no shared table. The inbound side stamps each afferent
//! entry with its external position; the outbound side turns that stamped
//! entry back into an acknowledgement carrying the same reagent.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::entry::{Entry, Position, Reagent, Record, kinds};
use crate::journal::Journal;
use crate::services::pump::{
    EntryFilter, Pump, PumpError, PumpReport, RouteContext, TransformError, TransformStage, Transmuter,
};

/// Kinds neither direction forwards by default.
pub const DEFAULT_SKIP: [&str; 2] = [kinds::ACKNOWLEDGEMENT, kinds::DRAFT];

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("inbound side of bridge `{bridge}` failed: {source}")]
    Inbound { bridge: String, source: PumpError },

    #[error("outbound side of bridge `{bridge}` failed: {source}")]
    Outbound { bridge: String, source: PumpError },

    #[error("{side} side of bridge `{bridge}` panicked: {reason}")]
    Panicked {
        bridge: String,
        side: &'static str,
        reason: String,
    },
}

/// One direction: a skip list plus the transmuter for everything else.
pub struct BridgeSide<S, T> {
    skip: Vec<&'static str>,
    transmuter: Box<dyn Transmuter<S, T>>,
    from: Option<Position>,
}

impl<S: Record, T: Record> BridgeSide<S, T> {
    pub fn new(transmuter: impl Transmuter<S, T> + 'static) -> Self {
        Self {
            skip: DEFAULT_SKIP.to_vec(),
            transmuter: Box::new(transmuter),
            from: None,
        }
    }

    pub fn skipping(mut self, kinds: impl IntoIterator<Item = &'static str>) -> Self {
        for kind in kinds {
            if !self.skip.contains(&kind) {
                self.skip.push(kind);
            }
        }
        self
    }

    /// Start tailing at `position` instead of the current head.
    pub fn starting_at(mut self, position: Position) -> Self {
        self.from = Some(position);
        self
    }

    pub fn skipped(&self) -> &[&'static str] {
        &self.skip
    }

    fn into_pump(self, name: String, source: Arc<dyn Journal<S>>, target: Arc<dyn Journal<T>>) -> Pump<S, T> {
        let start = self.from.unwrap_or_else(|| source.head());
        let stage = TransformStage::boxed(EntryFilter::Excluding(self.skip), self.transmuter);
        Pump::new(name, source, target, stage).starting_at(start)
    }
}

impl BridgeSide<Entry, Entry> {
    /// External to internal. Efferent entries are ours coming back, so they
    /// are skipped along with the defaults.
    pub fn canonical_inbound() -> Self {
        Self::new(ImbueAfferent).skipping([kinds::EFFERENT])
    }

    /// Internal to external. Streaming kinds arrived from outside and are not
    /// sent back.
    pub fn canonical_outbound() -> Self {
        Self::new(AcknowledgeAfferent).skipping([kinds::CHUNK, kinds::COMPLETION, kinds::SUMMARY])
    }
}

/// Stamps afferent entries with their external position; other inbound kinds
/// pass unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImbueAfferent;

#[async_trait]
impl Transmuter<Entry, Entry> for ImbueAfferent {
    async fn transmute(&self, entry: Entry, reagent: Reagent, _ctx: &RouteContext) -> Result<Entry, TransformError> {
        match entry {
            e @ Entry::Afferent { .. } => Ok(e.imbued(reagent)),
            e @ (Entry::Chunk { .. } | Entry::Completion { .. } | Entry::Summary { .. }) => Ok(e),
            other => Err(TransformError::UnexpectedKind(other.kind())),
        }
    }
}

/// Answers each stamped afferent with an acknowledgement and forwards efferent
/// entries as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcknowledgeAfferent;

#[async_trait]
impl Transmuter<Entry, Entry> for AcknowledgeAfferent {
    async fn transmute(&self, entry: Entry, _reagent: Reagent, ctx: &RouteContext) -> Result<Entry, TransformError> {
        match entry {
            Entry::Afferent {
                reagent: Some(r), ..
            } => Ok(Entry::acknowledgement(ctx.pump(), r, "")),
            Entry::Afferent { reagent: None, .. } => Err(TransformError::Failed(
                "afferent entry carries no reagent; it did not arrive through a bridge".to_string(),
            )),
            e @ Entry::Efferent { .. } => Ok(e),
            other => Err(TransformError::UnexpectedKind(other.kind())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeReport {
    pub inbound: PumpReport,
    pub outbound: PumpReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Inbound,
    Outbound,
}

type PumpTask = JoinHandle<Result<PumpReport, PumpError>>;

pub struct SessionBridge {
    name: String,
    cancel: CancellationToken,
    inbound: PumpTask,
    outbound: PumpTask,
}

impl SessionBridge {
    /// Spawn both directions under a child of `cancel`.
    pub fn start<X: Record, I: Record>(
        name: impl Into<String>,
        external: Arc<dyn Journal<X>>,
        internal: Arc<dyn Journal<I>>,
        inbound: BridgeSide<X, I>,
        outbound: BridgeSide<I, X>,
        cancel: &CancellationToken,
    ) -> Self {
        let name = name.into();
        let cancel = cancel.child_token();

        let inbound = inbound
            .into_pump(format!("{name}/inbound"), Arc::clone(&external), Arc::clone(&internal))
            .with_tag("bridge", name.as_str())
            .spawn(cancel.clone());
        let outbound = outbound
            .into_pump(format!("{name}/outbound"), internal, external)
            .with_tag("bridge", name.as_str())
            .spawn(cancel.clone());

        tracing::info!(bridge = %name, "session bridge started");
        Self {
            name,
            cancel,
            inbound,
            outbound,
        }
    }

    /// Canonical wiring over [`Entry`] journals.
    pub fn canonical(
        name: impl Into<String>,
        external: Arc<dyn Journal<Entry>>,
        internal: Arc<dyn Journal<Entry>>,
        cancel: &CancellationToken,
    ) -> Self {
        Self::start(
            name,
            external,
            internal,
            BridgeSide::canonical_inbound(),
            BridgeSide::canonical_outbound(),
            cancel,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel both directions and wait for them.
    pub async fn shutdown(self) -> Result<BridgeReport, BridgeError> {
        self.cancel.cancel();
        self.join().await
    }

    /// Wait for both directions. The first failure cancels the other side.
    pub async fn join(self) -> Result<BridgeReport, BridgeError> {
        let SessionBridge {
            name,
            cancel,
            mut inbound,
            mut outbound,
        } = self;

        let (first_side, joined) = tokio::select! {
            r = &mut inbound => (Side::Inbound, r),
            r = &mut outbound => (Side::Outbound, r),
        };
        let first = settle(&name, first_side, joined);
        if first.is_err() {
            cancel.cancel();
        }

        let (second_side, pending) = match first_side {
            Side::Inbound => (Side::Outbound, outbound),
            Side::Outbound => (Side::Inbound, inbound),
        };
        let second = settle(&name, second_side, pending.await);

        let first = first?;
        let second = second?;
        let report = match first_side {
            Side::Inbound => BridgeReport {
                inbound: first,
                outbound: second,
            },
            Side::Outbound => BridgeReport {
                inbound: second,
                outbound: first,
            },
        };
        tracing::info!(bridge = %name, inbound = report.inbound.written, outbound = report.outbound.written, "session bridge stopped");
        Ok(report)
    }
}

fn settle(
    bridge: &str,
    side: Side,
    joined: Result<Result<PumpReport, PumpError>, JoinError>,
) -> Result<PumpReport, BridgeError> {
    match joined {
        Ok(Ok(report)) => Ok(report),
        Ok(Err(source)) => Err(match side {
            Side::Inbound => BridgeError::Inbound {
                bridge: bridge.to_string(),
                source,
            },
            Side::Outbound => BridgeError::Outbound {
                bridge: bridge.to_string(),
                source,
            },
        }),
        Err(e) => Err(BridgeError::Panicked {
            bridge: bridge.to_string(),
            side: match side {
                Side::Inbound => "inbound",
                Side::Outbound => "outbound",
            },
            reason: e.to_string(),
        }),
    }
}
