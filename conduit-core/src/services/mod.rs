// src/services/mod.rs

pub mod bridge;       // pair of opposing pumps for one session
pub mod multiplexer;  // file/process analogue of a pump
pub mod pump;         // the unit of routing
pub mod routing;      // typed route factories behind a covenant check
pub mod shatter;
pub mod window;       // runs inside pumps as a stage

// Public API
pub use bridge::{AcknowledgeAfferent, BridgeError, BridgeReport, BridgeSide, ImbueAfferent, SessionBridge};
pub use multiplexer::{MultiplexError, MultiplexerConfig, TailLine, TailMultiplexer, TailReader};
pub use pump::{
    EntryFilter, FnTransmuter, Pump, PumpError, PumpReport, RouteContext, Stage, TransformError, TransformStage,
    Transmuter,
};
pub use routing::{RouteError, RouteRegistry};
pub use shatter::{BoldSpanBoundary, BoundaryDetector, BoundaryShatter, FnBoundary, ShatterPolicy};
pub use window::{
    BoundaryPolicy, CompositeWindowPolicy, ConcatTransform, FlushCause, Flushed, MaxChunksPolicy, MaxLengthPolicy,
    Window, WindowEngine, WindowError, WindowPolicy, WindowStage, WindowTransform,
};
