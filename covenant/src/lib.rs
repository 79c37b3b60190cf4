// Public modules so conduit-core can register routes against them
pub mod error;
pub mod graph;
pub mod types;
pub mod validator;

pub use error::{CovenantError, IslandReason, Violation};
pub use graph::CovenantGraph;
pub use types::{BranchManifest, Covenant, Route, Terminal};
pub use validator::{collect_violations, validate};

/// --- TOML entrypoint for hosts that declare covenants on disk ---
pub fn load_covenant_from_str(text: &str) -> Result<Covenant, toml::de::Error> {
    toml::from_str(text)
}
