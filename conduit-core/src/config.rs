use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::entry::Record;
use crate::services::shatter::BoldSpanBoundary;
use crate::services::window::{
    BoundaryPolicy, CompositeWindowPolicy, MaxChunksPolicy, MaxLengthPolicy,
};
use crate::utils::path::absolutize;

pub const CONFIG_FILE: &str = "conduit.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub journal: JournalConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub multiplexer: MultiplexerDefaults,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CoreConfig {
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE);
        let mut cfg = if path.exists() {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            Self::from_toml_str(&text)
                .with_context(|| format!("parsing config file {}", path.display()))?
        } else {
            tracing::info!(
                "No config file found at {}. Using CoreConfig::default().",
                path.display()
            );
            CoreConfig::default()
        };
        cfg.resolve_paths(root);
        Ok(cfg)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str::<CoreConfig>(text)?)
    }

    fn resolve_paths(&mut self, root: &Path) {
        self.journal.dir = absolutize(root, &self.journal.dir);
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JournalConfig {
    #[serde(default = "JournalConfig::default_dir")]
    pub dir: PathBuf,
    #[serde(default)]
    pub fsync: bool,
}

impl JournalConfig {
    fn default_dir() -> PathBuf {
        PathBuf::from("journals")
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.ndjson"))
    }
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            dir: Self::default_dir(),
            fsync: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    // 0 disables the policy
    #[serde(default = "WindowConfig::default_max_chars")]
    pub max_chars: usize,
    #[serde(default)]
    pub max_chunks: usize,
    #[serde(default = "WindowConfig::default_boundary_enabled")]
    pub boundary_enabled: bool,
    #[serde(default = "WindowConfig::default_boundary_lookback")]
    pub boundary_lookback: usize,
}

impl WindowConfig {
    fn default_max_chars() -> usize {
        2000
    }

    fn default_boundary_enabled() -> bool {
        true
    }

    fn default_boundary_lookback() -> usize {
        1
    }

    /// Compose the configured policies (logical OR).
    pub fn policy<E: Record>(&self) -> CompositeWindowPolicy<E> {
        let mut composite = CompositeWindowPolicy::new();
        if self.max_chars > 0 {
            composite = composite.with(MaxLengthPolicy::new(self.max_chars));
        }
        if self.max_chunks > 0 {
            composite = composite.with(MaxChunksPolicy::new(self.max_chunks));
        }
        if self.boundary_enabled {
            composite = composite.with(
                BoundaryPolicy::new(BoldSpanBoundary).with_lookback(self.boundary_lookback),
            );
        }
        composite
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            max_chars: Self::default_max_chars(),
            max_chunks: 0,
            boundary_enabled: Self::default_boundary_enabled(),
            boundary_lookback: Self::default_boundary_lookback(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MultiplexerDefaults {
    #[serde(default = "MultiplexerDefaults::default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "MultiplexerDefaults::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl MultiplexerDefaults {
    fn default_channel_capacity() -> usize {
        256
    }

    fn default_poll_interval_ms() -> u64 {
        100
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for MultiplexerDefaults {
    fn default() -> Self {
        Self {
            channel_capacity: Self::default_channel_capacity(),
            poll_interval_ms: Self::default_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
    #[serde(default)]
    pub ansi: bool,
    #[serde(default = "LoggingConfig::default_with_target")]
    pub with_target: bool,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }

    fn default_with_target() -> bool {
        true
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            ansi: false,
            with_target: Self::default_with_target(),
        }
    }
}
