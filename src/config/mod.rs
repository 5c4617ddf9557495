use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.trellis.dev";
const DEFAULT_MODEL: &str = "standard";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_TURN_TIMEOUT_SECS: u64 = 600;
const DEFAULT_MIN_WRITE_INTERVAL_MS: u64 = 300;
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

// ─── EndpointConfig ───────────────────────────────────────────────────────────

/// Generation endpoint configuration (`[endpoint]` in config.toml).
///
/// Injected into [`crate::stream::client::GenerationClient`] rather than read
/// from ambient globals, so two clients can talk to different endpoints (or a
/// test fixture) without process-wide state.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Base URL of the generation service.
    pub base_url: String,
    /// Model selector sent with every turn request.
    pub model: String,
    /// Generation limit sent with every turn request.
    pub max_tokens: u32,
    /// Per-turn timeout in seconds. The decoder has no internal timer; the
    /// caller wraps the whole turn in `tokio::time::timeout` with this value
    /// and cancels on expiry.
    pub turn_timeout_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            turn_timeout_secs: DEFAULT_TURN_TIMEOUT_SECS,
        }
    }
}

impl EndpointConfig {
    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.turn_timeout_secs)
    }
}

// ─── GovernorConfig ───────────────────────────────────────────────────────────

/// Write-rate governor configuration (`[governor]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Minimum interval between continuous writes for one entity, in
    /// milliseconds. Continuous reports inside the window are dropped;
    /// terminal reports always bypass it.
    pub min_write_interval_ms: u64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            min_write_interval_ms: DEFAULT_MIN_WRITE_INTERVAL_MS,
        }
    }
}

impl GovernorConfig {
    pub fn min_write_interval(&self) -> Duration {
        Duration::from_millis(self.min_write_interval_ms)
    }
}

// ─── ChannelConfig ────────────────────────────────────────────────────────────

/// Refresh-signal channel configuration (`[channel]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Capacity of the broadcast channel. Slow subscribers lag and skip old
    /// signals, which is safe: a lagged subscriber re-fetches once and is
    /// current again.
    pub capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

// ─── SyncConfig ───────────────────────────────────────────────────────────────

/// Top-level configuration for the streaming and sync core.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    pub endpoint: EndpointConfig,
    pub governor: GovernorConfig,
    pub channel: ChannelConfig,
}

impl SyncConfig {
    /// Load configuration from a TOML file. Missing sections and fields fall
    /// back to their defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}
