//! Configuration for tether.
//!
//! Read from `~/.tether/config.toml` unless `TETHER_CONFIG` points
//! elsewhere. Every section is optional; a missing file is the same as an
//! empty one.
//!
//! ```toml
//! [lifecycle]
//! request_timeout_ms = 30000   # 0 waits forever
//! event_channel_capacity = 256
//! subscribe = ["connection", "command", "completion", "notification"]
//!
//! [peer]
//! command = "${HOME}/bin/tether"
//! args = ["peer"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use serde::Deserialize;
use tether_core::LifecycleOptions;
use tether_native::PeerConfig;
use tether_types::EventKind;

pub const CONFIG_ENV: &str = "TETHER_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TetherConfig {
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    pub peer: Option<PeerConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LifecycleConfig {
    pub request_timeout_ms: u64,
    pub event_channel_capacity: usize,
    pub subscribe: Vec<EventKind>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            event_channel_capacity: tether_core::DEFAULT_EVENT_CHANNEL_CAPACITY,
            subscribe: EventKind::ALL.to_vec(),
        }
    }
}

impl LifecycleConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }

    #[must_use]
    pub fn to_options(&self) -> LifecycleOptions {
        LifecycleOptions::default()
            .with_request_timeout(self.request_timeout())
            .with_event_channel_capacity(self.event_channel_capacity)
            .with_subscriptions(self.subscribe.iter().copied())
    }
}

/// Replace `${VAR}` with the variable's value; unset variables become empty
/// and an unclosed `${` is kept verbatim.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let var = &after[..end];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

impl TetherConfig {
    /// Load from [`config_path`]. `Ok(default)` when there is no file.
    pub fn load() -> Result<Self, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|source| {
            tracing::warn!("Failed to read config at {}: {source}", path.display());
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::parse(&content).map_err(|source| {
            tracing::warn!("Failed to parse config at {}: {source}", path.display());
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    /// Parse TOML text and expand `${VAR}` in the peer command line.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        let mut config: Self = toml::from_str(content)?;
        config.peer = config.peer.map(|peer| peer.map_strings(expand_env_vars));
        Ok(config)
    }
}

/// `$TETHER_CONFIG` if set and non-empty, else `~/.tether/config.toml`.
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    match env::var_os(CONFIG_ENV) {
        Some(path) if !path.is_empty() => Some(PathBuf::from(path)),
        _ => dirs::home_dir().map(|home| home.join(".tether").join("config.toml")),
    }
}
