//! Bridge configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default endpoint of the extension's control socket
#[cfg(unix)]
pub const DEFAULT_ENDPOINT: &str = "/var/run/tunlink/extension.sock";

#[cfg(windows)]
pub const DEFAULT_ENDPOINT: &str = r"\\.\pipe\tunlink-extension";

/// Default directory holding the persisted tunnel profile
#[cfg(unix)]
const DEFAULT_PROFILE_DIR: &str = "/var/lib/tunlink/profiles";

#[cfg(windows)]
const DEFAULT_PROFILE_DIR: &str = r"C:\ProgramData\Tunlink\profiles";

/// Hard ceiling for the status round trip, in milliseconds
const DEFAULT_STATUS_TIMEOUT_MS: u64 = 3000;

/// Ceiling for start/stop round trips, in milliseconds. Generous: its
/// purpose is to keep worker occupancy finite when the extension wedges,
/// not to bound caller latency.
const DEFAULT_INSTRUCTION_TIMEOUT_MS: u64 = 10_000;

/// Delay before reconnecting a dropped phase-event stream, in seconds
const DEFAULT_RECONNECT_SECS: u64 = 3;

/// Configuration for a [`TunnelBridge`](crate::TunnelBridge)
///
/// The configuration file uses TOML format; every field has a default so
/// an empty file (or no file at all) yields a working bridge.
///
/// # Example Configuration
///
/// ```toml
/// profile_dir = "/var/lib/tunlink/profiles"
/// endpoint = "/var/run/tunlink/extension.sock"
/// status_timeout_ms = 3000
/// event_reconnect_secs = 3
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Directory where the tunnel profile document is persisted
    #[serde(default = "default_profile_dir")]
    pub profile_dir: PathBuf,

    /// Path of the extension's control socket (named pipe on Windows)
    #[serde(default = "default_endpoint")]
    pub endpoint: PathBuf,

    /// Upper bound on the live status round trip, in milliseconds
    #[serde(default = "default_status_timeout_ms")]
    pub status_timeout_ms: u64,

    /// Upper bound on start/stop round trips, in milliseconds
    #[serde(default = "default_instruction_timeout_ms")]
    pub instruction_timeout_ms: u64,

    /// Seconds to wait before reconnecting the phase-event stream
    #[serde(default = "default_reconnect_secs")]
    pub event_reconnect_secs: u64,
}

fn default_profile_dir() -> PathBuf {
    PathBuf::from(DEFAULT_PROFILE_DIR)
}

fn default_endpoint() -> PathBuf {
    PathBuf::from(DEFAULT_ENDPOINT)
}

fn default_status_timeout_ms() -> u64 {
    DEFAULT_STATUS_TIMEOUT_MS
}

fn default_instruction_timeout_ms() -> u64 {
    DEFAULT_INSTRUCTION_TIMEOUT_MS
}

fn default_reconnect_secs() -> u64 {
    DEFAULT_RECONNECT_SECS
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            profile_dir: default_profile_dir(),
            endpoint: default_endpoint(),
            status_timeout_ms: default_status_timeout_ms(),
            instruction_timeout_ms: default_instruction_timeout_ms(),
            event_reconnect_secs: default_reconnect_secs(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.profile_dir.as_os_str().is_empty() {
            return Err(Error::Config("profile_dir must not be empty".into()));
        }
        if self.endpoint.as_os_str().is_empty() {
            return Err(Error::Config("endpoint must not be empty".into()));
        }
        if self.status_timeout_ms == 0 {
            return Err(Error::Config("status_timeout_ms must be non-zero".into()));
        }
        if self.instruction_timeout_ms == 0 {
            return Err(Error::Config(
                "instruction_timeout_ms must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Status round-trip bound as a [`Duration`]
    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }

    /// Start/stop round-trip bound as a [`Duration`]
    pub fn instruction_timeout(&self) -> Duration {
        Duration::from_millis(self.instruction_timeout_ms)
    }

    /// Event-stream reconnect delay as a [`Duration`]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.event_reconnect_secs)
    }

    /// Generate a sample configuration
    pub fn sample() -> String {
        format!(
            r#"# Tunlink bridge configuration

# Directory where the tunnel profile document is persisted
profile_dir = "{profile_dir}"

# Control socket of the tunnel extension process
endpoint = "{endpoint}"

# Upper bound on the live status round trip (milliseconds)
status_timeout_ms = {timeout}

# Upper bound on start/stop round trips (milliseconds)
instruction_timeout_ms = {instruction}

# Delay before reconnecting a dropped phase-event stream (seconds)
event_reconnect_secs = {reconnect}
"#,
            profile_dir = DEFAULT_PROFILE_DIR.replace('\\', "\\\\"),
            endpoint = DEFAULT_ENDPOINT.replace('\\', "\\\\"),
            timeout = DEFAULT_STATUS_TIMEOUT_MS,
            instruction = DEFAULT_INSTRUCTION_TIMEOUT_MS,
            reconnect = DEFAULT_RECONNECT_SECS,
        )
    }
}
