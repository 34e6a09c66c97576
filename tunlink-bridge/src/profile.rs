//! Tunnel profile persistence
//!
//! The bridge manages exactly one well-known profile identity. The
//! profile is a small TOML document on disk holding the identifier, the
//! enabled flag, and the last-persisted tunnel configuration. Install is
//! idempotent; removal waits for the unlink to be durable before
//! returning so a reinstall never observes two profile identities.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The single, well-known profile identity managed by this bridge
pub const PROFILE_IDENTIFIER: &str = "io.tunlink.tunnel";

const PROFILE_DISPLAY_NAME: &str = "Tunlink VPN";

/// The persisted system-level profile document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunnelProfile {
    pub identifier: String,
    pub display_name: String,
    pub enabled: bool,
    /// Last-persisted tunnel configuration (serialized JSON), if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
}

impl TunnelProfile {
    fn new() -> Self {
        Self {
            identifier: PROFILE_IDENTIFIER.to_string(),
            display_name: PROFILE_DISPLAY_NAME.to_string(),
            enabled: true,
            config: None,
        }
    }
}

/// Creates, persists, enables, and removes the tunnel profile
#[derive(Debug, Clone)]
pub struct ProfileManager {
    dir: PathBuf,
}

impl ProfileManager {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Path of the profile document
    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{PROFILE_IDENTIFIER}.toml"))
    }

    pub fn exists(&self) -> bool {
        self.path().is_file()
    }

    /// Ensure the profile exists and is enabled.
    ///
    /// Returns `true` if a profile was created, `false` if one was
    /// already present (in which case nothing is modified).
    pub fn install(&self) -> Result<bool> {
        if self.exists() {
            log::debug!("tunnel profile already installed at {:?}", self.path());
            return Ok(false);
        }
        self.write_profile(&TunnelProfile::new())
            .map_err(|e| Error::ProfileCreation(e.to_string()))?;
        log::info!("tunnel profile installed at {:?}", self.path());
        Ok(true)
    }

    /// Load the persisted profile, or `None` if not installed
    pub fn load(&self) -> Result<Option<TunnelProfile>> {
        let path = self.path();
        if !path.is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        let profile: TunnelProfile = toml::from_str(&content)?;
        Ok(Some(profile))
    }

    /// Persist a tunnel configuration into the profile.
    ///
    /// Creates the profile if it does not exist yet.
    pub fn persist_config(&self, config: &str) -> Result<()> {
        let mut profile = self.load()?.unwrap_or_else(TunnelProfile::new);
        profile.config = Some(config.to_string());
        self.write_profile(&profile)
            .map_err(|e| Error::ProfileCreation(e.to_string()))
    }

    /// The last-persisted tunnel configuration, if any
    pub fn stored_config(&self) -> Result<Option<String>> {
        Ok(self.load()?.and_then(|p| p.config))
    }

    /// Remove the profile and wait for the removal to fully persist.
    ///
    /// Removing an absent profile is a no-op.
    pub fn remove(&self) -> Result<()> {
        let path = self.path();
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::ProfileRemoval(e.to_string())),
        }
        self.sync_dir();
        if path.exists() {
            return Err(Error::ProfileRemoval(format!(
                "profile still present after removal: {path:?}"
            )));
        }
        log::info!("tunnel profile removed from {:?}", path);
        Ok(())
    }

    /// Write the profile durably: temp file in the same directory, fsync,
    /// then rename over the final path.
    fn write_profile(&self, profile: &TunnelProfile) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let serialized = toml::to_string_pretty(profile)
            .map_err(|e| Error::ProfileCreation(e.to_string()))?;

        let tmp = self.dir.join(format!("{PROFILE_IDENTIFIER}.toml.tmp"));
        fs::write(&tmp, serialized.as_bytes())?;
        let file = fs::File::open(&tmp)?;
        file.sync_all()?;
        fs::rename(&tmp, self.path())?;
        self.sync_dir();
        Ok(())
    }

    #[cfg(unix)]
    fn sync_dir(&self) {
        if let Ok(dir) = fs::File::open(&self.dir) {
            let _ = dir.sync_all();
        }
    }

    #[cfg(not(unix))]
    fn sync_dir(&self) {}
}
