//! Connection states and the locally-tracked coarse phase

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// Canonical connection state reported to observers and used for
/// fallback status resolution.
///
/// This is a closed five-value enumeration; the wire strings are part of
/// the bridge's external contract and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalState {
    Connected,
    Connecting,
    Disconnecting,
    Reconnecting,
    Disconnected,
}

impl CanonicalState {
    /// The exact wire string for this state
    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalState::Connected => "connected",
            CanonicalState::Connecting => "connecting",
            CanonicalState::Disconnecting => "disconnecting",
            CanonicalState::Reconnecting => "reconnecting",
            CanonicalState::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for CanonicalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coarse connection phase of the tunnel extension as the bridge knows it
/// locally.
///
/// Mirrored from the extension's phase-change notifications and from
/// accepted start/stop instructions. The status resolver falls back to
/// this when a live round trip to the extension is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelPhase {
    /// No usable profile or unknown phase
    Invalid,
    Disconnected,
    Connecting,
    Connected,
    /// Tunnel is re-establishing after a connection loss
    Reasserting,
    Disconnecting,
}

impl TunnelPhase {
    /// Map the coarse phase to the canonical five-value state.
    ///
    /// `Reasserting` maps to `Reconnecting`; `Invalid` is reported as
    /// `Disconnected` rather than leaking an internal phase.
    pub fn canonical(self) -> CanonicalState {
        match self {
            TunnelPhase::Connected => CanonicalState::Connected,
            TunnelPhase::Connecting => CanonicalState::Connecting,
            TunnelPhase::Disconnecting => CanonicalState::Disconnecting,
            TunnelPhase::Reasserting => CanonicalState::Reconnecting,
            TunnelPhase::Disconnected | TunnelPhase::Invalid => CanonicalState::Disconnected,
        }
    }
}

/// Shared holder for the bridge's locally-known phase.
///
/// Written by the callback relay's delivery loop and by the control
/// worker when a start/stop instruction is accepted; read by the status
/// resolver's fallback path.
#[derive(Debug)]
pub struct PhaseTracker {
    inner: Mutex<TunnelPhase>,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TunnelPhase::Disconnected),
        }
    }

    pub fn set(&self, phase: TunnelPhase) {
        match self.inner.lock() {
            Ok(mut guard) => *guard = phase,
            Err(poisoned) => *poisoned.into_inner() = phase,
        }
    }

    pub fn get(&self) -> TunnelPhase {
        match self.inner.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Reference to the shared phase tracker
pub type SharedPhase = Arc<PhaseTracker>;
