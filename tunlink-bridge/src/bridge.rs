//! The control facade
//!
//! [`TunnelBridge`] is the public operation set. Every operation except
//! callback registration is enqueued on the control worker and the
//! calling thread blocks for its completion; registration is
//! lock-protected only. All operations are safe to invoke from any
//! thread and none panic across the boundary.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::runtime::Runtime;
use tokio::sync::broadcast;

use crate::config::BridgeConfig;
use crate::envelope::{ResponseData, ServiceResponse};
use crate::error::{Error, Result};
use crate::extension::ExtensionClient;
use crate::profile::ProfileManager;
use crate::relay::{CallbackRelay, StateObserver};
use crate::state::{CanonicalState, PhaseTracker, SharedPhase, TunnelPhase};
use crate::worker::{ControlRequest, ControlWorker};

/// Control bridge to the privileged tunnel extension process.
///
/// Owns the control worker, the callback relay, and a background tokio
/// runtime for extension I/O. Construct from a plain (non-async) thread;
/// the bridge brings its own runtime.
pub struct TunnelBridge {
    // Field order matters for Drop: the worker joins its thread (which
    // may be blocking on the runtime) before the runtime shuts down.
    worker: ControlWorker,
    relay: CallbackRelay,
    phase: SharedPhase,
    runtime: Runtime,
}

impl TunnelBridge {
    /// Create a bridge and spawn its worker and relay
    pub fn new(config: BridgeConfig) -> Result<Self> {
        config.validate()?;

        let runtime = Runtime::new()?;
        let phase: SharedPhase = Arc::new(PhaseTracker::new());
        let profile = ProfileManager::new(&config.profile_dir);
        let extension = ExtensionClient::new(&config.endpoint);

        let relay = CallbackRelay::new();
        relay.spawn_delivery(phase.clone(), runtime.handle());
        relay.spawn_event_pump(
            extension.clone(),
            config.reconnect_delay(),
            runtime.handle(),
        );

        let ctx = OpContext {
            profile,
            extension,
            phase: phase.clone(),
            status_timeout: config.status_timeout(),
            instruction_timeout: config.instruction_timeout(),
        };
        let worker = ControlWorker::spawn(ctx, runtime.handle().clone())?;

        log::info!(
            "tunnel bridge ready (endpoint {:?}, profile dir {:?})",
            config.endpoint,
            config.profile_dir
        );

        Ok(Self {
            worker,
            relay,
            phase,
            runtime,
        })
    }

    /// Ensure the tunnel profile exists and is enabled.
    ///
    /// Idempotent; `data` reports whether a profile was created.
    pub fn install(&self) -> ServiceResponse {
        self.worker.execute(ControlRequest::Install)
    }

    /// Instruct the extension to begin tunneling.
    ///
    /// Installs the profile first if absent. An empty or absent `config`
    /// means the profile's last-persisted configuration. Returns success
    /// once the instruction is accepted; does not wait for the tunnel to
    /// reach the connected state.
    pub fn start(&self, config: Option<&str>) -> ServiceResponse {
        let config = config
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned);
        self.worker.execute(ControlRequest::Start(config))
    }

    /// Instruct the extension to cease tunneling.
    ///
    /// Succeeds even if the tunnel was already stopped.
    pub fn stop(&self) -> ServiceResponse {
        self.worker.execute(ControlRequest::Stop)
    }

    /// Query live connection status with bounded latency.
    ///
    /// Returns the extension's status payload verbatim when the round
    /// trip succeeds within the bound, otherwise the coarse canonical
    /// state. A fallback resolution is still a successful query.
    pub fn status(&self) -> ServiceResponse {
        self.worker.execute(ControlRequest::Status)
    }

    /// Remove the profile (waiting for removal to persist) and install
    /// a fresh one. With no profile present, behaves like install.
    pub fn reinstall(&self) -> ServiceResponse {
        self.worker.execute(ControlRequest::Reinstall)
    }

    /// Atomically replace the state observer; `None` unregisters.
    ///
    /// Synchronous and lock-protected only; has no effect on in-flight
    /// control operations.
    pub fn set_state_callback(&self, observer: Option<Arc<dyn StateObserver>>) {
        self.relay.set_observer(observer);
    }

    /// Publisher for tunnel phase notifications.
    ///
    /// Hosts whose platform delivers phase changes through a channel of
    /// its own can feed them here; the relay treats them exactly like
    /// events from the extension's own stream.
    pub fn phase_sender(&self) -> broadcast::Sender<TunnelPhase> {
        self.relay.sender()
    }

    /// The coarse phase the bridge currently knows locally
    pub fn current_phase(&self) -> TunnelPhase {
        self.phase.get()
    }

    /// Handle to the bridge's background runtime
    pub fn runtime_handle(&self) -> tokio::runtime::Handle {
        self.runtime.handle().clone()
    }
}

/// Everything a control request needs to execute; owned by the worker
pub(crate) struct OpContext {
    pub(crate) profile: ProfileManager,
    pub(crate) extension: ExtensionClient,
    pub(crate) phase: SharedPhase,
    pub(crate) status_timeout: Duration,
    pub(crate) instruction_timeout: Duration,
}

impl OpContext {
    /// Execute one request and convert the outcome into an envelope.
    /// No error leaves this function raw.
    pub(crate) async fn dispatch(&self, request: ControlRequest) -> ServiceResponse {
        let result = match request {
            ControlRequest::Install => self.install().await,
            ControlRequest::Start(config) => self.start(config).await,
            ControlRequest::Stop => self.stop().await,
            ControlRequest::Status => self.status().await,
            ControlRequest::Reinstall => self.reinstall().await,
        };
        ServiceResponse::from_result(result)
    }

    async fn install(&self) -> Result<Option<ResponseData>> {
        let created = self.profile.install()?;
        Ok(Some(ResponseData::Installed { created }))
    }

    async fn start(&self, config: Option<String>) -> Result<Option<ResponseData>> {
        if !self.profile.exists() {
            // First-launch race: a caller may start before any install.
            log::info!("no tunnel profile present, installing before start");
            self.profile.install()?;
        }

        let effective = self.resolve_config(config)?;
        self.extension
            .start(effective, self.instruction_timeout)
            .await
            .map_err(|e| match e {
                Error::ExtensionUnreachable(msg) => {
                    Error::ExtensionStart(format!("extension not running: {msg}"))
                }
                other => other,
            })?;

        self.phase.set(TunnelPhase::Connecting);
        Ok(None)
    }

    /// Configuration-resolution policy: an explicit configuration is
    /// validated, persisted to the profile, and used; an absent one
    /// falls back to the profile's last-persisted configuration.
    fn resolve_config(&self, config: Option<String>) -> Result<Option<Value>> {
        match config {
            Some(raw) => {
                let value: Value = serde_json::from_str(&raw)
                    .map_err(|e| Error::ConfigInvalid(format!("not valid JSON: {e}")))?;
                self.profile.persist_config(&raw)?;
                Ok(Some(value))
            }
            None => match self.profile.stored_config()? {
                Some(raw) => {
                    let value: Value = serde_json::from_str(&raw).map_err(|e| {
                        Error::ConfigInvalid(format!("persisted configuration corrupt: {e}"))
                    })?;
                    Ok(Some(value))
                }
                None => Ok(None),
            },
        }
    }

    async fn stop(&self) -> Result<Option<ResponseData>> {
        if !self.profile.exists() {
            // Nothing installed means nothing running.
            return Ok(None);
        }
        match self.extension.stop(self.instruction_timeout).await {
            Ok(()) => {
                self.phase.set(TunnelPhase::Disconnecting);
                Ok(None)
            }
            Err(Error::ExtensionUnreachable(msg)) => {
                // Already stopped from the caller's perspective.
                log::debug!("stop with extension unreachable: {msg}");
                self.phase.set(TunnelPhase::Disconnected);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn status(&self) -> Result<Option<ResponseData>> {
        if !self.profile.exists() {
            return Ok(Some(ResponseData::Fallback {
                state: CanonicalState::Disconnected,
            }));
        }
        match self.extension.status(self.status_timeout).await {
            Ok(payload) => Ok(Some(ResponseData::Engine(payload))),
            Err(e) => {
                // A fallback resolution is still a successful query.
                log::debug!("status round trip failed, using fallback: {e}");
                Ok(Some(ResponseData::Fallback {
                    state: self.phase.get().canonical(),
                }))
            }
        }
    }

    async fn reinstall(&self) -> Result<Option<ResponseData>> {
        // Removal completes (durably) before the create begins, so two
        // profile identities never coexist.
        self.profile.remove()?;
        let created = self.profile.install()?;
        Ok(Some(ResponseData::Installed { created }))
    }
}
