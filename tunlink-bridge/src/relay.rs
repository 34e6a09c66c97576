//! Callback relay: phase notifications to the registered observer
//!
//! The relay subscribes once, for the lifetime of the bridge, to the
//! tunnel phase notification source and forwards canonical states to at
//! most one registered observer. Delivery runs on a background task —
//! never on the context that produced the notification and never under
//! the slot lock — serialized with itself but independent of the
//! control worker. Identical consecutive states are not coalesced.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::broadcast;

use crate::extension::ExtensionClient;
use crate::state::{CanonicalState, SharedPhase, TunnelPhase};

/// Observer for canonical state changes.
///
/// Invoked on a background execution context; a long-running observer
/// delays subsequent deliveries but never blocks callback replacement
/// or control operations.
pub trait StateObserver: Send + Sync {
    fn on_state(&self, state: CanonicalState);
}

struct FnObserver<F>(F);

impl<F> StateObserver for FnObserver<F>
where
    F: Fn(CanonicalState) + Send + Sync,
{
    fn on_state(&self, state: CanonicalState) {
        (self.0)(state)
    }
}

/// Wrap a closure as a [`StateObserver`]
pub fn observer<F>(f: F) -> Arc<dyn StateObserver>
where
    F: Fn(CanonicalState) + Send + Sync + 'static,
{
    Arc::new(FnObserver(f))
}

type ObserverSlot = Arc<Mutex<Option<Arc<dyn StateObserver>>>>;

/// Buffered notifications before the delivery task falls behind
const NOTIFY_CHANNEL_CAPACITY: usize = 64;

/// Single-slot relay between the notification source and the observer
pub(crate) struct CallbackRelay {
    slot: ObserverSlot,
    notify_tx: broadcast::Sender<TunnelPhase>,
}

impl CallbackRelay {
    pub(crate) fn new() -> Self {
        let (notify_tx, _) = broadcast::channel(NOTIFY_CHANNEL_CAPACITY);
        Self {
            slot: Arc::new(Mutex::new(None)),
            notify_tx,
        }
    }

    /// Atomically replace the observer slot. `None` unregisters.
    ///
    /// Lock-only: never touches the worker and never waits for an
    /// in-flight delivery.
    pub(crate) fn set_observer(&self, observer: Option<Arc<dyn StateObserver>>) {
        match self.slot.lock() {
            Ok(mut guard) => *guard = observer,
            Err(poisoned) => *poisoned.into_inner() = observer,
        }
    }

    /// Handle for publishing phase notifications into the relay
    pub(crate) fn sender(&self) -> broadcast::Sender<TunnelPhase> {
        self.notify_tx.clone()
    }

    /// Spawn the delivery task: receives phases in emission order,
    /// updates the shared phase, and invokes the registered observer.
    pub(crate) fn spawn_delivery(&self, phase: SharedPhase, handle: &Handle) {
        let mut rx = self.notify_tx.subscribe();
        let slot = self.slot.clone();
        handle.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(new_phase) => {
                        phase.set(new_phase);
                        let state = new_phase.canonical();
                        // Clone out of the slot so the lock is not held
                        // while the observer runs.
                        let current = match slot.lock() {
                            Ok(guard) => guard.clone(),
                            Err(poisoned) => poisoned.into_inner().clone(),
                        };
                        if let Some(observer) = current {
                            observer.on_state(state);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("state notification delivery lagged by {n} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Spawn the event pump: maintains a subscription to the extension's
    /// phase-change stream, reconnecting after `reconnect_delay` whenever
    /// the stream drops or the extension is not running.
    pub(crate) fn spawn_event_pump(
        &self,
        client: ExtensionClient,
        reconnect_delay: Duration,
        handle: &Handle,
    ) {
        let notify_tx = self.notify_tx.clone();
        handle.spawn(async move {
            loop {
                match client.subscribe().await {
                    Ok(mut stream) => {
                        log::debug!("subscribed to extension phase events");
                        loop {
                            match stream.next_phase().await {
                                Ok(Some(phase)) => {
                                    let _ = notify_tx.send(phase);
                                }
                                Ok(None) => {
                                    log::debug!("extension phase stream ended");
                                    break;
                                }
                                Err(e) => {
                                    log::debug!("extension phase stream error: {e}");
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        log::debug!("extension phase stream unavailable: {e}");
                    }
                }
                tokio::time::sleep(reconnect_delay).await;
            }
        });
    }
}
