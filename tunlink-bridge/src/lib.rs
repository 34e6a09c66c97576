//! Tunlink Bridge
//!
//! This crate provides the control bridge between a host application and
//! the privileged tunnel extension process. The host drives the tunnel
//! through a small set of lifecycle operations; the bridge serializes
//! them, talks to the extension over its control socket, and relays
//! tunnel state changes back to a registered observer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Host Application                         │
//! │  ┌─────────────────┐              ┌─────────────────────┐   │
//! │  │  tunlink-cli    │              │  GUI via tunlink-ffi │  │
//! │  └────────┬────────┘              └──────────┬──────────┘   │
//! │           │                                  │              │
//! │           └───────────────┬──────────────────┘              │
//! │                           ▼                                 │
//! │  ┌────────────────────────────────────────────────────────┐ │
//! │  │                   tunlink-bridge                       │ │
//! │  │  - TunnelBridge (control facade)                       │ │
//! │  │  - ControlWorker (serialized operation queue)          │ │
//! │  │  - ProfileManager (tunnel profile persistence)         │ │
//! │  │  - CallbackRelay (state change notifications)          │ │
//! │  └────────────────────────┬───────────────────────────────┘ │
//! └───────────────────────────┼─────────────────────────────────┘
//!                             │ line-delimited JSON over the
//!                             │ extension control socket
//!                             ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Privileged Tunnel Extension                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every operation returns a uniform [`ServiceResponse`] envelope and
//! never panics across the facade boundary. Status queries resolve
//! within a configurable bound, falling back to the bridge's coarse
//! local state when the extension does not answer in time.

pub mod bridge;
pub mod config;
pub mod envelope;
pub mod error;
pub mod extension;
pub mod profile;
pub mod relay;
pub mod state;
pub mod worker;

pub use bridge::TunnelBridge;
pub use config::{BridgeConfig, DEFAULT_ENDPOINT};
pub use envelope::{ResponseData, ServiceResponse};
pub use error::{Error, Result};
pub use extension::{ExtensionAck, ExtensionClient, ExtensionRequest, PhaseEvent};
pub use profile::{ProfileManager, TunnelProfile, PROFILE_IDENTIFIER};
pub use relay::{observer, StateObserver};
pub use state::{CanonicalState, PhaseTracker, SharedPhase, TunnelPhase};
pub use worker::ControlRequest;
