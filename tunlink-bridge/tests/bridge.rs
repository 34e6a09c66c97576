//! End-to-end tests against a fake tunnel extension process.
//!
//! The fake extension listens on a Unix socket on its own runtime and
//! speaks the line-delimited JSON control protocol, so the bridge under
//! test runs exactly as it would against the real extension.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use tunlink_bridge::{observer, BridgeConfig, TunnelBridge, TunnelPhase};

#[derive(Clone, Copy, PartialEq)]
enum Behavior {
    /// Ack start/stop, answer status with a rich payload
    Normal,
    /// Accept connections but never reply
    NeverReply,
}

/// Sentinel event telling subscribe handlers to drop their connection
const DROP_STREAM: &str = "\0drop";

struct FakeExtension {
    runtime: tokio::runtime::Runtime,
    last_start_config: Arc<Mutex<Option<Value>>>,
    starts: Arc<AtomicUsize>,
    events: tokio::sync::broadcast::Sender<String>,
}

impl FakeExtension {
    fn spawn(socket: &Path, behavior: Behavior) -> Self {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let last_start_config = Arc::new(Mutex::new(None));
        let starts = Arc::new(AtomicUsize::new(0));
        let (events, _) = tokio::sync::broadcast::channel(16);

        let listener = {
            let _guard = runtime.enter();
            UnixListener::bind(socket).unwrap()
        };
        let config_slot = last_start_config.clone();
        let start_count = starts.clone();
        let event_feed = events.clone();
        runtime.spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let config_slot = config_slot.clone();
                let start_count = start_count.clone();
                let event_feed = event_feed.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, behavior, config_slot, start_count, event_feed).await;
                });
            }
        });

        Self {
            runtime,
            last_start_config,
            starts,
            events,
        }
    }

    fn last_start_config(&self) -> Option<Value> {
        self.last_start_config.lock().unwrap().clone()
    }

    fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Emit one phase-event line to every subscribed connection
    fn emit(&self, line: &str) {
        let _ = self.events.send(line.to_string());
    }

    /// Drop every subscribed connection, forcing clients to reconnect
    fn drop_streams(&self) {
        let _ = self.events.send(DROP_STREAM.to_string());
    }
}

async fn serve(
    stream: UnixStream,
    behavior: Behavior,
    config_slot: Arc<Mutex<Option<Value>>>,
    start_count: Arc<AtomicUsize>,
    events: tokio::sync::broadcast::Sender<String>,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if behavior == Behavior::NeverReply {
            // Hold the connection open without answering.
            tokio::time::sleep(Duration::from_secs(60)).await;
            continue;
        }
        let request: Value = serde_json::from_str(line.trim()).unwrap();
        let reply = match request["type"].as_str() {
            Some("status") => json!({
                "state": "connected",
                "server": "198.51.100.7",
                "bytes_rx": 1024,
                "bytes_tx": 512,
            }),
            Some("start") => {
                start_count.fetch_add(1, Ordering::SeqCst);
                *config_slot.lock().unwrap() = request.get("config").cloned();
                json!({ "type": "ok" })
            }
            Some("stop") => json!({ "type": "ok" }),
            Some("subscribe") => {
                let mut events = events.subscribe();
                while let Ok(event) = events.recv().await {
                    if event == DROP_STREAM {
                        return Ok(());
                    }
                    writer.write_all(event.as_bytes()).await?;
                    writer.write_all(b"\n").await?;
                }
                return Ok(());
            }
            _ => json!({ "type": "error", "message": "unknown request" }),
        };
        writer.write_all(reply.to_string().as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }
    Ok(())
}

struct Fixture {
    _dir: TempDir,
    socket: PathBuf,
    config: BridgeConfig,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let socket = dir.path().join("extension.sock");
    let config = BridgeConfig {
        profile_dir: dir.path().join("profiles"),
        endpoint: socket.clone(),
        status_timeout_ms: 500,
        instruction_timeout_ms: 400,
        event_reconnect_secs: 1,
    };
    Fixture {
        _dir: dir,
        socket,
        config,
    }
}

#[test]
fn install_is_idempotent_through_the_facade() {
    let fx = fixture();
    let bridge = TunnelBridge::new(fx.config).unwrap();

    let first = bridge.install();
    assert!(first.is_ok());
    assert_eq!(first.data.unwrap()["created"], true);

    let second = bridge.install();
    assert!(second.is_ok());
    assert_eq!(second.data.unwrap()["created"], false);
}

#[test]
fn reinstall_without_profile_matches_install() {
    let fx = fixture();
    let bridge = TunnelBridge::new(fx.config).unwrap();

    let resp = bridge.reinstall();
    assert!(resp.is_ok());
    assert_eq!(resp.data.unwrap()["created"], true);
}

#[test]
fn status_without_profile_is_disconnected() {
    let fx = fixture();
    let bridge = TunnelBridge::new(fx.config).unwrap();

    let resp = bridge.status();
    assert!(resp.is_ok());
    assert_eq!(resp.data.unwrap()["state"], "disconnected");
}

#[test]
fn status_returns_engine_payload_when_extension_answers() {
    let fx = fixture();
    let _ext = FakeExtension::spawn(&fx.socket, Behavior::Normal);
    let bridge = TunnelBridge::new(fx.config).unwrap();
    bridge.install();

    let resp = bridge.status();
    assert!(resp.is_ok());
    let data = resp.data.unwrap();
    assert_eq!(data["state"], "connected");
    assert_eq!(data["bytes_rx"], 1024);
}

#[test]
fn status_falls_back_within_the_bound_when_extension_hangs() {
    let fx = fixture();
    let _ext = FakeExtension::spawn(&fx.socket, Behavior::NeverReply);
    let bridge = TunnelBridge::new(fx.config).unwrap();
    bridge.install();

    let started = Instant::now();
    let resp = bridge.status();
    let elapsed = started.elapsed();

    assert!(resp.is_ok(), "fallback resolution is still a success");
    assert_eq!(resp.data.unwrap()["state"], "disconnected");
    // 500ms bound plus generous scheduling slack
    assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");
}

#[test]
fn start_installs_the_profile_when_absent() {
    let fx = fixture();
    let _ext = FakeExtension::spawn(&fx.socket, Behavior::Normal);
    let profile_dir = fx.config.profile_dir.clone();
    let bridge = TunnelBridge::new(fx.config).unwrap();

    let resp = bridge.start(Some(r#"{"server":"198.51.100.7"}"#));
    assert!(resp.is_ok());
    assert!(profile_dir.join("io.tunlink.tunnel.toml").is_file());
}

#[test]
fn start_without_config_reuses_the_persisted_one() {
    let fx = fixture();
    let ext = FakeExtension::spawn(&fx.socket, Behavior::Normal);
    let bridge = TunnelBridge::new(fx.config).unwrap();

    assert!(bridge.start(Some(r#"{"server":"198.51.100.7"}"#)).is_ok());
    assert_eq!(
        ext.last_start_config(),
        Some(json!({ "server": "198.51.100.7" }))
    );

    // blank config means "use what was persisted"
    assert!(bridge.start(Some("   ")).is_ok());
    assert_eq!(ext.start_count(), 2);
    assert_eq!(
        ext.last_start_config(),
        Some(json!({ "server": "198.51.100.7" }))
    );
}

#[test]
fn stop_succeeds_when_nothing_is_running() {
    let fx = fixture();
    let bridge = TunnelBridge::new(fx.config).unwrap();

    // no profile installed at all
    assert!(bridge.stop().is_ok());

    bridge.install();
    // profile present but no extension listening
    assert!(bridge.stop().is_ok());
    assert_eq!(bridge.current_phase(), TunnelPhase::Disconnected);
}

#[test]
fn unregistered_callback_receives_nothing_further() {
    let fx = fixture();
    let bridge = TunnelBridge::new(fx.config).unwrap();

    let (tx, rx) = std::sync::mpsc::channel();
    // Keep `tx` alive in the test so unregistering the callback does
    // not disconnect `rx` and collapse the timeout below.
    let callback_tx = tx.clone();
    bridge.set_state_callback(Some(observer(move |state| {
        let _ = callback_tx.send(state.to_string());
    })));

    let sender = bridge.phase_sender();
    sender.send(TunnelPhase::Connected).unwrap();
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(2)).unwrap(),
        "connected"
    );

    bridge.set_state_callback(None);
    sender.send(TunnelPhase::Disconnected).unwrap();
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());

    // the bridge still tracked the phase locally
    assert_eq!(bridge.current_phase(), TunnelPhase::Disconnected);
}

#[test]
fn reasserting_phase_reports_reconnecting() {
    let fx = fixture();
    let bridge = TunnelBridge::new(fx.config).unwrap();
    bridge.install();

    let (tx, rx) = std::sync::mpsc::channel();
    bridge.set_state_callback(Some(observer(move |state| {
        let _ = tx.send(state.to_string());
    })));

    bridge.phase_sender().send(TunnelPhase::Reasserting).unwrap();
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(2)).unwrap(),
        "reconnecting"
    );

    // fallback status resolution agrees with the relayed state
    let resp = bridge.status();
    assert_eq!(resp.data.unwrap()["state"], "reconnecting");
}

// A start held by a never-replying extension occupies the worker only up
// to its bound, so a queued status still resolves promptly.
#[test]
fn stuck_start_does_not_starve_status() {
    let fx = fixture();
    let _ext = FakeExtension::spawn(&fx.socket, Behavior::NeverReply);
    let bridge = Arc::new(TunnelBridge::new(fx.config).unwrap());
    bridge.install();

    let starter = {
        let bridge = bridge.clone();
        std::thread::spawn(move || bridge.start(Some(r#"{"server":"198.51.100.7"}"#)))
    };
    // let the start reach the worker first
    std::thread::sleep(Duration::from_millis(100));

    let started = Instant::now();
    let resp = bridge.status();
    let elapsed = started.elapsed();

    assert!(resp.is_ok());
    assert_eq!(resp.data.unwrap()["state"], "disconnected");
    // 400ms residual start bound + 500ms status bound + slack
    assert!(elapsed < Duration::from_secs(3), "status starved: {elapsed:?}");

    let start_resp = starter.join().unwrap();
    assert!(!start_resp.is_ok());
    assert_eq!(start_resp.code, -4);
}

/// Emit `line` until the observer reports `expected`, tolerating emissions
/// that fire before the event pump has (re)connected.
fn emit_until(
    ext: &FakeExtension,
    line: &str,
    rx: &std::sync::mpsc::Receiver<String>,
    expected: &str,
) {
    let deadline = Instant::now() + Duration::from_secs(8);
    loop {
        ext.emit(line);
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(state) if state == expected => return,
            Ok(_) => continue,
            Err(_) if Instant::now() < deadline => continue,
            Err(_) => panic!("observer never saw {expected:?}"),
        }
    }
}

#[test]
fn observer_receives_phases_from_the_extension_stream() {
    let fx = fixture();
    let ext = FakeExtension::spawn(&fx.socket, Behavior::Normal);
    let bridge = TunnelBridge::new(fx.config).unwrap();

    let (tx, rx) = std::sync::mpsc::channel();
    bridge.set_state_callback(Some(observer(move |state| {
        let _ = tx.send(state.to_string());
    })));

    emit_until(&ext, r#"{"phase":"connecting"}"#, &rx, "connecting");
    emit_until(&ext, r#"{"phase":"connected"}"#, &rx, "connected");

    // the stream also drives the fallback phase
    assert_eq!(bridge.current_phase(), TunnelPhase::Connected);
}

#[test]
fn event_pump_reconnects_after_a_dropped_stream() {
    let fx = fixture();
    let ext = FakeExtension::spawn(&fx.socket, Behavior::Normal);
    let bridge = TunnelBridge::new(fx.config).unwrap();

    let (tx, rx) = std::sync::mpsc::channel();
    bridge.set_state_callback(Some(observer(move |state| {
        let _ = tx.send(state.to_string());
    })));

    emit_until(&ext, r#"{"phase":"connected"}"#, &rx, "connected");

    ext.drop_streams();

    // events resume once the pump has re-subscribed
    emit_until(&ext, r#"{"phase":"reasserting"}"#, &rx, "reconnecting");
    assert_eq!(bridge.current_phase(), TunnelPhase::Reasserting);
}

#[test]
fn concurrent_callers_all_get_well_formed_envelopes() {
    let fx = fixture();
    let _ext = FakeExtension::spawn(&fx.socket, Behavior::Normal);
    let bridge = Arc::new(TunnelBridge::new(fx.config).unwrap());
    bridge.install();

    let mut handles = Vec::new();
    for i in 0..12 {
        let bridge = bridge.clone();
        handles.push(std::thread::spawn(move || match i % 3 {
            0 => bridge.start(Some(r#"{"server":"198.51.100.7"}"#)),
            1 => bridge.status(),
            _ => bridge.stop(),
        }));
    }

    for handle in handles {
        let resp = handle.join().unwrap();
        assert!(resp.is_ok(), "unexpected failure: {}", resp.to_json());
    }

    // the profile survived every interleaving as a single identity
    let resp = bridge.install();
    assert_eq!(resp.data.unwrap()["created"], false);
}
