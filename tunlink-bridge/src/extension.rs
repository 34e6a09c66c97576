//! IPC client for the tunnel extension process
//!
//! The privileged extension process, when running, listens on a control
//! endpoint: a Unix domain socket (or named pipe on Windows). The
//! protocol is line-delimited JSON: one request line, one reply line.
//! A `subscribe` request turns the connection into a notification
//! stream of phase-change events.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::error::{Error, Result};
use crate::state::TunnelPhase;

/// Requests sent to the extension's control endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExtensionRequest {
    /// Fetch the extension's rich engine status payload
    #[serde(rename = "status")]
    Status,

    /// Begin tunneling with the given configuration
    #[serde(rename = "start")]
    Start {
        #[serde(skip_serializing_if = "Option::is_none")]
        config: Option<Value>,
    },

    /// Cease tunneling
    #[serde(rename = "stop")]
    Stop,

    /// Turn this connection into a phase-change notification stream
    #[serde(rename = "subscribe")]
    Subscribe,
}

/// Acknowledgement replies for start/stop instructions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExtensionAck {
    #[serde(rename = "ok")]
    Ok,

    #[serde(rename = "error")]
    Error { message: String },
}

/// A phase-change notification emitted on a subscribed connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseEvent {
    pub phase: TunnelPhase,
}

/// Client for the extension's control endpoint
#[derive(Debug, Clone)]
pub struct ExtensionClient {
    endpoint: PathBuf,
}

impl ExtensionClient {
    pub fn new<P: AsRef<Path>>(endpoint: P) -> Self {
        Self {
            endpoint: endpoint.as_ref().to_path_buf(),
        }
    }

    /// Fetch the extension's status payload, bounded by `timeout`.
    ///
    /// The bound is a hard ceiling covering connect, send, and reply.
    /// The payload is returned verbatim; the bridge never parses it.
    pub async fn status(&self, timeout: Duration) -> Result<Value> {
        match tokio::time::timeout(timeout, self.round_trip(&ExtensionRequest::Status)).await {
            Ok(result) => result,
            Err(_) => Err(Error::ExtensionUnreachable(format!(
                "status round trip exceeded {timeout:?}"
            ))),
        }
    }

    /// Instruct the extension to begin tunneling, bounded by `timeout`.
    ///
    /// Success means the instruction was accepted, not that the tunnel
    /// reached the connected state. The bound keeps a wedged extension
    /// from holding the control worker indefinitely.
    pub async fn start(&self, config: Option<Value>, timeout: Duration) -> Result<()> {
        let request = ExtensionRequest::Start { config };
        let round_trip = self.round_trip(&request);
        let reply = match tokio::time::timeout(timeout, round_trip).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::ExtensionStart(format!(
                    "extension did not answer within {timeout:?}"
                )))
            }
        };
        match parse_ack(reply) {
            Ok(()) => Ok(()),
            Err(message) => Err(Error::ExtensionStart(message)),
        }
    }

    /// Instruct the extension to cease tunneling, bounded by `timeout`
    pub async fn stop(&self, timeout: Duration) -> Result<()> {
        let round_trip = self.round_trip(&ExtensionRequest::Stop);
        let reply = match tokio::time::timeout(timeout, round_trip).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::ExtensionStop(format!(
                    "extension did not answer within {timeout:?}"
                )))
            }
        };
        match parse_ack(reply) {
            Ok(()) => Ok(()),
            Err(message) => Err(Error::ExtensionStop(message)),
        }
    }
}

fn parse_ack(reply: Value) -> std::result::Result<(), String> {
    match serde_json::from_value::<ExtensionAck>(reply) {
        Ok(ExtensionAck::Ok) => Ok(()),
        Ok(ExtensionAck::Error { message }) => Err(message),
        Err(e) => Err(format!("unexpected extension reply: {e}")),
    }
}

fn unreachable_err(context: &str, e: impl std::fmt::Display) -> Error {
    Error::ExtensionUnreachable(format!("{context}: {e}"))
}

#[cfg(unix)]
impl ExtensionClient {
    async fn connect(&self) -> Result<tokio::net::UnixStream> {
        tokio::net::UnixStream::connect(&self.endpoint)
            .await
            .map_err(|e| {
                unreachable_err(&format!("failed to connect to {:?}", self.endpoint), e)
            })
    }

    /// Send a single request line and read a single reply line
    async fn round_trip(&self, request: &ExtensionRequest) -> Result<Value> {
        let stream = self.connect().await?;
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let request_json = serde_json::to_string(request)?;
        writer
            .write_all(request_json.as_bytes())
            .await
            .map_err(|e| unreachable_err("failed to send request", e))?;
        writer
            .write_all(b"\n")
            .await
            .map_err(|e| unreachable_err("failed to send request", e))?;

        let mut line = String::new();
        let n = reader
            .read_line(&mut line)
            .await
            .map_err(|e| unreachable_err("failed to read reply", e))?;
        if n == 0 {
            return Err(Error::ExtensionUnreachable(
                "extension closed the connection".into(),
            ));
        }
        Ok(serde_json::from_str(line.trim())?)
    }

    /// Open a phase-change notification stream
    pub async fn subscribe(&self) -> Result<EventStream> {
        let stream = self.connect().await?;
        let (reader, mut writer) = stream.into_split();

        let request_json = serde_json::to_string(&ExtensionRequest::Subscribe)?;
        writer
            .write_all(request_json.as_bytes())
            .await
            .map_err(|e| unreachable_err("failed to subscribe", e))?;
        writer
            .write_all(b"\n")
            .await
            .map_err(|e| unreachable_err("failed to subscribe", e))?;

        Ok(EventStream {
            lines: BufReader::new(reader).lines(),
            _writer: writer,
        })
    }
}

/// A subscribed notification connection yielding phase changes in
/// emission order
#[cfg(unix)]
pub struct EventStream {
    lines: tokio::io::Lines<BufReader<tokio::net::unix::OwnedReadHalf>>,
    // Keeps the connection open; the extension drops subscribers whose
    // write side has closed.
    _writer: tokio::net::unix::OwnedWriteHalf,
}

#[cfg(windows)]
impl ExtensionClient {
    async fn connect(&self) -> Result<tokio::net::windows::named_pipe::NamedPipeClient> {
        use tokio::net::windows::named_pipe::ClientOptions;

        let pipe_name = self.endpoint.to_string_lossy().to_string();

        // The pipe may be momentarily busy between clients; retry briefly.
        let mut attempts = 0;
        loop {
            match ClientOptions::new().open(&pipe_name) {
                Ok(pipe) => return Ok(pipe),
                Err(_) if attempts < 3 => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    attempts += 1;
                }
                Err(e) => {
                    return Err(unreachable_err(
                        &format!("failed to connect to {pipe_name}"),
                        e,
                    ));
                }
            }
        }
    }

    async fn round_trip(&self, request: &ExtensionRequest) -> Result<Value> {
        let pipe = self.connect().await?;
        let (reader, mut writer) = tokio::io::split(pipe);
        let mut reader = BufReader::new(reader);

        let request_json = serde_json::to_string(request)?;
        writer
            .write_all(request_json.as_bytes())
            .await
            .map_err(|e| unreachable_err("failed to send request", e))?;
        writer
            .write_all(b"\n")
            .await
            .map_err(|e| unreachable_err("failed to send request", e))?;
        writer
            .flush()
            .await
            .map_err(|e| unreachable_err("failed to send request", e))?;

        let mut line = String::new();
        let n = reader
            .read_line(&mut line)
            .await
            .map_err(|e| unreachable_err("failed to read reply", e))?;
        if n == 0 {
            return Err(Error::ExtensionUnreachable(
                "extension closed the connection".into(),
            ));
        }
        Ok(serde_json::from_str(line.trim())?)
    }

    /// Open a phase-change notification stream
    pub async fn subscribe(&self) -> Result<EventStream> {
        let pipe = self.connect().await?;
        let (reader, mut writer) = tokio::io::split(pipe);

        let request_json = serde_json::to_string(&ExtensionRequest::Subscribe)?;
        writer
            .write_all(request_json.as_bytes())
            .await
            .map_err(|e| unreachable_err("failed to subscribe", e))?;
        writer
            .write_all(b"\n")
            .await
            .map_err(|e| unreachable_err("failed to subscribe", e))?;
        writer
            .flush()
            .await
            .map_err(|e| unreachable_err("failed to subscribe", e))?;

        Ok(EventStream {
            lines: BufReader::new(reader).lines(),
            _writer: writer,
        })
    }
}

#[cfg(windows)]
pub struct EventStream {
    lines: tokio::io::Lines<
        BufReader<tokio::io::ReadHalf<tokio::net::windows::named_pipe::NamedPipeClient>>,
    >,
    _writer: tokio::io::WriteHalf<tokio::net::windows::named_pipe::NamedPipeClient>,
}

impl EventStream {
    /// Next phase change, or `None` when the extension closes the stream
    pub async fn next_phase(&mut self) -> Result<Option<TunnelPhase>> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| unreachable_err("event stream read failed", e))?;
            match line {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => {
                    let event: PhaseEvent = serde_json::from_str(line.trim())?;
                    return Ok(Some(event.phase));
                }
                None => return Ok(None),
            }
        }
    }
}
