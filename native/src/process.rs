//! Peer-process system: the native side lives in a child process.
//!
//! A handle is a running child speaking framed JSON on stdin/stdout. A
//! writer task owns stdin; a reader task owns stdout and forwards peer
//! events into the [`EventSink`]. Acquisition completes only after the
//! `hello`/`welcome` handshake.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tokio::process::{Child, Command as ProcessCommand};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

use tether_types::{Command, EventKind, NativeError, NativeStatus, RequestId, ResultCode};

use crate::codec::{FrameReader, FrameWriter};
use crate::protocol::{ClientFrame, PeerFrame};
use crate::system::{EventSink, NativeSystem};

const WRITER_CHANNEL_CAPACITY: usize = 64;

const fn default_handshake_timeout_ms() -> u64 {
    5_000
}

const fn default_shutdown_timeout_ms() -> u64 {
    2_000
}

fn default_client_name() -> String {
    "tether".to_string()
}

/// How to launch and talk to the peer process.
///
/// ```toml
/// [peer]
/// command = "tether"
/// args = ["peer"]
/// client_name = "tether"
/// handshake_timeout_ms = 5000
/// shutdown_timeout_ms = 2000
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default = "default_client_name")]
    client_name: String,
    #[serde(default = "default_handshake_timeout_ms")]
    handshake_timeout_ms: u64,
    #[serde(default = "default_shutdown_timeout_ms")]
    shutdown_timeout_ms: u64,
    /// Pass the peer's stderr through instead of discarding it.
    #[serde(default)]
    inherit_stderr: bool,
}

impl PeerConfig {
    #[must_use]
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            client_name: default_client_name(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            inherit_stderr: false,
        }
    }

    #[must_use]
    pub fn with_inherit_stderr(mut self, inherit: bool) -> Self {
        self.inherit_stderr = inherit;
        self
    }

    /// Rewrite command and args, e.g. to expand `${VAR}` references.
    #[must_use]
    pub fn map_strings(mut self, f: impl Fn(&str) -> String) -> Self {
        self.command = f(&self.command);
        self.args = self.args.iter().map(|arg| f(arg)).collect();
        self
    }

    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    #[must_use]
    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    fn resolve_command(&self) -> Result<PathBuf> {
        which::which(&self.command).with_context(|| format!("{} not found", self.command))
    }
}

enum WriterCommand {
    Send(ClientFrame),
    Shutdown,
}

/// A live peer process. Owned by whoever acquired it.
pub struct PeerProcess {
    peer: String,
    child: Mutex<Child>,
    writer_tx: mpsc::Sender<WriterCommand>,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
    shutdown_timeout: Duration,
}

impl PeerProcess {
    /// Name the peer announced in its `welcome`.
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    async fn write(&self, frame: ClientFrame) -> Result<()> {
        self.writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .map_err(|_| anyhow::anyhow!("writer channel closed"))
    }
}

impl Drop for PeerProcess {
    fn drop(&mut self) {
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}

/// Reader loop body for one peer frame.
///
/// Returns `false` once the event sink is gone and reading can stop.
async fn forward_frame(
    frame: PeerFrame,
    welcome: &mut Option<oneshot::Sender<String>>,
    sink: &EventSink,
    peer: &str,
) -> bool {
    match frame {
        PeerFrame::Welcome { peer: announced } => {
            if let Some(tx) = welcome.take() {
                let _ = tx.send(announced);
            } else {
                tracing::debug!(peer, "ignoring repeated welcome");
            }
            true
        }
        PeerFrame::Error { code, message } => {
            let status = NativeStatus::from_raw(code).map_or("ok", NativeStatus::label);
            tracing::warn!(peer, code, status, "peer reported error: {message}");
            true
        }
        other => match other.into_event() {
            Some(event) => sink.emit(event).await,
            None => true,
        },
    }
}

/// Native system backed by a child process per handle.
#[derive(Debug, Clone)]
pub struct ProcessSystem {
    config: PeerConfig,
}

impl ProcessSystem {
    #[must_use]
    pub fn new(config: PeerConfig) -> Self {
        Self { config }
    }

    async fn spawn(&self, sink: EventSink) -> Result<PeerProcess> {
        let resolved = self.config.resolve_command()?;
        let mut cmd = ProcessCommand::new(&resolved);
        cmd.args(self.config.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if self.config.inherit_stderr {
                Stdio::inherit()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning {}", resolved.display()))?;
        let stdout = child.stdout.take().context("no stdout from peer")?;
        let stdin = child.stdin.take().context("no stdin from peer")?;

        let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);
        let writer_handle = tokio::spawn(async move {
            let mut writer = FrameWriter::new(stdin);
            while let Some(cmd) = writer_rx.recv().await {
                match cmd {
                    WriterCommand::Send(frame) => {
                        if let Err(e) = writer.write_frame(&frame).await {
                            tracing::warn!("peer write error: {e:#}");
                            break;
                        }
                    }
                    WriterCommand::Shutdown => break,
                }
            }
        });

        let (welcome_tx, welcome_rx) = oneshot::channel();
        let peer_label = self.config.command().to_string();
        let reader_handle = tokio::spawn(async move {
            let mut reader = FrameReader::new(stdout);
            let mut welcome = Some(welcome_tx);
            loop {
                match reader.read_frame::<PeerFrame>().await {
                    Ok(Some(frame)) => {
                        if !forward_frame(frame, &mut welcome, &sink, &peer_label).await {
                            tracing::debug!(peer = %peer_label, "event sink closed, reader stopping");
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::info!(peer = %peer_label, "peer closed stdout");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(peer = %peer_label, "peer read error: {e:#}");
                        break;
                    }
                }
            }
        });

        let mut process = PeerProcess {
            peer: String::new(),
            child: Mutex::new(child),
            writer_tx,
            reader_handle,
            writer_handle,
            shutdown_timeout: self.config.shutdown_timeout(),
        };

        process
            .write(ClientFrame::Hello {
                client: self.config.client_name().to_string(),
            })
            .await?;

        match tokio::time::timeout(self.config.handshake_timeout(), welcome_rx).await {
            Ok(Ok(peer)) => {
                process.peer = peer;
                Ok(process)
            }
            Ok(Err(_)) => {
                terminate(&process).await;
                bail!("peer exited before welcome")
            }
            Err(_) => {
                terminate(&process).await;
                bail!(
                    "peer did not answer hello within {:?}",
                    self.config.handshake_timeout()
                )
            }
        }
    }
}

async fn terminate(process: &PeerProcess) {
    let mut child = process.child.lock().await;
    let _ = child.kill().await;
}

impl NativeSystem for ProcessSystem {
    type Handle = PeerProcess;

    async fn is_running(&self) -> Result<bool, NativeError> {
        match self.config.resolve_command() {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::debug!("peer command unavailable: {e:#}");
                Ok(false)
            }
        }
    }

    async fn acquire(&self, sink: EventSink) -> Result<PeerProcess, NativeError> {
        let process = self.spawn(sink).await?;
        tracing::info!(peer = %process.peer(), "peer process ready");
        Ok(process)
    }

    async fn subscribe(&self, handle: &PeerProcess, kind: EventKind) -> Result<(), NativeError> {
        handle.write(ClientFrame::Subscribe { event: kind }).await?;
        Ok(())
    }

    async fn send(
        &self,
        handle: &PeerProcess,
        request_id: &RequestId,
        command: &Command,
    ) -> Result<(), NativeError> {
        handle
            .write(ClientFrame::Send {
                request_id: request_id.to_string(),
                target: command.target().to_string(),
                name: command.name().to_string(),
                payload: command.payload().cloned(),
            })
            .await?;
        Ok(())
    }

    async fn respond(
        &self,
        handle: &PeerProcess,
        request_id: &RequestId,
        result: ResultCode,
        payload: Option<&serde_json::Value>,
    ) -> Result<(), NativeError> {
        handle
            .write(ClientFrame::Respond {
                request_id: request_id.to_string(),
                code: result.native(),
                payload: payload.cloned(),
            })
            .await?;
        Ok(())
    }

    async fn release(&self, handle: &PeerProcess) {
        let _ = handle.write(ClientFrame::Goodbye).await;
        let _ = handle.writer_tx.send(WriterCommand::Shutdown).await;

        let mut child = handle.child.lock().await;
        let waited = tokio::time::timeout(handle.shutdown_timeout, child.wait()).await;
        if waited.is_err() {
            tracing::debug!(peer = %handle.peer(), "peer didn't exit in time, killing");
            let _ = child.kill().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_types::NativeEvent;

    fn sink() -> (EventSink, mpsc::Receiver<NativeEvent>) {
        let (tx, rx) = mpsc::channel(8);
        (EventSink::new(tx), rx)
    }

    #[tokio::test]
    async fn welcome_completes_handshake_once() {
        let (sink, mut rx) = sink();
        let (tx, mut welcome_rx) = oneshot::channel();
        let mut welcome = Some(tx);

        let frame = PeerFrame::Welcome {
            peer: "svc".to_string(),
        };
        assert!(forward_frame(frame.clone(), &mut welcome, &sink, "test").await);
        assert_eq!(welcome_rx.try_recv().unwrap(), "svc");

        assert!(forward_frame(frame, &mut welcome, &sink, "test").await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn response_frames_are_forwarded() {
        let (sink, mut rx) = sink();
        let mut welcome = None;
        let frame = PeerFrame::Response {
            request_id: "r1".to_string(),
            code: 0,
            payload: Some(serde_json::json!({ "ok": true })),
        };
        assert!(forward_frame(frame, &mut welcome, &sink, "test").await);
        match rx.try_recv().unwrap() {
            NativeEvent::Response {
                request_id, code, ..
            } => {
                assert_eq!(request_id, "r1");
                assert_eq!(code, 0);
            }
            other => panic!("expected Response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn error_frames_are_logged_not_forwarded() {
        let (sink, mut rx) = sink();
        let mut welcome = None;
        let frame = PeerFrame::Error {
            code: -22,
            message: "bad".to_string(),
        };
        assert!(forward_frame(frame, &mut welcome, &sink, "test").await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_sink_stops_reader() {
        let (sink, rx) = sink();
        drop(rx);
        let mut welcome = None;
        let frame = PeerFrame::Notify {
            topic: "t".to_string(),
            payload: None,
        };
        assert!(!forward_frame(frame, &mut welcome, &sink, "test").await);
    }

    #[tokio::test]
    async fn missing_command_is_not_running() {
        let system = ProcessSystem::new(PeerConfig::new(
            "tether-peer-that-does-not-exist-anywhere",
            Vec::new(),
        ));
        assert!(!system.is_running().await.unwrap());
        let (sink, _rx) = sink();
        assert!(system.acquire(sink).await.is_err());
    }

    #[test]
    fn peer_config_defaults() {
        let config: PeerConfig =
            serde_json::from_value(serde_json::json!({ "command": "svc" })).unwrap();
        assert_eq!(config.command(), "svc");
        assert!(config.args().is_empty());
        assert_eq!(config.client_name(), "tether");
        assert_eq!(config.handshake_timeout(), Duration::from_secs(5));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn map_strings_rewrites_command_and_args() {
        let config = PeerConfig::new("svc", vec!["--x".to_string()])
            .map_strings(|s| s.to_uppercase());
        assert_eq!(config.command(), "SVC");
        assert_eq!(config.args(), ["--X".to_string()]);
    }
}
