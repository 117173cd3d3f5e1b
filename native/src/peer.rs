//! Reference peer service.
//!
//! Speaks the peer side of the protocol over any async reader/writer pair.
//! The `tether peer` command runs it on stdin/stdout so a [`ProcessSystem`]
//! has something real to talk to.
//!
//! Behaviour:
//! - `send` is answered with a `response` echoing name, target and payload.
//!   The command `fail` answers `Failed`, `unsupported` answers
//!   `NotSupported`, and `callback` first pushes an `incoming` command back
//!   to the client (request id `<id>:callback`).
//! - `respond` is acknowledged with a `notify` on topic `responded`.
//! - Connection, command and notification frames are only written for
//!   kinds the client subscribed to.
//!
//! [`ProcessSystem`]: crate::ProcessSystem

use std::collections::BTreeSet;

use anyhow::Result;
use serde_json::json;
use tokio::io::{AsyncRead, AsyncWrite};

use tether_types::{EventKind, NativeStatus, ResultCode};

use crate::codec::{FrameReader, FrameWriter};
use crate::protocol::{ClientFrame, PeerFrame};

struct PeerSession {
    name: String,
    client: Option<String>,
    subscribed: BTreeSet<EventKind>,
}

impl PeerSession {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            client: None,
            subscribed: BTreeSet::new(),
        }
    }

    fn client(&self) -> String {
        self.client.clone().unwrap_or_else(|| "anonymous".to_string())
    }

    /// Frames to write in answer to one client frame, and whether to stop.
    fn handle(&mut self, frame: ClientFrame) -> (Vec<PeerFrame>, bool) {
        match frame {
            ClientFrame::Hello { client } => {
                tracing::info!(client = %client, "client connected");
                self.client = Some(client);
                (
                    vec![PeerFrame::Welcome {
                        peer: self.name.clone(),
                    }],
                    false,
                )
            }
            ClientFrame::Subscribe { event } => {
                let mut out = Vec::new();
                if self.subscribed.insert(event) && event == EventKind::Connection {
                    out.push(PeerFrame::Connection {
                        peer: self.client(),
                        connected: true,
                    });
                }
                (out, false)
            }
            ClientFrame::Send {
                request_id,
                target,
                name,
                payload,
            } => (self.answer_send(request_id, target, name, payload), false),
            ClientFrame::Respond {
                request_id,
                code,
                payload,
            } => {
                let mut out = Vec::new();
                if self.subscribed.contains(&EventKind::Notification) {
                    out.push(PeerFrame::Notify {
                        topic: "responded".to_string(),
                        payload: Some(json!({
                            "request_id": request_id,
                            "code": code,
                            "payload": payload,
                        })),
                    });
                }
                (out, false)
            }
            ClientFrame::Goodbye => {
                tracing::info!(client = %self.client(), "client said goodbye");
                (Vec::new(), true)
            }
        }
    }

    fn answer_send(
        &self,
        request_id: String,
        target: String,
        name: String,
        payload: Option<serde_json::Value>,
    ) -> Vec<PeerFrame> {
        if request_id.is_empty() || name.is_empty() {
            return vec![PeerFrame::Error {
                code: NativeStatus::InvalidParameter.raw(),
                message: "send requires request_id and name".to_string(),
            }];
        }

        let mut out = Vec::new();
        let result = match name.as_str() {
            "fail" => ResultCode::Failed,
            "unsupported" => ResultCode::NotSupported,
            "callback" => {
                if self.subscribed.contains(&EventKind::Command) {
                    out.push(PeerFrame::Incoming {
                        request_id: format!("{request_id}:callback"),
                        peer: target.clone(),
                        name: "callback".to_string(),
                        payload: payload.clone(),
                    });
                }
                ResultCode::Success
            }
            _ => ResultCode::Success,
        };

        out.push(PeerFrame::Response {
            request_id,
            code: result.native(),
            payload: Some(json!({
                "name": name,
                "target": target,
                "payload": payload,
            })),
        });
        out
    }
}

/// Serve one client until it says goodbye or closes the pipe.
pub async fn serve<R, W>(reader: R, writer: W, name: &str) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = FrameReader::new(reader);
    let mut writer = FrameWriter::new(writer);
    let mut session = PeerSession::new(name);

    while let Some(frame) = reader.read_frame::<ClientFrame>().await? {
        let (replies, done) = session.handle(frame);
        for reply in &replies {
            writer.write_frame(reply).await?;
        }
        if done {
            return Ok(());
        }
    }

    tracing::info!(client = %session.client(), "client closed the pipe");
    Ok(())
}
