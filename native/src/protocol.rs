//! Frames exchanged with a peer process.

use serde::{Deserialize, Serialize};

use tether_types::{EventKind, NativeEvent};

/// Frames written by the client (the side holding the handle).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Hello {
        client: String,
    },
    Subscribe {
        event: EventKind,
    },
    Send {
        request_id: String,
        target: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
    },
    Respond {
        request_id: String,
        code: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
    },
    Goodbye,
}

/// Frames written by the peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerFrame {
    Welcome {
        peer: String,
    },
    Response {
        request_id: String,
        code: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
    },
    Incoming {
        request_id: String,
        peer: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
    },
    Connection {
        peer: String,
        connected: bool,
    },
    Notify {
        topic: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
    },
    Error {
        code: i32,
        message: String,
    },
}

impl PeerFrame {
    /// The native event a peer frame carries, if any.
    ///
    /// `Welcome` belongs to the handshake and `Error` is a diagnostic; neither
    /// is forwarded to the lifecycle.
    #[must_use]
    pub fn into_event(self) -> Option<NativeEvent> {
        match self {
            Self::Response {
                request_id,
                code,
                payload,
            } => Some(NativeEvent::Response {
                request_id,
                code,
                payload,
            }),
            Self::Incoming {
                request_id,
                peer,
                name,
                payload,
            } => Some(NativeEvent::Incoming {
                request_id,
                peer,
                name,
                payload,
            }),
            Self::Connection { peer, connected } => Some(NativeEvent::Connection { peer, connected }),
            Self::Notify { topic, payload } => Some(NativeEvent::Notify { topic, payload }),
            Self::Welcome { .. } | Self::Error { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_frames_are_tagged_snake_case() {
        let frame = ClientFrame::Subscribe {
            event: EventKind::Completion,
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({ "type": "subscribe", "event": "completion" })
        );
        assert_eq!(
            serde_json::to_value(ClientFrame::Goodbye).unwrap(),
            json!({ "type": "goodbye" })
        );
    }

    #[test]
    fn send_frame_omits_missing_payload() {
        let frame = ClientFrame::Send {
            request_id: "r1".to_string(),
            target: "client-1".to_string(),
            name: "play".to_string(),
            payload: None,
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert!(value.get("payload").is_none());
        assert_eq!(value["request_id"], "r1");
    }

    #[test]
    fn peer_response_parses_without_payload() {
        let frame: PeerFrame =
            serde_json::from_value(json!({ "type": "response", "request_id": "r1", "code": 0 }))
                .unwrap();
        assert_eq!(
            frame.into_event(),
            Some(NativeEvent::Response {
                request_id: "r1".to_string(),
                code: 0,
                payload: None,
            })
        );
    }

    #[test]
    fn handshake_and_error_frames_carry_no_event() {
        let welcome = PeerFrame::Welcome {
            peer: "svc".to_string(),
        };
        let error = PeerFrame::Error {
            code: -22,
            message: "bad frame".to_string(),
        };
        assert!(welcome.into_event().is_none());
        assert!(error.into_event().is_none());
    }

    #[test]
    fn unknown_frame_type_is_rejected() {
        let parsed = serde_json::from_value::<PeerFrame>(json!({ "type": "bogus" }));
        assert!(parsed.is_err());
    }
}
