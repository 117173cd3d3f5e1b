//! Native events and the domain events they are marshalled into.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Command, LifecycleError, PeerId, RequestId, ResultCode};

/// Kinds of notification a handle can be subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Connection,
    Command,
    Completion,
    Notification,
}

impl EventKind {
    pub const ALL: [Self; 4] = [
        Self::Connection,
        Self::Command,
        Self::Completion,
        Self::Notification,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Command => "command",
            Self::Completion => "completion",
            Self::Notification => "notification",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| LifecycleError::invalid_argument("event", format!("unknown kind {s:?}")))
    }
}

/// Raw event pushed by the native side, before translation.
///
/// Codes are still native integers and ids are unvalidated strings; the
/// dispatcher owns the fallback policy for malformed values.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeEvent {
    Response {
        request_id: String,
        code: i32,
        payload: Option<serde_json::Value>,
    },
    Incoming {
        request_id: String,
        peer: String,
        name: String,
        payload: Option<serde_json::Value>,
    },
    Connection {
        peer: String,
        connected: bool,
    },
    Notify {
        topic: String,
        payload: Option<serde_json::Value>,
    },
}

/// Domain event delivered to registered listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    Connection {
        peer: PeerId,
        connected: bool,
    },
    CommandReceived {
        request_id: RequestId,
        peer: PeerId,
        command: Command,
    },
    CommandCompleted {
        request_id: RequestId,
        result: ResultCode,
        payload: Option<serde_json::Value>,
    },
    Notification {
        topic: String,
        payload: Option<serde_json::Value>,
    },
}

impl DomainEvent {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connection { .. } => EventKind::Connection,
            Self::CommandReceived { .. } => EventKind::Command,
            Self::CommandCompleted { .. } => EventKind::Completion,
            Self::Notification { .. } => EventKind::Notification,
        }
    }
}
