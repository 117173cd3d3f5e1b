use serde::{Deserialize, Serialize};

use crate::{LifecycleError, PeerId};

/// A command addressed to a remote peer over the native handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    name: String,
    target: PeerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<serde_json::Value>,
}

impl Command {
    /// Validated at the call boundary, before any handle is touched.
    pub fn new(name: impl Into<String>, target: impl Into<String>) -> Result<Self, LifecycleError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(LifecycleError::invalid_argument(
                "command",
                "name must not be empty",
            ));
        }
        Ok(Self {
            name,
            target: PeerId::new(target)?,
            payload: None,
        })
    }

    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn target(&self) -> &PeerId {
        &self.target
    }

    #[must_use]
    pub fn payload(&self) -> Option<&serde_json::Value> {
        self.payload.as_ref()
    }
}

/// Outcome of a command, as reported in a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Success = 0,
    Failed = 1,
    NotSupported = 2,
    Aborted = 3,
}

impl ResultCode {
    /// Convert from the native numeric code.
    ///
    /// Returns `None` for values outside the defined range.
    /// Callers (boundary code) decide the fallback policy.
    #[must_use]
    pub fn from_native(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Success),
            1 => Some(Self::Failed),
            2 => Some(Self::NotSupported),
            3 => Some(Self::Aborted),
            _ => None,
        }
    }

    /// Like [`ResultCode::from_native`], but out-of-range values are an
    /// argument error. Used where the caller supplies the code.
    pub fn try_from_native(value: i32) -> Result<Self, LifecycleError> {
        Self::from_native(value).ok_or_else(|| {
            LifecycleError::invalid_argument("result", format!("{value} is not a result code"))
        })
    }

    #[must_use]
    pub fn native(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::NotSupported => "not supported",
            Self::Aborted => "aborted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_rejects_empty_name_and_target() {
        assert!(matches!(
            Command::new("", "client-1"),
            Err(LifecycleError::InvalidArgument { name: "command", .. })
        ));
        assert!(matches!(
            Command::new("play", " "),
            Err(LifecycleError::InvalidArgument { name: "peer", .. })
        ));
    }

    #[test]
    fn command_carries_payload() {
        let cmd = Command::new("seek", "client-1")
            .unwrap()
            .with_payload(serde_json::json!({ "position": 42 }));
        assert_eq!(cmd.name(), "seek");
        assert_eq!(cmd.target().as_str(), "client-1");
        assert_eq!(cmd.payload().unwrap()["position"], 42);
    }

    #[test]
    fn result_code_known_values() {
        assert_eq!(ResultCode::from_native(0), Some(ResultCode::Success));
        assert_eq!(ResultCode::from_native(1), Some(ResultCode::Failed));
        assert_eq!(ResultCode::from_native(2), Some(ResultCode::NotSupported));
        assert_eq!(ResultCode::from_native(3), Some(ResultCode::Aborted));
        assert_eq!(ResultCode::Aborted.native(), 3);
    }

    #[test]
    fn result_code_out_of_range() {
        assert_eq!(ResultCode::from_native(-1), None);
        assert_eq!(ResultCode::from_native(4), None);
        assert!(matches!(
            ResultCode::try_from_native(9),
            Err(LifecycleError::InvalidArgument { name: "result", .. })
        ));
    }

    #[test]
    fn only_success_is_success() {
        assert!(ResultCode::Success.is_success());
        assert!(!ResultCode::Failed.is_success());
        assert!(!ResultCode::NotSupported.is_success());
        assert!(!ResultCode::Aborted.is_success());
    }
}
