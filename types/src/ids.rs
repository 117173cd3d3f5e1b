use std::fmt;

use crate::LifecycleError;

/// Correlation id linking an asynchronous request to its response.
///
/// Opaque to the lifecycle: the only operations are equality, hashing and
/// display. Construction rejects empty ids at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Result<Self, LifecycleError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(LifecycleError::invalid_argument(
                "request_id",
                "must not be empty",
            ));
        }
        Ok(Self(id))
    }

    /// Fresh random id (UUID v4, hyphenated).
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of the remote party a command is addressed to or received from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Result<Self, LifecycleError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(LifecycleError::invalid_argument("peer", "must not be empty"));
        }
        Ok(Self(id))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_rejects_blank() {
        assert!(RequestId::new("").is_err());
        assert!(RequestId::new("   ").is_err());
        assert_eq!(RequestId::new("r1").unwrap().as_str(), "r1");
    }

    #[test]
    fn generated_request_ids_are_distinct() {
        let a = RequestId::generate();
        let b = RequestId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn peer_id_rejects_blank() {
        assert!(PeerId::new("").is_err());
        assert_eq!(PeerId::new("client-1").unwrap().to_string(), "client-1");
    }

    #[test]
    fn request_id_serializes_transparently() {
        let id = RequestId::new("r7").unwrap();
        assert_eq!(serde_json::to_value(&id).unwrap(), serde_json::json!("r7"));
    }
}
