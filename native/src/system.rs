//! The capability set the lifecycle core consumes from a native system.

use std::future::Future;

use tokio::sync::mpsc;

use tether_types::{Command, EventKind, NativeError, NativeEvent, RequestId, ResultCode};

/// Out-of-band event channel handed to the native side at acquisition.
///
/// The native side may emit from any task. Dropping every clone signals
/// that the native side is gone.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<NativeEvent>,
}

impl EventSink {
    #[must_use]
    pub fn new(tx: mpsc::Sender<NativeEvent>) -> Self {
        Self { tx }
    }

    /// Emit an event. Returns `false` when the receiving side is gone.
    pub async fn emit(&self, event: NativeEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }
}

/// An external system that owns a resource reachable through an opaque
/// handle.
///
/// Acquisition, release and sends are the whole boundary; responses and
/// notifications arrive through the [`EventSink`] passed to `acquire`.
/// Implementations report failures in the native code space and never
/// see lifecycle state.
pub trait NativeSystem: Send + Sync + 'static {
    type Handle: Send + Sync + 'static;

    /// Whether the service behind this system is available at all.
    fn is_running(&self) -> impl Future<Output = Result<bool, NativeError>> + Send;

    fn acquire(
        &self,
        sink: EventSink,
    ) -> impl Future<Output = Result<Self::Handle, NativeError>> + Send;

    /// Ask the native side to deliver events of `kind` through the sink.
    fn subscribe(
        &self,
        handle: &Self::Handle,
        kind: EventKind,
    ) -> impl Future<Output = Result<(), NativeError>> + Send;

    fn send(
        &self,
        handle: &Self::Handle,
        request_id: &RequestId,
        command: &Command,
    ) -> impl Future<Output = Result<(), NativeError>> + Send;

    fn respond(
        &self,
        handle: &Self::Handle,
        request_id: &RequestId,
        result: ResultCode,
        payload: Option<&serde_json::Value>,
    ) -> impl Future<Output = Result<(), NativeError>> + Send;

    /// Release the handle. Called exactly once per acquired handle.
    fn release(&self, handle: &Self::Handle) -> impl Future<Output = ()> + Send;
}
