//! In-process native system.
//!
//! Records every call made through the boundary and lets the owner script
//! failures and inject native events into the live sink. Useful for
//! embedding the lifecycle without a peer process and for exercising
//! lifecycle edge cases deterministically.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tether_types::{
    Command, EventKind, NativeError, NativeEvent, NativeStatus, RequestId, ResultCode,
};

use crate::system::{EventSink, NativeSystem};

#[derive(Debug)]
struct LoopbackState {
    running: bool,
    acquire_delay: Option<Duration>,
    acquire_failure: Option<NativeError>,
    subscribe_failure: Option<(EventKind, NativeError)>,
    send_failure: Option<NativeError>,
    auto_reply: Option<ResultCode>,
    next_handle: u64,
    live: Option<u64>,
    sink: Option<EventSink>,
    acquisitions: usize,
    releases: Vec<u64>,
    subscriptions: Vec<EventKind>,
    sent: Vec<(RequestId, Command)>,
    responses: Vec<(RequestId, ResultCode, Option<serde_json::Value>)>,
}

impl Default for LoopbackState {
    fn default() -> Self {
        Self {
            running: true,
            acquire_delay: None,
            acquire_failure: None,
            subscribe_failure: None,
            send_failure: None,
            auto_reply: None,
            next_handle: 1,
            live: None,
            sink: None,
            acquisitions: 0,
            releases: Vec::new(),
            subscriptions: Vec::new(),
            sent: Vec::new(),
            responses: Vec::new(),
        }
    }
}

/// Handle to a loopback resource; only carries its serial number.
#[derive(Debug, PartialEq, Eq)]
pub struct LoopbackHandle {
    id: u64,
}

impl LoopbackHandle {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Scriptable native system. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct LoopbackSystem {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackSystem {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut LoopbackState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    pub fn set_running(&self, running: bool) {
        self.with_state(|s| s.running = running);
    }

    /// Hold every acquisition for `delay` before it completes.
    pub fn set_acquire_delay(&self, delay: Duration) {
        self.with_state(|s| s.acquire_delay = Some(delay));
    }

    pub fn fail_acquire(&self, err: NativeError) {
        self.with_state(|s| s.acquire_failure = Some(err));
    }

    pub fn fail_subscribe(&self, kind: EventKind, err: NativeError) {
        self.with_state(|s| s.subscribe_failure = Some((kind, err)));
    }

    pub fn fail_send(&self, err: NativeError) {
        self.with_state(|s| s.send_failure = Some(err));
    }

    /// Answer every send with a response carrying `result` and the command
    /// payload.
    pub fn auto_reply(&self, result: ResultCode) {
        self.with_state(|s| s.auto_reply = Some(result));
    }

    /// Push a native event into the sink of the live handle.
    ///
    /// Returns `false` when no handle is live or the receiver is gone.
    pub async fn inject(&self, event: NativeEvent) -> bool {
        let sink = self.with_state(|s| s.sink.clone());
        match sink {
            Some(sink) => sink.emit(event).await,
            None => false,
        }
    }

    #[must_use]
    pub fn acquisitions(&self) -> usize {
        self.with_state(|s| s.acquisitions)
    }

    #[must_use]
    pub fn releases(&self) -> Vec<u64> {
        self.with_state(|s| s.releases.clone())
    }

    #[must_use]
    pub fn live_handle(&self) -> Option<u64> {
        self.with_state(|s| s.live)
    }

    #[must_use]
    pub fn subscriptions(&self) -> Vec<EventKind> {
        self.with_state(|s| s.subscriptions.clone())
    }

    #[must_use]
    pub fn sent(&self) -> Vec<(RequestId, Command)> {
        self.with_state(|s| s.sent.clone())
    }

    #[must_use]
    pub fn responses(&self) -> Vec<(RequestId, ResultCode, Option<serde_json::Value>)> {
        self.with_state(|s| s.responses.clone())
    }

    fn check_live(&self, handle: &LoopbackHandle) -> Result<(), NativeError> {
        if self.with_state(|s| s.live) == Some(handle.id) {
            Ok(())
        } else {
            Err(NativeError::new(
                NativeStatus::InvalidOperation,
                format!("handle {} is not live", handle.id),
            ))
        }
    }
}

impl NativeSystem for LoopbackSystem {
    type Handle = LoopbackHandle;

    async fn is_running(&self) -> Result<bool, NativeError> {
        Ok(self.with_state(|s| s.running))
    }

    async fn acquire(&self, sink: EventSink) -> Result<LoopbackHandle, NativeError> {
        if let Some(delay) = self.with_state(|s| s.acquire_delay) {
            tokio::time::sleep(delay).await;
        }
        self.with_state(|s| {
            s.acquisitions += 1;
            if let Some(err) = s.acquire_failure.clone() {
                return Err(err);
            }
            let id = s.next_handle;
            s.next_handle += 1;
            s.live = Some(id);
            s.sink = Some(sink);
            Ok(LoopbackHandle { id })
        })
    }

    async fn subscribe(&self, handle: &LoopbackHandle, kind: EventKind) -> Result<(), NativeError> {
        self.check_live(handle)?;
        self.with_state(|s| {
            if let Some((failing, err)) = &s.subscribe_failure
                && *failing == kind
            {
                return Err(err.clone());
            }
            s.subscriptions.push(kind);
            Ok(())
        })
    }

    async fn send(
        &self,
        handle: &LoopbackHandle,
        request_id: &RequestId,
        command: &Command,
    ) -> Result<(), NativeError> {
        self.check_live(handle)?;
        let (reply, sink) = self.with_state(|s| {
            if let Some(err) = s.send_failure.clone() {
                return Err(err);
            }
            s.sent.push((request_id.clone(), command.clone()));
            Ok((s.auto_reply, s.sink.clone()))
        })?;

        if let (Some(result), Some(sink)) = (reply, sink) {
            sink.emit(NativeEvent::Response {
                request_id: request_id.to_string(),
                code: result.native(),
                payload: command.payload().cloned(),
            })
            .await;
        }
        Ok(())
    }

    async fn respond(
        &self,
        handle: &LoopbackHandle,
        request_id: &RequestId,
        result: ResultCode,
        payload: Option<&serde_json::Value>,
    ) -> Result<(), NativeError> {
        self.check_live(handle)?;
        self.with_state(|s| {
            s.responses
                .push((request_id.clone(), result, payload.cloned()));
        });
        Ok(())
    }

    async fn release(&self, handle: &LoopbackHandle) {
        self.with_state(|s| {
            s.releases.push(handle.id);
            if s.live == Some(handle.id) {
                s.live = None;
                s.sink = None;
            }
        });
    }
}
