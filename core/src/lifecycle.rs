//! Handle lifecycle. Owns one native handle and everything hanging off it.
//!
//! The slot is the single source of truth: a handle is live exactly when
//! it sits in the slot together with its dispatcher task. Acquisition,
//! subscription and teardown all happen with the slot locked, so callers
//! racing to initialize observe one acquisition and nobody sees a
//! half-subscribed handle.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tether_native::{EventSink, NativeSystem};
use tether_types::{
    Command, DomainEvent, EventKind, LifecycleError, ListenerId, RequestId, ResultCode,
    RunningState,
};

use crate::correlation::{Completion, PendingRequests};
use crate::dispatch::spawn_dispatcher;
use crate::subscriptions::SubscriptionRegistry;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Tunables for a [`HandleLifecycle`].
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    request_timeout: Option<Duration>,
    event_channel_capacity: usize,
    subscriptions: Vec<EventKind>,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            subscriptions: EventKind::ALL.to_vec(),
        }
    }
}

impl LifecycleOptions {
    /// `None` waits for a response indefinitely.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Kinds registered with the native side on `start`. Duplicates are
    /// registered once.
    #[must_use]
    pub fn with_subscriptions(mut self, kinds: impl IntoIterator<Item = EventKind>) -> Self {
        let unique: BTreeSet<EventKind> = kinds.into_iter().collect();
        self.subscriptions = unique.into_iter().collect();
        self
    }

    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    #[must_use]
    pub fn event_channel_capacity(&self) -> usize {
        self.event_channel_capacity
    }

    #[must_use]
    pub fn subscriptions(&self) -> &[EventKind] {
        &self.subscriptions
    }
}

struct LiveHandle<H> {
    handle: Arc<H>,
    generation: u64,
    subscribed: BTreeSet<EventKind>,
    dispatcher: JoinHandle<()>,
}

struct Slot<H> {
    live: Option<LiveHandle<H>>,
    running: RunningState,
    generation: u64,
}

type RequestIdSource = Box<dyn Fn() -> RequestId + Send + Sync>;

/// Owner of one native handle.
///
/// Hold it in one place and pass it by reference; there is no global
/// instance. Call [`HandleLifecycle::stop`] before dropping a running
/// lifecycle: drop cannot await, so it stops the dispatcher but never
/// releases the native handle.
pub struct HandleLifecycle<S: NativeSystem> {
    system: S,
    options: LifecycleOptions,
    slot: Mutex<Slot<S::Handle>>,
    pending: PendingRequests,
    listeners: Arc<SubscriptionRegistry>,
    next_request_id: RequestIdSource,
}

impl<S: NativeSystem> HandleLifecycle<S> {
    pub fn new(system: S, options: LifecycleOptions) -> Self {
        Self {
            system,
            options,
            slot: Mutex::new(Slot {
                live: None,
                running: RunningState::Unknown,
                generation: 0,
            }),
            pending: PendingRequests::new(),
            listeners: Arc::new(SubscriptionRegistry::new()),
            next_request_id: Box::new(RequestId::generate),
        }
    }

    /// Replace the request id source. Ids must never repeat.
    #[must_use]
    pub fn with_request_ids(mut self, source: impl Fn() -> RequestId + Send + Sync + 'static) -> Self {
        self.next_request_id = Box::new(source);
        self
    }

    // ── State ─────────────────────────────────────────────────────────

    pub async fn running_state(&self) -> RunningState {
        self.slot.lock().await.running
    }

    pub async fn is_live(&self) -> bool {
        self.slot.lock().await.live.is_some()
    }

    /// Kinds registered with the native side for the live handle.
    pub async fn native_subscriptions(&self) -> Vec<EventKind> {
        self.slot
            .lock()
            .await
            .live
            .as_ref()
            .map(|live| live.subscribed.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Forget the cached running state; the next lazy initialization asks
    /// the native side again.
    pub async fn invalidate_running_state(&self) {
        self.slot.lock().await.running = RunningState::Unknown;
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    // ── Listeners ─────────────────────────────────────────────────────

    pub fn subscribe(
        &self,
        kind: EventKind,
        listener: impl Fn(&DomainEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.listeners.subscribe(kind, listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    // ── Lifecycle ─────────────────────────────────────────────────────

    /// Return the live handle, acquiring one if the service is running.
    ///
    /// Lazy acquisition registers no notification kinds; responses to
    /// requests flow regardless.
    pub async fn ensure_initialized(&self) -> Result<Arc<S::Handle>, LifecycleError> {
        self.initialized().await.map(|(handle, _)| handle)
    }

    async fn initialized(&self) -> Result<(Arc<S::Handle>, u64), LifecycleError> {
        let mut slot = self.slot.lock().await;
        if let Some(live) = &slot.live {
            return Ok((Arc::clone(&live.handle), live.generation));
        }

        if !slot.running.is_known() {
            let running = self
                .system
                .is_running()
                .await
                .map_err(|e| LifecycleError::from_native("is_running", e))?;
            slot.running = RunningState::from_probe(running);
            tracing::debug!(state = slot.running.label(), "probed native running state");
        }
        if slot.running != RunningState::Running {
            return Err(LifecycleError::not_running("ensure_initialized"));
        }

        let live = self.acquire(&mut slot).await?;
        tracing::info!(generation = live.generation, "native handle acquired lazily");
        let acquired = (Arc::clone(&live.handle), live.generation);
        slot.live = Some(live);
        Ok(acquired)
    }

    async fn current_generation(&self) -> Option<u64> {
        self.slot.lock().await.live.as_ref().map(|live| live.generation)
    }

    /// (Re-)initialize: tear down any current handle, acquire a new one and
    /// register every configured event kind.
    ///
    /// A failed subscription releases the new handle before returning.
    pub async fn start(&self) -> Result<(), LifecycleError> {
        let mut slot = self.slot.lock().await;
        if let Some(previous) = slot.live.take() {
            tracing::info!(generation = previous.generation, "restarting, releasing previous handle");
            self.teardown(previous).await;
        }

        let mut live = match self.acquire(&mut slot).await {
            Ok(live) => live,
            Err(e) => {
                slot.running = RunningState::Stopped;
                return Err(e);
            }
        };

        for kind in &self.options.subscriptions {
            if let Err(e) = self.system.subscribe(&live.handle, *kind).await {
                tracing::warn!(
                    generation = live.generation,
                    event = %kind,
                    "subscription failed, releasing handle: {e}"
                );
                self.teardown(live).await;
                slot.running = RunningState::Stopped;
                return Err(LifecycleError::InitializationFailed { source: e });
            }
            live.subscribed.insert(*kind);
        }

        tracing::info!(
            generation = live.generation,
            subscriptions = live.subscribed.len(),
            "native handle started"
        );
        slot.live = Some(live);
        slot.running = RunningState::Running;
        Ok(())
    }

    /// Release the live handle and fail every pending request.
    pub async fn stop(&self) -> Result<(), LifecycleError> {
        let mut slot = self.slot.lock().await;
        let Some(live) = slot.live.take() else {
            return Err(LifecycleError::not_running("stop"));
        };
        let generation = live.generation;
        self.teardown(live).await;
        slot.running = RunningState::Stopped;
        tracing::info!(generation, "native handle stopped");
        Ok(())
    }

    async fn acquire(&self, slot: &mut Slot<S::Handle>) -> Result<LiveHandle<S::Handle>, LifecycleError> {
        let (tx, rx) = mpsc::channel(self.options.event_channel_capacity);
        let handle = self
            .system
            .acquire(EventSink::new(tx))
            .await
            .map_err(LifecycleError::from_acquire)?;

        slot.generation += 1;
        let generation = slot.generation;
        let dispatcher = spawn_dispatcher(
            rx,
            self.pending.clone(),
            Arc::clone(&self.listeners),
            generation,
        );
        Ok(LiveHandle {
            handle: Arc::new(handle),
            generation,
            subscribed: BTreeSet::new(),
            dispatcher,
        })
    }

    async fn teardown(&self, live: LiveHandle<S::Handle>) {
        live.dispatcher.abort();
        self.system.release(&live.handle).await;
        let dropped = self.pending.fail_all();
        if dropped > 0 {
            tracing::debug!(
                generation = live.generation,
                dropped_requests = dropped,
                "pending requests failed by teardown"
            );
        }
    }

    // ── Requests ──────────────────────────────────────────────────────

    /// Send `command` and wait for its correlated response.
    ///
    /// Returns the response payload on `Success`; any other result is
    /// [`LifecycleError::CommandFailed`].
    pub async fn request(&self, command: Command) -> Result<Option<serde_json::Value>, LifecycleError> {
        self.request_with_cancel(command, &CancellationToken::new())
            .await
    }

    /// Like [`HandleLifecycle::request`], but gives up with
    /// [`LifecycleError::Cancelled`] as soon as `cancel` fires.
    ///
    /// A token that fires before the command is sent abandons lazy
    /// acquisition and sends nothing. A response that has already arrived
    /// wins over a cancellation observed at the same time.
    pub async fn request_with_cancel(
        &self,
        command: Command,
        cancel: &CancellationToken,
    ) -> Result<Option<serde_json::Value>, LifecycleError> {
        let request_id = (self.next_request_id)();
        let cancelled = || {
            tracing::debug!(%request_id, "request cancelled before send");
            LifecycleError::Cancelled {
                request_id: request_id.clone(),
            }
        };
        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        let (handle, generation) = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(cancelled()),
            initialized = self.initialized() => initialized?,
        };
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        let (guard, rx) = self.pending.register(request_id.clone())?;

        let sent = self.system.send(&handle, &request_id, &command).await;
        drop(handle);
        if let Err(e) = sent {
            // A stop that raced the send released the handle underneath us.
            if self.current_generation().await != Some(generation) {
                return Err(LifecycleError::not_running("request"));
            }
            return Err(LifecycleError::from_native("send", e));
        }

        tracing::debug!(
            %request_id,
            command = command.name(),
            target = %command.target(),
            "request sent"
        );

        let outcome = self.await_completion(&request_id, rx, cancel).await;
        drop(guard);

        let completion = outcome?;
        if completion.result.is_success() {
            Ok(completion.payload)
        } else {
            Err(LifecycleError::CommandFailed {
                request_id,
                result: completion.result,
                payload: completion.payload,
            })
        }
    }

    async fn await_completion(
        &self,
        request_id: &RequestId,
        rx: oneshot::Receiver<Completion>,
        cancel: &CancellationToken,
    ) -> Result<Completion, LifecycleError> {
        let response = async { rx.await.map_err(|_| LifecycleError::not_running("request")) };
        let bounded = async {
            match self.options.request_timeout {
                Some(after) => tokio::time::timeout(after, response)
                    .await
                    .unwrap_or_else(|_| {
                        Err(LifecycleError::TimedOut {
                            request_id: request_id.clone(),
                            after,
                        })
                    }),
                None => response.await,
            }
        };

        tokio::select! {
            biased;
            outcome = bounded => outcome,
            () = cancel.cancelled() => {
                tracing::debug!(%request_id, "request cancelled");
                Err(LifecycleError::Cancelled { request_id: request_id.clone() })
            }
        }
    }

    /// Answer a command received from a peer. Requires a live handle.
    pub async fn respond(
        &self,
        request_id: &RequestId,
        result: ResultCode,
        payload: Option<&serde_json::Value>,
    ) -> Result<(), LifecycleError> {
        let handle = {
            let slot = self.slot.lock().await;
            match &slot.live {
                Some(live) => Arc::clone(&live.handle),
                None => return Err(LifecycleError::not_running("respond")),
            }
        };

        self.system
            .respond(&handle, request_id, result, payload)
            .await
            .map_err(|e| LifecycleError::from_native("respond", e))
    }

    /// [`HandleLifecycle::respond`] with unvalidated inputs, as they arrive
    /// from outside the type system. Range checks run before the handle is
    /// touched.
    pub async fn respond_raw(
        &self,
        request_id: &str,
        code: i32,
        payload: Option<&serde_json::Value>,
    ) -> Result<(), LifecycleError> {
        let request_id = RequestId::new(request_id)?;
        let result = ResultCode::try_from_native(code)?;
        self.respond(&request_id, result, payload).await
    }
}

impl<S: NativeSystem> Drop for HandleLifecycle<S> {
    fn drop(&mut self) {
        let slot = self.slot.get_mut();
        if let Some(live) = slot.live.take() {
            live.dispatcher.abort();
            tracing::warn!(
                generation = live.generation,
                "lifecycle dropped while running; handle dropped without release"
            );
        }
    }
}
