//! Pending request table. Correlates responses with their waiters.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;

use tether_types::{LifecycleError, RequestId, ResultCode};

/// What a response delivers to its waiter.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub result: ResultCode,
    pub payload: Option<serde_json::Value>,
}

type Slots = HashMap<RequestId, oneshot::Sender<Completion>>;

/// Request id → completion slot. Clones share the table.
///
/// The lock is never held across an await; resolution happens on the
/// dispatcher task while registration happens on the caller's task.
#[derive(Debug, Clone, Default)]
pub struct PendingRequests {
    slots: Arc<Mutex<Slots>>,
}

impl PendingRequests {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a completion slot for `id`.
    ///
    /// The returned guard removes the slot when dropped, whatever way the
    /// wait ends.
    pub fn register(
        &self,
        id: RequestId,
    ) -> Result<(PendingGuard, oneshot::Receiver<Completion>), LifecycleError> {
        let mut slots = self.lock();
        if slots.contains_key(&id) {
            return Err(LifecycleError::invalid_argument(
                "request_id",
                format!("{id} is already pending"),
            ));
        }
        let (tx, rx) = oneshot::channel();
        slots.insert(id.clone(), tx);
        Ok((
            PendingGuard {
                id,
                slots: Arc::clone(&self.slots),
            },
            rx,
        ))
    }

    /// Fire the slot for `id`. Returns `true` only for the delivery that
    /// reached a waiter; later or unknown ids are no-ops.
    pub fn resolve(&self, id: &RequestId, completion: Completion) -> bool {
        let sender = self.lock().remove(id);
        match sender {
            Some(tx) => tx.send(completion).is_ok(),
            None => false,
        }
    }

    /// Drop every slot; waiters observe a closed channel.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<_> = self.lock().drain().collect();
        drained.len()
    }

    #[must_use]
    pub fn contains(&self, id: &RequestId) -> bool {
        self.lock().contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Deregisters a pending request on drop.
#[derive(Debug)]
pub struct PendingGuard {
    id: RequestId,
    slots: Arc<Mutex<Slots>>,
}

impl PendingGuard {
    #[must_use]
    pub fn id(&self) -> &RequestId {
        &self.id
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}
