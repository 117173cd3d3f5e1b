//! Listener registry. Listeners are keyed by event kind and invoked synchronously.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use tether_types::{DomainEvent, EventKind, ListenerId};

pub type Listener = Arc<dyn Fn(&DomainEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: BTreeMap<EventKind, Vec<(ListenerId, Listener)>>,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    inner: Mutex<Registry>,
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(
        &self,
        kind: EventKind,
        listener: impl Fn(&DomainEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = ListenerId::new(registry.next_id);
        registry
            .listeners
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut registry = self.lock();
        for listeners in registry.listeners.values_mut() {
            if let Some(pos) = listeners.iter().position(|(lid, _)| *lid == id) {
                listeners.remove(pos);
                return true;
            }
        }
        false
    }

    #[must_use]
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.lock().listeners.get(&kind).map_or(0, Vec::len)
    }

    /// Invoke every listener for the event's kind, in registration order.
    ///
    /// The list is snapshotted first, so listeners may subscribe or
    /// unsubscribe from inside a callback.
    pub fn emit(&self, event: &DomainEvent) -> usize {
        let snapshot: Vec<Listener> = self
            .lock()
            .listeners
            .get(&event.kind())
            .map(|listeners| listeners.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        for listener in &snapshot {
            listener(event);
        }
        snapshot.len()
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.lock();
        let counts: BTreeMap<EventKind, usize> = registry
            .listeners
            .iter()
            .map(|(kind, listeners)| (*kind, listeners.len()))
            .collect();
        f.debug_struct("SubscriptionRegistry")
            .field("listeners", &counts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn notification(topic: &str) -> DomainEvent {
        DomainEvent::Notification {
            topic: topic.to_string(),
            payload: None,
        }
    }

    #[test]
    fn emit_reaches_only_matching_kind() {
        let registry = SubscriptionRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        registry.subscribe(EventKind::Notification, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        registry.subscribe(EventKind::Connection, |_| panic!("wrong kind"));

        assert_eq!(registry.emit(&notification("a")), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listeners_run_in_registration_order() {
        let registry = SubscriptionRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = Arc::clone(&order);
            registry.subscribe(EventKind::Notification, move |_| {
                order.lock().unwrap().push(n);
            });
        }
        registry.emit(&notification("a"));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn unsubscribe_removes_listener() {
        let registry = SubscriptionRegistry::new();
        let id = registry.subscribe(EventKind::Completion, |_| {});
        assert_eq!(registry.listener_count(EventKind::Completion), 1);
        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        assert_eq!(registry.listener_count(EventKind::Completion), 0);
    }

    #[test]
    fn listener_may_unsubscribe_itself_during_emit() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));

        let reg = Arc::clone(&registry);
        let own = Arc::clone(&slot);
        let id = registry.subscribe(EventKind::Notification, move |_| {
            if let Some(id) = *own.lock().unwrap() {
                reg.unsubscribe(id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        assert_eq!(registry.emit(&notification("a")), 1);
        assert_eq!(registry.emit(&notification("b")), 0);
    }

    #[test]
    fn listener_ids_are_unique_across_kinds() {
        let registry = SubscriptionRegistry::new();
        let a = registry.subscribe(EventKind::Connection, |_| {});
        let b = registry.subscribe(EventKind::Command, |_| {});
        assert_ne!(a, b);
    }
}
