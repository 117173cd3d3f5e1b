//! Event dispatcher. Marshals native events into domain events.
//!
//! One dispatcher task runs per live handle. Responses are routed into the
//! pending table first; everything else goes straight to listeners.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tether_types::{Command, DomainEvent, NativeEvent, PeerId, RequestId, ResultCode};

use crate::correlation::{Completion, PendingRequests};
use crate::subscriptions::SubscriptionRegistry;

pub(crate) fn spawn_dispatcher(
    mut events: mpsc::Receiver<NativeEvent>,
    pending: PendingRequests,
    listeners: Arc<SubscriptionRegistry>,
    generation: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            dispatch_event(event, &pending, &listeners);
        }
        let dropped = pending.fail_all();
        tracing::info!(
            generation,
            dropped_requests = dropped,
            "native event channel closed"
        );
    })
}

pub(crate) fn dispatch_event(
    event: NativeEvent,
    pending: &PendingRequests,
    listeners: &SubscriptionRegistry,
) {
    let Some(domain) = marshal(event, pending) else {
        return;
    };
    listeners.emit(&domain);
}

fn marshal(event: NativeEvent, pending: &PendingRequests) -> Option<DomainEvent> {
    match event {
        NativeEvent::Response {
            request_id,
            code,
            payload,
        } => {
            let Ok(request_id) = RequestId::new(request_id) else {
                tracing::debug!("dropping response without request id");
                return None;
            };
            let result = ResultCode::from_native(code).unwrap_or_else(|| {
                tracing::warn!(%request_id, code, "response carries unknown result code");
                ResultCode::Failed
            });
            let completion = Completion {
                result,
                payload: payload.clone(),
            };
            if !pending.resolve(&request_id, completion) {
                tracing::trace!(%request_id, "ignoring response with no waiter");
                return None;
            }
            Some(DomainEvent::CommandCompleted {
                request_id,
                result,
                payload,
            })
        }
        NativeEvent::Incoming {
            request_id,
            peer,
            name,
            payload,
        } => {
            let parsed = RequestId::new(request_id).and_then(|request_id| {
                let command = Command::new(name, peer.clone())?;
                Ok((request_id, PeerId::new(peer)?, command))
            });
            match parsed {
                Ok((request_id, peer, command)) => Some(DomainEvent::CommandReceived {
                    request_id,
                    peer,
                    command: match payload {
                        Some(payload) => command.with_payload(payload),
                        None => command,
                    },
                }),
                Err(e) => {
                    tracing::debug!("dropping malformed incoming command: {e}");
                    None
                }
            }
        }
        NativeEvent::Connection { peer, connected } => match PeerId::new(peer) {
            Ok(peer) => Some(DomainEvent::Connection { peer, connected }),
            Err(e) => {
                tracing::debug!("dropping connection event: {e}");
                None
            }
        },
        NativeEvent::Notify { topic, payload } => Some(DomainEvent::Notification { topic, payload }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tether_types::EventKind;

    fn recording(registry: &SubscriptionRegistry, kind: EventKind) -> Arc<Mutex<Vec<DomainEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        registry.subscribe(kind, move |event| sink.lock().unwrap().push(event.clone()));
        seen
    }

    fn response(id: &str, code: i32) -> NativeEvent {
        NativeEvent::Response {
            request_id: id.to_string(),
            code,
            payload: Some(serde_json::json!({ "id": id })),
        }
    }

    #[tokio::test]
    async fn response_resolves_waiter_and_emits_completion() {
        let pending = PendingRequests::new();
        let registry = SubscriptionRegistry::new();
        let seen = recording(&registry, EventKind::Completion);
        let (_guard, rx) = pending.register(RequestId::new("r1").unwrap()).unwrap();

        dispatch_event(response("r1", 0), &pending, &registry);

        let completion = rx.await.unwrap();
        assert_eq!(completion.result, ResultCode::Success);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn duplicate_response_is_ignored() {
        let pending = PendingRequests::new();
        let registry = SubscriptionRegistry::new();
        let seen = recording(&registry, EventKind::Completion);
        let (_guard, _rx) = pending.register(RequestId::new("r1").unwrap()).unwrap();

        dispatch_event(response("r1", 0), &pending, &registry);
        dispatch_event(response("r1", 0), &pending, &registry);

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn response_for_unknown_id_has_no_effect() {
        let pending = PendingRequests::new();
        let registry = SubscriptionRegistry::new();
        let seen = recording(&registry, EventKind::Completion);
        let (_guard, _rx) = pending.register(RequestId::new("r1").unwrap()).unwrap();

        dispatch_event(response("r999", 0), &pending, &registry);

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn unknown_result_code_falls_back_to_failed() {
        let pending = PendingRequests::new();
        let registry = SubscriptionRegistry::new();
        let (_guard, rx) = pending.register(RequestId::new("r1").unwrap()).unwrap();

        dispatch_event(response("r1", 77), &pending, &registry);

        assert_eq!(rx.await.unwrap().result, ResultCode::Failed);
    }

    #[test]
    fn incoming_command_is_marshalled() {
        let pending = PendingRequests::new();
        let registry = SubscriptionRegistry::new();
        let seen = recording(&registry, EventKind::Command);

        dispatch_event(
            NativeEvent::Incoming {
                request_id: "c1".to_string(),
                peer: "client-1".to_string(),
                name: "next".to_string(),
                payload: Some(serde_json::json!({ "track": 3 })),
            },
            &pending,
            &registry,
        );

        let seen = seen.lock().unwrap();
        match &seen[..] {
            [
                DomainEvent::CommandReceived {
                    request_id,
                    peer,
                    command,
                },
            ] => {
                assert_eq!(request_id.as_str(), "c1");
                assert_eq!(peer.as_str(), "client-1");
                assert_eq!(command.name(), "next");
                assert_eq!(command.payload().unwrap()["track"], 3);
            }
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[test]
    fn malformed_incoming_command_is_dropped() {
        let pending = PendingRequests::new();
        let registry = SubscriptionRegistry::new();
        let seen = recording(&registry, EventKind::Command);

        dispatch_event(
            NativeEvent::Incoming {
                request_id: "c1".to_string(),
                peer: "client-1".to_string(),
                name: String::new(),
                payload: None,
            },
            &pending,
            &registry,
        );

        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn connection_and_notification_pass_through() {
        let pending = PendingRequests::new();
        let registry = SubscriptionRegistry::new();
        let connections = recording(&registry, EventKind::Connection);
        let notes = recording(&registry, EventKind::Notification);

        dispatch_event(
            NativeEvent::Connection {
                peer: "client-1".to_string(),
                connected: false,
            },
            &pending,
            &registry,
        );
        dispatch_event(
            NativeEvent::Notify {
                topic: "volume".to_string(),
                payload: None,
            },
            &pending,
            &registry,
        );

        assert_eq!(
            connections.lock().unwrap()[0],
            DomainEvent::Connection {
                peer: PeerId::new("client-1").unwrap(),
                connected: false,
            }
        );
        assert_eq!(notes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn closed_channel_fails_pending_waiters() {
        let pending = PendingRequests::new();
        let registry = Arc::new(SubscriptionRegistry::new());
        let (_guard, rx) = pending.register(RequestId::new("r1").unwrap()).unwrap();

        let (tx, events) = mpsc::channel(4);
        let task = spawn_dispatcher(events, pending.clone(), registry, 1);
        drop(tx);
        task.await.unwrap();

        assert!(rx.await.is_err());
    }
}
