//! Handle lifecycle for tether.
//!
//! One [`HandleLifecycle`] owns the native handle: lazy or explicit
//! acquisition, event-kind subscription, request/response correlation and
//! teardown. Native events are marshalled into domain events on a
//! dispatcher task and fanned out to registered listeners.

mod correlation;
mod dispatch;
mod lifecycle;
mod subscriptions;

pub use correlation::{Completion, PendingGuard, PendingRequests};
pub use lifecycle::{
    DEFAULT_EVENT_CHANNEL_CAPACITY, DEFAULT_REQUEST_TIMEOUT, HandleLifecycle, LifecycleOptions,
};
pub use subscriptions::{Listener, SubscriptionRegistry};
pub use tokio_util::sync::CancellationToken;
