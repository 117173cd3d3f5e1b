//! Core domain types for tether.
//!
//! Identifiers, the error taxonomy, cached running state, commands and the
//! event vocabulary shared by the native boundary and the lifecycle core.
//! No IO, no async.

#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod command;
mod error;
mod event;
mod ids;
mod state;

pub use command::{Command, ResultCode};
pub use error::{LifecycleError, NativeError, NativeStatus};
pub use event::{DomainEvent, EventKind, NativeEvent};
pub use ids::{ListenerId, PeerId, RequestId};
pub use state::RunningState;
