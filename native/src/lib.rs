//! Native system boundary for tether.
//!
//! [`NativeSystem`] is the capability set the lifecycle consumes: acquire,
//! release, send and respond, with responses and notifications delivered
//! out of band through an [`EventSink`]. Two systems ship here:
//! [`ProcessSystem`] talks to a peer child process over framed stdio and
//! [`LoopbackSystem`] runs entirely in process.

pub mod codec;
pub mod peer;
pub mod protocol;

mod loopback;
mod process;
mod system;

pub use loopback::{LoopbackHandle, LoopbackSystem};
pub use process::{PeerConfig, PeerProcess, ProcessSystem};
pub use system::{EventSink, NativeSystem};
