//! Client-side bridge to a NextPVR backend.
//!
//! The bridge keeps one session per backend instance: it logs in with the
//! salted-PIN digest, watches backend change timestamps from a heartbeat
//! thread, serves the channel lineup from a disk cache, and proxies live
//! and recorded byte streams.  The host embeds one [`PvrClient`] per
//! instance and receives connection-state changes and refresh triggers
//! through its [`HostNotifier`] implementation.
//!
//! Wire-level pieces (requests, response documents, the cache container,
//! the login digest) live in the `nextpvr-protocol` crate; this crate
//! adds the state machines and I/O around them.

pub mod channels;
pub mod client;
pub mod error;
pub mod host;
pub mod session;
pub mod settings;
pub mod streams;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{ClientCapabilities, PvrClient};
pub use error::{BridgeError, TransportError};
pub use host::{ConnectionState, HostNotifier, LoggingNotifier, NullSyncHooks, SyncHooks};
pub use settings::InstanceSettings;
