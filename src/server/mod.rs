//! TCP connection management.
//!
//! One task owns the listening socket and the [`registry::Registry`] of live
//! connections; every accepted connection runs in a task of its own that owns
//! its socket, outbound queue and handler context. The two sides only talk
//! through channels:
//!
//! ```text
//!   TcpServer::run ──spawn──▶ connection task ──on_receive──▶ ConnectionHandler
//!        ▲   ▲                     ▲    │
//!        │   └──── Closed(id) ─────┘    │ readable / writable / timeout
//!        │                              ▼
//!   ServerHandle              ConnectionHandle (send, close, kill, post)
//! ```
//!
//! - **`listener`**: binding, the accept loop and shutdown
//! - **`connection`**: the per-connection state, outbound queue and task
//! - **`handler`**: the trait the protocol layer implements
//! - **`registry`**: live connections keyed by id

pub mod connection;
pub mod handler;
pub mod listener;
pub mod registry;

use thiserror::Error;

pub use connection::{ConnId, Connection, ConnectionHandle, OutboundQueue};
pub use handler::ConnectionHandler;
pub use listener::{ServerHandle, TcpServer};
pub use registry::Registry;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection {0} is closed")]
    Closed(ConnId),
    #[error("server is not running")]
    ServerStopped,
}
