//! # Wicker Transport
//!
//! The network edge of the Wicker application runtime:
//!
//! - **HTTP in**: API widgets mounted onto an axum router, with declarative
//!   input extraction and output rendering ([`http::mount`]).
//! - **HTTP out**: the `http` handler group on a shared reqwest client
//!   ([`http::install_http_client`]).
//! - **WebSocket**: per-widget hubs with broadcast fan-out and the
//!   `websocket` handler group ([`ws`]).
//! - **TCP sockets**: server and client socket widgets with buffered reads
//!   and event processes ([`socket`]).
//!
//! Everything here consumes the kernel; the orchestrator in `wicker-runtime`
//! owns start and stop.

pub mod api;
pub mod http;
pub mod socket;
pub mod ws;

pub use api::{ApiDefinition, ApiWidget, InSpec, OutSpec, PathSpec};
pub use http::{GuardContext, GuardFn, MountOptions};
pub use socket::{SocketDefinition, SocketEvents, SocketWidget};
pub use ws::{WebSocketDefinition, WebSocketWidget, WsBuffer, WsLimit};
