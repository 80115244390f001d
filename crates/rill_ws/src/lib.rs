//! WebSocket transport for bridge sessions.
//!
//! Socket I/O and session state live in different worlds: axum handlers
//! and tungstenite streams run wherever the embedder's runtime schedules
//! them, while generators and sessions are `!Send` and stay on the
//! dedicated [`BridgeRuntime`] thread. The two meet over plain-data
//! channels, [`rill_session::Event`]s flowing in and [`WireCommand`]s
//! flowing out, so neither side ever touches the other's state.
//!
//! [`WsServer`] listens and hands every accepted connection to a session
//! callback on the bridge; [`connect`] does the same for dialed
//! connections.

pub mod client;
pub mod runtime;
pub mod server;
pub mod transport;

pub use client::{ConnectError, connect};
pub use runtime::{BridgeGone, BridgeRuntime};
pub use server::{ListenerConfig, ServeError, WsServer, WsServerHandle};
pub use transport::{WireCommand, WsTransport};
