//! Transport-facing session layer on top of [`rill_core`].
//!
//! A [`Session`] owns two byte-stream generators: inbound (wire to script)
//! and outbound (script to wire). Transports report what happened on the
//! socket as [`Event`]s; the session turns them into generator operations,
//! lifecycle hook invocations, and flow-control calls back into the
//! [`Transport`]. Like the generators underneath, sessions are `!Send` and
//! live on the bridge thread; the events themselves are plain data so
//! socket tasks elsewhere can channel them over.

pub mod config;
pub mod event;
pub mod session;
pub mod transport;

pub use config::{SessionConfig, SessionHooks};
pub use event::{CloseReason, Event};
pub use session::{Session, SessionState};
pub use transport::{MockTransport, Transport};

pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors surfaced by session operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Operation attempted on a session that is closing or closed.
    #[error("session closed")]
    Closed,
    /// The transport rejected or lost the operation.
    #[error("transport failure: {0}")]
    Transport(String),
    /// A stream-level error bubbled up from the bridge.
    #[error(transparent)]
    Stream(#[from] rill_core::Error),
}
