//! Byte-stream bridge between push-based transports and pull-based consumers.
//!
//! A transport delivers bytes through callbacks on a single-threaded event
//! loop; a scripting host consumes them through an async-iterator protocol
//! (`next()` returning a promise of `{value, done}`). The [`Generator`] in
//! this crate reconciles the two sides: bytes arriving while a read is
//! pending are handed over directly, bytes arriving early are buffered in a
//! [`Queue`], and reads arriving early wait in an [`AsyncIterator`] until a
//! write or an end-of-stream mark satisfies them.
//!
//! Everything here is deliberately `!Send`: bridge state lives on one thread
//! and is shared with `Rc`. Embeddings that sit next to multi-threaded
//! servers host this crate's types on a dedicated current-thread runtime and
//! talk to it over channels.

pub mod block;
pub mod deferred;
pub mod generator;
pub mod iterator;
pub mod promise;
pub mod queue;
pub mod stream;
pub mod value;

pub use block::Block;
pub use deferred::{Deferred, Sink};
pub use generator::{Generator, GeneratorCounters};
pub use iterator::{AsyncIterator, IterState};
pub use promise::{PromiseHandle, Resolver, promise};
pub use queue::{Queue, QueueItem};
pub use stream::{ByteStream, ValueStream};
pub use value::{IterResult, ScriptValue, ValueCodec};

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the bridge.
///
/// Terminal errors are re-delivered to every late reader, hence `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Write attempted after the stream was marked complete.
    #[error("stream closed")]
    Closed,
    /// The other side of the operation was torn down before settling.
    #[error("stream destroyed")]
    Destroyed,
    /// Transport-level failure injected via `cancel`/`throw`.
    #[error("upstream error: {0}")]
    Upstream(String),
}
