//! HTTP message surfaces over [`rill_core`] byte streams.
//!
//! Requests and responses here are envelopes around a generator-backed
//! [`Body`]: a transport writes wire chunks into the producer side while
//! the consumer either iterates the chunk stream or runs a collector
//! ([`Body::bytes`], [`Body::text`], [`Body::json`]) that follows the
//! stream to its end and settles once with the whole payload.

pub mod body;
pub mod request;
pub mod response;

pub use body::Body;
pub use request::Request;
pub use response::Response;

/// Errors produced while collecting a body.
#[derive(Debug, thiserror::Error)]
pub enum BodyError {
    /// The underlying stream failed or was torn down.
    #[error(transparent)]
    Stream(#[from] rill_core::Error),
    /// The collected payload was not the JSON the caller asked for.
    #[error("invalid json body: {0}")]
    Json(#[from] serde_json::Error),
}
