//! Generator-backed message bodies.

use std::fmt;

use rill_core::{ByteStream, Generator};
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::BodyError;

/// A streaming message body.
///
/// The producer side (a transport decoding wire chunks, or an embedder
/// assembling a request) writes into [`generator`](Body::generator) and
/// closes it when the payload is complete. Consumers either iterate
/// [`stream`](Body::stream) chunk by chunk or run one of the collectors,
/// which pull the stream to its end and settle once.
pub struct Body {
    generator: Generator,
}

impl Body {
    /// An open body awaiting producer writes.
    pub fn new() -> Self {
        Self {
            generator: Generator::new(),
        }
    }

    /// A complete body with no content.
    pub fn empty() -> Self {
        let body = Self::new();
        body.generator.close();
        body
    }

    /// A complete body holding one chunk.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let body = Self::new();
        let accepted = body.generator.write(bytes, None).is_ok();
        debug_assert!(accepted, "write to a fresh body cannot fail");
        body.generator.close();
        body
    }

    /// Producer-side handle: transports write wire chunks in here and
    /// close it after the final one.
    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    /// Consumer-side stream of chunks.
    pub fn stream(&self) -> ByteStream {
        ByteStream::new(self.generator.clone())
    }

    /// Bytes buffered by the producer and not yet consumed.
    pub fn buffered_bytes(&self) -> usize {
        self.generator.buffered_bytes()
    }

    /// Collect every remaining chunk into one byte vector.
    ///
    /// Settles once the body ends; chunks still on their way in are
    /// awaited, not missed.
    ///
    /// # Errors
    ///
    /// Fails if the stream was cancelled mid-body.
    pub async fn bytes(&self) -> Result<Vec<u8>, BodyError> {
        let mut collected = Vec::new();
        loop {
            let step = self.generator.next(None).await?;
            if let Some(value) = &step.value {
                collected.extend_from_slice(value.as_bytes());
            }
            if step.done {
                trace!(bytes = collected.len(), "body collected");
                return Ok(collected);
            }
        }
    }

    /// Collect the body as text. Invalid UTF-8 is replaced, not rejected.
    ///
    /// # Errors
    ///
    /// Fails if the stream was cancelled mid-body.
    pub async fn text(&self) -> Result<String, BodyError> {
        let collected = self.bytes().await?;
        Ok(String::from_utf8_lossy(&collected).into_owned())
    }

    /// Collect the body and parse it as JSON.
    ///
    /// # Errors
    ///
    /// Fails if the stream was cancelled or the payload is not valid JSON.
    pub async fn json<T: DeserializeOwned>(&self) -> Result<T, BodyError> {
        let collected = self.bytes().await?;
        Ok(serde_json::from_slice(&collected)?)
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body")
            .field("buffered_bytes", &self.generator.buffered_bytes())
            .field("ended", &self.generator.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_core::Error;
    use serde::Deserialize;

    #[tokio::test]
    async fn collects_buffered_chunks_in_order() {
        let body = Body::new();
        body.generator().write(b"hello, ", None).unwrap();
        body.generator().write(b"world", None).unwrap();
        body.generator().close();

        assert_eq!(body.bytes().await.unwrap(), b"hello, world");
    }

    #[tokio::test]
    async fn empty_body_collects_nothing() {
        let body = Body::empty();
        assert_eq!(body.bytes().await.unwrap(), Vec::<u8>::new());
        assert_eq!(body.text().await.unwrap(), "");
    }

    #[tokio::test]
    async fn collectors_follow_chunks_arriving_late() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let body = Body::new();
                let producer = body.generator().clone();
                tokio::task::spawn_local(async move {
                    producer.write(b"first ", None).unwrap();
                    tokio::task::yield_now().await;
                    producer.write(b"second", None).unwrap();
                    producer.close();
                });

                assert_eq!(body.text().await.unwrap(), "first second");
            })
            .await;
    }

    #[test]
    fn collector_waits_for_the_end_signal() {
        let body = Body::new();
        body.generator().write(b"data", None).unwrap();

        let mut collect = tokio_test::task::spawn(body.bytes());
        tokio_test::assert_pending!(collect.poll());

        body.generator().close();
        let collected = tokio_test::assert_ready!(collect.poll()).unwrap();
        assert_eq!(collected, b"data");
    }

    #[tokio::test]
    async fn text_replaces_invalid_utf8() {
        let body = Body::from_bytes(&[b'o', b'k', 0xff]);
        assert_eq!(body.text().await.unwrap(), "ok\u{fffd}");
    }

    #[tokio::test]
    async fn json_parses_the_collected_payload() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Payload {
            name: String,
            count: u32,
        }

        let body = Body::new();
        body.generator().write(br#"{"name":"ri"#, None).unwrap();
        body.generator().write(br#"ll","count":3}"#, None).unwrap();
        body.generator().close();

        let parsed: Payload = body.json().await.unwrap();
        assert_eq!(
            parsed,
            Payload {
                name: "rill".into(),
                count: 3
            }
        );
    }

    #[tokio::test]
    async fn json_rejects_garbage() {
        let body = Body::from_bytes(b"not json");
        let error = body.json::<serde_json::Value>().await.unwrap_err();
        assert!(matches!(error, BodyError::Json(_)));
    }

    #[tokio::test]
    async fn cancelled_body_fails_collection() {
        let body = Body::new();
        body.generator().write(b"partial", None).unwrap();
        body.generator().cancel(Error::Upstream("peer reset".into()));

        let error = body.bytes().await.unwrap_err();
        assert!(matches!(error, BodyError::Stream(Error::Upstream(_))));
    }

    #[tokio::test]
    async fn stream_yields_individual_chunks() {
        let body = Body::new();
        body.generator().write(b"one", None).unwrap();
        body.generator().write(b"two", None).unwrap();
        body.generator().close();

        let stream = body.stream();
        let first = stream.next(None).await.unwrap();
        assert_eq!(first.value.unwrap().as_bytes(), b"one");
        let second = stream.next(None).await.unwrap();
        assert_eq!(second.value.unwrap().as_bytes(), b"two");
        assert!(stream.next(None).await.unwrap().done);
    }
}
