//! Response envelope: status, headers, streaming body.

use http::header::AsHeaderName;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri, header};
use serde::de::DeserializeOwned;

use crate::{Body, BodyError};

/// One HTTP response.
///
/// Responses start with an open body: the transport streams payload chunks
/// into [`Body::generator`] as they arrive and closes it after the last
/// one, while the consumer reads concurrently. The collectors settle once
/// the body ends, however the chunks were timed.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    uri: Uri,
    body: Body,
}

impl Response {
    pub fn new(uri: Uri, status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            uri,
            body: Body::new(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// True for 2xx statuses.
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// The URI this response answered.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// A header's value as text, if present and valid UTF-8.
    pub fn header<K: AsHeaderName>(&self, name: K) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(header::CONTENT_TYPE)
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// The body as a pull stream, for callers that iterate chunk by chunk
    /// instead of collecting.
    pub fn body_stream(&self) -> rill_core::ByteStream {
        self.body.stream()
    }

    /// Collect the whole payload. See [`Body::bytes`].
    #[allow(clippy::missing_errors_doc)]
    pub async fn bytes(&self) -> Result<Vec<u8>, BodyError> {
        self.body.bytes().await
    }

    /// Collect the payload as text. See [`Body::text`].
    #[allow(clippy::missing_errors_doc)]
    pub async fn text(&self) -> Result<String, BodyError> {
        self.body.text().await
    }

    /// Collect the payload and parse it as JSON. See [`Body::json`].
    #[allow(clippy::missing_errors_doc)]
    pub async fn json<T: DeserializeOwned>(&self) -> Result<T, BodyError> {
        self.body.json().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri() -> Uri {
        "http://example.com/data".parse().unwrap()
    }

    #[test]
    fn status_classification() {
        assert!(Response::new(uri(), StatusCode::OK).ok());
        assert!(Response::new(uri(), StatusCode::NO_CONTENT).ok());
        assert!(!Response::new(uri(), StatusCode::NOT_FOUND).ok());
    }

    #[test]
    fn content_type_reads_the_header() {
        let response = Response::new(uri(), StatusCode::OK).with_header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        );
        assert_eq!(response.content_type(), Some("text/html; charset=utf-8"));
        assert_eq!(Response::new(uri(), StatusCode::OK).content_type(), None);
    }

    #[tokio::test]
    async fn collectors_read_the_streamed_payload() {
        let response = Response::new(uri(), StatusCode::OK);
        response.body().generator().write(br#"{"n":"#, None).unwrap();
        response.body().generator().write(b"42}", None).unwrap();
        response.body().generator().close();

        let value: serde_json::Value = response.json().await.unwrap();
        assert_eq!(value["n"], 42);
    }

    #[tokio::test]
    async fn text_settles_once_with_the_final_accumulation() {
        let response = Response::new(uri(), StatusCode::OK).with_body(Body::new());
        let producer = response.body().generator().clone();
        producer.write(b"chunk-a ", None).unwrap();
        producer.write(b"chunk-b", None).unwrap();
        producer.close();

        assert_eq!(response.text().await.unwrap(), "chunk-a chunk-b");
    }
}
