//! Request envelope: method, target, headers, streaming body.

use http::header::AsHeaderName;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};

use crate::Body;

/// One HTTP request.
///
/// Requests start with a complete, empty body; attach a streaming one with
/// [`with_body`](Request::with_body) when there is a payload to carry.
#[derive(Debug)]
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Body::empty(),
        }
    }

    pub fn get(uri: Uri) -> Self {
        Self::new(Method::GET, uri)
    }

    pub fn post(uri: Uri, body: Body) -> Self {
        Self::new(Method::POST, uri).with_body(body)
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

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Path component of the target, `/` when the URI has none.
    pub fn path(&self) -> &str {
        self.uri.path()
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

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// The body as a pull stream, for callers that iterate chunk by chunk
    /// instead of collecting.
    pub fn body_stream(&self) -> rill_core::ByteStream {
        self.body.stream()
    }
}
