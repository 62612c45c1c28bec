//! Incoming HTTP request type.

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, Uri, header};

/// An incoming HTTP request with its body already read into memory.
#[derive(Debug)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) uri: Uri,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) params: Vec<(String, String)>,
}

impl Request {
    /// Builds a request from its parts. Route parameters start empty; the
    /// router fills them in on a match.
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self { method, uri, headers, body: body.into(), params: Vec::new() }
    }

    /// Shorthand for a bodiless `GET` in tests. Panics if `uri` is invalid.
    #[doc(hidden)]
    pub fn get(uri: &str) -> Self {
        let uri = uri.parse().unwrap_or_else(|e| panic!("invalid uri `{uri}`: {e}"));
        Self::new(Method::GET, uri, HeaderMap::new(), Bytes::new())
    }

    /// Adds a header in tests. Panics if `value` is not a valid header value.
    #[doc(hidden)]
    pub fn with_header(mut self, name: header::HeaderName, value: &str) -> Self {
        let value = HeaderValue::from_str(value)
            .unwrap_or_else(|e| panic!("invalid header value `{value}`: {e}"));
        self.headers.append(name, value);
        self
    }

    /// Replaces the route parameters. The router does this on a match.
    pub fn with_params(mut self, params: Vec<(String, String)>) -> Self {
        self.params = params;
        self
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &Bytes { &self.body }

    /// The raw query string, without the leading `?`. Empty when absent.
    pub fn query(&self) -> &str {
        self.uri.query().unwrap_or("")
    }

    /// Header lookup. Returns `None` for absent or non-UTF-8 values.
    pub fn header(&self, name: impl header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The declared `Content-Type`, verbatim (parameters included).
    pub fn content_type(&self) -> Option<&str> {
        self.header(header::CONTENT_TYPE)
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Route parameters in the order they appear in the path.
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }
}
