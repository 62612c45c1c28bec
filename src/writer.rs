//! The response sink handed to buffered handlers.
//!
//! Nothing written here reaches the client directly. Status, headers and
//! body are recorded and only sent once the handler has returned
//! successfully, or thrown away if it returned an error.

use std::fmt;
use std::io;

use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName, HeaderValue, InvalidHeaderValue};
use http::StatusCode;

use crate::pool::PooledBuf;
use crate::response::Response;

/// A buffered response under construction.
///
/// Implements [`io::Write`] and [`fmt::Write`], so `write!` works for both
/// bytes and formatted text.
#[derive(Debug)]
pub struct ResponseWriter {
    buf: PooledBuf,
    status: Option<StatusCode>,
    headers: HeaderMap,
}

impl ResponseWriter {
    pub(crate) fn new(buf: PooledBuf) -> Self {
        Self { buf, status: None, headers: HeaderMap::new() }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Header lookup. Returns `None` for absent or non-UTF-8 values.
    pub fn header(&self, name: impl header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Sets `name`, replacing earlier values.
    pub fn set_header(&mut self, name: HeaderName, value: &str) -> Result<(), InvalidHeaderValue> {
        self.headers.insert(name, HeaderValue::from_str(value)?);
        Ok(())
    }

    /// Records the status to send. The last call wins.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    /// The recorded status, if any was set.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Appends to the body.
    pub fn write(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// The body written so far.
    pub fn body(&self) -> &[u8] {
        &self.buf
    }

    /// Replaces the response with a redirect to `location`.
    pub fn redirect(&mut self, location: &str, status: StatusCode) -> Result<(), InvalidHeaderValue> {
        self.set_header(header::LOCATION, location)?;
        self.set_status(status);
        Ok(())
    }

    /// Replaces the body with a plain-text `message` and sets `status`.
    pub fn error(&mut self, status: StatusCode, message: &str) {
        self.buf.clear();
        self.headers.remove(header::CONTENT_LENGTH);
        self.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        self.headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
        self.set_status(status);
        self.write(message.as_bytes());
        self.write(b"\n");
    }

    /// Forgets everything written: body, headers and status.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.headers.clear();
        self.status = None;
    }

    /// Moves the recorded status and headers out and copies the body. The
    /// buffer itself stays with the writer and returns to its pool when the
    /// writer drops.
    pub(crate) fn take_response(&mut self, default_status: StatusCode) -> Response {
        Response {
            status: self.status.unwrap_or(default_status),
            headers: std::mem::take(&mut self.headers),
            body: Bytes::copy_from_slice(&self.buf),
        }
    }
}

impl io::Write for ResponseWriter {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Write for ResponseWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.buf.extend_from_slice(s.as_bytes());
        Ok(())
    }
}
