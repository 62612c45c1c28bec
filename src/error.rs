//! Error types.
//!
//! Three families, separated by who ends up seeing them:
//!
//! - [`Error`]: infrastructure failures surfaced to `main`, such as binding a port or
//!   reading configuration.
//! - [`ParseError`]: the request could not be turned into [`Params`](crate::Params).
//!   Answered with `400 Bad Request` before any handler runs.
//! - [`BoxError`]: whatever a buffered handler returns. Routed through the
//!   error-handler chain and never leaves the HTTP boundary.

use thiserror::Error;

/// Boxed error returned by buffered handlers and error handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type returned by bee's fallible infrastructure operations.
///
/// Application-level failures are expressed as HTTP responses, not as
/// `Error`s.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid socket address `{addr}`")]
    Addr {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("invalid configuration value for {key}: {message}")]
    Config { key: &'static str, message: String },
}

/// Failure to build the parameter tree from a request.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("JSON body must be an object")]
    JsonNotObject,

    #[error("invalid URL-encoded data: {0}")]
    Form(#[from] serde_urlencoded::de::Error),

    #[error("invalid multipart body: {0}")]
    Multipart(#[source] multer::Error),

    #[error("request body exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

impl From<multer::Error> for ParseError {
    fn from(e: multer::Error) -> Self {
        match e {
            multer::Error::StreamSizeExceeded { limit } => Self::TooLarge { limit: limit as usize },
            other => Self::Multipart(other),
        }
    }
}
