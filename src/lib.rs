//! # bee
//!
//! A small HTTP framework for server-rendered applications: buffered
//! handlers, automatic weak ETags and one parameter tree built from every
//! part of a request.
//!
//! ## What a buffered handler does
//!
//! - **Parameters.** Route params, the query string and a JSON, URL-encoded
//!   or multipart body are merged into one [`Params`] tree. Bracketed keys
//!   nest: `user[name]=x` becomes `{user: {name: "x"}}` and `tag[]=a&tag[]=b`
//!   becomes `{tag: ["a", "b"]}`.
//! - **Deferred errors.** Output goes into a pooled buffer. If the handler
//!   fails, the buffer is thrown away and an error handler renders a
//!   replacement, so clients never see half a page.
//! - **ETags.** Successful `GET` responses get `ETag: W/"<sha256>"`; a
//!   matching `If-None-Match` turns into `304 Not Modified`.
//!
//! Plain `async fn(Request) -> impl IntoResponse` handlers work as well.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use bee::{Config, HandlerBuilder, Router, Server};
//! use http::Method;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), bee::Error> {
//!     let config = Config::from_env()?;
//!     let hb = HandlerBuilder::new().param_parser(config.param_parser());
//!
//!     let app = Router::new().on(Method::GET, "/hello/{name}", hb.build(|w, _req, _env, params| {
//!         Box::pin(async move {
//!             let name = params.get_str("name").unwrap_or("world");
//!             w.write(format!("<p>Hello, {name}</p>").as_bytes());
//!             Ok(())
//!         })
//!     }));
//!
//!     Server::from_config(&config).serve(app).await
//! }
//! ```

mod buffered;
mod config;
mod error;
mod form;
mod handler;
mod params;
mod pool;
mod request;
mod response;
mod router;
mod server;
mod sniff;
mod writer;

pub use buffered::{
    BufferedFn, BufferedHandler, ErrorHandler, HandlerBuilder, ParseParamsFn, weak_etag,
};
pub use config::Config;
pub use error::{BoxError, Error, ParseError};
pub use form::{
    DurationError, Field, FieldData, FieldKind, FieldValue, Form, FormData, parse_duration,
};
pub use handler::{BoxFuture, Handler};
pub use params::{DEFAULT_MULTIPART_LIMIT, KeyPath, ParamParser, Params, Value, parse_params};
pub use pool::{BufferPool, PooledBuf};
pub use request::Request;
pub use response::{ContentType, IntoResponse, Response, ResponseBuilder};
pub use router::Router;
pub use server::Server;
pub use sniff::detect_content_type;
pub use writer::ResponseWriter;
