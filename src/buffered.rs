//! Buffered handlers: deferred error substitution and automatic ETags.
//!
//! These two features look unrelated but need the same thing: the whole
//! response body in memory before anything is sent.
//!
//! - A handler may fail after writing half a page. Because nothing has been
//!   sent yet, the partial output is discarded and the error-handler chain
//!   gets a clean [`ResponseWriter`] to render a replacement.
//! - For `GET`, the body digest becomes a weak `ETag`. A client presenting the
//!   same value in `If-None-Match` gets `304 Not Modified` with no body.
//!
//! ```rust,no_run
//! use bee::{HandlerBuilder, Router};
//! use http::Method;
//!
//! let hb = HandlerBuilder::new();
//! let app = Router::new().on(Method::GET, "/", hb.build(|w, _req, _env, _params| {
//!     Box::pin(async move {
//!         w.write(b"Hello, world");
//!         Ok(())
//!     })
//! }));
//! ```

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use http::header::{self, HeaderMap, HeaderValue};
use http::{Method, StatusCode};
use regex::bytes::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, error, warn};

use crate::error::{BoxError, ParseError};
use crate::handler::BoxFuture;
use crate::params::{ParamParser, Params};
use crate::pool::BufferPool;
use crate::request::Request;
use crate::response::Response;
use crate::sniff::detect_content_type;
use crate::writer::ResponseWriter;

// ── Error handlers ────────────────────────────────────────────────────────────

/// One link of the error-handler chain.
///
/// Returns `Ok(true)` if it wrote a response for `err`, `Ok(false)` to pass
/// to the next handler. Returning `Err` aborts the chain with a generic 500.
///
/// Implemented for any closure with the matching signature:
///
/// ```rust
/// use bee::{BoxError, HandlerBuilder, Request, ResponseWriter};
/// use http::StatusCode;
///
/// HandlerBuilder::new().error_handler(
///     |w: &mut ResponseWriter, _req: &Request, err: &BoxError| -> Result<bool, BoxError> {
///         tracing::error!(error = %err, "error handling request");
///         w.error(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
///         Ok(true)
///     },
/// );
/// ```
pub trait ErrorHandler: Send + Sync + 'static {
    fn handle(&self, w: &mut ResponseWriter, req: &Request, err: &BoxError) -> Result<bool, BoxError>;
}

impl<F> ErrorHandler for F
where
    F: Fn(&mut ResponseWriter, &Request, &BoxError) -> Result<bool, BoxError> + Send + Sync + 'static,
{
    fn handle(&self, w: &mut ResponseWriter, req: &Request, err: &BoxError) -> Result<bool, BoxError> {
        self(w, req, err)
    }
}

// ── Handler functions ─────────────────────────────────────────────────────────

/// The business function a buffered handler wraps.
///
/// Everything is passed explicitly: the writer to fill, the request, the
/// shared environment and the parsed parameters. Satisfied by any
/// `Fn(&mut ResponseWriter, &Request, &E, &Params) -> BoxFuture<'_, Result<(), BoxError>>`.
pub trait BufferedFn<E>: Send + Sync + 'static {
    fn run<'a>(
        &'a self,
        w: &'a mut ResponseWriter,
        req: &'a Request,
        env: &'a E,
        params: &'a Params,
    ) -> BoxFuture<'a, Result<(), BoxError>>;
}

impl<E, F> BufferedFn<E> for F
where
    F: for<'a> Fn(
            &'a mut ResponseWriter,
            &'a Request,
            &'a E,
            &'a Params,
        ) -> BoxFuture<'a, Result<(), BoxError>>
        + Send
        + Sync
        + 'static,
{
    fn run<'a>(
        &'a self,
        w: &'a mut ResponseWriter,
        req: &'a Request,
        env: &'a E,
        params: &'a Params,
    ) -> BoxFuture<'a, Result<(), BoxError>> {
        self(w, req, env, params)
    }
}

/// Replacement parameter parser, see [`HandlerBuilder::parse_params`].
pub type ParseParamsFn =
    Arc<dyn for<'a> Fn(&'a Request) -> BoxFuture<'a, Result<Params, ParseError>> + Send + Sync>;

// ── HandlerBuilder ────────────────────────────────────────────────────────────

/// Shared configuration for a family of buffered handlers.
///
/// Configure once, then call [`build`](Self::build) for every route. Each
/// built handler snapshots the configuration at build time.
pub struct HandlerBuilder<E = ()> {
    env: Arc<E>,
    parser: ParamParser,
    parse_params: Option<ParseParamsFn>,
    error_handlers: Vec<Arc<dyn ErrorHandler>>,
    etag_digest_filter: Option<Regex>,
    pool: Arc<BufferPool>,
}

impl HandlerBuilder<()> {
    /// A builder with no environment.
    pub fn new() -> Self {
        Self::with_env(())
    }
}

impl Default for HandlerBuilder<()> {
    fn default() -> Self { Self::new() }
}

impl<E: Send + Sync + 'static> HandlerBuilder<E> {
    /// A builder whose handlers all receive `&env`.
    pub fn with_env(env: E) -> Self {
        Self {
            env: Arc::new(env),
            parser: ParamParser::default(),
            parse_params: None,
            error_handlers: Vec::new(),
            etag_digest_filter: None,
            pool: BufferPool::global(),
        }
    }

    /// Appends to the error-handler chain. Handlers run in the order added.
    pub fn error_handler(mut self, handler: impl ErrorHandler) -> Self {
        self.error_handlers.push(Arc::new(handler));
        self
    }

    /// Excludes every match of `filter` from the ETag digest. Use it for
    /// per-request content such as CSRF tokens.
    pub fn etag_digest_filter(mut self, filter: Regex) -> Self {
        self.etag_digest_filter = Some(filter);
        self
    }

    /// Configures the default parameter parser.
    pub fn param_parser(mut self, parser: ParamParser) -> Self {
        self.parser = parser;
        self
    }

    /// Replaces the parameter parser altogether.
    pub fn parse_params<P>(mut self, parse: P) -> Self
    where
        P: for<'a> Fn(&'a Request) -> BoxFuture<'a, Result<Params, ParseError>> + Send + Sync + 'static,
    {
        self.parse_params = Some(Arc::new(parse));
        self
    }

    /// Draws response buffers from `pool` instead of the global pool.
    pub fn pool(mut self, pool: Arc<BufferPool>) -> Self {
        self.pool = pool;
        self
    }

    /// Wraps `f` into a handler ready for [`Router::on`](crate::Router::on).
    pub fn build<F>(&self, f: F) -> BufferedHandler<E, F>
    where
        F: for<'a> Fn(
                &'a mut ResponseWriter,
                &'a Request,
                &'a E,
                &'a Params,
            ) -> BoxFuture<'a, Result<(), BoxError>>
            + Send
            + Sync
            + 'static,
    {
        BufferedHandler {
            inner: Arc::new(Inner {
                f,
                env: Arc::clone(&self.env),
                parser: self.parser.clone(),
                parse_params: self.parse_params.clone(),
                error_handlers: self.error_handlers.clone(),
                etag_digest_filter: self.etag_digest_filter.clone(),
                pool: Arc::clone(&self.pool),
            }),
        }
    }
}

// ── BufferedHandler ───────────────────────────────────────────────────────────

/// A business function wrapped with buffering, error substitution and ETags.
pub struct BufferedHandler<E, F> {
    inner: Arc<Inner<E, F>>,
}

impl<E, F> Clone for BufferedHandler<E, F> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

struct Inner<E, F> {
    f: F,
    env: Arc<E>,
    parser: ParamParser,
    parse_params: Option<ParseParamsFn>,
    error_handlers: Vec<Arc<dyn ErrorHandler>>,
    etag_digest_filter: Option<Regex>,
    pool: Arc<BufferPool>,
}

impl<E, F> BufferedHandler<E, F>
where
    E: Send + Sync + 'static,
    F: BufferedFn<E>,
{
    /// Runs one request through the handler. Never fails: every error ends
    /// up as a response.
    pub async fn serve(&self, req: Request) -> Response {
        let inner = &*self.inner;

        let params = match inner.parse(&req).await {
            Ok(params) => params,
            Err(e) => {
                warn!(error = %e, method = %req.method(), path = req.path(), "bad request parameters");
                return Response::plain_error(StatusCode::BAD_REQUEST);
            }
        };

        let mut w = ResponseWriter::new(inner.pool.acquire());
        match inner.f.run(&mut w, &req, &inner.env, &params).await {
            Ok(()) => inner.finish(&mut w, &req),
            Err(err) => {
                w.reset();
                inner.recover(&mut w, &req, err)
            }
        }
    }
}

impl<E, F> Inner<E, F> {
    async fn parse(&self, req: &Request) -> Result<Params, ParseError> {
        match &self.parse_params {
            Some(parse) => parse(req).await,
            None => self.parser.parse(req).await,
        }
    }

    /// Runs the error-handler chain against a freshly reset writer.
    fn recover(&self, w: &mut ResponseWriter, req: &Request, err: BoxError) -> Response {
        for handler in &self.error_handlers {
            match handler.handle(w, req, &err) {
                Ok(true) => return w.take_response(StatusCode::INTERNAL_SERVER_ERROR),
                // A declining handler must not leave output for the next one.
                Ok(false) => w.reset(),
                Err(e) => {
                    error!(error = %e, original = %err, "error handler failed");
                    return Response::plain_error(StatusCode::INTERNAL_SERVER_ERROR);
                }
            }
        }

        warn!(error = %err, method = %req.method(), path = req.path(), "unhandled handler error");
        Response::plain_error(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Fills in `Content-Type` and `ETag`, or short-circuits to 304.
    fn finish(&self, w: &mut ResponseWriter, req: &Request) -> Response {
        if !w.headers().contains_key(header::CONTENT_TYPE) {
            let sniffed = detect_content_type(w.body());
            w.headers_mut().insert(header::CONTENT_TYPE, HeaderValue::from_static(sniffed));
        }

        if *req.method() == Method::GET && !w.headers().contains_key(header::ETAG) {
            let etag = weak_etag(w.body(), self.etag_digest_filter.as_ref());
            // Base64url plus `W/"…"` is always a valid header value.
            if let Ok(value) = HeaderValue::from_str(&etag) {
                if req.header(header::IF_NONE_MATCH) == Some(etag.as_str()) {
                    debug!(path = req.path(), etag = %etag, "not modified");
                    return not_modified(w.headers_mut(), value);
                }
                w.headers_mut().insert(header::ETAG, value);
            }
        }

        w.take_response(StatusCode::OK)
    }
}

fn not_modified(headers: &mut HeaderMap, etag: HeaderValue) -> Response {
    let mut headers = std::mem::take(headers);
    headers.remove(header::CONTENT_TYPE);
    headers.remove(header::CONTENT_LENGTH);
    headers.insert(header::ETAG, etag);
    let mut res = Response::status(StatusCode::NOT_MODIFIED);
    res.headers = headers;
    res
}

/// Weak validator for `body`: SHA-256 over the bytes not matched by
/// `filter`, as `W/"<base64url>"`.
pub fn weak_etag(body: &[u8], filter: Option<&Regex>) -> String {
    let mut digest = Sha256::new();
    match filter {
        None => digest.update(body),
        Some(filter) => {
            let mut kept_from = 0;
            for m in filter.find_iter(body) {
                digest.update(&body[kept_from..m.start()]);
                kept_from = m.end();
            }
            digest.update(&body[kept_from..]);
        }
    }
    format!("W/\"{}\"", URL_SAFE.encode(digest.finalize()))
}

#[cfg(test)]
mod tests {
    use std::fmt::Write as _;
    use std::io;

    use super::*;

    const HELLO_ETAG: &str = "W/\"SufDtqwL7_Zx76jPVzhhUcBuWMpTp42D82EHMWzsEl8=\"";

    fn hello() -> BufferedHandler<(), impl BufferedFn<()>> {
        HandlerBuilder::new().build(|w, _req, _env, _params| {
            Box::pin(async move {
                w.write(b"Hello, world");
                Ok(())
            })
        })
    }

    #[test]
    fn etag_of_known_body() {
        assert_eq!(weak_etag(b"Hello, world", None), HELLO_ETAG);
    }

    #[test]
    fn etag_filter_skips_matches() {
        let filter = Regex::new(r#"<input name="csrf" value="[^"]*">"#).unwrap();
        let a = weak_etag(br#"<p><input name="csrf" value="aaa"></p>"#, Some(&filter));
        let b = weak_etag(br#"<p><input name="csrf" value="bbb"></p>"#, Some(&filter));
        assert_eq!(a, b);
        assert_eq!(a, weak_etag(b"<p></p>", None));
    }

    #[tokio::test]
    async fn get_sets_etag_and_sniffs_content_type() {
        let res = hello().serve(Request::get("/")).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.body().as_ref(), b"Hello, world");
        assert_eq!(res.header(header::ETAG), Some(HELLO_ETAG));
        assert_eq!(res.header(header::CONTENT_TYPE), Some("text/plain; charset=utf-8"));
    }

    #[tokio::test]
    async fn matching_if_none_match_is_not_modified() {
        let req = Request::get("/").with_header(header::IF_NONE_MATCH, HELLO_ETAG);
        let res = hello().serve(req).await;
        assert_eq!(res.status_code(), StatusCode::NOT_MODIFIED);
        assert!(res.body().is_empty());
        assert_eq!(res.header(header::ETAG), Some(HELLO_ETAG));
    }

    #[tokio::test]
    async fn stale_if_none_match_gets_the_body() {
        let req = Request::get("/").with_header(header::IF_NONE_MATCH, "W/\"stale\"");
        let res = hello().serve(req).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.body().as_ref(), b"Hello, world");
    }

    #[tokio::test]
    async fn digest_filter_ignores_per_request_tokens() {
        let handler = HandlerBuilder::new()
            .etag_digest_filter(Regex::new(r#"<input name="csrf" value="[^"]*">"#).unwrap())
            .build(|w, _req, _env, params| {
                Box::pin(async move {
                    let token = params.get_str("t").unwrap_or("");
                    write!(w, r#"<p><input name="csrf" value="{token}"></p>"#)?;
                    Ok(())
                })
            });

        let a = handler.serve(Request::get("/?t=aaa")).await;
        let b = handler.serve(Request::get("/?t=bbb")).await;
        let etag = a.header(header::ETAG).unwrap().to_owned();
        assert_eq!(etag, "W/\"_gSp3IjT876NT2vGOpqA9FpMbYRg51Udq4SUV8CRkgo=\"");
        assert_eq!(b.header(header::ETAG), Some(etag.as_str()));
        assert_ne!(a.body(), b.body());

        let req = Request::get("/?t=ccc").with_header(header::IF_NONE_MATCH, &etag);
        let res = handler.serve(req).await;
        assert_eq!(res.status_code(), StatusCode::NOT_MODIFIED);
        assert!(res.body().is_empty());
    }

    #[tokio::test]
    async fn handler_etag_is_left_alone() {
        let handler = HandlerBuilder::new().build(|w, _req, _env, _params| {
            Box::pin(async move {
                w.set_header(header::ETAG, "\"v1\"")?;
                w.write(b"body");
                Ok(())
            })
        });
        let req = Request::get("/").with_header(header::IF_NONE_MATCH, "\"v1\"");
        let res = handler.serve(req).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.header(header::ETAG), Some("\"v1\""));
    }

    #[tokio::test]
    async fn post_gets_no_etag() {
        let req = Request::new(Method::POST, "/".parse().unwrap(), HeaderMap::new(), "");
        let res = hello().serve(req).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert!(res.header(header::ETAG).is_none());
    }

    #[tokio::test]
    async fn status_and_content_type_from_handler_are_kept() {
        let handler = HandlerBuilder::new().build(|w, _req, _env, _params| {
            Box::pin(async move {
                w.set_status(StatusCode::CREATED);
                w.set_header(header::CONTENT_TYPE, "application/json")?;
                w.write(b"{}");
                Ok(())
            })
        });
        let res = handler.serve(Request::get("/")).await;
        assert_eq!(res.status_code(), StatusCode::CREATED);
        assert_eq!(res.header(header::CONTENT_TYPE), Some("application/json"));
    }

    #[tokio::test]
    async fn partial_output_never_leaks_on_error() {
        let handler = HandlerBuilder::new().build(|w, _req, _env, _params| {
            Box::pin(async move {
                w.set_header(header::SET_COOKIE, "session=abc")?;
                w.write(b"<html>half a page");
                Err(io::Error::other("database went away").into())
            })
        });
        let res = handler.serve(Request::get("/")).await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.body().as_ref(), b"Internal Server Error\n");
        assert!(res.header(header::SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn first_claiming_error_handler_wins() {
        let handler = HandlerBuilder::new()
            .error_handler(|w: &mut ResponseWriter, _: &Request, _: &BoxError| -> Result<bool, BoxError> {
                w.write(b"declined output");
                Ok(false)
            })
            .error_handler(|w: &mut ResponseWriter, _: &Request, err: &BoxError| -> Result<bool, BoxError> {
                w.error(StatusCode::SERVICE_UNAVAILABLE, &err.to_string());
                Ok(true)
            })
            .error_handler(|_: &mut ResponseWriter, _: &Request, _: &BoxError| -> Result<bool, BoxError> {
                panic!("chain should have stopped");
            })
            .build(|w, _req, _env, _params| {
                Box::pin(async move {
                    w.write(b"partial");
                    Err("maintenance".into())
                })
            });
        let res = handler.serve(Request::get("/")).await;
        assert_eq!(res.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(res.body().as_ref(), b"maintenance\n");
    }

    #[tokio::test]
    async fn declining_handler_output_is_discarded() {
        let handler = HandlerBuilder::new()
            .error_handler(|w: &mut ResponseWriter, _: &Request, _: &BoxError| -> Result<bool, BoxError> {
                w.set_header(header::SET_COOKIE, "flash=declined")?;
                w.set_status(StatusCode::IM_A_TEAPOT);
                w.write(b"declined ");
                Ok(false)
            })
            .error_handler(|w: &mut ResponseWriter, _: &Request, _: &BoxError| -> Result<bool, BoxError> {
                w.write(b"final");
                Ok(true)
            })
            .build(|_w, _req, _env, _params| Box::pin(async move { Err("boom".into()) }));
        let res = handler.serve(Request::get("/")).await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.body().as_ref(), b"final");
        assert!(res.header(header::SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn failing_error_handler_forces_500() {
        let handler = HandlerBuilder::new()
            .error_handler(|w: &mut ResponseWriter, _: &Request, _: &BoxError| -> Result<bool, BoxError> {
                w.write(b"leaked?");
                Err("template missing".into())
            })
            .build(|_w, _req, _env, _params| Box::pin(async move { Err("boom".into()) }));
        let res = handler.serve(Request::get("/")).await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.body().as_ref(), b"Internal Server Error\n");
    }

    #[tokio::test]
    async fn claiming_handler_without_status_sends_500() {
        let handler = HandlerBuilder::new()
            .error_handler(|w: &mut ResponseWriter, _: &Request, _: &BoxError| -> Result<bool, BoxError> {
                w.write(b"oops");
                Ok(true)
            })
            .build(|_w, _req, _env, _params| Box::pin(async move { Err("boom".into()) }));
        let res = handler.serve(Request::get("/")).await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.body().as_ref(), b"oops");
    }

    #[tokio::test]
    async fn bad_params_are_400_and_skip_the_handler() {
        let handler = HandlerBuilder::new().build(|_w, _req, _env, _params| {
            Box::pin(async move { panic!("handler must not run") })
        });
        let req = Request::new(Method::POST, "/".parse().unwrap(), HeaderMap::new(), "{oops")
            .with_header(header::CONTENT_TYPE, "application/json");
        let res = handler.serve(req).await;
        assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(res.body().as_ref(), b"Bad Request\n");
    }

    #[tokio::test]
    async fn env_and_params_are_passed_through() {
        struct Env {
            greeting: &'static str,
        }
        let handler = HandlerBuilder::with_env(Env { greeting: "Hi" }).build(|w, _req, env, params| {
            Box::pin(async move {
                let name = params.get_str("name").unwrap_or("stranger");
                w.write(format!("{}, {name}", env.greeting).as_bytes());
                Ok(())
            })
        });
        let res = handler.serve(Request::get("/?name=Ada")).await;
        assert_eq!(res.body().as_ref(), b"Hi, Ada");
    }

    #[tokio::test]
    async fn custom_parser_replaces_the_default() {
        let handler = HandlerBuilder::new()
            .parse_params(|_req| Box::pin(async { Ok(Params::from_iter([("fixed", "yes")])) }))
            .build(|w, _req, _env, params| {
                Box::pin(async move {
                    w.write(params.get_str("fixed").unwrap_or("no").as_bytes());
                    Ok(())
                })
            });
        let res = handler.serve(Request::get("/?fixed=no")).await;
        assert_eq!(res.body().as_ref(), b"yes");
    }

    #[tokio::test]
    async fn buffers_return_to_the_pool_empty() {
        let pool = Arc::new(BufferPool::new(4, 1024));
        let handler = HandlerBuilder::new().pool(Arc::clone(&pool)).build(|w, _req, _env, _params| {
            Box::pin(async move {
                w.write(b"sensitive");
                Ok(())
            })
        });
        handler.serve(Request::get("/")).await;
        assert_eq!(pool.idle(), 1);
        assert!(pool.acquire().is_empty());
    }
}
