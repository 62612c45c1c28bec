//! Handler trait and type erasure.
//!
//! # How handlers are stored
//!
//! The router holds handlers of *different* types in a single
//! `HashMap<Method, Tree>`. Each one is hidden behind `dyn ErasedHandler` so
//! the map can store them uniformly.
//!
//! Two kinds of handler exist:
//!
//! ```text
//! async fn hello(req: Request) -> Response { … }     ← plain handler
//!        ↓ router.on(Method::GET, "/", hello)
//! Arc::new(FnHandler(hello))
//!
//! builder.build(|w, req, env, params| …)            ← buffered handler
//!        ↓ router.on(Method::GET, "/", handler)
//! Arc::new(handler)                                 ← already an Arc inside
//! ```
//!
//! Either way the per-request cost is one Arc clone and one virtual call.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::buffered::{BufferedFn, BufferedHandler};
use crate::request::Request;
use crate::response::{IntoResponse, Response};

// ── Shared types ──────────────────────────────────────────────────────────────

/// A heap-allocated, type-erased future.
///
/// `Pin<Box<…>>` lets the runtime poll it in place; `Send` lets tokio move it
/// across worker threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of the public `Handler` trait's `into_boxed_handler` method.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Request) -> BoxFuture<'static, Response>;
}

/// A type-erased handler shared across concurrent requests.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// You never implement this yourself. It is satisfied by:
///
/// - any `async fn name(req: Request) -> impl IntoResponse`
/// - every [`BufferedHandler`] produced by a
///   [`HandlerBuilder`](crate::HandlerBuilder)
///
/// The trait is **sealed** (via the private `Sealed` supertrait).
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

// ── Plain async functions ─────────────────────────────────────────────────────

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Newtype wrapper that holds a concrete handler `F` and implements
/// [`ErasedHandler`].
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture<'static, Response> {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_response() })
    }
}

// ── Buffered handlers ─────────────────────────────────────────────────────────

impl<E, F> private::Sealed for BufferedHandler<E, F>
where
    E: Send + Sync + 'static,
    F: BufferedFn<E>,
{
}

impl<E, F> Handler for BufferedHandler<E, F>
where
    E: Send + Sync + 'static,
    F: BufferedFn<E>,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(self)
    }
}

impl<E, F> ErasedHandler for BufferedHandler<E, F>
where
    E: Send + Sync + 'static,
    F: BufferedFn<E>,
{
    fn call(&self, req: Request) -> BoxFuture<'static, Response> {
        let handler = self.clone();
        Box::pin(async move { handler.serve(req).await })
    }
}
