//! Handler trait and the adapters that produce handlers.
//!
//! # One shape for every handler
//!
//! The route table stores handlers of *different* concrete types side by
//! side, so every handler is erased to `Arc<dyn Handler>`. Whatever the user
//! registered, the dispatcher sees exactly one entry point:
//!
//! ```text
//! func(get_user)                     ← plain function over the context
//! method(service, "get", Service::get) ← method bound to a shared receiver
//! native(docs_ui)                    ← raw http::Request → http::Response
//! bind(echo)                         ← typed request/response (see `bind`)
//!        ↓ stored as Arc<dyn Handler>
//! handler.invoke(&mut ctx)           ← one vtable call per request
//! ```
//!
//! Futures borrow the context for the duration of the call, which is why the
//! signatures spell out a lifetime: `HandlerFuture<'a>` lives as long as the
//! `&'a mut Context` it was given.

use std::any::type_name;
use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::panic::Location;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;

use crate::context::Context;
use crate::error::Error;

/// A heap-allocated, type-erased future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What handlers and filters return: the response lives in the context, the
/// result only says whether the request completed or failed abruptly.
pub type HandlerFuture<'a> = BoxFuture<'a, Result<(), Error>>;

/// The terminal link of a filter chain.
pub trait Handler: Send + Sync + 'static {
    fn invoke<'a>(&'a self, ctx: &'a mut Context) -> HandlerFuture<'a>;

    /// Where the handler was registered, for startup diagnostics.
    fn provenance(&self) -> &Provenance;

    /// Request/response types of binding handlers, for documentation.
    fn signature(&self) -> Option<Signature> {
        None
    }
}

/// Registration site and name of a handler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Provenance {
    file: &'static str,
    line: u32,
    name: Cow<'static, str>,
}

impl Provenance {
    /// Captures the caller's location. Callers should be `#[track_caller]`
    /// themselves so the location is the user's registration site.
    #[track_caller]
    pub fn caller(name: impl Into<Cow<'static, str>>) -> Self {
        let location = Location::caller();
        Self { file: location.file(), line: location.line(), name: name.into() }
    }

    pub fn file(&self) -> &'static str {
        self.file
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} {}", self.file, self.line, self.name)
    }
}

/// Type names a binding handler decodes and encodes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub request: Option<&'static str>,
    pub response: &'static str,
}

// ── Function handler ──────────────────────────────────────────────────────────

pub struct FnHandler<F> {
    f: F,
    provenance: Provenance,
}

/// Wraps a function over the context.
///
/// ```rust
/// use sprig::{Context, HandlerFuture, func};
/// use http::StatusCode;
///
/// fn hello(ctx: &mut Context) -> HandlerFuture<'_> {
///     Box::pin(async move {
///         ctx.string(StatusCode::OK, "hello");
///         Ok(())
///     })
/// }
///
/// let named = func(hello);
/// let inline = func(|ctx| Box::pin(async move {
///     ctx.no_content(StatusCode::NO_CONTENT);
///     Ok(())
/// }));
/// ```
#[track_caller]
pub fn func<F>(f: F) -> FnHandler<F>
where
    F: for<'a> Fn(&'a mut Context) -> HandlerFuture<'a> + Send + Sync + 'static,
{
    FnHandler { f, provenance: Provenance::caller(type_name::<F>()) }
}

impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(&'a mut Context) -> HandlerFuture<'a> + Send + Sync + 'static,
{
    fn invoke<'a>(&'a self, ctx: &'a mut Context) -> HandlerFuture<'a> {
        (self.f)(ctx)
    }

    fn provenance(&self) -> &Provenance {
        &self.provenance
    }
}

// ── Method handler ────────────────────────────────────────────────────────────

pub struct MethodHandler<S, F> {
    receiver: Arc<S>,
    f: F,
    provenance: Provenance,
}

/// Binds a method of a shared receiver.
///
/// The method is resolved by the compiler, so a handler can never point at
/// a method that does not exist. `name` is only used in diagnostics.
///
/// ```rust
/// use std::sync::Arc;
/// use sprig::{Context, HandlerFuture, method};
/// use http::StatusCode;
///
/// struct Greeter { greeting: String }
///
/// impl Greeter {
///     fn greet<'a>(&'a self, ctx: &'a mut Context) -> HandlerFuture<'a> {
///         Box::pin(async move {
///             ctx.string(StatusCode::OK, self.greeting.clone());
///             Ok(())
///         })
///     }
/// }
///
/// let greeter = Arc::new(Greeter { greeting: "hi".into() });
/// let handler = method(greeter, "greet", Greeter::greet);
/// ```
#[track_caller]
pub fn method<S, F>(receiver: Arc<S>, name: &'static str, f: F) -> MethodHandler<S, F>
where
    S: Send + Sync + 'static,
    F: for<'a> Fn(&'a S, &'a mut Context) -> HandlerFuture<'a> + Send + Sync + 'static,
{
    let name = format!("{}::{name}", type_name::<S>());
    MethodHandler { receiver, f, provenance: Provenance::caller(name) }
}

impl<S, F> Handler for MethodHandler<S, F>
where
    S: Send + Sync + 'static,
    F: for<'a> Fn(&'a S, &'a mut Context) -> HandlerFuture<'a> + Send + Sync + 'static,
{
    fn invoke<'a>(&'a self, ctx: &'a mut Context) -> HandlerFuture<'a> {
        (self.f)(self.receiver.as_ref(), ctx)
    }

    fn provenance(&self) -> &Provenance {
        &self.provenance
    }
}

// ── Native handler ────────────────────────────────────────────────────────────

pub struct NativeHandler<F> {
    f: F,
    provenance: Provenance,
}

/// Wraps a raw `http` handler that bypasses the context abstraction.
///
/// The handler receives a copy of the request and its response replaces
/// anything written to the context so far.
#[track_caller]
pub fn native<F, Fut>(f: F) -> NativeHandler<F>
where
    F: Fn(http::Request<Bytes>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = http::Response<Bytes>> + Send + 'static,
{
    NativeHandler { f, provenance: Provenance::caller(type_name::<F>()) }
}

impl<F, Fut> Handler for NativeHandler<F>
where
    F: Fn(http::Request<Bytes>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = http::Response<Bytes>> + Send + 'static,
{
    fn invoke<'a>(&'a self, ctx: &'a mut Context) -> HandlerFuture<'a> {
        let fut = (self.f)(ctx.native_request());
        Box::pin(async move {
            let response = fut.await;
            ctx.replace_response(response);
            Ok(())
        })
    }

    fn provenance(&self) -> &Provenance {
        &self.provenance
    }
}
