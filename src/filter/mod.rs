//! Filters: code that runs around a handler.
//!
//! A filter receives the context and the rest of the chain. It may work on
//! the request, hand over with [`FilterChain::next`], then work on the
//! response once `next` returns, or not call `next` at all to answer the
//! request itself:
//!
//! ```text
//! logger ─▶ recovery ─▶ auth ─▶ handler
//!   ◀────────◀─────────◀──────── (post-processing, reverse order)
//! ```
//!
//! Filters are shared between routes and requests, so they hold no
//! per-request state. Anything a later filter or the handler needs goes
//! into the context's scratch map.

mod logger;
mod recovery;

use std::sync::Arc;

pub use logger::LoggerFilter;
pub use recovery::RecoveryFilter;

use crate::context::Context;
use crate::error::Error;
use crate::handler::{Handler, HandlerFuture};

/// Cross-cutting logic executed around a handler.
pub trait Filter: Send + Sync + 'static {
    fn invoke<'a>(&'a self, ctx: &'a mut Context, chain: &'a mut FilterChain) -> HandlerFuture<'a>;
}

pub type SharedFilter = Arc<dyn Filter>;

/// The remaining filters of one request, followed by its handler.
///
/// Every call to [`next`](FilterChain::next) moves the cursor one step. Once
/// the handler has run the chain is exhausted and further calls do nothing.
pub struct FilterChain {
    filters: Arc<[SharedFilter]>,
    handler: Arc<dyn Handler>,
    cursor: usize,
    handled: bool,
}

impl FilterChain {
    pub(crate) fn new(filters: Arc<[SharedFilter]>, handler: Arc<dyn Handler>) -> Self {
        Self { filters, handler, cursor: 0, handled: false }
    }

    /// Runs the next filter, or the handler once every filter has run.
    pub fn next<'a>(&'a mut self, ctx: &'a mut Context) -> HandlerFuture<'a> {
        if let Some(filter) = self.filters.get(self.cursor).cloned() {
            self.cursor += 1;
            return Box::pin(async move { filter.invoke(ctx, self).await });
        }
        if self.handled {
            tracing::trace!("filter chain already exhausted");
            return Box::pin(async { Ok(()) });
        }
        self.handled = true;
        let handler = Arc::clone(&self.handler);
        Box::pin(async move { handler.invoke(ctx).await })
    }

    /// Filters that have not run yet.
    pub fn remaining(&self) -> usize {
        self.filters.len().saturating_sub(self.cursor)
    }
}

/// Runs `handler` behind `filters`. Without filters the handler is called
/// directly.
pub async fn invoke_handler(
    ctx: &mut Context,
    handler: &Arc<dyn Handler>,
    filters: &Arc<[SharedFilter]>,
) -> Result<(), Error> {
    if filters.is_empty() {
        return handler.invoke(ctx).await;
    }
    FilterChain::new(Arc::clone(filters), Arc::clone(handler)).next(ctx).await
}

/// A filter built from a closure.
pub struct FnFilter<F> {
    f: F,
}

/// Wraps a closure as a [`Filter`].
///
/// ```rust
/// use sprig::filter::filter_fn;
///
/// let auth = filter_fn(|ctx, chain| Box::pin(async move {
///     if ctx.header("authorization").is_none() {
///         ctx.no_content(http::StatusCode::UNAUTHORIZED);
///         return Ok(());
///     }
///     chain.next(ctx).await
/// }));
/// ```
pub fn filter_fn<F>(f: F) -> FnFilter<F>
where
    F: for<'a> Fn(&'a mut Context, &'a mut FilterChain) -> HandlerFuture<'a> + Send + Sync + 'static,
{
    FnFilter { f }
}

impl<F> Filter for FnFilter<F>
where
    F: for<'a> Fn(&'a mut Context, &'a mut FilterChain) -> HandlerFuture<'a> + Send + Sync + 'static,
{
    fn invoke<'a>(&'a self, ctx: &'a mut Context, chain: &'a mut FilterChain) -> HandlerFuture<'a> {
        (self.f)(ctx, chain)
    }
}
