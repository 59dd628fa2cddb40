use std::time::Instant;

use crate::context::Context;
use crate::filter::{Filter, FilterChain};
use crate::handler::HandlerFuture;

/// Logs one line per request: method, route, URI, status and latency.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggerFilter;

impl LoggerFilter {
    pub fn new() -> Self {
        Self
    }
}

impl Filter for LoggerFilter {
    fn invoke<'a>(&'a self, ctx: &'a mut Context, chain: &'a mut FilterChain) -> HandlerFuture<'a> {
        Box::pin(async move {
            let started = Instant::now();
            let result = chain.next(ctx).await;
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

            match &result {
                Ok(()) => tracing::info!(
                    method = %ctx.method(),
                    route = %ctx.path(),
                    uri = %ctx.uri(),
                    status = ctx.response().status().as_u16(),
                    elapsed_ms,
                    "request completed",
                ),
                Err(e) => tracing::warn!(
                    method = %ctx.method(),
                    route = %ctx.path(),
                    uri = %ctx.uri(),
                    elapsed_ms,
                    error = %e,
                    "request failed",
                ),
            }
            result
        })
    }
}
