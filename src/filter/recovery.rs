use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use http::StatusCode;

use crate::context::Context;
use crate::filter::{Filter, FilterChain};
use crate::handler::HandlerFuture;

/// Turns abrupt failures further down the chain into a bare `500`.
///
/// Both an `Err` and a panic are caught. Whatever was written to the
/// response is discarded, the failure is logged once at error level, and the
/// request completes normally so the connection stays usable.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryFilter;

impl RecoveryFilter {
    pub fn new() -> Self {
        Self
    }
}

impl Filter for RecoveryFilter {
    fn invoke<'a>(&'a self, ctx: &'a mut Context, chain: &'a mut FilterChain) -> HandlerFuture<'a> {
        Box::pin(async move {
            let failure = match AssertUnwindSafe(chain.next(&mut *ctx)).catch_unwind().await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => e.to_string(),
                Err(panic) => format!("panic: {}", panic_message(panic.as_ref())),
            };

            tracing::error!(
                method = %ctx.method(),
                path = %ctx.uri().path(),
                error = %failure,
                "request failed, answering 500",
            );
            ctx.reset_response(StatusCode::INTERNAL_SERVER_ERROR);
            Ok(())
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;

    use super::*;
    use crate::error::Error;
    use crate::filter::{SharedFilter, invoke_handler};
    use crate::handler::{Handler, func};

    async fn run(handler: Arc<dyn Handler>) -> Context {
        let filters: Arc<[SharedFilter]> = vec![Arc::new(RecoveryFilter) as SharedFilter].into();
        let mut ctx = Context::new(http::Request::builder().uri("/err").body(Bytes::new()).unwrap());
        invoke_handler(&mut ctx, &handler, &filters).await.unwrap();
        ctx
    }

    #[tokio::test]
    async fn error_becomes_bare_500() {
        let ctx = run(Arc::new(func(|ctx| {
            Box::pin(async move {
                ctx.string(StatusCode::OK, "half written");
                Err(Error::msg("err"))
            })
        })))
        .await;

        assert_eq!(ctx.response().status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(ctx.response().body().is_empty());
        assert!(ctx.response().headers().is_empty());
    }

    #[tokio::test]
    async fn panic_becomes_bare_500() {
        let ctx = run(Arc::new(func(|_ctx| {
            Box::pin(async {
                if true {
                    panic!("boom");
                }
                Ok(())
            })
        })))
        .await;
        assert_eq!(ctx.response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn panic_payloads_are_readable() {
        let static_str: Box<dyn Any + Send> = Box::new("boom");
        let owned: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(static_str.as_ref()), "boom");
        assert_eq!(panic_message(owned.as_ref()), "bang");
    }
}
