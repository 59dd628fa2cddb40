//! Request dispatch.

use bytes::Bytes;
use http::header::{ALLOW, HeaderValue};
use http::StatusCode;
use http_body_util::Full;
use tracing::Instrument;

use crate::config::ContainerConfig;
use crate::context::Context;
use crate::docs::ApiDocument;
use crate::error::Error;
use crate::filter::invoke_handler;
use crate::method::Method;
use crate::response::bare;
use crate::table::{Lookup, RouteTable};

/// The immutable result of [`Container::build`](crate::Container::build).
///
/// Shared behind an `Arc` by every connection while serving. Engines call
/// [`dispatch`](Dispatcher::dispatch) once per request.
pub struct Dispatcher {
    config: ContainerConfig,
    table: RouteTable,
    docs: Option<ApiDocument>,
}

impl Dispatcher {
    pub(crate) fn new(config: ContainerConfig, table: RouteTable, docs: Option<ApiDocument>) -> Self {
        Self { config, table, docs }
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// The collected documentation, when documentation is enabled.
    pub fn docs(&self) -> Option<&ApiDocument> {
        self.docs.as_ref()
    }

    pub fn route_count(&self) -> usize {
        self.table.len()
    }

    /// Routes `ctx` and runs the matched route's filter chain.
    ///
    /// Unmatched requests are answered here: `404` when no route matches
    /// the path, `405` when only other methods do. An `Err` means a filter or
    /// handler failed and no recovery filter was configured to catch it.
    pub async fn dispatch(&self, mut ctx: Context) -> Result<http::Response<Full<Bytes>>, Error> {
        let Ok(method) = Method::try_from(ctx.method()) else {
            return Ok(bare(StatusCode::METHOD_NOT_ALLOWED));
        };

        let path = ctx.uri().path().to_owned();
        match self.table.lookup(method, &path) {
            Lookup::Found { route, params } => {
                ctx.set_route(&route.path, route.wildcard.as_deref(), params);
                let span = ctx.span().clone();
                invoke_handler(&mut ctx, &route.handler, &route.filters).instrument(span).await?;
                Ok(ctx.into_response())
            }
            Lookup::MethodNotAllowed(allowed) => {
                let allow = allowed.iter().map(|m| m.as_str()).collect::<Vec<_>>().join(", ");
                let mut response = bare(StatusCode::METHOD_NOT_ALLOWED);
                response.headers_mut().insert(ALLOW, HeaderValue::from_str(&allow)?);
                Ok(response)
            }
            Lookup::NotFound => Ok(bare(StatusCode::NOT_FOUND)),
        }
    }

    /// Shorthand for dispatching a request that has no connection details.
    pub async fn handle(&self, request: http::Request<Bytes>) -> Result<http::Response<Full<Bytes>>, Error> {
        self.dispatch(Context::new(request)).await
    }
}
