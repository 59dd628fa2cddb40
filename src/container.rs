//! The container: registration, composition and lifecycle.
//!
//! ```rust,no_run
//! use http::StatusCode;
//! use sprig::{Container, ContainerConfig, func};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), sprig::Error> {
//!     let mut app = Container::new(ContainerConfig::new("127.0.0.1", 3000));
//!     app.get("/ping", func(|ctx| Box::pin(async move {
//!         ctx.string(StatusCode::OK, "pong");
//!         Ok(())
//!     })), &[]);
//!     app.serve().await
//! }
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::ContainerConfig;
use crate::dispatcher::Dispatcher;
use crate::docs::{self, DOCS_PATH};
use crate::error::Error;
use crate::filter::{Filter, LoggerFilter, RecoveryFilter, SharedFilter};
use crate::handler::Handler;
use crate::mapping::{Mapper, WebMapping};
use crate::method::Method;
use crate::router::Router;
use crate::server::{Engine, HyperEngine, shutdown_signal};
use crate::table::RouteTable;

macro_rules! container_method {
    ($($name:ident),* $(,)?) => {
        $(
            #[doc = concat!("See [`WebMapping::", stringify!($name), "`].")]
            pub fn $name(&mut self, path: &str, handler: impl Handler, filters: &[SharedFilter]) -> &mut Mapper {
                self.mapping.$name(path, handler, filters)
            }
        )*
    };
}

/// Owns the routes, the global filters and the configuration until
/// [`build`](Container::build) turns them into a [`Dispatcher`].
///
/// Every container starts with its own logger and recovery filter. They run
/// ahead of the global filters, which run ahead of each route's filters.
pub struct Container {
    config: ContainerConfig,
    mapping: WebMapping,
    filters: Vec<SharedFilter>,
    logger_filter: Option<SharedFilter>,
    recovery_filter: Option<SharedFilter>,
    enable_docs: bool,
}

impl Container {
    pub fn new(config: ContainerConfig) -> Self {
        Self {
            config,
            mapping: WebMapping::new(),
            filters: Vec::new(),
            logger_filter: Some(Arc::new(LoggerFilter::new())),
            recovery_filter: Some(Arc::new(RecoveryFilter::new())),
            enable_docs: true,
        }
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// Global filters, in the order they run.
    pub fn filters(&self) -> &[SharedFilter] {
        &self.filters
    }

    pub fn add_filter(&mut self, filter: impl Filter) -> &mut Self {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn add_shared_filter(&mut self, filter: SharedFilter) -> &mut Self {
        self.filters.push(filter);
        self
    }

    /// Drops every global filter. Logger and recovery filters are kept.
    pub fn reset_filters(&mut self) -> &mut Self {
        self.filters.clear();
        self
    }

    /// Replaces the logger filter; `None` disables request logging.
    pub fn set_logger_filter(&mut self, filter: Option<SharedFilter>) -> &mut Self {
        self.logger_filter = filter;
        self
    }

    /// Replaces the recovery filter; `None` lets failures reach the engine.
    pub fn set_recovery_filter(&mut self, filter: Option<SharedFilter>) -> &mut Self {
        self.recovery_filter = filter;
        self
    }

    pub fn set_docs_enabled(&mut self, enabled: bool) -> &mut Self {
        self.enable_docs = enabled;
        self
    }

    // ── Registration ─────────────────────────────────────────────────────────

    pub fn add_mapper(&mut self, mapper: Mapper) -> &mut Mapper {
        self.mapping.add_mapper(mapper)
    }

    /// Merges routes built elsewhere, in their registration order.
    pub fn add_mapping(&mut self, mapping: WebMapping) -> &mut Self {
        self.mapping.merge(mapping);
        self
    }

    pub fn request(&mut self, method: Method, path: &str, handler: impl Handler, filters: &[SharedFilter]) -> &mut Mapper {
        self.mapping.request(method, path, handler, filters)
    }

    container_method!(get, post, put, patch, delete, head, options);

    pub fn route(&mut self, prefix: &str, filters: &[SharedFilter]) -> Router<'_> {
        self.mapping.route(prefix, filters)
    }

    pub fn mapping(&self) -> &WebMapping {
        &self.mapping
    }

    pub fn mappers(&self) -> &[Mapper] {
        self.mapping.mappers()
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Validates the configuration and documentation, composes the filters
    /// and compiles the route table. Logs one line per route.
    pub fn build(self) -> Result<Dispatcher, Error> {
        let Self { config, mut mapping, filters, logger_filter, recovery_filter, enable_docs } = self;
        config.validate()?;

        let document = if enable_docs {
            let document = docs::document(mapping.mappers())?;
            if !document.operations.is_empty() && !mapping.contains(Method::Get, DOCS_PATH) {
                mapping.get(DOCS_PATH, docs::handler(&document)?, &[]);
            }
            Some(document)
        } else {
            None
        };

        let shared: Vec<SharedFilter> = logger_filter.into_iter().chain(recovery_filter).chain(filters).collect();

        for mapper in mapping.mappers() {
            let provenance = mapper.handler().provenance();
            tracing::info!(
                "{} :{} {} -> {}:{} {}",
                mapper.method(),
                config.port,
                mapper.path(),
                provenance.file(),
                provenance.line(),
                provenance.name(),
            );
        }

        let table = RouteTable::build(mapping.mappers(), &shared)?;
        Ok(Dispatcher::new(config, table, document))
    }

    /// Serves until SIGTERM or Ctrl-C, then drains in-flight connections.
    pub async fn serve(self) -> Result<(), Error> {
        self.serve_with_shutdown(shutdown_signal()).await
    }

    pub async fn serve_with_shutdown<S>(self, signal: S) -> Result<(), Error>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        self.run(&HyperEngine::new(), signal).await
    }

    /// Serves on a caller-provided engine.
    pub async fn run<E, S>(self, engine: &E, signal: S) -> Result<(), Error>
    where
        E: Engine,
        S: Future<Output = ()> + Send + 'static,
    {
        let dispatcher = Arc::new(self.build()?);
        let listener = TcpListener::bind(dispatcher.config().socket_addr()?).await?;
        engine.serve(listener, dispatcher, Box::pin(signal)).await
    }

    /// Binds, starts serving in the background and returns a handle. Port `0`
    /// picks a free port, see [`ServerHandle::local_addr`].
    pub async fn start(self) -> Result<ServerHandle, Error> {
        let dispatcher = Arc::new(self.build()?);
        let listener = TcpListener::bind(dispatcher.config().socket_addr()?).await?;
        let local_addr = listener.local_addr()?;

        let (stop, stopped) = oneshot::channel::<()>();
        let shutdown = Box::pin(async move {
            let _ = stopped.await;
        });
        let task = tokio::spawn(HyperEngine::new().serve(listener, dispatcher, shutdown));

        Ok(ServerHandle { local_addr, stop: Some(stop), task })
    }
}

/// A running server started with [`Container::start`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<(), Error>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting, waits for in-flight requests and returns the
    /// server's result.
    pub async fn stop(mut self) -> Result<(), Error> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.task.await.map_err(std::io::Error::other)?
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::StatusCode;
    use http_body_util::BodyExt;

    use super::*;
    use crate::docs::{Operation, Param};
    use crate::handler::func;

    fn ok() -> impl Handler {
        func(|ctx| {
            Box::pin(async move {
                ctx.string(StatusCode::OK, "ok");
                Ok(())
            })
        })
    }

    fn get(uri: &str) -> http::Request<Bytes> {
        http::Request::builder().uri(uri).body(Bytes::new()).unwrap()
    }

    #[tokio::test]
    async fn documented_routes_are_served_as_json() {
        let mut app = Container::new(ContainerConfig::default());
        app.get("/users/:id", ok(), &[])
            .with_operation(Operation::new("getUser").param(Param::path("id", "user id")));
        let dispatcher = app.build().unwrap();

        let response = dispatcher.handle(get(DOCS_PATH)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["operations"][0]["operation_id"], "getUser");
        assert_eq!(dispatcher.docs().unwrap().operations.len(), 1);
    }

    #[test]
    fn invalid_documentation_fails_the_build() {
        let mut app = Container::new(ContainerConfig::default());
        app.get("/users/:id", ok(), &[])
            .with_operation(Operation::new("getUser").param(Param::path("user", "user id")));
        assert!(matches!(app.build(), Err(Error::Docs { .. })));
    }

    #[test]
    fn disabled_docs_skip_collection() {
        let mut app = Container::new(ContainerConfig::default());
        app.set_docs_enabled(false);
        app.get("/users/:id", ok(), &[])
            .with_operation(Operation::new("getUser").param(Param::path("user", "user id")));
        let dispatcher = app.build().unwrap();
        assert!(dispatcher.docs().is_none());
        assert_eq!(dispatcher.route_count(), 1);
    }

    #[tokio::test]
    async fn unsupported_and_unregistered_methods() {
        let mut app = Container::new(ContainerConfig::default());
        app.get("/items", ok(), &[]);
        let dispatcher = app.build().unwrap();

        let response = dispatcher
            .handle(http::Request::builder().method("PUT").uri("/items").body(Bytes::new()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()["allow"], "GET");

        let response = dispatcher
            .handle(http::Request::builder().method("PROPFIND").uri("/items").body(Bytes::new()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        let response = dispatcher.handle(get("/nothing")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn errors_propagate_without_recovery() {
        let mut app = Container::new(ContainerConfig::default());
        app.set_recovery_filter(None);
        app.get("/err", func(|_ctx| Box::pin(async { Err(Error::msg("err")) })), &[]);
        let dispatcher = app.build().unwrap();

        let err = dispatcher.handle(get("/err")).await.unwrap_err();
        assert_eq!(err.to_string(), "err");
    }
}
