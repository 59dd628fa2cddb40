//! The hyper engine and graceful shutdown.
//!
//! # Graceful shutdown and Kubernetes
//!
//! When Kubernetes terminates a pod it sends **SIGTERM** and waits
//! `terminationGracePeriodSeconds` (default 30 s) before sending SIGKILL.
//!
//! The engine reacts by:
//! 1. Immediately stopping `listener.accept()` so no new connections are made.
//! 2. Asking every open connection to finish its in-flight request and close
//!    (idle keep-alive connections close at once).
//! 3. Returning once every connection task has ended.
//!
//! Set `terminationGracePeriodSeconds` in your pod spec to a value longer
//! than your slowest request.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::config::ContainerConfig;
use crate::context::Context;
use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::handler::BoxFuture;
use crate::response::bare;
use crate::tls;

/// Runs the socket loop for a [`Dispatcher`].
///
/// The dispatch core only needs requests turned into [`Context`]s and the
/// produced responses written back; everything below that (parsing, TLS,
/// keep-alive) belongs to the engine.
pub trait Engine: Send + Sync + 'static {
    /// Accepts connections on `listener` until `shutdown` resolves, then
    /// drains the open ones.
    fn serve(
        &self,
        listener: TcpListener,
        dispatcher: Arc<Dispatcher>,
        shutdown: BoxFuture<'static, ()>,
    ) -> BoxFuture<'static, Result<(), Error>>;
}

/// HTTP/1.1 and HTTP/2 over hyper, with optional TLS.
#[derive(Debug, Default, Clone, Copy)]
pub struct HyperEngine;

impl HyperEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Engine for HyperEngine {
    fn serve(
        &self,
        listener: TcpListener,
        dispatcher: Arc<Dispatcher>,
        shutdown: BoxFuture<'static, ()>,
    ) -> BoxFuture<'static, Result<(), Error>> {
        Box::pin(accept_loop(listener, dispatcher, shutdown))
    }
}

async fn accept_loop(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: BoxFuture<'static, ()>,
) -> Result<(), Error> {
    let acceptor = tls_acceptor(dispatcher.config())?;
    let read_timeout = dispatcher.config().read_timeout();
    let local_addr = listener.local_addr()?;

    info!(addr = %local_addr, tls = acceptor.is_some(), "sprig listening");

    // JoinSet tracks every connection task so shutdown can wait for them.
    let mut tasks = tokio::task::JoinSet::new();
    let (drain, draining) = watch::channel(false);

    loop {
        tokio::select! {
            // Checked first so a shutdown stops accepting even with a
            // backlog of queued connections.
            biased;

            () = &mut shutdown => {
                info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                break;
            }

            res = listener.accept() => {
                let (stream, remote_addr) = match res {
                    Ok(v) => v,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };

                let dispatcher = Arc::clone(&dispatcher);
                let acceptor = acceptor.clone();
                let draining = draining.clone();

                tasks.spawn(async move {
                    let conn = Connection { dispatcher, remote_addr, read_timeout, draining };
                    match acceptor {
                        Some(acceptor) => match acceptor.accept(stream).await {
                            Ok(stream) => conn.serve(stream, true).await,
                            Err(e) => debug!(peer = %remote_addr, "tls handshake failed: {e}"),
                        },
                        None => conn.serve(stream, false).await,
                    }
                });
            }

            // Reap finished tasks so the set does not grow without bound.
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    drain.send_replace(true);
    while tasks.join_next().await.is_some() {}

    info!("sprig stopped");
    Ok(())
}

fn tls_acceptor(config: &ContainerConfig) -> Result<Option<TlsAcceptor>, Error> {
    if !config.enable_ssl {
        return Ok(None);
    }
    match (&config.cert_file, &config.key_file) {
        (Some(cert), Some(key)) => tls::acceptor(cert, key).map(Some),
        _ => Err(Error::Config("enable_ssl requires cert_file and key_file".to_owned())),
    }
}

struct Connection {
    dispatcher: Arc<Dispatcher>,
    remote_addr: SocketAddr,
    read_timeout: Option<Duration>,
    draining: watch::Receiver<bool>,
}

impl Connection {
    async fn serve<I>(mut self, io: I, tls: bool)
    where
        I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let dispatcher = Arc::clone(&self.dispatcher);
        let remote_addr = self.remote_addr;
        // Called once per request on the connection, not once per connection.
        let svc = service_fn(move |req| {
            let dispatcher = Arc::clone(&dispatcher);
            async move { handle(&dispatcher, req, remote_addr, tls).await }
        });

        // `auto::Builder` serves HTTP/1.1 and HTTP/2, whatever the client
        // negotiates.
        let mut builder = ConnBuilder::new(TokioExecutor::new());
        if let Some(timeout) = self.read_timeout {
            builder.http1().timer(TokioTimer::new()).header_read_timeout(timeout);
        }
        let conn = builder.serve_connection(TokioIo::new(io), svc);
        tokio::pin!(conn);

        let result = tokio::select! {
            res = conn.as_mut() => res,
            _ = self.draining.changed() => {
                conn.as_mut().graceful_shutdown();
                conn.await
            }
        };
        if let Err(e) = result {
            debug!(peer = %remote_addr, "connection error: {e}");
        }
    }
}

/// Reads the body, dispatches, and applies the write timeout.
async fn handle(
    dispatcher: &Dispatcher,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
    tls: bool,
) -> Result<http::Response<Full<Bytes>>, Error> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            debug!(peer = %remote_addr, "failed to read request body: {e}");
            return Ok(bare(StatusCode::BAD_REQUEST));
        }
    };
    let ctx = Context::new(http::Request::from_parts(parts, body)).with_connection(Some(remote_addr), tls);

    let result = match dispatcher.config().write_timeout() {
        Some(limit) => match tokio::time::timeout(limit, dispatcher.dispatch(ctx)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(peer = %remote_addr, timeout = ?limit, "request exceeded the write timeout");
                return Ok(bare(StatusCode::SERVICE_UNAVAILABLE));
            }
        },
        None => dispatcher.dispatch(ctx).await,
    };

    if let Err(e) = &result {
        error!(peer = %remote_addr, "unhandled request failure: {e}");
    }
    result
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** (sent by `kubectl` and the
/// Kubernetes control plane) and **SIGINT** (Ctrl-C, for local dev).
/// On Windows only Ctrl-C is available. A signal that cannot be installed
/// is logged and never fires.
pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
