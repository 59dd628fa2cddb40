//! # sprig
//!
//! A web container built around one request-dispatch core: an ordered filter
//! chain around a terminal handler, a route table with named and wildcard
//! parameters, and handler adapters that make plain functions, methods on a
//! shared service, and typed request/response functions look the same to the
//! dispatcher.
//!
//! ## The pieces
//!
//! - [`Container`] collects routes, global filters and configuration.
//!   [`Container::build`] freezes them into a [`Dispatcher`].
//! - [`Context`] is the per-request façade: readers for path, query, form,
//!   cookies and body, writers for the response.
//! - [`Filter`](filter::Filter)s wrap handlers and decide whether the rest of
//!   the chain runs. Every container starts with a logger and a recovery
//!   filter.
//! - [`func`], [`method`], [`native`] and [`bind`] turn user code into
//!   [`Handler`]s.
//! - The hyper engine serves HTTP/1.1 and HTTP/2, optionally over TLS, and
//!   drains connections on SIGTERM / Ctrl-C.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use http::StatusCode;
//! use serde::{Deserialize, Serialize};
//! use sprig::validate::{self, Validate, ValidationError};
//! use sprig::{Container, ContainerConfig, Context, Error, HandlerFuture, bind, func};
//!
//! #[derive(Deserialize)]
//! struct EchoRequest {
//!     #[serde(default)]
//!     str: String,
//! }
//!
//! impl Validate for EchoRequest {
//!     fn validate(&self) -> Result<(), ValidationError> {
//!         validate::required("str", &self.str)?;
//!         validate::len("str", &self.str, 4)
//!     }
//! }
//!
//! #[derive(Serialize)]
//! struct EchoResponse {
//!     echo: String,
//! }
//!
//! async fn echo(req: EchoRequest) -> Result<EchoResponse, Error> {
//!     Ok(EchoResponse { echo: req.str })
//! }
//!
//! fn get_user(ctx: &mut Context) -> HandlerFuture<'_> {
//!     Box::pin(async move {
//!         let id = ctx.path_param("id").unwrap_or("unknown").to_owned();
//!         ctx.json(StatusCode::OK, &serde_json::json!({ "id": id }))
//!     })
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let mut app = Container::new(ContainerConfig::new("0.0.0.0", 3000));
//!     app.route("/api", &[])
//!         .get("/users/:id", func(get_user), &[])
//!         .get("/echo", bind(echo), &[]);
//!     app.serve().await
//! }
//! ```

mod bind;
mod config;
mod container;
mod context;
mod cookie;
mod dispatcher;
mod error;
mod handler;
mod mapping;
mod method;
mod response;
mod router;
mod server;
mod table;
mod tls;

pub mod docs;
pub mod filter;
pub mod validate;

pub use bind::{BindError, BindSource, bind, bind_ctx, respond};
pub use config::ContainerConfig;
pub use container::{Container, ServerHandle};
pub use context::Context;
pub use cookie::{Cookie, SameSite, SetCookie};
pub use dispatcher::Dispatcher;
pub use error::Error;
pub use handler::{
    BoxFuture, FnHandler, Handler, HandlerFuture, MethodHandler, NativeHandler, Provenance, Signature, func,
    method, native,
};
pub use mapping::{Mapper, WebMapping, normalize_param};
pub use method::{Method, UnsupportedMethod};
pub use response::{ContentType, ResponseState};
pub use router::Router;
pub use server::{Engine, HyperEngine};
