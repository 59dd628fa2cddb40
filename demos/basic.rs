//! Minimal sprig example: grouped JSON endpoints, a bound service, typed
//! binding and an auth filter.
//!
//! Run with:
//!   cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/api/users/42
//!   curl 'http://localhost:3000/api/echo?str=abcd'
//!   curl 'http://localhost:3000/api/echo?str=ab'          # 400
//!   curl -H 'authorization: token' http://localhost:3000/admin/stats
//!   curl http://localhost:3000/files/css/site.css
//!   curl http://localhost:3000/docs/operations.json

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use http::StatusCode;
use serde::{Deserialize, Serialize};
use sprig::docs::{Constraint, Operation, Param};
use sprig::filter::{SharedFilter, filter_fn};
use sprig::validate::{self, Validate, ValidationError};
use sprig::{Container, ContainerConfig, Context, Error, HandlerFuture, bind, func, method};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    let config = match std::env::args().nth(1) {
        Some(path) => ContainerConfig::load(path)?,
        None => ContainerConfig::new("0.0.0.0", 3000),
    };
    let mut app = Container::new(config);
    let stats = Arc::new(Stats::default());

    app.route("/api", &[])
        .get("/users/:id", func(get_user), &[])
        .with_operation(
            Operation::new("getUser").summary("Fetch a user").param(Param::path("id", "user id")),
        )
        .get("/echo", bind(echo), &[])
        .with_operation(
            Operation::new("echo").param(
                Param::query("str", "four characters")
                    .required()
                    .constraint(Constraint::Len { value: 4 }),
            ),
        );

    let admin: Vec<SharedFilter> = vec![Arc::new(filter_fn(require_auth))];
    let mut group = app.route("/admin", &admin);
    group.get("/stats", method(Arc::clone(&stats), "show", Stats::show), &[]);
    group.post("/stats/reset", method(stats, "reset", Stats::reset), &[]);

    app.get("/files/*", func(serve_file), &[]);

    app.serve().await
}

// GET /api/users/:id
fn get_user(ctx: &mut Context) -> HandlerFuture<'_> {
    Box::pin(async move {
        let id = ctx.path_param("id").unwrap_or("unknown").to_owned();
        ctx.json(StatusCode::OK, &serde_json::json!({ "id": id, "name": "alice" }))
    })
}

// GET /api/echo?str=abcd
#[derive(Deserialize)]
struct EchoRequest {
    #[serde(default)]
    str: String,
}

impl Validate for EchoRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        validate::required("str", &self.str)?;
        validate::len("str", &self.str, 4)
    }
}

#[derive(Serialize)]
struct EchoResponse {
    echo: String,
}

async fn echo(req: EchoRequest) -> Result<EchoResponse, Error> {
    Ok(EchoResponse { echo: format!("echo {}", req.str) })
}

// /admin/* requires an authorization header.
fn require_auth<'a>(ctx: &'a mut Context, chain: &'a mut sprig::filter::FilterChain) -> HandlerFuture<'a> {
    Box::pin(async move {
        if ctx.header("authorization").is_none() {
            ctx.no_content(StatusCode::UNAUTHORIZED);
            return Ok(());
        }
        chain.next(ctx).await
    })
}

#[derive(Default)]
struct Stats {
    resets: AtomicU64,
}

impl Stats {
    fn show<'a>(&'a self, ctx: &'a mut Context) -> HandlerFuture<'a> {
        Box::pin(async move {
            let resets = self.resets.load(Ordering::Relaxed);
            ctx.json(StatusCode::OK, &serde_json::json!({ "resets": resets }))
        })
    }

    fn reset<'a>(&'a self, ctx: &'a mut Context) -> HandlerFuture<'a> {
        Box::pin(async move {
            self.resets.fetch_add(1, Ordering::Relaxed);
            ctx.no_content(StatusCode::NO_CONTENT);
            Ok(())
        })
    }
}

// GET /files/* serves ./public/<rest>
fn serve_file(ctx: &mut Context) -> HandlerFuture<'_> {
    Box::pin(async move {
        let rest = ctx.path_param("*").unwrap_or_default();
        if rest.split('/').any(|segment| segment == "..") {
            ctx.no_content(StatusCode::BAD_REQUEST);
            return Ok(());
        }
        let path = std::path::Path::new("public").join(rest);
        ctx.file(path).await
    })
}
