//! Typed request binding ("RPC-style" handlers).
//!
//! A binding handler decodes a request type from the incoming request,
//! validates it, calls a function with it, and writes the function's result
//! as JSON. The request and response types are fixed by generics when the
//! handler is built, so nothing is inspected at request time.
//!
//! | Constructor | Function shape |
//! |---|---|
//! | [`bind`] | `Fn(Req) -> impl Future<Output = Result<Resp, Error>>` |
//! | [`bind_ctx`] | `Fn(&mut Context, Req) -> BoxFuture<Result<Resp, Error>>` |
//! | [`respond`] | `Fn(&mut Context) -> BoxFuture<Result<Resp, Error>>` |
//!
//! `Req` may be `T` or `Box<T>`. Decoding and validation failures are
//! answered with `400` and a JSON body; the function is not called.

use std::any::type_name;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;

use http::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::context::Context;
use crate::error::Error;
use crate::handler::{BoxFuture, Handler, HandlerFuture, Provenance, Signature};
use crate::response::ContentType;
use crate::validate::{Validate, ValidationError};

// ── Errors ────────────────────────────────────────────────────────────────────

/// Where a request value was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindSource {
    Json,
    Query,
    Form,
}

impl fmt::Display for BindSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "json body",
            Self::Query => "query string",
            Self::Form => "form body",
        })
    }
}

/// A request the binding layer refused.
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("cannot decode {origin}: {message}")]
    Decode { origin: BindSource, message: String },

    #[error("validation failed: {0}")]
    Invalid(#[from] ValidationError),
}

impl BindError {
    fn decode(origin: BindSource, err: impl fmt::Display) -> Self {
        Self::Decode { origin, message: err.to_string() }
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }

    /// The machine-readable error body sent to the client.
    pub fn body(&self) -> serde_json::Value {
        match self {
            Self::Decode { message, .. } => serde_json::json!({
                "error": "decode",
                "message": message,
            }),
            Self::Invalid(err) => serde_json::json!({
                "error": "validation",
                "field": err.field,
                "message": err.message,
            }),
        }
    }

    pub fn write_to(&self, ctx: &mut Context) -> Result<(), Error> {
        ctx.json(self.status(), &self.body())
    }
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Decodes `T` from the request.
///
/// A non-empty `application/json` body is decoded on its own. Anything else
/// layers query pairs, an url-encoded body and path parameters, in that
/// order: a key given by a later layer drops every value an earlier layer
/// gave it. A key repeated within one layer binds to a sequence field.
pub(crate) fn decode<T: DeserializeOwned>(ctx: &Context) -> Result<T, BindError> {
    if ctx.has_content_type("application/json") && !ctx.body().is_empty() {
        return serde_json::from_slice(ctx.body()).map_err(|e| BindError::decode(BindSource::Json, e));
    }

    let query: Vec<(String, String)> =
        serde_urlencoded::from_str(ctx.query_string()).map_err(|e| BindError::decode(BindSource::Query, e))?;
    let mut layers = vec![query];

    let origin = if ctx.has_content_type(ContentType::FormData.as_str()) {
        let form: Vec<(String, String)> =
            serde_urlencoded::from_bytes(ctx.body()).map_err(|e| BindError::decode(BindSource::Form, e))?;
        layers.push(form);
        BindSource::Form
    } else {
        BindSource::Query
    };
    layers.push(ctx.raw_path_params().to_vec());

    let encoded = encode(&layer(layers)).map_err(|e| BindError::decode(origin, e))?;
    serde_qs::from_str(&encoded).map_err(|e| BindError::decode(origin, e))
}

/// Groups pairs by key in first-seen order.
fn layer(layers: Vec<Vec<(String, String)>>) -> Vec<(String, Vec<String>)> {
    let mut fields: Vec<(String, Vec<String>)> = Vec::new();
    for pairs in layers {
        let mut claimed: Vec<String> = Vec::new();
        for (key, value) in pairs {
            let fresh = !claimed.contains(&key);
            match fields.iter_mut().find(|(k, _)| *k == key) {
                Some((_, values)) => {
                    if fresh {
                        values.clear();
                    }
                    values.push(value);
                }
                None => fields.push((key.clone(), vec![value])),
            }
            if fresh {
                claimed.push(key);
            }
        }
    }
    fields
}

/// Re-encodes grouped fields for `serde_qs`: one value stays `key=v`,
/// several become `key[0]=a&key[1]=b`.
fn encode(fields: &[(String, Vec<String>)]) -> Result<String, serde_urlencoded::ser::Error> {
    let mut parts = Vec::with_capacity(fields.len());
    for (key, values) in fields {
        if let [value] = values.as_slice() {
            parts.push(serde_urlencoded::to_string([(key, value)].as_slice())?);
            continue;
        }
        for (i, value) in values.iter().enumerate() {
            let pair = serde_urlencoded::to_string([(key, value)].as_slice())?;
            if let Some((key, value)) = pair.split_once('=') {
                parts.push(format!("{key}[{i}]={value}"));
            }
        }
    }
    Ok(parts.join("&"))
}

// ── Shapes ────────────────────────────────────────────────────────────────────

enum Outcome<T> {
    Reply(T),
    Rejected(BindError),
}

/// One of the supported function shapes.
trait Shape: Send + Sync + 'static {
    type Response: Serialize + Send;

    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<Outcome<Self::Response>, Error>>;

    fn signature(&self) -> Signature;
}

struct Plain<F, Req, Resp> {
    f: F,
    _types: PhantomData<fn(Req) -> Resp>,
}

impl<F, Fut, Req, Resp> Shape for Plain<F, Req, Resp>
where
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, Error>> + Send + 'static,
    Req: DeserializeOwned + Validate + Send + 'static,
    Resp: Serialize + Send + 'static,
{
    type Response = Resp;

    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<Outcome<Resp>, Error>> {
        Box::pin(async move {
            let request = match ctx.bind_valid::<Req>() {
                Ok(request) => request,
                Err(rejection) => return Ok(Outcome::Rejected(rejection)),
            };
            (self.f)(request).await.map(Outcome::Reply)
        })
    }

    fn signature(&self) -> Signature {
        Signature { request: Some(type_name::<Req>()), response: type_name::<Resp>() }
    }
}

struct Contextual<F, Req, Resp> {
    f: F,
    _types: PhantomData<fn(Req) -> Resp>,
}

impl<F, Req, Resp> Shape for Contextual<F, Req, Resp>
where
    F: for<'a> Fn(&'a mut Context, Req) -> BoxFuture<'a, Result<Resp, Error>> + Send + Sync + 'static,
    Req: DeserializeOwned + Validate + Send + 'static,
    Resp: Serialize + Send + 'static,
{
    type Response = Resp;

    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<Outcome<Resp>, Error>> {
        Box::pin(async move {
            let request = match ctx.bind_valid::<Req>() {
                Ok(request) => request,
                Err(rejection) => return Ok(Outcome::Rejected(rejection)),
            };
            (self.f)(ctx, request).await.map(Outcome::Reply)
        })
    }

    fn signature(&self) -> Signature {
        Signature { request: Some(type_name::<Req>()), response: type_name::<Resp>() }
    }
}

struct ContextOnly<F, Resp> {
    f: F,
    _types: PhantomData<fn() -> Resp>,
}

impl<F, Resp> Shape for ContextOnly<F, Resp>
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<Resp, Error>> + Send + Sync + 'static,
    Resp: Serialize + Send + 'static,
{
    type Response = Resp;

    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<Outcome<Resp>, Error>> {
        Box::pin(async move { (self.f)(ctx).await.map(Outcome::Reply) })
    }

    fn signature(&self) -> Signature {
        Signature { request: None, response: type_name::<Resp>() }
    }
}

// ── Handler ───────────────────────────────────────────────────────────────────

struct BindHandler<S> {
    shape: S,
    provenance: Provenance,
}

impl<S: Shape> Handler for BindHandler<S> {
    fn invoke<'a>(&'a self, ctx: &'a mut Context) -> HandlerFuture<'a> {
        Box::pin(async move {
            match self.shape.call(ctx).await? {
                Outcome::Reply(response) => ctx.json(StatusCode::OK, &response),
                Outcome::Rejected(rejection) => {
                    tracing::debug!(error = %rejection, "request rejected");
                    rejection.write_to(ctx)
                }
            }
        })
    }

    fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    fn signature(&self) -> Option<Signature> {
        Some(self.shape.signature())
    }
}

/// Binds `f(request) -> response`.
///
/// ```rust
/// use serde::{Deserialize, Serialize};
/// use sprig::{Error, bind, validate::Validate};
///
/// #[derive(Deserialize)]
/// struct EchoRequest { str: String }
/// impl Validate for EchoRequest {}
///
/// #[derive(Serialize)]
/// struct EchoResponse { echo: String }
///
/// async fn echo(req: EchoRequest) -> Result<EchoResponse, Error> {
///     Ok(EchoResponse { echo: format!("echo {}", req.str) })
/// }
///
/// let handler = bind(echo);
/// ```
#[track_caller]
pub fn bind<F, Fut, Req, Resp>(f: F) -> impl Handler
where
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, Error>> + Send + 'static,
    Req: DeserializeOwned + Validate + Send + 'static,
    Resp: Serialize + Send + 'static,
{
    BindHandler {
        shape: Plain { f, _types: PhantomData },
        provenance: Provenance::caller(type_name::<F>()),
    }
}

/// Binds `f(ctx, request) -> response`, for functions that also need the
/// context (headers, scratch values written by filters).
#[track_caller]
pub fn bind_ctx<F, Req, Resp>(f: F) -> impl Handler
where
    F: for<'a> Fn(&'a mut Context, Req) -> BoxFuture<'a, Result<Resp, Error>> + Send + Sync + 'static,
    Req: DeserializeOwned + Validate + Send + 'static,
    Resp: Serialize + Send + 'static,
{
    BindHandler {
        shape: Contextual { f, _types: PhantomData },
        provenance: Provenance::caller(type_name::<F>()),
    }
}

/// Binds `f(ctx) -> response`: no request type, JSON response.
#[track_caller]
pub fn respond<F, Resp>(f: F) -> impl Handler
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<Resp, Error>> + Send + Sync + 'static,
    Resp: Serialize + Send + 'static,
{
    BindHandler {
        shape: ContextOnly { f, _types: PhantomData },
        provenance: Provenance::caller(type_name::<F>()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;
    use serde::Deserialize;

    use super::*;
    use crate::validate;

    #[derive(Debug, Deserialize)]
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

    #[derive(Debug, Serialize)]
    struct EchoResponse {
        echo: String,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Pair {
        id: u32,
        name: String,
    }

    fn context(request: http::Request<Bytes>) -> Context {
        let mut ctx = Context::new(request);
        ctx.set_route("/echo", None, Vec::new());
        ctx
    }

    fn get(uri: &str) -> Context {
        context(http::Request::builder().uri(uri).body(Bytes::new()).unwrap())
    }

    fn body_json(ctx: &Context) -> serde_json::Value {
        serde_json::from_slice(ctx.response().body()).unwrap()
    }

    #[tokio::test]
    async fn valid_request_reaches_function() {
        let handler = bind(|req: EchoRequest| async move { Ok(EchoResponse { echo: format!("echo {}", req.str) }) });
        let mut ctx = get("/echo?str=abcd");
        handler.invoke(&mut ctx).await.unwrap();

        assert_eq!(ctx.response().status(), StatusCode::OK);
        assert_eq!(body_json(&ctx), serde_json::json!({"echo": "echo abcd"}));
    }

    #[tokio::test]
    async fn invalid_request_never_calls_function() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let handler = bind(move |req: Box<EchoRequest>| {
            seen.fetch_add(1, Ordering::SeqCst);
            async move { Ok(EchoResponse { echo: req.str }) }
        });
        let mut ctx = get("/echo?str=ab");
        handler.invoke(&mut ctx).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(ctx.response().status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(&ctx)["error"], "validation");
        assert_eq!(body_json(&ctx)["field"], "str");
    }

    #[tokio::test]
    async fn context_shape_sees_filter_values() {
        let handler = bind_ctx(|ctx: &mut Context, req: EchoRequest| {
            Box::pin(async move {
                let user = ctx.get::<String>("user").cloned().unwrap_or_default();
                Ok(EchoResponse { echo: format!("{user}:{}", req.str) })
            })
        });
        let mut ctx = get("/echo?str=abcd");
        ctx.set("user", "ann".to_owned());
        handler.invoke(&mut ctx).await.unwrap();

        assert_eq!(body_json(&ctx), serde_json::json!({"echo": "ann:abcd"}));
        assert_eq!(handler.signature().unwrap().request, Some(type_name::<EchoRequest>()));
    }

    #[tokio::test]
    async fn context_only_shape_serializes_result() {
        let handler = respond(|_ctx: &mut Context| Box::pin(async { Ok("123") }));
        let mut ctx = get("/ok");
        handler.invoke(&mut ctx).await.unwrap();

        assert_eq!(ctx.response().body(), br#""123""#);
        assert_eq!(handler.signature().unwrap().request, None);
    }

    #[tokio::test]
    async fn function_errors_propagate() {
        let handler = respond(|_ctx: &mut Context| Box::pin(async { Err::<(), _>(Error::msg("err")) }));
        let mut ctx = get("/err");
        assert!(handler.invoke(&mut ctx).await.is_err());
    }

    #[test]
    fn later_layers_override_earlier_ones() {
        let mut ctx = Context::new(
            http::Request::builder()
                .method("POST")
                .uri("/items/7?name=query&id=9")
                .header("content-type", "application/x-www-form-urlencoded")
                .body(Bytes::from_static(b"name=form"))
                .unwrap(),
        );
        ctx.set_route("/items/:id", None, vec![("id".into(), "7".into())]);

        assert_eq!(decode::<Pair>(&ctx).unwrap(), Pair { id: 7, name: "form".into() });
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Tagged {
        name: String,
        tag: Vec<String>,
        #[serde(default)]
        page: Vec<u32>,
    }

    #[test]
    fn repeated_keys_bind_to_sequences() {
        let ctx = get("/tags?tag=a&name=b&tag=b&page=1&page=2");
        assert_eq!(
            decode::<Tagged>(&ctx).unwrap(),
            Tagged { name: "b".into(), tag: vec!["a".into(), "b".into()], page: vec![1, 2] }
        );
    }

    #[test]
    fn form_values_replace_query_sequences() {
        let ctx = context(
            http::Request::builder()
                .method("POST")
                .uri("/tags?tag=a&tag=b&name=q")
                .header("content-type", "application/x-www-form-urlencoded")
                .body(Bytes::from_static(b"tag=x&tag=y%26z"))
                .unwrap(),
        );
        let tagged = decode::<Tagged>(&ctx).unwrap();
        assert_eq!(tagged.tag, ["x", "y&z"]);
        assert_eq!(tagged.name, "q");
    }

    #[test]
    fn media_type_is_matched_case_insensitively() {
        let ctx = context(
            http::Request::builder()
                .method("POST")
                .uri("/echo")
                .header("content-type", "Application/JSON")
                .body(Bytes::from_static(br#"{"id": 3, "name": "upper"}"#))
                .unwrap(),
        );
        assert_eq!(decode::<Pair>(&ctx).unwrap(), Pair { id: 3, name: "upper".into() });
    }

    #[test]
    fn json_body_is_decoded_alone() {
        let ctx = context(
            http::Request::builder()
                .method("POST")
                .uri("/echo?id=1")
                .header("content-type", "application/json; charset=utf-8")
                .body(Bytes::from_static(br#"{"id": 2, "name": "json"}"#))
                .unwrap(),
        );
        assert_eq!(decode::<Pair>(&ctx).unwrap(), Pair { id: 2, name: "json".into() });
    }

    #[test]
    fn malformed_values_are_decode_errors() {
        let ctx = get("/echo?id=abc&name=x");
        let err = decode::<Pair>(&ctx).unwrap_err();
        assert!(matches!(err, BindError::Decode { origin: BindSource::Query, .. }));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
