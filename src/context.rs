//! The per-request [`Context`].
//!
//! A context is created by the dispatcher for every request, handed by
//! `&mut` through the filter chain to the handler, and consumed to produce
//! the response. Nothing in it is shared with other requests.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;

use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{StatusCode, Uri};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::Span;

use crate::bind::{self, BindError};
use crate::cookie::{Cookie, SetCookie};
use crate::error::Error;
use crate::response::{ContentType, ResponseState};
use crate::validate::Validate;

const XML_HEADER: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

/// Per-request façade over the incoming request and the response being built.
///
/// Readers (`query_param`, `path_param`, `cookie`, `bind`, …) look at the
/// request; writers (`string`, `json`, `blob`, `file`, …) fill the response.
/// Writers replace whatever an earlier writer put in the body, except
/// [`sse_event`](Context::sse_event) which appends.
///
/// The whole filter chain runs inside [`span`](Context::span), so plain
/// `tracing::info!` calls in handlers are already scoped to the request.
pub struct Context {
    method: http::Method,
    uri: Uri,
    version: http::Version,
    headers: HeaderMap,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
    tls: bool,

    route_path: String,
    wildcard: Option<String>,
    params: Vec<(String, String)>,

    values: HashMap<String, Box<dyn Any + Send + Sync>>,
    response: ResponseState,
    span: Span,
}

impl Context {
    /// Wraps a request whose body has already been read.
    ///
    /// Engines call this; it is public so adapters for other engines, and
    /// tests, can build contexts too.
    pub fn new(request: http::Request<Bytes>) -> Self {
        let (parts, body) = request.into_parts();
        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            body,
            remote_addr: None,
            tls: false,
            route_path: String::new(),
            wildcard: None,
            params: Vec::new(),
            values: HashMap::new(),
            response: ResponseState::new(),
            span: Span::none(),
        }
    }

    /// Records the peer address and whether the connection was TLS.
    pub fn with_connection(mut self, remote_addr: Option<SocketAddr>, tls: bool) -> Self {
        self.remote_addr = remote_addr;
        self.tls = tls;
        self
    }

    /// Binds the context to the matched route. A wildcard value in `params`
    /// must not carry the separator that precedes it.
    pub(crate) fn set_route(
        &mut self,
        route_path: &str,
        wildcard: Option<&str>,
        params: Vec<(String, String)>,
    ) {
        self.route_path = route_path.to_owned();
        self.wildcard = wildcard.map(str::to_owned);
        self.params = params;
        self.span = tracing::info_span!(
            "request",
            method = %self.method,
            path = %self.route_path,
            uri = %self.uri,
        );
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    // ── Request: line and headers ────────────────────────────────────────────

    pub fn method(&self) -> &http::Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn version(&self) -> http::Version {
        self.version
    }

    /// The declared path of the matched route (`/users/:id`), not the
    /// request path. Use [`uri`](Context::uri) for the latter.
    pub fn path(&self) -> &str {
        &self.route_path
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of a request header, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The request `Content-Type` without parameters (`; charset=…`).
    pub fn content_type(&self) -> &str {
        self.header(header::CONTENT_TYPE.as_str())
            .and_then(|ct| ct.split(';').next())
            .map(str::trim)
            .unwrap_or("")
    }

    /// Whether the request media type is `media`, ignoring ASCII case.
    pub fn has_content_type(&self, media: &str) -> bool {
        self.content_type().eq_ignore_ascii_case(media)
    }

    /// The raw request body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    pub fn is_websocket(&self) -> bool {
        let upgrade = self
            .header(header::UPGRADE.as_str())
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
        let connection = self
            .header(header::CONNECTION.as_str())
            .is_some_and(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("upgrade")));
        upgrade && connection
    }

    /// `http` or `https`, honouring the usual reverse-proxy headers.
    pub fn scheme(&self) -> &str {
        if self.tls {
            return "https";
        }
        if let Some(scheme) = self.header("x-forwarded-proto").filter(|s| !s.is_empty()) {
            return scheme;
        }
        if let Some(scheme) = self.header("x-forwarded-protocol").filter(|s| !s.is_empty()) {
            return scheme;
        }
        if self.header("x-forwarded-ssl") == Some("on") {
            return "https";
        }
        if let Some(scheme) = self.header("x-url-scheme").filter(|s| !s.is_empty()) {
            return scheme;
        }
        "http"
    }

    /// Best-effort client address: `X-Forwarded-For`, then `X-Real-Ip`, then
    /// the socket peer.
    pub fn client_ip(&self) -> Option<String> {
        let forwarded = self
            .header("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        let real = self.header("x-real-ip").map(str::trim).filter(|v| !v.is_empty());
        forwarded
            .or(real)
            .map(str::to_owned)
            .or_else(|| self.remote_addr.map(|addr| addr.ip().to_string()))
    }

    // ── Request: path parameters ─────────────────────────────────────────────

    /// A named path parameter. `"*"` addresses the route's wildcard.
    ///
    /// For a route `/users/:id`, `ctx.path_param("id")` on `/users/42`
    /// returns `Some("42")`.
    pub fn path_param(&self, name: &str) -> Option<&str> {
        let name = match (name, &self.wildcard) {
            ("*", Some(wildcard)) => wildcard.as_str(),
            _ => name,
        };
        self.params.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    /// Parameter names in declaration order; the wildcard is reported as `*`.
    pub fn path_param_names(&self) -> Vec<&str> {
        self.params
            .iter()
            .map(|(k, _)| match &self.wildcard {
                Some(wildcard) if wildcard == k => "*",
                _ => k.as_str(),
            })
            .collect()
    }

    pub fn path_param_values(&self) -> Vec<&str> {
        self.params.iter().map(|(_, v)| v.as_str()).collect()
    }

    /// `(name, value)` pairs, named as [`path_param_names`](Self::path_param_names) reports them.
    pub fn path_params(&self) -> Vec<(&str, &str)> {
        self.path_param_names().into_iter().zip(self.path_param_values()).collect()
    }

    pub(crate) fn raw_path_params(&self) -> &[(String, String)] {
        &self.params
    }

    // ── Request: query, form, cookies ────────────────────────────────────────

    pub fn query_string(&self) -> &str {
        self.uri.query().unwrap_or("")
    }

    /// Decoded query pairs in request order. Malformed input yields no pairs.
    pub fn query_params(&self) -> Vec<(String, String)> {
        serde_urlencoded::from_str(self.query_string()).unwrap_or_default()
    }

    /// First value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.query_params().into_iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Url-encoded body fields followed by query pairs.
    ///
    /// Multipart bodies are the engine adapter's business and are rejected
    /// here with [`Error::Form`].
    pub fn form_params(&self) -> Result<Vec<(String, String)>, Error> {
        if self.has_content_type("multipart/form-data") {
            return Err(Error::Form("multipart/form-data is not decoded by the core".to_owned()));
        }

        let mut pairs: Vec<(String, String)> = if self.has_content_type(ContentType::FormData.as_str()) {
            serde_urlencoded::from_bytes(&self.body)?
        } else {
            Vec::new()
        };
        pairs.extend(self.query_params());
        Ok(pairs)
    }

    /// First form value for `name`; body fields take precedence over the query.
    pub fn form_value(&self, name: &str) -> Option<String> {
        self.form_params()
            .ok()?
            .into_iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    pub fn cookies(&self) -> Vec<Cookie> {
        self.headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(Cookie::parse_header)
            .collect()
    }

    pub fn cookie(&self, name: &str) -> Option<Cookie> {
        self.cookies().into_iter().find(|c| c.name() == name)
    }

    // ── Request: binding ─────────────────────────────────────────────────────

    /// Decodes the request into `T`: a JSON body when the content type says
    /// so, otherwise path parameters, query and url-encoded form merged with
    /// later sources overriding earlier ones.
    pub fn bind<T: DeserializeOwned>(&self) -> Result<T, BindError> {
        bind::decode(self)
    }

    /// [`bind`](Context::bind) followed by [`Validate::validate`].
    pub fn bind_valid<T: DeserializeOwned + Validate>(&self) -> Result<T, BindError> {
        let value: T = bind::decode(self)?;
        value.validate()?;
        Ok(value)
    }

    // ── Scratch map ──────────────────────────────────────────────────────────

    /// Stores a value for later filters or the handler.
    pub fn set<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Box::new(value));
    }

    /// Reads a stored value; `None` if absent or of another type.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|v| v.downcast_ref())
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.values.remove(key).is_some()
    }

    // ── Response writers ─────────────────────────────────────────────────────

    /// The response as written so far.
    pub fn response(&self) -> &ResponseState {
        &self.response
    }

    pub fn set_status(&mut self, code: StatusCode) {
        self.response.status = code;
    }

    /// Sets (replaces) a response header.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), Error> {
        let name = HeaderName::try_from(name)?;
        let value = HeaderValue::try_from(value)?;
        self.response.headers.insert(name, value);
        Ok(())
    }

    pub fn set_cookie(&mut self, cookie: &SetCookie) -> Result<(), Error> {
        let value = HeaderValue::try_from(cookie.to_string())?;
        self.response.headers.append(header::SET_COOKIE, value);
        Ok(())
    }

    /// A response with no body.
    pub fn no_content(&mut self, code: StatusCode) {
        self.response.status = code;
        self.response.body.clear();
    }

    pub fn string(&mut self, code: StatusCode, body: impl Into<String>) {
        self.blob(code, ContentType::Text, body.into().as_bytes());
    }

    pub fn html(&mut self, code: StatusCode, html: impl Into<String>) {
        self.blob(code, ContentType::Html, html.into().as_bytes());
    }

    pub fn html_blob(&mut self, code: StatusCode, body: impl AsRef<[u8]>) {
        self.blob(code, ContentType::Html, body.as_ref());
    }

    pub fn json<T: Serialize + ?Sized>(&mut self, code: StatusCode, value: &T) -> Result<(), Error> {
        let body = serde_json::to_vec(value)?;
        self.blob(code, ContentType::Json, &body);
        Ok(())
    }

    /// JSON indented with `indent` (e.g. `"  "`).
    pub fn json_pretty<T: Serialize + ?Sized>(
        &mut self,
        code: StatusCode,
        value: &T,
        indent: &str,
    ) -> Result<(), Error> {
        let body = to_json_pretty(value, indent)?;
        self.blob(code, ContentType::Json, &body);
        Ok(())
    }

    pub fn json_blob(&mut self, code: StatusCode, body: impl AsRef<[u8]>) {
        self.blob(code, ContentType::Json, body.as_ref());
    }

    /// `callback(<json>);` as JavaScript. Pretty-printed when the query has
    /// a `pretty` parameter.
    pub fn jsonp<T: Serialize + ?Sized>(
        &mut self,
        code: StatusCode,
        callback: &str,
        value: &T,
    ) -> Result<(), Error> {
        let json = if self.query_params().iter().any(|(k, _)| k == "pretty") {
            to_json_pretty(value, "  ")?
        } else {
            serde_json::to_vec(value)?
        };
        self.jsonp_blob(code, callback, json);
        Ok(())
    }

    pub fn jsonp_blob(&mut self, code: StatusCode, callback: &str, body: impl AsRef<[u8]>) {
        let body = body.as_ref();
        let mut out = Vec::with_capacity(callback.len() + body.len() + 3);
        out.extend_from_slice(callback.as_bytes());
        out.push(b'(');
        out.extend_from_slice(body);
        out.extend_from_slice(b");");
        self.blob(code, ContentType::JavaScript, &out);
    }

    /// Pre-serialized XML, prefixed with the standard XML declaration.
    pub fn xml_blob(&mut self, code: StatusCode, body: impl AsRef<[u8]>) {
        let mut out = XML_HEADER.as_bytes().to_vec();
        out.extend_from_slice(body.as_ref());
        self.blob(code, ContentType::Xml, &out);
    }

    pub fn blob(&mut self, code: StatusCode, content_type: ContentType, body: &[u8]) {
        self.response.status = code;
        self.response.replace_body(content_type.header_value(), body);
    }

    /// Drains `reader` into the body. A read failure is returned as an
    /// abrupt failure.
    pub async fn stream<R>(&mut self, code: StatusCode, content_type: ContentType, mut reader: R) -> Result<(), Error>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut body = Vec::new();
        reader.read_to_end(&mut body).await?;
        self.blob(code, content_type, &body);
        Ok(())
    }

    /// Serves a file, guessing its content type from the extension. A
    /// missing file answers `404`.
    pub async fn file(&mut self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        match tokio::fs::read(path).await {
            Ok(body) => {
                let content_type = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(ContentType::from_extension)
                    .unwrap_or(ContentType::OctetStream);
                self.blob(StatusCode::OK, content_type, &body);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.no_content(StatusCode::NOT_FOUND);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Serves a file as a download named `name`.
    pub async fn attachment(&mut self, path: impl AsRef<Path>, name: &str) -> Result<(), Error> {
        self.content_disposition(path.as_ref(), name, "attachment").await
    }

    /// Serves a file for inline display, named `name`.
    pub async fn inline(&mut self, path: impl AsRef<Path>, name: &str) -> Result<(), Error> {
        self.content_disposition(path.as_ref(), name, "inline").await
    }

    async fn content_disposition(&mut self, path: &Path, name: &str, kind: &str) -> Result<(), Error> {
        let value = format!("{kind}; filename={name:?}");
        self.set_header(header::CONTENT_DISPOSITION.as_str(), &value)?;
        self.file(path).await
    }

    pub fn redirect(&mut self, code: StatusCode, location: &str) -> Result<(), Error> {
        self.set_header(header::LOCATION.as_str(), location)?;
        self.no_content(code);
        Ok(())
    }

    /// Appends one server-sent event to the body.
    pub fn sse_event(&mut self, event: &str, data: impl fmt::Display) {
        let headers = &mut self.response.headers;
        if headers.get(header::CONTENT_TYPE) != Some(&ContentType::EventStream.header_value()) {
            headers.insert(header::CONTENT_TYPE, ContentType::EventStream.header_value());
            self.response.body.clear();
        }
        let data = data.to_string();
        let body = &mut self.response.body;
        body.extend_from_slice(format!("event:{event}\n").as_bytes());
        for line in data.lines() {
            body.extend_from_slice(format!("data:{line}\n").as_bytes());
        }
        body.extend_from_slice(b"\n");
    }

    // ── Engine passthrough ───────────────────────────────────────────────────

    pub(crate) fn native_request(&self) -> http::Request<Bytes> {
        let mut request = http::Request::new(self.body.clone());
        *request.method_mut() = self.method.clone();
        *request.uri_mut() = self.uri.clone();
        *request.version_mut() = self.version;
        *request.headers_mut() = self.headers.clone();
        request
    }

    pub(crate) fn replace_response(&mut self, response: http::Response<Bytes>) {
        self.response = ResponseState::from_native(response);
    }

    /// Throws away the written response, leaving a bare status.
    pub(crate) fn reset_response(&mut self, code: StatusCode) {
        self.response.reset(code);
    }

    pub(crate) fn into_response(self) -> http::Response<http_body_util::Full<Bytes>> {
        self.response.into_http()
    }
}

fn to_json_pretty<T: Serialize + ?Sized>(value: &T, indent: &str) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut serializer)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(uri: &str) -> Context {
        Context::new(http::Request::builder().uri(uri).body(Bytes::new()).unwrap())
    }

    #[test]
    fn path_params_expose_wildcard_as_star() {
        let mut ctx = context("/files/sub/dir");
        ctx.set_route(
            "/files/:kind/*",
            Some("wildcard"),
            vec![("kind".into(), "img".into()), ("wildcard".into(), "sub/dir".into())],
        );

        assert_eq!(ctx.path(), "/files/:kind/*");
        assert_eq!(ctx.path_param("*"), Some("sub/dir"));
        assert_eq!(ctx.path_param("kind"), Some("img"));
        assert_eq!(ctx.path_param_names(), vec!["kind", "*"]);
        assert_eq!(ctx.path_param_values(), vec!["img", "sub/dir"]);
        assert_eq!(ctx.path_params(), vec![("kind", "img"), ("*", "sub/dir")]);
    }

    #[test]
    fn query_and_form_values() {
        let mut ctx = Context::new(
            http::Request::builder()
                .method("POST")
                .uri("/set?name=query&age=1")
                .header("content-type", "application/x-www-form-urlencoded; charset=utf-8")
                .body(Bytes::from_static(b"name=form"))
                .unwrap(),
        );
        ctx.set_route("/set", None, Vec::new());

        assert_eq!(ctx.query_param("name").as_deref(), Some("query"));
        assert_eq!(ctx.form_value("name").as_deref(), Some("form"));
        assert_eq!(ctx.form_value("age").as_deref(), Some("1"));
        assert_eq!(ctx.query_param("missing"), None);
    }

    #[test]
    fn form_media_type_ignores_case() {
        let ctx = Context::new(
            http::Request::builder()
                .method("POST")
                .header("content-type", "Application/X-WWW-Form-Urlencoded; charset=UTF-8")
                .body(Bytes::from_static(b"name=form"))
                .unwrap(),
        );
        assert!(ctx.has_content_type("application/x-www-form-urlencoded"));
        assert_eq!(ctx.form_value("name").as_deref(), Some("form"));
    }

    #[test]
    fn multipart_forms_are_rejected() {
        let ctx = Context::new(
            http::Request::builder()
                .header("content-type", "multipart/form-data; boundary=x")
                .body(Bytes::new())
                .unwrap(),
        );
        assert!(matches!(ctx.form_params(), Err(Error::Form(_))));
    }

    #[test]
    fn scheme_and_client_ip_follow_proxy_headers() {
        let ctx = Context::new(
            http::Request::builder()
                .header("x-forwarded-proto", "https")
                .header("x-forwarded-for", "10.0.0.1, 10.0.0.2")
                .body(Bytes::new())
                .unwrap(),
        )
        .with_connection(Some("127.0.0.1:9000".parse().unwrap()), false);

        assert_eq!(ctx.scheme(), "https");
        assert_eq!(ctx.client_ip().as_deref(), Some("10.0.0.1"));

        let plain = context("/").with_connection(Some("127.0.0.1:9000".parse().unwrap()), false);
        assert_eq!(plain.scheme(), "http");
        assert_eq!(plain.client_ip().as_deref(), Some("127.0.0.1"));
    }

    #[test]
    fn scratch_map_is_typed() {
        let mut ctx = context("/");
        ctx.set("user", 42_u32);

        assert_eq!(ctx.get::<u32>("user"), Some(&42));
        assert_eq!(ctx.get::<String>("user"), None);
        assert!(ctx.remove("user"));
        assert!(!ctx.remove("user"));
    }

    #[test]
    fn later_writers_replace_the_body() {
        let mut ctx = context("/");
        ctx.string(StatusCode::OK, "first");
        ctx.json(StatusCode::CREATED, &serde_json::json!({"id": 1})).unwrap();

        assert_eq!(ctx.response().status(), StatusCode::CREATED);
        assert_eq!(ctx.response().body(), br#"{"id":1}"#);
        assert_eq!(
            ctx.response().headers().get("content-type").unwrap(),
            ContentType::Json.as_str()
        );
    }

    #[test]
    fn jsonp_wraps_payload_in_callback() {
        let mut ctx = context("/");
        ctx.jsonp(StatusCode::OK, "cb", &[1, 2]).unwrap();
        assert_eq!(ctx.response().body(), b"cb([1,2]);");
    }

    #[test]
    fn sse_events_accumulate() {
        let mut ctx = context("/");
        ctx.sse_event("tick", 1);
        ctx.sse_event("tick", "two\nlines");
        assert_eq!(
            std::str::from_utf8(ctx.response().body()).unwrap(),
            "event:tick\ndata:1\n\nevent:tick\ndata:two\ndata:lines\n\n"
        );
    }

    #[test]
    fn cookies_round_through_headers() {
        let mut ctx = Context::new(
            http::Request::builder()
                .header("cookie", "a=1; b=2")
                .body(Bytes::new())
                .unwrap(),
        );
        assert_eq!(ctx.cookie("b").map(|c| c.value().to_owned()).as_deref(), Some("2"));

        ctx.set_cookie(&SetCookie::new("c", "3")).unwrap();
        ctx.set_cookie(&SetCookie::new("d", "4")).unwrap();
        assert_eq!(ctx.response().headers().get_all("set-cookie").iter().count(), 2);
    }

    #[tokio::test]
    async fn missing_file_answers_not_found() {
        let mut ctx = context("/");
        ctx.file("/definitely/not/here.txt").await.unwrap();
        assert_eq!(ctx.response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stream_drains_reader() {
        let mut ctx = context("/");
        ctx.stream(StatusCode::OK, ContentType::Csv, &b"a,b\n1,2\n"[..]).await.unwrap();
        assert_eq!(ctx.response().body(), b"a,b\n1,2\n");
    }
}
