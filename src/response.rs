//! Response state carried by a [`Context`](crate::Context) and the content
//! types its writers use.
//!
//! Handlers never build responses directly. They call writers on the context
//! (`ctx.json(..)`, `ctx.string(..)`) which fill a [`ResponseState`]; the
//! dispatcher turns it into an `http::Response` once the chain has returned.

use bytes::{Bytes, BytesMut};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderValue};
use http::StatusCode;
use http_body_util::Full;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values used by the context writers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentType {
    Css,          // text/css; charset=utf-8
    Csv,          // text/csv
    EventStream,  // text/event-stream  (SSE)
    FormData,     // application/x-www-form-urlencoded
    Gif,          // image/gif
    Html,         // text/html; charset=utf-8
    JavaScript,   // application/javascript; charset=utf-8
    Jpeg,         // image/jpeg
    Json,         // application/json; charset=utf-8
    OctetStream,  // application/octet-stream  (binary / file download)
    Pdf,          // application/pdf
    Png,          // image/png
    Svg,          // image/svg+xml
    Text,         // text/plain; charset=utf-8
    Xml,          // application/xml; charset=utf-8
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Css         => "text/css; charset=utf-8",
            Self::Csv         => "text/csv",
            Self::EventStream => "text/event-stream",
            Self::FormData    => "application/x-www-form-urlencoded",
            Self::Gif         => "image/gif",
            Self::Html        => "text/html; charset=utf-8",
            Self::JavaScript  => "application/javascript; charset=utf-8",
            Self::Jpeg        => "image/jpeg",
            Self::Json        => "application/json; charset=utf-8",
            Self::OctetStream => "application/octet-stream",
            Self::Pdf         => "application/pdf",
            Self::Png         => "image/png",
            Self::Svg         => "image/svg+xml",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Xml         => "application/xml; charset=utf-8",
        }
    }

    /// Best guess from a file extension, falling back to `OctetStream`.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "css"          => Self::Css,
            "csv"          => Self::Csv,
            "gif"          => Self::Gif,
            "htm" | "html" => Self::Html,
            "js" | "mjs"   => Self::JavaScript,
            "jpg" | "jpeg" => Self::Jpeg,
            "json"         => Self::Json,
            "pdf"          => Self::Pdf,
            "png"          => Self::Png,
            "svg"          => Self::Svg,
            "txt"          => Self::Text,
            "xml"          => Self::Xml,
            _              => Self::OctetStream,
        }
    }

    pub(crate) fn header_value(&self) -> HeaderValue {
        HeaderValue::from_static(self.as_str())
    }
}

// ── ResponseState ─────────────────────────────────────────────────────────────

/// The response under construction for one request.
///
/// Writers replace the body (`blob`) or append to it (`append`, used by
/// server-sent events). Defaults to `200 OK` with no body.
#[derive(Debug)]
pub struct ResponseState {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: BytesMut,
}

impl ResponseState {
    pub(crate) fn new() -> Self {
        Self { status: StatusCode::OK, headers: HeaderMap::new(), body: BytesMut::new() }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub(crate) fn replace_body(&mut self, content_type: HeaderValue, body: &[u8]) {
        self.headers.insert(CONTENT_TYPE, content_type);
        self.body.clear();
        self.body.extend_from_slice(body);
    }

    /// Drops everything written so far and leaves a bare status.
    pub(crate) fn reset(&mut self, status: StatusCode) {
        self.status = status;
        self.headers.clear();
        self.body.clear();
    }

    pub(crate) fn from_native(response: http::Response<Bytes>) -> Self {
        let (parts, body) = response.into_parts();
        Self { status: parts.status, headers: parts.headers, body: BytesMut::from(&body[..]) }
    }

    pub(crate) fn into_http(self) -> http::Response<Full<Bytes>> {
        let mut response = http::Response::new(Full::new(self.body.freeze()));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response.headers_mut().remove(CONTENT_LENGTH);
        response
    }
}

/// Shorthand for responses the dispatcher produces itself (404, 405, 503).
pub(crate) fn bare(status: StatusCode) -> http::Response<Full<Bytes>> {
    let mut state = ResponseState::new();
    state.status = status;
    state.into_http()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guesses_content_type_from_extension() {
        assert_eq!(ContentType::from_extension("HTML"), ContentType::Html);
        assert_eq!(ContentType::from_extension("png"), ContentType::Png);
        assert_eq!(ContentType::from_extension("tar"), ContentType::OctetStream);
    }

    #[test]
    fn reset_discards_written_headers_and_body() {
        let mut state = ResponseState::new();
        state.replace_body(ContentType::Text.header_value(), b"partial");
        state.reset(StatusCode::INTERNAL_SERVER_ERROR);

        assert_eq!(state.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(state.headers().is_empty());
        assert!(state.body().is_empty());
    }
}
