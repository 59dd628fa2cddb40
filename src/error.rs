//! Unified error type.

use crate::method::Method;

/// The error type returned by sprig's fallible operations.
///
/// Client mistakes (malformed query strings, failed validation) are not
/// `Error`s: the binding layer answers them with a `400` response and the
/// request completes normally. An `Error` returned from a handler or filter is
/// an abrupt failure. The recovery filter turns it into a bare `500`; without
/// one it propagates out of [`Dispatcher::dispatch`](crate::Dispatcher::dispatch)
/// to the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid route `{path}`: {source}")]
    Route {
        path: String,
        #[source]
        source: matchit::InsertError,
    },

    #[error("invalid header: {0}")]
    Header(String),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("form: {0}")]
    Form(String),

    #[error("config: {0}")]
    Config(String),

    #[error("tls: {0}")]
    Tls(String),

    #[error("documentation for {method} {path}: {reason}")]
    Docs {
        method: Method,
        path: String,
        reason: String,
    },

    #[error("{0}")]
    Handler(String),
}

impl Error {
    /// Free-form failure raised by application code.
    ///
    /// ```rust
    /// let err = sprig::Error::msg("store unavailable");
    /// assert_eq!(err.to_string(), "store unavailable");
    /// ```
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }
}

impl From<http::header::InvalidHeaderName> for Error {
    fn from(e: http::header::InvalidHeaderName) -> Self {
        Self::Header(e.to_string())
    }
}

impl From<http::header::InvalidHeaderValue> for Error {
    fn from(e: http::header::InvalidHeaderValue) -> Self {
        Self::Header(e.to_string())
    }
}

impl From<serde_urlencoded::de::Error> for Error {
    fn from(e: serde_urlencoded::de::Error) -> Self {
        Self::Form(e.to_string())
    }
}
