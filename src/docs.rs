//! Documentation metadata.
//!
//! The dispatch core does not render API documents. It collects, for every
//! route that carries an [`Operation`], enough metadata (method, path,
//! parameters with their constraints, request/response types) for an
//! external generator, checks it against the route pattern at build time,
//! and serves the result as JSON at [`DOCS_PATH`].

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use serde::Serialize;

use crate::error::Error;
use crate::handler::{Handler, native};
use crate::mapping::{Mapper, param_names};
use crate::method::Method;
use crate::response::ContentType;

/// Where the collected documentation is served.
pub const DOCS_PATH: &str = "/docs/operations.json";

/// Documentation attached to one route.
///
/// ```rust
/// use sprig::docs::{Operation, Param};
///
/// let op = Operation::new("getUser")
///     .summary("Fetch a user")
///     .tag("users")
///     .param(Param::path("id", "user id"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Operation {
    pub operation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub deprecated: bool,
}

impl Operation {
    pub fn new(operation_id: impl Into<String>) -> Self {
        Self { operation_id: operation_id.into(), ..Self::default() }
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    /// Overrides the request type name taken from a binding handler.
    pub fn request(mut self, name: impl Into<String>) -> Self {
        self.request = Some(name.into());
        self
    }

    /// Overrides the response type name taken from a binding handler.
    pub fn response(mut self, name: impl Into<String>) -> Self {
        self.response = Some(name.into());
        self
    }

    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    Path,
    Query,
    Form,
    Body,
    Header,
    Cookie,
}

/// One documented input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Param {
    pub name: String,
    #[serde(rename = "in")]
    pub location: Location,
    pub description: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<Constraint>,
}

impl Param {
    pub fn new(name: impl Into<String>, location: Location, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location,
            description: description.into(),
            required: location == Location::Path,
            constraints: Vec::new(),
        }
    }

    /// Path parameters are always required.
    pub fn path(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, Location::Path, description)
    }

    pub fn query(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, Location::Query, description)
    }

    pub fn form(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, Location::Form, description)
    }

    pub fn header(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, Location::Header, description)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }
}

/// A validation rule, mirroring the helpers in [`validate`](crate::validate).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Constraint {
    Len { value: usize },
    MinLen { value: usize },
    MaxLen { value: usize },
    Range { min: f64, max: f64 },
    OneOf { values: Vec<String> },
}

/// All documented routes, in registration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApiDocument {
    pub operations: Vec<DocumentedRoute>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentedRoute {
    pub method: String,
    pub path: String,
    #[serde(flatten)]
    pub operation: Operation,
}

/// Checks that every documented path parameter exists in the pattern.
pub(crate) fn check(method: Method, path: &str, operation: &Operation) -> Result<(), Error> {
    let declared = param_names(path);
    for param in operation.params.iter().filter(|p| p.location == Location::Path) {
        if !declared.iter().any(|name| *name == param.name) {
            return Err(Error::Docs {
                method,
                path: path.to_owned(),
                reason: format!("path parameter `{}` is not part of the pattern", param.name),
            });
        }
    }
    Ok(())
}

/// Collects the documentation of `mappers`, filling request and response
/// types from binding handlers where the operation does not name them.
pub(crate) fn document(mappers: &[Mapper]) -> Result<ApiDocument, Error> {
    let mut operations = Vec::new();
    for mapper in mappers {
        let Some(operation) = mapper.operation() else { continue };
        check(mapper.method(), mapper.path(), operation)?;

        let mut operation = operation.clone();
        if let Some(signature) = mapper.handler().signature() {
            if operation.request.is_none() {
                operation.request = signature.request.map(str::to_owned);
            }
            if operation.response.is_none() {
                operation.response = Some(signature.response.to_owned());
            }
        }
        operations.push(DocumentedRoute {
            method: mapper.method().to_string(),
            path: mapper.path().to_owned(),
            operation,
        });
    }
    Ok(ApiDocument { operations })
}

/// A native handler serving `document` as JSON.
#[track_caller]
pub(crate) fn handler(document: &ApiDocument) -> Result<impl Handler, Error> {
    let body = Bytes::from(serde_json::to_vec_pretty(document)?);
    Ok(native(move |_req: http::Request<Bytes>| {
        let body = body.clone();
        async move {
            let mut response = http::Response::new(body);
            response
                .headers_mut()
                .insert(CONTENT_TYPE, http::HeaderValue::from_static(ContentType::Json.as_str()));
            response
        }
    }))
}
