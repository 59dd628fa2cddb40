//! The route mapping table.
//!
//! Routes are registered against a [`WebMapping`] (directly, through a
//! [`Container`](crate::Container), or through a grouped [`Router`]) and
//! compiled into the matcher when the container is built.
//!
//! # Path syntax
//!
//! | Pattern            | Matches                | Parameters                  |
//! |--------------------|------------------------|-----------------------------|
//! | `/users/:id`       | `/users/42`            | `id = "42"`                 |
//! | `/users/{id}`      | `/users/42`            | `id = "42"`                 |
//! | `/files/*`         | `/files/sub/dir`       | `* = "sub/dir"`             |
//! | `/files/{*rest}`   | `/files/sub/dir`       | `rest = "sub/dir"`          |
//!
//! A captured value loses exactly one leading `/` if it has one.

use std::collections::HashMap;
use std::sync::Arc;

use crate::docs::Operation;
use crate::filter::SharedFilter;
use crate::handler::Handler;
use crate::method::Method;
use crate::router::Router;

/// Parameter name given to an anonymous trailing `*`.
pub(crate) const WILDCARD: &str = "wildcard";

/// One registered route.
#[derive(Clone)]
pub struct Mapper {
    method: Method,
    path: String,
    handler: Arc<dyn Handler>,
    filters: Vec<SharedFilter>,
    operation: Option<Operation>,
}

impl Mapper {
    pub fn new(method: Method, path: impl Into<String>, handler: impl Handler, filters: &[SharedFilter]) -> Self {
        Self {
            method,
            path: path.into(),
            handler: Arc::new(handler),
            filters: filters.to_vec(),
            operation: None,
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    /// Route filters, in the order they run.
    pub fn filters(&self) -> &[SharedFilter] {
        &self.filters
    }

    pub fn operation(&self) -> Option<&Operation> {
        self.operation.as_ref()
    }

    /// Attaches documentation to the route.
    pub fn with_operation(&mut self, operation: Operation) -> &mut Self {
        self.operation = Some(operation);
        self
    }
}

impl std::fmt::Debug for Mapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mapper")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("handler", self.handler.provenance())
            .field("filters", &self.filters.len())
            .field("operation", &self.operation.as_ref().map(|op| &op.operation_id))
            .finish()
    }
}

macro_rules! register_method {
    ($($name:ident => $method:ident),* $(,)?) => {
        $(
            #[doc = concat!("Registers a `", stringify!($method), "` route.")]
            pub fn $name(&mut self, path: &str, handler: impl Handler, filters: &[SharedFilter]) -> &mut Mapper {
                self.request(Method::$method, path, handler, filters)
            }
        )*
    };
}

/// All registered routes, in registration order.
#[derive(Clone, Default)]
pub struct WebMapping {
    mappers: Vec<Mapper>,
    index: HashMap<(Method, String), usize>,
}

impl WebMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a route. A second registration of the same method and path
    /// replaces the first one in place.
    pub fn add_mapper(&mut self, mapper: Mapper) -> &mut Mapper {
        let key = (mapper.method, mapper.path.clone());
        let slot = match self.index.get(&key) {
            Some(&slot) => {
                tracing::warn!(
                    method = %mapper.method,
                    path = %mapper.path,
                    previous = %self.mappers[slot].handler.provenance(),
                    replacement = %mapper.handler.provenance(),
                    "route registered twice, keeping the last registration",
                );
                self.mappers[slot] = mapper;
                slot
            }
            None => {
                self.mappers.push(mapper);
                self.index.insert(key, self.mappers.len() - 1);
                self.mappers.len() - 1
            }
        };
        &mut self.mappers[slot]
    }

    /// Registers `handler` for `method` and `path`.
    pub fn request(&mut self, method: Method, path: &str, handler: impl Handler, filters: &[SharedFilter]) -> &mut Mapper {
        self.add_mapper(Mapper::new(method, path, handler, filters))
    }

    register_method! {
        get => Get,
        post => Post,
        put => Put,
        patch => Patch,
        delete => Delete,
        head => Head,
        options => Options,
    }

    /// A registrar that prefixes paths with `prefix` and runs `filters`
    /// ahead of each route's own filters.
    ///
    /// ```rust
    /// use sprig::{WebMapping, func};
    ///
    /// let mut mapping = WebMapping::new();
    /// mapping
    ///     .route("/api", &[])
    ///     .get("/users", func(|_| Box::pin(async { Ok(()) })), &[])
    ///     .post("/users", func(|_| Box::pin(async { Ok(()) })), &[]);
    ///
    /// assert_eq!(mapping.mappers()[1].path(), "/api/users");
    /// ```
    pub fn route(&mut self, prefix: &str, filters: &[SharedFilter]) -> Router<'_> {
        Router::new(self, prefix, filters)
    }

    /// Registered routes in registration order.
    pub fn mappers(&self) -> &[Mapper] {
        &self.mappers
    }

    pub fn len(&self) -> usize {
        self.mappers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappers.is_empty()
    }

    pub fn contains(&self, method: Method, path: &str) -> bool {
        self.index.contains_key(&(method, path.to_owned()))
    }

    pub(crate) fn mapper_mut(&mut self, slot: usize) -> Option<&mut Mapper> {
        self.mappers.get_mut(slot)
    }

    /// Appends every route of `other`, in order.
    pub fn merge(&mut self, other: WebMapping) {
        for mapper in other.into_mappers() {
            self.add_mapper(mapper);
        }
    }

    pub fn into_mappers(self) -> Vec<Mapper> {
        self.mappers
    }
}

impl std::fmt::Debug for WebMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(&self.mappers).finish()
    }
}

/// Strips one leading `/` from a captured value.
///
/// For engine adapters whose wildcard captures keep the separator before
/// them. The built-in route table already captures without it.
pub fn normalize_param(value: &str) -> &str {
    value.strip_prefix('/').unwrap_or(value)
}

/// A route pattern translated to the matcher's syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Pattern {
    pub(crate) compiled: String,
    pub(crate) wildcard: Option<String>,
}

/// Translates `:name` and a trailing `*` into `{name}` and `{*wildcard}`.
/// `{name}` and `{*name}` pass through unchanged.
pub(crate) fn compile(path: &str) -> Pattern {
    let mut compiled = String::with_capacity(path.len() + 8);
    let mut wildcard = None;
    let mut rest = path;

    while let Some(at) = rest.find([':', '*', '{']) {
        compiled.push_str(&rest[..at]);
        let tail = &rest[at..];
        match tail.as_bytes()[0] {
            b':' => {
                let end = tail[1..].find(['/', '.', '-']).map_or(tail.len(), |i| i + 1);
                compiled.push('{');
                compiled.push_str(&tail[1..end]);
                compiled.push('}');
                rest = &tail[end..];
            }
            b'*' => {
                compiled.push_str("{*");
                compiled.push_str(WILDCARD);
                compiled.push('}');
                wildcard = Some(WILDCARD.to_owned());
                rest = &tail[1..];
            }
            _ => {
                let end = tail.find('}').map_or(tail.len(), |i| i + 1);
                let segment = &tail[..end];
                if let Some(name) = segment.strip_prefix("{*").and_then(|s| s.strip_suffix('}')) {
                    wildcard = Some(name.to_owned());
                }
                compiled.push_str(segment);
                rest = &tail[end..];
            }
        }
    }
    compiled.push_str(rest);
    Pattern { compiled, wildcard }
}

/// Parameter names declared by `path`, wildcard included under its own name.
pub(crate) fn param_names(path: &str) -> Vec<String> {
    let compiled = compile(path).compiled;
    let mut names = Vec::new();
    let mut rest = compiled.as_str();
    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start..].find('}') else { break };
        let name = rest[start + 1..start + len].trim_start_matches('*');
        names.push(name.to_owned());
        rest = &rest[start + len + 1..];
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::func;

    fn noop() -> impl Handler {
        func(|_ctx| Box::pin(async { Ok(()) }))
    }

    #[test]
    fn compiles_colon_and_wildcard_syntax() {
        assert_eq!(compile("/users/:id/posts/:post").compiled, "/users/{id}/posts/{post}");
        assert_eq!(
            compile("/files/*"),
            Pattern { compiled: "/files/{*wildcard}".into(), wildcard: Some("wildcard".into()) }
        );
        assert_eq!(
            compile("/static/{*rest}"),
            Pattern { compiled: "/static/{*rest}".into(), wildcard: Some("rest".into()) }
        );
        assert_eq!(compile("/users/{id}").compiled, "/users/{id}");
        assert_eq!(param_names("/a/:x/{y}/*"), ["x", "y", "wildcard"]);
    }

    #[test]
    fn normalization_strips_exactly_one_slash() {
        assert_eq!(normalize_param("/sub/dir"), "sub/dir");
        assert_eq!(normalize_param("//sub"), "/sub");
        assert_eq!(normalize_param("sub"), "sub");
        assert_eq!(normalize_param(""), "");
    }

    #[test]
    fn last_registration_wins_in_place() {
        let mut mapping = WebMapping::new();
        mapping.get("/a", noop(), &[]);
        mapping.get("/b", noop(), &[]);
        let line = line!() + 1;
        mapping.get("/a", func(|_ctx| Box::pin(async { Ok(()) })), &[]);

        let paths: Vec<_> = mapping.mappers().iter().map(Mapper::path).collect();
        assert_eq!(paths, ["/a", "/b"]);
        assert_eq!(mapping.mappers()[0].handler().provenance().line(), line);
    }

    #[test]
    fn mappers_are_stable_across_reads() {
        let mut mapping = WebMapping::new();
        mapping.get("/x", noop(), &[]);
        mapping.post("/x", noop(), &[]);

        let first: Vec<_> = mapping.mappers().iter().map(|m| (m.method(), m.path().to_owned())).collect();
        let second: Vec<_> = mapping.mappers().iter().map(|m| (m.method(), m.path().to_owned())).collect();
        assert_eq!(first, second);
        assert!(mapping.contains(Method::Post, "/x"));
    }
}
