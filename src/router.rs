//! Grouped route registration.
//!
//! A [`Router`] shares a path prefix and a filter set across several
//! registrations. Each call returns the router again, so the chained style
//!
//! ```rust
//! # use sprig::{WebMapping, func};
//! # let mut mapping = WebMapping::new();
//! # let list = || func(|_| Box::pin(async { Ok(()) }));
//! mapping.route("/api", &[]).get("/a", list(), &[]).get("/b", list(), &[]);
//! ```
//!
//! and the block style
//!
//! ```rust
//! # use sprig::{WebMapping, func};
//! # let mut mapping = WebMapping::new();
//! # let list = || func(|_| Box::pin(async { Ok(()) }));
//! let mut api = mapping.route("/api", &[]);
//! api.get("/a", list(), &[]);
//! api.get("/b", list(), &[]);
//! ```
//!
//! register exactly the same routes.

use crate::docs::Operation;
use crate::filter::SharedFilter;
use crate::handler::Handler;
use crate::mapping::{Mapper, WebMapping};
use crate::method::Method;

macro_rules! group_method {
    ($($name:ident => $method:ident),* $(,)?) => {
        $(
            #[doc = concat!("Registers a `", stringify!($method), "` route under the prefix.")]
            pub fn $name(&mut self, path: &str, handler: impl Handler, filters: &[SharedFilter]) -> &mut Self {
                self.request(Method::$method, path, handler, filters)
            }
        )*
    };
}

/// A registrar bound to a path prefix and a filter set.
pub struct Router<'m> {
    mapping: &'m mut WebMapping,
    prefix: String,
    filters: Vec<SharedFilter>,
    last: Option<usize>,
}

impl<'m> Router<'m> {
    pub(crate) fn new(mapping: &'m mut WebMapping, prefix: &str, filters: &[SharedFilter]) -> Self {
        Self { mapping, prefix: prefix.to_owned(), filters: filters.to_vec(), last: None }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Registers a route; group filters run before `filters`.
    pub fn request(&mut self, method: Method, path: &str, handler: impl Handler, filters: &[SharedFilter]) -> &mut Self {
        let mut combined = self.filters.clone();
        combined.extend_from_slice(filters);
        let full = join(&self.prefix, path);

        self.mapping.add_mapper(Mapper::new(method, full.as_str(), handler, &combined));
        self.last = self.mapping.mappers().iter().position(|m| m.method() == method && m.path() == full);
        self
    }

    group_method! {
        get => Get,
        post => Post,
        put => Put,
        patch => Patch,
        delete => Delete,
        head => Head,
        options => Options,
    }

    /// Attaches documentation to the route registered last.
    pub fn with_operation(&mut self, operation: Operation) -> &mut Self {
        match self.last.and_then(|slot| self.mapping.mapper_mut(slot)) {
            Some(mapper) => {
                mapper.with_operation(operation);
            }
            None => tracing::warn!(
                prefix = %self.prefix,
                operation = %operation.operation_id,
                "no route registered yet, documentation dropped",
            ),
        }
        self
    }

    /// A nested group: prefixes and filters accumulate.
    pub fn route(&mut self, prefix: &str, filters: &[SharedFilter]) -> Router<'_> {
        let mut combined = self.filters.clone();
        combined.extend_from_slice(filters);
        Router::new(self.mapping, &join(&self.prefix, prefix), &combined)
    }
}

/// Joins a prefix and a sub-path with exactly one `/` between them.
fn join(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    match (prefix.is_empty(), path.is_empty()) {
        (true, true) => "/".to_owned(),
        (_, true) => prefix.to_owned(),
        _ if path.starts_with('/') => format!("{prefix}{path}"),
        _ => format!("{prefix}/{path}"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::filter::{LoggerFilter, RecoveryFilter};
    use crate::handler::func;

    fn noop() -> impl Handler {
        func(|_ctx| Box::pin(async { Ok(()) }))
    }

    fn describe(mapping: &WebMapping) -> Vec<(Method, String, usize)> {
        mapping.mappers().iter().map(|m| (m.method(), m.path().to_owned(), m.filters().len())).collect()
    }

    #[test]
    fn joins_prefix_and_path() {
        assert_eq!(join("/api", "/users"), "/api/users");
        assert_eq!(join("/api/", "/users"), "/api/users");
        assert_eq!(join("/api", "users"), "/api/users");
        assert_eq!(join("/api", ""), "/api");
        assert_eq!(join("", "/users"), "/users");
        assert_eq!(join("", ""), "/");
    }

    #[test]
    fn chained_and_block_styles_agree() {
        let group: Vec<SharedFilter> = vec![Arc::new(LoggerFilter)];
        let route: Vec<SharedFilter> = vec![Arc::new(RecoveryFilter)];

        let mut chained = WebMapping::new();
        chained
            .route("/v1", &group)
            .get("/a", noop(), &route)
            .post("/b", noop(), &[])
            .delete("/c/:id", noop(), &route);

        let mut block = WebMapping::new();
        {
            let mut v1 = block.route("/v1", &group);
            v1.get("/a", noop(), &route);
            v1.post("/b", noop(), &[]);
            v1.delete("/c/:id", noop(), &route);
        }

        assert_eq!(describe(&chained), describe(&block));
        assert_eq!(describe(&chained)[0], (Method::Get, "/v1/a".to_owned(), 2));
    }

    #[test]
    fn group_filters_run_first() {
        let group: SharedFilter = Arc::new(LoggerFilter);
        let own: SharedFilter = Arc::new(RecoveryFilter);
        let mut mapping = WebMapping::new();
        mapping.route("/g", &[Arc::clone(&group)]).get("/x", noop(), &[Arc::clone(&own)]);

        let filters = mapping.mappers()[0].filters();
        assert!(Arc::ptr_eq(&filters[0], &group));
        assert!(Arc::ptr_eq(&filters[1], &own));
    }

    #[test]
    fn nested_groups_accumulate() {
        let mut mapping = WebMapping::new();
        let outer: Vec<SharedFilter> = vec![Arc::new(LoggerFilter)];
        let mut api = mapping.route("/api", &outer);
        api.route("/v2", &[Arc::new(RecoveryFilter)])
            .get("/items", noop(), &[])
            .with_operation(Operation::new("listItems"));

        let mapper = &mapping.mappers()[0];
        assert_eq!(mapper.path(), "/api/v2/items");
        assert_eq!(mapper.filters().len(), 2);
        assert_eq!(mapper.operation().map(|op| op.operation_id.as_str()), Some("listItems"));
    }
}
