//! Compiled route table.
//!
//! One radix tree per HTTP method, built once from the registered mappers.
//! Lookups only borrow, so the table is shared read-only between requests.

use std::collections::HashMap;
use std::sync::Arc;

use matchit::Router as MatchitRouter;

use crate::error::Error;
use crate::filter::SharedFilter;
use crate::handler::Handler;
use crate::mapping::{self, Mapper};
use crate::method::Method;

/// A route ready for dispatch, its filter list fully composed.
pub(crate) struct Route {
    pub(crate) path: String,
    pub(crate) wildcard: Option<String>,
    pub(crate) handler: Arc<dyn Handler>,
    pub(crate) filters: Arc<[SharedFilter]>,
}

pub(crate) enum Lookup<'t> {
    Found { route: &'t Route, params: Vec<(String, String)> },
    MethodNotAllowed(Vec<Method>),
    NotFound,
}

pub(crate) struct RouteTable {
    trees: HashMap<Method, MatchitRouter<usize>>,
    routes: Vec<Route>,
}

impl RouteTable {
    /// Compiles `mappers`. `shared` runs ahead of every route's own filters.
    pub(crate) fn build(mappers: &[Mapper], shared: &[SharedFilter]) -> Result<Self, Error> {
        let mut trees: HashMap<Method, MatchitRouter<usize>> = HashMap::new();
        let mut routes = Vec::with_capacity(mappers.len());

        for mapper in mappers {
            let pattern = mapping::compile(mapper.path());
            trees
                .entry(mapper.method())
                .or_default()
                .insert(pattern.compiled, routes.len())
                .map_err(|source| Error::Route { path: mapper.path().to_owned(), source })?;

            let filters: Vec<SharedFilter> = shared.iter().chain(mapper.filters()).cloned().collect();
            routes.push(Route {
                path: mapper.path().to_owned(),
                wildcard: pattern.wildcard,
                handler: Arc::clone(mapper.handler()),
                filters: filters.into(),
            });
        }
        Ok(Self { trees, routes })
    }

    pub(crate) fn lookup(&self, method: Method, path: &str) -> Lookup<'_> {
        if let Some(matched) = self.trees.get(&method).and_then(|tree| tree.at(path).ok()) {
            let route = &self.routes[*matched.value];
            let params = matched
                .params
                .iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect();
            return Lookup::Found { route, params };
        }

        let mut allowed: Vec<Method> = self
            .trees
            .iter()
            .filter(|(other, tree)| **other != method && tree.at(path).is_ok())
            .map(|(other, _)| *other)
            .collect();
        if allowed.is_empty() {
            return Lookup::NotFound;
        }
        allowed.sort();
        Lookup::MethodNotAllowed(allowed)
    }

    pub(crate) fn len(&self) -> usize {
        self.routes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::func;
    use crate::mapping::WebMapping;

    fn table(register: impl FnOnce(&mut WebMapping)) -> RouteTable {
        let mut mapping = WebMapping::new();
        register(&mut mapping);
        RouteTable::build(mapping.mappers(), &[]).unwrap()
    }

    fn noop() -> impl Handler {
        func(|_ctx| Box::pin(async { Ok(()) }))
    }

    #[test]
    fn wildcard_capture_drops_only_its_separator() {
        let table = table(|m| {
            m.get("/files/*", noop(), &[]);
        });
        let Lookup::Found { route, params } = table.lookup(Method::Get, "/files/sub/dir") else {
            panic!("expected a match");
        };
        assert_eq!(route.path, "/files/*");
        assert_eq!(route.wildcard.as_deref(), Some("wildcard"));
        assert_eq!(params, [("wildcard".to_owned(), "sub/dir".to_owned())]);

        let Lookup::Found { params, .. } = table.lookup(Method::Get, "/files//sub") else {
            panic!("expected a match");
        };
        assert_eq!(params, [("wildcard".to_owned(), "/sub".to_owned())]);
    }

    #[test]
    fn named_params_keep_their_names() {
        let table = table(|m| {
            m.get("/users/:id/posts/{post}", noop(), &[]);
        });
        let Lookup::Found { params, .. } = table.lookup(Method::Get, "/users/7/posts/9") else {
            panic!("expected a match");
        };
        assert_eq!(
            params,
            [("id".to_owned(), "7".to_owned()), ("post".to_owned(), "9".to_owned())]
        );
    }

    #[test]
    fn other_methods_produce_method_not_allowed() {
        let table = table(|m| {
            m.get("/items", noop(), &[]);
            m.post("/items", noop(), &[]);
        });
        assert!(matches!(
            table.lookup(Method::Delete, "/items"),
            Lookup::MethodNotAllowed(ref allowed) if allowed == &[Method::Get, Method::Post]
        ));
        assert!(matches!(table.lookup(Method::Get, "/missing"), Lookup::NotFound));
    }

    #[test]
    fn conflicting_patterns_fail_to_build() {
        let mut mapping = WebMapping::new();
        mapping.get("/users/:id", noop(), &[]);
        mapping.get("/users/:name", noop(), &[]);
        assert!(matches!(RouteTable::build(mapping.mappers(), &[]), Err(Error::Route { .. })));
    }
}
