//! Method-aware routing over the path trie.
//!
//! A [`Router`] maps `(method, path)` to a value. Each trie node value is a
//! small fixed-size table indexed by the closed [`Method`] enum, so a
//! lookup distinguishes three outcomes: a match, a path that matched with
//! no slot for the method (405 material, with the allowed set for the
//! `Allow` header), and no match at all.

use std::collections::HashMap;

use crate::{
    message::{Method, MethodSet},
    path::NormalizedPath,
    trie::{Mapper, PathTrie, TrieError},
};

/// Router mutation errors.
#[derive(thiserror::Error, Debug)]
pub enum RouterError {
    #[error("{method} is already registered at `{pattern}`")]
    DuplicateRoute { method: Method, pattern: String },
    #[error(transparent)]
    Trie(#[from] TrieError),
}

/// Per-node value: one optional slot per method.
pub struct MethodTable<T> {
    slots: [Option<T>; Method::COUNT],
}

impl<T> Default for MethodTable<T> {
    fn default() -> Self {
        Self {
            slots: Default::default(),
        }
    }
}

impl<T: Clone> Clone for MethodTable<T> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
        }
    }
}

impl<T> MethodTable<T> {
    pub fn get(&self, method: Method) -> Option<&T> {
        self.slots[method.index()].as_ref()
    }

    fn set(&mut self, method: Method, value: T) -> bool {
        let slot = &mut self.slots[method.index()];
        if slot.is_some() {
            return false;
        }
        *slot = Some(value);
        true
    }

    /// The set of methods with a registered value.
    pub fn methods(&self) -> MethodSet {
        Method::ALL
            .into_iter()
            .filter(|m| self.slots[m.index()].is_some())
            .collect()
    }

    /// Applies `f` to every populated slot.
    pub fn map(self, f: impl Fn(T) -> T) -> Self {
        Self {
            slots: self.slots.map(|slot| slot.map(&f)),
        }
    }
}

/// The outcome of a router lookup.
pub enum RouteResult<T> {
    /// The trie matched and the method slot is populated.
    Match {
        value: T,
        params: HashMap<String, String>,
        matched: NormalizedPath,
        remaining: NormalizedPath,
    },
    /// The trie matched but nothing is registered for this method; the
    /// allowed set feeds the `Allow` response header.
    MethodMiss { allowed: MethodSet },
    /// The trie did not match at all.
    PathMiss { path: NormalizedPath },
}

/// Maps `(method, path)` to values of `T` over a [`PathTrie`].
pub struct Router<T> {
    trie: PathTrie<MethodTable<T>>,
}

impl<T> Clone for Router<T> {
    fn clone(&self) -> Self {
        Self {
            trie: self.trie.clone(),
        }
    }
}

impl<T: 'static> Default for Router<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Router<T> {
    pub fn new() -> Self {
        Self {
            trie: PathTrie::new(),
        }
    }

    /// Registers `value` for `method` at `pattern`. Fails if that exact
    /// slot is already populated; other methods at the same pattern are
    /// unaffected.
    pub fn add(&mut self, method: Method, pattern: &str, value: T) -> Result<(), RouterError> {
        let ok = self.trie.with_slot(pattern, |slot| {
            slot.get_or_insert_with(MethodTable::default).set(method, value)
        })?;
        if !ok {
            return Err(RouterError::DuplicateRoute {
                method,
                pattern: pattern.to_owned(),
            });
        }
        Ok(())
    }

    /// Registers the same value for several methods at once.
    pub fn any_of(
        &mut self,
        methods: &[Method],
        pattern: &str,
        value: T,
    ) -> Result<(), RouterError>
    where
        T: Clone,
    {
        for method in methods {
            self.add(*method, pattern, value.clone())?;
        }
        Ok(())
    }

    /// Registers the value for every method.
    pub fn any(&mut self, pattern: &str, value: T) -> Result<(), RouterError>
    where
        T: Clone,
    {
        self.any_of(&Method::ALL, pattern, value)
    }

    pub fn get(&mut self, pattern: &str, value: T) -> Result<(), RouterError> {
        self.add(Method::Get, pattern, value)
    }

    pub fn head(&mut self, pattern: &str, value: T) -> Result<(), RouterError> {
        self.add(Method::Head, pattern, value)
    }

    pub fn post(&mut self, pattern: &str, value: T) -> Result<(), RouterError> {
        self.add(Method::Post, pattern, value)
    }

    pub fn put(&mut self, pattern: &str, value: T) -> Result<(), RouterError> {
        self.add(Method::Put, pattern, value)
    }

    pub fn delete(&mut self, pattern: &str, value: T) -> Result<(), RouterError> {
        self.add(Method::Delete, pattern, value)
    }

    pub fn patch(&mut self, pattern: &str, value: T) -> Result<(), RouterError> {
        self.add(Method::Patch, pattern, value)
    }

    pub fn options(&mut self, pattern: &str, value: T) -> Result<(), RouterError> {
        self.add(Method::Options, pattern, value)
    }

    /// Grafts `sub`'s routes below `pattern`, preserving its methods.
    /// After attaching, mutations through either handle are visible
    /// through both.
    pub fn attach(&mut self, pattern: &str, sub: &mut Router<T>) -> Result<(), RouterError>
    where
        T: 'static,
    {
        self.trie.attach(pattern, &mut sub.trie, false)?;
        Ok(())
    }

    /// Creates an empty sub-router attached below `pattern` and returns a
    /// handle onto it.
    pub fn group(&mut self, pattern: &str) -> Result<Router<T>, RouterError>
    where
        T: 'static,
    {
        let mut sub = Router::new();
        self.attach(pattern, &mut sub)?;
        Ok(sub)
    }

    /// Installs a value-transforming function scoped to `pattern`; it is
    /// applied to every populated method slot of any lookup whose matched
    /// prefix traverses that node.
    pub fn map_at(&mut self, pattern: &str, f: impl Fn(T) -> T + 'static) -> Result<(), RouterError>
    where
        T: 'static,
    {
        let mapper: Mapper<MethodTable<T>> = std::rc::Rc::new(move |table| table.map(&f));
        self.trie.use_at(pattern, mapper)?;
        Ok(())
    }

    /// All registered patterns, literals before dynamic segments.
    pub fn paths(&self) -> Vec<String> {
        self.trie.paths()
    }
}

impl<T: Clone + 'static> Router<T> {
    /// Looks up `(method, path)`.
    pub fn lookup(&self, method: Method, path: &NormalizedPath) -> RouteResult<T> {
        match self.trie.lookup(path) {
            None => RouteResult::PathMiss { path: path.clone() },
            Some(m) => match m.value.get(method) {
                Some(value) => RouteResult::Match {
                    value: value.clone(),
                    params: m.params,
                    matched: m.matched,
                    remaining: m.remaining,
                },
                None => RouteResult::MethodMiss {
                    allowed: m.value.methods(),
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(raw: &str) -> NormalizedPath {
        NormalizedPath::normalize(raw)
    }

    #[test]
    fn literal_beats_param_and_method_miss_reports_allow() {
        let mut router = Router::new();
        router.get("/users/:id", 1).unwrap();
        router.get("/users/me", 2).unwrap();

        match router.lookup(Method::Get, &p("/users/me")) {
            RouteResult::Match { value, params, .. } => {
                assert_eq!(value, 2);
                assert!(params.is_empty());
            }
            _ => panic!("expected match"),
        }
        match router.lookup(Method::Get, &p("/users/123")) {
            RouteResult::Match { value, params, .. } => {
                assert_eq!(value, 1);
                assert_eq!(params["id"], "123");
            }
            _ => panic!("expected match"),
        }
        match router.lookup(Method::Post, &p("/users/me")) {
            RouteResult::MethodMiss { allowed } => {
                assert_eq!(allowed.to_string(), "GET");
            }
            _ => panic!("expected method miss"),
        }
    }

    #[test]
    fn method_miss_lists_all_registered_methods() {
        let mut router = Router::new();
        router.get("/users/:id", 1).unwrap();
        router.delete("/users/:id", 2).unwrap();

        match router.lookup(Method::Patch, &p("/users/42")) {
            RouteResult::MethodMiss { allowed } => {
                assert_eq!(allowed.to_string(), "GET, DELETE");
            }
            _ => panic!("expected method miss"),
        }
    }

    #[test]
    fn path_miss_is_distinct() {
        let router: Router<i32> = Router::new();
        assert!(matches!(
            router.lookup(Method::Get, &p("/nope")),
            RouteResult::PathMiss { .. }
        ));
    }

    #[test]
    fn duplicate_slot_fails_without_touching_siblings() {
        let mut router = Router::new();
        router.get("/a", 1).unwrap();
        assert!(matches!(
            router.get("/a", 2),
            Err(RouterError::DuplicateRoute { .. })
        ));
        router.post("/a", 3).unwrap();
        match router.lookup(Method::Get, &p("/a")) {
            RouteResult::Match { value, .. } => assert_eq!(value, 1),
            _ => panic!(),
        }
    }

    #[test]
    fn nested_attach_collects_params_across_scopes() {
        let mut parent = Router::new();
        let mut sub = Router::new();
        sub.get("/details/:did", 1).unwrap();
        parent.attach("/resource/:rid", &mut sub).unwrap();

        match parent.lookup(Method::Get, &p("/resource/abc/details/xyz")) {
            RouteResult::Match { params, .. } => {
                assert_eq!(params["rid"], "abc");
                assert_eq!(params["did"], "xyz");
            }
            _ => panic!("expected match"),
        }
    }

    #[test]
    fn group_returns_live_handle() {
        let mut parent = Router::new();
        let mut api = parent.group("/api").unwrap();
        api.get("/users", 7).unwrap();
        match parent.lookup(Method::Get, &p("/api/users")) {
            RouteResult::Match { value, .. } => assert_eq!(value, 7),
            _ => panic!("expected match"),
        }
    }

    #[test]
    fn any_registers_every_method() {
        let mut router = Router::new();
        router.any("/ping", 1).unwrap();
        for m in Method::ALL {
            assert!(matches!(
                router.lookup(m, &p("/ping")),
                RouteResult::Match { .. }
            ));
        }
    }

    #[test]
    fn map_at_wraps_matched_values_only() {
        let mut router = Router::new();
        router.get("/api/users", 10).unwrap();
        router.get("/health", 1).unwrap();
        router.map_at("/api", |v| v + 1).unwrap();

        match router.lookup(Method::Get, &p("/api/users")) {
            RouteResult::Match { value, .. } => assert_eq!(value, 11),
            _ => panic!(),
        }
        match router.lookup(Method::Get, &p("/health")) {
            RouteResult::Match { value, .. } => assert_eq!(value, 1),
            _ => panic!(),
        }
    }

    #[test]
    fn tail_route_exposes_remaining() {
        let mut router = Router::new();
        router.get("/static/**", 1).unwrap();
        match router.lookup(Method::Get, &p("/static/css/site.css")) {
            RouteResult::Match {
                matched, remaining, ..
            } => {
                assert_eq!(matched.as_str(), "/static");
                assert_eq!(remaining.as_str(), "/css/site.css");
            }
            _ => panic!("expected match"),
        }
    }
}
