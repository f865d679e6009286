//! Resolver registry
//!
//! Resolvers are bound to path prefixes such as `["http", "data"]`. The
//! registry is a tree of explicit branch and leaf nodes; a reference's
//! resolved path walks the tree until it reaches a leaf, and that leaf's
//! resolver receives the whole path (so `["http", "data", "foo"]` is served
//! by the `["http", "data"]` binding with `path[2] == "foo"`).
//!
//! Prefixes never nest: a binding may not pass through, or end above,
//! another binding.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::builtins;
use crate::cache::CachePolicy;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::value::Value;

/// Trait for resolver implementations
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Produce the value for a resolved path.
    ///
    /// # Arguments
    /// * `ctx` - The request being served, passed through unchanged
    /// * `path` - The full resolved path, including the binding's prefix
    async fn resolve(&self, ctx: &RequestContext, path: &[String]) -> Result<Value>;
}

/// A resolver backed by a synchronous function
pub struct FnResolver<F>
where
    F: Fn(&RequestContext, &[String]) -> Result<Value> + Send + Sync,
{
    func: F,
}

impl<F> FnResolver<F>
where
    F: Fn(&RequestContext, &[String]) -> Result<Value> + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> Resolver for FnResolver<F>
where
    F: Fn(&RequestContext, &[String]) -> Result<Value> + Send + Sync,
{
    async fn resolve(&self, ctx: &RequestContext, path: &[String]) -> Result<Value> {
        (self.func)(ctx, path)
    }
}

/// A resolver backed by a function returning a future.
///
/// The function receives owned copies of the context and path so the
/// returned future can outlive the call.
pub struct AsyncFnResolver<F> {
    func: F,
}

impl<F> AsyncFnResolver<F> {
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> Resolver for AsyncFnResolver<F>
where
    F: Fn(RequestContext, Vec<String>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn resolve(&self, ctx: &RequestContext, path: &[String]) -> Result<Value> {
        (self.func)(ctx.clone(), path.to_vec()).await
    }
}

/// A resolver bound to a prefix, with an optional cache policy
pub struct Binding {
    prefix: Vec<String>,
    cache_policy: Option<CachePolicy>,
    resolver: Arc<dyn Resolver>,
}

impl Binding {
    /// Bind a resolver to a prefix
    pub fn new<I, S>(prefix: I, resolver: impl Resolver + 'static) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefix: prefix.into_iter().map(Into::into).collect(),
            cache_policy: None,
            resolver: Arc::new(resolver),
        }
    }

    /// Bind a synchronous function to a prefix
    pub fn from_fn<I, S, F>(prefix: I, func: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&RequestContext, &[String]) -> Result<Value> + Send + Sync + 'static,
    {
        Self::new(prefix, FnResolver::new(func))
    }

    /// Bind an async function to a prefix
    pub fn from_async_fn<I, S, F, Fut>(prefix: I, func: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(RequestContext, Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self::new(prefix, AsyncFnResolver::new(func))
    }

    /// Cache this binding's output
    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = Some(policy);
        self
    }

    pub fn prefix(&self) -> &[String] {
        &self.prefix
    }

    pub fn cache_policy(&self) -> Option<CachePolicy> {
        self.cache_policy
    }

    pub fn resolver(&self) -> &dyn Resolver {
        self.resolver.as_ref()
    }

    /// The prefix joined with `/`, used in messages
    pub fn name(&self) -> String {
        self.prefix.join("/")
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("prefix", &self.prefix)
            .field("cache_policy", &self.cache_policy)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
enum RegistryNode {
    Branch(IndexMap<String, RegistryNode>),
    Leaf(Arc<Binding>),
}

impl RegistryNode {
    /// Any binding at or below this node
    fn first_binding(&self) -> Option<&Arc<Binding>> {
        match self {
            RegistryNode::Leaf(binding) => Some(binding),
            RegistryNode::Branch(children) => {
                children.values().find_map(RegistryNode::first_binding)
            }
        }
    }
}

/// Registry of resolver bindings, built once at startup
#[derive(Debug, Default)]
pub struct Registry {
    root: IndexMap<String, RegistryNode>,
    len: usize,
}

impl Registry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the request context resolvers
    pub fn with_builtins() -> Result<Self> {
        let mut registry = Self::new();
        for binding in builtins::context_bindings() {
            registry.register(binding)?;
        }
        Ok(registry)
    }

    /// Register a binding, consuming and returning the registry
    pub fn with_resolver(mut self, binding: Binding) -> Result<Self> {
        self.register(binding)?;
        Ok(self)
    }

    /// Register a binding.
    ///
    /// Fails without modifying the registry if the prefix is empty, the
    /// time-to-live is zero, or the prefix overlaps an existing binding.
    pub fn register(&mut self, binding: Binding) -> Result<()> {
        let name = binding.name();
        let Some((last, parents)) = binding.prefix.split_last() else {
            return Err(Error::invalid_binding(name, "prefix must not be empty"));
        };
        if let Some(CachePolicy::TimeToLive { seconds: 0 }) = binding.cache_policy {
            return Err(Error::invalid_binding(name, "time-to-live must be positive"));
        }
        if let Some(existing) = self.find_overlap(&binding.prefix) {
            return Err(Error::registration_conflict(name, existing));
        }

        let last = last.clone();
        let mut children = &mut self.root;
        for segment in parents {
            let node = children
                .entry(segment.clone())
                .or_insert_with(|| RegistryNode::Branch(IndexMap::new()));
            children = match node {
                RegistryNode::Branch(next) => next,
                RegistryNode::Leaf(_) => {
                    return Err(Error::internal(format!(
                        "leaf on the path of '{}' after overlap check",
                        name
                    )))
                }
            };
        }

        log::debug!("registered resolver {}", name);
        children.insert(last, RegistryNode::Leaf(Arc::new(binding)));
        self.len += 1;
        Ok(())
    }

    /// Name of a binding that `prefix` would pass through, replace, or sit
    /// above.
    fn find_overlap(&self, prefix: &[String]) -> Option<String> {
        let mut children = &self.root;
        for (i, segment) in prefix.iter().enumerate() {
            match children.get(segment)? {
                RegistryNode::Leaf(_) => return Some(prefix[..=i].join("/")),
                RegistryNode::Branch(next) if i + 1 == prefix.len() => {
                    let descendant = next
                        .values()
                        .find_map(RegistryNode::first_binding)
                        .map(|b| b.name())
                        .unwrap_or_else(|| prefix.join("/"));
                    return Some(descendant);
                }
                RegistryNode::Branch(next) => children = next,
            }
        }
        None
    }

    /// Find the binding serving a resolved path.
    ///
    /// Walks the path until the first leaf; the remaining segments are left
    /// for the resolver to interpret.
    pub fn lookup(&self, path: &[String]) -> Result<Arc<Binding>> {
        let mut children = &self.root;
        for segment in path {
            match children.get(segment) {
                Some(RegistryNode::Leaf(binding)) => return Ok(binding.clone()),
                Some(RegistryNode::Branch(next)) => children = next,
                None => break,
            }
        }
        Err(Error::unresolved_source(path.join("/")))
    }

    /// Check if a resolved path reaches a binding
    pub fn contains(&self, path: &[String]) -> bool {
        self.lookup(path).is_ok()
    }

    /// All binding names, in registration order within each branch
    pub fn names(&self) -> Vec<String> {
        fn collect(children: &IndexMap<String, RegistryNode>, out: &mut Vec<String>) {
            for node in children.values() {
                match node {
                    RegistryNode::Leaf(binding) => out.push(binding.name()),
                    RegistryNode::Branch(next) => collect(next, out),
                }
            }
        }

        let mut names = Vec::with_capacity(self.len);
        collect(&self.root, &mut names);
        names
    }

    /// Number of registered bindings
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
