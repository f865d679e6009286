//! Resolution engine
//!
//! Resolves a [`PageDetails`] graph for one request. References are resolved
//! depth first: every nested reference in a `$source` is resolved before the
//! outer path is looked up. Independent entries of a record, and the
//! components of a slot, are resolved concurrently; output order follows the
//! input.
//!
//! A resolver that fails (or times out) only turns its own reference into
//! `null`, and so does every reference whose path depends on it. Registry
//! errors, i.e. a path that reaches no binding, abort the whole call.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{try_join_all, BoxFuture, FutureExt};

use crate::cache::{CacheKey, CachePolicy, ResolutionCache};
use crate::context::{RequestContext, RequestId};
use crate::error::{Error, Result};
use crate::page::{
    ComponentDetails, ConfigRecord, ConfigValue, PageDetails, Reference, ResolvedComponent,
    ResolvedPage, ResolvedRecord, SourceSegment,
};
use crate::registry::{Binding, Registry};
use crate::value::Value;

/// Default upper bound for a single resolver invocation
pub const DEFAULT_RESOLVER_TIMEOUT: Duration = Duration::from_secs(30);

/// Engine tuning
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Upper bound for one resolver invocation; `None` waits indefinitely
    pub resolver_timeout: Option<Duration>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            resolver_timeout: Some(DEFAULT_RESOLVER_TIMEOUT),
        }
    }
}

impl EngineOptions {
    pub fn with_resolver_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.resolver_timeout = timeout;
        self
    }
}

/// Resolves page definitions against a registry, sharing one cache across
/// requests
pub struct Engine {
    registry: Arc<Registry>,
    cache: Arc<ResolutionCache>,
    options: EngineOptions,
}

impl Engine {
    /// Create an engine with default options and a fresh cache
    pub fn new(registry: Registry) -> Self {
        Self::with_options(registry, EngineOptions::default())
    }

    /// Create an engine with the given options and a fresh cache
    pub fn with_options(registry: Registry, options: EngineOptions) -> Self {
        Self {
            registry: Arc::new(registry),
            cache: Arc::new(ResolutionCache::new()),
            options,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ResolutionCache> {
        &self.cache
    }

    /// Flush every cached value
    pub fn clear_cache(&self) {
        self.cache.clear_all();
    }

    /// Resolve a page for one request.
    ///
    /// The request's per-request cache entries are dropped when this call
    /// ends: on success, on error, or when the future is dropped unfinished.
    pub async fn resolve(&self, ctx: &RequestContext, page: &PageDetails) -> Result<ResolvedPage> {
        log::debug!("resolving page '{}' for {}", page.template, ctx.request_id);
        let _purge = PurgeOnDrop {
            cache: &self.cache,
            request: ctx.request_id,
        };
        self.resolve_page(ctx, page).await
    }

    async fn resolve_page(&self, ctx: &RequestContext, page: &PageDetails) -> Result<ResolvedPage> {
        let (language, title) = futures::try_join!(
            self.resolve_value(ctx, &page.language, "language"),
            self.resolve_value(ctx, &page.title, "title"),
        )?;

        let config = self.resolve_record(ctx, &page.config, "config").await?;

        let slots = try_join_all(page.slots.iter().map(|(name, components)| async move {
            let resolved = try_join_all(
                components
                    .iter()
                    .enumerate()
                    .map(|(i, component)| self.resolve_component(ctx, name, i, component)),
            )
            .await?;
            Ok::<_, Error>((name.clone(), resolved))
        }))
        .await?;

        Ok(ResolvedPage {
            template: page.template.clone(),
            language,
            title,
            config,
            slots: slots.into_iter().collect(),
        })
    }

    async fn resolve_component(
        &self,
        ctx: &RequestContext,
        slot: &str,
        index: usize,
        component: &ComponentDetails,
    ) -> Result<ResolvedComponent> {
        let location = format!("slots.{}[{}].config", slot, index);
        Ok(ResolvedComponent {
            component: component.component.clone(),
            config: self.resolve_record(ctx, &component.config, &location).await?,
        })
    }

    /// Resolve every entry of a record; keys keep their order
    pub async fn resolve_record(
        &self,
        ctx: &RequestContext,
        record: &ConfigRecord,
        location: &str,
    ) -> Result<ResolvedRecord> {
        let values = try_join_all(record.iter().map(|(key, value)| {
            let location = format!("{}.{}", location, key);
            async move { self.resolve_value(ctx, value, &location).await }
        }))
        .await?;

        Ok(record.keys().cloned().zip(values).collect())
    }

    async fn resolve_value(
        &self,
        ctx: &RequestContext,
        value: &ConfigValue,
        location: &str,
    ) -> Result<Value> {
        match value {
            ConfigValue::Literal(value) => Ok(value.clone()),
            ConfigValue::Reference(reference) => self
                .resolve_reference(ctx, reference)
                .await
                .map_err(|e| e.with_path(location)),
        }
    }

    /// Resolve one reference, nested references first
    pub fn resolve_reference<'a>(
        &'a self,
        ctx: &'a RequestContext,
        reference: &'a Reference,
    ) -> BoxFuture<'a, Result<Value>> {
        async move {
            let mut path = Vec::with_capacity(reference.source.len());
            for segment in &reference.source {
                match segment {
                    SourceSegment::Literal(s) => path.push(s.clone()),
                    SourceSegment::Reference(inner) => {
                        let value = self.resolve_reference(ctx, inner).await?;
                        match value.to_segment() {
                            Some(s) => path.push(s),
                            None if value.is_null() => {
                                // the inner failure, if any, is already logged
                                log::debug!("{} has no value, {} resolves to null", inner, reference);
                                return Ok(Value::Null);
                            }
                            None => {
                                log::warn!(
                                    "Failed to resolve source {}: nested reference {} resolved to {}, which cannot be a path segment",
                                    reference,
                                    inner,
                                    value.type_name()
                                );
                                return Ok(Value::Null);
                            }
                        }
                    }
                }
            }

            let binding = self.registry.lookup(&path)?;
            let value = self.fetch(ctx, &binding, path).await;

            Ok(match reference.field.as_deref() {
                Some(field) if !field.is_empty() => value.project(field),
                _ => value,
            })
        }
        .boxed()
    }

    /// Cached value for the path, or the resolver's output.
    ///
    /// Cached bindings run check, invoke and store under the key's lock, so
    /// concurrent references to one path invoke the resolver once.
    async fn fetch(&self, ctx: &RequestContext, binding: &Binding, path: Vec<String>) -> Value {
        let key = CacheKey::new(path);
        let Some(policy) = binding.cache_policy() else {
            return self.invoke(ctx, binding, &key).await.unwrap_or_default();
        };

        let scope = match policy {
            CachePolicy::PerRequest => Some(ctx.request_id),
            CachePolicy::TimeToLive { .. } => None,
        };
        let _guard = self.cache.lock(&key, scope).await;
        if let Some(value) = self.cache.get(&key, ctx.request_id) {
            return value;
        }

        match self.invoke(ctx, binding, &key).await {
            Some(value) => {
                self.cache.put(key, value.clone(), policy, ctx.request_id);
                value
            }
            None => Value::Null,
        }
    }

    /// Run the resolver; failures are logged and yield `None`
    async fn invoke(&self, ctx: &RequestContext, binding: &Binding, key: &CacheKey) -> Option<Value> {
        log::trace!("invoking resolver {} for {}", binding.name(), key);
        let call = binding.resolver().resolve(ctx, key.segments());
        let result = match self.options.resolver_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or_else(|_| Err(Error::resolver_timeout(binding.name(), limit))),
            None => call.await,
        };

        match result {
            Ok(value) => Some(value),
            Err(err) => {
                log::warn!("Failed to resolve source {}: {}", key, err);
                None
            }
        }
    }
}

/// Drops a request's per-request entries when the resolve call ends,
/// including when its future is cancelled
struct PurgeOnDrop<'a> {
    cache: &'a ResolutionCache,
    request: RequestId,
}

impl Drop for PurgeOnDrop<'_> {
    fn drop(&mut self) {
        self.cache.clear_per_request(self.request);
    }
}
