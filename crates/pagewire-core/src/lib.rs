//! pagewire-core: per-request resolution of page configuration graphs
//!
//! Page definitions mix literal values with `$source` references to data
//! resolvers. For every request the [`Engine`] walks the page, resolves each
//! reference through the [`Registry`] (nested references first), reuses
//! cached values where the binding allows it, and returns a fully concrete
//! [`ResolvedPage`].
//!
//! # Example
//!
//! ```rust
//! use pagewire_core::{Binding, CachePolicy, Engine, PageDetails, Registry, RequestContext};
//!
//! # tokio_test_block(async {
//! let registry = Registry::new()
//!     .with_resolver(
//!         Binding::from_fn(["context", "urlparams"], |ctx, path| {
//!             Ok(ctx.param(&path[2]).into())
//!         })
//!         .with_cache_policy(CachePolicy::PerRequest),
//!     )
//!     .unwrap();
//! let engine = Engine::new(registry);
//!
//! let page: PageDetails = serde_json::from_str(r#"{
//!     "template": "article",
//!     "language": "en",
//!     "title": { "$source": ["context", "urlparams", "title"] }
//! }"#).unwrap();
//! let ctx = RequestContext::new("/hello").with_param("title", "Hello World!");
//!
//! let resolved = engine.resolve(&ctx, &page).await.unwrap();
//! assert_eq!(resolved.title.as_str(), Some("Hello World!"));
//! # });
//! # fn tokio_test_block(f: impl std::future::Future<Output = ()>) {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

pub mod builtins;
pub mod cache;
pub mod context;
pub mod engine;
pub mod error;
pub mod page;
pub mod registry;
pub mod value;

pub use cache::{CacheKey, CachePolicy, ResolutionCache};
pub use context::{QueryValue, RequestContext, RequestId};
pub use engine::{Engine, EngineOptions};
pub use error::{Error, Result};
pub use page::{
    ComponentDetails, ConfigValue, Page, PageCatalog, PageDetails, Reference, ResolvedComponent,
    ResolvedPage,
};
pub use registry::{Binding, Registry, Resolver};
pub use value::Value;
