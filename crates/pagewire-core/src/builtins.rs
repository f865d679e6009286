//! Built-in resolvers over the request context
//!
//! | Prefix | Value |
//! |---|---|
//! | `context/urlparams/<name>` | route parameter `<name>` |
//! | `context/queries/<name>` | query parameter `<name>` (string or list) |
//! | `context/path` | the requested URL path |
//! | `context/config/<a>/<b>/...` | host application config, projected |
//!
//! All of them cache per request. Missing parameters resolve to `null`.

use crate::cache::CachePolicy;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::registry::Binding;
use crate::value::Value;

/// Bindings for the request context resolvers
pub fn context_bindings() -> Vec<Binding> {
    vec![
        Binding::from_fn(["context", "urlparams"], url_param_resolver),
        Binding::from_fn(["context", "queries"], query_resolver),
        Binding::from_fn(["context", "path"], url_path_resolver),
        Binding::from_fn(["context", "config"], app_config_resolver),
    ]
    .into_iter()
    .map(|binding| binding.with_cache_policy(CachePolicy::PerRequest))
    .collect()
}

/// The segment naming the parameter, right after the two-segment prefix
fn parameter_name<'a>(path: &'a [String], resolver: &str) -> Result<&'a str> {
    path.get(2).map(String::as_str).ok_or_else(|| {
        Error::resolver_custom(resolver, "expected a parameter name after the prefix")
    })
}

fn url_param_resolver(ctx: &RequestContext, path: &[String]) -> Result<Value> {
    let name = parameter_name(path, "context/urlparams")?;
    Ok(ctx.param(name).map(Value::from).unwrap_or_default())
}

fn query_resolver(ctx: &RequestContext, path: &[String]) -> Result<Value> {
    let name = parameter_name(path, "context/queries")?;
    Ok(ctx.query(name).map(Value::from).unwrap_or_default())
}

fn url_path_resolver(ctx: &RequestContext, _path: &[String]) -> Result<Value> {
    Ok(Value::from(ctx.url_path.as_str()))
}

fn app_config_resolver(ctx: &RequestContext, path: &[String]) -> Result<Value> {
    let mut current = &ctx.app_config;
    for key in path.iter().skip(2) {
        match current.child(key) {
            Some(next) => current = next,
            None => return Ok(Value::Null),
        }
    }
    Ok(current.clone())
}
