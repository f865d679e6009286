//! Request-scoped context handed to every resolver

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::value::Value;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one top-level resolve call.
///
/// Per-request cache entries are owned by a request id, so two requests
/// running at the same time never see each other's entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    /// Allocate a process-unique id
    pub fn next() -> Self {
        RequestId(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// A query string parameter; repeated keys collect into a list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryValue {
    Single(String),
    Multiple(Vec<String>),
}

impl QueryValue {
    /// Append another occurrence of the same key
    pub fn push(&mut self, value: impl Into<String>) {
        let value = value.into();
        match self {
            QueryValue::Single(first) => {
                *self = QueryValue::Multiple(vec![std::mem::take(first), value]);
            }
            QueryValue::Multiple(values) => values.push(value),
        }
    }
}

impl From<&QueryValue> for Value {
    fn from(query: &QueryValue) -> Self {
        match query {
            QueryValue::Single(s) => Value::String(s.clone()),
            QueryValue::Multiple(values) => Value::from(values.clone()),
        }
    }
}

/// What the transport layer knows about the request being served
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Identity of this request
    pub request_id: RequestId,
    /// Path part of the requested URL
    pub url_path: String,
    /// Parameters captured by the route pattern
    pub url_params: IndexMap<String, String>,
    /// Query string parameters
    pub url_queries: IndexMap<String, QueryValue>,
    /// Host application configuration
    pub app_config: Value,
}

impl RequestContext {
    /// Create a context for a request to `url_path`
    pub fn new(url_path: impl Into<String>) -> Self {
        Self {
            request_id: RequestId::next(),
            url_path: url_path.into(),
            url_params: IndexMap::new(),
            url_queries: IndexMap::new(),
            app_config: Value::Null,
        }
    }

    /// Set all route parameters
    pub fn with_params(mut self, params: IndexMap<String, String>) -> Self {
        self.url_params = params;
        self
    }

    /// Set one route parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.url_params.insert(key.into(), value.into());
        self
    }

    /// Add a query parameter; repeating a key turns it into a list
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        match self.url_queries.get_mut(&key) {
            Some(existing) => existing.push(value),
            None => {
                self.url_queries.insert(key, QueryValue::Single(value.into()));
            }
        }
        self
    }

    /// Set the host application configuration
    pub fn with_app_config(mut self, config: Value) -> Self {
        self.app_config = config;
        self
    }

    /// Look up a route parameter
    pub fn param(&self, key: &str) -> Option<&str> {
        self.url_params.get(key).map(String::as_str)
    }

    /// Look up a query parameter
    pub fn query(&self, key: &str) -> Option<&QueryValue> {
        self.url_queries.get(key)
    }
}
