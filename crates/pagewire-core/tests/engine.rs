//! End-to-end resolution of page definitions

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use pagewire_core::error::{ErrorKind, RegistryErrorKind};
use pagewire_core::{
    Binding, CachePolicy, Engine, Error, PageDetails, Registry, RequestContext, ResolvedPage,
    Value,
};
use pretty_assertions::assert_eq;

struct Fixture {
    engine: Engine,
    http_calls: Arc<AtomicUsize>,
    param_calls: Arc<AtomicUsize>,
}

fn fixture() -> Fixture {
    fixture_with(Registry::new())
}

fn fixture_with(registry: Registry) -> Fixture {
    let http_calls = Arc::new(AtomicUsize::new(0));
    let param_calls = Arc::new(AtomicUsize::new(0));

    let http = http_calls.clone();
    let params = param_calls.clone();
    let registry = registry
        .with_resolver(
            Binding::from_async_fn(["http", "data"], move |_, path| {
                http.fetch_add(1, Ordering::SeqCst);
                async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    let mut map = IndexMap::new();
                    map.insert("keys".to_string(), Value::from(vec![path[2].clone()]));
                    Ok::<_, Error>(Value::Mapping(map))
                }
            })
            .with_cache_policy(CachePolicy::ttl_secs(5)),
        )
        .unwrap()
        .with_resolver(
            Binding::from_fn(["context", "urlparams"], move |ctx, path| {
                params.fetch_add(1, Ordering::SeqCst);
                Ok(ctx.param(&path[2]).into())
            })
            .with_cache_policy(CachePolicy::PerRequest),
        )
        .unwrap();

    Fixture {
        engine: Engine::new(registry),
        http_calls,
        param_calls,
    }
}

fn ctx(params: &[(&str, &str)]) -> RequestContext {
    params
        .iter()
        .fold(RequestContext::new("/key/example-key"), |ctx, (k, v)| {
            ctx.with_param(*k, *v)
        })
}

fn page(json: &str) -> PageDetails {
    serde_json::from_str(json).unwrap()
}

fn resolved(json: &str) -> ResolvedPage {
    serde_json::from_str(json).unwrap()
}

#[tokio::test]
async fn resolves_title_from_url_params() {
    let f = fixture();

    let result = f
        .engine
        .resolve(
            &ctx(&[("title", "Hello World!")]),
            &page(
                r#"{
                    "template": "example-template",
                    "language": "en",
                    "title": {"$source": ["context", "urlparams", "title"]}
                }"#,
            ),
        )
        .await
        .unwrap();

    assert_eq!(result.title, Value::from("Hello World!"));
}

#[tokio::test]
async fn resolves_language_and_title() {
    let f = fixture();

    let result = f
        .engine
        .resolve(
            &ctx(&[("lang", "en"), ("title", "Hello World!")]),
            &page(
                r#"{
                    "template": "example-template",
                    "language": {"$source": ["context", "urlparams", "lang"]},
                    "title": {"$source": ["context", "urlparams", "title"]},
                    "config": {},
                    "slots": {}
                }"#,
            ),
        )
        .await
        .unwrap();

    assert_eq!(
        result,
        resolved(
            r#"{
                "template": "example-template",
                "language": "en",
                "title": "Hello World!",
                "config": {},
                "slots": {}
            }"#
        )
    );
}

#[tokio::test]
async fn resolves_config() {
    let f = fixture();

    let result = f
        .engine
        .resolve(
            &ctx(&[("foo", "Hello"), ("bar", "Goodbye")]),
            &page(
                r#"{
                    "template": "example-template",
                    "language": "en",
                    "title": "Hello World!",
                    "config": {
                        "foo": {"$source": ["context", "urlparams", "foo"]},
                        "bar": {"$source": ["context", "urlparams", "bar"]}
                    }
                }"#,
            ),
        )
        .await
        .unwrap();

    assert_eq!(result.config["foo"], Value::from("Hello"));
    assert_eq!(result.config["bar"], Value::from("Goodbye"));
    assert_eq!(result.config.keys().collect::<Vec<_>>(), vec!["foo", "bar"]);
}

#[tokio::test]
async fn resolves_slots_in_order() {
    let f = fixture();

    let result = f
        .engine
        .resolve(
            &ctx(&[("foo", "Hello"), ("bar", "Goodbye")]),
            &page(
                r#"{
                    "template": "example-template",
                    "language": "en",
                    "title": "Hello World!",
                    "slots": {
                        "main": [
                            {"component": "main-menu", "config": {"foo": {"$source": ["context", "urlparams", "foo"]}}},
                            {"component": "teaser", "config": {"static": 3}}
                        ],
                        "sidebar": [
                            {"component": "author-information", "config": {"bar": {"$source": ["context", "urlparams", "bar"]}}}
                        ]
                    }
                }"#,
            ),
        )
        .await
        .unwrap();

    assert_eq!(
        result,
        resolved(
            r#"{
                "template": "example-template",
                "language": "en",
                "title": "Hello World!",
                "config": {},
                "slots": {
                    "main": [
                        {"component": "main-menu", "config": {"foo": "Hello"}},
                        {"component": "teaser", "config": {"static": 3}}
                    ],
                    "sidebar": [
                        {"component": "author-information", "config": {"bar": "Goodbye"}}
                    ]
                }
            }"#
        )
    );
    assert_eq!(result.slots.keys().collect::<Vec<_>>(), vec!["main", "sidebar"]);
}

#[tokio::test]
async fn resolves_nested_sources_innermost_first() {
    let f = fixture();

    let result = f
        .engine
        .resolve(
            &ctx(&[("foo", "Hello"), ("bar", "Goodbye")]),
            &page(
                r#"{
                    "template": "example-template",
                    "language": "en",
                    "title": "Hello World!",
                    "config": {
                        "foo": {"$source": ["context", "urlparams", {"$source": ["http", "data", "foo"], "field": "keys.0"}]},
                        "bar": {"$source": ["context", "urlparams", {"$source": ["http", "data", "bar"], "field": "keys.0"}]}
                    }
                }"#,
            ),
        )
        .await
        .unwrap();

    assert_eq!(result.config["foo"], Value::from("Hello"));
    assert_eq!(result.config["bar"], Value::from("Goodbye"));
}

#[tokio::test]
async fn inner_resolver_runs_before_outer_lookup() {
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let inner = order.clone();
    let outer = order.clone();
    let registry = Registry::new()
        .with_resolver(Binding::from_fn(["b"], move |_, _| {
            inner.lock().unwrap().push("b");
            Ok(Value::from("computed"))
        }))
        .unwrap()
        .with_resolver(Binding::from_fn(["a", "computed"], move |_, path| {
            outer.lock().unwrap().push("a");
            Ok(Value::from(path.join("/")))
        }))
        .unwrap();
    let engine = Engine::new(registry);

    let result = engine
        .resolve(
            &RequestContext::new("/"),
            &page(r#"{"template": "t", "title": {"$source": ["a", {"$source": ["b"]}]}}"#),
        )
        .await
        .unwrap();

    assert_eq!(result.title, Value::from("a/computed"));
    assert_eq!(*order.lock().unwrap(), vec!["b", "a"]);
}

#[tokio::test]
async fn literals_pass_through_unchanged() {
    let f = fixture();
    let json = r#"{
        "template": "example-template",
        "language": null,
        "title": 42,
        "config": {
            "text": "plain",
            "flag": true,
            "nothing": null,
            "list": [1, "two", {"three": 3}],
            "nested": {"deep": {"value": [true]}},
            "inner_reference_is_data": {"items": {"$source": ["context", "urlparams", "foo"]}}
        }
    }"#;

    let result = f.engine.resolve(&ctx(&[("foo", "x")]), &page(json)).await.unwrap();
    let input: serde_json::Value = serde_json::from_str(json).unwrap();

    assert_eq!(
        serde_json::to_value(&result.config).unwrap(),
        input["config"]
    );
    assert_eq!(result.language, Value::Null);
    assert_eq!(result.title, Value::Integer(42));
    assert_eq!(f.param_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unregistered_source_fails_the_request() {
    let f = fixture();

    let err = f
        .engine
        .resolve(
            &ctx(&[("key", "example-key")]),
            &page(
                r#"{
                    "template": "example-template",
                    "language": "en",
                    "title": {"$source": ["non", "existing", "resolver"]}
                }"#,
            ),
        )
        .await
        .unwrap_err();

    assert_eq!(
        err.kind,
        ErrorKind::Registry(RegistryErrorKind::UnresolvedSource {
            source: "non/existing/resolver".into()
        })
    );
    assert_eq!(err.path.as_deref(), Some("title"));
    assert!(err
        .to_string()
        .contains("Cannot find resolver for source non/existing/resolver"));
}

#[tokio::test]
async fn unresolved_source_reports_component_location() {
    let f = fixture();

    let err = f
        .engine
        .resolve(
            &ctx(&[]),
            &page(
                r#"{
                    "template": "t",
                    "slots": {"main": [
                        {"component": "ok", "config": {}},
                        {"component": "broken", "config": {"menu": {"$source": ["http", "menu"]}}}
                    ]}
                }"#,
            ),
        )
        .await
        .unwrap_err();

    assert_eq!(err.path.as_deref(), Some("slots.main[1].config.menu"));
}

#[tokio::test]
async fn resolver_failure_only_nulls_its_field() {
    let f = fixture_with(
        Registry::new()
            .with_resolver(Binding::from_async_fn(["error"], |_, _| async {
                Err::<Value, _>(Error::resolver_custom("error", "Runtime error"))
            }))
            .unwrap(),
    );

    let result = f
        .engine
        .resolve(
            &ctx(&[("foo", "Hello"), ("bar", "Goodbye")]),
            &page(
                r#"{
                    "template": "example-template",
                    "language": {"$source": ["error"]},
                    "title": "Hello World!",
                    "config": {
                        "foo": {"$source": ["context", "urlparams", "foo"]},
                        "bar": {"$source": ["context", "urlparams", "bar"]}
                    }
                }"#,
            ),
        )
        .await
        .unwrap();

    assert_eq!(
        result,
        resolved(
            r#"{
                "template": "example-template",
                "language": null,
                "title": "Hello World!",
                "config": {"foo": "Hello", "bar": "Goodbye"},
                "slots": {}
            }"#
        )
    );
}

#[tokio::test]
async fn identical_keys_invoke_resolver_once() {
    let f = fixture();

    let result = f
        .engine
        .resolve(
            &ctx(&[("foo", "Hello")]),
            &page(
                r#"{
                    "template": "example-template",
                    "language": {"$source": ["context", "urlparams", "foo"]},
                    "title": {"$source": ["context", "urlparams", "foo"]},
                    "config": {
                        "foo": {"$source": ["http", "data", "Hello"], "field": "keys.0"},
                        "bar": {"$source": ["http", "data", "Hello"], "field": "keys.0"}
                    }
                }"#,
            ),
        )
        .await
        .unwrap();

    assert_eq!(result.language, Value::from("Hello"));
    assert_eq!(result.title, Value::from("Hello"));
    assert_eq!(result.config["foo"], Value::from("Hello"));
    assert_eq!(result.config["bar"], Value::from("Hello"));
    assert_eq!(f.http_calls.load(Ordering::SeqCst), 1);
    assert_eq!(f.param_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn per_request_values_do_not_survive_the_request() {
    let f = fixture();
    let details = page(
        r#"{"template": "t", "title": {"$source": ["context", "urlparams", "foo"]}}"#,
    );

    let first = f.engine.resolve(&ctx(&[("foo", "one")]), &details).await.unwrap();
    let second = f.engine.resolve(&ctx(&[("foo", "two")]), &details).await.unwrap();

    assert_eq!(first.title, Value::from("one"));
    assert_eq!(second.title, Value::from("two"));
    assert_eq!(f.param_calls.load(Ordering::SeqCst), 2);
    assert!(f.engine.cache().is_empty());
}

#[tokio::test]
async fn per_request_values_purged_after_structural_failure() {
    let f = fixture();
    let details = page(
        r#"{
            "template": "t",
            "title": {"$source": ["context", "urlparams", "foo"]},
            "config": {"broken": {"$source": ["missing"]}}
        }"#,
    );

    assert!(f.engine.resolve(&ctx(&[("foo", "one")]), &details).await.is_err());
    assert!(f.engine.cache().is_empty());
}

#[tokio::test(start_paused = true)]
async fn ttl_values_are_shared_until_expiry() {
    let f = fixture();
    let details = page(
        r#"{"template": "t", "title": {"$source": ["http", "data", "x"], "field": "keys.0"}}"#,
    );

    f.engine.resolve(&ctx(&[]), &details).await.unwrap();
    f.engine.resolve(&ctx(&[]), &details).await.unwrap();
    assert_eq!(f.http_calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(6)).await;

    let result = f.engine.resolve(&ctx(&[]), &details).await.unwrap();
    assert_eq!(result.title, Value::from("x"));
    assert_eq!(f.http_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn projection_of_null_is_null() {
    let f = fixture_with(
        Registry::new()
            .with_resolver(Binding::from_fn(["empty"], |_, _| Ok(Value::Null)))
            .unwrap(),
    );

    let result = f
        .engine
        .resolve(
            &ctx(&[]),
            &page(
                r#"{"template": "t", "config": {
                    "missing": {"$source": ["empty"], "field": "keys.0"},
                    "present": {"$source": ["http", "data", "x"], "field": "keys.0"}
                }}"#,
            ),
        )
        .await
        .unwrap();

    assert_eq!(result.config["missing"], Value::Null);
    assert_eq!(result.config["present"], Value::from("x"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_share_one_ttl_invocation() {
    let f = Arc::new(fixture());
    let details = Arc::new(page(
        r#"{"template": "t", "title": {"$source": ["http", "data", "shared"], "field": "keys.0"}}"#,
    ));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let f = f.clone();
            let details = details.clone();
            tokio::spawn(async move { f.engine.resolve(&ctx(&[]), &details).await })
        })
        .collect();

    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.title, Value::from("shared"));
    }
    assert_eq!(f.http_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_keep_per_request_values_apart() {
    let f = Arc::new(fixture());
    let details = Arc::new(page(
        r#"{"template": "t", "title": {"$source": ["context", "urlparams", "who"]}}"#,
    ));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let f = f.clone();
            let details = details.clone();
            tokio::spawn(async move {
                let name = format!("user-{}", i);
                let result = f.engine.resolve(&ctx(&[("who", name.as_str())]), &details).await;
                (name, result)
            })
        })
        .collect();

    for handle in handles {
        let (name, result) = handle.await.unwrap();
        assert_eq!(result.unwrap().title, Value::from(name));
    }
}

#[tokio::test]
async fn failed_inner_reference_nulls_only_its_outer_reference() {
    let f = fixture_with(
        Registry::new()
            .with_resolver(Binding::from_fn(["fail"], |_, _| {
                Err(Error::resolver_custom("fail", "Runtime error"))
            }))
            .unwrap(),
    );

    let result = f
        .engine
        .resolve(
            &ctx(&[("x", "sibling")]),
            &page(
                r#"{"template": "t", "config": {
                    "a": {"$source": ["context", "urlparams", {"$source": ["fail"]}]},
                    "b": {"$source": ["context", "urlparams", "x"]},
                    "c": {"$source": ["context", "urlparams", {"$source": ["context", "urlparams", "absent"]}]}
                }}"#,
            ),
        )
        .await
        .unwrap();

    assert_eq!(result.config["a"], Value::Null);
    assert_eq!(result.config["b"], Value::from("sibling"));
    assert_eq!(result.config["c"], Value::Null);
}

#[tokio::test(start_paused = true)]
async fn per_request_resolvers_do_not_serialize_requests() {
    let registry = Registry::new()
        .with_resolver(
            Binding::from_async_fn(["slow"], |_, _| async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, Error>(Value::from("done"))
            })
            .with_cache_policy(CachePolicy::PerRequest),
        )
        .unwrap();
    let engine = Engine::new(registry);
    let details = page(r#"{"template": "t", "title": {"$source": ["slow"]}}"#);
    let contexts: Vec<_> = (0..4).map(|_| ctx(&[])).collect();

    let started = tokio::time::Instant::now();
    let results =
        futures::future::join_all(contexts.iter().map(|c| engine.resolve(c, &details))).await;

    assert!(started.elapsed() < Duration::from_secs(2));
    for result in results {
        assert_eq!(result.unwrap().title, Value::from("done"));
    }
}

#[tokio::test(start_paused = true)]
async fn cancelled_resolve_still_purges_per_request_values() {
    let f = fixture_with(
        Registry::new()
            .with_resolver(Binding::from_async_fn(["slow"], |_, _| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, Error>(Value::from("late"))
            }))
            .unwrap(),
    );
    let details = page(
        r#"{
            "template": "t",
            "title": {"$source": ["context", "urlparams", "foo"]},
            "config": {"s": {"$source": ["slow"]}}
        }"#,
    );
    let request = ctx(&[("foo", "fast")]);

    let outcome =
        tokio::time::timeout(Duration::from_secs(1), f.engine.resolve(&request, &details)).await;

    assert!(outcome.is_err());
    assert_eq!(f.param_calls.load(Ordering::SeqCst), 1);
    assert!(f.engine.cache().is_empty());
}
