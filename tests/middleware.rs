use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::{json, Value};

use gateway_cbreaker::config::{ExtraConfig, NAMESPACE};
use gateway_cbreaker::proxy::{
    backend_factory, proxy_fn, Backend, BoxError, BreakerError, Metadata, Middleware, Proxy,
    Request, Response,
};
use gateway_cbreaker::{Registry, Rejection, State};

#[derive(Debug, thiserror::Error)]
#[error("backend down")]
struct BackendDown;

#[tokio::test]
async fn disabled_config_is_a_passthrough() {
    let registry = Registry::new();

    for backend in [Backend::default(), backend(json!(42))] {
        let calls = Arc::new(AtomicUsize::new(0));
        let expected = response(200);
        let proxy = wrap(&registry, &backend, counting(&calls, ok(expected.clone())));

        for i in 0..100 {
            let res = proxy(request()).await.unwrap();
            assert_eq!(expected, res);
            assert_eq!(i + 1, calls.load(Ordering::SeqCst));
        }

        let failing = wrap(&registry, &backend, counting(&calls, fail()));
        for _ in 0..10 {
            let err = failing(request()).await.unwrap_err();
            assert!(err.downcast_ref::<BackendDown>().is_some());
        }
    }

    assert!(registry.is_empty());
}

#[tokio::test]
async fn failing_backend_opens_the_circuit() {
    let registry = Registry::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let proxy = wrap(
        &registry,
        &backend(json!({
            "command_name": "test500",
            "sleep_window": 1000.0,
            "max_concurrent_requests": 10.0,
            "error_percent_threshold": 1.0,
            "request_volume_threshold": 1.0,
            "timeout": 1000.0,
        })),
        counting(&calls, fail()),
    );

    let err = proxy(request()).await.unwrap_err();
    assert!(err.downcast_ref::<BackendDown>().is_some());
    assert_eq!(State::Open, breaker_state(&registry, "test500"));

    let err = proxy(request()).await.unwrap_err();
    assert_rejected(&err, Rejection::CircuitOpen);
    assert_eq!(1, calls.load(Ordering::SeqCst));
}

#[tokio::test]
async fn healthy_backend_keeps_the_circuit_closed() {
    let registry = Registry::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let expected = response(200);
    let proxy = wrap(
        &registry,
        &backend(json!({
            "command_name": "test200",
            "timeout": 1000.0,
            "max_concurrent_requests": 100.0,
            "error_percent_threshold": 1.0,
        })),
        counting(&calls, ok(expected.clone())),
    );

    for _ in 0..100 {
        assert_eq!(expected, proxy(request()).await.unwrap());
        assert_eq!(State::Closed, breaker_state(&registry, "test200"));
    }
    assert_eq!(100, calls.load(Ordering::SeqCst));
}

#[tokio::test]
async fn trips_once_volume_and_rate_are_reached() {
    let registry = Registry::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    // Two successes, then failures.
    let proxy = wrap(
        &registry,
        &backend(json!({
            "command_name": "volume",
            "request_volume_threshold": 4,
            "error_percent_threshold": 50,
            "sleep_window": 10000,
        })),
        proxy_fn(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Ok(response(200))
                } else {
                    Err(BoxError::from(BackendDown))
                }
            }
        }),
    );

    for _ in 0..2 {
        proxy(request()).await.unwrap();
    }
    assert!(proxy(request()).await.is_err());
    assert_eq!(State::Closed, breaker_state(&registry, "volume"));

    // 2 failures out of 4 calls.
    assert!(proxy(request()).await.is_err());
    assert_eq!(State::Open, breaker_state(&registry, "volume"));

    for _ in 0..5 {
        let err = proxy(request()).await.unwrap_err();
        assert_rejected(&err, Rejection::CircuitOpen);
    }
    assert_eq!(4, calls.load(Ordering::SeqCst));
}

#[tokio::test]
async fn concurrent_calls_are_capped() {
    let registry = Registry::new();
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let proxy = {
        let running = running.clone();
        let peak = peak.clone();
        wrap(
            &registry,
            &backend(json!({
                "command_name": "capped",
                "max_concurrent_requests": 10,
            })),
            proxy_fn(move |_| {
                let running = running.clone();
                let peak = peak.clone();
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(response(200))
                }
            }),
        )
    };

    let results = join_all((0..30).map(|_| proxy(request()))).await;

    let admitted = results.iter().filter(|res| res.is_ok()).count();
    assert_eq!(10, admitted);
    for err in results.iter().filter_map(|res| res.as_ref().err()) {
        assert_rejected(err, Rejection::MaxConcurrency);
    }
    assert!(peak.load(Ordering::SeqCst) <= 10);
    assert_eq!(0, registry.get("capped").unwrap().in_flight());
}

#[tokio::test]
async fn successful_probe_closes_the_circuit() {
    let registry = Registry::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let healthy = Arc::new(AtomicBool::new(false));
    let proxy = wrap(&registry, &probing_backend("probe_ok"), toggled(&calls, &healthy));

    assert!(proxy(request()).await.is_err());
    assert_eq!(State::Open, breaker_state(&registry, "probe_ok"));

    tokio::time::sleep(Duration::from_millis(150)).await;
    healthy.store(true, Ordering::SeqCst);

    let results = join_all((0..5).map(|_| proxy(request()))).await;
    assert_eq!(1, results.iter().filter(|res| res.is_ok()).count());
    for err in results.iter().filter_map(|res| res.as_ref().err()) {
        assert_rejected(err, Rejection::CircuitOpen);
    }
    assert_eq!(2, calls.load(Ordering::SeqCst));

    let breaker = registry.get("probe_ok").unwrap();
    assert_eq!(State::Closed, breaker.state());
    assert_eq!(0, breaker.metrics().requests);

    proxy(request()).await.unwrap();
    assert_eq!(3, calls.load(Ordering::SeqCst));
}

#[tokio::test]
async fn failed_probe_reopens_the_circuit() {
    let registry = Registry::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let healthy = Arc::new(AtomicBool::new(false));
    let proxy = wrap(&registry, &probing_backend("probe_ko"), toggled(&calls, &healthy));

    assert!(proxy(request()).await.is_err());
    tokio::time::sleep(Duration::from_millis(150)).await;

    let err = proxy(request()).await.unwrap_err();
    assert!(err.downcast_ref::<BackendDown>().is_some());
    assert_eq!(State::Open, breaker_state(&registry, "probe_ko"));

    // The sleep window starts over.
    let err = proxy(request()).await.unwrap_err();
    assert_rejected(&err, Rejection::CircuitOpen);
    assert_eq!(2, calls.load(Ordering::SeqCst));

    tokio::time::sleep(Duration::from_millis(150)).await;
    healthy.store(true, Ordering::SeqCst);
    proxy(request()).await.unwrap();
    assert_eq!(State::Closed, breaker_state(&registry, "probe_ko"));
}

#[tokio::test]
async fn failure_status_counts_without_transport_error() {
    let registry = Registry::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let expected = response(500);
    let proxy = wrap(
        &registry,
        &backend(json!({
            "command_name": "status_quiet",
            "surface_status_error": false,
            "request_volume_threshold": 3,
            "error_percent_threshold": 50,
            "sleep_window": 10000,
        })),
        counting(&calls, ok(expected.clone())),
    );

    for i in 0..3 {
        assert_eq!(expected, proxy(request()).await.unwrap());
        assert_eq!(i + 1, registry.get("status_quiet").unwrap().metrics().failures);
    }
    assert_eq!(State::Open, breaker_state(&registry, "status_quiet"));

    let err = proxy(request()).await.unwrap_err();
    assert_rejected(&err, Rejection::CircuitOpen);
    assert_eq!(3, calls.load(Ordering::SeqCst));
}

#[tokio::test]
async fn failure_status_is_surfaced_with_the_response() {
    let registry = Registry::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let expected = response(500);
    let proxy = wrap(
        &registry,
        &backend(json!({
            "command_name": "status_loud",
            "request_volume_threshold": 2,
        })),
        counting(&calls, ok(expected.clone())),
    );

    let err = proxy(request()).await.unwrap_err();
    match err.downcast_ref::<BreakerError>() {
        Some(BreakerError::FailureStatus(response)) => assert_eq!(&expected, &**response),
        other => panic!("unexpected error: {:?}", other),
    }

    let err = proxy(request()).await.unwrap_err();
    let status = err
        .downcast_ref::<BreakerError>()
        .and_then(|err| err.response())
        .map(|response| response.metadata.status_code);
    assert_eq!(Some(500), status);
    assert_eq!(State::Open, breaker_state(&registry, "status_loud"));
}

#[tokio::test]
async fn suppressed_backend_errors_still_trip_the_circuit() {
    let registry = Registry::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let proxy = wrap(
        &registry,
        &backend(json!({
            "command_name": "swallow",
            "suppress_backend_errors": true,
            "request_volume_threshold": 2,
            "sleep_window": 10000,
        })),
        counting(&calls, fail()),
    );

    for i in 0..2 {
        let res = proxy(request()).await.unwrap();
        assert_eq!(Response::default(), res);
        assert!(!res.is_complete);
        assert_eq!(i + 1, registry.get("swallow").unwrap().metrics().failures);
    }
    assert_eq!(State::Open, breaker_state(&registry, "swallow"));

    // Rejections are reported whatever the propagation.
    let err = proxy(request()).await.unwrap_err();
    assert_rejected(&err, Rejection::CircuitOpen);
    assert_eq!(2, calls.load(Ordering::SeqCst));
}

#[tokio::test]
async fn strict_mode_returns_failure_statuses_untouched() {
    let registry = Registry::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let expected = response(500);
    let proxy = wrap(
        &registry,
        &backend(json!({
            "command_name": "strict",
            "propagation": "strict",
            "request_volume_threshold": 1,
        })),
        counting(&calls, ok(expected.clone())),
    );

    for _ in 0..10 {
        assert_eq!(expected, proxy(request()).await.unwrap());
    }
    assert_eq!(State::Closed, breaker_state(&registry, "strict"));
    assert_eq!(10, calls.load(Ordering::SeqCst));
}

#[tokio::test]
async fn wrappers_sharing_a_command_name_share_the_breaker() {
    let registry = Registry::new();
    let failing_calls = Arc::new(AtomicUsize::new(0));
    let healthy_calls = Arc::new(AtomicUsize::new(0));
    let config = json!({
        "command_name": "shared",
        "request_volume_threshold": 1,
        "sleep_window": 10000,
    });

    let failing = wrap(&registry, &backend(config.clone()), counting(&failing_calls, fail()));
    let mut other = backend(config);
    other.url_pattern = "/other".to_string();
    let healthy = wrap(&registry, &other, counting(&healthy_calls, ok(response(200))));

    assert!(failing(request()).await.is_err());

    let err = healthy(request()).await.unwrap_err();
    assert_rejected(&err, Rejection::CircuitOpen);
    assert_eq!(0, healthy_calls.load(Ordering::SeqCst));
    assert_eq!(1, registry.len());
}

#[tokio::test]
async fn slow_backend_times_out() {
    let registry = Registry::new();
    let proxy = wrap(
        &registry,
        &backend(json!({
            "command_name": "slow",
            "timeout": 20,
            "request_volume_threshold": 1,
        })),
        proxy_fn(|_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(response(200))
        }),
    );

    let err = proxy(request()).await.unwrap_err();
    match err.downcast_ref::<BreakerError>() {
        Some(BreakerError::Timeout(timeout)) => assert_eq!(Duration::from_millis(20), *timeout),
        other => panic!("unexpected error: {:?}", other),
    }

    let breaker = registry.get("slow").unwrap();
    assert_eq!(State::Open, breaker.state());
    assert_eq!(0, breaker.in_flight());
}

#[tokio::test]
async fn cancelled_call_releases_its_slot() {
    let registry = Registry::new();
    let proxy = wrap(
        &registry,
        &backend(json!({
            "command_name": "cancelled",
            "max_concurrent_requests": 1,
        })),
        proxy_fn(|_| futures::future::pending()),
    );

    let cancelled = tokio::time::timeout(Duration::from_millis(10), proxy(request())).await;
    assert!(cancelled.is_err());

    let breaker = registry.get("cancelled").unwrap();
    assert_eq!(0, breaker.in_flight());
    assert_eq!(0, breaker.metrics().requests);

    // The single slot is free again.
    let cancelled = tokio::time::timeout(Duration::from_millis(10), proxy(request())).await;
    assert!(cancelled.is_err());
}

#[tokio::test]
async fn backend_factory_protects_configured_backends() {
    let registry = Arc::new(Registry::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let next = {
        let calls = calls.clone();
        Arc::new(move |_: &Backend| counting(&calls, fail())) as gateway_cbreaker::proxy::BackendFactory
    };
    let factory = backend_factory(registry.clone(), next);

    let plain = factory(&Backend::default());
    for _ in 0..3 {
        assert!(plain(request()).await.is_err());
    }
    assert!(registry.is_empty());

    let protected = factory(&backend(json!({
        "command_name": "factory",
        "request_volume_threshold": 1,
    })));
    assert!(protected(request()).await.is_err());
    let err = protected(request()).await.unwrap_err();
    assert_rejected(&err, Rejection::CircuitOpen);
    assert_eq!(4, calls.load(Ordering::SeqCst));
}

fn wrap(registry: &Registry, backend: &Backend, next: Proxy) -> Proxy {
    Middleware::new(registry, backend).wrap(vec![next]).unwrap()
}

fn backend(block: Value) -> Backend {
    let mut extra_config = ExtraConfig::new();
    extra_config.insert(NAMESPACE.to_string(), block);
    Backend {
        url_pattern: "/tupu".to_string(),
        extra_config,
        ..Backend::default()
    }
}

fn probing_backend(command_name: &str) -> Backend {
    backend(json!({
        "command_name": command_name,
        "request_volume_threshold": 1,
        "error_percent_threshold": 1,
        "sleep_window": 100,
    }))
}

fn request() -> Request {
    Request {
        method: "GET".to_string(),
        path: "/tupu".to_string(),
        ..Request::default()
    }
}

fn response(status_code: u16) -> Response {
    let mut data = serde_json::Map::new();
    data.insert("status".to_string(), json!(status_code));
    Response {
        data,
        is_complete: true,
        metadata: Metadata {
            status_code,
            ..Metadata::default()
        },
    }
}

fn ok(response: Response) -> impl Fn() -> Result<Response, BoxError> + Send + Sync + 'static {
    move || Ok(response.clone())
}

fn fail() -> impl Fn() -> Result<Response, BoxError> + Send + Sync + 'static {
    || Err(BackendDown.into())
}

fn counting<F>(calls: &Arc<AtomicUsize>, result: F) -> Proxy
where
    F: Fn() -> Result<Response, BoxError> + Send + Sync + 'static,
{
    let calls = calls.clone();
    proxy_fn(move |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        let result = result();
        async move { result }
    })
}

/// Fails until `healthy` is set; each call takes a little while.
fn toggled(calls: &Arc<AtomicUsize>, healthy: &Arc<AtomicBool>) -> Proxy {
    let calls = calls.clone();
    let healthy = healthy.clone();
    proxy_fn(move |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        let healthy = healthy.load(Ordering::SeqCst);
        async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if healthy {
                Ok(response(200))
            } else {
                Err(BoxError::from(BackendDown))
            }
        }
    })
}

fn breaker_state(registry: &Registry, name: &str) -> State {
    registry.get(name).expect("breaker registered").state()
}

fn assert_rejected(err: &BoxError, rejection: Rejection) {
    match err.downcast_ref::<BreakerError>() {
        Some(BreakerError::Rejected(actual)) => assert_eq!(rejection, *actual),
        other => panic!("expected a rejection, got {:?}", other),
    }
}
