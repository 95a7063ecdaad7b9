use std::sync::{Arc, Mutex};
use std::time::Duration;

use accept::accept::AcceptService;
use accept::callback::{CallbackCountPolicy, CallbackNotifier};
use accept::dedup::DedupGate;
use accept::redis::MockRedisClient;
use accept::router::router;
use accept::window::WindowCounter;
use assert_json_diff::assert_json_eq;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use health::HealthRegistry;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tower::ServiceExt;

struct TestApp {
    app: Router,
    service: Arc<AcceptService>,
    redis: MockRedisClient,
}

impl TestApp {
    fn new(policy: CallbackCountPolicy) -> Self {
        let redis = MockRedisClient::new();
        let gate = DedupGate::new(
            Arc::new(redis.clone()),
            "request:".to_string(),
            Duration::from_secs(60),
        );
        let notifier = CallbackNotifier::new(Duration::from_secs(5), 16, policy)
            .expect("failed to build notifier");
        let service = Arc::new(AcceptService::new(
            gate,
            Arc::new(WindowCounter::new()),
            notifier,
        ));
        let app = router(service.clone(), HealthRegistry::new("liveness"), None);

        Self {
            app,
            service,
            redis,
        }
    }

    async fn get(&self, uri: &str) -> (StatusCode, String) {
        let response = self
            .app
            .clone()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }
}

/// Throwaway callback endpoint collecting every JSON body it receives.
async fn start_callback_endpoint() -> (String, Arc<Mutex<Vec<Value>>>) {
    let received: Arc<Mutex<Vec<Value>>> = Default::default();
    let bodies = received.clone();
    let app = Router::new().route(
        "/cb",
        post(move |Json(body): Json<Value>| {
            let bodies = bodies.clone();
            async move {
                bodies.lock().unwrap().push(body);
                StatusCode::OK
            }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    (format!("http://{addr}/cb"), received)
}

#[tokio::test]
async fn duplicate_id_is_rejected() {
    let app = TestApp::new(CallbackCountPolicy::Live);

    assert_eq!(
        app.get("/api/verve/accept?id=1").await,
        (StatusCode::OK, "ok".to_string())
    );
    assert_eq!(
        app.get("/api/verve/accept?id=1").await,
        (StatusCode::INTERNAL_SERVER_ERROR, "failed".to_string())
    );
    assert_eq!(app.service.counter().snapshot_count(), 1);
}

#[tokio::test]
async fn unique_ids_are_drained_together() {
    let app = TestApp::new(CallbackCountPolicy::Live);

    for id in 1..=3 {
        let (status, _) = app.get(&format!("/api/verve/accept?id={id}")).await;
        assert_eq!(status, StatusCode::OK);
    }

    assert_eq!(app.service.counter().drain(), 3);
    assert_eq!(app.service.counter().snapshot_count(), 0);
}

#[tokio::test]
async fn malformed_requests_have_no_side_effects() {
    let app = TestApp::new(CallbackCountPolicy::Live);

    for (uri, message) in [
        ("/api/verve/accept", "id is required"),
        ("/api/verve/accept?id=", "id is required"),
        ("/api/verve/accept?id=abc", "invalid id"),
        ("/api/verve/accept?id=9999999999999999999999", "invalid id"),
    ] {
        assert_eq!(
            app.get(uri).await,
            (StatusCode::BAD_REQUEST, message.to_string()),
            "{uri}"
        );
    }

    let (status, _) = app
        .get("/api/verve/accept?id=4&endpoint=not%20a%20url")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // The rejected endpoint did not burn the dedup slot for id 4
    assert_eq!(app.redis.get("request:4"), None);
    assert_eq!(app.service.counter().snapshot_count(), 0);
    let (status, _) = app.get("/api/verve/accept?id=4").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn store_outage_fails_closed() {
    let app = TestApp::new(CallbackCountPolicy::Live);
    app.redis.set_unavailable(true);

    assert_eq!(
        app.get("/api/verve/accept?id=1").await,
        (StatusCode::INTERNAL_SERVER_ERROR, "failed".to_string())
    );
    assert_eq!(app.service.counter().snapshot_count(), 0);

    app.redis.set_unavailable(false);
    let (status, _) = app.get("/api/verve/accept?id=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.service.counter().snapshot_count(), 1);
}

#[tokio::test]
async fn concurrent_duplicates_are_counted_once() {
    let app = Arc::new(TestApp::new(CallbackCountPolicy::Live));

    let mut set = JoinSet::new();
    for _ in 0..32 {
        let app = app.clone();
        set.spawn(async move { app.get("/api/verve/accept?id=77").await.0 });
    }

    let mut ok = 0;
    while let Some(status) = set.join_next().await {
        if status.unwrap() == StatusCode::OK {
            ok += 1;
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(app.service.counter().snapshot_count(), 1);
}

#[tokio::test]
async fn callback_receives_live_count() {
    let app = TestApp::new(CallbackCountPolicy::Live);
    let (endpoint, received) = start_callback_endpoint().await;

    app.get("/api/verve/accept?id=1").await;
    app.get("/api/verve/accept?id=2").await;
    let (status, body) = app
        .get(&format!("/api/verve/accept?id=5&endpoint={endpoint}"))
        .await;
    assert_eq!((status, body.as_str()), (StatusCode::OK, "ok"));

    assert!(
        app.service
            .notifier()
            .shutdown(Duration::from_secs(5))
            .await
    );
    let bodies = received.lock().unwrap().clone();
    assert_eq!(bodies.len(), 1);
    assert_json_eq!(bodies[0].clone(), json!({"count": 3}));
}

#[tokio::test]
async fn callback_with_last_window_policy() {
    let app = TestApp::new(CallbackCountPolicy::LastWindow);
    let (endpoint, received) = start_callback_endpoint().await;

    app.get("/api/verve/accept?id=1").await;
    app.get("/api/verve/accept?id=2").await;
    app.service.counter().drain();
    app.get(&format!("/api/verve/accept?id=3&endpoint={endpoint}"))
        .await;

    assert!(
        app.service
            .notifier()
            .shutdown(Duration::from_secs(5))
            .await
    );
    let bodies = received.lock().unwrap().clone();
    assert_eq!(bodies, vec![json!({"count": 2})]);
}

#[tokio::test]
async fn accept_does_not_wait_for_a_hanging_callback() {
    let app = TestApp::new(CallbackCountPolicy::Live);

    let received: Arc<Mutex<Vec<Value>>> = Default::default();
    let release = Arc::new(Notify::new());
    let endpoint = {
        let received = received.clone();
        let release = release.clone();
        let callback_app = Router::new().route(
            "/cb",
            post(move |Json(body): Json<Value>| {
                let received = received.clone();
                let release = release.clone();
                async move {
                    received.lock().unwrap().push(body);
                    release.notified().await;
                    StatusCode::OK
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, callback_app).await.unwrap() });
        format!("http://{addr}/cb")
    };

    let response = tokio::time::timeout(
        Duration::from_secs(2),
        app.get(&format!("/api/verve/accept?id=1&endpoint={endpoint}")),
    )
    .await
    .expect("accept blocked on the callback endpoint");
    assert_eq!(response, (StatusCode::OK, "ok".to_string()));

    // The callback reached the endpoint and is still being held there
    while received.lock().unwrap().is_empty() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!app.service.notifier().shutdown(Duration::from_millis(100)).await);

    release.notify_one();
    assert!(app.service.notifier().shutdown(Duration::from_secs(5)).await);
    assert_json_eq!(received.lock().unwrap()[0].clone(), json!({"count": 1}));
}

#[tokio::test]
async fn rejected_event_triggers_no_callback() {
    let app = TestApp::new(CallbackCountPolicy::Live);
    let (endpoint, received) = start_callback_endpoint().await;

    app.get("/api/verve/accept?id=1").await;
    let (status, _) = app
        .get(&format!("/api/verve/accept?id=1&endpoint={endpoint}"))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    assert!(
        app.service
            .notifier()
            .shutdown(Duration::from_secs(5))
            .await
    );
    assert!(received.lock().unwrap().is_empty());
}

#[tokio::test]
async fn health_routes() {
    let app = TestApp::new(CallbackCountPolicy::Live);

    assert_eq!(app.get("/").await, (StatusCode::OK, "accept".to_string()));
    assert_eq!(
        app.get("/_readiness").await,
        (StatusCode::OK, "ready".to_string())
    );
    // Nothing registered in this registry, so liveness fails
    let (status, _) = app.get("/_liveness").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}
