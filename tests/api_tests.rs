//! HTTP surface tests driven through the router without a socket
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use interlink::api;
use interlink::conflict::DetectOptions;
use interlink::settings::Settings;
use interlink::Hub;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn app(settings: Settings) -> (Router, Arc<Hub>) {
    let hub = Arc::new(Hub::new(settings).await.unwrap());
    (api::api(Arc::clone(&hub)), hub)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_and_about() {
    let (app, _hub) = app(Settings::default()).await;

    let response = app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(get("/about")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let about = body_json(response).await;
    assert_eq!(about["name"], "interlink");
    assert_eq!(about["rateLimitAlgorithm"], "sliding-window");
    assert_eq!(about["processingMode"], "priority");
    assert_eq!(about["persistence"], false);
}

#[tokio::test]
async fn test_publish_and_rate_limit() {
    let mut settings = Settings::default();
    settings.rate_limit.max_requests = 1;
    let (app, _hub) = app(settings).await;

    let event = json!({"type": "cart:add", "source": "shop", "data": {"sku": 7}});
    let response = app
        .clone()
        .oneshot(json_request("POST", "/events", event.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "delivered");
    assert_eq!(body["event"]["metadata"]["rateLimit"]["remaining"], 0);

    let response = app
        .clone()
        .oneshot(json_request("POST", "/events", event))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().get(header::RETRY_AFTER).is_some());
    let body = body_json(response).await;
    assert_eq!(body["error"]["type"], "intercepted");

    let response = app.oneshot(get("/rate-limits/cart:add:shop")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let decision = body_json(response).await;
    assert_eq!(decision["allowed"], false);
}

#[tokio::test]
async fn test_invalid_event_is_rejected() {
    let (app, _hub) = app(Settings::default()).await;
    let response = app
        .oneshot(json_request(
            "POST",
            "/events",
            json!({"type": "ping", "source": "  "}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_deferred_events_are_accepted() {
    let (app, hub) = app(Settings::default()).await;
    hub.defer_event_types(["report:build"]).await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/events",
            json!({"type": "report:build", "source": "admin"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert_eq!(body["stoppedBy"], "deferred-delivery");

    let response = app.oneshot(get("/queue/stats")).await.unwrap();
    let stats = body_json(response).await;
    assert_eq!(stats["totalQueued"], 1);
}

#[tokio::test]
async fn test_queue_routes() {
    let (app, _hub) = app(Settings::default()).await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/queue/messages",
            json!({"type": "sync", "source": "mobile", "priority": "high"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let id = body_json(response).await["id"].as_str().unwrap().to_string();

    let response = app.clone().oneshot(get("/queue/messages")).await.unwrap();
    let messages = body_json(response).await;
    assert_eq!(messages[0]["id"], id.as_str());
    assert_eq!(messages[0]["priority"], "high");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/queue/messages/{}", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/queue/messages/{}", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_state_routes() {
    let (app, _hub) = app(Settings::default()).await;

    let response = app.clone().oneshot(get("/state/user.theme")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            "/state/user.theme",
            json!({"value": "dark", "source": "settings"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let commit = body_json(response).await;
    assert_eq!(commit["entry"]["version"], 1);

    let response = app.oneshot(get("/state/user.theme")).await.unwrap();
    let entry = body_json(response).await;
    assert_eq!(entry["value"], "dark");
    assert_eq!(entry["source"], "settings");
}

#[tokio::test]
async fn test_conflict_routes() {
    let (app, hub) = app(Settings::default()).await;
    let conflict = hub
        .resolver
        .detect_conflict("profile.name", json!("Ada"), json!(42), DetectOptions::default())
        .unwrap()
        .unwrap();

    let response = app.clone().oneshot(get("/conflicts")).await.unwrap();
    let pending = body_json(response).await;
    assert_eq!(pending[0]["id"], conflict.id.as_str());
    assert_eq!(pending[0]["conflictType"], "type-mismatch");

    let uri = api::paths::resolve_path(&conflict.id);
    let response = app
        .clone()
        .oneshot(json_request("POST", &uri, json!({"strategy": "user-choice"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &uri,
            json!({"strategy": "user-choice", "value": "Ada L."}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let resolution = body_json(response).await;
    assert_eq!(resolution["resolvedValue"], "Ada L.");

    let response = app
        .clone()
        .oneshot(json_request("POST", &uri, json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.oneshot(get("/conflicts/stats")).await.unwrap();
    let stats = body_json(response).await;
    assert_eq!(stats["resolved"], 1);
    assert_eq!(stats["failed"], 2);
}
