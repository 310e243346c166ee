use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use eventmaster::http::api::StoreApi;
use eventmaster::http::build_router;
use eventmaster::metrics::Metrics;
use eventmaster::store::{InstrumentedStore, MemoryStore};

fn app() -> (Router, Arc<Metrics>, Arc<MemoryStore>) {
    let metrics = Arc::new(Metrics::new().expect("metrics"));
    let store = Arc::new(MemoryStore::new());
    let api = Arc::new(StoreApi::new(InstrumentedStore::new(
        Arc::clone(&store),
        Arc::clone(&metrics),
    )));
    (build_router(api, Arc::clone(&metrics)), metrics, store)
}

fn request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn json_request(method: Method, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn responses(metrics: &Metrics, path: &str, code: &str) -> f64 {
    metrics.http_responses.with_label_values(&[path, code]).get()
}

fn latency_samples(metrics: &Metrics, path: &str) -> u64 {
    metrics
        .http_request_latency
        .with_label_values(&[path])
        .get_sample_count()
}

#[tokio::test]
async fn test_add_and_get_event() {
    let (app, metrics, store) = app();

    let resp = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/v1/event",
            r#"{"event_time": 1496318400, "topic_name": "deploy", "dc": "us-east-1", "host": "h1", "user": "ci"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let id = body_json(resp).await["event_id"]
        .as_str()
        .unwrap()
        .to_string();
    assert_eq!(store.len(), 1);

    let resp = app
        .clone()
        .oneshot(request(Method::GET, &format!("/v1/event/{id}")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["results"][0]["event_id"], id.as_str());
    assert_eq!(body["results"][0]["user"], "ci");

    let resp = app
        .clone()
        .oneshot(request(Method::GET, "/v1/event/ffffffffffffffff"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = app
        .oneshot(request(Method::GET, "/v1/event"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // All four requests share the "/v1/event" label.
    assert_eq!(latency_samples(&metrics, "/v1/event"), 4);
    assert_eq!(responses(&metrics, "/v1/event", "200"), 3.0);
    assert_eq!(responses(&metrics, "/v1/event", "404"), 1.0);
    assert_eq!(
        metrics
            .store_method_time
            .with_label_values(&["add_event"])
            .get_sample_count(),
        1
    );
}

#[tokio::test]
async fn test_invalid_event_counted_with_status() {
    let (app, metrics, store) = app();

    let resp = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/v1/event",
            r#"{"event_time": 1, "topic_name": "", "dc": "dc", "host": "h"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app
        .oneshot(json_request(Method::POST, "/v1/event", "not json"))
        .await
        .unwrap();
    assert!(resp.status().is_client_error());

    assert!(store.is_empty());
    assert_eq!(latency_samples(&metrics, "/v1/event"), 2);
    assert_eq!(responses(&metrics, "/v1/event", "400"), 2.0);
}

#[tokio::test]
async fn test_unimplemented_endpoints_still_instrumented() {
    let (app, metrics, _) = app();

    let cases = [
        (Method::GET, "/v1/topic", "/v1/topic"),
        (Method::DELETE, "/v1/topic/deploy", "/v1/topic"),
        (Method::PUT, "/v1/dc/us-east-1", "/v1/dc"),
        (Method::POST, "/v1/github_event", "/v1/github_event"),
        (Method::GET, "/", "/"),
        (Method::GET, "/event", "/event"),
    ];

    for (method, uri, _) in &cases {
        let resp = app
            .clone()
            .oneshot(request(method.clone(), uri))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED, "{method} {uri}");
    }

    for (_, _, label) in &cases {
        assert!(latency_samples(&metrics, label) >= 1, "{label}");
        assert!(responses(&metrics, label, "501") >= 1.0, "{label}");
    }
    assert_eq!(responses(&metrics, "/v1/topic", "501"), 2.0);
}

#[tokio::test]
async fn test_health_and_version() {
    let (app, metrics, _) = app();

    let resp = app
        .clone()
        .oneshot(request(Method::GET, "/v1/health"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["status"], "ok");

    let resp = app
        .oneshot(request(Method::GET, "/version/"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["version"], env!("CARGO_PKG_VERSION"));

    assert_eq!(responses(&metrics, "/v1/health", "200"), 1.0);
    assert_eq!(responses(&metrics, "/version/", "200"), 1.0);
}

#[tokio::test]
async fn test_grafana_routes_carry_cors() {
    let (app, metrics, _) = app();

    let cases = [
        (Method::GET, "/grafana", StatusCode::OK),
        (Method::GET, "/grafana/", StatusCode::OK),
        (Method::OPTIONS, "/grafana/query", StatusCode::OK),
        (Method::OPTIONS, "/grafana/search", StatusCode::OK),
        (Method::POST, "/grafana/search", StatusCode::NOT_IMPLEMENTED),
        (Method::POST, "/grafana/annotations", StatusCode::NOT_IMPLEMENTED),
    ];

    for (method, uri, status) in cases {
        let resp = app
            .clone()
            .oneshot(request(method.clone(), uri))
            .await
            .unwrap();
        assert_eq!(resp.status(), status, "{method} {uri}");
        let headers = resp.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*", "{method} {uri}");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "POST");
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_HEADERS],
            "accept, content-type"
        );
    }

    // OPTIONS preflights are grouped under "/grafana".
    assert_eq!(responses(&metrics, "/grafana", "200"), 3.0);
    assert_eq!(responses(&metrics, "/grafana/", "200"), 1.0);
    assert_eq!(responses(&metrics, "/grafana/search", "501"), 1.0);
    assert_eq!(responses(&metrics, "/grafana/annotations", "501"), 1.0);
}

#[tokio::test]
async fn test_metrics_exposition() {
    let (app, _, _) = app();

    let resp = app
        .clone()
        .oneshot(request(Method::GET, "/v1/health"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .oneshot(request(Method::GET, "/metrics"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains(
        "eventmaster_http_server_response_total{code=\"200\",path=\"/v1/health\"} 1"
    ));
    assert!(text.contains("eventmaster_http_server_request_latency_ms_bucket"));
}

#[tokio::test]
async fn test_unknown_route_not_counted() {
    let (app, metrics, _) = app();

    let resp = app
        .oneshot(request(Method::GET, "/nope"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(responses(&metrics, "/nope", "404"), 0.0);
}
