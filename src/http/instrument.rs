//! Per-route latency/status instrumentation and request logging.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::MethodRouter;
use axum::Router;
use tracing::info;

use crate::metrics::{ms_since, Metrics};

/// Builder for a router whose every route is instrumented.
///
/// [`RouteTable::route`] is the only way to add a route, and it always wraps
/// the handler, so no route escapes latency and status recording.
pub struct RouteTable {
    router: Router,
    metrics: Arc<Metrics>,
}

impl RouteTable {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            router: Router::new(),
            metrics,
        }
    }

    /// Adds `handler` at `path`, recording its metrics under `label`.
    ///
    /// The same path may be added several times with disjoint methods, each
    /// under its own label.
    pub fn route(mut self, path: &str, label: &'static str, handler: MethodRouter) -> Self {
        let instrument = RouteInstrument {
            label,
            metrics: Arc::clone(&self.metrics),
        };
        self.router = self.router.route(
            path,
            handler.layer(middleware::from_fn_with_state(instrument, track)),
        );
        self
    }

    /// Finishes the table, adding the outer request logger.
    pub fn into_router(self) -> Router {
        self.router.layer(middleware::from_fn(log_requests))
    }
}

#[derive(Clone)]
struct RouteInstrument {
    label: &'static str,
    metrics: Arc<Metrics>,
}

async fn track(State(route): State<RouteInstrument>, req: Request, next: Next) -> Response {
    let mut timer = RequestTimer::start(route);
    let response = next.run(req).await;
    timer.status = Some(response.status());
    response
}

/// Per-request context: start time plus the captured status.
///
/// Metrics are written on drop, so a handler that unwinds or is cancelled
/// still produces one latency sample and one counter increment (as 500).
struct RequestTimer {
    route: RouteInstrument,
    start: Instant,
    status: Option<StatusCode>,
}

impl RequestTimer {
    fn start(route: RouteInstrument) -> Self {
        Self {
            route,
            start: Instant::now(),
            status: None,
        }
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        let code = self
            .status
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .as_u16();
        let metrics = &self.route.metrics;
        metrics.http_latency(self.route.label, self.start);
        metrics.http_status(self.route.label, code);
    }
}

/// Logs method, path, status and duration of every request.
pub async fn log_requests(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = ms_since(start),
        "request",
    );

    response
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::routing::{get, post};
    use tower::ServiceExt;

    use super::*;

    fn request(method: &str, uri: &str) -> Request {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .expect("valid request")
    }

    #[tokio::test]
    async fn test_every_request_counted_once() {
        let metrics = Arc::new(Metrics::new().expect("metrics"));
        let app = RouteTable::new(Arc::clone(&metrics))
            .route("/ok", "/ok", get(|| async { "fine" }))
            .route(
                "/missing",
                "/missing",
                get(|| async { (StatusCode::NOT_FOUND, "nope") }),
            )
            .into_router();

        for _ in 0..3 {
            let resp = app.clone().oneshot(request("GET", "/ok")).await.expect("response");
            assert_eq!(resp.status(), StatusCode::OK);
        }
        let resp = app
            .clone()
            .oneshot(request("GET", "/missing"))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let latency = |label: &str| {
            metrics
                .http_request_latency
                .with_label_values(&[label])
                .get_sample_count()
        };
        let responses = |label: &str, code: &str| {
            metrics.http_responses.with_label_values(&[label, code]).get()
        };

        assert_eq!(latency("/ok"), 3);
        assert_eq!(responses("/ok", "200"), 3.0);
        assert_eq!(latency("/missing"), 1);
        assert_eq!(responses("/missing", "404"), 1.0);
    }

    #[tokio::test]
    async fn test_same_path_different_labels() {
        let metrics = Arc::new(Metrics::new().expect("metrics"));
        let app = RouteTable::new(Arc::clone(&metrics))
            .route("/thing", "/thing/write", post(|| async { StatusCode::CREATED }))
            .route("/thing", "/thing/read", get(|| async { "thing" }))
            .into_router();

        let resp = app
            .clone()
            .oneshot(request("POST", "/thing"))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::CREATED);
        let resp = app.oneshot(request("GET", "/thing")).await.expect("response");
        assert_eq!(resp.status(), StatusCode::OK);

        assert_eq!(
            metrics
                .http_responses
                .with_label_values(&["/thing/write", "201"])
                .get(),
            1.0
        );
        assert_eq!(
            metrics
                .http_responses
                .with_label_values(&["/thing/read", "200"])
                .get(),
            1.0
        );
    }

    #[test]
    fn test_dropped_timer_counts_as_server_error() {
        let metrics = Arc::new(Metrics::new().expect("metrics"));
        let timer = RequestTimer::start(RouteInstrument {
            label: "/panics",
            metrics: Arc::clone(&metrics),
        });
        drop(timer);

        assert_eq!(
            metrics
                .http_responses
                .with_label_values(&["/panics", "500"])
                .get(),
            1.0
        );
        assert_eq!(
            metrics
                .http_request_latency
                .with_label_values(&["/panics"])
                .get_sample_count(),
            1
        );
    }
}
