pub mod api;
pub mod grafana;
pub mod instrument;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::Request;
use axum::http::{header, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, on, options, MethodFilter, MethodRouter};
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use self::api::{ApiHandler, Endpoint};
use self::instrument::RouteTable;
use crate::config::bind_address;
use crate::metrics::Metrics;
use crate::version;

/// Builds the full API router.
///
/// Business endpoints are delegated to `api`; health, version, metrics
/// exposition and the Grafana connection test are served here.
pub fn build_router<A: ApiHandler>(api: Arc<A>, metrics: Arc<Metrics>) -> Router {
    let exposition = Arc::clone(&metrics);

    RouteTable::new(metrics)
        // API endpoints
        .route("/v1/event", "/v1/event", delegate(MethodFilter::POST, &api, Endpoint::AddEvent))
        .route("/v1/event", "/v1/event", delegate(MethodFilter::GET, &api, Endpoint::GetEvent))
        .route(
            "/v1/event/{id}",
            "/v1/event",
            delegate(MethodFilter::GET, &api, Endpoint::GetEventById),
        )
        .route("/v1/topic", "/v1/topic", delegate(MethodFilter::POST, &api, Endpoint::AddTopic))
        .route(
            "/v1/topic/{name}",
            "/v1/topic",
            delegate(MethodFilter::PUT, &api, Endpoint::UpdateTopic),
        )
        .route("/v1/topic", "/v1/topic", delegate(MethodFilter::GET, &api, Endpoint::GetTopic))
        .route(
            "/v1/topic/{name}",
            "/v1/topic",
            delegate(MethodFilter::DELETE, &api, Endpoint::DeleteTopic),
        )
        .route("/v1/dc", "/v1/dc", delegate(MethodFilter::POST, &api, Endpoint::AddDc))
        .route(
            "/v1/dc/{name}",
            "/v1/dc",
            delegate(MethodFilter::PUT, &api, Endpoint::UpdateDc),
        )
        .route("/v1/dc", "/v1/dc", delegate(MethodFilter::GET, &api, Endpoint::GetDc))
        .route("/v1/health", "/v1/health", get(health))
        // GitHub webhook endpoint
        .route(
            "/v1/github_event",
            "/v1/github_event",
            delegate(MethodFilter::POST, &api, Endpoint::GitHubEvent),
        )
        // UI endpoints
        .route("/", "/", delegate(MethodFilter::GET, &api, Endpoint::MainPage))
        .route("/add_event", "/add_event", delegate(MethodFilter::GET, &api, Endpoint::CreatePage))
        .route("/topic", "/topic", delegate(MethodFilter::GET, &api, Endpoint::TopicPage))
        .route("/dc", "/dc", delegate(MethodFilter::GET, &api, Endpoint::DcPage))
        .route("/event", "/event", delegate(MethodFilter::GET, &api, Endpoint::EventPage))
        // grafana datasource endpoints
        .route("/grafana", "/grafana", with_cors(get(grafana::ok)))
        .route("/grafana/", "/grafana/", with_cors(get(grafana::ok)))
        .route("/grafana/{route}", "/grafana", with_cors(options(grafana::ok)))
        .route(
            "/grafana/annotations",
            "/grafana/annotations",
            with_cors(delegate(MethodFilter::POST, &api, Endpoint::GrafanaAnnotations)),
        )
        .route("/grafana/annotations", "/grafana", with_cors(options(grafana::ok)))
        .route(
            "/grafana/search",
            "/grafana/search",
            with_cors(delegate(MethodFilter::POST, &api, Endpoint::GrafanaSearch)),
        )
        .route("/grafana/search", "/grafana", with_cors(options(grafana::ok)))
        .route(
            "/metrics",
            "/metrics",
            get(move || {
                let metrics = Arc::clone(&exposition);
                async move { metrics_text(&metrics) }
            }),
        )
        .route("/version/", "/version/", get(version_info))
        .into_router()
}

/// Routes `filter` requests to the external handler for `endpoint`.
fn delegate<A: ApiHandler>(filter: MethodFilter, api: &Arc<A>, endpoint: Endpoint) -> MethodRouter {
    let api = Arc::clone(api);
    on(filter, move |request: Request| {
        let api = Arc::clone(&api);
        async move { api.handle(endpoint, request).await }
    })
}

fn with_cors(handler: MethodRouter) -> MethodRouter {
    handler.layer(middleware::from_fn(grafana::cors))
}

/// GET /v1/health
async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// GET /version/
async fn version_info() -> Json<serde_json::Value> {
    Json(json!({
        "version": version::RELEASE,
        "commit": version::git_commit(),
    }))
}

/// GET /metrics - Prometheus text format.
fn metrics_text(metrics: &Metrics) -> Response {
    match metrics.encode_text() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "encoding metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "encoding error").into_response()
        }
    }
}

/// HTTP API server lifecycle.
pub struct HttpServer {
    addr: String,
    router: Router,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,
}

impl HttpServer {
    pub fn new(addr: &str, router: Router) -> Self {
        Self {
            addr: addr.to_string(),
            router,
            shutdown: parking_lot::Mutex::new(None),
        }
    }

    /// Binds the listener and serves in the background.
    ///
    /// Returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr> {
        let bind_addr = bind_address(&self.addr);

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        let app = self.router.clone();

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "http server started");

            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
            })
            .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "http server error");
            }
        });

        Ok(local_addr)
    }

    /// Gracefully shuts down the server.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }

        Ok(())
    }
}
