use std::future::Future;
use std::sync::Arc;

use axum::extract::{FromRequest, FromRequestParts, Path, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::event::Event;
use crate::store::{EventStore, InstrumentedStore, MemoryStore, StoreError};

/// Business endpoints served by an external [`ApiHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    AddEvent,
    GetEvent,
    GetEventById,
    AddTopic,
    UpdateTopic,
    GetTopic,
    DeleteTopic,
    AddDc,
    UpdateDc,
    GetDc,
    GitHubEvent,
    MainPage,
    CreatePage,
    TopicPage,
    DcPage,
    EventPage,
    GrafanaAnnotations,
    GrafanaSearch,
}

impl Endpoint {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AddEvent => "add_event",
            Self::GetEvent => "get_event",
            Self::GetEventById => "get_event_by_id",
            Self::AddTopic => "add_topic",
            Self::UpdateTopic => "update_topic",
            Self::GetTopic => "get_topic",
            Self::DeleteTopic => "delete_topic",
            Self::AddDc => "add_dc",
            Self::UpdateDc => "update_dc",
            Self::GetDc => "get_dc",
            Self::GitHubEvent => "github_event",
            Self::MainPage => "main_page",
            Self::CreatePage => "create_page",
            Self::TopicPage => "topic_page",
            Self::DcPage => "dc_page",
            Self::EventPage => "event_page",
            Self::GrafanaAnnotations => "grafana_annotations",
            Self::GrafanaSearch => "grafana_search",
        }
    }
}

/// Handles the business logic behind the API routes.
///
/// Path parameters (`{id}`, `{name}`) remain extractable from the request
/// with [`Path`].
pub trait ApiHandler: Send + Sync + 'static {
    fn handle(&self, endpoint: Endpoint, request: Request)
        -> impl Future<Output = Response> + Send;
}

/// Minimal handler backed by the in-memory store.
///
/// Serves event creation and lookup; every other endpoint answers
/// `501 Not Implemented`.
pub struct StoreApi {
    store: InstrumentedStore<Arc<MemoryStore>>,
}

impl StoreApi {
    pub fn new(store: InstrumentedStore<Arc<MemoryStore>>) -> Self {
        Self { store }
    }

    async fn add_event(&self, request: Request) -> Response {
        let Json(event) = match Json::<Event>::from_request(request, &()).await {
            Ok(event) => event,
            Err(rejection) => return rejection.into_response(),
        };

        match self.store.add_event(event).await {
            Ok(id) => (StatusCode::OK, Json(json!({ "event_id": id }))).into_response(),
            Err(StoreError::Invalid(msg)) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
            Err(e) => {
                error!(error = %e, "adding event");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": e.to_string() })),
                )
                    .into_response()
            }
        }
    }

    fn get_events(&self) -> Response {
        Json(json!({ "results": self.store.inner().events() })).into_response()
    }

    async fn get_event_by_id(&self, request: Request) -> Response {
        let (mut parts, _body) = request.into_parts();
        let id = match Path::<String>::from_request_parts(&mut parts, &()).await {
            Ok(Path(id)) => id,
            Err(rejection) => return rejection.into_response(),
        };

        match self.store.inner().get(&id) {
            Some(evt) => Json(json!({ "results": [evt] })).into_response(),
            None => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": format!("event {id} not found") })),
            )
                .into_response(),
        }
    }
}

impl ApiHandler for StoreApi {
    async fn handle(&self, endpoint: Endpoint, request: Request) -> Response {
        match endpoint {
            Endpoint::AddEvent => self.add_event(request).await,
            Endpoint::GetEvent => self.get_events(),
            Endpoint::GetEventById => self.get_event_by_id(request).await,
            other => (
                StatusCode::NOT_IMPLEMENTED,
                Json(json!({ "error": format!("{} is not implemented", other.as_str()) })),
            )
                .into_response(),
        }
    }
}
