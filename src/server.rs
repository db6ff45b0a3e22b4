//! Web server module for regtrace.
//!
//! JSON API over the device registry and the reading store, plus a
//! server-sent event stream of device events.

use async_stream::stream;
use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::get,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::collector::{CollectorError, DeviceRegistry, DeviceStatus, WorkerState};
use crate::projector::{PivotTable, project};
use crate::storage::{
    CollectionName, DEFAULT_LIMIT, Reading, ReadingStore, StorageError, sanitize,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<DeviceRegistry>,
    pub store: ReadingStore,
    /// Cancelled on shutdown; ends open event streams.
    pub shutdown: CancellationToken,
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    db: Option<String>,
}

/// Body of `POST /api/devices`.
#[derive(Debug, Deserialize)]
pub struct AddDeviceRequest {
    pub device: String,
}

/// Query parameters for reading windows.
#[derive(Debug, Deserialize)]
pub struct LimitParams {
    pub limit: Option<u32>,
}

#[derive(Serialize)]
struct StoppedResponse {
    device: String,
    state: WorkerState,
}

#[derive(Serialize)]
struct ReadingsResponse {
    device: String,
    collection: CollectionName,
    readings: Vec<Reading>,
}

#[derive(Serialize)]
struct PivotResponse {
    device: String,
    collection: CollectionName,
    #[serde(flatten)]
    table: PivotTable,
}

/// Error rendered as `{"error": "<message>"}`.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn unknown_device(device: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: format!("device {device} is not monitored"),
        }
    }
}

impl From<CollectorError> for ApiError {
    fn from(err: CollectorError) -> Self {
        let status = match &err {
            CollectorError::InvalidDevice(_) | CollectorError::Config(_) => StatusCode::BAD_REQUEST,
            CollectorError::AlreadyMonitored(_) | CollectorError::CollectionConflict { .. } => {
                StatusCode::CONFLICT
            }
            CollectorError::NotMonitored(_) => StatusCode::NOT_FOUND,
            CollectorError::Connection { .. } => StatusCode::BAD_GATEWAY,
            CollectorError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CollectorError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        tracing::error!(error = %err, "Storage query failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let app_state = Arc::new(state);

    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route(
            "/api/devices",
            get(list_devices_handler).post(add_device_handler),
        )
        .route(
            "/api/devices/{device}",
            axum::routing::delete(remove_device_handler),
        )
        .route("/api/devices/{device}/readings", get(readings_handler))
        .route("/api/devices/{device}/pivot", get(pivot_handler))
        .route("/api/events", get(events_handler))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

/// Liveness probe.
async fn healthz_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        db: None,
    })
}

/// Readiness probe that checks SQLite availability.
async fn readyz_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.ping().await {
        Ok(()) => Json(HealthResponse {
            status: "ok".to_string(),
            db: Some("ready".to_string()),
        })
        .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "not_ready".to_string(),
                    db: Some(err.to_string()),
                }),
            )
                .into_response()
        }
    }
}

async fn list_devices_handler(State(state): State<Arc<AppState>>) -> Json<Vec<DeviceStatus>> {
    Json(state.registry.statuses().await)
}

async fn add_device_handler(
    State(state): State<Arc<AppState>>,
    request: Result<Json<AddDeviceRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<DeviceStatus>), ApiError> {
    let Json(request) = request?;
    let handle = state.registry.add(&request.device).await?;
    Ok((
        StatusCode::CREATED,
        Json(DeviceStatus {
            device: handle.device().to_string(),
            collection: handle.collection().clone(),
            state: handle.state(),
        }),
    ))
}

async fn remove_device_handler(
    State(state): State<Arc<AppState>>,
    Path(device): Path<String>,
) -> Result<Json<StoppedResponse>, ApiError> {
    let final_state = state.registry.stop(&device).await?;
    Ok(Json(StoppedResponse {
        device,
        state: final_state,
    }))
}

/// Most recent readings of a device, newest first.
async fn readings_handler(
    State(state): State<Arc<AppState>>,
    Path(device): Path<String>,
    params: Result<Query<LimitParams>, QueryRejection>,
) -> Result<Json<ReadingsResponse>, ApiError> {
    let Query(params) = params?;
    let (collection, readings) = recent_window(&state, &device, params.limit).await?;
    Ok(Json(ReadingsResponse {
        device,
        collection,
        readings,
    }))
}

/// Most recent readings of a device, pivoted by timestamp and register.
async fn pivot_handler(
    State(state): State<Arc<AppState>>,
    Path(device): Path<String>,
    params: Result<Query<LimitParams>, QueryRejection>,
) -> Result<Json<PivotResponse>, ApiError> {
    let Query(params) = params?;
    let (collection, readings) = recent_window(&state, &device, params.limit).await?;
    Ok(Json(PivotResponse {
        device,
        collection,
        table: project(&readings),
    }))
}

/// Device events as they happen, one SSE event per [`DeviceEvent`].
///
/// The SSE event name is the event kind; the data is the event as JSON.
///
/// [`DeviceEvent`]: crate::collector::DeviceEvent
async fn events_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let mut events = state.registry.subscribe();
    let shutdown = state.shutdown.clone();

    let stream = stream! {
        loop {
            let received = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                received = events.recv() => received,
            };
            match received {
                Ok(event) => {
                    yield Event::default().event(event.kind.as_ref()).json_data(&event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event stream subscriber lagged");
                    yield Ok(Event::default().event("lagged").data(skipped.to_string()));
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Resolve the collection behind `device`.
///
/// Removed devices no longer have a worker, but their stored collection
/// stays readable.
async fn device_collection(state: &AppState, device: &str) -> Result<CollectionName, ApiError> {
    if let Some(collection) = state.registry.collection_of(device).await {
        return Ok(collection);
    }
    let collection = sanitize(device.trim());
    if state.store.has_collection(&collection).await? {
        Ok(collection)
    } else {
        Err(ApiError::unknown_device(device))
    }
}

async fn recent_window(
    state: &AppState,
    device: &str,
    limit: Option<u32>,
) -> Result<(CollectionName, Vec<Reading>), ApiError> {
    let collection = device_collection(state, device).await?;
    let readings = state
        .store
        .query_recent(&collection, limit.unwrap_or(DEFAULT_LIMIT))
        .await?;
    Ok((collection, readings))
}
