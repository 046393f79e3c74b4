//! HTTP surface: recent readings, manual insert, and connectivity status.

use axum::{
    Json, Router,
    extract::{Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    health::{Health, HealthProbe},
    ingest::{IngestError, Origin, Pipeline},
    store::{Store, StoreError},
    telemetry::StoredReading,
};

#[derive(Debug)]
pub struct ApiState<S> {
    pipeline: Pipeline<S>,
    health: HealthProbe<S>,
    default_limit: usize,
}

impl<S> Clone for ApiState<S> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            health: self.health.clone(),
            default_limit: self.default_limit,
        }
    }
}

impl<S: Store> ApiState<S> {
    pub fn new(pipeline: Pipeline<S>, health: HealthProbe<S>, default_limit: usize) -> Self {
        Self {
            pipeline,
            health,
            default_limit,
        }
    }
}

pub fn routes<S: Store>(state: ApiState<S>) -> Router {
    Router::new()
        .route(
            "/api/readings",
            get(list_readings::<S>).post(insert_reading::<S>),
        )
        .route("/api/status", get(status::<S>))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct RecentQuery {
    limit: Option<usize>,
}

async fn list_readings<S: Store>(
    State(state): State<ApiState<S>>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Vec<StoredReading>>, ApiError> {
    let limit = query.limit.unwrap_or(state.default_limit);
    Ok(Json(state.pipeline.recent(limit).await?))
}

async fn insert_reading<S: Store>(
    State(state): State<ApiState<S>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<StoredReading>), ApiError> {
    let Json(value) =
        payload.map_err(|rejection| IngestError::MalformedPayload(rejection.body_text()))?;

    let raw = match value {
        Value::Object(raw) => raw,
        other => {
            let reason = format!("expected a JSON object, got {other}");
            return Err(IngestError::MalformedPayload(reason).into());
        }
    };

    let stored = state.pipeline.ingest(&raw, Origin::Api).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn status<S: Store>(State(state): State<ApiState<S>>) -> Json<Health> {
    Json(state.health.check().await)
}

#[derive(Debug)]
pub struct ApiError(IngestError);

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        Self(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self(IngestError::Persistence(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.0 {
            IngestError::MalformedPayload(_) => {
                (StatusCode::BAD_REQUEST, json!({ "error": self.0.to_string() }))
            }
            IngestError::Validation(err) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "error": "validation failed", "fields": err.errors }),
            ),
            IngestError::Persistence(StoreError::Timeout(_)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "error": self.0.to_string() }),
            ),
            IngestError::Persistence(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "persistence failed" }),
            ),
        };

        (status, Json(body)).into_response()
    }
}
