//! HTTP routes and handlers

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use modelgate_core::{Error, FeatureRow};
use serde::Deserialize;
use serde_json::json;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info_span, warn, Instrument};

use crate::state::AppState;

/// Largest accepted request body
const MAX_BODY_BYTES: usize = 1024 * 1024;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/predict", post(predict))
        .route("/predict/:version", post(predict_version))
        .fallback(fallback)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "message": "modelgate prediction server",
        "default_model": state.service.default_reference().canonical(),
    }))
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "model_loaded": state.service.is_default_loaded(),
        "cached_models": state.service.cached_models(),
    }))
}

async fn metrics(State(state): State<AppState>) -> String {
    state.metrics_handle.render()
}

/// Prediction request body
///
/// Either a flat feature object or an explicit envelope naming the model.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PredictRequest {
    Explicit(ExplicitRequest),
    Flat(FeatureRow),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExplicitRequest {
    #[serde(default)]
    reference: Option<String>,
    features: FeatureRow,
}

impl PredictRequest {
    fn parse(body: &[u8]) -> Result<Self, AppError> {
        serde_json::from_slice(body).map_err(|_| {
            AppError::InvalidRequest(
                "body must be a feature object or {\"reference\", \"features\"}".to_string(),
            )
        })
    }

    fn into_parts(self) -> (Option<String>, FeatureRow) {
        match self {
            PredictRequest::Explicit(request) => (request.reference, request.features),
            PredictRequest::Flat(features) => (None, features),
        }
    }
}

async fn predict(State(state): State<AppState>, body: Bytes) -> Result<Response, AppError> {
    let (reference, features) = PredictRequest::parse(&body)?.into_parts();
    let span = info_span!(
        "predict",
        request_id = %uuid::Uuid::new_v4(),
        reference = reference.as_deref().unwrap_or("default"),
    );

    async move {
        debug!("Predicting with {} features", features.len());
        let prediction = state.service.predict(reference.as_deref(), &features).await?;
        Ok::<_, AppError>(Json(json!({ "prediction": prediction })).into_response())
    }
    .instrument(span)
    .await
}

async fn predict_version(
    State(state): State<AppState>,
    Path(version): Path<String>,
    body: Bytes,
) -> Result<Response, AppError> {
    let (reference, features) = PredictRequest::parse(&body)?.into_parts();
    if reference.is_some() {
        return Err(AppError::InvalidRequest(
            "a reference cannot be combined with a version path".to_string(),
        ));
    }

    let span = info_span!(
        "predict",
        request_id = %uuid::Uuid::new_v4(),
        version = version.as_str(),
    );

    async move {
        let prediction = state.service.predict_version(&version, &features).await?;
        Ok::<_, AppError>(Json(json!({ "prediction": prediction })).into_response())
    }
    .instrument(span)
    .await
}

async fn fallback() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::NOT_FOUND, Json(json!({ "detail": "Not Found" })))
}

/// Error handling
#[derive(Debug)]
enum AppError {
    InvalidRequest(String),
    Unavailable(String),
    Internal(String),
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidInput(msg) => AppError::InvalidRequest(msg),
            Error::ModelUnavailable(msg) => AppError::Unavailable(msg),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            AppError::InvalidRequest(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            AppError::Unavailable(msg) => {
                warn!("Model unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, msg)
            }
            AppError::Internal(msg) => {
                warn!("Prediction failed: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_body_keeps_feature_order() {
        let body = br#"{"petal width (cm)": 0.2, "sepal length (cm)": 5.1}"#;
        let (reference, features) = PredictRequest::parse(body).unwrap().into_parts();

        assert!(reference.is_none());
        let names: Vec<_> = features.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["petal width (cm)", "sepal length (cm)"]);
    }

    #[test]
    fn test_explicit_body() {
        let body = br#"{"reference": "models:/iris/2", "features": {"x": 1}}"#;
        let (reference, features) = PredictRequest::parse(body).unwrap().into_parts();

        assert_eq!(reference.as_deref(), Some("models:/iris/2"));
        assert_eq!(features.len(), 1);
    }

    #[test]
    fn test_features_next_to_other_keys_is_flat() {
        let body = br#"{"features": {"x": 1}, "y": 2}"#;
        let (reference, features) = PredictRequest::parse(body).unwrap().into_parts();

        assert!(reference.is_none());
        assert_eq!(features.len(), 2);
    }

    #[test]
    fn test_non_object_body_is_rejected() {
        assert!(PredictRequest::parse(b"[1, 2, 3]").is_err());
        assert!(PredictRequest::parse(b"not json").is_err());
    }
}
