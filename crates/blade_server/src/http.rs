use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::{IntoResponse, Response as HttpResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use blade_service::{
    CreateExperimentRequest, DestroyExperimentRequest, PrepareRequest, RevokeRequest,
    ServiceError, StatusQuery,
};
use blade_spec::{CancelFlag, ErrorKind, Response};
use blade_store::{ExperimentRecord, PreparationRecord};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tower_http::catch_panic::CatchPanicLayer;

use crate::{metrics, middleware, AppState};

/// A failure rendered as the response envelope with a matching HTTP status.
#[derive(Debug)]
pub enum ApiError {
    Service(ServiceError),
    Internal(String),
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        ApiError::Service(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> HttpResponse {
        match self {
            ApiError::Service(e) => {
                let status = if e.kind().is_internal() {
                    StatusCode::INTERNAL_SERVER_ERROR
                } else {
                    StatusCode::BAD_REQUEST
                };
                (status, Json(e.to_response())).into_response()
            }
            ApiError::Internal(msg) => {
                tracing::error!("request failed: {}", msg);
                let body = Response {
                    code: StatusCode::INTERNAL_SERVER_ERROR.as_u16() as i32,
                    success: false,
                    err: msg,
                    result: None,
                };
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        }
    }
}

#[derive(Serialize)]
struct Created<R> {
    response: Response,
    record: R,
}

// Cancels the request's flag if the handler future is dropped mid-flight.
struct CancelOnDrop(Option<CancelFlag>);

impl CancelOnDrop {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(flag) = self.0.take() {
            flag.cancel();
        }
    }
}

/// Runs a service call on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce(CancelFlag) -> blade_service::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let cancel = CancelFlag::new();
    let guard = CancelOnDrop(Some(cancel.clone()));
    let joined = tokio::task::spawn_blocking(move || f(cancel)).await;
    guard.disarm();
    match joined {
        Ok(result) => result.map_err(ApiError::from),
        Err(e) => Err(ApiError::Internal(format!("service task failed: {e}"))),
    }
}

fn bad_body(detail: impl std::fmt::Display) -> ApiError {
    ApiError::Service(ServiceError::parameter_illegal("body", detail.to_string()))
}

/// An optional JSON body: empty means `T::default()`.
fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(bad_body)
}

fn created_status(resp: &Response) -> StatusCode {
    if resp.success {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    }
}

async fn create_experiment(
    State(state): State<AppState>,
    body: Result<Json<CreateExperimentRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Created<ExperimentRecord>>), ApiError> {
    let Json(req) = body.map_err(|e| bad_body(e.body_text()))?;
    let svc = state.experiments.clone();
    let (response, record) = blocking(move |cancel| svc.create(req, cancel))
        .await
        .inspect_err(|_| metrics::record_create(false))?;
    metrics::record_create(response.success);
    Ok((created_status(&response), Json(Created { response, record })))
}

async fn destroy_experiment(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    body: Bytes,
) -> Result<Json<Response>, ApiError> {
    let mut req: DestroyExperimentRequest = optional_body(&body)?;
    req.uid = uid;
    let svc = state.experiments.clone();
    let resp = blocking(move |cancel| svc.destroy(req, cancel))
        .await
        .inspect_err(|_| metrics::record_destroy(false))?;
    metrics::record_destroy(resp.success);
    Ok(Json(resp))
}

async fn get_experiment(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<ExperimentRecord>, ApiError> {
    let svc = state.experiments.clone();
    let record = blocking(move |_| svc.query(&uid)).await?;
    Ok(Json(record))
}

async fn prepare(
    State(state): State<AppState>,
    body: Result<Json<PrepareRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Created<Option<PreparationRecord>>>), ApiError> {
    let Json(req) = body.map_err(|e| bad_body(e.body_text()))?;
    let svc = state.preparations.clone();
    let (response, record) = blocking(move |cancel| svc.prepare(req, cancel))
        .await
        .inspect_err(|_| metrics::record_preparation("prepare", false))?;
    metrics::record_preparation("prepare", response.success);
    Ok((created_status(&response), Json(Created { response, record })))
}

async fn revoke(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    body: Bytes,
) -> Result<Json<Response>, ApiError> {
    let mut req: RevokeRequest = optional_body(&body)?;
    req.uid = uid;
    let svc = state.preparations.clone();
    let resp = blocking(move |cancel| svc.revoke(req, cancel))
        .await
        .inspect_err(|_| metrics::record_preparation("revoke", false))?;
    metrics::record_preparation("revoke", resp.success);
    Ok(Json(resp))
}

async fn status(
    State(state): State<AppState>,
    query: Result<Query<StatusQuery>, QueryRejection>,
) -> Result<Json<Response>, ApiError> {
    let Query(q) = query.map_err(|e| {
        ApiError::Service(ServiceError::new(ErrorKind::ParameterIllegal, e.body_text()))
    })?;
    let svc = state.experiments.clone();
    let resp = blocking(move |_| svc.status(&q)).await?;
    Ok(Json(resp))
}

async fn openapi(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/yaml")],
        state.openapi.to_string(),
    )
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn metrics_handler() -> String {
    metrics::encode_metrics()
}

/// `/health` and `/metrics` at the root; the guarded API under `/api/v1`.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/experiments", post(create_experiment))
        .route(
            "/experiments/:uid",
            get(get_experiment).delete(destroy_experiment),
        )
        .route("/preparations", post(prepare))
        .route("/preparations/:uid", axum::routing::delete(revoke))
        .route("/status", get(status))
        .route("/openapi", get(openapi))
        .layer(from_fn_with_state(
            state.idempotency.clone(),
            middleware::idempotency,
        ))
        .layer(from_fn_with_state(
            state.auth_token.clone(),
            middleware::require_bearer,
        ))
        .layer(CatchPanicLayer::new())
        .layer(from_fn(middleware::audit))
        .with_state(state);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .nest("/api/v1", api)
}
