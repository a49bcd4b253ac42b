//! Request guards for `/api/v1`: audit, bearer auth and idempotency tokens.
//!
//! Layering (outermost first) is audit, auth, idempotency, so a request
//! rejected for its credentials never consumes its idempotency token.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::http::{header, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::metrics;

pub const IDEMPOTENCY_HEADER: &str = "x-idempotency-token";

pub async fn audit(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let resp = next.run(req).await;

    let elapsed = started.elapsed();
    let status = resp.status().as_u16();
    metrics::record_http_request(method.as_str(), &path, status, elapsed.as_secs_f64());
    tracing::info!(
        target: "blade_server::audit",
        method = %method,
        path = %path,
        status,
        duration_ms = elapsed.as_millis() as u64,
        "request"
    );
    resp
}

pub async fn require_bearer(
    State(expected): State<Option<Arc<str>>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(expected) = expected else {
        return next.run(req).await;
    };
    let Some(auth) = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return (StatusCode::UNAUTHORIZED, "missing authorization header").into_response();
    };
    if bearer_token(auth) != Some(&*expected) {
        return (StatusCode::UNAUTHORIZED, "invalid bearer token").into_response();
    }
    next.run(req).await
}

/// The credential of an `Authorization: Bearer <t>` value. The scheme is
/// matched case-insensitively.
fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim())
        .filter(|t| !t.is_empty())
}

/// Tokens seen within their TTL, keyed by token, valued by expiry.
pub struct IdempotencyStore {
    ttl: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl IdempotencyStore {
    pub fn new(ttl: Duration) -> Self {
        IdempotencyStore {
            ttl,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Records `token` and returns true, or returns false when it is still
    /// live from an earlier request.
    pub fn admit(&self, token: &str, now: Instant) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        seen.retain(|_, expiry| *expiry > now);
        if seen.contains_key(token) {
            return false;
        }
        seen.insert(token.to_string(), now + self.ttl);
        true
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub async fn idempotency(
    State(store): State<Arc<IdempotencyStore>>,
    req: Request,
    next: Next,
) -> Response {
    if req.method() == Method::GET {
        return next.run(req).await;
    }
    let token = req
        .headers()
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or("");
    if token.is_empty() {
        metrics::record_idempotency_rejection();
        return (StatusCode::BAD_REQUEST, "missing idempotency token").into_response();
    }
    if !store.admit(token, Instant::now()) {
        metrics::record_idempotency_rejection();
        tracing::warn!("rejected replayed idempotency token {}", token);
        return (StatusCode::CONFLICT, "duplicate idempotency token").into_response();
    }
    next.run(req).await
}
