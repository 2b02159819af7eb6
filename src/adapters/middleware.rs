//! Axum middleware used by the gateway router.
//!
//! Small composable layers attached to the `Router`: HTTP Basic
//! authentication, permissive CORS origin, request timing and request IDs.
//! They keep no state beyond the credential table handed in at construction.
use std::{collections::HashMap, sync::Arc, time::Instant};

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::Response,
};
use base64::{Engine as _, engine::general_purpose::STANDARD};

use crate::{metrics, tracing_setup};

pub const AUTH_REALM: &str = "Basic realm=\"dendrite\"";

/// Static `username → password` table for HTTP Basic authentication.
#[derive(Debug, Clone, Default)]
pub struct BasicAuth {
    credentials: HashMap<String, String>,
}

impl BasicAuth {
    pub fn new(credentials: HashMap<String, String>) -> Self {
        Self { credentials }
    }

    /// Whether any credential is configured. An empty table disables auth.
    pub fn is_enabled(&self) -> bool {
        !self.credentials.is_empty()
    }

    /// Check an `Authorization` header value against the table.
    pub fn verify(&self, authorization: Option<&HeaderValue>) -> bool {
        let Some(encoded) = authorization
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Basic "))
        else {
            return false;
        };

        let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
            return false;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            return false;
        };

        match decoded.split_once(':') {
            Some((user, password)) => self
                .credentials
                .get(user)
                .is_some_and(|expected| expected == password),
            None => false,
        }
    }
}

/// Reject requests without valid Basic credentials when auth is configured.
pub async fn basic_auth_middleware(
    State(auth): State<Arc<BasicAuth>>,
    req: Request,
    next: Next,
) -> Response {
    if !auth.is_enabled() || auth.verify(req.headers().get(header::AUTHORIZATION)) {
        return next.run(req).await;
    }

    tracing::info!(uri = %req.uri(), "Rejected request without valid credentials");
    let mut response = Response::new(Body::from("Unauthorized"));
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static(AUTH_REALM),
    );
    response
}

/// Allow any origin on every response.
pub async fn cors_middleware(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

/// Log start/end of a request including latency, and count it.
pub async fn request_timing_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let _timer = metrics::RequestTimer::new(method.as_str());

    tracing::debug!("Started processing {} {}", method, uri);

    let response = next.run(req).await;
    let duration = start.elapsed();

    metrics::increment_request_total(method.as_str(), response.status().as_u16());
    tracing::info!(
        "Completed {} {} - {} in {:?}",
        method,
        uri,
        response.status(),
        duration
    );

    response
}

/// Generate a per-request UUID and expose it via tracing plus `X-Request-ID`.
pub async fn request_id_middleware(req: Request, next: Next) -> Response {
    use tracing::Instrument;

    let request_id = uuid::Uuid::new_v4().to_string();
    let span = tracing_setup::create_request_span(
        req.method().as_str(),
        &req.uri().to_string(),
        &request_id,
    );

    let start = Instant::now();
    let mut response = next.run(req).instrument(span.clone()).await;
    span.record("http.status_code", response.status().as_u16());
    span.record("duration_ms", start.elapsed().as_millis() as u64);

    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("X-Request-ID", header_value);
    }

    response
}
