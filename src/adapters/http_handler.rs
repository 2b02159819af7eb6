//! Axum front end of the gateway.
//!
//! Translates HTTP requests into [`InboundRequest`]s for the
//! [`GatewayService`] and its outcomes back into responses: a successful
//! result becomes a `200` with the configured content type and headers, a
//! failure becomes the JSON error envelope with the status of its class.
use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
    middleware,
    response::Response,
    routing::any,
};
use eyre::{Result, WrapErr};
use tower_http::trace::TraceLayer;

use crate::{
    adapters::middleware::{
        BasicAuth, basic_auth_middleware, cors_middleware, request_id_middleware,
        request_timing_middleware,
    },
    config::ResponseConfig,
    core::{GatewayError, GatewayService, InboundRequest},
};

/// Largest POST body accepted.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// HTTP handler for the Dendrite gateway
pub struct HttpHandler {
    gateway_service: Arc<GatewayService>,
    success_headers: HeaderMap,
}

impl HttpHandler {
    /// Create a handler; the success headers are parsed once here.
    ///
    /// # Errors
    /// Fails if the configured content type or a header is not valid HTTP.
    pub fn new(gateway_service: Arc<GatewayService>) -> Result<Self> {
        let success_headers = success_headers(&gateway_service.config().response)?;
        Ok(Self {
            gateway_service,
            success_headers,
        })
    }

    pub fn gateway_service(&self) -> &Arc<GatewayService> {
        &self.gateway_service
    }

    /// Main request handler
    pub async fn handle_request(&self, req: Request) -> Response {
        let method = req.method().clone();
        if method != Method::GET && method != Method::POST {
            return method_not_allowed();
        }

        // Held until the response is built; the body is an in-memory buffer.
        let _pass = self.gateway_service.gate().enter().await;

        let uri = req.uri().clone();
        let body = if method == Method::POST {
            match read_body(req).await {
                Ok(body) => Some(body),
                Err(e) => {
                    e.log(None);
                    return error_response(&e);
                }
            }
        } else {
            None
        };

        let inbound = InboundRequest {
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            body,
        };

        match self.gateway_service.process(inbound).await {
            Ok(result) => self.success_response(&result),
            Err(e) => error_response(&e),
        }
    }

    fn success_response(&self, result: &str) -> Response {
        let mut response = Response::new(Body::from(result.to_owned()));
        response.headers_mut().extend(self.success_headers.clone());
        response
    }
}

/// Build the gateway router: every path is accepted so that malformed
/// targets get the structured error instead of a bare 404.
pub fn router(handler: Arc<HttpHandler>) -> Router {
    let auth = Arc::new(BasicAuth::new(
        handler.gateway_service().config().basic_auth.clone(),
    ));

    Router::new()
        .route("/", any(handle))
        .route("/{*path}", any(handle))
        .with_state(handler)
        .layer(middleware::from_fn_with_state(auth, basic_auth_middleware))
        .layer(middleware::from_fn(cors_middleware))
        .layer(middleware::from_fn(request_timing_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
}

async fn handle(State(handler): State<Arc<HttpHandler>>, req: Request) -> Response {
    handler.handle_request(req).await
}

async fn read_body(req: Request) -> Result<String, GatewayError> {
    let bytes = to_bytes(req.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|e| GatewayError::InvalidEncoding(format!("Unreadable request body: {e}")))?;
    String::from_utf8(bytes.to_vec())
        .map_err(|e| GatewayError::InvalidEncoding(format!("Request body is not UTF-8: {e}")))
}

/// Translate a failure into its status and JSON envelope.
pub fn error_response(err: &GatewayError) -> Response {
    let mut response = Response::new(Body::from(err.envelope().to_json()));
    *response.status_mut() = err.status();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(JSON_CONTENT_TYPE),
    );
    response
}

fn method_not_allowed() -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
    response
        .headers_mut()
        .insert(header::ALLOW, HeaderValue::from_static("GET, POST"));
    response
}

fn success_headers(response: &ResponseConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&response.content_type)
            .wrap_err_with(|| format!("Invalid content type '{}'", response.content_type))?,
    );
    for (name, value) in &response.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .wrap_err_with(|| format!("Invalid response header name '{name}'"))?;
        let value = HeaderValue::from_str(value)
            .wrap_err_with(|| format!("Invalid value for response header '{name}'"))?;
        headers.insert(name, value);
    }
    Ok(headers)
}
