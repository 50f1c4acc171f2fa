use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body as AxumBody,
    extract::{Request, State},
    http::{Method, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::{
    adapters::middleware::{
        cors_middleware, create_bearer_auth_middleware, request_id_middleware,
        request_timing_middleware,
    },
    config::GatewayConfig,
    core::{ForwardRequest, ForwardResponse, GatewayError, GatewayService, RequestBody, ResponseBody},
};

/// HTTP front of the gateway: health endpoints plus a catch-all that
/// forwards everything else to the instance pool.
#[derive(Clone)]
pub struct HttpHandler {
    gateway_service: Arc<GatewayService>,
    api_key: Option<Arc<str>>,
}

impl HttpHandler {
    pub fn new(gateway_service: Arc<GatewayService>, api_key: Option<&str>) -> Self {
        Self {
            gateway_service,
            api_key: api_key.filter(|key| !key.is_empty()).map(Arc::from),
        }
    }

    pub fn from_config(gateway_service: Arc<GatewayService>, config: &GatewayConfig) -> Self {
        Self::new(gateway_service, config.inbound_api_key())
    }

    /// Build the axum router. Health endpoints skip the bearer gate; CORS,
    /// request IDs and timing wrap everything.
    pub fn router(&self) -> Router {
        let proxy = Router::new()
            .fallback(handle_proxy_request)
            .layer(middleware::from_fn(create_bearer_auth_middleware(
                self.api_key.clone(),
            )))
            .with_state(self.gateway_service.clone());

        Router::new()
            .route("/health", get(handle_health_check))
            .route("/openai/health", get(handle_openai_health))
            .with_state(self.gateway_service.clone())
            .fallback_service(proxy)
            .layer(middleware::from_fn(cors_middleware))
            .layer(middleware::from_fn(request_id_middleware))
            .layer(middleware::from_fn(request_timing_middleware))
            .layer(TraceLayer::new_for_http())
    }
}

/// Liveness of the gateway process itself.
async fn handle_health_check() -> Response {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().timestamp(),
    }))
    .into_response()
}

/// Registry report; informational only, always 200.
async fn handle_openai_health(State(gateway): State<Arc<GatewayService>>) -> Response {
    let health = gateway.health();
    let body = if health.instances_count == 0 {
        json!({
            "status": "warning",
            "message": "No OpenAI instances configured",
        })
    } else {
        json!({
            "status": "ok",
            "instances_count": health.instances_count,
        })
    };
    Json(body).into_response()
}

fn carries_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// Forward any other request, streaming when a POST body asks for it.
async fn handle_proxy_request(
    State(gateway): State<Arc<GatewayService>>,
    req: Request,
) -> Response {
    let (parts, body) = req.into_parts();
    let path = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path().to_string(), |pq| pq.as_str().to_string());

    let body = if carries_body(&parts.method) {
        match axum::body::to_bytes(body, usize::MAX).await {
            Ok(bytes) => RequestBody::from_bytes(bytes),
            Err(e) => {
                tracing::warn!("Failed to read request body for {}: {}", path, e);
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({
                        "error": {
                            "message": "Failed to read request body",
                            "type": "invalid_request_error",
                        }
                    })),
                )
                    .into_response();
            }
        }
    } else {
        RequestBody::Empty
    };

    let request = ForwardRequest::new(parts.method, path)
        .with_body(body)
        .with_headers(parts.headers);

    if request.method == Method::POST && request.body.wants_stream() {
        return match gateway.forward_streaming(&request).await {
            Ok(events) => event_stream_response(events),
            Err(e) => e.into_response(),
        };
    }

    match gateway.forward_with_policy(&request).await {
        Ok(response) => forward_response(response),
        Err(e) => e.into_response(),
    }
}

fn event_stream_response(events: crate::core::EventStream) -> Response {
    let mut response = Response::new(AxumBody::from_stream(events));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-cache"),
    );
    response
}

fn forward_response(response: ForwardResponse) -> Response {
    let ForwardResponse {
        status,
        headers,
        body,
    } = response;
    let body = match body {
        ResponseBody::Json(value) => AxumBody::from(value.to_string()),
        ResponseBody::Text(text) => AxumBody::from(text),
        ResponseBody::Raw(bytes) => AxumBody::from(bytes),
    };
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        tracing::error!(status = status.as_u16(), "Request failed: {}", self);
        (status, Json(self.client_body())).into_response()
    }
}
