//! Core gateway orchestration service.
//!
//! The `GatewayService` owns the immutable instance registry, the shared
//! round-robin cursor and the shared outbound client. It provides:
//! * Random failover forwarding (draw without replacement, last failure surfaced)
//! * Round-robin forward-and-try-all forwarding (generic failure on exhaustion)
//! * Streaming forwarding (see [`crate::core::streaming`])
//! * Registry health reporting and a single `close()` for shutdown
//!
//! Retry state (tried-set, last failure) lives on the stack of each call and is
//! never shared between requests.
use std::{sync::Arc, time::Duration};

use axum::body::Body as AxumBody;
use bytes::Bytes;
use http::{
    HeaderMap, HeaderValue, Method, Request, StatusCode,
    header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING},
};
use http_body_util::BodyExt;
use serde_json::Value;

use crate::{
    config::{GatewayConfig, SelectionStrategy},
    core::{
        error::{AttemptFailure, GatewayError},
        instance::{Instance, InstanceRegistry, RegistryHealth},
        load_balancer::{LoadBalancingStrategy, RandomStrategy, RoundRobinSelector, TriedSet},
        normalize::{build_outbound_url, filter_headers},
    },
    ports::http_client::HttpClient,
    utils::InFlightTracker,
};

/// Body of an inbound request as the HTTP layer decoded it.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Raw(Bytes),
}

impl RequestBody {
    /// Decode a body the way the HTTP layer receives it: JSON if it parses, raw otherwise.
    pub fn from_bytes(bytes: Bytes) -> Self {
        if bytes.is_empty() {
            return RequestBody::Empty;
        }
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) => RequestBody::Json(value),
            Err(_) => RequestBody::Raw(bytes),
        }
    }

    /// `true` when the body is a JSON object with `"stream": true`.
    pub fn wants_stream(&self) -> bool {
        matches!(self, RequestBody::Json(Value::Object(map)) if map.get("stream") == Some(&Value::Bool(true)))
    }

    /// Copy of this body with `stream` forced to `true` on JSON objects.
    pub fn with_stream_enabled(&self) -> Self {
        match self {
            RequestBody::Json(Value::Object(map)) => {
                let mut map = map.clone();
                map.insert("stream".to_string(), Value::Bool(true));
                RequestBody::Json(Value::Object(map))
            }
            other => other.clone(),
        }
    }

    fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        match self {
            RequestBody::Empty => Ok(Bytes::new()),
            RequestBody::Json(value) => serde_json::to_vec(value).map(Bytes::from),
            RequestBody::Raw(bytes) => Ok(bytes.clone()),
        }
    }
}

/// Inbound request descriptor handed over by the HTTP layer.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: Method,
    /// Path including the query string
    pub path: String,
    pub body: RequestBody,
    pub headers: HeaderMap,
}

impl ForwardRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: RequestBody::Empty,
            headers: HeaderMap::new(),
        }
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

/// Successful backend payload: JSON when it parses, text when it is UTF-8,
/// raw bytes otherwise (audio, file downloads).
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
    Raw(Bytes),
}

impl ResponseBody {
    fn from_bytes(bytes: Bytes) -> Self {
        if let Ok(value) = serde_json::from_slice::<Value>(&bytes) {
            return ResponseBody::Json(value);
        }
        match String::from_utf8(bytes.to_vec()) {
            Ok(text) => ResponseBody::Text(text),
            Err(_) => ResponseBody::Raw(bytes),
        }
    }
}

/// Result of a successful buffered forward.
#[derive(Debug, Clone)]
pub struct ForwardResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

/// Timeouts applied by the engines.
#[derive(Debug, Clone, Copy)]
pub struct ForwardSettings {
    /// Bound on one attempt; for streams, also the longest idle gap between chunks
    pub request_timeout: Duration,
    /// How long `close()` waits for in-flight calls
    pub drain_timeout: Duration,
}

impl Default for ForwardSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(600),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&GatewayConfig> for ForwardSettings {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            request_timeout: Duration::from_secs(config.client.request_timeout_secs),
            drain_timeout: Duration::from_secs(config.client.drain_timeout_secs),
        }
    }
}

/// Central orchestrator for instance selection and failover forwarding.
/// Share it behind an `Arc`; every method takes `&self`.
pub struct GatewayService {
    pub(crate) registry: InstanceRegistry,
    round_robin: RoundRobinSelector,
    pub(crate) strategy: Box<dyn LoadBalancingStrategy>,
    default_policy: SelectionStrategy,
    pub(crate) client: Arc<dyn HttpClient>,
    pub(crate) settings: ForwardSettings,
    pub(crate) in_flight: InFlightTracker,
}

impl GatewayService {
    /// Create a gateway service from the loaded configuration and the shared client.
    pub fn new(config: &GatewayConfig, client: Arc<dyn HttpClient>) -> Self {
        let registry = InstanceRegistry::from_config(&config.instances);
        Self::with_registry(registry, client, ForwardSettings::from(config))
            .with_default_policy(config.strategy)
    }

    pub fn with_registry(
        registry: InstanceRegistry,
        client: Arc<dyn HttpClient>,
        settings: ForwardSettings,
    ) -> Self {
        Self {
            round_robin: RoundRobinSelector::new(registry.clone()),
            registry,
            strategy: RandomStrategy::new().boxed(),
            default_policy: SelectionStrategy::default(),
            client,
            settings,
            in_flight: InFlightTracker::new(),
        }
    }

    /// Replace the draw used by the failover loop (uniform random by default).
    pub fn with_strategy(mut self, strategy: Box<dyn LoadBalancingStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Policy used by [`GatewayService::forward_with_policy`].
    pub fn with_default_policy(mut self, policy: SelectionStrategy) -> Self {
        self.default_policy = policy;
        self
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    pub fn default_policy(&self) -> SelectionStrategy {
        self.default_policy
    }

    /// Informational registry snapshot; no probing.
    pub fn health(&self) -> RegistryHealth {
        self.registry.health()
    }

    /// Number of buffered calls and open streams currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.active_count()
    }

    /// Forward using the configured policy.
    pub async fn forward_with_policy(
        &self,
        request: &ForwardRequest,
    ) -> Result<ForwardResponse, GatewayError> {
        match self.default_policy {
            SelectionStrategy::Random => self.forward(request).await,
            SelectionStrategy::RoundRobin => self.forward_round_robin(request).await,
        }
    }

    /// Forward a buffered request, drawing instances at random without
    /// replacement until one succeeds. On exhaustion the last failure is returned.
    pub async fn forward(&self, request: &ForwardRequest) -> Result<ForwardResponse, GatewayError> {
        if self.registry.is_empty() {
            return Err(GatewayError::NoInstancesConfigured);
        }
        let _guard = self.in_flight.track().ok_or(GatewayError::ClientClosed)?;

        tokio::select! {
            biased;
            _ = self.in_flight.aborted() => Err(GatewayError::ClientClosed),
            result = self.forward_with_failover(request) => result,
        }
    }

    async fn forward_with_failover(
        &self,
        request: &ForwardRequest,
    ) -> Result<ForwardResponse, GatewayError> {
        let mut tried = TriedSet::new();
        let mut last_failure: Option<AttemptFailure> = None;

        for _ in 0..self.registry.len() {
            let available = tried.available(&self.registry);
            let Some(instance) = self.strategy.select(&available) else {
                break;
            };
            if !tried.insert(instance.name()) {
                break;
            }

            match self.attempt(instance, request).await {
                Ok(response) => {
                    tracing::info!(
                        instance = instance.name(),
                        attempts = tried.len(),
                        status = response.status.as_u16(),
                        "Forwarded {} {}",
                        request.method,
                        request.path
                    );
                    return Ok(response);
                }
                Err(failure) => {
                    tracing::warn!(attempts = tried.len(), "Attempt failed: {failure}");
                    last_failure = Some(failure);
                }
            }
        }

        tracing::error!(
            attempts = tried.len(),
            "All OpenAI instances failed for {} {}",
            request.method,
            request.path
        );
        Err(GatewayError::AllInstancesFailed {
            last_failure: last_failure.map(Box::new),
        })
    }

    /// Forward a buffered request trying each instance at most once in
    /// rotation order. Exhaustion yields a generic failure.
    pub async fn forward_round_robin(
        &self,
        request: &ForwardRequest,
    ) -> Result<ForwardResponse, GatewayError> {
        if self.registry.is_empty() {
            return Err(GatewayError::NoInstancesConfigured);
        }
        let _guard = self.in_flight.track().ok_or(GatewayError::ClientClosed)?;

        let rotate = async {
            for instance in self.round_robin.rotation() {
                match self.attempt(instance, request).await {
                    Ok(response) => return Ok(response),
                    Err(failure) => tracing::warn!("Round-robin attempt failed: {failure}"),
                }
            }
            tracing::error!("All instances are unavailable");
            Err(GatewayError::AllInstancesUnavailable)
        };

        tokio::select! {
            biased;
            _ = self.in_flight.aborted() => Err(GatewayError::ClientClosed),
            result = rotate => result,
        }
    }

    /// One bounded buffered attempt against one instance.
    async fn attempt(
        &self,
        instance: &Instance,
        request: &ForwardRequest,
    ) -> Result<ForwardResponse, AttemptFailure> {
        let outbound = build_outbound_request(instance, request, &request.body)?;
        let exchange = async {
            let response = self
                .client
                .send_request(outbound)
                .await
                .map_err(|e| AttemptFailure::transport(e.to_string(), false, instance.name()))?;
            let (parts, body) = response.into_parts();
            let bytes = body
                .collect()
                .await
                .map_err(|e| {
                    AttemptFailure::transport(
                        format!("failed to read response body: {e}"),
                        false,
                        instance.name(),
                    )
                })?
                .to_bytes();
            Ok::<_, AttemptFailure>((parts, bytes))
        };

        let (parts, bytes) = tokio::time::timeout(self.settings.request_timeout, exchange)
            .await
            .map_err(|_| {
                AttemptFailure::transport(
                    format!("timed out after {:?}", self.settings.request_timeout),
                    true,
                    instance.name(),
                )
            })??;

        if !parts.status.is_success() {
            return Err(AttemptFailure::upstream(parts.status, &bytes, instance.name()));
        }

        let body = ResponseBody::from_bytes(bytes);
        Ok(ForwardResponse {
            status: parts.status,
            headers: response_headers(&parts.headers, &body),
            body,
        })
    }

    /// Stop admitting calls, drain in-flight ones for up to the drain timeout,
    /// abort the rest and release the client pool. Later calls are no-ops.
    pub async fn close(&self) {
        if !self.in_flight.begin_close() {
            tracing::debug!("Gateway client pool already closed");
            return;
        }

        tracing::info!(
            in_flight = self.in_flight.active_count(),
            "Closing gateway client pool, draining for up to {:?}",
            self.settings.drain_timeout
        );
        if !self.in_flight.drain(self.settings.drain_timeout).await {
            tracing::warn!(
                in_flight = self.in_flight.active_count(),
                "Drain timeout exceeded, aborting in-flight calls"
            );
        }
        self.in_flight.abort();
        self.client.close().await;
        tracing::info!("Gateway client pool closed");
    }
}

/// Build the outbound request for one attempt. Failures here are charged to
/// the instance like any transport error.
pub(crate) fn build_outbound_request(
    instance: &Instance,
    request: &ForwardRequest,
    body: &RequestBody,
) -> Result<Request<AxumBody>, AttemptFailure> {
    let invalid = |message: String| AttemptFailure::transport(message, false, instance.name());

    let url = build_outbound_url(instance, &request.path);
    let headers = filter_headers(&request.headers, instance)
        .map_err(|e| invalid(format!("invalid outbound headers: {e}")))?;
    let payload = body
        .to_bytes()
        .map_err(|e| invalid(format!("failed to encode request body: {e}")))?;

    tracing::info!(
        instance = instance.name(),
        "Sending {} request to: {}",
        request.method,
        url
    );

    let mut outbound = Request::builder()
        .method(request.method.clone())
        .uri(&url)
        .body(AxumBody::from(payload))
        .map_err(|e| invalid(format!("invalid outbound request to {url}: {e}")))?;
    *outbound.headers_mut() = headers;
    Ok(outbound)
}

/// Upstream headers minus framing, since the body is re-encoded.
fn response_headers(upstream: &HeaderMap, body: &ResponseBody) -> HeaderMap {
    let mut headers = upstream.clone();
    for name in [CONTENT_LENGTH, TRANSFER_ENCODING, CONNECTION] {
        headers.remove(name);
    }
    if matches!(body, ResponseBody::Json(_)) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    headers
}
