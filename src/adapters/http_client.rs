use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::Result;
use hyper::{Request, Response, header};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::{TokioExecutor, TokioTimer},
};
use rustls_native_certs::load_native_certs;

use crate::{
    config::ClientConfig,
    ports::http_client::{HttpClient, HttpClientError, HttpClientResult},
};

type PooledClient = Client<HttpsConnector<HttpConnector>, AxumBody>;

/// Shared outbound client: Hyper with Rustls, keep-alive pooling.
///
/// Responsibilities:
/// * One connection pool reused by every request and every instance
/// * Sets a `User-Agent` if the caller did not
/// * Converts between Hyper body and Axum body types
/// * `close()` drops the pool; requests sent afterwards fail with `Closed`
///
/// Timeouts and retries belong to the gateway service, not to this adapter.
pub struct HttpClientAdapter {
    client: ArcSwapOption<PooledClient>,
}

impl HttpClientAdapter {
    /// Create a new HTTP client adapter.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false); // Allow HTTPS URLs
        http_connector.set_connect_timeout(Some(Duration::from_secs(config.connect_timeout_secs)));
        http_connector.set_keepalive(Some(Duration::from_secs(config.pool_idle_timeout_secs)));

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();

        if !native_certs.certs.is_empty() {
            for cert in native_certs.certs {
                if root_cert_store.add(cert).is_err() {
                    tracing::warn!("Failed to add native certificate to rustls RootCertStore");
                }
            }
            tracing::info!("Loaded {} native root certificates.", root_cert_store.len());
        }

        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs))
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build::<_, AxumBody>(https_connector);

        tracing::info!(
            "Created shared HTTP client (max idle per host: {}, idle timeout: {}s)",
            config.pool_max_idle_per_host,
            config.pool_idle_timeout_secs
        );
        Ok(Self {
            client: ArcSwapOption::from_pointee(client),
        })
    }

    /// Inject a `User-Agent` if absent.
    fn add_common_headers(req: &mut Request<AxumBody>) {
        let headers = req.headers_mut();
        if !headers.contains_key(header::USER_AGENT) {
            headers.insert(
                header::USER_AGENT,
                header::HeaderValue::from_static(concat!(
                    "openai-gateway/",
                    env!("CARGO_PKG_VERSION")
                )),
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        self.client.load().is_none()
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(
        &self,
        mut req: Request<AxumBody>,
    ) -> HttpClientResult<Response<AxumBody>> {
        let client = self
            .client
            .load_full()
            .ok_or(HttpClientError::Closed)?;

        if req.uri().host().is_none() {
            tracing::error!("Outgoing URI has no host: {}", req.uri());
            return Err(HttpClientError::InvalidRequest(
                "Outgoing URI has no host".to_string(),
            ));
        }
        Self::add_common_headers(&mut req);

        let backend_identifier = format!(
            "{}://{}",
            req.uri().scheme_str().unwrap_or("http"),
            req.uri()
                .authority()
                .map_or_else(|| "unknown".to_string(), |a| a.to_string())
        );
        let span = tracing::info_span!(
            "backend_request",
            backend.url = %backend_identifier,
            http.method = %req.method(),
            http.path = %req.uri().path(),
            http.status_code = tracing::field::Empty,
        );

        let method = req.method().clone();
        let uri = req.uri().clone();
        tracing::debug!(parent: &span, "Outgoing request headers: {:?}", req.headers());

        match client.request(req).await {
            Ok(response) => {
                span.record("http.status_code", response.status().as_u16());

                let (mut parts, hyper_body) = response.into_parts();
                // The body is re-framed downstream
                parts.headers.remove(header::TRANSFER_ENCODING);
                Ok(Response::from_parts(parts, AxumBody::new(hyper_body)))
            }
            Err(e) => {
                span.record("http.status_code", 599u16);
                tracing::error!(
                    parent: &span,
                    "Error making request to backend {} ({} {}): {}",
                    backend_identifier,
                    method,
                    uri,
                    e
                );
                Err(HttpClientError::ConnectionError(format!(
                    "Request to {method} {uri} failed: {e}"
                )))
            }
        }
    }

    async fn close(&self) {
        if self.client.swap(None).is_some() {
            tracing::info!("HTTP client pool released");
        }
    }
}
