//! openai-gateway - a failover gateway in front of a pool of OpenAI-compatible backends.
//!
//! Every inbound call is forwarded to one backend instance from a fixed pool. When an
//! instance fails (transport error or non-2xx answer) the gateway tries another one it
//! has not tried yet for that call; when all of them fail, the caller gets the last
//! failure observed. Streaming (`"stream": true`) calls take part in the same failover
//! until the first backend starts streaming, after which events are relayed as they
//! arrive and a broken stream is reported, never retried.
//!
//! # Features
//! - Random failover (draw without replacement) and round-robin forward-and-try-all
//! - Server-sent event relaying with `[DONE]` sentinel handling
//! - Path normalization (`openai/` prefix) and per-instance `api-key` injection
//! - One shared keep-alive client pool with a draining `close()`
//! - Optional inbound bearer-token gate, permissive CORS, health endpoints
//! - Structured tracing via `tracing`
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use openai_gateway::{GatewayService, HttpClientAdapter, HttpHandler, config::load_config};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let (config, _origin) = load_config(None)?;
//! let client = Arc::new(HttpClientAdapter::new(&config.client)?);
//! let gateway = Arc::new(GatewayService::new(&config, client));
//! let app = HttpHandler::from_config(gateway.clone(), &config).router();
//! let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
//! axum::serve(listener, app).await?;
//! gateway.close().await;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations) while keeping
//! the forwarding logic inside `core`. The core only talks to the network through the
//! [`HttpClient`] port, which is what tests substitute.
//!
//! # Error Handling
//! Forwarding returns [`core::GatewayError`]; configuration and startup return
//! `eyre::Result<T>` with context attached via `WrapErr`.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{HttpClientAdapter, HttpHandler},
    core::{ForwardRequest, GatewayError, GatewayService},
    ports::http_client::HttpClient,
    utils::GracefulShutdown,
};
