//! Shared utilities for integration tests: a scripted `HttpClient` fake and
//! real axum mock backends on ephemeral ports.
#![allow(dead_code)]

use std::{
    collections::HashMap,
    io,
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::{Router, body::Body as AxumBody};
use bytes::Bytes;
use futures_util::stream;
use http::{HeaderMap, Request, Response, StatusCode};
use http_body_util::BodyExt;
use openai_gateway::{
    GatewayService,
    core::{ForwardSettings, Instance, InstanceRegistry, LoadBalancingStrategy},
    ports::http_client::{HttpClient, HttpClientError, HttpClientResult},
};
use serde_json::Value;
use tokio::net::TcpListener;

/// What a scripted instance answers.
#[derive(Clone)]
pub enum Reply {
    Json(u16, Value),
    Text(u16, &'static str),
    /// 200 with these exact bytes and content type
    Binary(&'static [u8], &'static str),
    Transport(&'static str),
    /// 200 with a body delivered in these chunks
    Events(Vec<&'static str>),
    /// 200, the chunks, then a read error
    EventsThenError(Vec<&'static str>),
    /// 200, the chunks, then the body stalls forever
    EventsThenStall(Vec<&'static str>),
    /// Never answers
    Hang,
}

/// One recorded outbound request.
#[derive(Debug, Clone)]
pub struct Call {
    pub host: String,
    pub uri: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// `HttpClient` fake keyed by outbound host (the instance name in tests).
#[derive(Default)]
pub struct ScriptedClient {
    replies: HashMap<String, Reply>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<Call>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    closed: AtomicBool,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, host: &str, reply: Reply) -> Self {
        self.replies.insert(host.to_string(), reply);
        self
    }

    /// Delay before `host` answers.
    pub fn delay(mut self, host: &str, delay: Duration) -> Self {
        self.delays.insert(host.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn hosts(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.host).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Highest number of requests that were in flight at once.
    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn chunk_stream(
    chunks: Vec<&'static str>,
) -> impl futures_util::Stream<Item = Result<Bytes, io::Error>> + Send + 'static {
    stream::iter(
        chunks
            .into_iter()
            .map(|chunk| Ok::<_, io::Error>(Bytes::from_static(chunk.as_bytes()))),
    )
}

#[async_trait]
impl HttpClient for ScriptedClient {
    async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>> {
        if self.is_closed() {
            return Err(HttpClientError::Closed);
        }
        let (parts, body) = req.into_parts();
        let host = parts.uri.host().unwrap_or_default().to_string();
        let body = body.collect().await.map(|b| b.to_bytes()).unwrap_or_default();
        self.calls.lock().unwrap().push(Call {
            host: host.clone(),
            uri: parts.uri.to_string(),
            headers: parts.headers,
            body,
        });

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let _active = ActiveGuard(&self.active);

        if let Some(delay) = self.delays.get(&host) {
            tokio::time::sleep(*delay).await;
        }

        let reply = self
            .replies
            .get(&host)
            .cloned()
            .unwrap_or(Reply::Transport("no script for host"));

        let (status, body) = match reply {
            Reply::Json(status, value) => (status, AxumBody::from(value.to_string())),
            Reply::Text(status, text) => (status, AxumBody::from(text)),
            Reply::Binary(bytes, content_type) => {
                let mut response = Response::new(AxumBody::from(Bytes::from_static(bytes)));
                response.headers_mut().insert(
                    http::header::CONTENT_TYPE,
                    http::HeaderValue::from_static(content_type),
                );
                return Ok(response);
            }
            Reply::Transport(message) => {
                return Err(HttpClientError::ConnectionError(message.to_string()));
            }
            Reply::Events(chunks) => (200, AxumBody::from_stream(chunk_stream(chunks))),
            Reply::EventsThenError(chunks) => {
                let failing = stream::once(async {
                    Err::<Bytes, _>(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
                });
                (
                    200,
                    AxumBody::from_stream(futures_util::StreamExt::chain(
                        chunk_stream(chunks),
                        failing,
                    )),
                )
            }
            Reply::EventsThenStall(chunks) => (
                200,
                AxumBody::from_stream(futures_util::StreamExt::chain(
                    chunk_stream(chunks),
                    stream::pending(),
                )),
            ),
            Reply::Hang => std::future::pending().await,
        };

        let mut response = Response::new(body);
        *response.status_mut() = StatusCode::from_u16(status).unwrap();
        Ok(response)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Always takes the first candidate, so attempt order follows registry order.
pub struct InOrder;

impl LoadBalancingStrategy for InOrder {
    fn select<'a>(&self, candidates: &[&'a Instance]) -> Option<&'a Instance> {
        candidates.first().copied()
    }
}

/// Instance whose outbound host equals its name.
pub fn instance(name: &str) -> Instance {
    Instance::new(name, &format!("http://{name}"), format!("key-{name}")).unwrap()
}

pub fn registry(names: &[&str]) -> InstanceRegistry {
    InstanceRegistry::new(names.iter().map(|name| instance(name)).collect())
}

pub fn test_settings() -> ForwardSettings {
    ForwardSettings {
        request_timeout: Duration::from_secs(5),
        drain_timeout: Duration::from_millis(200),
    }
}

pub fn service(names: &[&str], client: Arc<ScriptedClient>) -> GatewayService {
    GatewayService::with_registry(registry(names), client, test_settings())
}

pub fn ordered_service(names: &[&str], client: Arc<ScriptedClient>) -> GatewayService {
    service(names, client).with_strategy(Box::new(InOrder))
}

/// Serve `router` on an ephemeral local port.
pub async fn spawn_backend(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
