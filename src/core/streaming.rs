//! Streaming forwarding.
//!
//! Failover applies only until a backend answers with a 2xx status. From then
//! on the upstream body is relayed line by line and any failure ends the
//! stream with [`GatewayError::StreamTerminatedMidFlight`] instead of a retry.
use std::{io, pin::Pin, time::Duration};

use axum::body::Body as AxumBody;
use bytes::Bytes;
use futures_util::{
    Stream, StreamExt, TryStreamExt,
    stream::{self, BoxStream},
};
use http_body_util::BodyExt;
use tokio::io::AsyncBufReadExt;
use tokio_stream::wrappers::LinesStream;
use tokio_util::{io::StreamReader, sync::CancellationToken};

use crate::{
    core::{
        error::{AttemptFailure, GatewayError},
        gateway::{ForwardRequest, GatewayService, RequestBody, build_outbound_request},
        instance::Instance,
        load_balancer::TriedSet,
    },
    utils::in_flight::InFlightGuard,
};

/// Lazy, forward-only sequence of events. `None` is a normal end; an `Err`
/// item is a terminal failure after which nothing more is yielded.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Bytes, GatewayError>> + Send>>;

/// Prefix stripped from upstream event lines.
pub const DATA_PREFIX: &str = "data: ";
/// Upstream end-of-stream marker.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Classification of one upstream line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    Skip,
    Done,
    Data(String),
}

/// Shape one upstream line into an event.
pub fn parse_event_line(line: &str) -> LineEvent {
    let line = line.trim();
    if line.is_empty() {
        return LineEvent::Skip;
    }
    let payload = line.strip_prefix(DATA_PREFIX).unwrap_or(line);
    if payload == DONE_SENTINEL {
        return LineEvent::Done;
    }
    LineEvent::Data(format!("{payload}\n"))
}

impl GatewayService {
    /// Open a stream against the first instance that answers 2xx, retrying
    /// other instances before that point. When every instance fails, the
    /// returned stream yields the last failure's body as its only event.
    pub async fn forward_streaming(
        &self,
        request: &ForwardRequest,
    ) -> Result<EventStream, GatewayError> {
        if self.registry.is_empty() {
            return Err(GatewayError::NoInstancesConfigured);
        }
        let guard = self.in_flight.track().ok_or(GatewayError::ClientClosed)?;
        let body = request.body.with_stream_enabled();

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

            let opened = tokio::select! {
                biased;
                _ = self.in_flight.aborted() => return Err(GatewayError::ClientClosed),
                opened = self.open_stream(instance, request, &body) => opened,
            };

            match opened {
                Ok(upstream) => {
                    tracing::info!(
                        instance = instance.name(),
                        attempts = tried.len(),
                        "Streaming {} {}",
                        request.method,
                        request.path
                    );
                    return Ok(relay_events(
                        body_lines(upstream),
                        self.settings.request_timeout,
                        self.in_flight.abort_token(),
                        Some(guard),
                    ));
                }
                Err(failure) => {
                    tracing::warn!(attempts = tried.len(), "Stream attempt failed: {failure}");
                    last_failure = Some(failure);
                }
            }
        }

        tracing::error!(
            attempts = tried.len(),
            "All OpenAI instances failed to open a stream for {} {}",
            request.method,
            request.path
        );
        let error = GatewayError::AllInstancesFailed {
            last_failure: last_failure.map(Box::new),
        };
        Ok(terminal_error_event(&error))
    }

    /// Send the request and wait for the status line. Non-2xx bodies are read
    /// in full and turned into an upstream failure.
    async fn open_stream(
        &self,
        instance: &Instance,
        request: &ForwardRequest,
        body: &RequestBody,
    ) -> Result<AxumBody, AttemptFailure> {
        let outbound = build_outbound_request(instance, request, body)?;
        let timeout = self.settings.request_timeout;
        let timed_out = || {
            AttemptFailure::transport(format!("timed out after {timeout:?}"), true, instance.name())
        };

        let response = tokio::time::timeout(timeout, self.client.send_request(outbound))
            .await
            .map_err(|_| timed_out())?
            .map_err(|e| AttemptFailure::transport(e.to_string(), false, instance.name()))?;

        let (parts, upstream) = response.into_parts();
        if parts.status.is_success() {
            return Ok(upstream);
        }

        let bytes = tokio::time::timeout(timeout, upstream.collect())
            .await
            .map_err(|_| timed_out())?
            .map_err(|e| {
                AttemptFailure::transport(
                    format!("failed to read error body: {e}"),
                    false,
                    instance.name(),
                )
            })?
            .to_bytes();
        Err(AttemptFailure::upstream(parts.status, &bytes, instance.name()))
    }
}

/// Split a response body into lines.
fn body_lines(body: AxumBody) -> BoxStream<'static, io::Result<String>> {
    let chunks = TryStreamExt::map_err(body.into_data_stream(), io::Error::other);
    LinesStream::new(StreamReader::new(chunks).lines()).boxed()
}

/// A stream yielding one event with the sanitized error body, then ending.
fn terminal_error_event(error: &GatewayError) -> EventStream {
    let event = Bytes::from(format!("{}\n", error.client_body()));
    Box::pin(stream::once(async move { Ok(event) }))
}

struct RelayState {
    lines: BoxStream<'static, io::Result<String>>,
    idle_timeout: Duration,
    shutdown: CancellationToken,
    finished: bool,
    _guard: Option<InFlightGuard>,
}

/// Turn upstream lines into events. Ends at the sentinel or end of body; ends
/// with an error on read failure, idle timeout, or shutdown.
pub(crate) fn relay_events<S>(
    lines: S,
    idle_timeout: Duration,
    shutdown: CancellationToken,
    guard: Option<InFlightGuard>,
) -> EventStream
where
    S: Stream<Item = io::Result<String>> + Send + 'static,
{
    let state = RelayState {
        lines: lines.boxed(),
        idle_timeout,
        shutdown,
        finished: false,
        _guard: guard,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }
        loop {
            let next = tokio::select! {
                biased;
                _ = state.shutdown.cancelled() => None,
                next = tokio::time::timeout(state.idle_timeout, state.lines.next()) => Some(next),
            };

            let failure = match next {
                None => "gateway shutting down".to_string(),
                Some(Err(_)) => format!("no data for {:?}", state.idle_timeout),
                Some(Ok(None)) => return None,
                Some(Ok(Some(Err(e)))) => e.to_string(),
                Some(Ok(Some(Ok(line)))) => match parse_event_line(&line) {
                    LineEvent::Skip => continue,
                    LineEvent::Done => return None,
                    LineEvent::Data(event) => return Some((Ok(Bytes::from(event)), state)),
                },
            };

            tracing::warn!("Upstream stream terminated mid-flight: {failure}");
            state.finished = true;
            return Some((Err(GatewayError::StreamTerminatedMidFlight(failure)), state));
        }
    }))
}
