//! Failure taxonomy of the forwarding engines.
//!
//! Per-attempt failures ([`AttemptFailure`]) drive the retry loop and keep the
//! instance that produced them out-of-band, so the body handed to a caller
//! never carries bookkeeping. Only terminal outcomes become a [`GatewayError`].
use http::StatusCode;
use serde_json::{Value, json};
use thiserror::Error;

/// One failed attempt against one instance.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptFailure {
    /// The backend answered with a non-2xx status
    Upstream {
        status: StatusCode,
        body: Value,
        instance: String,
    },
    /// The backend could not be reached or did not answer in time
    Transport {
        message: String,
        timed_out: bool,
        instance: String,
    },
}

impl AttemptFailure {
    /// Wrap a non-2xx response body, keeping JSON as-is and enveloping anything else.
    pub fn upstream(status: StatusCode, raw_body: &[u8], instance: &str) -> Self {
        let body = serde_json::from_slice::<Value>(raw_body).unwrap_or_else(|_| {
            json!({
                "error": {
                    "message": String::from_utf8_lossy(raw_body),
                    "code": status.as_u16(),
                }
            })
        });
        AttemptFailure::Upstream {
            status,
            body,
            instance: instance.to_string(),
        }
    }

    pub fn transport(message: impl Into<String>, timed_out: bool, instance: &str) -> Self {
        AttemptFailure::Transport {
            message: message.into(),
            timed_out,
            instance: instance.to_string(),
        }
    }

    /// Instance that produced this failure, for logs only.
    pub fn instance(&self) -> &str {
        match self {
            AttemptFailure::Upstream { instance, .. } | AttemptFailure::Transport { instance, .. } => {
                instance
            }
        }
    }

    /// Status the caller sees when this is the terminal failure.
    pub fn status(&self) -> StatusCode {
        match self {
            AttemptFailure::Upstream { status, .. } => *status,
            AttemptFailure::Transport {
                timed_out: true, ..
            } => StatusCode::GATEWAY_TIMEOUT,
            AttemptFailure::Transport { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// Caller-facing body: upstream payload verbatim, or a generic transport envelope.
    pub fn client_body(&self) -> Value {
        match self {
            AttemptFailure::Upstream { body, .. } => body.clone(),
            AttemptFailure::Transport { timed_out, .. } => {
                let message = if *timed_out {
                    "Upstream request timed out"
                } else {
                    "Upstream request failed"
                };
                json!({ "error": { "message": message, "type": "transport_error" } })
            }
        }
    }
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptFailure::Upstream {
                status, instance, ..
            } => write!(f, "instance '{instance}' returned {status}"),
            AttemptFailure::Transport {
                message, instance, ..
            } => write!(f, "instance '{instance}' unreachable: {message}"),
        }
    }
}

/// Terminal errors surfaced by the gateway service
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("No OpenAI instances configured")]
    NoInstancesConfigured,

    /// Every instance was tried; carries the last failure observed
    #[error("All OpenAI instances failed: {}", last_failure_summary(.last_failure))]
    AllInstancesFailed {
        last_failure: Option<Box<AttemptFailure>>,
    },

    /// The round-robin path ran out of instances
    #[error("All instances are unavailable")]
    AllInstancesUnavailable,

    /// A successful stream broke after it started
    #[error("Stream terminated mid-flight: {0}")]
    StreamTerminatedMidFlight(String),

    #[error("Gateway client pool is closed")]
    ClientClosed,
}

fn last_failure_summary(failure: &Option<Box<AttemptFailure>>) -> String {
    failure
        .as_ref()
        .map_or_else(|| "no attempt recorded".to_string(), |f| f.to_string())
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::NoInstancesConfigured => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::AllInstancesFailed {
                last_failure: Some(failure),
            } => failure.status(),
            GatewayError::AllInstancesFailed { last_failure: None } => StatusCode::BAD_GATEWAY,
            GatewayError::AllInstancesUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::StreamTerminatedMidFlight(_) => StatusCode::BAD_GATEWAY,
            GatewayError::ClientClosed => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Structured, sanitized body for the caller.
    pub fn client_body(&self) -> Value {
        match self {
            GatewayError::AllInstancesFailed {
                last_failure: Some(failure),
            } => failure.client_body(),
            GatewayError::AllInstancesFailed { last_failure: None } => {
                json!({ "error": { "message": "All OpenAI instances failed", "type": "gateway_error" } })
            }
            GatewayError::StreamTerminatedMidFlight(_) => {
                json!({ "error": { "message": "Upstream stream terminated", "type": "stream_error" } })
            }
            other => json!({ "error": { "message": other.to_string(), "type": "gateway_error" } }),
        }
    }
}
