//! Outbound request shaping: backend path convention and per-instance headers.
use http::{
    HeaderMap, HeaderName, HeaderValue,
    header::{ACCEPT_ENCODING, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST},
};

use crate::core::instance::Instance;

/// Path segment every backend route lives under.
pub const BACKEND_PREFIX: &str = "openai/";

/// Header carrying the per-instance credential.
pub const API_KEY_HEADER: HeaderName = HeaderName::from_static("api-key");

/// Connection-scoped headers that must not be replayed to another host.
const HOP_HEADERS: [HeaderName; 4] = [HOST, CONTENT_LENGTH, CONNECTION, ACCEPT_ENCODING];

/// Rewrite an inbound path (query string included) so that it carries exactly
/// one leading `openai/` segment.
pub fn normalize_path(path: &str) -> String {
    let mut rest = path.strip_prefix('/').unwrap_or(path);
    while let Some(stripped) = rest.strip_prefix(BACKEND_PREFIX) {
        rest = stripped;
    }
    format!("{BACKEND_PREFIX}{rest}")
}

/// Join the instance base URL and the normalized path with a single `/`.
pub fn build_outbound_url(instance: &Instance, path: &str) -> String {
    let base = instance.base_url().as_str().trim_end_matches('/');
    format!("{base}/{}", normalize_path(path))
}

/// Produce the outbound header map for `instance`. The inbound map is left untouched.
pub fn filter_headers(headers: &HeaderMap, instance: &Instance) -> Result<HeaderMap, http::Error> {
    let mut outbound = headers.clone();
    for name in &HOP_HEADERS {
        outbound.remove(name);
    }

    let mut credential = HeaderValue::from_str(instance.credential())?;
    credential.set_sensitive(true);
    outbound.insert(API_KEY_HEADER, credential);

    if !outbound.contains_key(CONTENT_TYPE) {
        outbound.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    Ok(outbound)
}
