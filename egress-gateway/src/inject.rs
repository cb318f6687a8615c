//! Request and response head rewriting

use crate::config::{CredentialInjection, Upstream, INJECTION_HEADER};
use crate::error::{GatewayError, Result};
use hyper::header::{HeaderMap, HeaderValue, HOST};
use hyper::http::request;
use hyper::http::uri::{PathAndQuery, Uri};
use hyper::Version;

/// Request headers that describe the inbound hop, not the request
const HOP_BY_HOP: [&str; 8] = [
    "host",
    "transfer-encoding",
    "connection",
    "keep-alive",
    "proxy-connection",
    "upgrade",
    "te",
    "trailer",
];

/// Response headers dropped before relaying back
const RESPONSE_HOP_BY_HOP: [&str; 3] = ["transfer-encoding", "connection", "keep-alive"];

/// Rewrite an inbound request head for the upstream.
///
/// Only origin-form targets (`/path?query`) are accepted. The secret, when
/// configured, replaces any client-supplied value for the injection
/// header; otherwise that header is left exactly as received.
pub fn rewrite_request(
    parts: &mut request::Parts,
    upstream: &Upstream,
    injection: &CredentialInjection,
) -> Result<()> {
    let target = origin_form(&parts.uri)?;
    parts.uri = Uri::from(target);
    parts.version = Version::HTTP_11;

    for name in HOP_BY_HOP {
        parts.headers.remove(name);
    }

    let host = HeaderValue::from_str(&upstream.authority())
        .map_err(|_| GatewayError::MalformedRequest(format!("bad upstream host {}", upstream.host())))?;
    parts.headers.insert(HOST, host);

    if let Some(value) = injection.header_value() {
        parts.headers.insert(INJECTION_HEADER, value.clone());
    }

    Ok(())
}

/// Drop framing headers from an upstream response
pub fn strip_response_headers(headers: &mut HeaderMap) {
    for name in RESPONSE_HOP_BY_HOP {
        headers.remove(name);
    }
}

fn origin_form(uri: &Uri) -> Result<PathAndQuery> {
    if uri.scheme().is_some() || uri.authority().is_some() {
        return Err(GatewayError::MalformedRequest(format!(
            "expected an origin-form target, got {}",
            uri
        )));
    }
    match uri.path_and_query() {
        Some(pq) if pq.path().starts_with('/') => Ok(pq.clone()),
        _ => Err(GatewayError::MalformedRequest(format!(
            "unsupported request target {}",
            uri
        ))),
    }
}
