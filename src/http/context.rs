//! Typed access to the request attributes limiter keys are built from.
//!
//! Upstream layers attach identity and endpoint names as typed request
//! extensions; nothing here reads untyped state.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, MatchedPath};
use axum::http::{HeaderMap, HeaderName, Method, Request};

use crate::ratelimit::KeyParts;

/// Header carrying the proxy chain, client first.
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
/// Header carrying the client address as seen by a single proxy.
pub const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

/// Address used when no source yields one.
const UNKNOWN_CLIENT: &str = "unknown";

/// Identity established by an upstream authentication layer.
///
/// Insert it into the request extensions; a missing or empty id means the
/// caller is anonymous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

/// Logical endpoint name, overriding the matched route for key purposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointName(pub String);

/// Resolve the apparent client address.
///
/// Sources in priority order, first non-empty wins: the first entry of
/// `X-Forwarded-For`, then `X-Real-IP`, then the transport peer.
///
/// Both headers are set by whoever sent the request and can be forged. The
/// result is good enough to spread quota fairly between callers; it must
/// not be used for authentication or access control.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get(X_FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get(X_REAL_IP)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Collapse repeated slashes and drop a trailing one, so `/orders`,
/// `/orders/` and `//orders` name the same endpoint.
pub fn normalize_path(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len() + 1);
    for segment in path.split('/').filter(|segment| !segment.is_empty()) {
        normalized.push('/');
        normalized.push_str(segment);
    }
    if normalized.is_empty() {
        normalized.push('/');
    }
    normalized
}

/// The authenticated user attached to a request, if any.
pub fn authenticated_user<B>(request: &Request<B>) -> Option<&str> {
    request
        .extensions()
        .get::<AuthenticatedUser>()
        .map(|user| user.0.as_str())
        .filter(|id| !id.is_empty())
}

/// Everything a limiter key can depend on, captured from one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    client_ip: String,
    user_id: Option<String>,
    endpoint: String,
    method: Method,
}

impl RequestContext {
    /// Capture the context of a request.
    ///
    /// The endpoint is the [`EndpointName`] extension if present, else the
    /// matched route pattern, else the normalized request path.
    pub fn from_request<B>(request: &Request<B>) -> Self {
        let extensions = request.extensions();

        let peer = extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        let endpoint = extensions
            .get::<EndpointName>()
            .map(|name| name.0.clone())
            .or_else(|| extensions.get::<MatchedPath>().map(|path| path.as_str().to_owned()))
            .unwrap_or_else(|| normalize_path(request.uri().path()));

        Self {
            client_ip: client_ip(request.headers(), peer),
            user_id: authenticated_user(request).map(str::to_owned),
            endpoint,
            method: request.method().clone(),
        }
    }

    pub fn client_ip(&self) -> &str {
        &self.client_ip
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Borrow the context as key input.
    pub fn key_parts(&self) -> KeyParts<'_> {
        KeyParts {
            client_ip: &self.client_ip,
            user_id: self.user_id.as_deref(),
            endpoint: &self.endpoint,
            method: self.method.as_str(),
        }
    }
}
