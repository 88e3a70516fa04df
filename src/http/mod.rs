//! HTTP admission middleware and server.

mod admission;
mod context;
mod server;

pub use admission::{
    publish_quota_headers, rejection_response, AdmissionLayer, AdmissionService, RateLimitedBody,
    RATE_LIMITED_CODE, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
pub use context::{
    authenticated_user, client_ip, normalize_path, AuthenticatedUser, EndpointName, RequestContext,
    X_FORWARDED_FOR, X_REAL_IP,
};
pub use server::{build_router, HttpServer};
