//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{Method, Uri};
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::admission::AdmissionLayer;
use crate::error::{Result, TollgateError};
use crate::ratelimit::AdmissionPolicy;

/// Build the service router.
///
/// Everything except `/healthz` sits behind the admission layers. Policies
/// run in the order given: the first one sees the request first.
pub fn build_router(policies: &[Arc<AdmissionPolicy>], request_timeout: Duration) -> Router {
    let mut guarded = Router::new().fallback(admitted);
    for policy in policies.iter().rev() {
        guarded = guarded.layer(AdmissionLayer::new(policy.clone()));
    }

    Router::new()
        .route("/healthz", get(health))
        .merge(guarded)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn admitted(method: Method, uri: Uri) -> Json<Value> {
    Json(json!({
        "status": "admitted",
        "method": method.as_str(),
        "path": uri.path(),
    }))
}

/// HTTP server for the admission service.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The routes to serve
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, router: Router) -> Self {
        Self { addr, router }
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves. Peer
    /// addresses are made available to the admission layers.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound or the server fails.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;

        info!(addr = %self.addr, "Starting HTTP server with graceful shutdown");

        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            TollgateError::Server(e.to_string())
        })
    }
}
