//! API HTTP server

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Router, middleware,
    routing::{get, post},
};
use blaze_common::Signal;
use tokio::{net::TcpListener, sync::broadcast};
use tower_http::timeout::TimeoutLayer;

use crate::{
    error::ServerError,
    handlers,
    middleware::{rate_limit, require_claims},
    state::ApiState,
};

/// Build the API routes.
///
/// Every `/api` route is rate limited per client; all but login also require
/// claims. `/health` is open.
pub fn router(state: Arc<ApiState>) -> Router {
    let timeout = Duration::from_secs(state.config.request_timeout_secs);

    let protected = Router::new()
        .route("/api/auth/refresh", post(handlers::refresh))
        .route("/api/send", post(handlers::send))
        .route("/api/send/verified", post(handlers::send_verified))
        .route("/api/verify", post(handlers::verify_domain))
        .route("/api/verify/sender", post(handlers::verify_sender))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_claims));

    let api = Router::new()
        .route("/api/auth/login", post(handlers::login))
        .merge(protected)
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    Router::new()
        .merge(api)
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(TimeoutLayer::new(timeout))
}

/// Submission and verification HTTP server
pub struct ApiServer {
    listener: TcpListener,
    state: Arc<ApiState>,
}

impl ApiServer {
    /// Bind the configured listen address
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn new(state: ApiState) -> Result<Self, ServerError> {
        let address = state.config.listen;
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| ServerError::Bind {
                address: address.to_string(),
                source: e,
            })?;

        tracing::info!(%address, "API server bound successfully");

        Ok(Self {
            listener,
            state: Arc::new(state),
        })
    }

    /// The address actually bound, useful when the port was 0
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the API server until shutdown signal is received
    ///
    /// # Errors
    ///
    /// Returns an error if the server encounters a runtime error.
    pub async fn serve(self, mut shutdown: broadcast::Receiver<Signal>) -> Result<(), ServerError> {
        tracing::info!("API server starting");

        let sweeper = self.state.limiter.spawn_sweeper(shutdown.resubscribe());
        let app = router(self.state).into_make_service_with_connect_info::<SocketAddr>();

        let result = axum::serve(self.listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("API server received shutdown signal");
            })
            .await;

        sweeper.abort();
        result.map_err(|e| ServerError::Runtime(e.to_string()))?;

        tracing::info!("API server stopped");
        Ok(())
    }
}
