//! Router assembly and server lifecycle.

use crate::config::AttendanceConfig;
use crate::handlers;
use crate::services::AttendanceService;
use axum::{
    middleware::from_fn,
    routing::get,
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{metrics_middleware, request_id_middleware, REQUEST_ID_HEADER};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub attendance: AttendanceService,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/config", get(handlers::public_config))
        .route(
            "/attendance",
            get(handlers::list_attendance).post(handlers::submit_attendance),
        )
        .route("/test", get(handlers::diagnostics))
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: AttendanceConfig) -> Result<Self, AppError> {
        let attendance = AttendanceService::from_config(&config).await?;
        Self::with_service(config, attendance).await
    }

    /// Bind the listener around an already assembled service (port 0 picks a
    /// free port).
    pub async fn with_service(
        config: AttendanceConfig,
        attendance: AttendanceService,
    ) -> Result<Self, AppError> {
        let state = AppState { attendance };

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Attendance service listening on port {}", port);

        Ok(Self {
            port,
            listener,
            router: build_router(state),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serve until `signal` resolves, then drain in-flight requests.
    pub async fn run_until<F>(self, signal: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(signal)
            .await
    }
}
