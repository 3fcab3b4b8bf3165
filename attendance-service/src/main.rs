use attendance_service::config::AttendanceConfig;
use attendance_service::services::init_metrics;
use attendance_service::startup::Application;
use service_core::observability::init_tracing;
use tokio::signal;

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = AttendanceConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    init_tracing(
        "attendance-service",
        &config.common.log_level,
        config.common.otlp_endpoint.as_deref(),
    );

    // Recorder must exist before any metric is recorded
    init_metrics();

    let app = Application::build(config).await.map_err(|e| {
        tracing::error!("Failed to start attendance service: {}", e);
        std::io::Error::other(format!("Startup error: {}", e))
    })?;

    app.run_until(shutdown_signal()).await
}
