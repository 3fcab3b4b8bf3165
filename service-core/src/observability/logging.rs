use opentelemetry::trace::TraceError;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber: JSON logs on stdout, filtered by `RUST_LOG`
/// or `log_level`, plus OTLP span export when an endpoint is given.
///
/// An exporter that cannot be built is reported on stderr and skipped; the
/// service keeps logging locally.
pub fn init_tracing(service_name: &str, log_level: &str, otlp_endpoint: Option<&str>) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let telemetry = otlp_endpoint.and_then(|endpoint| match otlp_tracer(service_name, endpoint) {
        Ok(tracer) => Some(tracing_opentelemetry::layer().with_tracer(tracer)),
        Err(e) => {
            eprintln!(
                "Failed to initialize OTLP tracer for service '{}' at endpoint '{}': {}",
                service_name, endpoint, e
            );
            None
        }
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(telemetry)
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .json()
                .flatten_event(true),
        )
        .init();
}

fn otlp_tracer(service_name: &str, endpoint: &str) -> Result<sdktrace::Tracer, TraceError> {
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint);

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
            KeyValue::new("service.name", service_name.to_string()),
        ])))
        .install_batch(runtime::Tokio)
}
