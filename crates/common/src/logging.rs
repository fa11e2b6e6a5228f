use crate::config::Environment;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Initialize the tracing subscriber: pretty output for development, JSON for
/// production.
///
/// Filtering follows `RUST_LOG` (defaults to "info"). An OpenTelemetry layer is
/// always installed; it only exports once a global tracer provider exists (see
/// [`crate::TelemetryGuard`]).
pub fn setup_logging(environment: Environment) {
    if let Err(e) = install_subscriber(environment, tracing_opentelemetry::layer()) {
        eprintln!("Failed to install tracing subscriber: {}", e);
    }
}

pub(crate) fn install_subscriber<L>(environment: Environment, otel_layer: L) -> anyhow::Result<()>
where
    L: Layer<Registry> + Send + Sync + 'static,
{
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry()
        .with(otel_layer)
        .with(env_filter);

    match environment {
        Environment::Production => registry
            .with(tracing_subscriber::fmt::layer().json().with_level(true))
            .try_init()?,
        Environment::Development => registry
            .with(tracing_subscriber::fmt::layer().pretty().with_ansi(true))
            .try_init()?,
    }

    Ok(())
}
