use common::{TelemetryGuard, setup_logging};
use gateway::{GatewayConfig, bootstrap, run_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env()?;

    let _telemetry = match &config.otlp_endpoint {
        Some(endpoint) => Some(TelemetryGuard::init("gateway", endpoint, config.environment)?),
        None => {
            setup_logging(config.environment);
            None
        }
    };

    tracing::info!(
        environment = config.environment.as_str(),
        addr = %config.addr,
        "Gateway starting"
    );

    let state = bootstrap::build_state(config)?;
    run_server(state).await
}
