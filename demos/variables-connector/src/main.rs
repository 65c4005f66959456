//! Variables connector binary
//!
//! Configuration is read from the file named by `CONNECTOR_CONFIG`
//! (default `connector.toml`). Stops on Ctrl+C; exits with status 1 when a
//! delivery fails header validation.
//!
//! When `METRICS_ADDR` is set (e.g. `0.0.0.0:9090`), connector counters are
//! served in Prometheus format at `http://<METRICS_ADDR>/metrics`.

use anyhow::Context;
use bpm_connector_amqp::AmqpTransport;
use bpm_connector_camunda::CamundaClient;
use bpm_connector_core::ConnectorConfig;
use bpm_connector_runtime::{Supervisor, describe_metrics};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use variables_connector::VariablesHandler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Ok(addr) = std::env::var("METRICS_ADDR") {
        let addr: SocketAddr = addr
            .parse()
            .with_context(|| format!("Invalid METRICS_ADDR '{addr}'"))?;
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install metrics exporter")?;
        describe_metrics();
        tracing::info!(%addr, "Metrics available at http://{addr}/metrics");
    }

    let config = ConnectorConfig::from_env().context("Failed to load connector configuration")?;

    let transport = Arc::new(AmqpTransport::new(&config.transport));
    let engine = Arc::new(CamundaClient::from_config(&config));
    let logging_transport = config
        .logging_endpoint()
        .map(|endpoint| Arc::new(AmqpTransport::new(&endpoint)));

    tracing::info!(
        owner = %config.owner,
        queue = %config.queue,
        broker = transport.redacted_uri(),
        logging = logging_transport.is_some(),
        "Starting variables connector"
    );

    let mut supervisor = Supervisor::new(config, transport, engine, Arc::new(VariablesHandler));
    if let Some(logging_transport) = logging_transport {
        supervisor = supervisor.with_logging_transport(logging_transport);
    }

    supervisor
        .run_until(shutdown_signal())
        .await
        .context("Connector stopped")?;

    tracing::info!("Connector shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Cannot listen for Ctrl+C, running until killed");
        std::future::pending::<()>().await;
    }
}
