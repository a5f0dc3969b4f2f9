use std::net::SocketAddr;

use clap::Parser;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Telemetry-related configuration options
#[derive(Debug, Clone, Parser)]
pub struct TelemetryOpts {
    /// Whether to use ANSI colors in the logs. Disable if you're piping logs to a file or using
    /// third party services to collect logs, like kubectl/cloudwatch/loki etc.
    #[clap(long = "telemetry.use-ansi", env = "QUILL_TELEMETRY_USE_ANSI", default_value_t = true)]
    pub use_ansi: bool,
    /// The port to listen for Prometheus metrics. Default is `9090`.
    #[clap(long = "metrics.port", env = "QUILL_METRICS_PORT", default_value_t = 9090)]
    pub metrics_port: u16,
    /// Disable metrics collection. Default is `false`.
    #[clap(long = "metrics.disable", env = "QUILL_DISABLE_METRICS", default_value_t = false)]
    pub disable_metrics: bool,
}

impl TelemetryOpts {
    /// Setup the telemetry stack for Quill.
    ///
    /// 1. Tracing subscriber with an env filter, writing to stdout
    /// 2. Metrics collection with Prometheus (if enabled)
    pub fn setup(&self, instance_name: &str) -> Result<(), BuildError> {
        tracing_subscriber::registry()
            .with(EnvFilter::from_env("RUST_LOG"))
            .with(tracing_subscriber::fmt::layer().with_ansi(self.use_ansi))
            .init();

        if !self.disable_metrics {
            let prometheus_address = SocketAddr::from(([0, 0, 0, 0], self.metrics_port));

            PrometheusBuilder::new()
                .with_http_listener(prometheus_address)
                .add_global_label("instance", instance_name)
                .install()?;

            info!("Metrics enabled on {}", prometheus_address);
        }

        Ok(())
    }
}
