//! Config-and-logging demo binary for this crate family: parses a CLI
//! surface for [`ServerConfig`] and pool sizing via `clap`, installs
//! `tracing`, and prints the resolved configuration. The Thrift wire
//! codec and listener socket are out of scope for this library (see
//! [`crate::transport`]), so this binary stops short of actually
//! accepting connections; an embedder supplies its own `Listener` and
//! calls [`rpc_server::ServerRuntime::with_defaults`] from here onward.

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use rpc_server::{install_tracing, LogFormat, ServerConfig};

/// Runs a thrift-rpc server process.
#[derive(Debug, Parser, serde::Serialize)]
#[command(about, version)]
struct Cli {
    /// Maximum number of concurrently accepted connections.
    #[arg(long, env = "MAX_CONNECTIONS", default_value = "1024")]
    max_connections: usize,

    /// Sample rate, 0.0..=1.0, for payload-size histograms.
    #[arg(long, env = "PAYLOAD_METRICS_SAMPLE_RATE", default_value = "1.0")]
    payload_metrics_sample_rate: f64,

    /// How often the connection pool's background task tops up toward
    /// `min` connections; omit to disable top-up entirely.
    #[arg(long, env = "POOL_BACKGROUND_TASK_INTERVAL", value_parser = humantime::parse_duration)]
    pool_background_task_interval: Option<std::time::Duration>,

    /// Log output format.
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    log_format: LogFormatArg,

    /// Print the resolved configuration as JSON and exit, instead of
    /// logging it, for use by deployment tooling that wants a machine-
    /// readable snapshot of what a given set of flags/env vars resolves to.
    #[arg(long)]
    print_config_json: bool,
}

#[derive(Clone, Copy, Debug, serde::Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let config = ServerConfig {
        max_connections: cli.max_connections,
        payload_metrics_sample_rate: cli.payload_metrics_sample_rate,
    };

    if cli.print_config_json {
        let json = serde_json::to_string_pretty(&config).expect("ServerConfig is always representable as JSON");
        println!("{json}");
        return;
    }

    install_tracing(cli.log_format.into());

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install prometheus recorder");

    tracing::info!(
        max_connections = config.max_connections,
        payload_metrics_sample_rate = config.payload_metrics_sample_rate,
        pool_background_task_interval = ?cli.pool_background_task_interval,
        "resolved server configuration; bring your own Listener to start accepting connections"
    );

    // Render once so an embedder can see the metric text format this
    // recorder produces; a real deployment exposes `metrics_handle.render()`
    // on its own admin HTTP surface instead of stdout.
    println!("{}", metrics_handle.render());
}
