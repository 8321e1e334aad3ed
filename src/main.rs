use std::time::Duration;

use clap::Parser;
use huddle_server::ServerConfig;
use huddle_telemetry::TelemetryConfig;
use tracing::Level;

/// Real-time presence, chat and call-signaling relay.
#[derive(Debug, Parser)]
#[command(name = "huddle", version, about)]
struct Cli {
    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 3001)]
    port: u16,

    /// Address to bind.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Browser origins allowed to connect (exact match). Defaults to the
    /// built-in development and production origins.
    #[arg(long = "allowed-origin", env = "ALLOWED_ORIGINS", value_delimiter = ',')]
    allowed_origins: Vec<String>,

    /// Default log level; RUST_LOG takes precedence when set.
    #[arg(long, env = "HUDDLE_LOG", default_value_t = Level::INFO)]
    log_level: Level,

    /// Per-module level override, e.g. `huddle_server=debug`. Repeatable.
    #[arg(long = "log-module", value_parser = parse_module_level)]
    module_levels: Vec<(String, Level)>,

    /// Emit logs as JSON lines.
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Outbound frames buffered per connection before new ones are dropped.
    #[arg(long, default_value_t = 256)]
    max_send_queue: usize,

    /// Seconds between heartbeat pings.
    #[arg(long, default_value_t = 30)]
    heartbeat_secs: u64,

    /// Seconds of client silence before the connection is dropped.
    #[arg(long, default_value_t = 90)]
    client_timeout_secs: u64,
}

fn parse_module_level(spec: &str) -> Result<(String, Level), String> {
    huddle_telemetry::parse_module_level(spec)
        .ok_or_else(|| format!("expected module=level, got `{spec}`"))
}

impl Cli {
    fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            log_level: self.log_level,
            module_levels: self.module_levels.clone(),
            json: self.log_json,
        }
    }

    fn server_config(&self) -> ServerConfig {
        let defaults = ServerConfig::default();
        let allowed_origins: Vec<String> = self
            .allowed_origins
            .iter()
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            allowed_origins: if allowed_origins.is_empty() {
                defaults.allowed_origins
            } else {
                allowed_origins
            },
            max_send_queue: self.max_send_queue,
            heartbeat_interval: Duration::from_secs(self.heartbeat_secs),
            client_timeout: Duration::from_secs(self.client_timeout_secs),
            ..defaults
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    huddle_telemetry::init_telemetry(&cli.telemetry_config())?;

    tracing::info!("Starting Huddle relay server");

    let handle = huddle_server::start(cli.server_config()).await?;
    tracing::info!(port = handle.port, "Huddle server ready");

    huddle_server::shutdown_signal().await;
    handle.shutdown().await;
    Ok(())
}
