use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ocrouter_core::Config;
use ocrouter_server::advertiser::outbound_ip;

/// Discovers local OpenCode serve instances and routes traffic to them.
#[derive(Parser)]
#[command(name = "ocrouter", version)]
struct Cli {
    /// Port for the router to listen on
    #[arg(long, default_value_t = 8080)]
    port: u16,
    /// Hostname or IP to bind the router to
    #[arg(long, default_value = "0.0.0.0")]
    hostname: String,
    /// Username for domain naming (default: OS user)
    #[arg(long)]
    username: Option<String>,
    /// Start of the port scan range
    #[arg(long, default_value_t = 30000)]
    scan_start: u16,
    /// End of the port scan range
    #[arg(long, default_value_t = 31000)]
    scan_end: u16,
    /// Seconds between scan passes
    #[arg(long, default_value_t = 5)]
    scan_interval: u64,
    /// Max concurrent port probes
    #[arg(long, default_value_t = 20)]
    scan_concurrency: usize,
    /// Timeout for each port probe, in milliseconds
    #[arg(long, default_value_t = 800)]
    probe_timeout: u64,
    /// Remove backends unseen for this many seconds
    #[arg(long, default_value_t = 30)]
    stale_after: u64,
    /// Disable mDNS service advertisement
    #[arg(long)]
    no_mdns: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = Config::default();
    config.listen_port = cli.port;
    config.listen_addr = format!("{}:{}", cli.hostname, cli.port);
    if let Some(username) = cli.username {
        config.username = username;
    }
    config.scan_port_start = cli.scan_start;
    config.scan_port_end = cli.scan_end;
    config.scan_interval = Duration::from_secs(cli.scan_interval);
    config.scan_concurrency = cli.scan_concurrency;
    config.probe_timeout = Duration::from_millis(cli.probe_timeout);
    config.stale_after = Duration::from_secs(cli.stale_after);
    config.enable_mdns = !cli.no_mdns;

    config.validate().context("invalid config")?;

    info!(
        listen = %config.listen_addr,
        username = %config.username,
        scan_range = format!("{}-{}", config.scan_port_start, config.scan_port_end),
        scan_interval = ?config.scan_interval,
        mdns = config.enable_mdns,
        "starting OpenCode router"
    );

    println!();
    println!("  Dashboard:     http://localhost:{}", config.listen_port);
    println!(
        "  Network:       http://{}:{}",
        outbound_ip(),
        config.listen_port
    );
    println!(
        "  API:           http://localhost:{}/api/backends",
        config.listen_port
    );
    println!("  Username:      {}", config.username);
    println!(
        "  Domain format: {{project}}-{}.local:{}",
        config.username, config.listen_port
    );
    println!(
        "  Path format:   http://localhost:{}/{{project}}/...",
        config.listen_port
    );
    if config.enable_mdns {
        println!("  mDNS:          enabled (type: {})", config.mdns_service_type);
    }
    println!();

    ocrouter_server::run(config).await
}
