use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use modbus_firewall::config::FirewallConfig;
use modbus_firewall::listener::Listener;
use modbus_firewall::logger::TransactionLogger;
use modbus_firewall::proxy::ProxyContext;
use modbus_firewall::rate_limiter::RateLimiter;
use modbus_firewall::shutdown;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Transparent Modbus/TCP application-layer firewall", long_about = None)]
struct Args {
    /// Path to the configuration file (TOML, YAML, or JSON; inferred from extension)
    #[clap(short, long, value_parser)]
    config: Option<PathBuf>,

    /// Disable colorized console transaction output
    #[clap(long)]
    no_console_log: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let args = Args::parse();

    let config = FirewallConfig::load(args.config.as_deref())
        .context("failed to load firewall configuration")?;
    info!(
        listen = format!("{}:{}", config.listen_host, config.listen_port),
        plc = format!("{}:{}", config.plc_host, config.plc_port),
        "starting modbus-firewall"
    );

    let policy = Arc::new(config.to_security_policy());
    let limiter = Arc::new(RateLimiter::new());
    let logger = Arc::new(
        TransactionLogger::new(
            PathBuf::from(&config.log_file_path).as_path(),
            config.log_rotate_bytes,
            config.log_backup_count,
            !args.no_console_log,
        )
        .context("failed to open transaction log")?,
    );

    let listen_host = config.listen_host.clone();
    let listen_port = config.listen_port;
    let ctx = Arc::new(ProxyContext {
        config: Arc::new(config),
        policy,
        limiter,
        logger,
    });

    let listener = Listener::bind(&listen_host, listen_port)
        .await
        .context("failed to bind listen socket")?;
    info!(addr = %listener.local_addr()?, "listening for Modbus/TCP clients");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let accept_task = tokio::spawn(listener.run(ctx, shutdown_rx));

    shutdown::wait_for_shutdown().await;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    let _ = accept_task.await;

    Ok(())
}
