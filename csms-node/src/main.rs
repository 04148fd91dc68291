//! CSMS Node - demo central system
//!
//! Accepts OCPP-J charge points, answers their requests with the standard
//! handlers and expires unanswered outbound calls.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (0.0.0.0:8180, ocpp1.6 preferred over ocpp1.5)
//! csms-node
//!
//! # Load a config file and override the listener
//! csms-node --config csms.toml --bind 127.0.0.1:9000
//!
//! # Charge points connect to ws://<host>:<port>/<anything>/<charge box id>
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use csms_dispatch::persistence::DEFAULT_OUTCOME_LIMIT;
use csms_dispatch::{
    standard_handlers, DispatchConfig, Dispatcher, InMemoryRepository, WebSocketAdapter,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Demo OCPP 1.5/1.6 central system
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// WebSocket listen address
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Outbound call timeout in seconds
    #[arg(long)]
    call_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error); overrides RUST_LOG
    #[arg(short, long)]
    log_level: Option<String>,

    /// Call outcomes kept in memory
    #[arg(long, default_value_t = DEFAULT_OUTCOME_LIMIT)]
    outcome_limit: usize,

    /// Seconds between status lines
    #[arg(long, default_value = "60")]
    status_interval: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Setup logging
    let filter = match &args.log_level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Build configuration
    let mut config = match &args.config {
        Some(path) => DispatchConfig::from_toml_file(path)?,
        None => DispatchConfig::default(),
    };
    if let Some(addr) = args.bind {
        config = config.with_bind_addr(addr);
    }
    if let Some(secs) = args.call_timeout {
        if secs == 0 {
            return Err("--call-timeout must be positive".into());
        }
        config = config.with_call_timeout(Duration::from_secs(secs));
    }

    let subprotocols: Vec<_> = config
        .websocket
        .subprotocols
        .iter()
        .map(|v| v.subprotocol())
        .collect();

    // Print banner
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║              CSMS Node - OCPP 1.5/1.6 Central System         ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Listen:       {:<45} ║", config.websocket.bind_addr);
    println!("║  Protocols:    {:<45} ║", subprotocols.join(", "));
    println!("║  Call timeout: {:<45} ║", format!("{:?}", config.call_timeout));
    println!("║  Heartbeat:    {:<45} ║", format!("{}s", config.heartbeat_interval));
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    let websocket = WebSocketAdapter::new(config.websocket.clone());
    let dispatcher = Dispatcher::builder()
        .handlers(standard_handlers(&config))
        .adapter(Arc::new(websocket.clone()))
        .repository(Arc::new(InMemoryRepository::with_outcome_limit(args.outcome_limit)))
        .config(config)
        .build();

    let sweeper = dispatcher.spawn_sweeper();

    let listener = {
        let websocket = websocket.clone();
        tokio::spawn(async move {
            if let Err(e) = websocket.listen().await {
                error!("Listener stopped: {}", e);
            }
        })
    };

    let status = {
        let websocket = websocket.clone();
        let correlator = dispatcher.correlator().clone();
        let period = Duration::from_secs(args.status_interval.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let stats = correlator.stats();
                info!(
                    "Connected: {:?} | pending {} | resolved {} failed {} timed out {} late {} duplicate {}",
                    websocket.connected_devices(),
                    correlator.pending_count(),
                    stats.resolved,
                    stats.failed,
                    stats.timed_out,
                    stats.late,
                    stats.duplicate
                );
            }
        })
    };

    info!("CSMS node running, Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    status.abort();
    listener.abort();
    sweeper.abort();

    Ok(())
}
