//! relayd - onionpay relay daemon
//!
//! Peels, bills and forwards onions for clients that bought sessions on
//! this relay, and serves exit requests to the local TCP services it
//! advertises.

use anyhow::Context;
use clap::Parser;
use onionpay_net::{Node, PaymentHub, ServiceLink, UdpTransport};
use relayd::config::{Config, NodeState};
use relayd::engine::{Collaborators, Engine, EngineStats};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// How often the daemon logs engine statistics
const STATS_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    // Initialize logging
    let filter = EnvFilter::from_default_env().add_directive("relayd=info".parse().unwrap());
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    info!("relayd v{} - onionpay relay", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(config).await {
        error!("relayd failed: {:#}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run(config: Config) -> anyhow::Result<()> {
    config.validate()?;

    let state = NodeState::load_or_create(&config.data_dir)?;
    let identity = state.identity();
    info!("Identity {}", hex::encode(identity.public.as_bytes()));

    let (transport, inbound) = UdpTransport::bind(config.listen)
        .await
        .with_context(|| format!("Binding {}", config.listen))?;

    // Payments arrive through the in-process hub until a Lightning node is
    // attached; the relay pays out through the same hub.
    let hub = PaymentHub::new();
    let payments = hub.register(Node::id_for(&identity.public));

    let services = config
        .parse_services()?
        .into_iter()
        .map(|service| {
            info!("Exit service on port {} at rate {}", service.port, service.rate);
            (service, ServiceLink::tcp(service.port))
        })
        .collect();

    let engine = Engine::new(
        config.engine_config(),
        identity,
        Collaborators {
            transport: Arc::new(transport),
            inbound,
            payments,
            payer: Arc::new(hub),
        },
        services,
    );

    let peers = config.parse_peers()?;
    info!("Known relays: {}", peers.len());
    engine.add_nodes(peers);

    // Spawn stats logging task
    let stats_engine = engine.clone();
    tokio::spawn(async move {
        let mut ticker = interval(STATS_INTERVAL);
        loop {
            ticker.tick().await;
            log_stats("Stats", &stats_engine.stats());
        }
    });

    let shutdown_engine = engine.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        shutdown_engine.shutdown();
    });

    engine.clone().run().await?;

    log_stats("Final stats", &engine.stats());
    Ok(())
}

fn log_stats(label: &str, stats: &EngineStats) {
    info!(
        "{}: {} messages, {} forwarded, {} replies relayed, {} exits served, {} sessions sold, {} payments, {} dropped, {} expired",
        label,
        stats.messages_received,
        stats.forwarded,
        stats.replies_relayed,
        stats.exits_served,
        stats.sessions_created,
        stats.payments_received,
        stats.dropped,
        stats.expired
    );
}
