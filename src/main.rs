use keel::config::Config;
use keel::services::{
    BalanceArbiter, Bridge, BridgeConfig, ModeRules, Normalizer, SqliteStore, TradeTracker,
};
use keel::feed::BrokerWs;
use keel::types::{AccountMode, OutboundEvent};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keel=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env();
    info!("Starting keel, feed {} db {}", config.feed_url, config.db_path);

    // Durable store and position recovery
    let store = Arc::new(SqliteStore::new(&config.db_path)?);
    let mut tracker = TradeTracker::new(config.point_values.iter().cloned().collect::<HashMap<_, _>>());
    let recovered = tracker.recover_from(&store);
    if recovered > 0 {
        info!("Recovered {} open position(s) from durable storage", recovered);
    }

    // Balance arbiter with mode rules and one-time sim baselines
    let rules = ModeRules::new(config.sim_prefixes.clone());
    let mut arbiter = BalanceArbiter::new(rules);
    let now = chrono::Utc::now().timestamp_millis();
    for (account, amount) in &config.sim_baselines {
        if arbiter.set_baseline(account, *amount, now).is_some() {
            info!("Baseline {:.2} set for {}", amount, account);
        }
    }
    // Recovered sim accounts without an explicit entry take the default
    if let Some(default_baseline) = config.sim_default_baseline {
        let accounts: Vec<String> = tracker
            .open_positions()
            .map(|p| p.account.clone())
            .collect();
        for account in accounts {
            if arbiter.mode(&account) == AccountMode::Sim {
                if arbiter.set_baseline(&account, default_baseline, now).is_some() {
                    info!("Default baseline {:.2} set for {}", default_baseline, account);
                }
            }
        }
    }

    // Bridge: the single consumption context
    let bridge_config = BridgeConfig {
        snapshot_debounce: Duration::from_millis(config.snapshot_debounce_ms),
        tick_buffer: config.tick_buffer,
        outbound_buffer: config.outbound_buffer,
    };
    let (bridge, handle) = Bridge::new(bridge_config, arbiter, tracker, store.clone());

    // Log outbound events at the presentation boundary. Display consumers
    // subscribe the same way.
    let mut outbound_rx = bridge.subscribe();
    tokio::spawn(async move {
        loop {
            match outbound_rx.recv().await {
                Ok(OutboundEvent::BalanceChanged(change)) => {
                    info!(
                        "[{}] {} balance {} -> {:.2} ({})",
                        change.mode,
                        change.account,
                        change
                            .previous
                            .map(|p| format!("{:.2}", p))
                            .unwrap_or_else(|| "unset".to_string()),
                        change.new,
                        change.source
                    );
                }
                Ok(OutboundEvent::TradeClosed(trade)) => {
                    info!(
                        "[{}] {} {} closed: pnl {:+.2} mae {:.2} mfe {:.2}",
                        trade.mode, trade.account, trade.symbol, trade.realized_pnl, trade.mae,
                        trade.mfe
                    );
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    debug!("Outbound subscriber lagged by {}", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let bridge_task = tokio::spawn(bridge.run());

    // Ingestion context: the broker feed
    let normalizer = Arc::new(Normalizer::with_defaults());
    let feed = BrokerWs::new(config.feed_url.clone(), normalizer, handle.clone());
    let feed_task = tokio::spawn(async move {
        if let Err(e) = feed.connect().await {
            tracing::error!("Broker feed error: {}", e);
        }
    });

    // Run until interrupted, then stop ingestion first, drain, snapshot.
    tokio::signal::ctrl_c().await?;
    info!("Shutting down: stopping ingestion, draining bridge");
    feed_task.abort();
    drop(handle);
    bridge_task.await?;
    info!("Shutdown complete");

    Ok(())
}
