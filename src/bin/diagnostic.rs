//! Read-only operator aid: dumps bot state, tracked orders, recent
//! `order_states` audit rows, and live exchange positions/open orders for a
//! symbol. Grounded on `original_source/app/scripts/diagnostic.py` and
//! `watch.py`, kept thin per the "CLI debug scripts" non-goal.
//!
//! This reference build's `StreamBroker` is in-memory and process-local, so
//! bot state/tracked orders only show real data when this binary shares a
//! process with the server (e.g. called from a test harness); against a
//! networked broker implementation they would reflect live production state.
//! `order_states` rows are read from the real, shared sqlite file and do
//! reflect actual history regardless of process boundary.

use anyhow::{Context, Result};
use clap::Parser;
use regime_breakout_bot::config::Config;
use regime_breakout_bot::domain::keys;
use regime_breakout_bot::domain::ports::{ExchangeClient, StateStore, StreamBroker};
use regime_breakout_bot::infrastructure::broker::InMemoryStreamBroker;
use regime_breakout_bot::infrastructure::exchange::BinanceFuturesClient;
use regime_breakout_bot::infrastructure::persistence::{Database, OrderStateRepository, SqliteOrderStateRepository};
use regime_breakout_bot::infrastructure::state_store::BrokerStateStore;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::prelude::*;

/// Dump diagnostic information for one symbol/timeframe pair.
#[derive(Parser, Debug)]
#[command(name = "diagnostic")]
struct Args {
    /// Trading pair, e.g. BTCUSDT.
    #[arg(long)]
    sym: String,

    /// Candle timeframe, e.g. 2m.
    #[arg(long, default_value = "2m")]
    tf: String,

    /// Bot id to inspect tracked orders / bot state for. If omitted, only
    /// symbol-level information is printed.
    #[arg(long)]
    bot_id: Option<String>,

    /// Max recent order_states rows to print.
    #[arg(long, default_value_t = 10)]
    limit: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::WARN.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;

    println!("{}", "=".repeat(70));
    println!("{} diagnostic", args.sym);
    println!("{}", "=".repeat(70));

    let broker: Arc<dyn StreamBroker> = Arc::new(InMemoryStreamBroker::new());
    let snap_key = keys::snapshot_hash(&args.sym, &args.tf);
    let snapshot = broker.hgetall(&snap_key).await.context("failed to read indicator snapshot hash")?;

    println!("\n1. Indicator Snapshot ({snap_key})");
    println!("{}", "-".repeat(70));
    if snapshot.is_empty() {
        println!("   (empty — this reference broker is process-local; run alongside a live server)");
    } else {
        for key in ["ts", "close", "regime", "ma20", "ma200"] {
            println!("   {key:<8}: {}", snapshot.get(key).map(String::as_str).unwrap_or("N/A"));
        }
    }

    if let Some(bot_id) = &args.bot_id {
        let store = BrokerStateStore::new(broker.clone());
        let state = store.read_bot_state(bot_id).await.context("failed to read bot state")?;
        let tracked = store.list_tracked_orders(bot_id).await.context("failed to list tracked orders")?;

        println!("\n2. Bot State ({bot_id})");
        println!("{}", "-".repeat(70));
        println!("   last_signal_id:       {:?}", state.last_signal_id);
        println!("   armed_entry_order_id: {:?}", state.armed_entry_order_id);
        println!("   bracket_ids:          {:?}", state.bracket_ids);
        println!("   position_side:        {:?}", state.position_side);
        println!("   position_qty:         {:?}", state.position_qty);
        println!("   tracked orders:       {tracked:?}");
    }

    let database = Database::new(&format!("sqlite://{}", config.db_path)).await.context("failed to open order_states database")?;
    let order_states = SqliteOrderStateRepository::new(database);
    let rows = order_states.list_by_symbol(&args.sym, args.limit).await.context("failed to list order_states rows")?;

    println!("\n3. Recent order_states rows (up to {})", args.limit);
    println!("{}", "-".repeat(70));
    if rows.is_empty() {
        println!("   (none)");
    } else {
        for row in &rows {
            println!(
                "   bot={} signal={} status={} order_id={:?} sl={:?} tp={:?}",
                row.bot_id, row.signal_id, row.status, row.order_id, row.stop_order_id, row.take_profit_order_id
            );
        }
    }

    println!("\n4. Live Exchange State");
    println!("{}", "-".repeat(70));
    let exchange = BinanceFuturesClient::new(config.binance_api_key, config.binance_api_secret, config.binance_base_url);
    match exchange.get_symbol_filters(&args.sym).await {
        Ok(filters) => println!("   filters: {filters:?}"),
        Err(e) => println!("   filters: error fetching ({e})"),
    }
    match exchange.get_positions("", Some(&args.sym)).await {
        Ok(positions) => println!("   positions: {positions:?}"),
        Err(e) => println!("   positions: error fetching ({e})"),
    }

    println!("\n{}", "=".repeat(70));
    Ok(())
}
