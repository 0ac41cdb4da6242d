//! Headless server binary: wires one calculator + one signal poller per
//! configured `(symbol, timeframe)` subscription, a handler worker pool
//! draining the in-process task queue, and one periodic reconcile sweep per
//! distinct symbol. Bootstrap style ported from the teacher's
//! `src/bin/server.rs`; this crate's wiring is simple enough (one broker,
//! one store, one handler pool) that it stays inline in `main` rather than
//! growing a separate `application::bootstrap` module.

use anyhow::{Context, Result};
use regime_breakout_bot::application::calculator::Calculator;
use regime_breakout_bot::application::handlers::OrderHandlers;
use regime_breakout_bot::application::reconciler::{self, Reconciler};
use regime_breakout_bot::application::signal_poller::SignalPoller;
use regime_breakout_bot::application::task_queue::{InProcessTaskQueue, OrderTask};
use regime_breakout_bot::config::Config;
use regime_breakout_bot::domain::ports::{ExchangeClient, StreamBroker};
use regime_breakout_bot::domain::regime::DefaultRegimeClassifier;
use regime_breakout_bot::infrastructure::broker::InMemoryStreamBroker;
use regime_breakout_bot::infrastructure::exchange::BinanceFuturesClient;
use regime_breakout_bot::infrastructure::persistence::{Database, SqliteOrderStateRepository};
use regime_breakout_bot::infrastructure::state_store::BrokerStateStore;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false).pretty();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("regime-breakout-bot server {} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(subscriptions = ?config.subscriptions, "configuration loaded");

    let broker: Arc<dyn StreamBroker> = Arc::new(InMemoryStreamBroker::new());
    let store = Arc::new(BrokerStateStore::new(broker.clone()));
    let exchange = Arc::new(BinanceFuturesClient::new(
        config.binance_api_key.clone(),
        config.binance_api_secret.clone(),
        config.binance_base_url.clone(),
    ));

    let database = Database::new(&format!("sqlite://{}", config.db_path)).await.context("failed to open order_states database")?;
    let order_states = Arc::new(SqliteOrderStateRepository::new(database));

    let (queue, mut rx) = InProcessTaskQueue::new(config.task_queue_capacity);
    let queue: Arc<InProcessTaskQueue> = Arc::new(queue);

    let handlers = Arc::new(OrderHandlers::new(store.clone(), exchange.clone()).with_order_state_repository(order_states.clone()));

    // A single mpsc receiver can only be drained from one task at a time, so
    // the "pool" is one dispatcher task fanning each task out to a small set
    // of in-flight handler futures; `handler_pool_size` bounds concurrency.
    {
        let handlers = handlers.clone();
        let pool_size = config.handler_pool_size.max(1);
        tokio::spawn(async move {
            let semaphore = Arc::new(tokio::sync::Semaphore::new(pool_size));
            while let Some(task) = rx.recv().await {
                let handlers = handlers.clone();
                let permit = semaphore.clone().acquire_owned().await.expect("semaphore never closed");
                tokio::spawn(async move {
                    let _permit = permit;
                    match task {
                        OrderTask::Arm(payload) => {
                            let outcome = handlers.on_arm_signal(payload).await;
                            info!(?outcome, "arm task processed");
                        }
                        OrderTask::Disarm(payload) => {
                            let outcome = handlers.on_disarm_signal(payload).await;
                            info!(?outcome, "disarm task processed");
                        }
                    }
                });
            }
        });
    }

    let mut symbols = HashSet::new();
    for (sym, tf) in &config.subscriptions {
        symbols.insert(sym.clone());

        let filters = exchange
            .get_symbol_filters(sym)
            .await
            .with_context(|| format!("failed to fetch symbol filters for {sym}"))?;

        let calculator = Calculator::new(sym.clone(), tf.clone(), filters.tick_size, Arc::new(DefaultRegimeClassifier));
        let calc_broker = broker.clone();
        let calc_sym = sym.clone();
        let calc_tf = tf.clone();
        tokio::spawn(async move {
            if let Err(e) = calculator.run(calc_broker).await {
                tracing::error!(sym = %calc_sym, tf = %calc_tf, error = %e, "calculator exited");
            }
        });

        let poller = SignalPoller::new(sym.clone(), tf.clone(), config.consumer_name.clone(), broker.clone(), store.clone(), queue.clone());
        let poll_sym = sym.clone();
        let poll_tf = tf.clone();
        tokio::spawn(async move {
            if let Err(e) = poller.run().await {
                tracing::error!(sym = %poll_sym, tf = %poll_tf, error = %e, "signal poller exited");
            }
        });

        info!(sym = %sym, tf = %tf, "subscription started");
    }

    let reconciler = Arc::new(Reconciler::new(store.clone(), exchange.clone()));
    for sym in symbols {
        let reconciler = reconciler.clone();
        let period = config.reconcile_interval;
        tokio::spawn(async move {
            reconciler::run_periodic_sweep(reconciler, sym, period).await;
        });
    }

    info!("server running, press Ctrl+C to shut down");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, exiting");

    Ok(())
}
