//! Cross-module wiring test: a calculator reading raw candles off the
//! market stream, through a signal poller fanning out to the task queue,
//! through a handler worker placing orders via a mock exchange. Individual
//! stages have thorough unit coverage in their own modules; this exercises
//! the path between them end to end.

use regime_breakout_bot::application::calculator::Calculator;
use regime_breakout_bot::application::handlers::OrderHandlers;
use regime_breakout_bot::application::signal_poller::SignalPoller;
use regime_breakout_bot::application::task_queue::{InProcessTaskQueue, OrderTask};
use regime_breakout_bot::domain::filters::SymbolFilters;
use regime_breakout_bot::domain::ports::StateStore;
use regime_breakout_bot::domain::regime::RegimeClassifier;
use regime_breakout_bot::domain::types::{BotConfig, BotStatus, Regime, SideMode};
use regime_breakout_bot::infrastructure::broker::InMemoryStreamBroker;
use regime_breakout_bot::infrastructure::exchange::MockExchangeClient;
use regime_breakout_bot::infrastructure::state_store::BrokerStateStore;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const SYM: &str = "BTCUSDT";
const TF: &str = "2m";

/// Plays back a fixed regime sequence, one entry per `process_candle` call.
struct ScriptedClassifier {
    regimes: Vec<Regime>,
    idx: AtomicUsize,
}

impl RegimeClassifier for ScriptedClassifier {
    fn classify(&self, _close: Decimal, _ma20: Option<Decimal>, _ma200: Option<Decimal>) -> Regime {
        let i = self.idx.fetch_add(1, Ordering::SeqCst).min(self.regimes.len() - 1);
        self.regimes[i]
    }
}

fn candle_fields(ts: i64, open: Decimal, high: Decimal, low: Decimal, close: Decimal, color: &str) -> HashMap<String, String> {
    let mut f = HashMap::new();
    f.insert("ts".to_string(), ts.to_string());
    f.insert("open".to_string(), open.to_string());
    f.insert("high".to_string(), high.to_string());
    f.insert("low".to_string(), low.to_string());
    f.insert("close".to_string(), close.to_string());
    f.insert("color".to_string(), color.to_string());
    f
}

async fn wait_for_open_order(exchange: &MockExchangeClient, user_id: &str, sym: &str, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if !exchange.get_open_orders(user_id, Some(sym)).await.unwrap().is_empty() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn wait_for_disarm(store: &BrokerStateStore, bot_id: &str, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if store.read_bot_state(bot_id).await.unwrap().armed_entry_order_id.is_none() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn candle_flows_through_calculator_poller_and_handler_into_a_placed_order() {
    let broker: Arc<dyn regime_breakout_bot::domain::ports::StreamBroker> = Arc::new(InMemoryStreamBroker::new());
    let store = Arc::new(BrokerStateStore::new(broker.clone()));
    let exchange = Arc::new(MockExchangeClient::new());

    let bot_id = "bot-1";
    let cfg = BotConfig {
        bot_id: bot_id.to_string(),
        user_id: "user-1".to_string(),
        sym: SYM.to_string(),
        status: BotStatus::Active,
        side_mode: SideMode::Both,
        risk_per_trade: dec!(0.05),
        leverage: dec!(5),
        tp_ratio: dec!(1.5),
        max_qty: None,
    };
    store.write_bot_config(&cfg).await.unwrap();
    store.index_bot(SYM, bot_id).await.unwrap();
    exchange.set_balance("user-1", "USDT", dec!(1000)).await;
    exchange
        .set_symbol_filters(SYM, SymbolFilters { tick_size: dec!(0.10), step_size: dec!(0.001), min_qty: dec!(0.001), min_notional: dec!(10) })
        .await;

    let (queue, mut rx) = InProcessTaskQueue::new(16);
    let queue = Arc::new(queue);

    let handlers = Arc::new(OrderHandlers::new(store.clone(), exchange.clone()));
    let worker_handlers = handlers.clone();
    tokio::spawn(async move {
        while let Some(task) = rx.recv().await {
            match task {
                OrderTask::Arm(payload) => {
                    let _ = worker_handlers.on_arm_signal(payload).await;
                }
                OrderTask::Disarm(payload) => {
                    let _ = worker_handlers.on_disarm_signal(payload).await;
                }
            }
        }
    });

    let classifier = Arc::new(ScriptedClassifier { regimes: vec![Regime::Long, Regime::Neutral], idx: AtomicUsize::new(0) });
    let calculator = Calculator::new(SYM, TF, dec!(0.10), classifier);
    let calc_broker = broker.clone();
    tokio::spawn(async move {
        let _ = calculator.run(calc_broker).await;
    });

    let poller = SignalPoller::new(SYM, TF, "test-consumer", broker.clone(), store.clone(), queue.clone());
    tokio::spawn(async move {
        let _ = poller.run().await;
    });

    let market_stream = regime_breakout_bot::domain::keys::market_stream(SYM, TF);
    broker.xadd(&market_stream, candle_fields(1, dec!(100.0), dec!(101.0), dec!(99.0), dec!(100.5), "red")).await.unwrap();

    let got_order = wait_for_open_order(&exchange, "user-1", SYM, Duration::from_secs(5)).await;
    assert!(got_order, "expected the entry order to be placed within the timeout");

    let state = store.read_bot_state(bot_id).await.unwrap();
    assert!(state.armed_entry_order_id.is_some());

    broker.xadd(&market_stream, candle_fields(2, dec!(100.5), dec!(100.6), dec!(99.5), dec!(99.8), "red")).await.unwrap();

    let got_disarm = wait_for_disarm(&store, bot_id, Duration::from_secs(5)).await;
    assert!(got_disarm, "expected the disarm signal to clear bot state within the timeout");
}
