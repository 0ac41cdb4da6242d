//! Order handlers (spec §4.H): `on_arm_signal` / `on_disarm_signal`, both
//! idempotent under at-least-once delivery. Never raise across the task
//! boundary — every outcome is an `{ok, ...}`-shaped envelope, matching the
//! teacher's `Executor::handle_order` style of swallowing failures into
//! logged, typed results rather than propagating them.

use crate::application::plan_builder::{self, ArmInputs};
use crate::domain::ports::{
    ApiOrderType, ApiSide, ArmPayload, DisarmPayload, ExchangeClient, OrderRequest, StateStore,
};
use crate::domain::types::{BotStatePatch, Plan, Side};
use crate::infrastructure::persistence::{OrderStateRepository, OrderStateRow, OrderStateStatus};
use std::sync::Arc;
use tracing::{info, warn};

const QUOTE_ASSET: &str = "USDT";

#[derive(Debug, Clone, PartialEq)]
pub enum ArmOutcome {
    Ok { entry_id: String, sl_tp_ids: Vec<String> },
    Duplicate,
    MissingField(&'static str),
    BotConfigNotFound,
    PlanNotOk { notes: Vec<String> },
    EntryFailed { reason: String },
    PartialFailure { entry_id: String, placed: Vec<String> },
}

impl ArmOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, ArmOutcome::Ok { .. } | ArmOutcome::Duplicate)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DisarmOutcome {
    Ok,
    BotConfigNotFound,
}

pub struct OrderHandlers {
    store: Arc<dyn StateStore>,
    exchange: Arc<dyn ExchangeClient>,
    /// Audit trail only (spec §6's `order_states`, named out-of-core as a
    /// schema); absent in tests that don't care about it, best-effort when
    /// present — never gates handler correctness.
    order_states: Option<Arc<dyn OrderStateRepository>>,
}

impl OrderHandlers {
    pub fn new(store: Arc<dyn StateStore>, exchange: Arc<dyn ExchangeClient>) -> Self {
        Self { store, exchange, order_states: None }
    }

    pub fn with_order_state_repository(mut self, repo: Arc<dyn OrderStateRepository>) -> Self {
        self.order_states = Some(repo);
        self
    }

    /// Step 1 (missing-field validation) is enforced by `ArmPayload`'s typed
    /// fields at the boundary already — decode failures never reach here
    /// (spec §9 design note: a typed boundary, not loose dynamic access).
    pub async fn on_arm_signal(&self, payload: ArmPayload) -> ArmOutcome {
        if payload.bot_id.is_empty() {
            return ArmOutcome::MissingField("bot_id");
        }
        if payload.signal_id.is_empty() {
            return ArmOutcome::MissingField("signal_id");
        }

        match self.store.is_signal_processed(&payload.bot_id, &payload.signal_id).await {
            Ok(true) => {
                info!(bot_id = %payload.bot_id, signal_id = %payload.signal_id, "duplicate arm signal, skipping");
                return ArmOutcome::Duplicate;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(bot_id = %payload.bot_id, error = %e, "store error checking idempotency set");
                return ArmOutcome::EntryFailed { reason: e.to_string() };
            }
        }

        let cfg = match self.store.read_bot_config(&payload.bot_id).await {
            Ok(Some(cfg)) => cfg,
            Ok(None) => return ArmOutcome::BotConfigNotFound,
            Err(e) => return ArmOutcome::EntryFailed { reason: e.to_string() },
        };

        let free_balance = match self.exchange.get_balance(&cfg.user_id, QUOTE_ASSET).await {
            Ok(b) => b,
            Err(e) => return ArmOutcome::EntryFailed { reason: e.to_string() },
        };
        let filters = match self.exchange.get_symbol_filters(&payload.sym).await {
            Ok(f) => f,
            Err(e) => return ArmOutcome::EntryFailed { reason: e.to_string() },
        };

        let arm = ArmInputs { sym: payload.sym.clone(), side: payload.side, trigger: payload.trigger, stop: payload.stop };
        let plan = plan_builder::build_plan(&arm, &cfg, free_balance, &filters);
        if !plan.ok {
            return ArmOutcome::PlanNotOk { notes: plan.diagnostics.notes };
        }

        if let Some(repo) = &self.order_states {
            let row = OrderStateRow {
                bot_id: payload.bot_id.clone(),
                signal_id: payload.signal_id.clone(),
                symbol: payload.sym.clone(),
                side: payload.side,
                trigger_price: payload.trigger,
                stop_price: payload.stop,
                status: OrderStateStatus::Armed,
                order_id: None,
                stop_order_id: None,
                take_profit_order_id: None,
            };
            if let Err(e) = repo.record_armed(&row).await {
                warn!(bot_id = %payload.bot_id, error = %e, "failed to record order_states row");
            }
        }

        let entry_id = match self.place_entry_and_track(&payload.bot_id, &plan).await {
            Ok(id) => id,
            Err(e) => {
                self.mark_order_state_failed(&payload.bot_id, &payload.signal_id).await;
                return ArmOutcome::EntryFailed { reason: e.to_string() };
            }
        };
        self.update_order_state(&payload.bot_id, &payload.signal_id, OrderStateStatus::Pending, Some(&entry_id), None, None).await;

        // Persist as soon as the entry is live so disarm() can find and cancel
        // it even if bracket placement fails below.
        if let Err(e) = self
            .store
            .write_bot_state(
                &payload.bot_id,
                BotStatePatch {
                    last_signal_id: Some(Some(payload.signal_id.clone())),
                    armed_entry_order_id: Some(Some(entry_id.clone())),
                    ..Default::default()
                },
            )
            .await
        {
            warn!(bot_id = %payload.bot_id, error = %e, "failed to persist bot state after entry placement");
        }

        let mut sl_tp_ids = Vec::new();
        if plan.preplace_brackets {
            match self.place_brackets_and_track(&payload.bot_id, &plan).await {
                Ok(ids) => sl_tp_ids = ids,
                Err((placed, _failed)) => {
                    warn!(bot_id = %payload.bot_id, entry_id = %entry_id, "bracket placement partially failed");
                    if !placed.is_empty()
                        && let Err(e) = self
                            .store
                            .write_bot_state(
                                &payload.bot_id,
                                BotStatePatch { bracket_ids: Some(Some(placed.join(","))), ..Default::default() },
                            )
                            .await
                    {
                        warn!(bot_id = %payload.bot_id, error = %e, "failed to persist partially-placed bracket ids");
                    }
                    return ArmOutcome::PartialFailure { entry_id, placed };
                }
            }
        }

        let (sl_id, tp_id) = (sl_tp_ids.first().map(String::as_str), sl_tp_ids.get(1).map(String::as_str));
        self.update_order_state(&payload.bot_id, &payload.signal_id, OrderStateStatus::Pending, None, sl_id, tp_id).await;

        if let Err(e) = self
            .store
            .write_bot_state(
                &payload.bot_id,
                BotStatePatch { bracket_ids: Some(Some(sl_tp_ids.join(","))), ..Default::default() },
            )
            .await
        {
            warn!(bot_id = %payload.bot_id, error = %e, "failed to persist bracket ids after successful placement");
        }

        match self.store.mark_signal_processed(&payload.bot_id, &payload.signal_id).await {
            Ok(_) => ArmOutcome::Ok { entry_id, sl_tp_ids },
            Err(e) => {
                warn!(bot_id = %payload.bot_id, error = %e, "failed to mark signal processed after placement succeeded");
                ArmOutcome::Ok { entry_id, sl_tp_ids }
            }
        }
    }

    pub async fn on_disarm_signal(&self, payload: DisarmPayload) -> DisarmOutcome {
        let outcome = self.disarm(&payload.bot_id).await;
        if outcome == DisarmOutcome::Ok {
            self.update_order_state(&payload.bot_id, &payload.signal_id, OrderStateStatus::Cancelled, None, None, None).await;
        }
        outcome
    }

    /// Idempotent: absent ids are treated as already-cancelled (spec §4.H).
    pub async fn disarm(&self, bot_id: &str) -> DisarmOutcome {
        let cfg = match self.store.read_bot_config(bot_id).await {
            Ok(Some(cfg)) => cfg,
            Ok(None) => return DisarmOutcome::BotConfigNotFound,
            Err(_) => return DisarmOutcome::BotConfigNotFound,
        };

        let state = match self.store.read_bot_state(bot_id).await {
            Ok(s) => s,
            Err(e) => {
                warn!(bot_id, error = %e, "failed to read bot state for disarm");
                return DisarmOutcome::Ok;
            }
        };

        if let Some(entry_id) = &state.armed_entry_order_id {
            self.cancel_and_untrack(bot_id, &cfg.sym, entry_id).await;
        }
        for bracket_id in state.bracket_id_list() {
            self.cancel_and_untrack(bot_id, &cfg.sym, &bracket_id).await;
        }

        if let Err(e) = self
            .store
            .write_bot_state(
                bot_id,
                BotStatePatch { armed_entry_order_id: Some(None), bracket_ids: Some(None), ..Default::default() },
            )
            .await
        {
            warn!(bot_id, error = %e, "failed to clear bot state on disarm");
        }

        DisarmOutcome::Ok
    }

    async fn update_order_state(
        &self,
        bot_id: &str,
        signal_id: &str,
        status: OrderStateStatus,
        order_id: Option<&str>,
        stop_order_id: Option<&str>,
        take_profit_order_id: Option<&str>,
    ) {
        if let Some(repo) = &self.order_states
            && let Err(e) = repo.update_status(bot_id, signal_id, status, order_id, stop_order_id, take_profit_order_id).await
        {
            warn!(bot_id, signal_id, error = %e, "failed to update order_states row");
        }
    }

    async fn mark_order_state_failed(&self, bot_id: &str, signal_id: &str) {
        self.update_order_state(bot_id, signal_id, OrderStateStatus::Failed, None, None, None).await;
    }

    async fn cancel_and_untrack(&self, bot_id: &str, sym: &str, order_id: &str) {
        if let Err(e) = self.exchange.cancel_order(sym, order_id).await {
            warn!(bot_id, sym, order_id, error = %e, "cancel failed (already filled/cancelled is expected)");
        }
        let _ = self.store.untrack_open_order(bot_id, order_id).await;
    }

    async fn place_entry_and_track(&self, bot_id: &str, plan: &Plan) -> anyhow::Result<String> {
        let entry = plan.entry.as_ref().expect("plan.ok implies entry is present");
        let order = OrderRequest {
            symbol: plan.sym.clone(),
            side: api_side(entry.side),
            order_type: ApiOrderType::StopMarket,
            quantity: plan.qty,
            price: None,
            stop_price: Some(entry.stop_price),
            time_in_force: None,
            working_type: None,
            close_position: false,
            client_order_id: format!("{bot_id}-entry-{}", entry.stop_price),
        };
        let placed = self.exchange.place_order(&order).await?;
        self.store.track_open_order(bot_id, &placed.order_id).await?;
        Ok(placed.order_id)
    }

    /// Places SL then TP. On partial failure returns `Err((placed_ids,
    /// failed_index))` — the entry stays tracked and already-placed brackets
    /// stay tracked; the reconciler heals the rest (spec §4.H step 6).
    async fn place_brackets_and_track(&self, bot_id: &str, plan: &Plan) -> Result<Vec<String>, (Vec<String>, usize)> {
        let brackets = plan.brackets.as_ref().expect("plan.ok implies brackets are present");
        let closing_side = api_side(plan.side.opposite());
        let mut placed = Vec::new();

        let sl_order = OrderRequest {
            symbol: plan.sym.clone(),
            side: closing_side,
            order_type: ApiOrderType::StopMarket,
            quantity: None,
            price: None,
            stop_price: Some(brackets.sl),
            time_in_force: None,
            working_type: None,
            close_position: true,
            client_order_id: format!("{bot_id}-sl-{}", brackets.sl),
        };
        match self.exchange.place_order(&sl_order).await {
            Ok(p) => {
                let _ = self.store.track_open_order(bot_id, &p.order_id).await;
                placed.push(p.order_id);
            }
            Err(_) => return Err((placed, 0)),
        }

        let tp_order = OrderRequest {
            symbol: plan.sym.clone(),
            side: closing_side,
            order_type: ApiOrderType::TakeProfitMarket,
            quantity: None,
            price: None,
            stop_price: Some(brackets.tp),
            time_in_force: None,
            working_type: None,
            close_position: true,
            client_order_id: format!("{bot_id}-tp-{}", brackets.tp),
        };
        match self.exchange.place_order(&tp_order).await {
            Ok(p) => {
                let _ = self.store.track_open_order(bot_id, &p.order_id).await;
                placed.push(p.order_id);
                Ok(placed)
            }
            Err(_) => Err((placed, 1)),
        }
    }
}

fn api_side(side: Side) -> ApiSide {
    match side {
        Side::Long => ApiSide::Buy,
        Side::Short => ApiSide::Sell,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::filters::SymbolFilters;
    use crate::domain::types::{BotConfig, BotStatus, SideMode};
    use crate::infrastructure::broker::InMemoryStreamBroker;
    use crate::infrastructure::exchange::MockExchangeClient;
    use crate::infrastructure::state_store::BrokerStateStore;
    use rust_decimal_macros::dec;

    fn cfg() -> BotConfig {
        BotConfig {
            bot_id: "b1".into(),
            user_id: "u1".into(),
            sym: "BTCUSDT".into(),
            status: BotStatus::Active,
            side_mode: SideMode::Both,
            risk_per_trade: dec!(0.05),
            leverage: dec!(5),
            tp_ratio: dec!(1.5),
            max_qty: None,
        }
    }

    fn arm_payload() -> ArmPayload {
        ArmPayload {
            bot_id: "b1".into(),
            signal_id: "BTCUSDT:100:long".into(),
            sym: "BTCUSDT".into(),
            side: Side::Long,
            trigger: dec!(100),
            stop: dec!(95),
        }
    }

    async fn make_handlers() -> (OrderHandlers, Arc<MockExchangeClient>, Arc<BrokerStateStore>) {
        let broker = Arc::new(InMemoryStreamBroker::new());
        let store = Arc::new(BrokerStateStore::new(broker));
        let exchange = Arc::new(MockExchangeClient::new());
        store.write_bot_config(&cfg()).await.unwrap();
        exchange.set_balance("u1", QUOTE_ASSET, dec!(1000)).await;
        exchange
            .set_symbol_filters(
                "BTCUSDT",
                SymbolFilters { tick_size: dec!(0.10), step_size: dec!(0.001), min_qty: dec!(0.001), min_notional: dec!(10) },
            )
            .await;
        let handlers = OrderHandlers::new(store.clone(), exchange.clone());
        (handlers, exchange, store)
    }

    #[tokio::test]
    async fn duplicate_arm_delivery_places_order_exactly_once() {
        let (handlers, exchange, _store) = make_handlers().await;

        let first = handlers.on_arm_signal(arm_payload()).await;
        assert!(matches!(first, ArmOutcome::Ok { .. }));

        let second = handlers.on_arm_signal(arm_payload()).await;
        assert_eq!(second, ArmOutcome::Duplicate);

        let open = exchange.get_open_orders("u1", Some("BTCUSDT")).await.unwrap();
        assert_eq!(open.len(), 3); // entry + sl + tp, placed once
    }

    #[tokio::test]
    async fn zero_balance_rejects_without_placing_order() {
        let (handlers, exchange, store) = make_handlers().await;
        exchange.set_balance("u1", QUOTE_ASSET, dec!(0)).await;

        let outcome = handlers.on_arm_signal(arm_payload()).await;
        assert!(matches!(outcome, ArmOutcome::PlanNotOk { .. }));

        let open = exchange.get_open_orders("u1", Some("BTCUSDT")).await.unwrap();
        assert!(open.is_empty());
        assert!(!store.is_signal_processed("b1", &arm_payload().signal_id).await.unwrap());
    }

    #[tokio::test]
    async fn missing_bot_config_is_reported() {
        let (handlers, _exchange, _store) = make_handlers().await;
        let mut payload = arm_payload();
        payload.bot_id = "unknown".into();
        let outcome = handlers.on_arm_signal(payload).await;
        assert_eq!(outcome, ArmOutcome::BotConfigNotFound);
    }

    #[tokio::test]
    async fn partial_bracket_failure_keeps_entry_tracked_and_leaves_unprocessed() {
        let (handlers, exchange, store) = make_handlers().await;
        let payload = arm_payload();

        exchange.fail_next_orders(1).await; // the next place_order (SL) fails
        let outcome = handlers.on_arm_signal(payload.clone()).await;
        let entry_id = match outcome {
            ArmOutcome::PartialFailure { entry_id, placed } => {
                assert!(placed.is_empty());
                entry_id
            }
            other => panic!("expected PartialFailure, got {other:?}"),
        };

        let tracked = store.list_tracked_orders(&payload.bot_id).await.unwrap();
        assert!(tracked.contains(&entry_id));
        assert!(!store.is_signal_processed(&payload.bot_id, &payload.signal_id).await.unwrap());

        // the entry must be visible to disarm() even though brackets never
        // placed, or it would be orphaned with no way to cancel it.
        let state = store.read_bot_state(&payload.bot_id).await.unwrap();
        assert_eq!(state.armed_entry_order_id.as_deref(), Some(entry_id.as_str()));
    }

    #[tokio::test]
    async fn disarm_is_idempotent_when_nothing_is_armed() {
        let (handlers, _exchange, _store) = make_handlers().await;
        let outcome = handlers.disarm("b1").await;
        assert_eq!(outcome, DisarmOutcome::Ok);
        let outcome = handlers.disarm("b1").await;
        assert_eq!(outcome, DisarmOutcome::Ok);
    }

    #[tokio::test]
    async fn disarm_cancels_tracked_entry_and_clears_state() {
        let (handlers, exchange, store) = make_handlers().await;
        let outcome = handlers.on_arm_signal(arm_payload()).await;
        let entry_id = match outcome {
            ArmOutcome::Ok { entry_id, .. } => entry_id,
            other => panic!("expected Ok, got {other:?}"),
        };

        handlers.disarm("b1").await;

        let open = exchange.get_open_orders("u1", Some("BTCUSDT")).await.unwrap();
        assert!(!open.iter().any(|o| o.order_id == entry_id));
        let state = store.read_bot_state("b1").await.unwrap();
        assert!(state.armed_entry_order_id.is_none());
        assert!(state.bracket_ids.is_none());
    }

    #[tokio::test]
    async fn successful_arm_writes_an_order_states_audit_row() {
        use crate::infrastructure::persistence::{Database, SqliteOrderStateRepository};

        let broker = Arc::new(InMemoryStreamBroker::new());
        let store = Arc::new(BrokerStateStore::new(broker));
        let exchange = Arc::new(MockExchangeClient::new());
        store.write_bot_config(&cfg()).await.unwrap();
        exchange.set_balance("u1", QUOTE_ASSET, dec!(1000)).await;
        exchange
            .set_symbol_filters(
                "BTCUSDT",
                SymbolFilters { tick_size: dec!(0.10), step_size: dec!(0.001), min_qty: dec!(0.001), min_notional: dec!(10) },
            )
            .await;

        let db = Database::new("sqlite::memory:").await.unwrap();
        let repo = Arc::new(SqliteOrderStateRepository::new(db));
        let handlers = OrderHandlers::new(store, exchange).with_order_state_repository(repo.clone());

        let payload = arm_payload();
        let outcome = handlers.on_arm_signal(payload.clone()).await;
        let entry_id = match outcome {
            ArmOutcome::Ok { entry_id, .. } => entry_id,
            other => panic!("expected Ok, got {other:?}"),
        };

        let row = repo.find(&payload.bot_id, &payload.signal_id).await.unwrap().unwrap();
        assert_eq!(row.status, OrderStateStatus::Pending);
        assert_eq!(row.order_id.as_deref(), Some(entry_id.as_str()));
        assert!(row.stop_order_id.is_some());
        assert!(row.take_profit_order_id.is_some());
    }
}
