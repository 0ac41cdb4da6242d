//! Periodic per-bot reconcile sweep (spec §4.I): compares locally tracked
//! orders/positions against the exchange's authoritative view and heals
//! drift. Individual bot failures never abort the sweep (spec §7 taxonomy
//! v), mirroring the teacher's per-bot error isolation in
//! `application/risk_management/order_reconciler.rs`.

use crate::domain::ports::{StateStore, ExchangeClient};
use crate::domain::types::{BotStatePatch, Side};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileReport {
    pub ok: bool,
    pub bot_id: String,
    pub inconsistencies: Vec<String>,
}

pub struct Reconciler {
    store: Arc<dyn StateStore>,
    exchange: Arc<dyn ExchangeClient>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn StateStore>, exchange: Arc<dyn ExchangeClient>) -> Self {
        Self { store, exchange }
    }

    pub async fn reconcile_bot(&self, bot_id: &str) -> ReconcileReport {
        let cfg = match self.store.read_bot_config(bot_id).await {
            Ok(Some(cfg)) => cfg,
            Ok(None) => {
                return ReconcileReport { ok: false, bot_id: bot_id.to_string(), inconsistencies: vec!["bot config not found".into()] };
            }
            Err(e) => {
                return ReconcileReport { ok: false, bot_id: bot_id.to_string(), inconsistencies: vec![e.to_string()] };
            }
        };

        let open_orders = match self.exchange.get_open_orders(&cfg.user_id, Some(&cfg.sym)).await {
            Ok(o) => o,
            Err(e) => {
                warn!(bot_id, error = %e, "reconcile: get_open_orders failed");
                return ReconcileReport { ok: false, bot_id: bot_id.to_string(), inconsistencies: vec![format!("exchange call failed: {e}")] };
            }
        };
        let positions = match self.exchange.get_positions(&cfg.user_id, Some(&cfg.sym)).await {
            Ok(p) => p,
            Err(e) => {
                warn!(bot_id, error = %e, "reconcile: get_positions failed");
                return ReconcileReport { ok: false, bot_id: bot_id.to_string(), inconsistencies: vec![format!("exchange call failed: {e}")] };
            }
        };

        let mut inconsistencies = Vec::new();
        let open_ids: Vec<&str> = open_orders.iter().map(|o| o.order_id.as_str()).collect();

        let tracked = self.store.list_tracked_orders(bot_id).await.unwrap_or_default();
        for id in &tracked {
            if !open_ids.contains(&id.as_str()) {
                let _ = self.store.untrack_open_order(bot_id, id).await;
                info!(bot_id, order_id = %id, "reconcile: untracked order no longer on exchange (filled or cancelled)");
            }
        }

        let state = match self.store.read_bot_state(bot_id).await {
            Ok(s) => s,
            Err(e) => return ReconcileReport { ok: false, bot_id: bot_id.to_string(), inconsistencies: vec![e.to_string()] },
        };

        if let Some(entry_id) = &state.armed_entry_order_id
            && !open_ids.contains(&entry_id.as_str())
        {
            inconsistencies.push(format!("armed_entry_order_id {entry_id} not in open orders"));
        }
        for bracket_id in state.bracket_id_list() {
            if !open_ids.contains(&bracket_id.as_str()) {
                inconsistencies.push(format!("bracket {bracket_id} not in open orders"));
            }
        }

        let position = positions.into_iter().find(|p| p.symbol == cfg.sym);
        let (position_side, position_qty, avg_entry_price) = match position {
            Some(p) if p.position_amt > Decimal::ZERO => (Some(Side::Long.to_string()), Some(p.position_amt), Some(p.entry_price)),
            Some(p) if p.position_amt < Decimal::ZERO => (Some(Side::Short.to_string()), Some(p.position_amt.abs()), Some(p.entry_price)),
            _ => (Some("flat".to_string()), Some(Decimal::ZERO), None),
        };

        if let Err(e) = self
            .store
            .write_bot_state(
                bot_id,
                BotStatePatch {
                    position_side: Some(position_side),
                    position_qty: Some(position_qty),
                    avg_entry_price: Some(avg_entry_price),
                    ..Default::default()
                },
            )
            .await
        {
            warn!(bot_id, error = %e, "reconcile: failed to persist position state");
        }

        ReconcileReport { ok: true, bot_id: bot_id.to_string(), inconsistencies }
    }

    /// Fans out `reconcile_bot` across every bot indexed under `sym`.
    /// Per-bot failures are captured in that bot's report, never abort the
    /// sweep (spec §4.I step 5).
    pub async fn reconcile_symbol(&self, sym: &str) -> Vec<ReconcileReport> {
        let bot_ids = self.store.bots_for_symbol(sym).await.unwrap_or_default();
        let mut reports = Vec::with_capacity(bot_ids.len());
        for bot_id in bot_ids {
            reports.push(self.reconcile_bot(&bot_id).await);
        }
        reports
    }
}

/// Periodic driver: fires a reconcile sweep for `sym` every `period`, until
/// the process shuts down. Grounded on the teacher's `Executor::run`
/// `tokio::select!` timer-tick pattern (`application/agents/executor.rs`).
pub async fn run_periodic_sweep(reconciler: Arc<Reconciler>, sym: String, period: Duration) -> ! {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let reports = reconciler.reconcile_symbol(&sym).await;
        for report in &reports {
            if !report.inconsistencies.is_empty() {
                warn!(bot_id = %report.bot_id, inconsistencies = ?report.inconsistencies, "reconcile found inconsistencies");
            }
        }
    }
}
