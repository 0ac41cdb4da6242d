//! `StateStore` built on top of `StreamBroker`'s hash and set primitives,
//! using the key layout from spec §6: `bot:cfg:{id}`, `bot:state:{id}`,
//! `bot:orders:{id}`, `bot:processed:{id}`, `sym:bots:{SYM}`.

use crate::domain::ports::{BotStatePatch, StateStore, StreamBroker};
use crate::domain::types::{BotConfig, BotState, BotStatus, SideMode};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

fn cfg_key(bot_id: &str) -> String {
    format!("bot:cfg:{bot_id}")
}

fn state_key(bot_id: &str) -> String {
    format!("bot:state:{bot_id}")
}

fn orders_key(bot_id: &str) -> String {
    format!("bot:orders:{bot_id}")
}

fn processed_key(bot_id: &str) -> String {
    format!("bot:processed:{bot_id}")
}

fn sym_bots_key(sym: &str) -> String {
    format!("sym:bots:{sym}")
}

fn opt_field(fields: &HashMap<String, String>, key: &str) -> Option<String> {
    fields.get(key).filter(|v| !v.is_empty()).cloned()
}

fn opt_decimal(fields: &HashMap<String, String>, key: &str) -> Option<Decimal> {
    fields.get(key).and_then(|v| Decimal::from_str(v).ok())
}

/// `StateStore` impl backed by a shared `StreamBroker`'s hash/set commands.
pub struct BrokerStateStore {
    broker: Arc<dyn StreamBroker>,
}

impl BrokerStateStore {
    pub fn new(broker: Arc<dyn StreamBroker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl StateStore for BrokerStateStore {
    async fn read_bot_config(&self, bot_id: &str) -> Result<Option<BotConfig>> {
        let fields = self.broker.hgetall(&cfg_key(bot_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        let side_mode = fields
            .get("side_mode")
            .and_then(|s| SideMode::from_str(s).ok())
            .unwrap_or(SideMode::Both);
        let status = fields
            .get("status")
            .and_then(|s| BotStatus::from_str(s).ok())
            .unwrap_or(BotStatus::Paused);
        Ok(Some(BotConfig {
            bot_id: bot_id.to_string(),
            user_id: fields.get("user_id").cloned().unwrap_or_default(),
            sym: fields.get("sym").cloned().unwrap_or_default(),
            status,
            side_mode,
            risk_per_trade: opt_decimal(&fields, "risk_per_trade").unwrap_or(Decimal::ZERO),
            leverage: opt_decimal(&fields, "leverage").unwrap_or(Decimal::ONE),
            tp_ratio: opt_decimal(&fields, "tp_ratio").unwrap_or(Decimal::ONE),
            max_qty: opt_decimal(&fields, "max_qty"),
        }))
    }

    async fn write_bot_config(&self, cfg: &BotConfig) -> Result<()> {
        let mut fields = HashMap::new();
        fields.insert("bot_id".to_string(), cfg.bot_id.clone());
        fields.insert("user_id".to_string(), cfg.user_id.clone());
        fields.insert("sym".to_string(), cfg.sym.clone());
        fields.insert("side_mode".to_string(), cfg.side_mode.to_string());
        fields.insert("status".to_string(), cfg.status.to_string());
        fields.insert("risk_per_trade".to_string(), cfg.risk_per_trade.to_string());
        fields.insert("leverage".to_string(), cfg.leverage.to_string());
        fields.insert("tp_ratio".to_string(), cfg.tp_ratio.to_string());
        if let Some(max_qty) = cfg.max_qty {
            fields.insert("max_qty".to_string(), max_qty.to_string());
        }
        self.broker.hset(&cfg_key(&cfg.bot_id), fields).await?;
        self.index_bot(&cfg.sym, &cfg.bot_id).await
    }

    async fn read_bot_state(&self, bot_id: &str) -> Result<BotState> {
        let fields = self.broker.hgetall(&state_key(bot_id)).await?;
        Ok(BotState {
            last_signal_id: opt_field(&fields, "last_signal_id"),
            armed_entry_order_id: opt_field(&fields, "armed_entry_order_id"),
            bracket_ids: opt_field(&fields, "bracket_ids"),
            position_side: opt_field(&fields, "position_side"),
            position_qty: opt_decimal(&fields, "position_qty"),
            avg_entry_price: opt_decimal(&fields, "avg_entry_price"),
        })
    }

    async fn write_bot_state(&self, bot_id: &str, patch: BotStatePatch) -> Result<()> {
        let mut fields = HashMap::new();
        // Hash-field semantics: `Some(None)` (clear) writes an empty string
        // rather than deleting the field, matching the `""`-means-absent
        // convention `opt_field`/`opt_decimal` decode on read.
        if let Some(v) = &patch.last_signal_id {
            fields.insert("last_signal_id".to_string(), v.clone().unwrap_or_default());
        }
        if let Some(v) = &patch.armed_entry_order_id {
            fields.insert("armed_entry_order_id".to_string(), v.clone().unwrap_or_default());
        }
        if let Some(v) = &patch.bracket_ids {
            fields.insert("bracket_ids".to_string(), v.clone().unwrap_or_default());
        }
        if let Some(v) = &patch.position_side {
            fields.insert("position_side".to_string(), v.clone().unwrap_or_default());
        }
        if let Some(v) = &patch.position_qty {
            fields.insert(
                "position_qty".to_string(),
                v.map(|d| d.to_string()).unwrap_or_default(),
            );
        }
        if let Some(v) = &patch.avg_entry_price {
            fields.insert(
                "avg_entry_price".to_string(),
                v.map(|d| d.to_string()).unwrap_or_default(),
            );
        }
        if fields.is_empty() {
            return Ok(());
        }
        self.broker.hset(&state_key(bot_id), fields).await
    }

    async fn is_signal_processed(&self, bot_id: &str, signal_id: &str) -> Result<bool> {
        let members = self.broker.smembers(&processed_key(bot_id)).await?;
        Ok(members.iter().any(|m| m == signal_id))
    }

    async fn mark_signal_processed(&self, bot_id: &str, signal_id: &str) -> Result<bool> {
        self.broker.sadd(&processed_key(bot_id), signal_id).await
    }

    async fn track_open_order(&self, bot_id: &str, order_id: &str) -> Result<bool> {
        self.broker.sadd(&orders_key(bot_id), order_id).await
    }

    async fn untrack_open_order(&self, bot_id: &str, order_id: &str) -> Result<bool> {
        self.broker.srem(&orders_key(bot_id), order_id).await
    }

    async fn list_tracked_orders(&self, bot_id: &str) -> Result<Vec<String>> {
        self.broker.smembers(&orders_key(bot_id)).await
    }

    async fn index_bot(&self, sym: &str, bot_id: &str) -> Result<()> {
        self.broker.sadd(&sym_bots_key(sym), bot_id).await?;
        Ok(())
    }

    async fn bots_for_symbol(&self, sym: &str) -> Result<Vec<String>> {
        self.broker.smembers(&sym_bots_key(sym)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::BotStatus;
    use crate::infrastructure::broker::InMemoryStreamBroker;
    use rust_decimal_macros::dec;

    fn store() -> BrokerStateStore {
        BrokerStateStore::new(Arc::new(InMemoryStreamBroker::new()))
    }

    fn cfg() -> BotConfig {
        BotConfig {
            bot_id: "bot-1".into(),
            user_id: "user-123".into(),
            sym: "BTCUSDT".into(),
            side_mode: SideMode::Both,
            status: BotStatus::Active,
            risk_per_trade: dec!(0.05),
            leverage: dec!(10),
            tp_ratio: dec!(1.5),
            max_qty: Some(dec!(0.25)),
        }
    }

    #[tokio::test]
    async fn config_roundtrip() {
        let store = store();
        store.write_bot_config(&cfg()).await.unwrap();
        let got = store.read_bot_config("bot-1").await.unwrap().unwrap();
        assert_eq!(got.sym, "BTCUSDT");
        assert_eq!(got.risk_per_trade, dec!(0.05));
        assert_eq!(got.max_qty, Some(dec!(0.25)));
        assert!(store.bots_for_symbol("BTCUSDT").await.unwrap().contains(&"bot-1".to_string()));
    }

    #[tokio::test]
    async fn state_roundtrip() {
        let store = store();
        store
            .write_bot_state(
                "bot-1",
                BotStatePatch {
                    last_signal_id: Some(Some("BTCUSDT:123:long".into())),
                    armed_entry_order_id: Some(Some("111".into())),
                    bracket_ids: Some(Some("222,333".into())),
                    position_side: Some(Some("long".into())),
                    position_qty: Some(Some(dec!(0.15))),
                    avg_entry_price: Some(Some(dec!(100.5))),
                },
            )
            .await
            .unwrap();

        let got = store.read_bot_state("bot-1").await.unwrap();
        assert_eq!(got.last_signal_id.as_deref(), Some("BTCUSDT:123:long"));
        assert_eq!(got.bracket_ids.as_deref(), Some("222,333"));
        assert_eq!(got.position_qty, Some(dec!(0.15)));
        assert_eq!(got.avg_entry_price, Some(dec!(100.5)));
    }

    #[tokio::test]
    async fn idempotency_set_marks_once() {
        let store = store();
        let sid = "BTCUSDT:999:long";
        assert!(!store.is_signal_processed("bot-1", sid).await.unwrap());
        assert!(store.mark_signal_processed("bot-1", sid).await.unwrap());
        assert!(store.is_signal_processed("bot-1", sid).await.unwrap());
        assert!(!store.mark_signal_processed("bot-1", sid).await.unwrap());
    }

    #[tokio::test]
    async fn open_order_tracking() {
        let store = store();
        assert!(store.track_open_order("bot-1", "a1").await.unwrap());
        assert!(store.track_open_order("bot-1", "a2").await.unwrap());
        let mut ids = store.list_tracked_orders("bot-1").await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["a1".to_string(), "a2".to_string()]);

        assert!(store.untrack_open_order("bot-1", "a1").await.unwrap());
        let ids2 = store.list_tracked_orders("bot-1").await.unwrap();
        assert_eq!(ids2, vec!["a2".to_string()]);
    }

    #[tokio::test]
    async fn clearing_a_field_round_trips_to_none() {
        let store = store();
        store
            .write_bot_state(
                "bot-1",
                BotStatePatch {
                    armed_entry_order_id: Some(Some("E-1".into())),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .write_bot_state(
                "bot-1",
                BotStatePatch {
                    armed_entry_order_id: Some(None),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let got = store.read_bot_state("bot-1").await.unwrap();
        assert_eq!(got.armed_entry_order_id, None);
    }
}
