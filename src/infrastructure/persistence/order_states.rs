//! `order_states` read/write side (spec §6, named out-of-core as a schema
//! but the row shape is fully specified there). Handlers and the reconciler
//! append/update rows here as an audit trail; nothing in the core branches
//! on its contents. Ported from the teacher's repository-trait pattern
//! (`infrastructure/persistence/repositories/risk_state_repository.rs`).

use crate::domain::types::Side;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStateStatus {
    Armed,
    Pending,
    Filled,
    Cancelled,
    Failed,
    SkippedLowBalance,
    SkippedWhitelist,
}

impl std::fmt::Display for OrderStateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStateStatus::Armed => "armed",
            OrderStateStatus::Pending => "pending",
            OrderStateStatus::Filled => "filled",
            OrderStateStatus::Cancelled => "cancelled",
            OrderStateStatus::Failed => "failed",
            OrderStateStatus::SkippedLowBalance => "skipped_low_balance",
            OrderStateStatus::SkippedWhitelist => "skipped_whitelist",
        };
        write!(f, "{s}")
    }
}

impl FromStr for OrderStateStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "armed" => Ok(OrderStateStatus::Armed),
            "pending" => Ok(OrderStateStatus::Pending),
            "filled" => Ok(OrderStateStatus::Filled),
            "cancelled" => Ok(OrderStateStatus::Cancelled),
            "failed" => Ok(OrderStateStatus::Failed),
            "skipped_low_balance" => Ok(OrderStateStatus::SkippedLowBalance),
            "skipped_whitelist" => Ok(OrderStateStatus::SkippedWhitelist),
            other => Err(format!("unknown order_states status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderStateRow {
    pub bot_id: String,
    pub signal_id: String,
    pub symbol: String,
    pub side: Side,
    pub trigger_price: Decimal,
    pub stop_price: Decimal,
    pub status: OrderStateStatus,
    pub order_id: Option<String>,
    pub stop_order_id: Option<String>,
    pub take_profit_order_id: Option<String>,
}

#[async_trait]
pub trait OrderStateRepository: Send + Sync {
    /// Insert-or-ignore the initial row for a freshly-armed signal.
    /// `unique(bot_id, signal_id)` makes re-delivery of the same arm a no-op.
    async fn record_armed(&self, row: &OrderStateRow) -> Result<()>;

    async fn update_status(
        &self,
        bot_id: &str,
        signal_id: &str,
        status: OrderStateStatus,
        order_id: Option<&str>,
        stop_order_id: Option<&str>,
        take_profit_order_id: Option<&str>,
    ) -> Result<()>;

    async fn find(&self, bot_id: &str, signal_id: &str) -> Result<Option<OrderStateRow>>;

    /// Most recently updated rows for a symbol, newest first. Used by the
    /// diagnostic CLI; not on any hot path.
    async fn list_by_symbol(&self, symbol: &str, limit: i64) -> Result<Vec<OrderStateRow>>;
}

pub struct SqliteOrderStateRepository {
    database: Database,
}

impl SqliteOrderStateRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl OrderStateRepository for SqliteOrderStateRepository {
    async fn record_armed(&self, row: &OrderStateRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO order_states (
                id, bot_id, signal_id, order_id, stop_order_id, take_profit_order_id,
                status, side, symbol, trigger_price, stop_price, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, CURRENT_TIMESTAMP)
            ON CONFLICT(bot_id, signal_id) DO NOTHING
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&row.bot_id)
        .bind(&row.signal_id)
        .bind(&row.order_id)
        .bind(&row.stop_order_id)
        .bind(&row.take_profit_order_id)
        .bind(row.status.to_string())
        .bind(row.side.to_string())
        .bind(&row.symbol)
        .bind(row.trigger_price.to_string())
        .bind(row.stop_price.to_string())
        .execute(&self.database.pool)
        .await
        .context("failed to insert order_states row")?;

        Ok(())
    }

    async fn update_status(
        &self,
        bot_id: &str,
        signal_id: &str,
        status: OrderStateStatus,
        order_id: Option<&str>,
        stop_order_id: Option<&str>,
        take_profit_order_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE order_states SET
                status = $1,
                order_id = COALESCE($2, order_id),
                stop_order_id = COALESCE($3, stop_order_id),
                take_profit_order_id = COALESCE($4, take_profit_order_id),
                updated_at = CURRENT_TIMESTAMP
            WHERE bot_id = $5 AND signal_id = $6
            "#,
        )
        .bind(status.to_string())
        .bind(order_id)
        .bind(stop_order_id)
        .bind(take_profit_order_id)
        .bind(bot_id)
        .bind(signal_id)
        .execute(&self.database.pool)
        .await
        .context("failed to update order_states row")?;

        Ok(())
    }

    async fn find(&self, bot_id: &str, signal_id: &str) -> Result<Option<OrderStateRow>> {
        let row = sqlx::query_as::<_, (String, String, Option<String>, Option<String>, Option<String>, String, String, String, String, String)>(
            r#"
            SELECT bot_id, signal_id, order_id, stop_order_id, take_profit_order_id, status, side, symbol, trigger_price, stop_price
            FROM order_states WHERE bot_id = $1 AND signal_id = $2
            "#,
        )
        .bind(bot_id)
        .bind(signal_id)
        .fetch_optional(&self.database.pool)
        .await
        .context("failed to load order_states row")?;

        let Some((bot_id, signal_id, order_id, stop_order_id, take_profit_order_id, status, side, symbol, trigger_price, stop_price)) = row
        else {
            return Ok(None);
        };

        Ok(Some(OrderStateRow {
            bot_id,
            signal_id,
            symbol,
            side: Side::from_str(&side).map_err(|e| anyhow::anyhow!(e))?,
            trigger_price: Decimal::from_str(&trigger_price).context("corrupt trigger_price")?,
            stop_price: Decimal::from_str(&stop_price).context("corrupt stop_price")?,
            status: OrderStateStatus::from_str(&status).map_err(|e| anyhow::anyhow!(e))?,
            order_id,
            stop_order_id,
            take_profit_order_id,
        }))
    }

    async fn list_by_symbol(&self, symbol: &str, limit: i64) -> Result<Vec<OrderStateRow>> {
        let rows = sqlx::query_as::<_, (String, String, Option<String>, Option<String>, Option<String>, String, String, String, String, String)>(
            r#"
            SELECT bot_id, signal_id, order_id, stop_order_id, take_profit_order_id, status, side, symbol, trigger_price, stop_price
            FROM order_states WHERE symbol = $1 ORDER BY updated_at DESC LIMIT $2
            "#,
        )
        .bind(symbol)
        .bind(limit)
        .fetch_all(&self.database.pool)
        .await
        .context("failed to list order_states rows by symbol")?;

        rows.into_iter()
            .map(
                |(bot_id, signal_id, order_id, stop_order_id, take_profit_order_id, status, side, symbol, trigger_price, stop_price)| {
                    Ok(OrderStateRow {
                        bot_id,
                        signal_id,
                        symbol,
                        side: Side::from_str(&side).map_err(|e| anyhow::anyhow!(e))?,
                        trigger_price: Decimal::from_str(&trigger_price).context("corrupt trigger_price")?,
                        stop_price: Decimal::from_str(&stop_price).context("corrupt stop_price")?,
                        status: OrderStateStatus::from_str(&status).map_err(|e| anyhow::anyhow!(e))?,
                        order_id,
                        stop_order_id,
                        take_profit_order_id,
                    })
                },
            )
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn repo() -> SqliteOrderStateRepository {
        let db = Database::new("sqlite::memory:").await.unwrap();
        SqliteOrderStateRepository::new(db)
    }

    fn row() -> OrderStateRow {
        OrderStateRow {
            bot_id: "b1".into(),
            signal_id: "BTCUSDT:100:long".into(),
            symbol: "BTCUSDT".into(),
            side: Side::Long,
            trigger_price: dec!(100),
            stop_price: dec!(95),
            status: OrderStateStatus::Armed,
            order_id: None,
            stop_order_id: None,
            take_profit_order_id: None,
        }
    }

    #[tokio::test]
    async fn record_then_update_then_find_roundtrips() {
        let repo = repo().await;
        repo.record_armed(&row()).await.unwrap();

        repo.update_status("b1", "BTCUSDT:100:long", OrderStateStatus::Filled, Some("E-1"), Some("S-1"), Some("T-1"))
            .await
            .unwrap();

        let found = repo.find("b1", "BTCUSDT:100:long").await.unwrap().unwrap();
        assert_eq!(found.status, OrderStateStatus::Filled);
        assert_eq!(found.order_id.as_deref(), Some("E-1"));
        assert_eq!(found.stop_order_id.as_deref(), Some("S-1"));
        assert_eq!(found.take_profit_order_id.as_deref(), Some("T-1"));
    }

    #[tokio::test]
    async fn re_recording_the_same_signal_is_a_no_op() {
        let repo = repo().await;
        repo.record_armed(&row()).await.unwrap();
        repo.update_status("b1", "BTCUSDT:100:long", OrderStateStatus::Filled, Some("E-1"), None, None).await.unwrap();

        // Re-arming with the same (bot_id, signal_id) must not clobber the row.
        repo.record_armed(&row()).await.unwrap();
        let found = repo.find("b1", "BTCUSDT:100:long").await.unwrap().unwrap();
        assert_eq!(found.status, OrderStateStatus::Filled);
    }

    #[tokio::test]
    async fn list_by_symbol_returns_only_matching_rows() {
        let repo = repo().await;
        repo.record_armed(&row()).await.unwrap();

        let mut other = row();
        other.bot_id = "b2".into();
        other.signal_id = "ETHUSDT:50:short".into();
        other.symbol = "ETHUSDT".into();
        repo.record_armed(&other).await.unwrap();

        let rows = repo.list_by_symbol("BTCUSDT", 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].bot_id, "b1");
    }
}
