use crate::domain::errors::ExchangeError;
use crate::domain::filters::SymbolFilters;
use crate::domain::ports::{ExchangeClient, OpenOrder, OrderRequest, PlacedOrder, Position};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::info;

/// In-memory `ExchangeClient`, standing in for the real Binance-futures
/// facade in tests and local development. Orders placed here are tracked
/// until explicitly cancelled, matching the contract `place_order`
/// callers rely on for reconciliation.
pub struct MockExchangeClient {
    next_order_id: AtomicU64,
    open_orders: RwLock<HashMap<String, Vec<OpenOrder>>>,
    positions: RwLock<HashMap<String, Vec<Position>>>,
    balances: RwLock<HashMap<(String, String), Decimal>>,
    filters: RwLock<HashMap<String, SymbolFilters>>,
    /// When set, `place_order` fails for this count of subsequent calls —
    /// used to simulate transient exchange failures in handler tests.
    fail_next_orders: RwLock<usize>,
}

impl MockExchangeClient {
    pub fn new() -> Self {
        Self {
            next_order_id: AtomicU64::new(1),
            open_orders: RwLock::new(HashMap::new()),
            positions: RwLock::new(HashMap::new()),
            balances: RwLock::new(HashMap::new()),
            filters: RwLock::new(HashMap::new()),
            fail_next_orders: RwLock::new(0),
        }
    }

    pub async fn set_balance(&self, user_id: &str, asset: &str, balance: Decimal) {
        self.balances
            .write()
            .await
            .insert((user_id.to_string(), asset.to_string()), balance);
    }

    pub async fn set_symbol_filters(&self, sym: &str, filters: SymbolFilters) {
        self.filters.write().await.insert(sym.to_string(), filters);
    }

    pub async fn set_positions(&self, sym: &str, positions: Vec<Position>) {
        self.positions.write().await.insert(sym.to_string(), positions);
    }

    /// Directly seed an open order, bypassing `place_order` — used to model
    /// orders that are live on the exchange but were never placed by this
    /// process (e.g. in reconciler tests).
    pub async fn seed_open_order(&self, sym: &str, order_id: &str) {
        self.open_orders
            .write()
            .await
            .entry(sym.to_string())
            .or_default()
            .push(OpenOrder {
                order_id: order_id.to_string(),
                symbol: sym.to_string(),
            });
    }

    pub async fn fail_next_orders(&self, count: usize) {
        *self.fail_next_orders.write().await = count;
    }
}

impl Default for MockExchangeClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeClient for MockExchangeClient {
    async fn place_order(&self, order: &OrderRequest) -> Result<PlacedOrder> {
        {
            let mut remaining = self.fail_next_orders.write().await;
            if *remaining > 0 {
                *remaining -= 1;
                anyhow::bail!(ExchangeError::Rejected("simulated exchange failure".into()));
            }
        }

        let id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
        let order_id = format!("O-{id}");
        self.open_orders
            .write()
            .await
            .entry(order.symbol.clone())
            .or_default()
            .push(OpenOrder {
                order_id: order_id.clone(),
                symbol: order.symbol.clone(),
            });
        info!(symbol = %order.symbol, order_id = %order_id, "mock exchange: order placed");
        Ok(PlacedOrder { order_id })
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        if let Some(orders) = self.open_orders.write().await.get_mut(symbol) {
            orders.retain(|o| o.order_id != order_id);
        }
        Ok(())
    }

    async fn get_open_orders(&self, _user_id: &str, symbol: Option<&str>) -> Result<Vec<OpenOrder>> {
        let open_orders = self.open_orders.read().await;
        Ok(match symbol {
            Some(sym) => open_orders.get(sym).cloned().unwrap_or_default(),
            None => open_orders.values().flatten().cloned().collect(),
        })
    }

    async fn get_positions(&self, _user_id: &str, symbol: Option<&str>) -> Result<Vec<Position>> {
        let positions = self.positions.read().await;
        Ok(match symbol {
            Some(sym) => positions.get(sym).cloned().unwrap_or_default(),
            None => positions.values().flatten().cloned().collect(),
        })
    }

    async fn get_balance(&self, user_id: &str, asset: &str) -> Result<Decimal> {
        Ok(self
            .balances
            .read()
            .await
            .get(&(user_id.to_string(), asset.to_string()))
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn get_symbol_filters(&self, sym: &str) -> Result<SymbolFilters> {
        self.filters
            .read()
            .await
            .get(sym)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no filters configured for {sym}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{ApiOrderType, ApiSide};
    use rust_decimal_macros::dec;

    fn order(symbol: &str) -> OrderRequest {
        OrderRequest {
            symbol: symbol.into(),
            side: ApiSide::Buy,
            order_type: ApiOrderType::StopMarket,
            quantity: Some(dec!(0.01)),
            price: None,
            stop_price: Some(dec!(100)),
            time_in_force: None,
            working_type: None,
            close_position: false,
            client_order_id: "c1".into(),
        }
    }

    #[tokio::test]
    async fn place_then_cancel_removes_from_open_orders() {
        let exch = MockExchangeClient::new();
        let placed = exch.place_order(&order("BTCUSDT")).await.unwrap();
        let open = exch.get_open_orders("u1", Some("BTCUSDT")).await.unwrap();
        assert_eq!(open.len(), 1);

        exch.cancel_order("BTCUSDT", &placed.order_id).await.unwrap();
        let open = exch.get_open_orders("u1", Some("BTCUSDT")).await.unwrap();
        assert!(open.is_empty());
    }

    #[tokio::test]
    async fn fail_next_orders_rejects_then_recovers() {
        let exch = MockExchangeClient::new();
        exch.fail_next_orders(1).await;
        assert!(exch.place_order(&order("BTCUSDT")).await.is_err());
        assert!(exch.place_order(&order("BTCUSDT")).await.is_ok());
    }
}
