//! Binance USDⓈ-M futures exchange client.
//!
//! Provides order placement/cancellation and account/position/filter
//! queries against the futures REST API, with HMAC-SHA256 request signing
//! and circuit-breaker protection, matching the teacher's spot-market
//! `BinanceExecutionService` shape.

use crate::domain::errors::ExchangeError;
use crate::domain::filters::SymbolFilters;
use crate::domain::ports::{ExchangeClient, OpenOrder, OrderRequest, PlacedOrder, Position};
use crate::infrastructure::core::circuit_breaker::CircuitBreaker;
use crate::infrastructure::core::http_client_factory::HttpClientFactory;
use crate::infrastructure::exchange::validate::validate_new_order_payload;
use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct BinanceFuturesClient {
    client: ClientWithMiddleware,
    api_key: String,
    api_secret: String,
    base_url: String,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl BinanceFuturesClient {
    pub fn new(api_key: String, api_secret: String, base_url: String) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            api_key,
            api_secret,
            base_url,
            circuit_breaker: Arc::new(CircuitBreaker::new(
                "BinanceFutures",
                5,
                3,
                Duration::from_secs(60),
            )),
        }
    }

    fn sign(&self, query: &str) -> String {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn signed_query(&self, mut params: Vec<(String, String)>) -> String {
        params.push(("timestamp".to_string(), chrono::Utc::now().timestamp_millis().to_string()));
        params.push(("recvWindow".to_string(), "5000".to_string()));
        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let signature = self.sign(&query);
        format!("{query}&signature={signature}")
    }
}

#[async_trait]
impl ExchangeClient for BinanceFuturesClient {
    async fn place_order(&self, order: &OrderRequest) -> Result<PlacedOrder> {
        let params = validate_new_order_payload(order).map_err(anyhow::Error::from)?;
        self.circuit_breaker
            .call(async move {
                let signed = self.signed_query(params.into_iter().collect());
                let url = format!("{}/fapi/v1/order?{}", self.base_url, signed);

                let response = self
                    .client
                    .post(&url)
                    .header("X-MBX-APIKEY", &self.api_key)
                    .send()
                    .await
                    .context("Failed to place order on Binance futures")?;

                if !response.status().is_success() {
                    let error_text = response.text().await.unwrap_or_default();
                    anyhow::bail!(ExchangeError::Rejected(error_text));
                }

                #[derive(Deserialize)]
                struct OrderResponse {
                    #[serde(rename = "orderId")]
                    order_id: serde_json::Value,
                }

                let body: OrderResponse = response.json().await?;
                let order_id = body.order_id.to_string().trim_matches('"').to_string();
                info!(%order_id, symbol = %order.symbol, "binance futures: order placed");
                Ok(PlacedOrder { order_id })
            })
            .await
            .map_err(map_circuit_breaker_error)
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        self.circuit_breaker
            .call(async move {
                let params = vec![
                    ("symbol".to_string(), symbol.to_uppercase()),
                    ("orderId".to_string(), order_id.to_string()),
                ];
                let signed = self.signed_query(params);
                let url = format!("{}/fapi/v1/order?{}", self.base_url, signed);

                let response = self
                    .client
                    .delete(&url)
                    .header("X-MBX-APIKEY", &self.api_key)
                    .send()
                    .await
                    .context("Failed to cancel order on Binance futures")?;

                if !response.status().is_success() {
                    let error_text = response.text().await.unwrap_or_default();
                    warn!(%order_id, symbol, %error_text, "binance futures: cancel failed");
                    anyhow::bail!(ExchangeError::Rejected(error_text));
                }
                Ok(())
            })
            .await
            .map_err(map_circuit_breaker_error)
    }

    async fn get_open_orders(&self, _user_id: &str, symbol: Option<&str>) -> Result<Vec<OpenOrder>> {
        self.circuit_breaker
            .call(async move {
                let mut params = Vec::new();
                if let Some(sym) = symbol {
                    params.push(("symbol".to_string(), sym.to_uppercase()));
                }
                let signed = self.signed_query(params);
                let url = format!("{}/fapi/v1/openOrders?{}", self.base_url, signed);

                let response = self
                    .client
                    .get(&url)
                    .header("X-MBX-APIKEY", &self.api_key)
                    .send()
                    .await
                    .context("Failed to fetch open orders from Binance futures")?;

                #[derive(Deserialize)]
                struct Raw {
                    #[serde(rename = "orderId")]
                    order_id: serde_json::Value,
                    symbol: String,
                }

                let raw: Vec<Raw> = response.json().await.context("decode open orders")?;
                Ok(raw
                    .into_iter()
                    .map(|r| OpenOrder {
                        order_id: r.order_id.to_string().trim_matches('"').to_string(),
                        symbol: r.symbol,
                    })
                    .collect())
            })
            .await
            .map_err(map_circuit_breaker_error)
    }

    async fn get_positions(&self, _user_id: &str, symbol: Option<&str>) -> Result<Vec<Position>> {
        self.circuit_breaker
            .call(async move {
                let mut params = Vec::new();
                if let Some(sym) = symbol {
                    params.push(("symbol".to_string(), sym.to_uppercase()));
                }
                let signed = self.signed_query(params);
                let url = format!("{}/fapi/v2/positionRisk?{}", self.base_url, signed);

                let response = self
                    .client
                    .get(&url)
                    .header("X-MBX-APIKEY", &self.api_key)
                    .send()
                    .await
                    .context("Failed to fetch positions from Binance futures")?;

                #[derive(Deserialize)]
                struct Raw {
                    symbol: String,
                    #[serde(rename = "positionAmt")]
                    position_amt: String,
                    #[serde(rename = "entryPrice")]
                    entry_price: String,
                }

                let raw: Vec<Raw> = response.json().await.context("decode positions")?;
                Ok(raw
                    .into_iter()
                    .map(|r| Position {
                        symbol: r.symbol,
                        position_amt: r.position_amt.parse().unwrap_or(Decimal::ZERO),
                        entry_price: r.entry_price.parse().unwrap_or(Decimal::ZERO),
                    })
                    .collect())
            })
            .await
            .map_err(map_circuit_breaker_error)
    }

    async fn get_balance(&self, _user_id: &str, asset: &str) -> Result<Decimal> {
        self.circuit_breaker
            .call(async move {
                let signed = self.signed_query(Vec::new());
                let url = format!("{}/fapi/v2/balance?{}", self.base_url, signed);

                let response = self
                    .client
                    .get(&url)
                    .header("X-MBX-APIKEY", &self.api_key)
                    .send()
                    .await
                    .context("Failed to fetch balance from Binance futures")?;

                #[derive(Deserialize)]
                struct Raw {
                    asset: String,
                    #[serde(rename = "availableBalance")]
                    available_balance: String,
                }

                let raw: Vec<Raw> = response.json().await.context("decode balances")?;
                Ok(raw
                    .into_iter()
                    .find(|b| b.asset == asset)
                    .map(|b| b.available_balance.parse().unwrap_or(Decimal::ZERO))
                    .unwrap_or(Decimal::ZERO))
            })
            .await
            .map_err(map_circuit_breaker_error)
    }

    async fn get_symbol_filters(&self, sym: &str) -> Result<SymbolFilters> {
        self.circuit_breaker
            .call(async move {
                let url = format!("{}/fapi/v1/exchangeInfo", self.base_url);
                let response = self
                    .client
                    .get(&url)
                    .send()
                    .await
                    .context("Failed to fetch exchangeInfo from Binance futures")?;

                #[derive(Deserialize)]
                struct Filter {
                    #[serde(rename = "filterType")]
                    filter_type: String,
                    #[serde(rename = "tickSize")]
                    tick_size: Option<String>,
                    #[serde(rename = "stepSize")]
                    step_size: Option<String>,
                    #[serde(rename = "minQty")]
                    min_qty: Option<String>,
                    #[serde(rename = "notional")]
                    notional: Option<String>,
                }

                #[derive(Deserialize)]
                struct SymbolInfo {
                    symbol: String,
                    filters: Vec<Filter>,
                }

                #[derive(Deserialize)]
                struct ExchangeInfo {
                    symbols: Vec<SymbolInfo>,
                }

                let info: ExchangeInfo = response.json().await.context("decode exchangeInfo")?;
                let entry = info
                    .symbols
                    .into_iter()
                    .find(|s| s.symbol.eq_ignore_ascii_case(sym))
                    .ok_or_else(|| ExchangeError::Rejected(format!("symbol {sym} not found")))?;

                let mut tick_size = None;
                let mut step_size = None;
                let mut min_qty = None;
                let mut min_notional = None;
                for f in entry.filters {
                    match f.filter_type.as_str() {
                        "PRICE_FILTER" => tick_size = f.tick_size.and_then(|s| s.parse().ok()),
                        "LOT_SIZE" => {
                            step_size = f.step_size.and_then(|s| s.parse().ok());
                            min_qty = f.min_qty.and_then(|s| s.parse().ok());
                        }
                        "MIN_NOTIONAL" => min_notional = f.notional.and_then(|s| s.parse().ok()),
                        _ => {}
                    }
                }

                Ok(SymbolFilters {
                    tick_size: tick_size.unwrap_or(Decimal::new(1, 2)),
                    step_size: step_size.unwrap_or(Decimal::new(1, 3)),
                    min_qty: min_qty.unwrap_or(Decimal::ZERO),
                    min_notional: min_notional.unwrap_or(Decimal::ZERO),
                })
            })
            .await
            .map_err(map_circuit_breaker_error)
    }
}

fn map_circuit_breaker_error(
    e: crate::infrastructure::core::circuit_breaker::CircuitBreakerError<anyhow::Error>,
) -> anyhow::Error {
    match e {
        crate::infrastructure::core::circuit_breaker::CircuitBreakerError::Open(msg) => {
            anyhow::anyhow!("Binance futures circuit breaker open: {msg}")
        }
        crate::infrastructure::core::circuit_breaker::CircuitBreakerError::Inner(inner) => inner,
    }
}
