//! Environment-driven configuration (spec out-of-core note: credential
//! storage and schema migration live outside the core, but loading the
//! flat env-var surface the core depends on is ambient plumbing every
//! binary needs). Parsing style ported from the teacher's `Config::from_env`
//! (`src/config.rs`): every field falls back to a documented default and
//! failures are wrapped with `anyhow::Context`.

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub binance_api_key: String,
    pub binance_api_secret: String,
    pub binance_base_url: String,
    pub http_timeout: Duration,

    /// `(symbol, timeframe)` pairs this process runs a calculator + signal
    /// poller for, parsed from `SUBSCRIPTIONS=BTCUSDT:2m,ETHUSDT:5m`.
    pub subscriptions: Vec<(String, String)>,

    pub reconcile_interval: Duration,
    pub task_queue_capacity: usize,
    pub handler_pool_size: usize,
    pub db_path: String,
    pub consumer_name: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let binance_api_key = env::var("BINANCE_API_KEY").unwrap_or_default();
        let binance_api_secret = env::var("BINANCE_API_SECRET").unwrap_or_default();
        let binance_base_url = env::var("BINANCE_BASE_URL").unwrap_or_else(|_| "https://fapi.binance.com".to_string());

        let http_timeout_secs = env::var("HTTP_TIMEOUT_SECS")
            .unwrap_or_else(|_| "15".to_string())
            .parse::<u64>()
            .context("failed to parse HTTP_TIMEOUT_SECS")?;

        let subscriptions_str = env::var("SUBSCRIPTIONS").unwrap_or_else(|_| "BTCUSDT:2m".to_string());
        let subscriptions = parse_subscriptions(&subscriptions_str)?;

        let reconcile_interval_secs = env::var("RECONCILE_INTERVAL_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse::<u64>()
            .context("failed to parse RECONCILE_INTERVAL_SECS")?;

        let task_queue_capacity = env::var("TASK_QUEUE_CAPACITY")
            .unwrap_or_else(|_| "256".to_string())
            .parse::<usize>()
            .context("failed to parse TASK_QUEUE_CAPACITY")?;

        let handler_pool_size = env::var("HANDLER_POOL_SIZE")
            .unwrap_or_else(|_| "4".to_string())
            .parse::<usize>()
            .context("failed to parse HANDLER_POOL_SIZE")?;

        let db_path = env::var("DB_PATH").unwrap_or_else(|_| "order_states.db".to_string());
        let consumer_name = env::var("CONSUMER_NAME").unwrap_or_else(|_| format!("consumer-{}", std::process::id()));

        Ok(Config {
            binance_api_key,
            binance_api_secret,
            binance_base_url,
            http_timeout: Duration::from_secs(http_timeout_secs),
            subscriptions,
            reconcile_interval: Duration::from_secs(reconcile_interval_secs),
            task_queue_capacity,
            handler_pool_size,
            db_path,
            consumer_name,
        })
    }
}

fn parse_subscriptions(raw: &str) -> Result<Vec<(String, String)>> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|entry| {
            entry
                .split_once(':')
                .map(|(sym, tf)| (sym.trim().to_uppercase(), tf.trim().to_string()))
                .with_context(|| format!("invalid SUBSCRIPTIONS entry '{entry}', expected SYMBOL:TIMEFRAME"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_subscriptions() {
        let subs = parse_subscriptions("btcusdt:2m, ETHUSDT:5m").unwrap();
        assert_eq!(subs, vec![("BTCUSDT".to_string(), "2m".to_string()), ("ETHUSDT".to_string(), "5m".to_string())]);
    }

    #[test]
    fn rejects_entry_missing_timeframe() {
        assert!(parse_subscriptions("BTCUSDT").is_err());
    }
}
