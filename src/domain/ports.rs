use crate::domain::filters::SymbolFilters;
use crate::domain::types::{BotConfig, BotState};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// One entry read off a stream: an opaque id plus its field/value pairs.
/// Binary-safe field/value pairs, matching how real append-only stream
/// brokers represent an entry — decoded into typed domain structs at the
/// boundary (spec §9 design note), never passed around as a loose map.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEntry {
    pub id: String,
    pub fields: HashMap<String, String>,
}

/// Append-only streams + consumer groups + hashes + sets (spec §4.A / §6).
/// One in-memory implementation (`infrastructure::broker::memory`) backs
/// both production local-dev use and the test suite; the trait is the
/// seam a real broker (e.g. a Redis-compatible store) would implement
/// against.
#[async_trait]
pub trait StreamBroker: Send + Sync {
    async fn xadd(&self, stream: &str, fields: HashMap<String, String>) -> Result<String>;

    /// Cursor-based read, no consumer group. `after_id` of `"0"` reads from
    /// the start of the stream.
    async fn xread(&self, stream: &str, after_id: &str, count: usize) -> Result<Vec<StreamEntry>>;

    /// Idempotent: re-creating an existing group is a no-op (spec §4.F).
    async fn xgroup_create(&self, stream: &str, group: &str) -> Result<()>;

    /// Consumer-group read. `">"` reads new entries; any other id replays
    /// that consumer's still-pending entries.
    async fn xreadgroup(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        start: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>>;

    async fn xack(&self, stream: &str, group: &str, id: &str) -> Result<()>;

    async fn hset(&self, key: &str, fields: HashMap<String, String>) -> Result<()>;

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Add-if-absent; returns `true` iff this call newly added the member.
    /// The idempotency primitive (spec §9) — never simulate with
    /// read-then-write.
    async fn sadd(&self, key: &str, member: &str) -> Result<bool>;

    async fn srem(&self, key: &str, member: &str) -> Result<bool>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>>;
}

/// Exchange order update pushed out-of-band (fills, cancels, rejections).
/// Not required by the synchronous exchange contract in spec §6 but used by
/// `infrastructure::exchange` implementations that expose a push channel.
#[derive(Debug, Clone)]
pub struct OrderUpdate {
    pub order_id: String,
    pub status: String,
    pub filled_qty: Decimal,
    pub filled_avg_price: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiSide {
    Buy,
    Sell,
}

impl std::fmt::Display for ApiSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiSide::Buy => write!(f, "BUY"),
            ApiSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiOrderType {
    Limit,
    Market,
    StopMarket,
    TakeProfitMarket,
    TakeProfit,
    TakeProfitLimit,
}

impl std::fmt::Display for ApiOrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ApiOrderType::Limit => "LIMIT",
            ApiOrderType::Market => "MARKET",
            ApiOrderType::StopMarket => "STOP_MARKET",
            ApiOrderType::TakeProfitMarket => "TAKE_PROFIT_MARKET",
            ApiOrderType::TakeProfit => "TAKE_PROFIT",
            ApiOrderType::TakeProfitLimit => "TAKE_PROFIT_LIMIT",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeInForce {
    Gtc,
    Ioc,
    Fok,
    Gtx,
    GteGtc,
}

impl std::fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TimeInForce::Gtc => "GTC",
            TimeInForce::Ioc => "IOC",
            TimeInForce::Fok => "FOK",
            TimeInForce::Gtx => "GTX",
            TimeInForce::GteGtc => "GTE_GTC",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkingType {
    ContractPrice,
    MarkPrice,
}

impl std::fmt::Display for WorkingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkingType::ContractPrice => "CONTRACT_PRICE",
            WorkingType::MarkPrice => "MARK_PRICE",
        };
        write!(f, "{s}")
    }
}

/// Normalized order placement request, validated and quantized upstream by
/// the plan builder. Matches the "Order payload rules" table in spec §6.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: ApiSide,
    pub order_type: ApiOrderType,
    pub quantity: Option<Decimal>,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub time_in_force: Option<TimeInForce>,
    pub working_type: Option<WorkingType>,
    pub close_position: bool,
    pub client_order_id: String,
}

#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order_id: String,
}

#[derive(Debug, Clone)]
pub struct OpenOrder {
    pub order_id: String,
    pub symbol: String,
}

#[derive(Debug, Clone)]
pub struct Position {
    pub symbol: String,
    /// Signed: positive is long, negative is short, zero is flat.
    pub position_amt: Decimal,
    pub entry_price: Decimal,
}

/// The remote exchange contract (spec §6): typed wrappers over the venue's
/// HTTP API, normalized responses, request validation owned by the
/// implementation (not the caller).
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn place_order(&self, order: &OrderRequest) -> Result<PlacedOrder>;
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()>;
    async fn get_open_orders(&self, user_id: &str, symbol: Option<&str>) -> Result<Vec<OpenOrder>>;
    async fn get_positions(&self, user_id: &str, symbol: Option<&str>) -> Result<Vec<Position>>;
    async fn get_balance(&self, user_id: &str, asset: &str) -> Result<Decimal>;
    async fn get_symbol_filters(&self, sym: &str) -> Result<SymbolFilters>;
}

/// Bot config/state/idempotency-set/tracked-order-set/symbol-index
/// abstraction (spec §4.D / §6), built on top of `StreamBroker`'s hash and
/// set primitives.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn read_bot_config(&self, bot_id: &str) -> Result<Option<BotConfig>>;
    async fn write_bot_config(&self, cfg: &BotConfig) -> Result<()>;

    async fn read_bot_state(&self, bot_id: &str) -> Result<BotState>;
    /// Merges the given fields into the existing state (matching the
    /// original's partial-hash-write semantics — unspecified fields are
    /// left untouched).
    async fn write_bot_state(&self, bot_id: &str, patch: BotStatePatch) -> Result<()>;

    async fn is_signal_processed(&self, bot_id: &str, signal_id: &str) -> Result<bool>;
    /// Returns `true` iff this call newly marked the signal processed.
    async fn mark_signal_processed(&self, bot_id: &str, signal_id: &str) -> Result<bool>;

    async fn track_open_order(&self, bot_id: &str, order_id: &str) -> Result<bool>;
    async fn untrack_open_order(&self, bot_id: &str, order_id: &str) -> Result<bool>;
    async fn list_tracked_orders(&self, bot_id: &str) -> Result<Vec<String>>;

    async fn index_bot(&self, sym: &str, bot_id: &str) -> Result<()>;
    async fn bots_for_symbol(&self, sym: &str) -> Result<Vec<String>>;
}

/// Partial update to `BotState`: `None` leaves the field untouched,
/// `Some(None)` clears it, `Some(Some(v))` sets it.
#[derive(Debug, Clone, Default)]
pub struct BotStatePatch {
    pub last_signal_id: Option<Option<String>>,
    pub armed_entry_order_id: Option<Option<String>>,
    pub bracket_ids: Option<Option<String>>,
    pub position_side: Option<Option<String>>,
    pub position_qty: Option<Option<Decimal>>,
    pub avg_entry_price: Option<Option<Decimal>>,
}

impl BotStatePatch {
    pub fn apply(self, mut state: BotState) -> BotState {
        if let Some(v) = self.last_signal_id {
            state.last_signal_id = v;
        }
        if let Some(v) = self.armed_entry_order_id {
            state.armed_entry_order_id = v;
        }
        if let Some(v) = self.bracket_ids {
            state.bracket_ids = v;
        }
        if let Some(v) = self.position_side {
            state.position_side = v;
        }
        if let Some(v) = self.position_qty {
            state.position_qty = v;
        }
        if let Some(v) = self.avg_entry_price {
            state.avg_entry_price = v;
        }
        state
    }
}

/// At-least-once task dispatch (spec §9 design note). In-process channels
/// or an external broker both satisfy it; handlers must be idempotent
/// regardless of which backs it.
#[async_trait]
pub trait OrderTaskQueue: Send + Sync {
    async fn enqueue_arm(&self, payload: ArmPayload) -> Result<()>;
    async fn enqueue_disarm(&self, payload: DisarmPayload) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct ArmPayload {
    pub bot_id: String,
    pub signal_id: String,
    pub sym: String,
    pub side: crate::domain::types::Side,
    pub trigger: Decimal,
    pub stop: Decimal,
}

#[derive(Debug, Clone)]
pub struct DisarmPayload {
    pub bot_id: String,
    pub signal_id: String,
    pub sym: String,
    pub side: crate::domain::types::Side,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bot_state_patch_distinguishes_leave_clear_and_set() {
        let base = BotState {
            armed_entry_order_id: Some("E-1".into()),
            ..Default::default()
        };

        let leave = BotStatePatch::default().apply(base.clone());
        assert_eq!(leave.armed_entry_order_id, Some("E-1".to_string()));

        let clear = BotStatePatch {
            armed_entry_order_id: Some(None),
            ..Default::default()
        }
        .apply(base.clone());
        assert_eq!(clear.armed_entry_order_id, None);

        let set = BotStatePatch {
            armed_entry_order_id: Some(Some("E-2".into())),
            ..Default::default()
        }
        .apply(base);
        assert_eq!(set.armed_entry_order_id, Some("E-2".to_string()));
    }
}
