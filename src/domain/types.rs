use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Candle color, derived from `close >= open` when not supplied by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Color {
    Green,
    Red,
}

impl Color {
    pub fn from_open_close(open: Decimal, close: Decimal) -> Self {
        if close >= open {
            Color::Green
        } else {
            Color::Red
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::Green => write!(f, "green"),
            Color::Red => write!(f, "red"),
        }
    }
}

impl std::str::FromStr for Color {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "green" => Ok(Color::Green),
            "red" => Ok(Color::Red),
            other => Err(format!("invalid candle color: {other}")),
        }
    }
}

/// Directional side, shared by regime, signals, armed state and positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "long" => Ok(Side::Long),
            "short" => Ok(Side::Short),
            other => Err(format!("invalid side: {other}")),
        }
    }
}

/// Market regime derived from moving-average alignment. `Neutral` is not
/// directional and never appears as a `Signal` or `ArmedState` side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regime {
    Long,
    Short,
    Neutral,
}

impl Regime {
    pub fn side(self) -> Option<Side> {
        match self {
            Regime::Long => Some(Side::Long),
            Regime::Short => Some(Side::Short),
            Regime::Neutral => None,
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Regime::Long => write!(f, "long"),
            Regime::Short => write!(f, "short"),
            Regime::Neutral => write!(f, "neutral"),
        }
    }
}

/// A single OHLC bar for `(sym, tf)`, keyed by the stream-id-derived
/// timestamp when the feed omits an explicit `ts`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub sym: String,
    pub tf: String,
    pub ts_ms: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub color: Color,
}

/// Raw, untyped candle fields as they arrive off the wire, before color
/// derivation and timestamp fallback are applied. Kept `Option` because the
/// feed is allowed to omit `color` (derived) or `ts` (stream-id fallback);
/// any other missing field makes the candle malformed (spec §4.E failure
/// semantics: skip with an audit log, cursor still advances).
#[derive(Debug, Clone, Default)]
pub struct CandleFields {
    pub ts_ms: Option<i64>,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Option<Decimal>,
    pub color: Option<Color>,
}

/// Indicator values emitted once per processed candle that has both moving
/// averages defined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub sym: String,
    pub tf: String,
    pub ts_ms: i64,
    pub close: Decimal,
    pub ma20: Decimal,
    pub ma200: Decimal,
    pub regime: Regime,
    pub ind_high: Option<Decimal>,
    pub ind_low: Option<Decimal>,
    pub ind_ts: Option<i64>,
}

/// Most recent counter-colored candle within the current regime: the most
/// recent red candle while long, or the most recent green candle while
/// short. Defines the breakout levels for the next `ArmedState`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorCandle {
    pub side: Side,
    pub high: Decimal,
    pub low: Decimal,
    pub ts_ms: i64,
}

/// Per-`(sym, tf)` armed breakout level, live from `ARM` emission until the
/// matching `DISARM` (or the direct-flip `DISARM` that replaces it).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArmedState {
    pub side: Side,
    pub trigger: Decimal,
    pub stop: Decimal,
}

/// A signal emitted by the calculator onto the signal stream. Unlike the
/// loose key/value maps the original pipeline moves between services, this
/// is an exhaustive tagged union decoded once at the stream boundary — see
/// the decoding layer in `infrastructure::broker`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Signal {
    Arm {
        sym: String,
        tf: String,
        ind_ts: i64,
        side: Side,
        trigger: Decimal,
        stop: Decimal,
    },
    Disarm {
        sym: String,
        tf: String,
        ind_ts: i64,
        side: Side,
        prev_side: Side,
        reason: String,
    },
}

impl Signal {
    pub fn sym(&self) -> &str {
        match self {
            Signal::Arm { sym, .. } | Signal::Disarm { sym, .. } => sym,
        }
    }

    pub fn tf(&self) -> &str {
        match self {
            Signal::Arm { tf, .. } | Signal::Disarm { tf, .. } => tf,
        }
    }

    pub fn side(&self) -> Side {
        match self {
            Signal::Arm { side, .. } => *side,
            Signal::Disarm { side, .. } => *side,
        }
    }

    pub fn ind_ts(&self) -> i64 {
        match self {
            Signal::Arm { ind_ts, .. } | Signal::Disarm { ind_ts, .. } => *ind_ts,
        }
    }

    /// `"{sym}:{ind_ts}:{side}"` — unique per (sym, ind_ts, side); the
    /// idempotency-set key component shared with `(bot_id, ...)`.
    pub fn signal_id(&self) -> String {
        format!("{}:{}:{}", self.sym(), self.ind_ts(), self.side())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Signal::Arm { .. } => "arm",
            Signal::Disarm { .. } => "disarm",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BotStatus {
    Active,
    Paused,
    Ended,
}

impl std::str::FromStr for BotStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(BotStatus::Active),
            "paused" => Ok(BotStatus::Paused),
            "ended" => Ok(BotStatus::Ended),
            other => Err(format!("invalid bot status: {other}")),
        }
    }
}

impl fmt::Display for BotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BotStatus::Active => write!(f, "active"),
            BotStatus::Paused => write!(f, "paused"),
            BotStatus::Ended => write!(f, "ended"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SideMode {
    Both,
    LongOnly,
    ShortOnly,
}

impl SideMode {
    pub fn allows(self, side: Side) -> bool {
        match (self, side) {
            (SideMode::Both, _) => true,
            (SideMode::LongOnly, Side::Long) => true,
            (SideMode::ShortOnly, Side::Short) => true,
            _ => false,
        }
    }
}

impl std::str::FromStr for SideMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "both" => Ok(SideMode::Both),
            "long_only" => Ok(SideMode::LongOnly),
            "short_only" => Ok(SideMode::ShortOnly),
            other => Err(format!("invalid side_mode: {other}")),
        }
    }
}

impl fmt::Display for SideMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SideMode::Both => write!(f, "both"),
            SideMode::LongOnly => write!(f, "long_only"),
            SideMode::ShortOnly => write!(f, "short_only"),
        }
    }
}

/// Read-only from the core; owned and mutated by an external bot-admin
/// surface out of scope for this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    pub bot_id: String,
    pub user_id: String,
    pub sym: String,
    pub status: BotStatus,
    pub side_mode: SideMode,
    pub risk_per_trade: Decimal,
    pub leverage: Decimal,
    pub tp_ratio: Decimal,
    pub max_qty: Option<Decimal>,
}

/// Per-bot durable state, created on first signal processing and mutated by
/// handlers and the reconciler only.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BotState {
    pub last_signal_id: Option<String>,
    pub armed_entry_order_id: Option<String>,
    /// Comma-joined SL/TP order ids, matching the wire field shape.
    pub bracket_ids: Option<String>,
    pub position_side: Option<String>,
    pub position_qty: Option<Decimal>,
    pub avg_entry_price: Option<Decimal>,
}

impl BotState {
    pub fn bracket_id_list(&self) -> Vec<String> {
        self.bracket_ids
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// The entry leg of a `Plan`: always a stop-market triggering at the armed
/// breakout level (spec §4.G).
#[derive(Debug, Clone, PartialEq)]
pub struct EntryOrder {
    pub stop_price: Decimal,
    pub side: Side,
}

/// Stop-loss/take-profit levels bracketing the entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Brackets {
    pub sl: Decimal,
    pub tp: Decimal,
}

/// Rejection notes accumulated on an `ok:false` `Plan` (spec §4.G: "errors
/// are diagnostic, not exceptions").
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanDiagnostics {
    pub notes: Vec<String>,
}

impl PlanDiagnostics {
    pub fn note(reason: impl Into<String>) -> Self {
        Self { notes: vec![reason.into()] }
    }
}

/// Output of `build_plan` (spec §4.G). On `ok:false`, `qty`/`entry`/
/// `brackets`/`tp_price` are absent; `diagnostics.notes` explains why.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub ok: bool,
    pub sym: String,
    pub side: Side,
    pub qty: Option<Decimal>,
    pub entry: Option<EntryOrder>,
    pub brackets: Option<Brackets>,
    pub tp_price: Option<Decimal>,
    pub preplace_brackets: bool,
    pub diagnostics: PlanDiagnostics,
}

impl Plan {
    pub fn rejected(sym: impl Into<String>, side: Side, reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            sym: sym.into(),
            side,
            qty: None,
            entry: None,
            brackets: None,
            tp_price: None,
            preplace_brackets: true,
            diagnostics: PlanDiagnostics::note(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_id_format() {
        let sig = Signal::Arm {
            sym: "BTCUSDT".into(),
            tf: "2m".into(),
            ind_ts: 1700000000001,
            side: Side::Long,
            trigger: Decimal::new(10031, 3),
            stop: Decimal::new(979, 2),
        };
        assert_eq!(sig.signal_id(), "BTCUSDT:1700000000001:long");
    }

    #[test]
    fn side_mode_eligibility() {
        assert!(!SideMode::LongOnly.allows(Side::Short));
        assert!(SideMode::LongOnly.allows(Side::Long));
        assert!(SideMode::Both.allows(Side::Short));
    }

    #[test]
    fn bracket_id_list_parses_comma_joined() {
        let st = BotState {
            bracket_ids: Some("S-1,T-1".into()),
            ..Default::default()
        };
        assert_eq!(st.bracket_id_list(), vec!["S-1".to_string(), "T-1".to_string()]);
    }
}
