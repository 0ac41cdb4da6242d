//! Typed encode/decode between stream/hash field maps and domain structs
//! (spec §9 design note: a typed boundary, not loose dynamic field access
//! passed between components).

use crate::domain::errors::CalcError;
use crate::domain::types::{Candle, CandleFields, Color, IndicatorSnapshot, Regime, Side, Signal};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;

fn get_decimal(fields: &HashMap<String, String>, key: &str) -> Option<Decimal> {
    fields.get(key).and_then(|v| Decimal::from_str(v).ok())
}

fn get_i64(fields: &HashMap<String, String>, key: &str) -> Option<i64> {
    fields.get(key).and_then(|v| v.parse().ok())
}

pub fn decode_candle_fields(fields: &HashMap<String, String>) -> CandleFields {
    CandleFields {
        ts_ms: get_i64(fields, "ts"),
        open: get_decimal(fields, "open"),
        high: get_decimal(fields, "high"),
        low: get_decimal(fields, "low"),
        close: get_decimal(fields, "close"),
        color: fields.get("color").and_then(|v| Color::from_str(v).ok()),
    }
}

/// Promotes raw wire fields into a typed `Candle`: `ts` falls back to the
/// stream-id-derived timestamp when absent, `color` is derived from
/// open/close when absent. A missing `close` is the only fatal field (spec
/// §4.E failure semantics).
pub fn promote_candle(
    raw: CandleFields,
    sym: &str,
    tf: &str,
    fallback_ts_ms: i64,
) -> Result<Candle, CalcError> {
    let close = raw.close.ok_or_else(|| CalcError::MalformedCandle {
        sym: sym.to_string(),
        tf: tf.to_string(),
        field: "close",
    })?;
    let open = raw.open.unwrap_or(close);
    let high = raw.high.unwrap_or(close);
    let low = raw.low.unwrap_or(close);
    let color = raw.color.unwrap_or_else(|| Color::from_open_close(open, close));
    let ts_ms = raw.ts_ms.unwrap_or(fallback_ts_ms);

    Ok(Candle {
        sym: sym.to_string(),
        tf: tf.to_string(),
        ts_ms,
        open,
        high,
        low,
        close,
        color,
    })
}

/// Extracts the leading integer millisecond component of a stream entry id
/// (`"{millis}-{seq}"`), used as the `ts` fallback when a candle omits it.
pub fn stream_id_to_ts_ms(id: &str) -> i64 {
    id.split('-').next().and_then(|s| s.parse().ok()).unwrap_or(0)
}

pub fn encode_indicator_snapshot(snap: &IndicatorSnapshot) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    fields.insert("ts".to_string(), snap.ts_ms.to_string());
    fields.insert("close".to_string(), snap.close.to_string());
    fields.insert("ma20".to_string(), snap.ma20.to_string());
    fields.insert("ma200".to_string(), snap.ma200.to_string());
    fields.insert("regime".to_string(), snap.regime.to_string());
    if let Some(v) = snap.ind_high {
        fields.insert("ind_high".to_string(), v.to_string());
    }
    if let Some(v) = snap.ind_low {
        fields.insert("ind_low".to_string(), v.to_string());
    }
    if let Some(v) = snap.ind_ts {
        fields.insert("ind_ts".to_string(), v.to_string());
    }
    fields
}

pub fn encode_signal(sig: &Signal) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    fields.insert("type".to_string(), sig.kind().to_string());
    fields.insert("sym".to_string(), sig.sym().to_string());
    fields.insert("tf".to_string(), sig.tf().to_string());
    fields.insert("ind_ts".to_string(), sig.ind_ts().to_string());
    fields.insert("side".to_string(), sig.side().to_string());
    match sig {
        Signal::Arm { trigger, stop, .. } => {
            fields.insert("trigger".to_string(), trigger.to_string());
            fields.insert("stop".to_string(), stop.to_string());
        }
        Signal::Disarm { prev_side, reason, .. } => {
            fields.insert("prev_side".to_string(), prev_side.to_string());
            fields.insert("reason".to_string(), reason.clone());
        }
    }
    fields
}

pub fn decode_signal(fields: &HashMap<String, String>) -> Option<Signal> {
    let sym = fields.get("sym")?.clone();
    let tf = fields.get("tf")?.clone();
    let ind_ts = get_i64(fields, "ind_ts")?;
    let side = Side::from_str(fields.get("side")?).ok()?;

    match fields.get("type")?.as_str() {
        "arm" => Some(Signal::Arm {
            sym,
            tf,
            ind_ts,
            side,
            trigger: get_decimal(fields, "trigger")?,
            stop: get_decimal(fields, "stop")?,
        }),
        "disarm" => Some(Signal::Disarm {
            sym,
            tf,
            ind_ts,
            side,
            prev_side: Side::from_str(fields.get("prev_side")?).ok()?,
            reason: fields.get("reason")?.clone(),
        }),
        _ => None,
    }
}

pub fn decode_regime(fields: &HashMap<String, String>) -> Option<Regime> {
    match fields.get("regime")?.as_str() {
        "long" => Some(Regime::Long),
        "short" => Some(Regime::Short),
        "neutral" => Some(Regime::Neutral),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn promote_candle_defaults_missing_ohlc_and_ts() {
        let mut fields = HashMap::new();
        fields.insert("close".to_string(), "100.5".to_string());
        let raw = decode_candle_fields(&fields);
        let candle = promote_candle(raw, "BTCUSDT", "2m", 12345).unwrap();
        assert_eq!(candle.close, dec!(100.5));
        assert_eq!(candle.open, dec!(100.5));
        assert_eq!(candle.ts_ms, 12345);
    }

    #[test]
    fn promote_candle_rejects_missing_close() {
        let fields = HashMap::new();
        let raw = decode_candle_fields(&fields);
        assert!(promote_candle(raw, "BTCUSDT", "2m", 1).is_err());
    }

    #[test]
    fn signal_roundtrips_through_fields() {
        let sig = Signal::Arm {
            sym: "BTCUSDT".into(),
            tf: "2m".into(),
            ind_ts: 100,
            side: Side::Long,
            trigger: dec!(101.5),
            stop: dec!(98.5),
        };
        let fields = encode_signal(&sig);
        let decoded = decode_signal(&fields).unwrap();
        assert_eq!(decoded, sig);
    }

    #[test]
    fn stream_id_extracts_millis_prefix() {
        assert_eq!(stream_id_to_ts_ms("1700000000001-0"), 1700000000001);
    }
}
