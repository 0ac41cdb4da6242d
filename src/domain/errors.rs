use thiserror::Error;

/// Errors from a single calculator candle-processing step. The worker logs
/// these and advances its cursor regardless — the calculator never drops a
/// candle silently (spec §4.E).
#[derive(Debug, Error)]
pub enum CalcError {
    #[error("malformed candle for {sym}:{tf}: missing {field}")]
    MalformedCandle { sym: String, tf: String, field: &'static str },

    #[error("broker unavailable: {reason}")]
    BrokerUnavailable { reason: String },
}

/// Plan-builder rejections. These are business errors (spec §7, taxonomy
/// ii), never exceptions: `build_plan` returns a `Plan{ok:false, ..}`
/// carrying one of these as a diagnostic, it never propagates a `Result::Err`
/// across the handler boundary.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlanError {
    #[error("zero free balance for {user_id}")]
    ZeroBalance { user_id: String },

    #[error("sizing produced non-positive quantity")]
    SizingFailed,

    #[error("quantity {qty} below min_qty {min_qty}")]
    BelowMinQty { qty: String, min_qty: String },

    #[error("notional {notional} below min_notional {min_notional}")]
    BelowMinNotional { notional: String, min_notional: String },

    #[error("qty {qty} exceeds max_qty {max_qty}")]
    ExceedsMaxQty { qty: String, max_qty: String },
}

/// Handler-level terminal validation errors (spec §7, taxonomy i).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HandlerError {
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("bot config not found")]
    BotConfigNotFound,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("exchange call failed for bot {bot_id}: {reason}")]
    ExchangeCallFailed { bot_id: String, reason: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state store I/O failed: {0}")]
    Io(String),

    #[error("decode failed for key {key}: {reason}")]
    Decode { key: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("http request failed: {0}")]
    Http(String),

    #[error("exchange rejected request: {0}")]
    Rejected(String),

    #[error("invalid order payload: {0}")]
    InvalidPayload(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_error_messages_carry_context() {
        let err = PlanError::ExceedsMaxQty {
            qty: "0.12".into(),
            max_qty: "0.05".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("0.12"));
        assert!(msg.contains("0.05"));
    }

    #[test]
    fn handler_error_missing_field_names_field() {
        let err = HandlerError::MissingField("signal_id");
        assert_eq!(err.to_string(), "missing field 'signal_id'");
    }
}
