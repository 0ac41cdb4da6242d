use rust_decimal::Decimal;
use rust_decimal::RoundingStrategy;
use serde::{Deserialize, Serialize};

/// Exchange-reported quantization/notional constraints for one symbol.
/// Grounded on `get_symbol_filters` (spec §6) and the Binance `LOT_SIZE` /
/// `PRICE_FILTER` shapes the original loader derives them from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SymbolFilters {
    pub tick_size: Decimal,
    pub step_size: Decimal,
    pub min_qty: Decimal,
    pub min_notional: Decimal,
}

impl SymbolFilters {
    pub fn fallback(tick_size: Decimal, step_size: Decimal) -> Self {
        Self {
            tick_size,
            step_size,
            min_qty: Decimal::ZERO,
            min_notional: Decimal::ZERO,
        }
    }
}

/// Round `value` down to the nearest multiple of `increment` (floor).
/// Used for long trigger/short stop and for quantity quantization, which
/// must never round up past what the exchange will actually accept.
pub fn quantize_floor(value: Decimal, increment: Decimal) -> Decimal {
    if increment <= Decimal::ZERO {
        return value;
    }
    (value / increment).round_dp_with_strategy(0, RoundingStrategy::ToZero) * increment
}

/// Round `value` up to the nearest multiple of `increment` (ceil). Used for
/// short trigger/long stop so the level sits strictly on the far side of
/// the indicator extreme by at least one tick.
pub fn quantize_ceil(value: Decimal, increment: Decimal) -> Decimal {
    if increment <= Decimal::ZERO {
        return value;
    }
    let floored = quantize_floor(value, increment);
    if floored == value {
        floored
    } else {
        floored + increment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn floor_quantizes_price_down() {
        let q = quantize_floor(dec!(90112.65), dec!(0.1));
        assert_eq!(q, dec!(90112.6));
    }

    #[test]
    fn ceil_quantizes_price_up() {
        let q = quantize_ceil(dec!(90112.61), dec!(0.1));
        assert_eq!(q, dec!(90112.7));
    }

    #[test]
    fn exact_multiple_is_unchanged_by_either_direction() {
        assert_eq!(quantize_floor(dec!(10.30), dec!(0.1)), dec!(10.3));
        assert_eq!(quantize_ceil(dec!(10.30), dec!(0.1)), dec!(10.3));
    }

    #[test]
    fn quantization_is_idempotent() {
        let once = quantize_floor(dec!(10.3049), dec!(0.01));
        let twice = quantize_floor(once, dec!(0.01));
        assert_eq!(once, twice);

        let once = quantize_ceil(dec!(10.3049), dec!(0.01));
        let twice = quantize_ceil(once, dec!(0.01));
        assert_eq!(once, twice);
    }
}
