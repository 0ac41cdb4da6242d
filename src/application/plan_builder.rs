//! Pure plan-building function (spec §4.G): no I/O, no side effects. The
//! caller fetches `free_balance` and `SymbolFilters` and passes them in.

use crate::domain::errors::PlanError;
use crate::domain::filters::{SymbolFilters, quantize_floor};
use crate::domain::types::{BotConfig, Brackets, EntryOrder, Plan, PlanDiagnostics, Side};
use rust_decimal::Decimal;

/// The arm-side inputs `build_plan` needs, decoded off the signal stream —
/// deliberately narrower than the full `Signal` enum (the plan builder
/// never looks at `tf` or `ind_ts`).
pub struct ArmInputs {
    pub sym: String,
    pub side: Side,
    pub trigger: Decimal,
    pub stop: Decimal,
}

pub fn build_plan(arm: &ArmInputs, cfg: &BotConfig, free_balance: Decimal, filters: &SymbolFilters) -> Plan {
    if free_balance <= Decimal::ZERO {
        return Plan::rejected(&arm.sym, arm.side, PlanError::ZeroBalance { user_id: cfg.user_id.clone() }.to_string());
    }

    let risk_usd = free_balance * cfg.risk_per_trade;
    let price_diff = (arm.trigger - arm.stop).abs();
    if price_diff <= Decimal::ZERO {
        return Plan::rejected(&arm.sym, arm.side, PlanError::SizingFailed.to_string());
    }

    let raw_qty = risk_usd / price_diff * cfg.leverage;
    if raw_qty <= Decimal::ZERO {
        return Plan::rejected(&arm.sym, arm.side, PlanError::SizingFailed.to_string());
    }

    let qty = quantize_floor(raw_qty, filters.step_size);
    if qty <= Decimal::ZERO || qty < filters.min_qty {
        return Plan::rejected(
            &arm.sym,
            arm.side,
            PlanError::BelowMinQty { qty: qty.to_string(), min_qty: filters.min_qty.to_string() }.to_string(),
        );
    }

    let notional = qty * arm.trigger;
    if notional < filters.min_notional {
        return Plan::rejected(
            &arm.sym,
            arm.side,
            PlanError::BelowMinNotional { notional: notional.to_string(), min_notional: filters.min_notional.to_string() }
                .to_string(),
        );
    }

    if let Some(max_qty) = cfg.max_qty
        && qty > max_qty
    {
        return Plan::rejected(
            &arm.sym,
            arm.side,
            PlanError::ExceedsMaxQty { qty: qty.to_string(), max_qty: max_qty.to_string() }.to_string(),
        );
    }

    let tp_price = match arm.side {
        Side::Long => arm.trigger + cfg.tp_ratio * (arm.trigger - arm.stop),
        Side::Short => arm.trigger - cfg.tp_ratio * (arm.stop - arm.trigger),
    };
    let tp_price = quantize_floor(tp_price, filters.tick_size);

    Plan {
        ok: true,
        sym: arm.sym.clone(),
        side: arm.side,
        qty: Some(qty),
        entry: Some(EntryOrder { stop_price: arm.trigger, side: arm.side }),
        brackets: Some(Brackets { sl: arm.stop, tp: tp_price }),
        tp_price: Some(tp_price),
        preplace_brackets: true,
        diagnostics: PlanDiagnostics::default(),
    }
}
