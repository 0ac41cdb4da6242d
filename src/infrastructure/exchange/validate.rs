use crate::domain::errors::ExchangeError;
use crate::domain::ports::{ApiOrderType, OrderRequest};
use std::collections::HashMap;

/// Validates and normalizes a futures order request into the wire
/// key/value params the exchange HTTP API expects: enforces required-field
/// combos per order type, uppercases enum-ish values, and drops absent
/// fields. Ported from `request_validators.validate_new_order_payload` in
/// the original implementation.
pub fn validate_new_order_payload(order: &OrderRequest) -> Result<HashMap<String, String>, ExchangeError> {
    let mut params = HashMap::new();
    params.insert("symbol".to_string(), order.symbol.to_uppercase());
    params.insert("side".to_string(), order.side.to_string());
    params.insert("type".to_string(), order.order_type.to_string());
    params.insert("newClientOrderId".to_string(), order.client_order_id.clone());

    match order.order_type {
        ApiOrderType::Limit => {
            let price = order.price.ok_or_else(|| {
                ExchangeError::InvalidPayload("Missing required field 'price' for Binance order".into())
            })?;
            let tif = order.time_in_force.ok_or_else(|| {
                ExchangeError::InvalidPayload("Missing required field 'timeInForce' for Binance order".into())
            })?;
            params.insert("price".to_string(), price.to_string());
            params.insert("timeInForce".to_string(), tif.to_string());
        }
        ApiOrderType::StopMarket | ApiOrderType::TakeProfitMarket => {
            let stop_price = order.stop_price.ok_or_else(|| {
                ExchangeError::InvalidPayload("Missing required field 'stopPrice' for Binance order".into())
            })?;
            params.insert("stopPrice".to_string(), stop_price.to_string());
        }
        ApiOrderType::TakeProfit | ApiOrderType::TakeProfitLimit => {
            let price = order.price.ok_or_else(|| {
                ExchangeError::InvalidPayload("Missing required field 'price' for Binance order".into())
            })?;
            let stop_price = order.stop_price.ok_or_else(|| {
                ExchangeError::InvalidPayload("Missing required field 'stopPrice' for Binance order".into())
            })?;
            let tif = order.time_in_force.ok_or_else(|| {
                ExchangeError::InvalidPayload("Missing required field 'timeInForce' for Binance order".into())
            })?;
            params.insert("price".to_string(), price.to_string());
            params.insert("stopPrice".to_string(), stop_price.to_string());
            params.insert("timeInForce".to_string(), tif.to_string());
        }
        ApiOrderType::Market => {}
    }

    let quantity_optional = order.close_position
        && matches!(order.order_type, ApiOrderType::StopMarket | ApiOrderType::TakeProfitMarket);

    if order.close_position {
        params.insert("closePosition".to_string(), "true".to_string());
    }

    match order.quantity {
        Some(qty) => {
            params.insert("quantity".to_string(), qty.to_string());
        }
        None if !quantity_optional => {
            return Err(ExchangeError::InvalidPayload(
                "Missing required field 'quantity' for Binance order".into(),
            ));
        }
        None => {}
    }

    if let Some(wt) = order.working_type {
        params.insert("workingType".to_string(), wt.to_string());
    }

    Ok(params)
}

/// Validates a cancel/query request: `symbol` is required; the caller must
/// supply either `order_id` or fall back to `client_order_id` when neither
/// is available at the call site.
pub fn validate_query_or_cancel_payload(symbol: &str, order_id: Option<&str>) -> Result<HashMap<String, String>, ExchangeError> {
    if symbol.is_empty() {
        return Err(ExchangeError::InvalidPayload(
            "Missing required field 'symbol' for Binance order query/cancel".into(),
        ));
    }
    let mut params = HashMap::new();
    params.insert("symbol".to_string(), symbol.to_uppercase());

    match order_id {
        Some(id) if !id.is_empty() => {
            params.insert("orderId".to_string(), id.to_string());
            Ok(params)
        }
        _ => Err(ExchangeError::InvalidPayload(
            "Provide orderId or origClientOrderId for Binance order query/cancel".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{ApiSide, TimeInForce, WorkingType};
    use rust_decimal_macros::dec;

    fn base_order(order_type: ApiOrderType) -> OrderRequest {
        OrderRequest {
            symbol: "btcusdt".into(),
            side: ApiSide::Buy,
            order_type,
            quantity: Some(dec!(0.01)),
            price: None,
            stop_price: None,
            time_in_force: None,
            working_type: Some(WorkingType::MarkPrice),
            close_position: false,
            client_order_id: "coid-1".into(),
        }
    }

    #[test]
    fn stop_market_requires_stop_price() {
        let order = base_order(ApiOrderType::StopMarket);
        let err = validate_new_order_payload(&order).unwrap_err();
        assert!(err.to_string().contains("stopPrice"));
    }

    #[test]
    fn stop_market_ok_with_stop_price() {
        let mut order = base_order(ApiOrderType::StopMarket);
        order.stop_price = Some(dec!(100.0));
        let params = validate_new_order_payload(&order).unwrap();
        assert_eq!(params["symbol"], "BTCUSDT");
        assert_eq!(params["stopPrice"], "100.0");
    }

    #[test]
    fn close_position_stop_market_does_not_require_quantity() {
        let mut order = base_order(ApiOrderType::StopMarket);
        order.quantity = None;
        order.stop_price = Some(dec!(100.0));
        order.close_position = true;
        let params = validate_new_order_payload(&order).unwrap();
        assert_eq!(params["closePosition"], "true");
        assert!(!params.contains_key("quantity"));
    }

    #[test]
    fn limit_requires_price_and_tif() {
        let order = base_order(ApiOrderType::Limit);
        let err = validate_new_order_payload(&order).unwrap_err();
        assert!(err.to_string().contains("price"));

        let mut order = base_order(ApiOrderType::Limit);
        order.price = Some(dec!(100));
        let err = validate_new_order_payload(&order).unwrap_err();
        assert!(err.to_string().contains("timeInForce"));

        let mut order = base_order(ApiOrderType::Limit);
        order.price = Some(dec!(100));
        order.time_in_force = Some(TimeInForce::Gtc);
        assert!(validate_new_order_payload(&order).is_ok());
    }

    #[test]
    fn cancel_requires_symbol_and_order_id() {
        assert!(validate_query_or_cancel_payload("", Some("1")).is_err());
        assert!(validate_query_or_cancel_payload("BTCUSDT", None).is_err());
        assert!(validate_query_or_cancel_payload("BTCUSDT", Some("1")).is_ok());
    }
}
