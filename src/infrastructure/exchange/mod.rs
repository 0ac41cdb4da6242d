pub mod binance;
pub mod mock;
pub mod validate;

pub use binance::BinanceFuturesClient;
pub use mock::MockExchangeClient;
