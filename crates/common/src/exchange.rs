use async_trait::async_trait;

use crate::{Balance, Candle, OrderFill, OrderSide, Result};

/// Abstraction over the market-data / trading collaborator.
///
/// `BinanceClient` implements this for live trading, `PaperClient` for
/// simulation. Every call can fail with a network or exchange error; the
/// tick engine's top-level handler owns recovery (the next scheduled tick
/// is the retry).
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Fetch up to `limit` candles for `symbol` on `timeframe`,
    /// ordered oldest first.
    async fn fetch_candles(&self, symbol: &str, timeframe: &str, limit: usize)
        -> Result<Vec<Candle>>;

    /// Latest traded price for `symbol`.
    async fn current_price(&self, symbol: &str) -> Result<f64>;

    /// Balance of a single asset, e.g. "USDT".
    async fn free_balance(&self, asset: &str) -> Result<Balance>;

    /// Submit a market order and return the actual fill.
    ///
    /// For buys `amount` is the quote-currency cost to spend; for sells it
    /// is the base-currency quantity to liquidate. `reference_price` is the
    /// last observed price, used for logging and simulation only.
    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        amount: f64,
        reference_price: f64,
    ) -> Result<OrderFill>;
}
