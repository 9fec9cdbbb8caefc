use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use common::{Balance, Candle, Error, ExchangeClient, OrderFill, OrderSide, Result};

/// Flat taker fee applied to simulated fills, quoted against the notional.
const FEE_RATE: f64 = 0.001;

/// Simulated exchange client for paper trading.
///
/// Market data (candles, ticker price) is delegated to an inner client so
/// paper mode trades against real prices; balances and fills are simulated
/// locally with configurable slippage. No real orders are ever sent.
pub struct PaperClient {
    market: Arc<dyn ExchangeClient>,
    /// Simulated free balances, keyed by asset.
    balances: RwLock<HashMap<String, f64>>,
    /// Slippage in basis points applied to all fills.
    slippage_bps: f64,
}

impl PaperClient {
    pub fn new(
        market: Arc<dyn ExchangeClient>,
        quote_asset: &str,
        initial_quote_balance: f64,
        slippage_bps: f64,
    ) -> Self {
        info!(
            quote_asset,
            balance = initial_quote_balance,
            slippage_bps,
            "PaperClient initialized"
        );
        let mut balances = HashMap::new();
        balances.insert(quote_asset.to_uppercase(), initial_quote_balance);
        Self {
            market,
            balances: RwLock::new(balances),
            slippage_bps,
        }
    }

    /// Credit an asset directly, e.g. to seed a base balance for sell tests.
    pub async fn deposit(&self, asset: &str, amount: f64) {
        *self
            .balances
            .write()
            .await
            .entry(asset.to_uppercase())
            .or_insert(0.0) += amount;
    }

    fn fill_price(&self, mid: f64, side: OrderSide) -> f64 {
        // Buys pay more, sells receive less
        match side {
            OrderSide::Buy => mid * (1.0 + self.slippage_bps / 10_000.0),
            OrderSide::Sell => mid * (1.0 - self.slippage_bps / 10_000.0),
        }
    }
}

#[async_trait]
impl ExchangeClient for PaperClient {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        self.market.fetch_candles(symbol, timeframe, limit).await
    }

    async fn current_price(&self, symbol: &str) -> Result<f64> {
        self.market.current_price(symbol).await
    }

    async fn free_balance(&self, asset: &str) -> Result<Balance> {
        let free = self
            .balances
            .read()
            .await
            .get(&asset.to_uppercase())
            .copied()
            .unwrap_or(0.0);
        Ok(Balance {
            free,
            used: 0.0,
            total: free,
        })
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        amount: f64,
        reference_price: f64,
    ) -> Result<OrderFill> {
        let (base, quote) = symbol
            .split_once('/')
            .ok_or_else(|| Error::Exchange(format!("Invalid paper symbol '{symbol}'")))?;
        let base = base.to_uppercase();
        let quote = quote.to_uppercase();

        let mid = self
            .market
            .current_price(symbol)
            .await
            .unwrap_or(reference_price);
        let fill_price = self.fill_price(mid, side);

        let mut balances = self.balances.write().await;
        let (filled_quantity, fee) = match side {
            OrderSide::Buy => {
                // `amount` is the quote cost to spend
                let free = balances.get(&quote).copied().unwrap_or(0.0);
                if free < amount {
                    return Err(Error::Exchange(format!(
                        "Insufficient {quote} balance: {free} < {amount}"
                    )));
                }
                let quantity = amount / fill_price;
                *balances.entry(quote.clone()).or_insert(0.0) -= amount;
                *balances.entry(base.clone()).or_insert(0.0) += quantity;
                (quantity, amount * FEE_RATE)
            }
            OrderSide::Sell => {
                // `amount` is the base quantity to liquidate
                let free = balances.get(&base).copied().unwrap_or(0.0);
                if free < amount {
                    return Err(Error::Exchange(format!(
                        "Insufficient {base} balance: {free} < {amount}"
                    )));
                }
                let proceeds = amount * fill_price;
                *balances.entry(base.clone()).or_insert(0.0) -= amount;
                *balances.entry(quote.clone()).or_insert(0.0) += proceeds;
                (amount, proceeds * FEE_RATE)
            }
        };
        drop(balances);

        debug!(
            symbol,
            %side,
            mid,
            fill = fill_price,
            qty = filled_quantity,
            "Paper fill simulated"
        );

        Ok(OrderFill {
            symbol: symbol.to_string(),
            side,
            filled_quantity,
            average_price: fill_price,
            fee,
            timestamp: Utc::now(),
        })
    }
}
