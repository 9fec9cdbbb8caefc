//! Manual overrides that bypass the strategy entirely. These are the
//! operator's last-resort controls; every call is logged at warn level
//! and reported through the notifier.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{error, warn};

use common::{
    ConfigStore, EngineCommand, Error, ExchangeClient, Notifier, OpenPosition, OrderFill,
    OrderSide, PositionStore, Result,
};

use crate::ticker::{EngineHandle, SharedPosition};

/// Executes emergency market orders outside the tick loop. Shares the
/// position mirror with the engine so both views stay consistent, and
/// takes the engine's trade lock for the whole order so an emergency can
/// never interleave with an in-flight tick on the same symbol.
pub struct EmergencyService {
    exchange: Arc<dyn ExchangeClient>,
    config_store: Arc<dyn ConfigStore>,
    position_store: Arc<dyn PositionStore>,
    notifier: Arc<dyn Notifier>,
    position: SharedPosition,
    engine: EngineHandle,
    trade_lock: Arc<Mutex<()>>,
}

impl EmergencyService {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        config_store: Arc<dyn ConfigStore>,
        position_store: Arc<dyn PositionStore>,
        notifier: Arc<dyn Notifier>,
        engine: EngineHandle,
    ) -> Self {
        let position = engine.position();
        let trade_lock = engine.trade_lock();
        Self {
            exchange,
            config_store,
            position_store,
            notifier,
            position,
            engine,
            trade_lock,
        }
    }

    /// Market-buy with a percentage of the free quote balance, recording
    /// the result as the open position.
    pub async fn force_buy(&self, percentage: f64) -> Result<OrderFill> {
        if percentage <= 0.0 || percentage > 100.0 {
            return Err(Error::Validation(
                "Percentage must be in (0, 100]".to_string(),
            ));
        }
        let _trading = self.trade_lock.lock().await;
        let config = self.config_store.read_config().await?;
        let quote = config.quote_asset().to_string();
        let balance = self.exchange.free_balance(&quote).await?;
        if balance.free <= 0.0 {
            return Err(Error::Exchange(format!("No free {quote} balance")));
        }

        let spend = balance.free * percentage / 100.0;
        let price = self
            .exchange
            .current_price(&config.trading_symbol)
            .await?;
        warn!(
            symbol = %config.trading_symbol,
            spend,
            percentage,
            "Emergency buy requested"
        );

        let fill = self
            .exchange
            .place_market_order(&config.trading_symbol, OrderSide::Buy, spend, price)
            .await?;
        if fill.filled_quantity <= 0.0 {
            return Err(Error::Exchange(
                "Emergency buy reported a zero fill".to_string(),
            ));
        }

        let position = OpenPosition {
            symbol: fill.symbol.clone(),
            entry_price: fill.average_price,
            quantity: fill.filled_quantity,
            opened_at: Utc::now(),
        };
        self.position_store.save_position(&position).await?;
        *self.position.write().await = Some(position.clone());

        self.notifier
            .send(&format!(
                "🚨 Emergency buy: {:.6} {} at {:.4}",
                position.quantity, position.symbol, position.entry_price
            ))
            .await;
        Ok(fill)
    }

    /// Market-sell a percentage of the free base balance. A 100% sell also
    /// clears the tracked position.
    pub async fn force_sell(&self, percentage: f64) -> Result<OrderFill> {
        if percentage <= 0.0 || percentage > 100.0 {
            return Err(Error::Validation(
                "Percentage must be in (0, 100]".to_string(),
            ));
        }
        let _trading = self.trade_lock.lock().await;
        let config = self.config_store.read_config().await?;
        let base = config.base_asset().to_string();
        let balance = self.exchange.free_balance(&base).await?;
        if balance.free <= 0.0 {
            return Err(Error::Exchange(format!("No free {base} balance")));
        }

        let quantity = balance.free * percentage / 100.0;
        let price = self
            .exchange
            .current_price(&config.trading_symbol)
            .await?;
        warn!(
            symbol = %config.trading_symbol,
            quantity,
            percentage,
            "Emergency sell requested"
        );

        let fill = self
            .exchange
            .place_market_order(&config.trading_symbol, OrderSide::Sell, quantity, price)
            .await?;

        if percentage >= 100.0 {
            self.position_store.delete_position().await?;
            *self.position.write().await = None;
        }

        self.notifier
            .send(&format!(
                "🚨 Emergency sell: {:.6} {} at {:.4}",
                fill.filled_quantity, fill.symbol, fill.average_price
            ))
            .await;
        Ok(fill)
    }

    /// Liquidate everything and stop the engine. A failed sell is reported
    /// but never blocks the stop.
    pub async fn sell_and_stop(&self) -> Result<()> {
        if let Err(e) = self.force_sell(100.0).await {
            error!(error = %e, "Emergency liquidation failed, stopping anyway");
            self.notifier
                .send(&format!("🚨 Emergency liquidation failed: {e}"))
                .await;
        }
        self.engine.send(EngineCommand::Stop).await?;
        self.notifier.send("🛑 Engine stopped by operator").await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use common::{
        Balance, BotConfig, Candle, TradeLogEntry, TradeLogStore,
    };
    use strategy::StrategyManager;

    use crate::ticker::{TickDeps, TickEngine, DEFAULT_TICK_INTERVAL};

    struct MemConfigStore(StdMutex<BotConfig>);

    #[async_trait]
    impl ConfigStore for MemConfigStore {
        async fn read_config(&self) -> Result<BotConfig> {
            Ok(self.0.lock().unwrap().clone())
        }
        async fn write_config(&self, config: &BotConfig) -> Result<()> {
            *self.0.lock().unwrap() = config.clone();
            Ok(())
        }
    }

    struct MemPositionStore(StdMutex<Option<OpenPosition>>);

    #[async_trait]
    impl PositionStore for MemPositionStore {
        async fn read_position(&self) -> Result<Option<OpenPosition>> {
            Ok(self.0.lock().unwrap().clone())
        }
        async fn save_position(&self, position: &OpenPosition) -> Result<()> {
            *self.0.lock().unwrap() = Some(position.clone());
            Ok(())
        }
        async fn delete_position(&self) -> Result<()> {
            *self.0.lock().unwrap() = None;
            Ok(())
        }
    }

    struct MemTradeLog(StdMutex<Vec<TradeLogEntry>>);

    #[async_trait]
    impl TradeLogStore for MemTradeLog {
        async fn append_entry(&self, entry: &TradeLogEntry) -> Result<()> {
            self.0.lock().unwrap().push(entry.clone());
            Ok(())
        }
        async fn read_all(&self) -> Result<Vec<TradeLogEntry>> {
            Ok(self.0.lock().unwrap().clone())
        }
    }

    struct NullNotifier;

    #[async_trait]
    impl Notifier for NullNotifier {
        async fn send(&self, _text: &str) {}
    }

    struct FixedExchange {
        price: f64,
        quote_free: f64,
        base_free: f64,
        orders: StdMutex<Vec<(OrderSide, f64)>>,
    }

    #[async_trait]
    impl ExchangeClient for FixedExchange {
        async fn fetch_candles(
            &self,
            _symbol: &str,
            _timeframe: &str,
            _limit: usize,
        ) -> Result<Vec<Candle>> {
            Ok(Vec::new())
        }

        async fn current_price(&self, _symbol: &str) -> Result<f64> {
            Ok(self.price)
        }

        async fn free_balance(&self, asset: &str) -> Result<Balance> {
            let free = if asset == "USDT" {
                self.quote_free
            } else {
                self.base_free
            };
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
            self.orders.lock().unwrap().push((side, amount));
            let filled_quantity = match side {
                OrderSide::Buy => amount / reference_price,
                OrderSide::Sell => amount,
            };
            Ok(OrderFill {
                symbol: symbol.to_string(),
                side,
                filled_quantity,
                average_price: reference_price,
                fee: 0.0,
                timestamp: Utc::now(),
            })
        }
    }

    fn service(
        exchange: Arc<FixedExchange>,
    ) -> (EmergencyService, Arc<MemPositionStore>, EngineHandle) {
        let config_store = Arc::new(MemConfigStore(StdMutex::new(BotConfig::default())));
        let positions = Arc::new(MemPositionStore(StdMutex::new(None)));
        let trade_log = Arc::new(MemTradeLog(StdMutex::new(Vec::new())));
        let notifier = Arc::new(NullNotifier);
        let manager = StrategyManager::new(&BotConfig::default()).unwrap();

        let deps = TickDeps {
            exchange: exchange.clone(),
            config_store: config_store.clone(),
            position_store: positions.clone(),
            trade_log,
            notifier: notifier.clone(),
            strategy_manager: Arc::new(Mutex::new(manager)),
        };
        let (_engine, handle) = TickEngine::new(deps, DEFAULT_TICK_INTERVAL);

        let service = EmergencyService::new(
            exchange,
            config_store,
            positions.clone(),
            notifier,
            handle.clone(),
        );
        (service, positions, handle)
    }

    #[tokio::test]
    async fn force_buy_records_the_position() {
        let exchange = Arc::new(FixedExchange {
            price: 100.0,
            quote_free: 1000.0,
            base_free: 0.0,
            orders: StdMutex::new(Vec::new()),
        });
        let (service, positions, handle) = service(exchange.clone());

        let fill = service.force_buy(50.0).await.unwrap();
        assert_eq!(fill.filled_quantity, 5.0);

        let stored = positions.0.lock().unwrap().clone().unwrap();
        assert_eq!(stored.entry_price, 100.0);
        assert_eq!(stored.quantity, 5.0);
        assert!(handle.position().read().await.is_some());
        assert_eq!(
            exchange.orders.lock().unwrap().as_slice(),
            &[(OrderSide::Buy, 500.0)]
        );
    }

    #[tokio::test]
    async fn full_sell_clears_the_position() {
        let exchange = Arc::new(FixedExchange {
            price: 100.0,
            quote_free: 0.0,
            base_free: 2.0,
            orders: StdMutex::new(Vec::new()),
        });
        let (service, positions, handle) = service(exchange.clone());
        *positions.0.lock().unwrap() = Some(OpenPosition {
            symbol: "BTC/USDT".to_string(),
            entry_price: 90.0,
            quantity: 2.0,
            opened_at: Utc::now(),
        });

        service.force_sell(100.0).await.unwrap();

        assert!(positions.0.lock().unwrap().is_none());
        assert!(handle.position().read().await.is_none());
        assert_eq!(
            exchange.orders.lock().unwrap().as_slice(),
            &[(OrderSide::Sell, 2.0)]
        );
    }

    #[tokio::test]
    async fn partial_sell_keeps_the_tracked_position() {
        let exchange = Arc::new(FixedExchange {
            price: 100.0,
            quote_free: 0.0,
            base_free: 2.0,
            orders: StdMutex::new(Vec::new()),
        });
        let (service, positions, _handle) = service(exchange.clone());
        *positions.0.lock().unwrap() = Some(OpenPosition {
            symbol: "BTC/USDT".to_string(),
            entry_price: 90.0,
            quantity: 2.0,
            opened_at: Utc::now(),
        });

        let fill = service.force_sell(50.0).await.unwrap();
        assert_eq!(fill.filled_quantity, 1.0);
        assert!(positions.0.lock().unwrap().is_some());
    }

    #[tokio::test]
    async fn out_of_range_percentage_is_rejected() {
        let exchange = Arc::new(FixedExchange {
            price: 100.0,
            quote_free: 1000.0,
            base_free: 1.0,
            orders: StdMutex::new(Vec::new()),
        });
        let (service, _positions, _handle) = service(exchange.clone());

        assert!(matches!(
            service.force_buy(0.0).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            service.force_sell(150.0).await,
            Err(Error::Validation(_))
        ));
        assert!(exchange.orders.lock().unwrap().is_empty());
    }
}
