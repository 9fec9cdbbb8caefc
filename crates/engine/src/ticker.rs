//! The tick engine: a single task that evaluates the market on a fixed
//! interval and drives the Idle / Holding position state machine.
//!
//! Ticks are strictly serialized. The loop multiplexes the interval timer
//! with a command channel, so start/stop requests and ticks can never
//! interleave mid-evaluation. Position mutations always hit the store
//! before in-memory state, which makes a crash recoverable on restart.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use common::{
    ConfigStore, EngineCommand, EngineStatus, Error, ExchangeClient, Notifier, OpenPosition,
    OrderSide, PositionStore, Result, SignalAction, TradeLogEntry, TradeLogStore,
};
use strategy::StrategyManager;

/// Tick cadence used when TICK_INTERVAL_SECS is not set.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(15);

/// Buys are skipped below this free quote balance; the exchange would
/// reject the order anyway.
const MIN_QUOTE_BALANCE: f64 = 10.0;

/// Unrealized-PnL notifications are emitted every N holding ticks.
const MONITOR_EVERY_TICKS: u64 = 4;

/// In-memory mirror of the single open position, shared with the operator
/// surfaces for status queries.
pub type SharedPosition = Arc<RwLock<Option<OpenPosition>>>;

/// Everything the engine needs injected.
pub struct TickDeps {
    pub exchange: Arc<dyn ExchangeClient>,
    pub config_store: Arc<dyn ConfigStore>,
    pub position_store: Arc<dyn PositionStore>,
    pub trade_log: Arc<dyn TradeLogStore>,
    pub notifier: Arc<dyn Notifier>,
    pub strategy_manager: Arc<Mutex<StrategyManager>>,
}

/// Cloneable handle for controlling and inspecting a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    command_tx: mpsc::Sender<EngineCommand>,
    running: Arc<RwLock<bool>>,
    position: SharedPosition,
    tick_interval: Duration,
    trade_lock: Arc<Mutex<()>>,
}

impl EngineHandle {
    pub async fn send(&self, command: EngineCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| Error::Other("Engine command channel closed".to_string()))
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    pub fn position(&self) -> SharedPosition {
        self.position.clone()
    }

    pub async fn status(&self) -> EngineStatus {
        EngineStatus {
            is_running: *self.running.read().await,
            tick_interval_secs: self.tick_interval.as_secs(),
            open_position: self.position.read().await.clone(),
        }
    }

    /// The lock serializing trade execution. A tick holds it for the whole
    /// evaluation; emergency operations hold it for the whole order, so the
    /// two can never act on the position concurrently.
    pub(crate) fn trade_lock(&self) -> Arc<Mutex<()>> {
        self.trade_lock.clone()
    }
}

pub struct TickEngine {
    deps: TickDeps,
    position: SharedPosition,
    running: Arc<RwLock<bool>>,
    command_rx: mpsc::Receiver<EngineCommand>,
    tick_interval: Duration,
    ticks_since_monitor: u64,
    trade_lock: Arc<Mutex<()>>,
}

impl TickEngine {
    pub fn new(deps: TickDeps, tick_interval: Duration) -> (Self, EngineHandle) {
        let (command_tx, command_rx) = mpsc::channel(16);
        let position: SharedPosition = Arc::new(RwLock::new(None));
        let running = Arc::new(RwLock::new(false));
        let trade_lock = Arc::new(Mutex::new(()));

        let handle = EngineHandle {
            command_tx,
            running: running.clone(),
            position: position.clone(),
            tick_interval,
            trade_lock: trade_lock.clone(),
        };
        let engine = Self {
            deps,
            position,
            running,
            command_rx,
            tick_interval,
            ticks_since_monitor: 0,
            trade_lock,
        };
        (engine, handle)
    }

    /// Load the persisted position into memory. Called once before the
    /// loop starts so a restart resumes in the Holding state.
    pub async fn sync_position_state(&self) -> Result<()> {
        let stored = self.deps.position_store.read_position().await?;
        if let Some(ref position) = stored {
            info!(
                symbol = %position.symbol,
                entry_price = position.entry_price,
                quantity = position.quantity,
                "Resuming with an open position"
            );
        }
        *self.position.write().await = stored;
        Ok(())
    }

    /// Run until the command channel closes. Ticks only fire while the
    /// engine has been started.
    pub async fn run(mut self) {
        if let Err(e) = self.sync_position_state().await {
            error!(error = %e, "Failed to load the persisted position");
        }

        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(EngineCommand::Start) => {
                        if *self.running.read().await {
                            debug!("Start requested but the engine is already running");
                            continue;
                        }
                        info!(interval_secs = self.tick_interval.as_secs(), "Engine started");
                        *self.running.write().await = true;
                        self.tick_and_report().await;
                        interval.reset();
                    }
                    Some(EngineCommand::Stop) => {
                        info!("Engine stopped");
                        *self.running.write().await = false;
                    }
                    None => {
                        info!("Command channel closed, shutting down the engine");
                        break;
                    }
                },
                _ = interval.tick() => {
                    if *self.running.read().await {
                        self.tick_and_report().await;
                    }
                }
            }
        }
    }

    /// A tick failure is reported and swallowed; the next tick runs on
    /// schedule regardless. The trade lock is held for the whole tick, so
    /// an emergency operation can never interleave with an in-flight
    /// evaluation.
    async fn tick_and_report(&mut self) {
        let lock = self.trade_lock.clone();
        let _guard = lock.lock().await;
        if let Err(e) = self.run_tick().await {
            error!(error = %e, "Tick failed");
            self.deps
                .notifier
                .send(&format!("⚠️ Tick failed: {e}"))
                .await;
        }
    }

    /// One full evaluation: refresh the strategy from configuration, then
    /// branch on whether a position is held.
    async fn run_tick(&mut self) -> Result<()> {
        let config = self.deps.config_store.read_config().await?;
        if config.trading_symbol.is_empty() {
            warn!("No trading symbol configured, skipping tick");
            return Ok(());
        }

        {
            let mut manager = self.deps.strategy_manager.lock().await;
            if let Err(e) = manager.update_active_strategy(&config) {
                warn!(error = %e, "Invalid strategy parameters, keeping the previous set");
            }
        }

        let held = self.position.read().await.clone();
        match held {
            Some(position) => self.tick_holding(&config, &position).await,
            None => self.tick_idle(&config).await,
        }
    }

    /// Holding branch. Exit checks run in a fixed order: stop-loss, then
    /// take-profit, then a strategy SELL. The first hit wins the tick.
    async fn tick_holding(
        &mut self,
        config: &common::BotConfig,
        position: &OpenPosition,
    ) -> Result<()> {
        let price = self.deps.exchange.current_price(&position.symbol).await?;

        if let Some(reason) = risk::check_exit(config, position.entry_price, price) {
            info!(%reason, price, entry = position.entry_price, "Risk exit triggered");
            return self.close_position(position, price, reason.to_string()).await;
        }

        let signal = {
            let manager = self.deps.strategy_manager.lock().await;
            manager
                .active()
                .generate_signal(self.deps.exchange.as_ref(), &position.symbol)
                .await
        };
        debug!(action = %signal.action, reason = %signal.reason, "Signal while holding");

        if signal.action == SignalAction::Sell {
            return self.close_position(position, price, signal.reason).await;
        }

        self.ticks_since_monitor += 1;
        if config.is_monitoring_enabled && self.ticks_since_monitor >= MONITOR_EVERY_TICKS {
            self.ticks_since_monitor = 0;
            let pnl_pct = (price - position.entry_price) / position.entry_price * 100.0;
            self.deps
                .notifier
                .send(&format!(
                    "📊 {} position: entry {:.4}, price {:.4}, unrealized PnL {:+.2}%",
                    position.symbol, position.entry_price, price, pnl_pct
                ))
                .await;
        }
        Ok(())
    }

    /// Idle branch: act only on a BUY signal, sized as a percentage of the
    /// free quote balance.
    async fn tick_idle(&mut self, config: &common::BotConfig) -> Result<()> {
        let signal = {
            let manager = self.deps.strategy_manager.lock().await;
            manager
                .active()
                .generate_signal(self.deps.exchange.as_ref(), &config.trading_symbol)
                .await
        };
        debug!(action = %signal.action, reason = %signal.reason, "Signal while idle");

        if signal.action != SignalAction::Buy {
            return Ok(());
        }

        let balance = self.deps.exchange.free_balance(config.quote_asset()).await?;
        if balance.free < MIN_QUOTE_BALANCE {
            warn!(
                free = balance.free,
                asset = config.quote_asset(),
                "Free balance too low to open a position"
            );
            return Ok(());
        }

        let spend = balance.free * config.order_percentage / 100.0;
        let price = self
            .deps
            .exchange
            .current_price(&config.trading_symbol)
            .await?;

        let fill = self
            .deps
            .exchange
            .place_market_order(&config.trading_symbol, OrderSide::Buy, spend, price)
            .await?;

        if fill.filled_quantity <= 0.0 {
            error!(spend, "Buy order reported a zero fill, no position opened");
            return Ok(());
        }

        let position = OpenPosition {
            symbol: fill.symbol.clone(),
            entry_price: fill.average_price,
            quantity: fill.filled_quantity,
            opened_at: fill.timestamp,
        };
        // Store first, memory second.
        self.deps.position_store.save_position(&position).await?;
        *self.position.write().await = Some(position.clone());

        self.deps
            .trade_log
            .append_entry(&TradeLogEntry::from_fill(&fill, signal.reason.clone()))
            .await?;

        info!(
            symbol = %position.symbol,
            entry_price = position.entry_price,
            quantity = position.quantity,
            reason = %signal.reason,
            "Position opened"
        );
        self.deps
            .notifier
            .send(&format!(
                "🟢 Bought {:.6} {} at {:.4} ({})",
                position.quantity, position.symbol, position.entry_price, signal.reason
            ))
            .await;
        Ok(())
    }

    /// Liquidate the full position at market and record the trade.
    async fn close_position(
        &mut self,
        position: &OpenPosition,
        reference_price: f64,
        reason: String,
    ) -> Result<()> {
        let fill = self
            .deps
            .exchange
            .place_market_order(
                &position.symbol,
                OrderSide::Sell,
                position.quantity,
                reference_price,
            )
            .await?;

        self.deps.position_store.delete_position().await?;
        *self.position.write().await = None;
        self.ticks_since_monitor = 0;

        self.deps
            .trade_log
            .append_entry(&TradeLogEntry::from_fill(&fill, reason.clone()))
            .await?;

        let pnl_pct = (fill.average_price - position.entry_price) / position.entry_price * 100.0;
        info!(
            symbol = %position.symbol,
            exit_price = fill.average_price,
            pnl_pct,
            reason = %reason,
            "Position closed"
        );
        self.deps
            .notifier
            .send(&format!(
                "🔴 Sold {:.6} {} at {:.4} ({}) PnL {:+.2}%",
                fill.filled_quantity, position.symbol, fill.average_price, reason, pnl_pct
            ))
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use tokio::sync::{Notify, Semaphore};

    use common::{Balance, BotConfig, Candle, OrderFill};

    use crate::emergency::EmergencyService;

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

    struct RecordingNotifier(StdMutex<Vec<String>>);

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, text: &str) {
            self.0.lock().unwrap().push(text.to_string());
        }
    }

    /// Suspends `current_price` callers until permits are released, and
    /// signals when the first caller arrives.
    struct PriceGate {
        entered: Notify,
        release: Semaphore,
    }

    impl PriceGate {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                entered: Notify::new(),
                release: Semaphore::new(0),
            })
        }
    }

    /// Exchange stub with a fixed price, canned candles, and recorded
    /// orders. Buys fill at the current price unless `zero_fill_buys`.
    struct ScriptedExchange {
        candles: Vec<Candle>,
        price: f64,
        quote_free: f64,
        base_free: f64,
        zero_fill_buys: bool,
        fail_price: bool,
        price_gate: Option<Arc<PriceGate>>,
        orders: StdMutex<Vec<(OrderSide, f64)>>,
    }

    impl ScriptedExchange {
        fn new(candles: Vec<Candle>, price: f64) -> Self {
            Self {
                candles,
                price,
                quote_free: 1000.0,
                base_free: 1.0,
                zero_fill_buys: false,
                fail_price: false,
                price_gate: None,
                orders: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ExchangeClient for ScriptedExchange {
        async fn fetch_candles(
            &self,
            _symbol: &str,
            _timeframe: &str,
            limit: usize,
        ) -> Result<Vec<Candle>> {
            let start = self.candles.len().saturating_sub(limit);
            Ok(self.candles[start..].to_vec())
        }

        async fn current_price(&self, _symbol: &str) -> Result<f64> {
            if self.fail_price {
                return Err(Error::Exchange("ticker unavailable".into()));
            }
            if let Some(gate) = &self.price_gate {
                gate.entered.notify_one();
                let permit = gate
                    .release
                    .acquire()
                    .await
                    .map_err(|_| Error::Exchange("gate closed".into()))?;
                permit.forget();
            }
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
                OrderSide::Buy if self.zero_fill_buys => 0.0,
                OrderSide::Buy => amount / reference_price,
                OrderSide::Sell => amount,
            };
            Ok(OrderFill {
                symbol: symbol.to_string(),
                side,
                filled_quantity,
                average_price: reference_price,
                fee: 0.1,
                timestamp: Utc::now(),
            })
        }
    }

    fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| {
                let open = if i == 0 { close } else { closes[i - 1] };
                Candle {
                    timestamp: t0 + ChronoDuration::hours(i as i64),
                    open,
                    high: open.max(close),
                    low: open.min(close),
                    close,
                    volume: 1.0,
                }
            })
            .collect()
    }

    /// 30 falling closes: RSI 0, a BUY under the default RSI strategy.
    fn falling_closes() -> Vec<f64> {
        (0..30).map(|i| 200.0 - i as f64).collect()
    }

    /// 30 rising closes: RSI 100, a SELL under the default RSI strategy.
    fn rising_closes() -> Vec<f64> {
        (0..30).map(|i| 100.0 + i as f64).collect()
    }

    struct Harness {
        engine: TickEngine,
        handle: EngineHandle,
        config: Arc<MemConfigStore>,
        positions: Arc<MemPositionStore>,
        trade_log: Arc<MemTradeLog>,
        notifier: Arc<RecordingNotifier>,
        exchange: Arc<ScriptedExchange>,
    }

    fn harness(config: BotConfig, exchange: ScriptedExchange) -> Harness {
        let config_store = Arc::new(MemConfigStore(StdMutex::new(config.clone())));
        let positions = Arc::new(MemPositionStore(StdMutex::new(None)));
        let trade_log = Arc::new(MemTradeLog(StdMutex::new(Vec::new())));
        let notifier = Arc::new(RecordingNotifier(StdMutex::new(Vec::new())));
        let exchange = Arc::new(exchange);
        let manager = StrategyManager::new(&config).unwrap();

        let deps = TickDeps {
            exchange: exchange.clone(),
            config_store: config_store.clone(),
            position_store: positions.clone(),
            trade_log: trade_log.clone(),
            notifier: notifier.clone(),
            strategy_manager: Arc::new(Mutex::new(manager)),
        };
        let (engine, handle) = TickEngine::new(deps, DEFAULT_TICK_INTERVAL);
        Harness {
            engine,
            handle,
            config: config_store,
            positions,
            trade_log,
            notifier,
            exchange,
        }
    }

    fn held_position(entry_price: f64) -> OpenPosition {
        OpenPosition {
            symbol: "BTC/USDT".to_string(),
            entry_price,
            quantity: 2.0,
            opened_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn resumed_position_exits_on_stop_loss() {
        let config = BotConfig {
            stop_loss_percentage: 5.0,
            ..BotConfig::default()
        };
        // Price 94 is below the 95.0 stop level for a 100.0 entry.
        let mut h = harness(config, ScriptedExchange::new(rising_closes_candles(), 94.0));
        *h.positions.0.lock().unwrap() = Some(held_position(100.0));

        h.engine.sync_position_state().await.unwrap();
        assert!(h.engine.position.read().await.is_some());

        h.engine.run_tick().await.unwrap();

        assert!(h.engine.position.read().await.is_none());
        assert!(h.positions.0.lock().unwrap().is_none());
        let log = h.trade_log.0.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action, OrderSide::Sell);
        assert_eq!(log[0].reason, "Stop Loss");
        assert_eq!(log[0].quantity, 2.0);
        let orders = h.exchange.orders.lock().unwrap();
        assert_eq!(orders.as_slice(), &[(OrderSide::Sell, 2.0)]);
    }

    fn rising_closes_candles() -> Vec<Candle> {
        candles_from_closes(&rising_closes())
    }

    #[tokio::test]
    async fn strategy_sell_closes_the_position() {
        // Defaults leave stop-loss and take-profit disabled; the overbought
        // RSI reading is what closes the position.
        let mut h = harness(
            BotConfig::default(),
            ScriptedExchange::new(rising_closes_candles(), 129.0),
        );
        *h.positions.0.lock().unwrap() = Some(held_position(100.0));
        h.engine.sync_position_state().await.unwrap();

        h.engine.run_tick().await.unwrap();

        assert!(h.engine.position.read().await.is_none());
        let log = h.trade_log.0.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action, OrderSide::Sell);
        assert_ne!(log[0].reason, "Stop Loss");
        assert_ne!(log[0].reason, "Take Profit");
    }

    #[tokio::test]
    async fn buy_signal_opens_a_position_from_the_fill() {
        let mut h = harness(
            BotConfig::default(),
            ScriptedExchange::new(candles_from_closes(&falling_closes()), 100.0),
        );

        h.engine.run_tick().await.unwrap();

        // 50% of the 1000 free quote at price 100 fills 5 units.
        let position = h.engine.position.read().await.clone().unwrap();
        assert_eq!(position.entry_price, 100.0);
        assert_eq!(position.quantity, 5.0);
        assert!(h.positions.0.lock().unwrap().is_some());
        let log = h.trade_log.0.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action, OrderSide::Buy);
        let orders = h.exchange.orders.lock().unwrap();
        assert_eq!(orders.as_slice(), &[(OrderSide::Buy, 500.0)]);
    }

    #[tokio::test]
    async fn zero_fill_buy_opens_nothing() {
        let mut exchange = ScriptedExchange::new(candles_from_closes(&falling_closes()), 100.0);
        exchange.zero_fill_buys = true;
        let mut h = harness(BotConfig::default(), exchange);

        h.engine.run_tick().await.unwrap();

        assert!(h.engine.position.read().await.is_none());
        assert!(h.positions.0.lock().unwrap().is_none());
        assert!(h.trade_log.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_symbol_skips_the_tick() {
        let config = BotConfig {
            trading_symbol: String::new(),
            ..BotConfig::default()
        };
        let mut h = harness(config, ScriptedExchange::new(Vec::new(), 100.0));
        // read_config must not see the default symbol restored
        assert!(h.config.read_config().await.unwrap().trading_symbol.is_empty());

        h.engine.run_tick().await.unwrap();

        assert!(h.exchange.orders.lock().unwrap().is_empty());
        assert!(h.trade_log.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn insufficient_quote_balance_skips_the_buy() {
        let mut exchange = ScriptedExchange::new(candles_from_closes(&falling_closes()), 100.0);
        exchange.quote_free = 5.0;
        let mut h = harness(BotConfig::default(), exchange);

        h.engine.run_tick().await.unwrap();

        assert!(h.engine.position.read().await.is_none());
        assert!(h.exchange.orders.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn monitoring_notifies_on_the_fourth_holding_tick() {
        let config = BotConfig {
            is_monitoring_enabled: true,
            ..BotConfig::default()
        };
        // Too few candles for RSI keeps the strategy on HOLD.
        let mut h = harness(
            config,
            ScriptedExchange::new(candles_from_closes(&[100.0, 101.0]), 110.0),
        );
        *h.positions.0.lock().unwrap() = Some(held_position(100.0));
        h.engine.sync_position_state().await.unwrap();

        for _ in 0..3 {
            h.engine.run_tick().await.unwrap();
        }
        assert!(h.notifier.0.lock().unwrap().is_empty());

        h.engine.run_tick().await.unwrap();
        let messages = h.notifier.0.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("+10.00%"), "message: {}", messages[0]);
    }

    #[tokio::test]
    async fn tick_failure_is_reported_through_the_notifier() {
        let mut exchange = ScriptedExchange::new(Vec::new(), 100.0);
        exchange.fail_price = true;
        let mut h = harness(BotConfig::default(), exchange);
        *h.positions.0.lock().unwrap() = Some(held_position(100.0));
        h.engine.sync_position_state().await.unwrap();

        h.engine.tick_and_report().await;

        let messages = h.notifier.0.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("Tick failed"));
        // The position survives a failed tick.
        assert!(h.engine.position.read().await.is_some());
    }

    #[tokio::test]
    async fn emergency_sell_waits_for_the_in_flight_tick() {
        let gate = PriceGate::new();
        let mut exchange = ScriptedExchange::new(Vec::new(), 94.0);
        exchange.base_free = 3.0;
        exchange.price_gate = Some(gate.clone());
        let config = BotConfig {
            stop_loss_percentage: 5.0,
            ..BotConfig::default()
        };
        let mut h = harness(config, exchange);
        *h.positions.0.lock().unwrap() = Some(held_position(100.0));
        h.engine.sync_position_state().await.unwrap();

        let emergency = EmergencyService::new(
            h.exchange.clone(),
            h.config.clone(),
            h.positions.clone(),
            h.notifier.clone(),
            h.handle.clone(),
        );

        // The tick suspends inside the price fetch with the stop-loss
        // about to fire on its 2.0-unit position.
        let mut engine = h.engine;
        let tick = tokio::spawn(async move {
            engine.tick_and_report().await;
            engine
        });
        gate.entered.notified().await;

        let sell = tokio::spawn(async move { emergency.force_sell(100.0).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        // The tick still holds the trade lock: the emergency sell must not
        // have reached the exchange, or it would liquidate a position the
        // resumed tick is about to sell again.
        assert!(h.exchange.orders.lock().unwrap().is_empty());
        assert!(!sell.is_finished());

        gate.release.add_permits(2);
        let engine = tick.await.unwrap();
        let fill = sell.await.unwrap().unwrap();

        // Tick first (stop-loss on the 2.0 position), emergency after
        // (full 3.0 base balance). Never both against the same position.
        assert_eq!(
            h.exchange.orders.lock().unwrap().as_slice(),
            &[(OrderSide::Sell, 2.0), (OrderSide::Sell, 3.0)]
        );
        assert_eq!(fill.filled_quantity, 3.0);
        assert!(engine.position.read().await.is_none());
        let log = h.trade_log.0.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].reason, "Stop Loss");
    }
}
