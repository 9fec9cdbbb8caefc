use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV candle fetched from the exchange, immutable once fetched.
/// Sequences are always ordered oldest first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Side of an order or trade-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Action recommended by a strategy on one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl std::fmt::Display for SignalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalAction::Buy => write!(f, "BUY"),
            SignalAction::Sell => write!(f, "SELL"),
            SignalAction::Hold => write!(f, "HOLD"),
        }
    }
}

/// Indicator values attached to a signal, keyed by the strategy that
/// produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum SignalMetadata {
    Rsi { value: f64 },
    Macd { macd: f64, signal: f64 },
    SupportResistance { level: f64 },
}

/// Output of a strategy evaluation. Produced fresh on every tick and
/// never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategySignal {
    pub action: SignalAction,
    /// Confidence in [0, 1].
    pub confidence: f64,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<SignalMetadata>,
    pub order_amount: f64,
}

impl StrategySignal {
    pub fn new(
        action: SignalAction,
        confidence: f64,
        reason: impl Into<String>,
        metadata: Option<SignalMetadata>,
    ) -> Self {
        Self {
            action,
            confidence,
            reason: reason.into(),
            timestamp: Utc::now(),
            metadata,
            order_amount: 0.0,
        }
    }

    /// A HOLD signal. Used both for neutral readings and for recoverable
    /// failures (insufficient data, exchange errors) with confidence 0.
    pub fn hold(confidence: f64, reason: impl Into<String>) -> Self {
        Self::new(SignalAction::Hold, confidence, reason, None)
    }
}

/// All user-tunable bot parameters. Persisted in the configuration store,
/// read once per tick, mutated only through an explicit update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BotConfig {
    /// Trading pair in `BASE/QUOTE` form, e.g. "BTC/USDT".
    pub trading_symbol: String,
    /// Name of the active strategy: "RSI", "MACD", "SR" / "SupportResistance".
    pub strategy_name: String,
    pub timeframe: String,
    // RSI
    pub rsi_period: usize,
    pub overbought_threshold: f64,
    pub oversold_threshold: f64,
    // MACD
    pub macd_fast_period: usize,
    pub macd_slow_period: usize,
    pub macd_signal_period: usize,
    // Support/Resistance
    pub sr_lookback_period: usize,
    pub sr_pivot_strength: usize,
    /// Higher timeframe used for trend confirmation, e.g. "4h".
    pub mtf_timeframe: String,
    // Risk management
    /// Stop-loss distance below entry, in percent. 0 disables the check.
    pub stop_loss_percentage: f64,
    /// Take-profit distance above entry, in percent. 0 disables the check.
    pub take_profit_percentage: f64,
    /// Fraction of the free quote balance to spend per buy, in percent.
    pub order_percentage: f64,
    /// Emit unrealized-PnL notifications while a position is held.
    pub is_monitoring_enabled: bool,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            trading_symbol: "BTC/USDT".to_string(),
            strategy_name: "RSI".to_string(),
            timeframe: "1h".to_string(),
            rsi_period: 14,
            overbought_threshold: 70.0,
            oversold_threshold: 30.0,
            macd_fast_period: 12,
            macd_slow_period: 26,
            macd_signal_period: 9,
            sr_lookback_period: 100,
            sr_pivot_strength: 5,
            mtf_timeframe: "4h".to_string(),
            stop_loss_percentage: 0.0,
            take_profit_percentage: 0.0,
            order_percentage: 50.0,
            is_monitoring_enabled: false,
        }
    }
}

impl BotConfig {
    /// Validate the parameter invariants. Called before any configuration
    /// write and by every strategy's `update_params`, so a bad update never
    /// reaches persistent state.
    pub fn validate(&self) -> crate::Result<()> {
        if self.rsi_period < 2 {
            return Err(crate::Error::Validation(
                "RSI period must be at least 2".to_string(),
            ));
        }
        if self.macd_fast_period >= self.macd_slow_period {
            return Err(crate::Error::Validation(
                "MACD fast period must be less than slow period".to_string(),
            ));
        }
        Ok(())
    }

    /// Base asset of the trading symbol ("BTC" for "BTC/USDT").
    pub fn base_asset(&self) -> &str {
        self.trading_symbol
            .split_once('/')
            .map(|(base, _)| base)
            .unwrap_or(&self.trading_symbol)
    }

    /// Quote asset of the trading symbol ("USDT" for "BTC/USDT").
    pub fn quote_asset(&self) -> &str {
        self.trading_symbol
            .split_once('/')
            .map(|(_, quote)| quote)
            .unwrap_or("")
    }
}

/// Strip the slash from a `BASE/QUOTE` symbol for exchange REST paths.
pub fn exchange_symbol(symbol: &str) -> String {
    symbol.replace('/', "")
}

/// The single open position. At most one exists system-wide; it is owned by
/// the tick engine in memory and mirrored to the position store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPosition {
    pub symbol: String,
    pub entry_price: f64,
    pub quantity: f64,
    pub opened_at: DateTime<Utc>,
}

/// One append-only trade history record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeLogEntry {
    pub id: String,
    pub symbol: String,
    pub action: OrderSide,
    pub reason: String,
    pub price: f64,
    pub quantity: f64,
    pub fee: f64,
    pub timestamp: DateTime<Utc>,
}

impl TradeLogEntry {
    pub fn from_fill(fill: &OrderFill, reason: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: fill.symbol.clone(),
            action: fill.side,
            reason: reason.into(),
            price: fill.average_price,
            quantity: fill.filled_quantity,
            fee: fill.fee,
            timestamp: fill.timestamp,
        }
    }
}

/// Balance of a single asset on the exchange.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Balance {
    pub free: f64,
    pub used: f64,
    pub total: f64,
}

/// Result of a market order as reported by the exchange. The engine always
/// transitions on `filled_quantity` / `average_price`, never on the
/// requested amount.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFill {
    pub symbol: String,
    pub side: OrderSide,
    pub filled_quantity: f64,
    pub average_price: f64,
    pub fee: f64,
    pub timestamp: DateTime<Utc>,
}

/// Whether the bot is running against the real exchange or simulating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Live,
    Paper,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Live => write!(f, "live"),
            TradingMode::Paper => write!(f, "paper"),
        }
    }
}

/// Commands accepted by the tick engine's command channel.
#[derive(Debug, Clone, Copy)]
pub enum EngineCommand {
    Start,
    Stop,
}

/// Snapshot of the engine returned by status queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub is_running: bool,
    pub tick_interval_secs: u64,
    pub open_position: Option<OpenPosition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(BotConfig::default().validate().is_ok());
    }

    #[test]
    fn rsi_period_below_two_is_rejected() {
        let cfg = BotConfig {
            rsi_period: 1,
            ..BotConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(crate::Error::Validation(_))));
    }

    #[test]
    fn macd_fast_must_be_less_than_slow() {
        let cfg = BotConfig {
            macd_fast_period: 26,
            macd_slow_period: 26,
            ..BotConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(crate::Error::Validation(_))));
    }

    #[test]
    fn symbol_splits_into_base_and_quote() {
        let cfg = BotConfig::default();
        assert_eq!(cfg.base_asset(), "BTC");
        assert_eq!(cfg.quote_asset(), "USDT");
        assert_eq!(exchange_symbol(&cfg.trading_symbol), "BTCUSDT");
    }
}
