pub mod indicators;
pub mod macd;
pub mod manager;
pub mod rsi;
pub mod support_resistance;

pub use macd::MacdStrategy;
pub use manager::{build_strategy, StrategyKind, StrategyManager};
pub use rsi::RsiStrategy;
pub use support_resistance::SupportResistanceStrategy;

use async_trait::async_trait;

use common::{BotConfig, ExchangeClient, Result, StrategySignal};

/// All strategy implementations must satisfy this trait.
///
/// `update_params` fails fast on invalid parameters and leaves the previous
/// parameter set in place. `generate_signal` never fails: insufficient data
/// and exchange errors are recoverable conditions reported as HOLD with
/// confidence 0 and a descriptive reason.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Which fixed variant this instance is.
    fn kind(&self) -> StrategyKind;

    /// Validate and store the parameter set.
    fn update_params(&mut self, config: &BotConfig) -> Result<()>;

    /// Fetch enough history to satisfy the indicator lookback, compute the
    /// indicator, and return a fresh signal.
    async fn generate_signal(&self, exchange: &dyn ExchangeClient, symbol: &str)
        -> StrategySignal;
}
