use async_trait::async_trait;
use tracing::warn;

use common::{
    BotConfig, ExchangeClient, Result, SignalAction, SignalMetadata, StrategySignal,
};

use crate::indicators;
use crate::manager::StrategyKind;
use crate::Strategy;

/// Mean-reversion strategy on the Relative Strength Index: buy when the
/// market is oversold, sell when it is overbought. Thresholds are
/// inclusive, so a reading exactly on a threshold triggers.
pub struct RsiStrategy {
    params: BotConfig,
}

impl RsiStrategy {
    pub fn new() -> Self {
        Self {
            params: BotConfig::default(),
        }
    }

    fn analyze(&self, value: f64) -> StrategySignal {
        let metadata = Some(SignalMetadata::Rsi { value });
        if value <= self.params.oversold_threshold {
            StrategySignal::new(
                SignalAction::Buy,
                0.75,
                format!("RSI oversold ({value:.2})"),
                metadata,
            )
        } else if value >= self.params.overbought_threshold {
            StrategySignal::new(
                SignalAction::Sell,
                0.75,
                format!("RSI overbought ({value:.2})"),
                metadata,
            )
        } else {
            StrategySignal::new(
                SignalAction::Hold,
                0.5,
                format!("RSI neutral ({value:.2})"),
                metadata,
            )
        }
    }
}

impl Default for RsiStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Strategy for RsiStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Rsi
    }

    fn update_params(&mut self, config: &BotConfig) -> Result<()> {
        config.validate()?;
        self.params = config.clone();
        Ok(())
    }

    async fn generate_signal(
        &self,
        exchange: &dyn ExchangeClient,
        symbol: &str,
    ) -> StrategySignal {
        let limit = self.params.rsi_period * 2;
        let candles = match exchange
            .fetch_candles(symbol, &self.params.timeframe, limit)
            .await
        {
            Ok(candles) => candles,
            Err(e) => {
                warn!(symbol, error = %e, "RSI candle fetch failed");
                return StrategySignal::hold(0.0, format!("Error: {e}"));
            }
        };

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        match indicators::rsi(&closes, self.params.rsi_period) {
            Some(value) => self.analyze(value),
            None => StrategySignal::hold(
                0.0,
                format!(
                    "Insufficient data for RSI: need {}, got {}",
                    self.params.rsi_period + 1,
                    closes.len()
                ),
            ),
        }
    }
}
