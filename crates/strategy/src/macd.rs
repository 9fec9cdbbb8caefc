use async_trait::async_trait;
use tracing::warn;

use common::{
    BotConfig, ExchangeClient, Result, SignalAction, SignalMetadata, StrategySignal,
};

use crate::indicators::{macd_series, MacdPoint};
use crate::manager::StrategyKind;
use crate::Strategy;

/// Trend-following strategy on MACD line / signal line crossovers: buy on a
/// golden cross, sell on a death cross, otherwise hold.
pub struct MacdStrategy {
    params: BotConfig,
}

impl MacdStrategy {
    pub fn new() -> Self {
        Self {
            params: BotConfig::default(),
        }
    }
}

impl Default for MacdStrategy {
    fn default() -> Self {
        Self::new()
    }
}

/// Crossover decision over the two most recent MACD points. A golden cross
/// requires the MACD line to move from below the signal line to above it;
/// a death cross is the inverse.
pub fn crossover(previous: MacdPoint, last: MacdPoint) -> SignalAction {
    if previous.macd < previous.signal && last.macd > last.signal {
        SignalAction::Buy
    } else if previous.macd > previous.signal && last.macd < last.signal {
        SignalAction::Sell
    } else {
        SignalAction::Hold
    }
}

#[async_trait]
impl Strategy for MacdStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Macd
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
        let limit = self.params.macd_slow_period * 2;
        let candles = match exchange
            .fetch_candles(symbol, &self.params.timeframe, limit)
            .await
        {
            Ok(candles) => candles,
            Err(e) => {
                warn!(symbol, error = %e, "MACD candle fetch failed");
                return StrategySignal::hold(0.0, format!("Error: {e}"));
            }
        };

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let series = macd_series(
            &closes,
            self.params.macd_fast_period,
            self.params.macd_slow_period,
            self.params.macd_signal_period,
        );
        if series.len() < 2 {
            return StrategySignal::hold(0.0, "Insufficient data for MACD calculation");
        }

        let previous = series[series.len() - 2];
        let last = series[series.len() - 1];
        let metadata = Some(SignalMetadata::Macd {
            macd: last.macd,
            signal: last.signal,
        });

        match crossover(previous, last) {
            SignalAction::Buy => {
                StrategySignal::new(SignalAction::Buy, 0.75, "MACD golden cross", metadata)
            }
            SignalAction::Sell => {
                StrategySignal::new(SignalAction::Sell, 0.75, "MACD death cross", metadata)
            }
            SignalAction::Hold => {
                StrategySignal::new(SignalAction::Hold, 0.5, "No MACD crossover", metadata)
            }
        }
    }
}
