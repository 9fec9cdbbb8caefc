use async_trait::async_trait;
use tracing::warn;

use common::{
    BotConfig, Candle, ExchangeClient, Result, SignalAction, SignalMetadata, StrategySignal,
};

use crate::indicators::{pivot_levels, sma};
use crate::manager::StrategyKind;
use crate::Strategy;

/// How close (in percent of the level) the price must be to a
/// support/resistance level to count as touching it.
const PROXIMITY_PERCENTAGE: f64 = 0.5;

/// SMA period used for the higher-timeframe trend filter.
const TREND_SMA_PERIOD: usize = 20;

/// Direction of the higher-timeframe trend: last close versus its SMA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trend {
    Up,
    Down,
    Flat,
}

/// Level-trading strategy: buy a bullish bounce off support, sell a bearish
/// rejection at resistance, and only when the higher-timeframe trend agrees.
/// Without trend confirmation a touched level still yields HOLD.
pub struct SupportResistanceStrategy {
    params: BotConfig,
}

impl SupportResistanceStrategy {
    pub fn new() -> Self {
        Self {
            params: BotConfig::default(),
        }
    }

    /// Trend on `mtf_timeframe`: last close above the 20-period SMA is UP,
    /// below is DOWN. `None` when the higher timeframe has too little data.
    async fn higher_timeframe_trend(
        &self,
        exchange: &dyn ExchangeClient,
        symbol: &str,
    ) -> Option<Trend> {
        let candles = exchange
            .fetch_candles(symbol, &self.params.mtf_timeframe, TREND_SMA_PERIOD * 2)
            .await
            .map_err(|e| {
                warn!(symbol, error = %e, "Higher-timeframe candle fetch failed");
            })
            .ok()?;

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let average = sma(&closes, TREND_SMA_PERIOD)?;
        let last = *closes.last()?;

        Some(if last > average {
            Trend::Up
        } else if last < average {
            Trend::Down
        } else {
            Trend::Flat
        })
    }

    fn near(price: f64, level: f64) -> bool {
        (price - level).abs() < level * (PROXIMITY_PERCENTAGE / 100.0)
    }

    fn bullish(candle: &Candle) -> bool {
        candle.close > candle.open
    }

    fn bearish(candle: &Candle) -> bool {
        candle.close < candle.open
    }
}

impl Default for SupportResistanceStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Strategy for SupportResistanceStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::SupportResistance
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
        let candles = match exchange
            .fetch_candles(symbol, &self.params.timeframe, self.params.sr_lookback_period)
            .await
        {
            Ok(candles) => candles,
            Err(e) => {
                warn!(symbol, error = %e, "S/R candle fetch failed");
                return StrategySignal::hold(0.0, format!("Error: {e}"));
            }
        };

        let levels = pivot_levels(&candles, self.params.sr_pivot_strength);
        if levels.is_empty() {
            return StrategySignal::hold(0.0, "No support/resistance levels found");
        }

        let Some(last_candle) = candles.last() else {
            return StrategySignal::hold(0.0, "No support/resistance levels found");
        };
        let price = last_candle.close;
        let trend = self.higher_timeframe_trend(exchange, symbol).await;

        // Bounce off support, confirmed by a bullish candle and an uptrend
        // on the higher timeframe.
        for &support in &levels.supports {
            if Self::near(price, support) && Self::bullish(last_candle) {
                if trend == Some(Trend::Up) {
                    return StrategySignal::new(
                        SignalAction::Buy,
                        0.8,
                        format!("Bounce from support at {support:.4} with uptrend confirmation"),
                        Some(SignalMetadata::SupportResistance { level: support }),
                    );
                }
                return StrategySignal::hold(
                    0.5,
                    format!("Support touched at {support:.4} but no uptrend confirmation"),
                );
            }
        }

        // Rejection at resistance, mirrored.
        for &resistance in &levels.resistances {
            if Self::near(price, resistance) && Self::bearish(last_candle) {
                if trend == Some(Trend::Down) {
                    return StrategySignal::new(
                        SignalAction::Sell,
                        0.8,
                        format!(
                            "Rejection from resistance at {resistance:.4} with downtrend confirmation"
                        ),
                        Some(SignalMetadata::SupportResistance { level: resistance }),
                    );
                }
                return StrategySignal::hold(
                    0.5,
                    format!("Resistance touched at {resistance:.4} but no downtrend confirmation"),
                );
            }
        }

        StrategySignal::hold(0.5, "Price is between support/resistance levels")
    }
}
