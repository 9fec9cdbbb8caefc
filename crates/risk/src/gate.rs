use serde::{Deserialize, Serialize};

use common::BotConfig;

/// Why the risk gate forced a position closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "Stop Loss"),
            ExitReason::TakeProfit => write!(f, "Take Profit"),
        }
    }
}

/// Evaluate the stop-loss / take-profit thresholds for an open position.
///
/// The tick engine runs this before consulting the strategy, so risk limits
/// always take precedence over strategy-driven exits. Stop-loss is checked
/// first; a price that somehow satisfies both thresholds exits as StopLoss.
/// A threshold of zero (or negative) disables that check.
pub fn check_exit(config: &BotConfig, entry_price: f64, current_price: f64) -> Option<ExitReason> {
    if config.stop_loss_percentage > 0.0
        && current_price <= entry_price * (1.0 - config.stop_loss_percentage / 100.0)
    {
        return Some(ExitReason::StopLoss);
    }
    if config.take_profit_percentage > 0.0
        && current_price >= entry_price * (1.0 + config.take_profit_percentage / 100.0)
    {
        return Some(ExitReason::TakeProfit);
    }
    None
}
