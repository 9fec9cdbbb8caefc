use tracing::{info, warn};

use common::{BotConfig, Result};

use crate::{MacdStrategy, RsiStrategy, Strategy, SupportResistanceStrategy};

/// The fixed set of strategy variants, resolved from the configured name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Rsi,
    Macd,
    SupportResistance,
}

impl StrategyKind {
    /// Resolve a configured strategy name. "SR" is accepted as an alias for
    /// "SupportResistance". Unknown names return `None`; callers default to
    /// RSI rather than failing.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "RSI" => Some(StrategyKind::Rsi),
            "MACD" => Some(StrategyKind::Macd),
            "SR" | "SupportResistance" => Some(StrategyKind::SupportResistance),
            _ => None,
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::Rsi => write!(f, "RSI"),
            StrategyKind::Macd => write!(f, "MACD"),
            StrategyKind::SupportResistance => write!(f, "SupportResistance"),
        }
    }
}

/// Factory over the fixed variant set.
pub fn build_strategy(kind: StrategyKind) -> Box<dyn Strategy> {
    match kind {
        StrategyKind::Rsi => Box::new(RsiStrategy::new()),
        StrategyKind::Macd => Box::new(MacdStrategy::new()),
        StrategyKind::SupportResistance => Box::new(SupportResistanceStrategy::new()),
    }
}

/// Resolve a name to a kind, defaulting to RSI with a warning on typos.
/// A configuration mistake must never take the engine down.
fn resolve(name: &str) -> StrategyKind {
    StrategyKind::parse(name).unwrap_or_else(|| {
        warn!(name, "Unknown strategy name, defaulting to RSI");
        StrategyKind::Rsi
    })
}

/// Owns the currently active strategy instance. Swaps the implementation
/// when the configured name changes and always re-applies parameters, so a
/// parameter-only update takes effect without a name change.
pub struct StrategyManager {
    active: Box<dyn Strategy>,
    active_name: String,
}

impl StrategyManager {
    pub fn new(initial_config: &BotConfig) -> Result<Self> {
        let kind = resolve(&initial_config.strategy_name);
        let mut active = build_strategy(kind);
        active.update_params(initial_config)?;
        info!(strategy = %kind, "Strategy manager initialized");
        Ok(Self {
            active,
            active_name: initial_config.strategy_name.clone(),
        })
    }

    pub fn active(&self) -> &dyn Strategy {
        self.active.as_ref()
    }

    /// Apply a configuration change. On a name change the active instance
    /// is replaced through the factory; parameters are re-applied either
    /// way. A validation failure propagates and leaves the previous
    /// parameter set in place.
    pub fn update_active_strategy(&mut self, new_config: &BotConfig) -> Result<()> {
        if self.active_name != new_config.strategy_name {
            let kind = resolve(&new_config.strategy_name);
            info!(
                from = %self.active_name,
                to = %new_config.strategy_name,
                resolved = %kind,
                "Swapping active strategy"
            );
            self.active = build_strategy(kind);
            self.active_name = new_config.strategy_name.clone();
        }
        self.active.update_params(new_config)
    }
}
