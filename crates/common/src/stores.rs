use async_trait::async_trait;

use crate::{BotConfig, OpenPosition, Result, TradeLogEntry};

/// Persistent bot configuration. A first read with no stored row must
/// synthesize `BotConfig::default()`.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn read_config(&self) -> Result<BotConfig>;
    async fn write_config(&self, config: &BotConfig) -> Result<()>;
}

/// Persistent mirror of the single open position. Every in-memory position
/// mutation writes here first, so a restart recovers the Holding state.
#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn read_position(&self) -> Result<Option<OpenPosition>>;
    async fn save_position(&self, position: &OpenPosition) -> Result<()>;
    async fn delete_position(&self) -> Result<()>;
}

/// Append-only trade history. Entries are never mutated or deleted; this
/// log is the sole input to the PnL reconciler.
#[async_trait]
pub trait TradeLogStore: Send + Sync {
    async fn append_entry(&self, entry: &TradeLogEntry) -> Result<()>;
    /// All entries, oldest first.
    async fn read_all(&self) -> Result<Vec<TradeLogEntry>>;
}

/// Best-effort operator notification sink. Implementations log failures
/// instead of returning them: a failed notification must never abort a
/// trade.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str);
}
