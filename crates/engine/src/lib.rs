pub mod binance;
pub mod emergency;
pub mod store;
pub mod ticker;

pub use binance::BinanceClient;
pub use emergency::EmergencyService;
pub use store::{SqliteConfigStore, SqlitePositionStore, SqliteTradeLogStore};
pub use ticker::{EngineHandle, SharedPosition, TickDeps, TickEngine, DEFAULT_TICK_INTERVAL};
