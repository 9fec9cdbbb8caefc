pub mod config;
pub mod error;
pub mod exchange;
pub mod stores;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use exchange::ExchangeClient;
pub use stores::{ConfigStore, Notifier, PositionStore, TradeLogStore};
pub use types::*;
