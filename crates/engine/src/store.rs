//! SQLite implementations of the persistence collaborators.
//!
//! Configuration and the open position are single-row tables keyed by a
//! static id; the trade log is append-only. Timestamps are stored as
//! RFC 3339 text in UTC.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{info, warn};

use common::{
    BotConfig, ConfigStore, Error, OpenPosition, OrderSide, PositionStore, Result, TradeLogEntry,
    TradeLogStore,
};

const CONFIG_ID: &str = "main_config";
const POSITION_ID: &str = "active_position";

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Other(format!("Invalid stored timestamp '{raw}': {e}")))
}

// ─── Configuration ────────────────────────────────────────────────────────────

pub struct SqliteConfigStore {
    pool: SqlitePool,
}

impl SqliteConfigStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ConfigRow {
    trading_symbol: String,
    strategy_name: String,
    timeframe: String,
    rsi_period: i64,
    overbought_threshold: f64,
    oversold_threshold: f64,
    macd_fast_period: i64,
    macd_slow_period: i64,
    macd_signal_period: i64,
    sr_lookback_period: i64,
    sr_pivot_strength: i64,
    mtf_timeframe: String,
    stop_loss_percentage: f64,
    take_profit_percentage: f64,
    order_percentage: f64,
    is_monitoring_enabled: bool,
}

impl From<ConfigRow> for BotConfig {
    fn from(row: ConfigRow) -> Self {
        BotConfig {
            trading_symbol: row.trading_symbol,
            strategy_name: row.strategy_name,
            timeframe: row.timeframe,
            rsi_period: row.rsi_period as usize,
            overbought_threshold: row.overbought_threshold,
            oversold_threshold: row.oversold_threshold,
            macd_fast_period: row.macd_fast_period as usize,
            macd_slow_period: row.macd_slow_period as usize,
            macd_signal_period: row.macd_signal_period as usize,
            sr_lookback_period: row.sr_lookback_period as usize,
            sr_pivot_strength: row.sr_pivot_strength as usize,
            mtf_timeframe: row.mtf_timeframe,
            stop_loss_percentage: row.stop_loss_percentage,
            take_profit_percentage: row.take_profit_percentage,
            order_percentage: row.order_percentage,
            is_monitoring_enabled: row.is_monitoring_enabled,
        }
    }
}

#[async_trait]
impl ConfigStore for SqliteConfigStore {
    async fn read_config(&self) -> Result<BotConfig> {
        let row: Option<ConfigRow> =
            sqlx::query_as("SELECT * FROM configuration WHERE id = ?1")
                .bind(CONFIG_ID)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(row) => Ok(row.into()),
            None => {
                warn!("No configuration found, creating with default values");
                let defaults = BotConfig::default();
                self.write_config(&defaults).await?;
                Ok(defaults)
            }
        }
    }

    async fn write_config(&self, config: &BotConfig) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO configuration (
                id, trading_symbol, strategy_name, timeframe,
                rsi_period, overbought_threshold, oversold_threshold,
                macd_fast_period, macd_slow_period, macd_signal_period,
                sr_lookback_period, sr_pivot_strength, mtf_timeframe,
                stop_loss_percentage, take_profit_percentage,
                order_percentage, is_monitoring_enabled
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            ON CONFLICT(id) DO UPDATE SET
                trading_symbol = excluded.trading_symbol,
                strategy_name = excluded.strategy_name,
                timeframe = excluded.timeframe,
                rsi_period = excluded.rsi_period,
                overbought_threshold = excluded.overbought_threshold,
                oversold_threshold = excluded.oversold_threshold,
                macd_fast_period = excluded.macd_fast_period,
                macd_slow_period = excluded.macd_slow_period,
                macd_signal_period = excluded.macd_signal_period,
                sr_lookback_period = excluded.sr_lookback_period,
                sr_pivot_strength = excluded.sr_pivot_strength,
                mtf_timeframe = excluded.mtf_timeframe,
                stop_loss_percentage = excluded.stop_loss_percentage,
                take_profit_percentage = excluded.take_profit_percentage,
                order_percentage = excluded.order_percentage,
                is_monitoring_enabled = excluded.is_monitoring_enabled
            "#,
        )
        .bind(CONFIG_ID)
        .bind(&config.trading_symbol)
        .bind(&config.strategy_name)
        .bind(&config.timeframe)
        .bind(config.rsi_period as i64)
        .bind(config.overbought_threshold)
        .bind(config.oversold_threshold)
        .bind(config.macd_fast_period as i64)
        .bind(config.macd_slow_period as i64)
        .bind(config.macd_signal_period as i64)
        .bind(config.sr_lookback_period as i64)
        .bind(config.sr_pivot_strength as i64)
        .bind(&config.mtf_timeframe)
        .bind(config.stop_loss_percentage)
        .bind(config.take_profit_percentage)
        .bind(config.order_percentage)
        .bind(config.is_monitoring_enabled)
        .execute(&self.pool)
        .await?;

        info!("Configuration saved");
        Ok(())
    }
}

// ─── Open position ────────────────────────────────────────────────────────────

pub struct SqlitePositionStore {
    pool: SqlitePool,
}

impl SqlitePositionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct PositionRow {
    symbol: String,
    entry_price: f64,
    quantity: f64,
    opened_at: String,
}

#[async_trait]
impl PositionStore for SqlitePositionStore {
    async fn read_position(&self) -> Result<Option<OpenPosition>> {
        let row: Option<PositionRow> =
            sqlx::query_as("SELECT symbol, entry_price, quantity, opened_at FROM open_position WHERE id = ?1")
                .bind(POSITION_ID)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|row| {
            Ok(OpenPosition {
                symbol: row.symbol,
                entry_price: row.entry_price,
                quantity: row.quantity,
                opened_at: parse_timestamp(&row.opened_at)?,
            })
        })
        .transpose()
    }

    async fn save_position(&self, position: &OpenPosition) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO open_position (id, symbol, entry_price, quantity, opened_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                symbol = excluded.symbol,
                entry_price = excluded.entry_price,
                quantity = excluded.quantity,
                opened_at = excluded.opened_at
            "#,
        )
        .bind(POSITION_ID)
        .bind(&position.symbol)
        .bind(position.entry_price)
        .bind(position.quantity)
        .bind(position.opened_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        info!(symbol = %position.symbol, "Active position saved");
        Ok(())
    }

    async fn delete_position(&self) -> Result<()> {
        sqlx::query("DELETE FROM open_position WHERE id = ?1")
            .bind(POSITION_ID)
            .execute(&self.pool)
            .await?;
        info!("Active position deleted");
        Ok(())
    }
}

// ─── Trade log ────────────────────────────────────────────────────────────────

pub struct SqliteTradeLogStore {
    pool: SqlitePool,
}

impl SqliteTradeLogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct TradeLogRow {
    id: String,
    symbol: String,
    action: OrderSide,
    reason: String,
    price: f64,
    quantity: f64,
    fee: f64,
    timestamp: String,
}

#[async_trait]
impl TradeLogStore for SqliteTradeLogStore {
    async fn append_entry(&self, entry: &TradeLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trade_log (id, symbol, action, reason, price, quantity, fee, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.symbol)
        .bind(entry.action)
        .bind(&entry.reason)
        .bind(entry.price)
        .bind(entry.quantity)
        .bind(entry.fee)
        .bind(entry.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;

        info!(symbol = %entry.symbol, action = %entry.action, "Trade log entry created");
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<TradeLogEntry>> {
        // RFC 3339 UTC strings sort chronologically as text.
        let rows: Vec<TradeLogRow> =
            sqlx::query_as("SELECT * FROM trade_log ORDER BY timestamp ASC")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|row| {
                Ok(TradeLogEntry {
                    id: row.id,
                    symbol: row.symbol,
                    action: row.action,
                    reason: row.reason,
                    price: row.price,
                    quantity: row.quantity,
                    fee: row.fee,
                    timestamp: parse_timestamp(&row.timestamp)?,
                })
            })
            .collect()
    }
}
