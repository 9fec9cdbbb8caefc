use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tracing::info;
use tracing_subscriber::EnvFilter;

use common::{Config, ConfigStore, Notifier, TradingMode};
use engine::{
    BinanceClient, EmergencyService, SqliteConfigStore, SqlitePositionStore, SqliteTradeLogStore,
    TickDeps, TickEngine,
};
use paper::PaperClient;
use strategy::StrategyManager;
use telegram_ctrl::{start_bot, BotDeps, TelegramNotifier};

#[tokio::main]
async fn main() {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    info!(mode = %cfg.trading_mode, "SpotBot starting");

    // ── Database ──────────────────────────────────────────────────────────────
    let db = SqlitePool::connect(&cfg.database_url)
        .await
        .unwrap_or_else(|e| panic!("Failed to connect to database: {e}"));
    sqlx::migrate!("../../migrations")
        .run(&db)
        .await
        .unwrap_or_else(|e| panic!("Database migration failed: {e}"));
    info!("Database ready");

    // ── Stores ────────────────────────────────────────────────────────────────
    let config_store = Arc::new(SqliteConfigStore::new(db.clone()));
    let position_store = Arc::new(SqlitePositionStore::new(db.clone()));
    let trade_log = Arc::new(SqliteTradeLogStore::new(db.clone()));

    let bot_config = config_store
        .read_config()
        .await
        .unwrap_or_else(|e| panic!("Failed to load bot configuration: {e}"));

    // ── Exchange client (injected based on TRADING_MODE) ──────────────────────
    let binance = Arc::new(BinanceClient::new(&cfg.binance_api_key, &cfg.binance_secret));
    let exchange: Arc<dyn common::ExchangeClient> = match cfg.trading_mode {
        TradingMode::Live => {
            info!("Live trading mode — using BinanceClient");
            binance
        }
        TradingMode::Paper => {
            info!(
                slippage_bps = cfg.paper_slippage_bps,
                "Paper trading mode — simulated fills over live market data"
            );
            Arc::new(PaperClient::new(
                binance,
                bot_config.quote_asset(),
                10_000.0,
                cfg.paper_slippage_bps,
            ))
        }
    };

    // ── Strategy manager ──────────────────────────────────────────────────────
    let strategy_manager = Arc::new(tokio::sync::Mutex::new(
        StrategyManager::new(&bot_config)
            .unwrap_or_else(|e| panic!("Invalid stored strategy parameters: {e}")),
    ));

    // ── Notifier ──────────────────────────────────────────────────────────────
    let notifier: Arc<dyn Notifier> = Arc::new(TelegramNotifier::new(
        cfg.telegram_token.clone(),
        &cfg.telegram_allowed_user_ids,
    ));

    // ── Tick engine ───────────────────────────────────────────────────────────
    let deps = TickDeps {
        exchange: exchange.clone(),
        config_store: config_store.clone(),
        position_store: position_store.clone(),
        trade_log: trade_log.clone(),
        notifier: notifier.clone(),
        strategy_manager: strategy_manager.clone(),
    };
    let (engine, engine_handle) =
        TickEngine::new(deps, Duration::from_secs(cfg.tick_interval_secs));

    // ── Emergency overrides ───────────────────────────────────────────────────
    let emergency = Arc::new(EmergencyService::new(
        exchange.clone(),
        config_store.clone(),
        position_store.clone(),
        notifier.clone(),
        engine_handle.clone(),
    ));

    // ── Telegram C2 ───────────────────────────────────────────────────────────
    let bot_deps = BotDeps {
        engine: engine_handle.clone(),
        emergency: emergency.clone(),
        trade_log: trade_log.clone(),
        trading_mode: cfg.trading_mode,
        allowed_user_ids: Arc::new(cfg.telegram_allowed_user_ids.clone()),
    };

    // ── Dashboard API ─────────────────────────────────────────────────────────
    let api_state = api::AppState {
        engine: engine_handle.clone(),
        emergency: emergency.clone(),
        config_store: config_store.clone(),
        trade_log: trade_log.clone(),
        strategy_manager: strategy_manager.clone(),
        trading_mode: cfg.trading_mode,
        dashboard_token: cfg.dashboard_token.clone(),
    };

    // ── Spawn all tasks ───────────────────────────────────────────────────────
    let port = cfg.dashboard_port;
    tokio::spawn(engine.run());
    tokio::spawn(start_bot(cfg.telegram_token.clone(), bot_deps));
    tokio::spawn(api::serve(api_state, port));

    // Keep main alive
    info!("All subsystems started. Waiting for shutdown signal.");
    tokio::signal::ctrl_c().await.unwrap();
    info!("Shutdown signal received. Exiting.");
}
