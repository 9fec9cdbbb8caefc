use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{info, warn};

use common::{BotConfig, ConfigStore, EngineCommand, Error};
use strategy::StrategyManager;

use crate::{auth::require_auth, AppState};

pub fn api_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/config", get(get_config).put(put_config))
        .route("/api/bot/start", post(start_bot))
        .route("/api/bot/stop", post(stop_bot))
        .route("/api/bot/status", get(bot_status))
        .route("/api/account/pnl", get(account_pnl))
        .route("/api/account/trades", get(account_trades))
        .route("/api/emergency/buy", post(emergency_buy))
        .route("/api/emergency/sell", post(emergency_sell))
        .route("/api/emergency/sell-and-stop", post(emergency_sell_and_stop))
        .route_layer(middleware::from_fn_with_state(state, require_auth))
}

fn internal_error(e: impl std::fmt::Display) -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
    )
}

// ─── Configuration ────────────────────────────────────────────────────────────

async fn get_config(
    State(state): State<AppState>,
) -> Result<Json<BotConfig>, (StatusCode, Json<Value>)> {
    let config = state.config_store.read_config().await.map_err(internal_error)?;
    Ok(Json(config))
}

/// Validate and persist a configuration update, then swap it into the live
/// strategy manager. The store stays authoritative: a failed write leaves
/// the running strategy on its previous parameters, and a persisted update
/// is applied at the latest on the next tick.
async fn apply_config_update(
    store: &Arc<dyn ConfigStore>,
    manager: &Mutex<StrategyManager>,
    config: &BotConfig,
) -> common::Result<()> {
    config.validate()?;
    store.write_config(config).await?;
    manager.lock().await.update_active_strategy(config)
}

/// Full-document configuration update. Missing fields fall back to their
/// defaults.
async fn put_config(
    State(state): State<AppState>,
    Json(config): Json<BotConfig>,
) -> Result<Json<BotConfig>, (StatusCode, Json<Value>)> {
    match apply_config_update(&state.config_store, &state.strategy_manager, &config).await {
        Ok(()) => {
            info!(strategy = %config.strategy_name, symbol = %config.trading_symbol, "Configuration updated");
            Ok(Json(config))
        }
        Err(e @ Error::Validation(_)) => {
            warn!(error = %e, "Rejected configuration update");
            Err((
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "error": e.to_string() })),
            ))
        }
        Err(e) => Err(internal_error(e)),
    }
}

// ─── Engine control ───────────────────────────────────────────────────────────

async fn start_bot(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state
        .engine
        .send(EngineCommand::Start)
        .await
        .map_err(internal_error)?;
    Ok(Json(json!({ "status": "started" })))
}

async fn stop_bot(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state
        .engine
        .send(EngineCommand::Stop)
        .await
        .map_err(internal_error)?;
    Ok(Json(json!({ "status": "stopped" })))
}

async fn bot_status(State(state): State<AppState>) -> Json<Value> {
    let status = state.engine.status().await;
    Json(json!({
        "isRunning": status.is_running,
        "tickIntervalSecs": status.tick_interval_secs,
        "mode": state.trading_mode.to_string(),
        "openPosition": status.open_position,
    }))
}

// ─── Account ──────────────────────────────────────────────────────────────────

async fn account_pnl(
    State(state): State<AppState>,
) -> Result<Json<pnl::PnlReport>, (StatusCode, Json<Value>)> {
    let entries = state.trade_log.read_all().await.map_err(internal_error)?;
    Ok(Json(pnl::reconcile(&entries)))
}

async fn account_trades(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let mut entries = state.trade_log.read_all().await.map_err(internal_error)?;
    // Newest first for display
    entries.reverse();
    Ok(Json(json!({
        "total": entries.len(),
        "trades": entries,
    })))
}

// ─── Emergency overrides ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct PercentageBody {
    percentage: f64,
}

async fn emergency_buy(
    State(state): State<AppState>,
    Json(body): Json<PercentageBody>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let fill = state
        .emergency
        .force_buy(body.percentage)
        .await
        .map_err(internal_error)?;
    Ok(Json(json!({ "status": "filled", "fill": fill })))
}

async fn emergency_sell(
    State(state): State<AppState>,
    Json(body): Json<PercentageBody>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let fill = state
        .emergency
        .force_sell(body.percentage)
        .await
        .map_err(internal_error)?;
    Ok(Json(json!({ "status": "filled", "fill": fill })))
}

async fn emergency_sell_and_stop(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state
        .emergency
        .sell_and_stop()
        .await
        .map_err(internal_error)?;
    Ok(Json(json!({ "status": "stopped" })))
}
