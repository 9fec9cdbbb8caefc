mod auth;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use common::{ConfigStore, TradeLogStore, TradingMode};
use engine::{EmergencyService, EngineHandle};
use strategy::StrategyManager;

/// Shared application state injected into every route handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub emergency: Arc<EmergencyService>,
    pub config_store: Arc<dyn ConfigStore>,
    pub trade_log: Arc<dyn TradeLogStore>,
    pub strategy_manager: Arc<Mutex<StrategyManager>>,
    pub trading_mode: TradingMode,
    pub dashboard_token: String,
}

/// Build and run the Axum API server.
pub async fn serve(state: AppState, port: u16) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods(Any);

    let app = Router::new()
        .merge(routes::api_router(state.clone()))
        .merge(routes::health_router())
        .with_state(state)
        .layer(cors);

    info!(%addr, "Dashboard API listening");
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
