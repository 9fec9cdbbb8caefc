use std::sync::Arc;

use teloxide::{dispatching::UpdateHandler, prelude::*, utils::command::BotCommands};
use tracing::{info, warn};

use common::{EngineCommand, TradeLogStore, TradingMode};
use engine::{EmergencyService, EngineHandle};

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Dependencies injected into every handler via `dptree`.
#[derive(Clone)]
pub struct BotDeps {
    pub engine: EngineHandle,
    pub emergency: Arc<EmergencyService>,
    pub trade_log: Arc<dyn TradeLogStore>,
    pub trading_mode: TradingMode,
    pub allowed_user_ids: Arc<Vec<i64>>,
}

/// Telegram bot commands exposed to the operator.
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "SpotBot commands:")]
pub enum Command {
    #[command(description = "Start the tick engine")]
    Start,
    #[command(description = "Stop the tick engine (the open position is kept)")]
    Stop,
    #[command(description = "Show engine status and the open position")]
    Status,
    #[command(description = "Show realized PnL from the trade log")]
    Pnl,
    #[command(description = "Emergency buy with a percentage of the quote balance")]
    ForceBuy(f64),
    #[command(description = "Emergency sell a percentage of the base balance")]
    ForceSell(f64),
    #[command(description = "Liquidate everything and stop the engine")]
    SellAndStop,
}

/// Start the Telegram bot in long-polling mode.
pub async fn start_bot(token: String, deps: BotDeps) {
    let bot = Bot::new(token);
    let deps = Arc::new(deps);

    info!("Telegram bot starting (long-polling)");

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![deps])
        .build()
        .dispatch()
        .await;
}

fn schema() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync>> {
    use dptree::case;

    let command_handler = teloxide::filter_command::<Command, _>()
        .branch(case![Command::Start].endpoint(handle_start))
        .branch(case![Command::Stop].endpoint(handle_stop))
        .branch(case![Command::Status].endpoint(handle_status))
        .branch(case![Command::Pnl].endpoint(handle_pnl))
        .branch(case![Command::ForceBuy(pct)].endpoint(handle_force_buy))
        .branch(case![Command::ForceSell(pct)].endpoint(handle_force_sell))
        .branch(case![Command::SellAndStop].endpoint(handle_sell_and_stop));

    Update::filter_message()
        .filter_map(|msg: Message| msg.from().map(|u| u.id))
        .filter_async(auth_filter)
        .branch(command_handler)
}

/// Silently drop messages from users not in the allowed list.
async fn auth_filter(user_id: UserId, deps: Arc<BotDeps>) -> bool {
    let uid = user_id.0 as i64;
    let allowed = deps.allowed_user_ids.contains(&uid);
    if !allowed {
        warn!(user_id = uid, "Unauthorized Telegram access attempt");
    }
    allowed
}

async fn handle_start(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    if deps.engine.is_running().await {
        bot.send_message(msg.chat.id, "Engine is already running.")
            .await?;
    } else {
        let _ = deps.engine.send(EngineCommand::Start).await;
        bot.send_message(msg.chat.id, "Engine started.").await?;
    }
    Ok(())
}

async fn handle_stop(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    if !deps.engine.is_running().await {
        bot.send_message(msg.chat.id, "Engine is already stopped.")
            .await?;
    } else {
        let _ = deps.engine.send(EngineCommand::Stop).await;
        bot.send_message(msg.chat.id, "Engine stopped. The open position is kept.")
            .await?;
    }
    Ok(())
}

async fn handle_status(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let status = deps.engine.status().await;
    let engine = if status.is_running { "running" } else { "stopped" };
    let position = match status.open_position {
        Some(p) => format!(
            "{} x {:.6} at {:.4}",
            p.symbol, p.quantity, p.entry_price
        ),
        None => "none".to_string(),
    };
    let text = format!(
        "SpotBot Status\n\
         Engine: {engine}\n\
         Mode: {}\n\
         Tick interval: {}s\n\
         Position: {position}",
        deps.trading_mode, status.tick_interval_secs
    );
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_pnl(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let text = match deps.trade_log.read_all().await {
        Ok(entries) => {
            let report = pnl::reconcile(&entries);
            let mut lines = vec![format!(
                "Realized PnL: {:+.4} ({} trades)",
                report.total_realized_pnl, report.total_trades
            )];
            let mut symbols: Vec<_> = report.pnl_by_symbol.iter().collect();
            symbols.sort_by(|a, b| a.0.cmp(b.0));
            for (symbol, s) in symbols {
                lines.push(format!(
                    "{symbol}: {:+.4} ({} buys / {} sells)",
                    s.realized_pnl, s.total_buy_trades, s.total_sell_trades
                ));
            }
            lines.join("\n")
        }
        Err(e) => format!("Failed to read the trade log: {e}"),
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_force_buy(
    bot: Bot,
    msg: Message,
    pct: f64,
    deps: Arc<BotDeps>,
) -> HandlerResult {
    let text = match deps.emergency.force_buy(pct).await {
        Ok(fill) => format!(
            "Bought {:.6} {} at {:.4}",
            fill.filled_quantity, fill.symbol, fill.average_price
        ),
        Err(e) => format!("Emergency buy failed: {e}"),
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_force_sell(
    bot: Bot,
    msg: Message,
    pct: f64,
    deps: Arc<BotDeps>,
) -> HandlerResult {
    let text = match deps.emergency.force_sell(pct).await {
        Ok(fill) => format!(
            "Sold {:.6} {} at {:.4}",
            fill.filled_quantity, fill.symbol, fill.average_price
        ),
        Err(e) => format!("Emergency sell failed: {e}"),
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_sell_and_stop(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let text = match deps.emergency.sell_and_stop().await {
        Ok(()) => "Liquidated and stopped.".to_string(),
        Err(e) => format!("Sell-and-stop failed: {e}"),
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}
