use async_trait::async_trait;
use teloxide::prelude::*;
use tracing::warn;

use common::Notifier;

/// Pushes engine notifications to the configured chats. Failures are
/// logged and dropped; a Telegram outage must never affect a trade.
pub struct TelegramNotifier {
    bot: Bot,
    chat_ids: Vec<ChatId>,
}

impl TelegramNotifier {
    pub fn new(token: String, user_ids: &[i64]) -> Self {
        Self {
            bot: Bot::new(token),
            chat_ids: user_ids.iter().map(|&id| ChatId(id)).collect(),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) {
        for &chat_id in &self.chat_ids {
            if let Err(e) = self.bot.send_message(chat_id, text).await {
                warn!(chat_id = ?chat_id, error = %e, "Failed to send Telegram notification");
            }
        }
    }
}
