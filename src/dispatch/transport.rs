//! Outbound transport contract and Telegram implementation
//!
//! One [`OutboundTransport`] per credential. The Telegram implementation
//! retries transient network failures internally; routing-level failover to
//! the primary credential is the dispatcher's job, not the transport's.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{ChatId, MessageId, ParseMode, Recipient, UserId};
use thiserror::Error;

use crate::config::{
    TELEGRAM_API_INITIAL_BACKOFF_MS, TELEGRAM_API_MAX_ATTEMPTS, TELEGRAM_API_MAX_BACKOFF_MS,
};
use crate::utils::{retry_with_policy, RetryPolicy};

/// A single outbound call failed after the transport's own retries
#[derive(Debug, Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// Address of a message we may edit later
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRef {
    /// Chat the message lives in
    pub chat_id: i64,
    /// Message ID within the chat
    pub message_id: i32,
}

/// A rendered response ready to go out
#[derive(Debug, Clone, Default)]
pub struct OutboundPayload {
    /// Message text, HTML mode
    pub text: String,
    /// Optional inline keyboard
    pub keyboard: Option<teloxide::types::InlineKeyboardMarkup>,
}

impl OutboundPayload {
    /// Text-only payload
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: None,
        }
    }

    /// Payload with an inline keyboard
    #[must_use]
    pub fn with_keyboard(
        text: impl Into<String>,
        keyboard: teloxide::types::InlineKeyboardMarkup,
    ) -> Self {
        Self {
            text: text.into(),
            keyboard: Some(keyboard),
        }
    }
}

/// What one bot credential can do on the wire
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutboundTransport: Send + Sync {
    /// Send a new message to a user
    async fn send_message(
        &self,
        chat_id: i64,
        payload: &OutboundPayload,
    ) -> Result<MessageRef, TransportError>;

    /// Edit a previously sent message in place
    async fn edit_message(
        &self,
        message: MessageRef,
        payload: &OutboundPayload,
    ) -> Result<(), TransportError>;

    /// Acknowledge a callback query, optionally with an alert popup
    async fn answer_callback<'a>(
        &self,
        callback_id: &str,
        text: Option<&'a str>,
        show_alert: bool,
    ) -> Result<(), TransportError>;

    /// Whether the user currently belongs to the given channel
    async fn is_channel_member(
        &self,
        channel: &str,
        user_id: i64,
    ) -> Result<bool, TransportError>;
}

/// [`OutboundTransport`] over a `teloxide` bot client
pub struct TelegramTransport {
    bot: Bot,
    policy: RetryPolicy,
}

impl TelegramTransport {
    /// Wrap a bot client with the standard retry policy
    #[must_use]
    pub fn new(bot: Bot) -> Self {
        Self {
            bot,
            policy: RetryPolicy::from_millis(
                TELEGRAM_API_MAX_ATTEMPTS,
                TELEGRAM_API_INITIAL_BACKOFF_MS,
                TELEGRAM_API_MAX_BACKOFF_MS,
            ),
        }
    }
}

#[async_trait]
impl OutboundTransport for TelegramTransport {
    async fn send_message(
        &self,
        chat_id: i64,
        payload: &OutboundPayload,
    ) -> Result<MessageRef, TransportError> {
        let sent = retry_with_policy(self.policy, || async {
            let mut req = self
                .bot
                .send_message(ChatId(chat_id), payload.text.clone())
                .parse_mode(ParseMode::Html);
            if let Some(kb) = payload.keyboard.clone() {
                req = req.reply_markup(kb);
            }
            req.await.map_err(|e| anyhow::anyhow!("send error: {e}"))
        })
        .await
        .map_err(|e| TransportError(e.to_string()))?;

        Ok(MessageRef {
            chat_id: sent.chat.id.0,
            message_id: sent.id.0,
        })
    }

    async fn edit_message(
        &self,
        message: MessageRef,
        payload: &OutboundPayload,
    ) -> Result<(), TransportError> {
        retry_with_policy(self.policy, || async {
            let mut req = self
                .bot
                .edit_message_text(
                    ChatId(message.chat_id),
                    MessageId(message.message_id),
                    payload.text.clone(),
                )
                .parse_mode(ParseMode::Html);
            if let Some(kb) = payload.keyboard.clone() {
                req = req.reply_markup(kb);
            }
            req.await.map_err(|e| anyhow::anyhow!("edit error: {e}"))
        })
        .await
        .map(|_| ())
        .map_err(|e| TransportError(e.to_string()))
    }

    async fn answer_callback<'a>(
        &self,
        callback_id: &str,
        text: Option<&'a str>,
        show_alert: bool,
    ) -> Result<(), TransportError> {
        let mut req = self
            .bot
            .answer_callback_query(teloxide::types::CallbackQueryId(callback_id.to_string()));
        if let Some(text) = text {
            req = req.text(text.to_string());
        }
        if show_alert {
            req = req.show_alert(true);
        }
        req.await
            .map(|_| ())
            .map_err(|e| TransportError(e.to_string()))
    }

    async fn is_channel_member(
        &self,
        channel: &str,
        user_id: i64,
    ) -> Result<bool, TransportError> {
        let member = self
            .bot
            .get_chat_member(
                Recipient::ChannelUsername(channel.to_string()),
                UserId(user_id.unsigned_abs()),
            )
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        Ok(member.kind.is_present())
    }
}
