//! Chat Front-End Capability
//!
//! What the conversation layer needs from the bot transport: an inbound event
//! stream (text messages and button clicks) and a handful of outbound
//! actions. The teloxide adapter implements this for the Telegram Bot API;
//! tests use `MockFrontEnd`.

use crate::identity::UserId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Front-end chat identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub i64);

impl ChatId {
    /// Private chat between the bot and `user`
    pub fn private(user: UserId) -> Self {
        ChatId(user.0)
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Front-end message identifier (unique within a chat)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub i32);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineButton {
    pub text: String,
    /// Opaque payload echoed back in [`CallbackEvent::data`]
    pub data: String,
}

impl InlineButton {
    pub fn new(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            data: data.into(),
        }
    }
}

/// Rows of action buttons attached to a message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InlineKeyboard {
    pub rows: Vec<Vec<InlineButton>>,
}

impl InlineKeyboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row(mut self, buttons: Vec<InlineButton>) -> Self {
        self.rows.push(buttons);
        self
    }

    /// Every callback payload on the keyboard, in order
    pub fn actions(&self) -> Vec<&str> {
        self.rows
            .iter()
            .flatten()
            .map(|b| b.data.as_str())
            .collect()
    }
}

/// Where a forwarded message originally came from, as reported by the
/// transport for the received update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOrigin {
    User { id: i64, is_bot: bool },
    /// Sender hid their account; only a display name is known
    HiddenUser { name: String },
    Chat { id: i64 },
    Channel { id: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEvent {
    pub user: UserId,
    pub chat: ChatId,
    pub message_id: MessageId,
    pub text: String,
    pub forward_origin: Option<ForwardOrigin>,
    /// Author of the message is a bot account
    pub from_bot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackEvent {
    pub user: UserId,
    pub chat: ChatId,
    pub callback_id: String,
    /// Message carrying the clicked button
    pub message_id: MessageId,
    pub data: String,
}

/// One inbound front-end event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotEvent {
    Text(TextEvent),
    Callback(CallbackEvent),
}

impl BotEvent {
    pub fn user(&self) -> UserId {
        match self {
            BotEvent::Text(e) => e.user,
            BotEvent::Callback(e) => e.user,
        }
    }

    pub fn chat(&self) -> ChatId {
        match self {
            BotEvent::Text(e) => e.chat,
            BotEvent::Callback(e) => e.chat,
        }
    }
}

pub type FrontendResult<T> = Result<T, FrontendError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrontendError {
    #[error("Bot API request failed: {0}")]
    Request(String),

    #[error("Invalid identifier: {0}")]
    InvalidId(String),
}

/// Outbound actions on the chat front-end
#[async_trait]
pub trait FrontEnd: Send + Sync + 'static {
    /// Send text, optionally with inline action buttons
    async fn send_text(
        &self,
        chat: ChatId,
        text: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> FrontendResult<MessageId>;

    async fn delete_message(&self, chat: ChatId, message: MessageId) -> FrontendResult<()>;

    /// Acknowledge a button click
    async fn answer_callback(&self, callback_id: &str) -> FrontendResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyboard_actions() {
        let keyboard = InlineKeyboard::new()
            .row(vec![
                InlineButton::new("👍", "accept"),
                InlineButton::new("👎", "decline"),
            ])
            .row(vec![InlineButton::new("Cancel", "cancel")]);

        assert_eq!(keyboard.actions(), vec!["accept", "decline", "cancel"]);
    }

    #[test]
    fn test_event_user() {
        let event = BotEvent::Callback(CallbackEvent {
            user: UserId(5),
            chat: ChatId(5),
            callback_id: "cb".to_string(),
            message_id: MessageId(1),
            data: "accept".to_string(),
        });
        assert_eq!(event.user(), UserId(5));
        assert_eq!(ChatId::private(UserId(5)), event.chat());
    }
}
