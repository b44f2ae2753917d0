//! Telegram Bot API front-end (teloxide).
//!
//! - [`TelegramFrontEnd`]: outbound actions (send, delete, answer callback)
//! - [`listen`]: long-polling dispatcher translating updates into
//!   [`BotEvent`]s on an mpsc channel until shutdown is signalled

use super::traits::{
    BotEvent, CallbackEvent, ChatId, ForwardOrigin, FrontEnd, FrontendError, FrontendResult,
    InlineKeyboard, MessageId, TextEvent,
};
use crate::identity::UserId;
use async_trait::async_trait;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{
    CallbackQuery, CallbackQueryId, InlineKeyboardButton, InlineKeyboardMarkup, MessageOrigin,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

const POLL_TIMEOUT: Duration = Duration::from_secs(30);

/// Build a bot whose HTTP timeout outlives the long-polling timeout
pub fn build_bot(token: &str) -> Bot {
    match teloxide::net::default_reqwest_settings()
        .timeout(Duration::from_secs(60))
        .connect_timeout(Duration::from_secs(10))
        .build()
    {
        Ok(client) => Bot::with_client(token, client),
        Err(e) => {
            warn!(error = %e, "custom HTTP client unavailable, using defaults");
            Bot::new(token)
        }
    }
}

#[derive(Clone)]
pub struct TelegramFrontEnd {
    bot: Bot,
}

impl TelegramFrontEnd {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn request_error(e: teloxide::RequestError) -> FrontendError {
    FrontendError::Request(e.to_string())
}

fn to_markup(keyboard: &InlineKeyboard) -> InlineKeyboardMarkup {
    let rows: Vec<Vec<InlineKeyboardButton>> = keyboard
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|b| InlineKeyboardButton::callback(&b.text, &b.data))
                .collect()
        })
        .collect();
    InlineKeyboardMarkup::new(rows)
}

#[async_trait]
impl FrontEnd for TelegramFrontEnd {
    async fn send_text(
        &self,
        chat: ChatId,
        text: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> FrontendResult<MessageId> {
        let mut request = self.bot.send_message(teloxide::types::ChatId(chat.0), text);
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(to_markup(&keyboard));
        }

        let message = request.await.map_err(request_error)?;
        Ok(MessageId(message.id.0))
    }

    async fn delete_message(&self, chat: ChatId, message: MessageId) -> FrontendResult<()> {
        self.bot
            .delete_message(
                teloxide::types::ChatId(chat.0),
                teloxide::types::MessageId(message.0),
            )
            .await
            .map_err(request_error)?;
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str) -> FrontendResult<()> {
        self.bot
            .answer_callback_query(CallbackQueryId(callback_id.to_string()))
            .await
            .map_err(request_error)?;
        Ok(())
    }
}

fn user_id(id: teloxide::types::UserId) -> FrontendResult<UserId> {
    i64::try_from(id.0)
        .map(UserId)
        .map_err(|_| FrontendError::InvalidId(id.0.to_string()))
}

fn forward_origin(origin: &MessageOrigin) -> ForwardOrigin {
    match origin {
        MessageOrigin::User { sender_user, .. } => ForwardOrigin::User {
            id: i64::try_from(sender_user.id.0).unwrap_or(-1),
            is_bot: sender_user.is_bot,
        },
        MessageOrigin::HiddenUser {
            sender_user_name, ..
        } => ForwardOrigin::HiddenUser {
            name: sender_user_name.clone(),
        },
        MessageOrigin::Chat { sender_chat, .. } => ForwardOrigin::Chat { id: sender_chat.id.0 },
        MessageOrigin::Channel { chat, .. } => ForwardOrigin::Channel { id: chat.id.0 },
    }
}

/// Translate a text message update; `None` for updates the bot ignores
fn text_event(msg: &Message) -> FrontendResult<Option<TextEvent>> {
    let (Some(from), Some(text)) = (msg.from.as_ref(), msg.text()) else {
        return Ok(None);
    };

    Ok(Some(TextEvent {
        user: user_id(from.id)?,
        chat: ChatId(msg.chat.id.0),
        message_id: MessageId(msg.id.0),
        text: text.to_string(),
        forward_origin: msg.forward_origin().map(forward_origin),
        from_bot: from.is_bot,
    }))
}

fn callback_event(query: &CallbackQuery) -> FrontendResult<Option<CallbackEvent>> {
    let (Some(data), Some(message)) = (query.data.as_ref(), query.message.as_ref()) else {
        return Ok(None);
    };

    Ok(Some(CallbackEvent {
        user: user_id(query.from.id)?,
        chat: ChatId(message.chat().id.0),
        callback_id: query.id.to_string(),
        message_id: MessageId(message.id().0),
        data: data.clone(),
    }))
}

/// Run the long-polling dispatcher until `shutdown` flips to `true`.
///
/// Every accepted update becomes one [`BotEvent`] on `events`.
pub async fn listen(bot: Bot, events: mpsc::Sender<BotEvent>, mut shutdown: watch::Receiver<bool>) {
    let message_handler = Update::filter_message().endpoint({
        let events = events.clone();
        move |msg: Message| {
            let events = events.clone();
            async move {
                match text_event(&msg) {
                    Ok(Some(event)) => {
                        if events.send(BotEvent::Text(event)).await.is_err() {
                            debug!("event channel closed, dropping message");
                        }
                    }
                    Ok(None) => debug!("ignoring non-text message"),
                    Err(e) => warn!(error = %e, "rejected message update"),
                }
                respond(())
            }
        }
    });

    let callback_handler = Update::filter_callback_query().endpoint({
        let events = events.clone();
        move |query: CallbackQuery| {
            let events = events.clone();
            async move {
                match callback_event(&query) {
                    Ok(Some(event)) => {
                        if events.send(BotEvent::Callback(event)).await.is_err() {
                            debug!("event channel closed, dropping callback");
                        }
                    }
                    Ok(None) => debug!("ignoring callback without data"),
                    Err(e) => warn!(error = %e, "rejected callback update"),
                }
                respond(())
            }
        }
    });

    let handler = dptree::entry()
        .branch(message_handler)
        .branch(callback_handler);

    let mut dispatcher = Dispatcher::builder(bot.clone(), handler).build();
    let shutdown_token = dispatcher.shutdown_token();

    let stopper = tokio::spawn(async move {
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }
        // Idle until the dispatcher has actually started
        loop {
            match shutdown_token.shutdown() {
                Ok(done) => {
                    done.await;
                    break;
                }
                Err(_) => tokio::time::sleep(Duration::from_millis(100)).await,
            }
        }
    });

    let polling = teloxide::update_listeners::Polling::builder(bot)
        .timeout(POLL_TIMEOUT)
        .build();

    info!("telegram listener started");
    dispatcher
        .dispatch_with_listener(
            polling,
            teloxide::error_handlers::LoggingErrorHandler::with_custom_text(
                "Telegram polling error (will retry)",
            ),
        )
        .await;

    stopper.abort();
    info!("telegram listener stopped");
}
