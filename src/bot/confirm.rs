//! Reply Confirmation Workflow
//!
//! A forwarded candidate message is echoed back to the operator with 👍/👎
//! buttons and the original is removed from the chat. The confirmation
//! table maps the echo's message id to the original sender.
//!
//! - accept: send the operator's template to the original sender through the
//!   operator's user-role session
//! - decline: drop the entry, nothing is sent
//!
//! The forward origin comes from the received update, never from message
//! text, and is checked before anything is staged.

use super::messages;
use super::state::ConversationState;
use crate::frontend::{CallbackEvent, ChatId, ForwardOrigin, FrontEnd, FrontendResult, MessageId, TextEvent};
use crate::identity::UserId;
use crate::persistence::PreferenceStore;
use crate::protocol::{ProtocolFactory, RoleRouter};
use crate::triage::RelayLedger;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Staged(MessageId),
    /// No usable forward origin
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    Sent,
    SendFailed,
    /// Entry kept so accept can be retried once a template exists
    NoTemplate,
    /// Entry kept; the operator has no registered user-role session
    NoSender,
    StoreFailed,
    /// Unknown, consumed or expired confirmation
    Expired,
}

pub struct ReplyConfirmWorkflow<F: ProtocolFactory> {
    frontend: Arc<dyn FrontEnd>,
    router: Arc<RoleRouter<F>>,
    preferences: PreferenceStore,
    ledger: Arc<RelayLedger>,
    require_relayed_origin: bool,
    cleanup_delay: Duration,
}

impl<F: ProtocolFactory> ReplyConfirmWorkflow<F> {
    pub fn new(
        frontend: Arc<dyn FrontEnd>,
        router: Arc<RoleRouter<F>>,
        preferences: PreferenceStore,
        ledger: Arc<RelayLedger>,
        require_relayed_origin: bool,
        cleanup_delay: Duration,
    ) -> Self {
        Self {
            frontend,
            router,
            preferences,
            ledger,
            require_relayed_origin,
            cleanup_delay,
        }
    }

    /// Original sender id if `origin` may be replied to by `operator`
    pub fn validate_origin(&self, operator: UserId, origin: &ForwardOrigin) -> Option<i64> {
        let ForwardOrigin::User { id, is_bot } = origin else {
            return None;
        };

        if *id <= 0 || *is_bot || *id == operator.0 {
            return None;
        }
        if self.require_relayed_origin && !self.ledger.contains(*id) {
            return None;
        }
        Some(*id)
    }

    /// Echo a forwarded message with confirmation buttons and record it
    pub async fn stage(
        &self,
        state: &mut ConversationState,
        event: &TextEvent,
    ) -> FrontendResult<StageOutcome> {
        if event.from_bot {
            return Ok(StageOutcome::Ignored);
        }

        let Some(sender) = event
            .forward_origin
            .as_ref()
            .and_then(|origin| self.validate_origin(event.user, origin))
        else {
            debug!(user = %event.user, "forward origin not accepted, not staging");
            return Ok(StageOutcome::Ignored);
        };

        let echo = self
            .frontend
            .send_text(
                event.chat,
                &event.text,
                Some(messages::confirmation_keyboard()),
            )
            .await?;

        for evicted in state.pending.insert(echo, sender) {
            debug!(user = %event.user, message = %evicted, "confirmation evicted");
            self.schedule_delete(event.chat, evicted).await;
        }
        self.schedule_delete(event.chat, event.message_id).await;

        info!(user = %event.user, confirmation = %echo, "reply staged");
        Ok(StageOutcome::Staged(echo))
    }

    pub async fn accept(
        &self,
        state: &mut ConversationState,
        event: &CallbackEvent,
    ) -> AcceptOutcome {
        let operator = event.user;

        let Some(recipient) = state.pending.get(event.message_id) else {
            state.pending.remove(event.message_id);
            self.reply(event.chat, messages::CONFIRMATION_EXPIRED).await;
            self.schedule_delete(event.chat, event.message_id).await;
            return AcceptOutcome::Expired;
        };

        let template = match self.preferences.template(operator).await {
            Ok(Some(template)) => template,
            Ok(None) => {
                self.reply(event.chat, messages::NO_TEMPLATE_FOR_ACCEPT).await;
                return AcceptOutcome::NoTemplate;
            }
            Err(e) => {
                warn!(user = %operator, error = %e, "failed to load template");
                self.reply(event.chat, messages::SOMETHING_WRONG).await;
                return AcceptOutcome::StoreFailed;
            }
        };

        if self.router.get_sender(operator).is_none() {
            warn!(user = %operator, "no user-role session registered for reply");
            self.reply(event.chat, messages::SOMETHING_WRONG).await;
            return AcceptOutcome::NoSender;
        }

        state.pending.remove(event.message_id);
        let outcome = match self.router.send_as(operator, recipient, &template).await {
            Ok(()) => {
                info!(user = %operator, "template sent");
                AcceptOutcome::Sent
            }
            Err(e) => {
                warn!(user = %operator, error = %e, "template send failed");
                self.reply(event.chat, messages::SOMETHING_WRONG).await;
                AcceptOutcome::SendFailed
            }
        };

        self.schedule_delete(event.chat, event.message_id).await;
        outcome
    }

    /// Drop the confirmation. Never sends anything.
    pub async fn decline(&self, state: &mut ConversationState, event: &CallbackEvent) {
        state.pending.remove(event.message_id);
        self.schedule_delete(event.chat, event.message_id).await;
        debug!(user = %event.user, confirmation = %event.message_id, "reply declined");
    }

    async fn reply(&self, chat: ChatId, text: &str) {
        if let Err(e) = self.frontend.send_text(chat, text, None).await {
            warn!(chat = %chat, error = %e, "failed to send reply");
        }
    }

    /// Delete a chat message after the cleanup delay (immediately when the
    /// delay is zero)
    async fn schedule_delete(&self, chat: ChatId, message: MessageId) {
        let frontend = Arc::clone(&self.frontend);
        let delay = self.cleanup_delay;

        let task = async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Err(e) = frontend.delete_message(chat, message).await {
                debug!(chat = %chat, message = %message, error = %e, "delete failed");
            }
        };

        if delay.is_zero() {
            task.await;
        } else {
            tokio::spawn(task);
        }
    }
}
