//! Mock front-end for testing
//!
//! Records every outbound action so tests can assert on what the operator
//! would have seen.

use super::traits::*;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentText {
    pub chat: ChatId,
    pub message_id: MessageId,
    pub text: String,
    pub keyboard: Option<InlineKeyboard>,
}

#[derive(Clone, Default)]
pub struct MockFrontEnd {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    next_message_id: i32,
    sent: Vec<SentText>,
    deleted: Vec<(ChatId, MessageId)>,
    answered: Vec<String>,
    fail_sends: bool,
}

impl MockFrontEnd {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_sends(&self, fail: bool) {
        self.state.lock().unwrap().fail_sends = fail;
    }

    /// Get sent messages for assertions
    pub fn sent(&self) -> Vec<SentText> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Texts sent to `chat`, in order
    pub fn texts_to(&self, chat: ChatId) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|m| m.chat == chat)
            .map(|m| m.text.clone())
            .collect()
    }

    pub fn last_sent(&self) -> Option<SentText> {
        self.state.lock().unwrap().sent.last().cloned()
    }

    pub fn deleted(&self) -> Vec<(ChatId, MessageId)> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn answered(&self) -> Vec<String> {
        self.state.lock().unwrap().answered.clone()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.sent.clear();
        state.deleted.clear();
        state.answered.clear();
    }
}

#[async_trait]
impl FrontEnd for MockFrontEnd {
    async fn send_text(
        &self,
        chat: ChatId,
        text: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> FrontendResult<MessageId> {
        let mut state = self.state.lock().unwrap();
        if state.fail_sends {
            return Err(FrontendError::Request("bot was blocked by the user".to_string()));
        }

        state.next_message_id += 1;
        let message_id = MessageId(1000 + state.next_message_id);
        state.sent.push(SentText {
            chat,
            message_id,
            text: text.to_string(),
            keyboard,
        });
        Ok(message_id)
    }

    async fn delete_message(&self, chat: ChatId, message: MessageId) -> FrontendResult<()> {
        self.state.lock().unwrap().deleted.push((chat, message));
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str) -> FrontendResult<()> {
        self.state
            .lock()
            .unwrap()
            .answered
            .push(callback_id.to_string());
        Ok(())
    }
}
