//! Chat front-end: capability trait, Telegram adapter, test double.

pub mod mock;
pub mod telegram;
pub mod traits;

pub use mock::MockFrontEnd;
pub use telegram::TelegramFrontEnd;
pub use traits::{
    BotEvent, CallbackEvent, ChatId, ForwardOrigin, FrontEnd, FrontendError, FrontendResult,
    InlineButton, InlineKeyboard, MessageId, TextEvent,
};
