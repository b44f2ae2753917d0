//! Operator-facing texts and keyboards.

use super::commands::Action;
use crate::frontend::{InlineButton, InlineKeyboard};

pub const WELCOME: &str = "Welcome to surfstudent_bot, start with /login";
pub const ALREADY_LOGGED_IN: &str = "You already logged in";
pub const ASK_PHONE: &str = "📲 Send your phone number (with country code, e.g., +7XXXXXXXX)";
pub const INVALID_PHONE: &str = "❌ Invalid phone format. Try again";
pub const CODE_REQUEST_FAILED: &str = "Code request server error. Try again later";
pub const ASK_CODE: &str = "🔢 Send code in format: X X X X X: add spaces between symbols";
pub const INVALID_CODE: &str = "❌ Invalid code format. Try again";
pub const LOGIN_FAILED: &str = "❌ Login failed. Try again.";
pub const LOGIN_SUCCESS: &str = "🎉 Successfully logged in!";
pub const NOT_LOGGED_IN: &str = "You are not logged in, start with /login";
pub const TEMPLATE_MENU: &str = "Hi! Choose action:";
pub const ASK_TEMPLATE: &str = "Send your template";
pub const TEMPLATE_SAVED: &str = "Template successfully saved!";
pub const TEMPLATE_NOT_SET: &str = "Template doesn't set";
pub const NO_TEMPLATE_FOR_ACCEPT: &str =
    "There is no template. Set template /template and accept again";
pub const SOMETHING_WRONG: &str = "⚠️ Something went wrong, please try again later.";
pub const ACTION_CANCELLED: &str = "Action been cancelled";
pub const FINISH_CURRENT_STEP: &str = "Finish the current step first, or start over with /login";
pub const CONFIRMATION_EXPIRED: &str = "This request is no longer available";
pub const RESTART_NOTICE: &str = "⚠️ The bot was disconnected. Run /start to connect";

pub fn your_template(template: &str) -> String {
    format!("Your template:\n {}", template)
}

fn button(text: &str, action: Action) -> InlineButton {
    InlineButton::new(text, action.as_str())
}

/// 👍 / 👎 under a staged message
pub fn confirmation_keyboard() -> InlineKeyboard {
    InlineKeyboard::new().row(vec![
        button("👍", Action::Accept),
        button("👎", Action::Decline),
    ])
}

pub fn template_menu_keyboard() -> InlineKeyboard {
    InlineKeyboard::new().row(vec![
        button("Set template", Action::SetTemplate),
        button("View template", Action::ViewTemplate),
    ])
}

pub fn set_template_keyboard() -> InlineKeyboard {
    InlineKeyboard::new().row(vec![button("Set template", Action::SetTemplate)])
}

pub fn cancel_keyboard() -> InlineKeyboard {
    InlineKeyboard::new().row(vec![button("Cancel", Action::Cancel)])
}
