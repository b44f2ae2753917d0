//! surfwatch - surf-lesson lead relay bot
//!
//! A chat bot that multiplexes per-operator messaging-protocol sessions:
//! - operators log in through the bot (phone → code → session)
//! - the service account's session watches for candidate messages, filters
//!   them by keyword and an external classifier, and forwards approved ones
//! - regular operators answer forwarded leads with a stored template after
//!   a 👍/👎 confirmation
//!
//! Key principles:
//! - One session per operator, created lazily, kept for the process lifetime
//! - Session tokens survive restarts; conversation state does not
//! - Errors stay inside one operator's conversation

pub mod bot;
pub mod frontend;
pub mod identity;
pub mod persistence;
pub mod protocol;
pub mod triage;
