//! Bot commands and inline-button actions.
//!
//! Commands: /start, /login, /template, /help
//! Actions (callback data): accept, decline, set_template, view_template, cancel

/// Slash command typed by the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Greet, or re-attach after a restart
    Start,

    /// Begin the phone → code login handshake
    Login,

    /// Show the template menu
    Template,

    /// Show help
    Help,

    /// Unknown command
    Unknown(String),
}

impl Command {
    /// (syntax, description) for help text; `None` for Unknown
    pub fn help_text(&self) -> Option<(&'static str, &'static str)> {
        match self {
            Command::Start => Some(("/start", "Connect to the bot (run again after a restart)")),
            Command::Login => Some(("/login", "Log in with your phone number")),
            Command::Template => Some(("/template", "Set or view your reply template")),
            Command::Help => Some(("/help", "Show this help message")),
            Command::Unknown(_) => None,
        }
    }

    pub fn all_commands() -> Vec<(&'static str, &'static str)> {
        [
            Command::Start,
            Command::Login,
            Command::Template,
            Command::Help,
        ]
        .iter()
        .filter_map(Command::help_text)
        .collect()
    }
}

/// Parse a slash command. `None` when the text is not a command at all.
///
/// `/login@surfstudent_bot` (group-style addressing) parses as `/login`.
pub fn parse_command(text: &str) -> Option<Command> {
    let text = text.trim();
    let word = text.split_whitespace().next()?;
    let name = word.strip_prefix('/')?;
    let name = name.split('@').next().unwrap_or(name);

    let command = match name {
        "start" => Command::Start,
        "login" => Command::Login,
        "template" => Command::Template,
        "help" => Command::Help,
        other => Command::Unknown(other.to_string()),
    };
    Some(command)
}

/// Format the help listing
pub fn help_text() -> String {
    let mut help = String::from("Available commands:\n");
    for (syntax, description) in Command::all_commands() {
        help.push_str(&format!("{} - {}\n", syntax, description));
    }
    help
}

/// Inline button payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Accept,
    Decline,
    SetTemplate,
    ViewTemplate,
    Cancel,
}

impl Action {
    pub fn parse(data: &str) -> Option<Self> {
        match data {
            "accept" => Some(Action::Accept),
            "decline" => Some(Action::Decline),
            "set_template" => Some(Action::SetTemplate),
            "view_template" => Some(Action::ViewTemplate),
            "cancel" => Some(Action::Cancel),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Accept => "accept",
            Action::Decline => "decline",
            Action::SetTemplate => "set_template",
            Action::ViewTemplate => "view_template",
            Action::Cancel => "cancel",
        }
    }
}
