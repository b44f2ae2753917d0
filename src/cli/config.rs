//! surfwatch configuration file handling
//!
//! TOML file stored next to the document store. Every secret and endpoint
//! can also come from the environment, which wins over the file:
//!
//! | variable                         | field                      |
//! |----------------------------------|----------------------------|
//! | `BOT_TOKEN`                      | `telegram.bot_token`       |
//! | `API_ID`, `API_HASH`             | `protocol.api_id/api_hash` |
//! | `BRIDGE_URL`                     | `protocol.bridge_url`      |
//! | `RELAY_DESTINATION`, `BOT_USERNAME` | `relay.destination`     |
//! | `SERVICE_PHONE`                  | `relay.service_phone`      |
//! | `GEMINI_URL`                     | `classifier.endpoint`      |
//! | `STORE_PATH`                     | `storage.path`             |
//! | `LOG_LEVEL`                      | `logging.level`            |

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use surfwatch::bot::{ConfirmationLimits, ServiceSettings};
use surfwatch::protocol::{ApiCredentials, Destination, RetryPolicy, Timeouts};
use surfwatch::triage::DEFAULT_KEYWORDS;
use thiserror::Error;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_BRIDGE_URL: &str = "http://127.0.0.1:8081";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write config file '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {field}: '{value}'")]
    Invalid { field: &'static str, value: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// surfwatch bot configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SurfwatchConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub protocol: ProtocolConfig,

    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    #[serde(default)]
    pub confirmations: ConfirmationsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Bot API front-end
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
}

/// Messaging-protocol sessions (via the bridge sidecar)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    pub api_id: Option<i32>,
    pub api_hash: Option<String>,

    #[serde(default = "default_bridge_url")]
    pub bridge_url: String,

    /// How often a service session polls for new messages
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    /// Upper bound on any single HTTP request to the bridge
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Where approved messages are forwarded (`@username` or numeric id)
    pub destination: Option<String>,

    /// Phone of the account that listens for candidate messages
    pub service_phone: Option<String>,

    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,

    /// Only reply to senders this process actually relayed
    #[serde(default = "default_true")]
    pub require_relayed_origin: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub endpoint: Option<String>,

    /// Prompt with a `{message}` placeholder
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_auth_timeout")]
    pub login_code: String,
    #[serde(default = "default_auth_timeout")]
    pub sign_in: String,
    #[serde(default = "default_classify_timeout")]
    pub classify: String,
    #[serde(default = "default_io_timeout")]
    pub forward: String,
    #[serde(default = "default_io_timeout")]
    pub send: String,
    #[serde(default = "default_io_timeout")]
    pub connect: String,
    #[serde(default = "default_io_timeout")]
    pub get_me: String,
    #[serde(default = "default_poll_timeout")]
    pub poll: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationsConfig {
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
    #[serde(default = "default_ttl")]
    pub ttl: String,
    #[serde(default = "default_cleanup_delay")]
    pub cleanup_delay: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

fn default_bridge_url() -> String {
    DEFAULT_BRIDGE_URL.to_string()
}

fn default_poll_interval() -> String {
    "1s".to_string()
}

fn default_request_timeout() -> String {
    "60s".to_string()
}

fn default_poll_timeout() -> String {
    "30s".to_string()
}

fn default_keywords() -> Vec<String> {
    DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect()
}

fn default_true() -> bool {
    true
}

fn default_auth_timeout() -> String {
    "30s".to_string()
}

fn default_classify_timeout() -> String {
    "20s".to_string()
}

fn default_io_timeout() -> String {
    "15s".to_string()
}

fn default_max_pending() -> usize {
    ConfirmationLimits::default().max_pending
}

fn default_ttl() -> String {
    "24h".to_string()
}

fn default_cleanup_delay() -> String {
    "1s".to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            api_id: None,
            api_hash: None,
            bridge_url: default_bridge_url(),
            poll_interval: default_poll_interval(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            destination: None,
            service_phone: None,
            keywords: default_keywords(),
            require_relayed_origin: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            login_code: default_auth_timeout(),
            sign_in: default_auth_timeout(),
            classify: default_classify_timeout(),
            forward: default_io_timeout(),
            send: default_io_timeout(),
            connect: default_io_timeout(),
            get_me: default_io_timeout(),
            poll: default_poll_timeout(),
        }
    }
}

impl Default for ConfirmationsConfig {
    fn default() -> Self {
        Self {
            max_pending: default_max_pending(),
            ttl: default_ttl(),
            cleanup_delay: default_cleanup_delay(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            file: None,
        }
    }
}

fn duration(field: &'static str, value: &str) -> ConfigResult<Duration> {
    humantime::parse_duration(value.trim()).map_err(|_| ConfigError::Invalid {
        field,
        value: value.to_string(),
    })
}

/// `Some(value)` unless blank
fn non_blank(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

impl SurfwatchConfig {
    /// Create a configuration with the given store path and defaults elsewhere
    pub fn new(store_path: PathBuf) -> Self {
        Self {
            storage: StorageConfig { path: store_path },
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;
        write_file(path, &contents)
    }

    /// Override file values with the process environment
    pub fn apply_env_vars(&mut self) -> ConfigResult<()> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Override file values from `lookup` (blank values are ignored)
    pub fn apply_env<L>(&mut self, lookup: L) -> ConfigResult<()>
    where
        L: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = get("BOT_TOKEN") {
            self.telegram.bot_token = Some(token);
        }
        if let Some(api_id) = get("API_ID") {
            let parsed = api_id.trim().parse().map_err(|_| ConfigError::Invalid {
                field: "API_ID",
                value: api_id.clone(),
            })?;
            self.protocol.api_id = Some(parsed);
        }
        if let Some(api_hash) = get("API_HASH") {
            self.protocol.api_hash = Some(api_hash);
        }
        if let Some(url) = get("BRIDGE_URL") {
            self.protocol.bridge_url = url;
        }
        if let Some(destination) = get("RELAY_DESTINATION").or_else(|| get("BOT_USERNAME")) {
            self.relay.destination = Some(destination);
        }
        if let Some(phone) = get("SERVICE_PHONE") {
            self.relay.service_phone = Some(phone);
        }
        if let Some(url) = get("GEMINI_URL") {
            self.classifier.endpoint = Some(url);
        }
        if let Some(path) = get("STORE_PATH") {
            self.storage.path = PathBuf::from(path);
        }
        if let Some(level) = get("LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    pub fn bot_token(&self) -> ConfigResult<&str> {
        non_blank(self.telegram.bot_token.as_ref())
            .ok_or(ConfigError::Missing("telegram.bot_token (BOT_TOKEN)"))
    }

    pub fn api_credentials(&self) -> ConfigResult<ApiCredentials> {
        let api_id = self
            .protocol
            .api_id
            .ok_or(ConfigError::Missing("protocol.api_id (API_ID)"))?;
        let api_hash = non_blank(self.protocol.api_hash.as_ref())
            .ok_or(ConfigError::Missing("protocol.api_hash (API_HASH)"))?;
        Ok(ApiCredentials {
            api_id,
            api_hash: api_hash.to_string(),
        })
    }

    pub fn destination(&self) -> ConfigResult<Destination> {
        non_blank(self.relay.destination.as_ref())
            .map(|d| Destination(d.to_string()))
            .ok_or(ConfigError::Missing("relay.destination (RELAY_DESTINATION)"))
    }

    pub fn classifier_endpoint(&self) -> ConfigResult<&str> {
        non_blank(self.classifier.endpoint.as_ref())
            .ok_or(ConfigError::Missing("classifier.endpoint (GEMINI_URL)"))
    }

    pub fn timeouts(&self) -> ConfigResult<Timeouts> {
        Ok(Timeouts {
            login_code: duration("timeouts.login_code", &self.timeouts.login_code)?,
            sign_in: duration("timeouts.sign_in", &self.timeouts.sign_in)?,
            classify: duration("timeouts.classify", &self.timeouts.classify)?,
            forward: duration("timeouts.forward", &self.timeouts.forward)?,
            send: duration("timeouts.send", &self.timeouts.send)?,
            connect: duration("timeouts.connect", &self.timeouts.connect)?,
            get_me: duration("timeouts.get_me", &self.timeouts.get_me)?,
            poll: duration("timeouts.poll", &self.timeouts.poll)?,
        })
    }

    pub fn confirmation_limits(&self) -> ConfigResult<ConfirmationLimits> {
        if self.confirmations.max_pending == 0 {
            return Err(ConfigError::Invalid {
                field: "confirmations.max_pending",
                value: "0".to_string(),
            });
        }
        Ok(ConfirmationLimits {
            max_pending: self.confirmations.max_pending,
            ttl: duration("confirmations.ttl", &self.confirmations.ttl)?,
        })
    }

    /// HTTP timeout for requests to the bridge sidecar
    pub fn bridge_request_timeout(&self) -> ConfigResult<Duration> {
        duration("protocol.request_timeout", &self.protocol.request_timeout)
    }

    /// Everything the relay service needs, validated
    pub fn service_settings(&self) -> ConfigResult<ServiceSettings> {
        let mut settings = ServiceSettings::new(self.api_credentials()?, self.destination()?);
        settings.service_phone = non_blank(self.relay.service_phone.as_ref()).map(String::from);
        settings.require_relayed_origin = self.relay.require_relayed_origin;
        settings.poll_interval = duration("protocol.poll_interval", &self.protocol.poll_interval)?;
        settings.timeouts = self.timeouts()?;
        settings.confirmations = self.confirmation_limits()?;
        settings.cleanup_delay =
            duration("confirmations.cleanup_delay", &self.confirmations.cleanup_delay)?;
        settings.connect_policy = RetryPolicy::CONNECT;
        Ok(settings)
    }

    /// Generate default configuration content as a string with comments
    pub fn generate_default_toml(store_path: &Path) -> String {
        format!(
            r#"# surfwatch configuration
#
# Secrets may be left out here and supplied through the environment instead
# (BOT_TOKEN, API_ID, API_HASH, GEMINI_URL, ...). Environment values win.

[telegram]
# Bot API token from @BotFather
# bot_token = "123456:ABC..."

[protocol]
# Application credentials from my.telegram.org
# api_id = 123456
# api_hash = "0123456789abcdef0123456789abcdef"

# MTProto bridge sidecar
bridge_url = "{bridge_url}"

# How often the listening session polls for new messages
poll_interval = "1s"

# Upper bound on any single request to the bridge
request_timeout = "60s"

[relay]
# Where approved messages are forwarded (@username or numeric chat id)
# destination = "@surfstudent_bot"

# Phone of the account whose session listens for candidate messages
# service_phone = "+79990000000"

# Messages must mention one of these before the classifier is asked
keywords = ["серф", "сёрф", "surf"]

# Only send templates to senders this bot actually relayed
require_relayed_origin = true

[classifier]
# Endpoint of the generative-language model (key included)
# endpoint = "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent?key=..."

# Prompt override; {{message}} is replaced with the candidate text
# prompt = "..."

[storage]
# Directory holding one JSON document per user
path = "{store_path}"

[timeouts]
login_code = "30s"
sign_in = "30s"
classify = "20s"
forward = "15s"
send = "15s"
connect = "15s"
get_me = "15s"
poll = "30s"

[confirmations]
# Pending 👍/👎 prompts kept per operator, and how long they stay valid
max_pending = 50
ttl = "24h"

# Delay before forwarded originals and answered prompts are deleted
cleanup_delay = "1s"

[logging]
# Log level: trace, debug, info, warn, error (RUST_LOG overrides)
level = "info"

# Log file path (optional, logs to stderr if not specified)
# file = "/var/log/surfwatch/surfwatch.log"
"#,
            bridge_url = DEFAULT_BRIDGE_URL,
            store_path = store_path.display()
        )
    }

    /// Create and save a default configuration file
    pub fn create_default(config_path: &Path, store_path: &Path) -> ConfigResult<()> {
        write_file(config_path, &Self::generate_default_toml(store_path))
    }
}

/// Config path from `--config`, else the default one next to the store
pub fn config_path_or_default(config_path: Option<String>) -> PathBuf {
    config_path
        .map(PathBuf::from)
        .unwrap_or_else(|| default_config_path(&default_store_path()))
}

/// Load the file at `path` (defaults when it does not exist), then apply
/// environment overrides
pub fn load_with_env(path: &Path) -> ConfigResult<SurfwatchConfig> {
    let mut config = if path.exists() {
        SurfwatchConfig::load(path)?
    } else {
        SurfwatchConfig::default()
    };
    config.apply_env_vars()?;
    Ok(config)
}

fn write_file(path: &Path, contents: &str) -> ConfigResult<()> {
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
    }
    fs::write(path, contents).map_err(write_err)
}

/// Config file adjacent to the store directory:
/// - Store: ~/.local/share/surfwatch/store/
/// - Config: ~/.local/share/surfwatch/config.toml
pub fn default_config_path(store_path: &Path) -> PathBuf {
    store_path
        .parent()
        .unwrap_or(store_path)
        .join("config.toml")
}

/// Get the default store path
pub fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("surfwatch")
        .join("store")
}
