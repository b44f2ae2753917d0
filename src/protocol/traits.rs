//! Messaging-Protocol Client Trait Abstractions
//!
//! The protocol transport (MTProto) is an external collaborator. These traits
//! are the whole surface the bot needs from it, which lets every flow run
//! against `MockProtocolClient` in tests.

use crate::identity::UserId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Application credentials issued by the messaging network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiCredentials {
    pub api_id: i32,
    pub api_hash: String,
}

/// Serialized session of one protocol client (opaque to the bot)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(pub String);

impl SessionToken {
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Source or target of a message on the messaging network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Peer {
    /// One-to-one conversation with a user
    User(i64),
    /// Basic group chat
    Group(i64),
    /// Channel or supergroup
    Channel(i64),
}

impl Peer {
    /// One-to-one conversations are never relay candidates
    pub fn is_private(&self) -> bool {
        matches!(self, Peer::User(_))
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Peer::User(id) => write!(f, "user:{}", id),
            Peer::Group(id) => write!(f, "group:{}", id),
            Peer::Channel(id) => write!(f, "channel:{}", id),
        }
    }
}

/// Relay destination: a `@username` or a numeric channel id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Destination(pub String);

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message observed by a protocol session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: i32,
    pub peer: Peer,
    /// Author of the message, when the network discloses it
    pub sender: Option<i64>,
    pub text: Option<String>,
}

impl InboundMessage {
    pub fn is_private(&self) -> bool {
        self.peer.is_private()
    }
}

/// Self-description of an authenticated account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: i64,
    pub phone: Option<String>,
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: String,
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Protocol client errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Client is not connected")]
    NotConnected,

    /// Wrong code, or a code hash that is not the most recently issued one
    #[error("Phone code invalid or expired")]
    PhoneCodeInvalid,

    #[error("Session is not authorized")]
    Unauthorized,

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),
}

/// One protocol connection for one identity
///
/// Implementations are cheap to clone (shared inner state) and must be
/// usable from several tasks at once.
#[async_trait]
pub trait ProtocolClient: Clone + Send + Sync + 'static {
    /// Open the network connection (no-op when already connected)
    async fn connect(&self) -> ProtocolResult<()>;

    /// Close the network connection
    async fn disconnect(&self) -> ProtocolResult<()>;

    fn is_connected(&self) -> bool;

    /// Ask the network to send a one-time login code to `phone`.
    ///
    /// Returns the correlation hash that must accompany the code in
    /// [`ProtocolClient::sign_in`].
    async fn request_login_code(
        &self,
        api: &ApiCredentials,
        phone: &str,
    ) -> ProtocolResult<String>;

    /// Complete the login handshake
    async fn sign_in(
        &self,
        phone: &str,
        code: &str,
        phone_code_hash: &str,
    ) -> ProtocolResult<Profile>;

    /// "Who am I" for the current session
    async fn get_me(&self) -> ProtocolResult<Profile>;

    /// Drain messages received since the previous call
    async fn receive_messages(&self) -> ProtocolResult<Vec<InboundMessage>>;

    /// Forward `message_id` from `from` to `to`, keeping attribution when
    /// the network allows it
    async fn forward_message(
        &self,
        from: &Peer,
        message_id: i32,
        to: &Destination,
    ) -> ProtocolResult<()>;

    /// Send a direct text message to a user
    async fn send_message(&self, user_id: i64, text: &str) -> ProtocolResult<()>;

    /// Current serialized session (changes after login and token rotation)
    fn session_token(&self) -> SessionToken;
}

/// Builds protocol clients for identities
///
/// The registry owns the resulting clients; the factory only knows how to
/// construct one from a stored token.
pub trait ProtocolFactory: Send + Sync + 'static {
    type Client: ProtocolClient;

    fn create(&self, identity: UserId, token: SessionToken) -> Self::Client;
}
