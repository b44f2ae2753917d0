//! Messaging-Protocol Session Layer
//!
//! One long-lived protocol client per front-end user:
//! - `registry`: identity → session map, lazy creation, reconnect on demand
//! - `auth`: phone → code → session login handshake
//! - `router`: service sessions feed the triage relay, user sessions send replies
//!
//! The transport itself is behind [`ProtocolClient`]; production uses the
//! HTTP [`bridge`], tests use [`mock`].

pub mod auth;
pub mod bridge;
pub mod mock;
pub mod registry;
pub mod retry;
pub mod router;
pub mod session;
pub mod traits;

#[cfg(test)]
mod proptests;

pub use auth::{AuthError, AuthOrchestrator, AuthResult, Authenticated};
pub use bridge::{BridgeClient, BridgeFactory};
pub use mock::{MockProtocolClient, MockProtocolFactory};
pub use registry::{SessionRegistry, SharedSession};
pub use retry::{RetryPolicy, Timeouts};
pub use router::{Activation, RoleRouter};
pub use session::ProtocolSession;
pub use traits::{
    ApiCredentials, Destination, InboundMessage, Peer, Profile, ProtocolClient, ProtocolError,
    ProtocolFactory, ProtocolResult, SessionToken,
};
