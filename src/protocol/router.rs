//! Role Router
//!
//! Activates the behavior matching an authenticated session's role:
//! - `Service`: a triage relay task is spawned on the session
//! - `User`: the session is registered as that identity's reply sender
//!
//! Activation is idempotent per session (see
//! [`ProtocolSession::mark_activated`]); a second call never spawns a second
//! relay or replaces the sender.

use super::registry::SharedSession;
use super::retry::{bounded, Timeouts};
use super::traits::{ProtocolClient, ProtocolError, ProtocolFactory, ProtocolResult};
use crate::identity::{Role, UserId};
use crate::triage::TriageRelay;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Result of [`RoleRouter::activate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Activation {
    pub role: Role,
    /// `false` when the session had already been activated
    pub fresh: bool,
}

impl Activation {
    /// Human-readable status for the operator
    pub fn status(&self) -> &'static str {
        match self.role {
            Role::Service => "New messages listening ...",
            Role::User => "Ready to send replies from your account",
        }
    }
}

pub struct RoleRouter<F: ProtocolFactory> {
    relay: Arc<TriageRelay>,
    poll_interval: Duration,
    send_timeout: Duration,
    senders: Mutex<HashMap<UserId, SharedSession<F>>>,
    relays: Mutex<HashMap<UserId, JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl<F: ProtocolFactory> RoleRouter<F> {
    pub fn new(relay: Arc<TriageRelay>, poll_interval: Duration, timeouts: Timeouts) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            relay,
            poll_interval,
            send_timeout: timeouts.send,
            senders: Mutex::new(HashMap::new()),
            relays: Mutex::new(HashMap::new()),
            shutdown_tx,
        }
    }

    /// Activate `session` in `role`. Safe to call repeatedly.
    pub fn activate(&self, session: SharedSession<F>, role: Role) -> Activation {
        session.set_role(role);

        if !session.mark_activated() {
            return Activation { role, fresh: false };
        }

        let identity = session.identity();
        match role {
            Role::Service => {
                let rx = self.shutdown_tx.subscribe();
                let handle = tokio::spawn(Arc::clone(&self.relay).run(
                    session,
                    self.poll_interval,
                    rx,
                ));
                self.relays
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(identity, handle);
                info!(user = %identity, "service session activated");
            }
            Role::User => {
                self.senders
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(identity, session);
                info!(user = %identity, "user session registered as sender");
            }
        }

        Activation { role, fresh: true }
    }

    /// User-role session registered for `identity`
    pub fn get_sender(&self, identity: UserId) -> Option<SharedSession<F>> {
        self.senders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&identity)
            .cloned()
    }

    /// Send `text` to `recipient` through `identity`'s user-role session
    pub async fn send_as(&self, identity: UserId, recipient: i64, text: &str) -> ProtocolResult<()> {
        let sender = self.get_sender(identity).ok_or(ProtocolError::NotConnected)?;
        if !sender.is_connected() {
            return Err(ProtocolError::NotConnected);
        }

        let sent = bounded(
            self.send_timeout,
            "send_message",
            sender.client().send_message(recipient, text),
        )
        .await;
        sender.sync_token().await;
        sent
    }

    /// Number of running relay tasks
    pub fn active_relays(&self) -> usize {
        self.relays
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Stop every relay task and wait for them to finish
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<(UserId, JoinHandle<()>)> = self
            .relays
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();

        for (identity, handle) in handles {
            if let Err(e) = handle.await {
                warn!(user = %identity, error = %e, "relay task ended abnormally");
            }
        }
    }
}
