//! One protocol connection bound to one identity.

use super::traits::{ProtocolClient, SessionToken};
use crate::identity::{fingerprint, Role, UserId};
use crate::persistence::PreferenceStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Protocol session owned by the [`SessionRegistry`](super::SessionRegistry)
///
/// Sessions are never shared between identities. The activation flag, the
/// resolved role and the last persisted token live here so that every holder
/// of the `Arc<ProtocolSession>` sees the same values.
pub struct ProtocolSession<C: ProtocolClient> {
    identity: UserId,
    client: C,
    activated: AtomicBool,
    role: Mutex<Option<Role>>,
    store: Option<PreferenceStore>,
    persisted: Mutex<SessionToken>,
}

impl<C: ProtocolClient> ProtocolSession<C> {
    pub fn new(identity: UserId, client: C) -> Self {
        Self {
            identity,
            client,
            activated: AtomicBool::new(false),
            role: Mutex::new(None),
            store: None,
            persisted: Mutex::new(SessionToken::empty()),
        }
    }

    /// Persist tokens to `store`; `persisted` is what the store already holds
    pub fn with_token_store(mut self, store: PreferenceStore, persisted: SessionToken) -> Self {
        self.store = Some(store);
        self.persisted = Mutex::new(persisted);
        self
    }

    pub fn identity(&self) -> UserId {
        self.identity
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Callers must check this before issuing RPCs on a returned session
    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    pub fn token(&self) -> SessionToken {
        self.client.session_token()
    }

    /// Write the client's current token to the store.
    ///
    /// Empty tokens are never written. A failed write is logged and reported
    /// as `false`; the next sync tries again.
    pub async fn persist_token(&self) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        let token = self.token();
        if token.is_empty() {
            return false;
        }

        match store.save_session_token(self.identity, &token).await {
            Ok(()) => {
                debug!(
                    user = %self.identity,
                    token = %fingerprint(token.as_str()),
                    "session token persisted"
                );
                *self.persisted.lock().unwrap_or_else(|e| e.into_inner()) = token;
                true
            }
            Err(e) => {
                warn!(user = %self.identity, error = %e, "failed to persist session token");
                false
            }
        }
    }

    /// Persist the token only if it rotated since the last write
    pub async fn sync_token(&self) -> bool {
        let current = self.token();
        let unchanged = *self.persisted.lock().unwrap_or_else(|e| e.into_inner()) == current;
        if unchanged || current.is_empty() {
            return false;
        }
        debug!(user = %self.identity, "session token rotated");
        self.persist_token().await
    }

    /// Claim activation. Returns `true` only for the first caller.
    pub fn mark_activated(&self) -> bool {
        self.activated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_activated(&self) -> bool {
        self.activated.load(Ordering::Acquire)
    }

    /// Role resolved at authentication time, if any
    pub fn role(&self) -> Option<Role> {
        *self.role.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_role(&self, role: Role) {
        *self.role.lock().unwrap_or_else(|e| e.into_inner()) = Some(role);
    }
}
