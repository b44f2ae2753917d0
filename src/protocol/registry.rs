//! Session Registry
//!
//! Sole owner of the identity → [`ProtocolSession`] map. Sessions are created
//! lazily on first reference, hydrated from stored tokens and kept for the
//! lifetime of the process (no eviction).
//!
//! Every session writes its own token back to the store whenever the client
//! reports a rotated one ([`ProtocolSession::sync_token`]); the registry
//! syncs after each connect and once more at shutdown.

use super::retry::{always_retry, bounded, retry_with_backoff, RetryPolicy, Timeouts};
use super::session::ProtocolSession;
use super::traits::{ProtocolClient, ProtocolFactory, SessionToken};
use crate::identity::UserId;
use crate::persistence::PreferenceStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use std::time::Duration;
use tracing::{debug, info, warn};

pub type SharedSession<F> = Arc<ProtocolSession<<F as ProtocolFactory>::Client>>;

pub struct SessionRegistry<F: ProtocolFactory> {
    factory: F,
    preferences: PreferenceStore,
    sessions: Mutex<HashMap<UserId, SharedSession<F>>>,
    /// Tokens loaded from the store, keyed by identity. Loaded once.
    stored_tokens: OnceCell<Mutex<HashMap<UserId, SessionToken>>>,
    connect_policy: RetryPolicy,
    connect_timeout: Duration,
}

impl<F: ProtocolFactory> SessionRegistry<F> {
    pub fn new(factory: F, preferences: PreferenceStore) -> Self {
        Self {
            factory,
            preferences,
            sessions: Mutex::new(HashMap::new()),
            stored_tokens: OnceCell::new(),
            connect_policy: RetryPolicy::CONNECT,
            connect_timeout: Timeouts::default().connect,
        }
    }

    /// Bound each connect and disconnect attempt by `timeouts.connect`
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.connect_timeout = timeouts.connect;
        self
    }

    pub fn with_connect_policy(mut self, policy: RetryPolicy) -> Self {
        self.connect_policy = policy;
        self
    }

    pub fn preferences(&self) -> &PreferenceStore {
        &self.preferences
    }

    /// Load stored session tokens and return the identities that have one.
    ///
    /// A store read failure degrades to "no prior sessions".
    pub async fn hydrate(&self) -> Vec<UserId> {
        let tokens = self.stored_tokens().await;
        let mut identities: Vec<UserId> = tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, token)| !token.is_empty())
            .map(|(id, _)| *id)
            .collect();
        identities.sort();
        identities
    }

    /// Session for `identity`, created and registered on first call.
    ///
    /// The session is connected before return when possible: connect is
    /// retried once, and a persistent failure is logged, not returned.
    /// Callers must check [`ProtocolSession::is_connected`]. A token rotated
    /// by the connect is persisted before return.
    pub async fn get_or_create(&self, identity: UserId) -> SharedSession<F> {
        let existing = self.get(identity);
        let session = match existing {
            Some(session) => session,
            None => {
                let token = self.take_stored_token(identity).await;
                let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
                sessions
                    .entry(identity)
                    .or_insert_with(|| {
                        debug!(
                            user = %identity,
                            hydrated = !token.is_empty(),
                            "creating protocol session"
                        );
                        let client = self.factory.create(identity, token.clone());
                        Arc::new(
                            ProtocolSession::new(identity, client)
                                .with_token_store(self.preferences.clone(), token),
                        )
                    })
                    .clone()
            }
        };

        self.ensure_connected(&session).await;
        session.sync_token().await;
        session
    }

    /// Session for `identity` if one was already created
    pub fn get(&self, identity: UserId) -> Option<SharedSession<F>> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&identity)
            .cloned()
    }

    /// Identities with a live session object
    pub fn identities(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect();
        ids.sort();
        ids
    }

    /// Persist every live session's token. Returns how many were written.
    pub async fn persist_tokens(&self) -> usize {
        let mut written = 0;
        for session in self.snapshot() {
            if session.persist_token().await {
                written += 1;
            }
        }
        written
    }

    /// Disconnect every session (graceful shutdown)
    pub async fn disconnect_all(&self) {
        for session in self.snapshot() {
            let disconnect = session.client().disconnect();
            if let Err(e) = bounded(self.connect_timeout, "disconnect", disconnect).await {
                warn!(user = %session.identity(), error = %e, "disconnect failed");
            }
        }
        info!("all protocol sessions disconnected");
    }

    fn snapshot(&self) -> Vec<SharedSession<F>> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    async fn ensure_connected(&self, session: &ProtocolSession<F::Client>) {
        if session.is_connected() {
            return;
        }

        let client = session.client().clone();
        let limit = self.connect_timeout;
        let result = retry_with_backoff(
            self.connect_policy,
            move || {
                let client = client.clone();
                async move { bounded(limit, "connect", client.connect()).await }
            },
            always_retry,
        )
        .await;

        if let Err(e) = result {
            warn!(user = %session.identity(), error = %e, "protocol session failed to connect");
        }
    }

    async fn stored_tokens(&self) -> &Mutex<HashMap<UserId, SessionToken>> {
        self.stored_tokens
            .get_or_init(|| async {
                let tokens = match self.preferences.session_tokens().await {
                    Ok(tokens) => tokens,
                    Err(e) => {
                        warn!(error = %e, "could not load stored sessions, starting without them");
                        HashMap::new()
                    }
                };
                Mutex::new(tokens)
            })
            .await
    }

    /// Stored token for `identity`; records an empty entry on miss
    async fn take_stored_token(&self, identity: UserId) -> SessionToken {
        let tokens = self.stored_tokens().await;
        let mut tokens = tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.entry(identity).or_default().clone()
    }
}
