//! Login Handshake
//!
//! Drives `request code → verify code → persist session` for one identity on
//! top of the [`SessionRegistry`]. Conversation state (which step the user
//! is on, the pending phone and code hash) belongs to the caller; this type
//! is stateless apart from its collaborators.
//!
//! Input formats:
//! - phone: `+` followed by exactly 11 ASCII digits
//! - code: five single digits separated by single spaces (`1 2 3 4 5`)

use super::registry::SessionRegistry;
use super::retry::{bounded, Timeouts};
use super::traits::{ApiCredentials, Profile, ProtocolClient, ProtocolError, ProtocolFactory};
use crate::identity::{fingerprint, mask_phone, Role, UserId};
use std::sync::Arc;
use tracing::{debug, info, warn};

const PHONE_DIGITS: usize = 11;
const CODE_DIGITS: usize = 5;

/// Login handshake errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid phone format")]
    InvalidPhone,

    #[error("Invalid code format")]
    InvalidCodeFormat,

    /// Connect/RPC failure, including a rejected or stale code hash
    #[error("Transport error: {0}")]
    Transport(#[from] ProtocolError),
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Outcome of a successful sign-in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    pub profile: Profile,
    pub role: Role,
}

/// `true` iff `phone` is `+` followed by exactly eleven ASCII digits
pub fn validate_phone(phone: &str) -> bool {
    match phone.strip_prefix('+') {
        Some(digits) => digits.len() == PHONE_DIGITS && digits.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// Turn `d d d d d` into `ddddd`; `None` for any other shape
pub fn normalize_code(code: &str) -> Option<String> {
    let bytes = code.as_bytes();
    if bytes.len() != CODE_DIGITS * 2 - 1 {
        return None;
    }

    let mut digits = String::with_capacity(CODE_DIGITS);
    for (i, b) in bytes.iter().enumerate() {
        if i % 2 == 0 {
            if !b.is_ascii_digit() {
                return None;
            }
            digits.push(*b as char);
        } else if *b != b' ' {
            return None;
        }
    }
    Some(digits)
}

pub struct AuthOrchestrator<F: ProtocolFactory> {
    registry: Arc<SessionRegistry<F>>,
    api: ApiCredentials,
    service_phone: Option<String>,
    timeouts: Timeouts,
}

impl<F: ProtocolFactory> AuthOrchestrator<F> {
    pub fn new(
        registry: Arc<SessionRegistry<F>>,
        api: ApiCredentials,
        service_phone: Option<String>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            registry,
            api,
            service_phone,
            timeouts,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry<F>> {
        &self.registry
    }

    /// Ask the network for a login code.
    ///
    /// Returns the code hash the caller must hand back to
    /// [`AuthOrchestrator::verify_code`]. Malformed phones never reach the
    /// transport; an unconnected session is a transport error, not retried.
    pub async fn request_code(&self, identity: UserId, phone: &str) -> AuthResult<String> {
        if !validate_phone(phone) {
            return Err(AuthError::InvalidPhone);
        }

        let session = self.registry.get_or_create(identity).await;
        if !session.is_connected() {
            return Err(ProtocolError::NotConnected.into());
        }

        let hash = bounded(
            self.timeouts.login_code,
            "request_login_code",
            session.client().request_login_code(&self.api, phone),
        )
        .await
        .map_err(|e| {
            warn!(user = %identity, phone = %mask_phone(phone), error = %e, "login code request failed");
            AuthError::from(e)
        })?;

        info!(
            user = %identity,
            phone = %mask_phone(phone),
            hash = %fingerprint(&hash),
            "login code requested"
        );
        Ok(hash)
    }

    /// Submit the code the user typed, against the hash that produced it.
    ///
    /// On success the role is resolved and stored on the session, and the
    /// session token is persisted. On failure nothing is changed.
    pub async fn verify_code(
        &self,
        identity: UserId,
        phone: &str,
        code: &str,
        phone_code_hash: &str,
    ) -> AuthResult<Authenticated> {
        let code = normalize_code(code).ok_or(AuthError::InvalidCodeFormat)?;

        let session = self.registry.get_or_create(identity).await;
        if !session.is_connected() {
            return Err(ProtocolError::NotConnected.into());
        }

        let profile = bounded(
            self.timeouts.sign_in,
            "sign_in",
            session.client().sign_in(phone, &code, phone_code_hash),
        )
        .await
        .map_err(|e| {
            warn!(
                user = %identity,
                hash = %fingerprint(phone_code_hash),
                error = %e,
                "sign-in failed"
            );
            AuthError::from(e)
        })?;

        let role = self.role_for(&profile);
        session.set_role(role);
        session.persist_token().await;

        info!(user = %identity, role = %role, "signed in");
        Ok(Authenticated { profile, role })
    }

    /// Whether the identity's session is authorized. Never fails: any
    /// transport error reads as `false`.
    pub async fn is_authenticated(&self, identity: UserId) -> bool {
        self.get_identity_profile(identity).await.is_some()
    }

    /// Self-description of the identity's account, `None` on any error
    /// (a stalled lookup counts as one after `timeouts.get_me`)
    pub async fn get_identity_profile(&self, identity: UserId) -> Option<Profile> {
        let session = self.registry.get_or_create(identity).await;
        if !session.is_connected() {
            return None;
        }

        let profile = bounded(self.timeouts.get_me, "get_me", session.client().get_me()).await;
        session.sync_token().await;
        match profile {
            Ok(profile) => Some(profile),
            Err(e) => {
                debug!(user = %identity, error = %e, "profile lookup failed");
                None
            }
        }
    }

    /// Re-derive the role of an already-authorized session (after restart).
    /// `None` when the session is not authorized.
    pub async fn resolve_role(&self, identity: UserId) -> Option<Role> {
        let profile = self.get_identity_profile(identity).await?;
        let role = self.role_for(&profile);
        if let Some(session) = self.registry.get(identity) {
            session.set_role(role);
        }
        Some(role)
    }

    fn role_for(&self, profile: &Profile) -> Role {
        Role::resolve(profile.phone.as_deref(), self.service_phone.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{MemoryDocumentStore, PreferenceStore};
    use crate::protocol::mock::MockProtocolFactory;
    use crate::protocol::retry::RetryPolicy;
    use std::time::Duration;

    struct Harness {
        factory: MockProtocolFactory,
        backend: MemoryDocumentStore,
        auth: AuthOrchestrator<MockProtocolFactory>,
    }

    fn harness() -> Harness {
        let factory = MockProtocolFactory::new();
        let backend = MemoryDocumentStore::new();
        let registry = SessionRegistry::new(
            factory.clone(),
            PreferenceStore::new(Arc::new(backend.clone())),
        )
        .with_connect_policy(RetryPolicy {
            max_retries: 1,
            base_delay: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
        });
        let auth = AuthOrchestrator::new(
            Arc::new(registry),
            ApiCredentials {
                api_id: 1,
                api_hash: "hash".to_string(),
            },
            Some("+79991234567".to_string()),
            Timeouts::default(),
        );
        Harness {
            factory,
            backend,
            auth,
        }
    }

    #[test]
    fn test_validate_phone() {
        assert!(validate_phone("+79991234567"));
        assert!(!validate_phone("79991234567"));
        assert!(!validate_phone("+7999123456"));
        assert!(!validate_phone("+799912345678"));
        assert!(!validate_phone("+7999123456a"));
        assert!(!validate_phone("+7 999 123 45 67"));
        assert!(!validate_phone("+٧٩٩٩١٢٣٤٥٦٧"));
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("1 2 3 4 5").as_deref(), Some("12345"));
        assert_eq!(normalize_code("12345"), None);
        assert_eq!(normalize_code("1 2 3 4"), None);
        assert_eq!(normalize_code("1  2 3 4 5"), None);
        assert_eq!(normalize_code(" 1 2 3 4 5"), None);
        assert_eq!(normalize_code("1 2 3 4 a"), None);
    }

    #[tokio::test]
    async fn test_invalid_phone_never_reaches_transport() {
        let h = harness();
        let result = h.auth.request_code(UserId(1), "89991234567").await;

        assert_eq!(result, Err(AuthError::InvalidPhone));
        assert!(h.factory.client(UserId(1)).code_requests().is_empty());
    }

    #[tokio::test]
    async fn test_request_code_on_unconnected_session_is_transport_error() {
        let h = harness();
        h.factory.client(UserId(1)).fail_connects(10);

        let result = h.auth.request_code(UserId(1), "+79991234567").await;
        assert_eq!(
            result,
            Err(AuthError::Transport(ProtocolError::NotConnected))
        );
    }

    #[tokio::test]
    async fn test_login_persists_token_and_resolves_role() {
        let h = harness();

        let hash = h.auth.request_code(UserId(1), "+79991234567").await.unwrap();
        let result = h
            .auth
            .verify_code(UserId(1), "+79991234567", "1 2 3 4 5", &hash)
            .await
            .unwrap();

        assert_eq!(result.role, Role::Service);
        let call = &h.factory.client(UserId(1)).sign_in_calls()[0];
        assert_eq!(call.code, "12345");
        assert_eq!(call.phone_code_hash, hash);
        assert_eq!(
            h.backend.document("1"),
            Some(serde_json::json!({"session": "session-1000"}))
        );
        assert!(h.auth.is_authenticated(UserId(1)).await);
    }

    #[tokio::test]
    async fn test_stale_hash_rejected() {
        let h = harness();

        let stale = h.auth.request_code(UserId(1), "+79991234567").await.unwrap();
        let _fresh = h.auth.request_code(UserId(1), "+79991234567").await.unwrap();

        let result = h
            .auth
            .verify_code(UserId(1), "+79991234567", "1 2 3 4 5", &stale)
            .await;
        assert_eq!(
            result,
            Err(AuthError::Transport(ProtocolError::PhoneCodeInvalid))
        );
        assert!(!h.auth.is_authenticated(UserId(1)).await);
        assert_eq!(h.backend.writes(), 0);
    }

    #[tokio::test]
    async fn test_bad_code_format_not_submitted() {
        let h = harness();
        let hash = h.auth.request_code(UserId(1), "+79991234567").await.unwrap();

        let result = h
            .auth
            .verify_code(UserId(1), "+79991234567", "12345", &hash)
            .await;
        assert_eq!(result, Err(AuthError::InvalidCodeFormat));
        assert!(h.factory.client(UserId(1)).sign_in_calls().is_empty());
    }

    #[tokio::test]
    async fn test_is_authenticated_false_on_transport_error() {
        let h = harness();
        h.factory
            .client(UserId(1))
            .fail_get_me(ProtocolError::Network("reset".to_string()));

        assert!(!h.auth.is_authenticated(UserId(1)).await);
        assert_eq!(h.auth.get_identity_profile(UserId(1)).await, None);
    }

    #[tokio::test]
    async fn test_request_code_times_out() {
        let factory = MockProtocolFactory::new();
        let registry = SessionRegistry::new(
            factory.clone(),
            PreferenceStore::new(Arc::new(MemoryDocumentStore::new())),
        );
        let auth = AuthOrchestrator::new(
            Arc::new(registry),
            ApiCredentials {
                api_id: 1,
                api_hash: "hash".to_string(),
            },
            None,
            Timeouts {
                login_code: Duration::from_millis(10),
                ..Timeouts::default()
            },
        );
        factory
            .client(UserId(1))
            .set_response_delay(Duration::from_secs(5));

        let result = auth.request_code(UserId(1), "+79991234567").await;
        assert!(matches!(
            result,
            Err(AuthError::Transport(ProtocolError::Timeout(_)))
        ));
    }

    #[tokio::test]
    async fn test_user_role_for_other_phone() {
        let h = harness();
        h.factory.client(UserId(2)).set_login_profile(Profile {
            id: 2000,
            phone: Some("79990000000".to_string()),
            username: None,
            first_name: "Anna".to_string(),
        });

        let hash = h.auth.request_code(UserId(2), "+79990000000").await.unwrap();
        let result = h
            .auth
            .verify_code(UserId(2), "+79990000000", "1 2 3 4 5", &hash)
            .await
            .unwrap();
        assert_eq!(result.role, Role::User);
        assert_eq!(
            h.auth.registry().get(UserId(2)).unwrap().role(),
            Some(Role::User)
        );
    }

    #[tokio::test]
    async fn test_stalled_profile_lookup_reads_as_unauthenticated() {
        let factory = MockProtocolFactory::new();
        let registry = SessionRegistry::new(
            factory.clone(),
            PreferenceStore::new(Arc::new(MemoryDocumentStore::new())),
        );
        let auth = AuthOrchestrator::new(
            Arc::new(registry),
            ApiCredentials {
                api_id: 1,
                api_hash: "hash".to_string(),
            },
            None,
            Timeouts {
                get_me: Duration::from_millis(20),
                ..Timeouts::default()
            },
        );
        factory.client(UserId(1)).stall_get_me(Duration::from_secs(3600));

        let authenticated =
            tokio::time::timeout(Duration::from_secs(2), auth.is_authenticated(UserId(1)))
                .await
                .expect("profile lookup must be bounded");
        assert!(!authenticated);
        assert_eq!(auth.resolve_role(UserId(1)).await, None);
    }
}
