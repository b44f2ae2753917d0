//! Login handshake through the whole service: /login → phone → code.
//!
//! Uses MockProtocolFactory + MockFrontEnd, no network.

use std::sync::Arc;
use std::time::Duration;
use surfwatch::bot::messages;
use surfwatch::bot::{AuthStatus, InputMode, RelayService, ServiceSettings};
use surfwatch::frontend::{BotEvent, ChatId, MessageId, MockFrontEnd, TextEvent};
use surfwatch::identity::{Role, UserId};
use surfwatch::persistence::{MemoryDocumentStore, PreferenceStore};
use surfwatch::protocol::{
    ApiCredentials, AuthError, AuthOrchestrator, Destination, MockProtocolFactory, ProtocolError,
    SessionRegistry, SessionToken, Timeouts,
};
use surfwatch::triage::{KeywordFilter, ScriptedClassifier, Verdict};

const OPERATOR: UserId = UserId(7);

fn api() -> ApiCredentials {
    ApiCredentials {
        api_id: 1,
        api_hash: "hash".to_string(),
    }
}

struct Harness {
    factory: MockProtocolFactory,
    frontend: MockFrontEnd,
    preferences: PreferenceStore,
    service: RelayService<MockProtocolFactory>,
}

fn harness() -> Harness {
    let factory = MockProtocolFactory::new();
    let frontend = MockFrontEnd::new();
    let preferences = PreferenceStore::new(Arc::new(MemoryDocumentStore::new()));

    let mut settings = ServiceSettings::new(api(), Destination("@surfstudent_bot".to_string()));
    settings.service_phone = Some("+79990000000".to_string());
    settings.cleanup_delay = Duration::ZERO;
    settings.poll_interval = Duration::from_millis(10);

    let service = RelayService::new(
        factory.clone(),
        preferences.clone(),
        Arc::new(frontend.clone()),
        KeywordFilter::default(),
        Arc::new(ScriptedClassifier::new(Verdict::Reject)),
        settings,
    );
    Harness {
        factory,
        frontend,
        preferences,
        service,
    }
}

fn text(body: &str) -> BotEvent {
    BotEvent::Text(TextEvent {
        user: OPERATOR,
        chat: ChatId::private(OPERATOR),
        message_id: MessageId(1),
        text: body.to_string(),
        forward_origin: None,
        from_bot: false,
    })
}

async fn conversation(h: &Harness) -> (InputMode, AuthStatus) {
    let conversation = h.service.controller().conversations().conversation(OPERATOR);
    let state = conversation.lock().await;
    (state.mode.clone(), state.auth)
}

#[tokio::test]
async fn test_login_end_to_end() {
    let h = harness();

    h.service.handle(text("/login")).await;
    h.service.handle(text("+79991234567")).await;
    let client = h.factory.client(OPERATOR);
    let hash = client.last_issued_hash().expect("a code should have been requested");

    h.service.handle(text("1 2 3 4 5")).await;

    let calls = client.sign_in_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].phone, "+79991234567");
    assert_eq!(calls[0].code, "12345");
    assert_eq!(calls[0].phone_code_hash, hash);

    let texts = h.frontend.texts_to(ChatId::private(OPERATOR));
    assert_eq!(
        texts[..3],
        [
            messages::ASK_PHONE.to_string(),
            messages::ASK_CODE.to_string(),
            messages::LOGIN_SUCCESS.to_string(),
        ]
    );

    let (mode, auth) = conversation(&h).await;
    assert_eq!(mode, InputMode::Idle);
    assert_eq!(auth, AuthStatus::Authenticated(Role::User));

    // The new session token is persisted immediately
    assert_eq!(
        h.preferences.session_token(OPERATOR).await.unwrap(),
        Some(SessionToken("session-1000".to_string()))
    );
}

#[tokio::test]
async fn test_relogin_uses_latest_code_request() {
    let h = harness();

    h.service.handle(text("/login")).await;
    h.service.handle(text("+79991234567")).await;
    h.service.handle(text("/login")).await;
    h.service.handle(text("+79991234567")).await;
    h.service.handle(text("1 2 3 4 5")).await;

    let client = h.factory.client(OPERATOR);
    assert_eq!(client.code_requests().len(), 2);
    assert_eq!(client.sign_in_calls()[0].phone_code_hash, "hash-2");
    assert_eq!(
        conversation(&h).await.1,
        AuthStatus::Authenticated(Role::User)
    );
}

#[tokio::test]
async fn test_stale_code_hash_is_rejected() {
    let factory = MockProtocolFactory::new();
    let preferences = PreferenceStore::new(Arc::new(MemoryDocumentStore::new()));
    let registry = Arc::new(SessionRegistry::new(factory.clone(), preferences));
    let auth = AuthOrchestrator::new(registry, api(), None, Timeouts::default());

    let first = auth.request_code(OPERATOR, "+79991234567").await.unwrap();
    let second = auth.request_code(OPERATOR, "+79991234567").await.unwrap();
    assert_ne!(first, second);

    let stale = auth
        .verify_code(OPERATOR, "+79991234567", "1 2 3 4 5", &first)
        .await;
    assert_eq!(
        stale.unwrap_err(),
        AuthError::Transport(ProtocolError::PhoneCodeInvalid)
    );

    let fresh = auth
        .verify_code(OPERATOR, "+79991234567", "1 2 3 4 5", &second)
        .await
        .unwrap();
    assert_eq!(fresh.role, Role::User);
    assert!(auth.is_authenticated(OPERATOR).await);
}

#[tokio::test]
async fn test_service_account_login() {
    let h = harness();
    let client = h.factory.client(OPERATOR);
    client.set_login_profile(surfwatch::protocol::Profile {
        id: 1,
        phone: Some("79990000000".to_string()),
        username: Some("surf_service".to_string()),
        first_name: "Service".to_string(),
    });

    h.service.handle(text("/login")).await;
    h.service.handle(text("+79990000000")).await;
    h.service.handle(text("1 2 3 4 5")).await;

    assert_eq!(
        conversation(&h).await.1,
        AuthStatus::Authenticated(Role::Service)
    );
    assert_eq!(h.service.router().active_relays(), 1);

    h.service.shutdown().await;
    assert_eq!(h.service.router().active_relays(), 0);
}
