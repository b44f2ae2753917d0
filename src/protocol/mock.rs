//! Mock Protocol Client for Testing
//!
//! Provides MockProtocolClient / MockProtocolFactory so the registry, login
//! handshake, relay and reply workflows run without a real network.
//!
//! The mock behaves like the real network where it matters for correctness:
//! every `request_login_code` issues a fresh hash and only the most recent
//! one is accepted by `sign_in`.

use super::traits::*;
use crate::identity::UserId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Code the mock network accepts unless configured otherwise
pub const DEFAULT_MOCK_CODE: &str = "12345";

/// Mock protocol client for testing
#[derive(Clone)]
pub struct MockProtocolClient {
    state: Arc<Mutex<MockState>>,
}

struct MockState {
    connected: bool,
    connect_calls: u32,
    connect_failures_remaining: u32,
    connect_error: ProtocolError,
    connect_stall: Option<Duration>,
    get_me_stall: Option<Duration>,
    /// Token the next poll rotates to
    rotate_on_poll: Option<SessionToken>,
    token: SessionToken,
    /// Account behind this session once authorized
    authorized: Option<Profile>,
    /// Account that a successful sign-in authorizes
    login_profile: Profile,
    expected_code: String,
    issued_hashes: u32,
    last_hash: Option<String>,
    code_requests: Vec<String>,
    sign_in_calls: Vec<SignInCall>,
    request_code_error: Option<ProtocolError>,
    get_me_error: Option<ProtocolError>,
    forward_error: Option<ProtocolError>,
    send_error: Option<ProtocolError>,
    response_delay: Option<Duration>,
    incoming_messages: Vec<InboundMessage>,
    forwarded: Vec<ForwardedMessage>,
    sent_messages: Vec<SentMessage>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            connected: false,
            connect_calls: 0,
            connect_failures_remaining: 0,
            connect_error: ProtocolError::Network("connection refused".to_string()),
            connect_stall: None,
            get_me_stall: None,
            rotate_on_poll: None,
            token: SessionToken::empty(),
            authorized: None,
            login_profile: Profile {
                id: 1000,
                phone: Some("79991234567".to_string()),
                username: Some("operator".to_string()),
                first_name: "Operator".to_string(),
            },
            expected_code: DEFAULT_MOCK_CODE.to_string(),
            issued_hashes: 0,
            last_hash: None,
            code_requests: Vec::new(),
            sign_in_calls: Vec::new(),
            request_code_error: None,
            get_me_error: None,
            forward_error: None,
            send_error: None,
            response_delay: None,
            incoming_messages: Vec::new(),
            forwarded: Vec::new(),
            sent_messages: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignInCall {
    pub phone: String,
    pub code: String,
    pub phone_code_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedMessage {
    pub from: Peer,
    pub message_id: i32,
    pub to: Destination,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub user_id: i64,
    pub text: String,
}

impl MockProtocolClient {
    /// Create new, unconnected, unauthorized mock client
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Create a mock client that is already authorized as `profile`
    pub fn authorized(profile: Profile) -> Self {
        let client = Self::new();
        {
            let mut state = client.state.lock().unwrap();
            state.token = SessionToken(format!("session-{}", profile.id));
            state.login_profile = profile.clone();
            state.authorized = Some(profile);
        }
        client
    }

    /// Profile authorized by a successful sign-in
    pub fn set_login_profile(&self, profile: Profile) {
        self.state.lock().unwrap().login_profile = profile;
    }

    pub fn set_expected_code(&self, code: &str) {
        self.state.lock().unwrap().expected_code = code.to_string();
    }

    /// Make the next `count` connect attempts fail
    pub fn fail_connects(&self, count: u32) {
        self.state.lock().unwrap().connect_failures_remaining = count;
    }

    /// Fail the next `count` connects with `error`
    pub fn fail_connects_with(&self, count: u32, error: ProtocolError) {
        let mut state = self.state.lock().unwrap();
        state.connect_failures_remaining = count;
        state.connect_error = error;
    }

    /// Make every `connect` hang for `delay` before answering
    pub fn stall_connect(&self, delay: Duration) {
        self.state.lock().unwrap().connect_stall = Some(delay);
    }

    /// Make every `get_me` hang for `delay` before answering
    pub fn stall_get_me(&self, delay: Duration) {
        self.state.lock().unwrap().get_me_stall = Some(delay);
    }

    /// Have the next `receive_messages` hand back a rotated session token
    pub fn rotate_token_on_poll(&self, token: SessionToken) {
        self.state.lock().unwrap().rotate_on_poll = Some(token);
    }

    pub fn fail_request_code(&self, error: ProtocolError) {
        self.state.lock().unwrap().request_code_error = Some(error);
    }

    pub fn fail_get_me(&self, error: ProtocolError) {
        self.state.lock().unwrap().get_me_error = Some(error);
    }

    pub fn fail_forward(&self, error: ProtocolError) {
        self.state.lock().unwrap().forward_error = Some(error);
    }

    pub fn fail_send(&self, error: ProtocolError) {
        self.state.lock().unwrap().send_error = Some(error);
    }

    /// Delay every network-bound response (for timeout tests)
    pub fn set_response_delay(&self, delay: Duration) {
        self.state.lock().unwrap().response_delay = Some(delay);
    }

    pub fn set_token(&self, token: SessionToken) {
        self.state.lock().unwrap().token = token;
    }

    /// Add incoming message for testing
    pub fn add_incoming_message(&self, message: InboundMessage) {
        self.state.lock().unwrap().incoming_messages.push(message);
    }

    pub fn connect_calls(&self) -> u32 {
        self.state.lock().unwrap().connect_calls
    }

    pub fn code_requests(&self) -> Vec<String> {
        self.state.lock().unwrap().code_requests.clone()
    }

    pub fn sign_in_calls(&self) -> Vec<SignInCall> {
        self.state.lock().unwrap().sign_in_calls.clone()
    }

    /// Hash issued by the most recent code request
    pub fn last_issued_hash(&self) -> Option<String> {
        self.state.lock().unwrap().last_hash.clone()
    }

    pub fn forwarded(&self) -> Vec<ForwardedMessage> {
        self.state.lock().unwrap().forwarded.clone()
    }

    /// Get sent messages for assertions
    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.state.lock().unwrap().sent_messages.clone()
    }

    fn delay(&self) -> Option<Duration> {
        self.state.lock().unwrap().response_delay
    }

    async fn simulate_latency(&self) {
        if let Some(delay) = self.delay() {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for MockProtocolClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolClient for MockProtocolClient {
    async fn connect(&self) -> ProtocolResult<()> {
        let stall = self.state.lock().unwrap().connect_stall;
        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
        }

        let mut state = self.state.lock().unwrap();
        state.connect_calls += 1;

        if state.connected {
            return Ok(());
        }

        if state.connect_failures_remaining > 0 {
            state.connect_failures_remaining -= 1;
            return Err(state.connect_error.clone());
        }

        state.connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> ProtocolResult<()> {
        self.state.lock().unwrap().connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    async fn request_login_code(
        &self,
        _api: &ApiCredentials,
        phone: &str,
    ) -> ProtocolResult<String> {
        self.simulate_latency().await;

        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return Err(ProtocolError::NotConnected);
        }
        state.code_requests.push(phone.to_string());

        if let Some(error) = state.request_code_error.clone() {
            return Err(error);
        }

        state.issued_hashes += 1;
        let hash = format!("hash-{}", state.issued_hashes);
        state.last_hash = Some(hash.clone());
        Ok(hash)
    }

    async fn sign_in(
        &self,
        phone: &str,
        code: &str,
        phone_code_hash: &str,
    ) -> ProtocolResult<Profile> {
        self.simulate_latency().await;

        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return Err(ProtocolError::NotConnected);
        }
        state.sign_in_calls.push(SignInCall {
            phone: phone.to_string(),
            code: code.to_string(),
            phone_code_hash: phone_code_hash.to_string(),
        });

        // Only the most recently issued hash is valid
        if state.last_hash.as_deref() != Some(phone_code_hash) {
            return Err(ProtocolError::PhoneCodeInvalid);
        }
        if state.expected_code != code {
            return Err(ProtocolError::PhoneCodeInvalid);
        }

        let profile = state.login_profile.clone();
        state.last_hash = None;
        state.token = SessionToken(format!("session-{}", profile.id));
        state.authorized = Some(profile.clone());
        Ok(profile)
    }

    async fn get_me(&self) -> ProtocolResult<Profile> {
        let stall = self.state.lock().unwrap().get_me_stall;
        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
        }

        let state = self.state.lock().unwrap();
        if let Some(error) = state.get_me_error.clone() {
            return Err(error);
        }
        if !state.connected {
            return Err(ProtocolError::NotConnected);
        }
        state.authorized.clone().ok_or(ProtocolError::Unauthorized)
    }

    async fn receive_messages(&self) -> ProtocolResult<Vec<InboundMessage>> {
        let mut state = self.state.lock().unwrap();
        if let Some(token) = state.rotate_on_poll.take() {
            state.token = token;
        }
        let messages = state.incoming_messages.drain(..).collect();
        Ok(messages)
    }

    async fn forward_message(
        &self,
        from: &Peer,
        message_id: i32,
        to: &Destination,
    ) -> ProtocolResult<()> {
        self.simulate_latency().await;

        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.forward_error.clone() {
            return Err(error);
        }
        state.forwarded.push(ForwardedMessage {
            from: *from,
            message_id,
            to: to.clone(),
        });
        Ok(())
    }

    async fn send_message(&self, user_id: i64, text: &str) -> ProtocolResult<()> {
        self.simulate_latency().await;

        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return Err(ProtocolError::NotConnected);
        }
        if let Some(error) = state.send_error.clone() {
            return Err(error);
        }
        state.sent_messages.push(SentMessage {
            user_id,
            text: text.to_string(),
        });
        Ok(())
    }

    fn session_token(&self) -> SessionToken {
        self.state.lock().unwrap().token.clone()
    }
}

/// Mock factory handing out one `MockProtocolClient` per identity
///
/// Tests can fetch (and pre-configure) the client of an identity with
/// [`MockProtocolFactory::client`] before or after the registry creates it.
#[derive(Clone, Default)]
pub struct MockProtocolFactory {
    clients: Arc<Mutex<HashMap<UserId, MockProtocolClient>>>,
    created: Arc<Mutex<Vec<(UserId, SessionToken)>>>,
}

impl MockProtocolFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Client for `identity`, creating an unconfigured one if needed
    pub fn client(&self, identity: UserId) -> MockProtocolClient {
        self.clients
            .lock()
            .unwrap()
            .entry(identity)
            .or_default()
            .clone()
    }

    /// Register a pre-built client for `identity`
    pub fn insert(&self, identity: UserId, client: MockProtocolClient) {
        self.clients.lock().unwrap().insert(identity, client);
    }

    /// `(identity, token)` pairs passed to `create`, in call order
    pub fn created(&self) -> Vec<(UserId, SessionToken)> {
        self.created.lock().unwrap().clone()
    }
}

impl ProtocolFactory for MockProtocolFactory {
    type Client = MockProtocolClient;

    fn create(&self, identity: UserId, token: SessionToken) -> MockProtocolClient {
        self.created.lock().unwrap().push((identity, token.clone()));

        let client = self.client(identity);
        if !token.is_empty() {
            client.set_token(token);
        }
        client
    }
}
