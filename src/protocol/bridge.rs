//! HTTP bridge to an MTProto sidecar.
//!
//! The wire protocol itself lives in a separate process that exposes one
//! logical client per identity under `/clients/{identity}/...`. Every
//! response may carry a refreshed `session` string; the bridge keeps the
//! latest one and the owning session writes it back after the call.
//!
//! Every request carries an HTTP timeout, so a stalled sidecar surfaces as
//! `ProtocolError::Network` instead of a hung task.

use super::traits::*;
use crate::identity::UserId;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::debug;

/// Protocol client talking to the sidecar over HTTP
#[derive(Clone)]
pub struct BridgeClient {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    base_url: String,
    identity: UserId,
    http: Client,
    token: RwLock<SessionToken>,
    connected: AtomicBool,
}

#[derive(Serialize)]
struct ConnectRequest<'a> {
    session: &'a str,
}

#[derive(Serialize)]
struct SendCodeRequest<'a> {
    api_id: i32,
    api_hash: &'a str,
    phone: &'a str,
}

#[derive(Deserialize)]
struct SendCodeResponse {
    phone_code_hash: String,
}

#[derive(Serialize)]
struct SignInRequest<'a> {
    phone: &'a str,
    code: &'a str,
    phone_code_hash: &'a str,
}

#[derive(Deserialize)]
struct SignInResponse {
    user: Profile,
}

#[derive(Deserialize)]
struct UpdatesResponse {
    #[serde(default)]
    messages: Vec<InboundMessage>,
}

#[derive(Serialize)]
struct ForwardRequest<'a> {
    from_peer: &'a Peer,
    message_id: i32,
    to: &'a str,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    user_id: i64,
    text: &'a str,
}

/// Fields common to every sidecar response
#[derive(Deserialize, Default)]
struct Envelope {
    #[serde(default)]
    session: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl BridgeClient {
    pub fn new(base_url: &str, identity: UserId, token: SessionToken, http: Client) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                base_url: base_url.trim_end_matches('/').to_string(),
                identity,
                http,
                token: RwLock::new(token),
                connected: AtomicBool::new(false),
            }),
        }
    }

    fn url(&self, action: &str) -> String {
        format!(
            "{}/clients/{}/{}",
            self.inner.base_url, self.inner.identity, action
        )
    }

    fn update_token(&self, session: Option<String>) {
        if let Some(session) = session.filter(|s| !s.is_empty()) {
            let mut token = self.inner.token.write().unwrap_or_else(|e| e.into_inner());
            if token.as_str() != session {
                debug!(user = %self.inner.identity, "session token rotated");
                *token = SessionToken(session);
            }
        }
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        action: &str,
        body: &B,
    ) -> ProtocolResult<T> {
        let response = self
            .inner
            .http
            .post(self.url(action))
            .json(body)
            .send()
            .await
            .map_err(network_error)?;
        self.decode(response).await
    }

    async fn get<T: DeserializeOwned>(&self, action: &str) -> ProtocolResult<T> {
        let response = self
            .inner
            .http
            .get(self.url(action))
            .send()
            .await
            .map_err(network_error)?;
        self.decode(response).await
    }

    async fn decode<T: DeserializeOwned>(&self, response: Response) -> ProtocolResult<T> {
        let status = response.status();
        let body = response.bytes().await.map_err(network_error)?;
        let envelope: Envelope = serde_json::from_slice(&body).unwrap_or_default();

        if !status.is_success() {
            if status == StatusCode::UNAUTHORIZED {
                return Err(ProtocolError::Unauthorized);
            }
            return Err(rpc_error(
                envelope
                    .error
                    .unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
            ));
        }

        self.update_token(envelope.session);
        serde_json::from_slice(&body).map_err(|e| ProtocolError::Rpc(format!("bad response: {}", e)))
    }
}

fn network_error(e: reqwest::Error) -> ProtocolError {
    ProtocolError::Network(e.to_string())
}

/// Map a sidecar error code onto the protocol taxonomy
fn rpc_error(code: String) -> ProtocolError {
    match code.as_str() {
        "PHONE_CODE_INVALID" | "PHONE_CODE_EXPIRED" | "PHONE_CODE_EMPTY" => {
            ProtocolError::PhoneCodeInvalid
        }
        "AUTH_KEY_UNREGISTERED" | "SESSION_REVOKED" | "USER_DEACTIVATED" => {
            ProtocolError::Unauthorized
        }
        "NOT_CONNECTED" => ProtocolError::NotConnected,
        _ => ProtocolError::Rpc(code),
    }
}

#[async_trait]
impl ProtocolClient for BridgeClient {
    async fn connect(&self) -> ProtocolResult<()> {
        let token = self.session_token();
        let _: Envelope = self
            .post(
                "connect",
                &ConnectRequest {
                    session: token.as_str(),
                },
            )
            .await?;
        self.inner.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn disconnect(&self) -> ProtocolResult<()> {
        self.inner.connected.store(false, Ordering::Release);
        let _: Envelope = self.post("disconnect", &serde_json::json!({})).await?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    async fn request_login_code(
        &self,
        api: &ApiCredentials,
        phone: &str,
    ) -> ProtocolResult<String> {
        let response: SendCodeResponse = self
            .post(
                "send-code",
                &SendCodeRequest {
                    api_id: api.api_id,
                    api_hash: &api.api_hash,
                    phone,
                },
            )
            .await?;
        Ok(response.phone_code_hash)
    }

    async fn sign_in(
        &self,
        phone: &str,
        code: &str,
        phone_code_hash: &str,
    ) -> ProtocolResult<Profile> {
        let response: SignInResponse = self
            .post(
                "sign-in",
                &SignInRequest {
                    phone,
                    code,
                    phone_code_hash,
                },
            )
            .await?;
        Ok(response.user)
    }

    async fn get_me(&self) -> ProtocolResult<Profile> {
        self.get("me").await
    }

    async fn receive_messages(&self) -> ProtocolResult<Vec<InboundMessage>> {
        let response: UpdatesResponse = self.get("updates").await?;
        Ok(response.messages)
    }

    async fn forward_message(
        &self,
        from: &Peer,
        message_id: i32,
        to: &Destination,
    ) -> ProtocolResult<()> {
        let _: Envelope = self
            .post(
                "forward",
                &ForwardRequest {
                    from_peer: from,
                    message_id,
                    to: &to.0,
                },
            )
            .await?;
        Ok(())
    }

    async fn send_message(&self, user_id: i64, text: &str) -> ProtocolResult<()> {
        let _: Envelope = self.post("send", &SendRequest { user_id, text }).await?;
        Ok(())
    }

    fn session_token(&self) -> SessionToken {
        self.inner
            .token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// TCP connect limit towards the sidecar
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Creates [`BridgeClient`]s sharing one HTTP connection pool
#[derive(Clone)]
pub struct BridgeFactory {
    base_url: String,
    http: Client,
}

impl BridgeFactory {
    /// Every request to the sidecar is abandoned after `request_timeout`
    pub fn new(base_url: &str, request_timeout: Duration) -> ProtocolResult<Self> {
        let http = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout.min(CONNECT_TIMEOUT))
            .build()
            .map_err(|e| ProtocolError::Network(format!("HTTP client setup failed: {}", e)))?;
        Ok(Self {
            base_url: base_url.to_string(),
            http,
        })
    }
}

impl ProtocolFactory for BridgeFactory {
    type Client = BridgeClient;

    fn create(&self, identity: UserId, token: SessionToken) -> BridgeClient {
        BridgeClient::new(&self.base_url, identity, token, self.http.clone())
    }
}
