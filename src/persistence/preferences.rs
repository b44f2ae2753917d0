//! Per-user preference documents (`{template, session}`).

use super::{DocumentStore, StoreResult};
use crate::identity::UserId;
use crate::protocol::traits::SessionToken;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

const TEMPLATE_FIELD: &str = "template";
const SESSION_FIELD: &str = "session";

/// Typed view of one user's document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionToken>,

    /// Fields written by other tools are carried through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Preference access on top of a [`DocumentStore`]
#[derive(Clone)]
pub struct PreferenceStore {
    store: Arc<dyn DocumentStore>,
}

impl PreferenceStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Load a user's preferences, creating an empty document on first access
    pub async fn preferences(&self, user: UserId) -> StoreResult<UserPreferences> {
        let key = user.to_string();
        match self.store.get(&key).await? {
            Some(document) => Ok(serde_json::from_value(document)?),
            None => {
                self.store.put(&key, &Value::Object(Map::new())).await?;
                Ok(UserPreferences::default())
            }
        }
    }

    pub async fn template(&self, user: UserId) -> StoreResult<Option<String>> {
        Ok(self
            .preferences(user)
            .await?
            .template
            .filter(|t| !t.is_empty()))
    }

    /// Overwrite the user's template wholesale
    pub async fn save_template(&self, user: UserId, template: &str) -> StoreResult<()> {
        self.merge(user, TEMPLATE_FIELD, Value::String(template.to_string()))
            .await
    }

    /// Persist a session token, leaving other fields of the document intact
    pub async fn save_session_token(&self, user: UserId, token: &SessionToken) -> StoreResult<()> {
        self.merge(user, SESSION_FIELD, Value::String(token.as_str().to_string()))
            .await
    }

    /// Stored token for one user, if any
    pub async fn session_token(&self, user: UserId) -> StoreResult<Option<SessionToken>> {
        match self.store.get(&user.to_string()).await? {
            Some(document) => {
                let prefs: UserPreferences = serde_json::from_value(document)?;
                Ok(prefs.session.filter(|t| !t.is_empty()))
            }
            None => Ok(None),
        }
    }

    /// Every user id that has a document
    pub async fn known_users(&self) -> StoreResult<Vec<UserId>> {
        let mut users: Vec<UserId> = self
            .store
            .keys()
            .await?
            .iter()
            .filter_map(|key| key.parse().ok())
            .collect();
        users.sort();
        Ok(users)
    }

    /// Map of user id to stored session token (users without one omitted).
    ///
    /// A document that cannot be decoded is skipped with a warning rather
    /// than failing the whole scan.
    pub async fn session_tokens(&self) -> StoreResult<HashMap<UserId, SessionToken>> {
        let mut tokens = HashMap::new();
        for user in self.known_users().await? {
            match self.session_token(user).await {
                Ok(Some(token)) => {
                    tokens.insert(user, token);
                }
                Ok(None) => {}
                Err(e) => warn!(user = %user, error = %e, "skipping unreadable preference document"),
            }
        }
        Ok(tokens)
    }

    async fn merge(&self, user: UserId, field: &str, value: Value) -> StoreResult<()> {
        let key = user.to_string();
        let mut document = match self.store.get(&key).await? {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        document.insert(field.to_string(), value);
        self.store.put(&key, &Value::Object(document)).await
    }
}
