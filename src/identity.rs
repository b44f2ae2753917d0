//! Identities, roles and log-safe masking
//!
//! A `UserId` is the front-end account identifier and keys every piece of
//! per-user state (protocol session, conversation, stored document).
//!
//! Phone numbers are personal data. They are compared in normalized form
//! (digits only) and only ever logged through [`mask_phone`].

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Front-end user identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(UserId)
    }
}

/// Role a protocol session plays once authenticated
///
/// Resolved exactly once, at authentication (or hydration) time, and stored
/// with the session. Call sites match on the role instead of comparing phone
/// numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Message source: inbound traffic is triaged and relayed
    Service,
    /// Message sink: delivers operator-approved templates
    User,
}

impl Role {
    /// Resolve the role of an account from its profile phone.
    ///
    /// The profile phone usually comes back without the leading `+`, the
    /// configured service phone usually has one, so both sides are compared
    /// digits-only. A missing profile phone or an unset service phone always
    /// resolves to [`Role::User`].
    pub fn resolve(profile_phone: Option<&str>, service_phone: Option<&str>) -> Self {
        match (profile_phone, service_phone) {
            (Some(profile), Some(service)) => {
                let profile = normalize_phone(profile);
                if !profile.is_empty() && profile == normalize_phone(service) {
                    Role::Service
                } else {
                    Role::User
                }
            }
            _ => Role::User,
        }
    }

    pub fn is_service(&self) -> bool {
        matches!(self, Role::Service)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Service => write!(f, "service"),
            Role::User => write!(f, "user"),
        }
    }
}

/// Strip everything but ASCII digits
pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Render a phone number for logs: country prefix and last four digits only
pub fn mask_phone(phone: &str) -> String {
    let digits = normalize_phone(phone);
    if digits.len() <= 5 {
        return "+***".to_string();
    }

    let head = &digits[..1];
    let tail = &digits[digits.len() - 4..];
    format!("+{}{}{}", head, "*".repeat(digits.len() - 5), tail)
}

/// Short stable fingerprint of an opaque secret (session tokens, code hashes)
///
/// Lets log lines correlate "the same token" without printing it.
pub fn fingerprint(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    hex::encode(&digest[..4])
}
