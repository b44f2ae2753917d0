//! Per-Conversation State
//!
//! In-memory only: conversation state does not survive a restart. The
//! protocol sessions do, which is why [`AuthStatus::Unknown`] exists: the
//! first event after a restart re-derives it from the session.
//!
//! Mode transitions:
//! - `Idle → WaitingPhone → WaitingCode → Idle` (login; `/login` restarts it)
//! - `Idle → WaitingTemplate → Idle`

use crate::frontend::MessageId;
use crate::identity::{Role, UserId};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// What the next plain-text message from the operator means
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Idle,
    WaitingPhone,
    /// The hash is the one returned by the most recent code request
    WaitingCode {
        phone: String,
        phone_code_hash: String,
    },
    WaitingTemplate,
}

/// Cached authentication of the conversation's protocol session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthStatus {
    /// Not yet derived in this process
    #[default]
    Unknown,
    Unauthenticated,
    Authenticated(Role),
}

impl AuthStatus {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthStatus::Authenticated(_))
    }

    pub fn role(&self) -> Option<Role> {
        match self {
            AuthStatus::Authenticated(role) => Some(*role),
            _ => None,
        }
    }
}

/// Bounds for the pending-confirmation table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationLimits {
    pub max_pending: usize,
    pub ttl: Duration,
}

impl Default for ConfirmationLimits {
    fn default() -> Self {
        Self {
            max_pending: 50,
            ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingEntry {
    original_sender: i64,
    staged_at: Instant,
}

/// Confirmation UI message id → original sender id.
///
/// Bounded: beyond `max_pending` the oldest entry is evicted, and entries
/// older than `ttl` are treated as absent.
#[derive(Debug, Clone)]
pub struct PendingConfirmations {
    limits: ConfirmationLimits,
    entries: HashMap<MessageId, PendingEntry>,
    order: VecDeque<MessageId>,
}

impl PendingConfirmations {
    pub fn new(limits: ConfirmationLimits) -> Self {
        Self {
            limits,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Record a staged confirmation. Returns evicted ids.
    pub fn insert(&mut self, message: MessageId, original_sender: i64) -> Vec<MessageId> {
        self.insert_at(message, original_sender, Instant::now())
    }

    pub fn insert_at(
        &mut self,
        message: MessageId,
        original_sender: i64,
        now: Instant,
    ) -> Vec<MessageId> {
        let mut evicted = self.prune_at(now);

        if self.entries.contains_key(&message) {
            self.order.retain(|id| *id != message);
        }
        self.entries.insert(
            message,
            PendingEntry {
                original_sender,
                staged_at: now,
            },
        );
        self.order.push_back(message);

        while self.order.len() > self.limits.max_pending.max(1) {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
                evicted.push(oldest);
            }
        }
        evicted
    }

    /// Original sender for `message`, if staged and not expired
    pub fn get(&self, message: MessageId) -> Option<i64> {
        self.get_at(message, Instant::now())
    }

    pub fn get_at(&self, message: MessageId, now: Instant) -> Option<i64> {
        self.entries
            .get(&message)
            .filter(|e| now.saturating_duration_since(e.staged_at) < self.limits.ttl)
            .map(|e| e.original_sender)
    }

    /// Consume the entry for `message`
    pub fn remove(&mut self, message: MessageId) -> Option<i64> {
        let entry = self.entries.remove(&message)?;
        self.order.retain(|id| *id != message);
        Some(entry.original_sender)
    }

    /// Drop expired entries, returning their ids
    pub fn prune_at(&mut self, now: Instant) -> Vec<MessageId> {
        let ttl = self.limits.ttl;
        let expired: Vec<MessageId> = self
            .order
            .iter()
            .copied()
            .filter(|id| {
                self.entries
                    .get(id)
                    .map(|e| now.saturating_duration_since(e.staged_at) >= ttl)
                    .unwrap_or(true)
            })
            .collect();

        for id in &expired {
            self.entries.remove(id);
        }
        self.order.retain(|id| !expired.contains(id));
        expired
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// State of one operator's conversation with the bot
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub mode: InputMode,
    pub auth: AuthStatus,
    pub pending: PendingConfirmations,
}

impl ConversationState {
    pub fn new(limits: ConfirmationLimits) -> Self {
        Self {
            mode: InputMode::Idle,
            auth: AuthStatus::Unknown,
            pending: PendingConfirmations::new(limits),
        }
    }

    pub fn begin_login(&mut self) {
        self.mode = InputMode::WaitingPhone;
    }

    /// Store the phone and the hash of the code request just made
    pub fn code_requested(&mut self, phone: String, phone_code_hash: String) {
        self.mode = InputMode::WaitingCode {
            phone,
            phone_code_hash,
        };
    }

    pub fn authenticated(&mut self, role: Role) {
        self.auth = AuthStatus::Authenticated(role);
        self.mode = InputMode::Idle;
    }

    /// Enter template input. Only allowed from `Idle`.
    pub fn begin_template(&mut self) -> bool {
        if self.mode != InputMode::Idle {
            return false;
        }
        self.mode = InputMode::WaitingTemplate;
        true
    }

    pub fn reset(&mut self) {
        self.mode = InputMode::Idle;
    }

    pub fn phone_code_hash(&self) -> Option<&str> {
        match &self.mode {
            InputMode::WaitingCode {
                phone_code_hash, ..
            } => Some(phone_code_hash),
            _ => None,
        }
    }
}

/// Conversation handle; holding its lock serializes one user's events
pub type SharedConversation = Arc<tokio::sync::Mutex<ConversationState>>;

/// User id → conversation state
pub struct ConversationRegistry {
    limits: ConfirmationLimits,
    conversations: Mutex<HashMap<UserId, SharedConversation>>,
}

impl ConversationRegistry {
    pub fn new(limits: ConfirmationLimits) -> Self {
        Self {
            limits,
            conversations: Mutex::new(HashMap::new()),
        }
    }

    /// Conversation for `user`, created empty on first access
    pub fn conversation(&self, user: UserId) -> SharedConversation {
        let limits = self.limits;
        self.conversations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(user)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(ConversationState::new(limits))))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.conversations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
