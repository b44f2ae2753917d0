//! Triage Relay
//!
//! Observes every message a service-role session receives and relays the
//! relevant ones:
//! 1. private conversations are skipped
//! 2. messages without text are skipped
//! 3. the local keyword filter must match (bounds oracle traffic)
//! 4. the classification oracle must approve; failures count as rejection
//! 5. the message is forwarded to the configured destination
//!
//! Messages are processed once, in arrival order, per session. There is no
//! deduplication across restarts.

use super::filter::KeywordFilter;
use super::oracle::{Classifier, ClassifierError};
use crate::protocol::retry::{bounded, Timeouts};
use crate::protocol::session::ProtocolSession;
use crate::protocol::traits::{Destination, InboundMessage, ProtocolClient};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Senders remembered by the ledger before the oldest are dropped
pub const DEFAULT_LEDGER_CAPACITY: usize = 10_000;

/// What happened to one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    SkippedPrivate,
    SkippedNoText,
    FilteredOut,
    Rejected,
    ClassifierFailed,
    Forwarded,
    ForwardFailed,
}

/// Bounded record of original senders whose messages were relayed.
///
/// Used to check that a forward-origin presented on the front-end belongs to
/// a message this process actually relayed.
pub struct RelayLedger {
    capacity: usize,
    inner: Mutex<LedgerState>,
}

#[derive(Default)]
struct LedgerState {
    order: VecDeque<i64>,
    members: HashSet<i64>,
}

impl RelayLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(LedgerState::default()),
        }
    }

    pub fn record(&self, sender: i64) {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !state.members.insert(sender) {
            return;
        }
        state.order.push_back(sender);
        while state.order.len() > self.capacity {
            if let Some(oldest) = state.order.pop_front() {
                state.members.remove(&oldest);
            }
        }
    }

    pub fn contains(&self, sender: i64) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .members
            .contains(&sender)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RelayLedger {
    fn default() -> Self {
        Self::new(DEFAULT_LEDGER_CAPACITY)
    }
}

pub struct TriageRelay {
    filter: KeywordFilter,
    classifier: Arc<dyn Classifier>,
    destination: Destination,
    ledger: Arc<RelayLedger>,
    timeouts: Timeouts,
}

impl TriageRelay {
    pub fn new(
        filter: KeywordFilter,
        classifier: Arc<dyn Classifier>,
        destination: Destination,
        ledger: Arc<RelayLedger>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            filter,
            classifier,
            destination,
            ledger,
            timeouts,
        }
    }

    pub fn ledger(&self) -> &Arc<RelayLedger> {
        &self.ledger
    }

    /// Triage one message and forward it through `client` when approved.
    /// Never fails: every error is logged and reported as an outcome.
    pub async fn handle_message<C: ProtocolClient>(
        &self,
        client: &C,
        message: &InboundMessage,
    ) -> RelayOutcome {
        if message.is_private() {
            return RelayOutcome::SkippedPrivate;
        }

        let text = match message.text.as_deref() {
            Some(text) if !text.trim().is_empty() => text,
            _ => return RelayOutcome::SkippedNoText,
        };

        if !self.filter.matches(text) {
            return RelayOutcome::FilteredOut;
        }

        let verdict = match tokio::time::timeout(self.timeouts.classify, self.classifier.classify(text)).await {
            Ok(result) => result,
            Err(_) => Err(ClassifierError::Timeout),
        };

        match verdict {
            Ok(true) => {}
            Ok(false) => {
                debug!(peer = %message.peer, message_id = message.id, "classifier rejected message");
                return RelayOutcome::Rejected;
            }
            Err(e) => {
                warn!(peer = %message.peer, message_id = message.id, error = %e, "classification failed");
                return RelayOutcome::ClassifierFailed;
            }
        }

        let forwarded = bounded(
            self.timeouts.forward,
            "forward_message",
            client.forward_message(&message.peer, message.id, &self.destination),
        )
        .await;

        match forwarded {
            Ok(()) => {
                if let Some(sender) = message.sender {
                    self.ledger.record(sender);
                }
                info!(
                    peer = %message.peer,
                    message_id = message.id,
                    destination = %self.destination,
                    "message relayed"
                );
                RelayOutcome::Forwarded
            }
            Err(e) => {
                warn!(peer = %message.peer, message_id = message.id, error = %e, "forwarding failed");
                RelayOutcome::ForwardFailed
            }
        }
    }

    /// Poll `session` for inbound messages until `shutdown` flips to `true`
    pub async fn run<C: ProtocolClient>(
        self: Arc<Self>,
        session: Arc<ProtocolSession<C>>,
        poll_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let identity = session.identity();
        info!(user = %identity, "triage relay started");

        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    let polled = bounded(
                        self.timeouts.poll,
                        "receive_messages",
                        session.client().receive_messages(),
                    )
                    .await;
                    match polled {
                        Ok(messages) => {
                            for message in messages {
                                self.handle_message(session.client(), &message).await;
                            }
                        }
                        Err(e) => {
                            warn!(user = %identity, error = %e, "failed to receive messages");
                        }
                    }
                    session.sync_token().await;
                }
            }
        }

        info!(user = %identity, "triage relay stopped");
    }
}
