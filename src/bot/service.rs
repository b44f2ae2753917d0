//! Relay Service
//!
//! Owns every registry of the running bot and wires the components
//! together. One instance per process; nothing is global.

use super::confirm::ReplyConfirmWorkflow;
use super::controller::ConversationController;
use super::messages;
use super::state::{ConfirmationLimits, ConversationRegistry};
use crate::frontend::{BotEvent, ChatId, FrontEnd};
use crate::persistence::PreferenceStore;
use crate::protocol::{
    ApiCredentials, AuthOrchestrator, Destination, ProtocolFactory, RetryPolicy, RoleRouter,
    SessionRegistry, Timeouts,
};
use crate::triage::{Classifier, KeywordFilter, RelayLedger, TriageRelay};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Runtime settings of the service (resolved from configuration)
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub api: ApiCredentials,
    /// Phone of the account whose session runs the triage relay
    pub service_phone: Option<String>,
    pub destination: Destination,
    pub require_relayed_origin: bool,
    pub poll_interval: Duration,
    pub timeouts: Timeouts,
    pub confirmations: ConfirmationLimits,
    pub cleanup_delay: Duration,
    pub connect_policy: RetryPolicy,
}

impl ServiceSettings {
    pub fn new(api: ApiCredentials, destination: Destination) -> Self {
        Self {
            api,
            service_phone: None,
            destination,
            require_relayed_origin: true,
            poll_interval: Duration::from_secs(1),
            timeouts: Timeouts::default(),
            confirmations: ConfirmationLimits::default(),
            cleanup_delay: Duration::from_secs(1),
            connect_policy: RetryPolicy::CONNECT,
        }
    }
}

pub struct RelayService<F: ProtocolFactory> {
    frontend: Arc<dyn FrontEnd>,
    registry: Arc<SessionRegistry<F>>,
    router: Arc<RoleRouter<F>>,
    ledger: Arc<RelayLedger>,
    controller: Arc<ConversationController<F>>,
}

impl<F: ProtocolFactory> RelayService<F> {
    pub fn new(
        factory: F,
        preferences: PreferenceStore,
        frontend: Arc<dyn FrontEnd>,
        filter: KeywordFilter,
        classifier: Arc<dyn Classifier>,
        settings: ServiceSettings,
    ) -> Self {
        let registry = Arc::new(
            SessionRegistry::new(factory, preferences.clone())
                .with_connect_policy(settings.connect_policy)
                .with_timeouts(settings.timeouts),
        );
        let auth = Arc::new(AuthOrchestrator::new(
            Arc::clone(&registry),
            settings.api,
            settings.service_phone,
            settings.timeouts,
        ));

        let ledger = Arc::new(RelayLedger::default());
        let relay = Arc::new(TriageRelay::new(
            filter,
            classifier,
            settings.destination,
            Arc::clone(&ledger),
            settings.timeouts,
        ));
        let router = Arc::new(RoleRouter::new(
            relay,
            settings.poll_interval,
            settings.timeouts,
        ));

        let confirm = ReplyConfirmWorkflow::new(
            Arc::clone(&frontend),
            Arc::clone(&router),
            preferences.clone(),
            Arc::clone(&ledger),
            settings.require_relayed_origin,
            settings.cleanup_delay,
        );
        let controller = Arc::new(ConversationController::new(
            Arc::clone(&frontend),
            auth,
            Arc::clone(&router),
            confirm,
            preferences,
            ConversationRegistry::new(settings.confirmations),
        ));

        Self {
            frontend,
            registry,
            router,
            ledger,
            controller,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry<F>> {
        &self.registry
    }

    pub fn router(&self) -> &Arc<RoleRouter<F>> {
        &self.router
    }

    pub fn ledger(&self) -> &Arc<RelayLedger> {
        &self.ledger
    }

    pub fn controller(&self) -> &Arc<ConversationController<F>> {
        &self.controller
    }

    /// Process a single event inline
    pub async fn handle(&self, event: BotEvent) {
        self.controller.handle_event(event).await;
    }

    /// Tell every identity with a stored session that the bot restarted.
    /// Returns how many notices were delivered.
    pub async fn send_restart_notice(&self) -> usize {
        let identities = self.registry.hydrate().await;

        let sends = identities.iter().map(|identity| async move {
            let result = self
                .frontend
                .send_text(ChatId::private(*identity), messages::RESTART_NOTICE, None)
                .await;
            if let Err(e) = &result {
                warn!(user = %identity, error = %e, "restart notice not delivered");
            }
            result.is_ok()
        });

        let delivered = join_all(sends).await.into_iter().filter(|ok| *ok).count();
        info!(
            known = identities.len(),
            delivered, "restart notice sent"
        );
        delivered
    }

    /// Dispatch events until the channel closes or shutdown is signalled.
    ///
    /// Each event runs in its own task; events of one user are serialized by
    /// the conversation lock. In-flight events finish before return.
    pub async fn run(&self, mut events: mpsc::Receiver<BotEvent>, mut shutdown: watch::Receiver<bool>) {
        let mut tasks = JoinSet::new();

        if *shutdown.borrow() {
            return;
        }

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        debug!("event channel closed");
                        break;
                    };
                    let controller = Arc::clone(&self.controller);
                    tasks.spawn(async move { controller.handle_event(event).await });
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("shutdown requested, no longer accepting events");
                        break;
                    }
                }
                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = result {
                        warn!(error = %e, "event task failed");
                    }
                }
            }
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "event task failed");
            }
        }
    }

    /// Stop relays, persist session tokens and disconnect every session
    pub async fn shutdown(&self) {
        self.router.shutdown().await;
        let persisted = self.registry.persist_tokens().await;
        self.registry.disconnect_all().await;
        info!(persisted, "relay service stopped");
    }
}
