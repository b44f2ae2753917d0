//! Conversation Controller
//!
//! Dispatches one front-end event against the sender's conversation state:
//!
//! | state            | input                  | next state                      |
//! |------------------|------------------------|---------------------------------|
//! | any              | `/login`               | WaitingPhone (or unchanged)     |
//! | WaitingPhone     | text                   | WaitingCode, unchanged on error |
//! | WaitingCode      | text                   | Idle + authenticated, or unchanged |
//! | WaitingTemplate  | text                   | Idle                            |
//! | Idle, user role  | forwarded text         | Idle (confirmation staged)      |
//! | any              | `/template`            | unchanged                       |
//! | any              | accept/decline/cancel  | see `confirm`, cancel → Idle    |
//!
//! The first event of each user in this process hydrates the cached
//! authentication from the protocol session before dispatch.

use super::commands::{help_text, parse_command, Action, Command};
use super::confirm::ReplyConfirmWorkflow;
use super::messages;
use super::state::{AuthStatus, ConversationRegistry, ConversationState, InputMode};
use crate::frontend::{BotEvent, CallbackEvent, ChatId, FrontEnd, InlineKeyboard, TextEvent};
use crate::identity::{Role, UserId};
use crate::persistence::PreferenceStore;
use crate::protocol::{AuthError, AuthOrchestrator, ProtocolFactory, RoleRouter};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct ConversationController<F: ProtocolFactory> {
    frontend: Arc<dyn FrontEnd>,
    auth: Arc<AuthOrchestrator<F>>,
    router: Arc<RoleRouter<F>>,
    confirm: ReplyConfirmWorkflow<F>,
    preferences: PreferenceStore,
    conversations: ConversationRegistry,
}

impl<F: ProtocolFactory> ConversationController<F> {
    pub fn new(
        frontend: Arc<dyn FrontEnd>,
        auth: Arc<AuthOrchestrator<F>>,
        router: Arc<RoleRouter<F>>,
        confirm: ReplyConfirmWorkflow<F>,
        preferences: PreferenceStore,
        conversations: ConversationRegistry,
    ) -> Self {
        Self {
            frontend,
            auth,
            router,
            confirm,
            preferences,
            conversations,
        }
    }

    pub fn conversations(&self) -> &ConversationRegistry {
        &self.conversations
    }

    /// Process one event to completion. Errors are reported to the user or
    /// logged; nothing propagates.
    pub async fn handle_event(&self, event: BotEvent) {
        let user = event.user();
        let conversation = self.conversations.conversation(user);
        let mut state = conversation.lock().await;

        self.hydrate(&mut state, user, event.chat()).await;

        match event {
            BotEvent::Text(event) => self.on_text(&mut state, &event).await,
            BotEvent::Callback(event) => self.on_callback(&mut state, &event).await,
        }
    }

    /// Re-derive authentication once per process for this conversation
    async fn hydrate(&self, state: &mut ConversationState, user: UserId, chat: ChatId) {
        if state.auth != AuthStatus::Unknown {
            return;
        }

        match self.auth.resolve_role(user).await {
            Some(role) => {
                state.auth = AuthStatus::Authenticated(role);
                debug!(user = %user, role = %role, "conversation hydrated");
                self.activate(user, role, chat).await;
            }
            None => state.auth = AuthStatus::Unauthenticated,
        }
    }

    async fn activate(&self, user: UserId, role: Role, chat: ChatId) {
        let session = self.auth.registry().get_or_create(user).await;
        let activation = self.router.activate(session, role);
        if activation.fresh {
            self.send(chat, activation.status(), None).await;
        }
    }

    async fn on_text(&self, state: &mut ConversationState, event: &TextEvent) {
        match parse_command(&event.text) {
            // Forwarded text may start with a slash; only known commands run
            Some(Command::Unknown(_)) if event.forward_origin.is_some() => {}
            Some(command) => {
                self.on_command(state, event, command).await;
                return;
            }
            None => {}
        }

        match state.mode.clone() {
            InputMode::WaitingPhone => self.on_phone(state, event).await,
            InputMode::WaitingCode {
                phone,
                phone_code_hash,
            } => self.on_code(state, event, &phone, &phone_code_hash).await,
            InputMode::WaitingTemplate => self.on_template(state, event).await,
            InputMode::Idle => self.on_idle_text(state, event).await,
        }
    }

    async fn on_command(&self, state: &mut ConversationState, event: &TextEvent, command: Command) {
        match command {
            // Authenticated users were already re-attached by hydration
            Command::Start => {
                if !state.auth.is_authenticated() {
                    self.send(event.chat, messages::WELCOME, None).await;
                }
            }
            Command::Login => {
                if state.auth.is_authenticated() {
                    self.send(event.chat, messages::ALREADY_LOGGED_IN, None).await;
                } else {
                    state.begin_login();
                    self.send(event.chat, messages::ASK_PHONE, None).await;
                }
            }
            Command::Template => {
                self.send(
                    event.chat,
                    messages::TEMPLATE_MENU,
                    Some(messages::template_menu_keyboard()),
                )
                .await;
            }
            Command::Help | Command::Unknown(_) => {
                self.send(event.chat, &help_text(), None).await;
            }
        }
    }

    async fn on_phone(&self, state: &mut ConversationState, event: &TextEvent) {
        let phone = event.text.trim();
        match self.auth.request_code(event.user, phone).await {
            Ok(hash) => {
                state.code_requested(phone.to_string(), hash);
                self.send(event.chat, messages::ASK_CODE, None).await;
            }
            Err(AuthError::InvalidPhone) => {
                self.send(event.chat, messages::INVALID_PHONE, None).await;
            }
            Err(e) => {
                warn!(user = %event.user, error = %e, "code request failed");
                self.send(event.chat, messages::CODE_REQUEST_FAILED, None).await;
            }
        }
    }

    async fn on_code(
        &self,
        state: &mut ConversationState,
        event: &TextEvent,
        phone: &str,
        phone_code_hash: &str,
    ) {
        match self
            .auth
            .verify_code(event.user, phone, event.text.trim(), phone_code_hash)
            .await
        {
            Ok(authenticated) => {
                state.authenticated(authenticated.role);
                info!(user = %event.user, role = %authenticated.role, "operator logged in");
                self.send(event.chat, messages::LOGIN_SUCCESS, None).await;
                self.activate(event.user, authenticated.role, event.chat).await;
                self.view_template(event.user, event.chat).await;
            }
            Err(AuthError::InvalidCodeFormat) => {
                self.send(event.chat, messages::INVALID_CODE, None).await;
            }
            Err(e) => {
                warn!(user = %event.user, error = %e, "login failed");
                self.send(event.chat, messages::LOGIN_FAILED, None).await;
            }
        }
    }

    async fn on_template(&self, state: &mut ConversationState, event: &TextEvent) {
        state.reset();
        match self.preferences.save_template(event.user, &event.text).await {
            Ok(()) => self.send(event.chat, messages::TEMPLATE_SAVED, None).await,
            Err(e) => {
                warn!(user = %event.user, error = %e, "failed to save template");
                self.send(event.chat, messages::SOMETHING_WRONG, None).await;
            }
        }
    }

    async fn on_idle_text(&self, state: &mut ConversationState, event: &TextEvent) {
        match state.auth {
            AuthStatus::Authenticated(Role::User) if event.forward_origin.is_some() => {
                if let Err(e) = self.confirm.stage(state, event).await {
                    warn!(user = %event.user, error = %e, "failed to stage confirmation");
                }
            }
            AuthStatus::Authenticated(_) => {
                debug!(user = %event.user, "ignoring plain text");
            }
            _ => self.send(event.chat, messages::NOT_LOGGED_IN, None).await,
        }
    }

    async fn on_callback(&self, state: &mut ConversationState, event: &CallbackEvent) {
        if let Err(e) = self.frontend.answer_callback(&event.callback_id).await {
            debug!(user = %event.user, error = %e, "failed to answer callback");
        }

        let Some(action) = Action::parse(&event.data) else {
            debug!(user = %event.user, data = %event.data, "unknown callback data");
            return;
        };

        match action {
            Action::Accept => {
                self.confirm.accept(state, event).await;
            }
            Action::Decline => self.confirm.decline(state, event).await,
            Action::SetTemplate => {
                if state.begin_template() {
                    self.send(
                        event.chat,
                        messages::ASK_TEMPLATE,
                        Some(messages::cancel_keyboard()),
                    )
                    .await;
                } else {
                    self.send(event.chat, messages::FINISH_CURRENT_STEP, None).await;
                }
            }
            Action::ViewTemplate => self.view_template(event.user, event.chat).await,
            Action::Cancel => {
                state.reset();
                self.send(event.chat, messages::ACTION_CANCELLED, None).await;
                if let Err(e) = self.frontend.delete_message(event.chat, event.message_id).await {
                    debug!(user = %event.user, error = %e, "failed to delete prompt");
                }
            }
        }
    }

    async fn view_template(&self, user: UserId, chat: ChatId) {
        match self.preferences.template(user).await {
            Ok(Some(template)) => {
                self.send(chat, &messages::your_template(&template), None).await;
            }
            Ok(None) => {
                self.send(
                    chat,
                    messages::TEMPLATE_NOT_SET,
                    Some(messages::set_template_keyboard()),
                )
                .await;
            }
            Err(e) => {
                warn!(user = %user, error = %e, "failed to load template");
                self.send(chat, messages::SOMETHING_WRONG, None).await;
            }
        }
    }

    async fn send(&self, chat: ChatId, text: &str, keyboard: Option<InlineKeyboard>) {
        if let Err(e) = self.frontend.send_text(chat, text, keyboard).await {
            warn!(chat = %chat, error = %e, "failed to send message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::state::ConfirmationLimits;
    use crate::frontend::{ForwardOrigin, MessageId, MockFrontEnd};
    use crate::persistence::MemoryDocumentStore;
    use crate::protocol::{
        ApiCredentials, Destination, MockProtocolClient, MockProtocolFactory, Profile,
        RetryPolicy, SessionRegistry, Timeouts,
    };
    use crate::triage::{KeywordFilter, RelayLedger, ScriptedClassifier, TriageRelay, Verdict};
    use std::time::Duration;

    const OPERATOR: UserId = UserId(7);
    const CHAT: ChatId = ChatId(7);
    const SERVICE_PHONE: &str = "+79990000000";

    struct Harness {
        factory: MockProtocolFactory,
        frontend: MockFrontEnd,
        preferences: PreferenceStore,
        router: Arc<RoleRouter<MockProtocolFactory>>,
        controller: ConversationController<MockProtocolFactory>,
    }

    fn harness() -> Harness {
        let factory = MockProtocolFactory::new();
        let frontend = MockFrontEnd::new();
        let preferences = PreferenceStore::new(Arc::new(MemoryDocumentStore::new()));
        let registry = SessionRegistry::new(factory.clone(), preferences.clone())
            .with_connect_policy(RetryPolicy {
                max_retries: 0,
                base_delay: Duration::from_millis(1),
                max_backoff: Duration::from_millis(1),
            });
        let auth = Arc::new(AuthOrchestrator::new(
            Arc::new(registry),
            ApiCredentials {
                api_id: 1,
                api_hash: "hash".to_string(),
            },
            Some(SERVICE_PHONE.to_string()),
            Timeouts::default(),
        ));

        let ledger = Arc::new(RelayLedger::default());
        let relay = TriageRelay::new(
            KeywordFilter::default(),
            Arc::new(ScriptedClassifier::new(Verdict::Reject)),
            Destination("@dest".to_string()),
            Arc::clone(&ledger),
            Timeouts::default(),
        );
        let router = Arc::new(RoleRouter::new(
            Arc::new(relay),
            Duration::from_millis(10),
            Timeouts::default(),
        ));

        let shared_frontend: Arc<dyn FrontEnd> = Arc::new(frontend.clone());
        let confirm = ReplyConfirmWorkflow::new(
            Arc::clone(&shared_frontend),
            Arc::clone(&router),
            preferences.clone(),
            ledger,
            false,
            Duration::ZERO,
        );
        let controller = ConversationController::new(
            shared_frontend,
            auth,
            Arc::clone(&router),
            confirm,
            preferences.clone(),
            ConversationRegistry::new(ConfirmationLimits::default()),
        );

        Harness {
            factory,
            frontend,
            preferences,
            router,
            controller,
        }
    }

    fn text(body: &str) -> BotEvent {
        BotEvent::Text(TextEvent {
            user: OPERATOR,
            chat: CHAT,
            message_id: MessageId(1),
            text: body.to_string(),
            forward_origin: None,
            from_bot: false,
        })
    }

    fn click(data: &str, message_id: MessageId) -> BotEvent {
        BotEvent::Callback(CallbackEvent {
            user: OPERATOR,
            chat: CHAT,
            callback_id: "cb".to_string(),
            message_id,
            data: data.to_string(),
        })
    }

    fn profile(phone: &str) -> Profile {
        Profile {
            id: 1000,
            phone: Some(phone.to_string()),
            username: None,
            first_name: "Kai".to_string(),
        }
    }

    async fn state_of(h: &Harness) -> ConversationState {
        h.controller
            .conversations()
            .conversation(OPERATOR)
            .lock()
            .await
            .clone()
    }

    async fn log_in(h: &Harness) {
        h.controller.handle_event(text("/login")).await;
        h.controller.handle_event(text("+79991234567")).await;
        h.controller.handle_event(text("1 2 3 4 5")).await;
    }

    #[tokio::test]
    async fn test_login_flow() {
        let h = harness();

        h.controller.handle_event(text("/login")).await;
        assert_eq!(h.frontend.last_sent().unwrap().text, messages::ASK_PHONE);
        assert_eq!(state_of(&h).await.mode, InputMode::WaitingPhone);

        h.controller.handle_event(text("+79991234567")).await;
        assert_eq!(h.frontend.last_sent().unwrap().text, messages::ASK_CODE);
        let client = h.factory.client(OPERATOR);
        assert_eq!(client.code_requests(), vec!["+79991234567".to_string()]);
        let issued = client.last_issued_hash().unwrap();

        h.controller.handle_event(text("1 2 3 4 5")).await;
        let call = client.sign_in_calls().pop().unwrap();
        assert_eq!(call.code, "12345");
        assert_eq!(call.phone_code_hash, issued);

        let texts = h.frontend.texts_to(CHAT);
        assert!(texts.contains(&messages::LOGIN_SUCCESS.to_string()));
        assert!(texts.contains(&"Ready to send replies from your account".to_string()));
        assert_eq!(texts.last().unwrap(), messages::TEMPLATE_NOT_SET);

        let state = state_of(&h).await;
        assert_eq!(state.mode, InputMode::Idle);
        assert_eq!(state.auth, AuthStatus::Authenticated(Role::User));
        assert!(h.router.get_sender(OPERATOR).is_some());
    }

    #[tokio::test]
    async fn test_invalid_phone_keeps_waiting() {
        let h = harness();
        h.controller.handle_event(text("/login")).await;
        h.controller.handle_event(text("89991234567")).await;

        assert_eq!(h.frontend.last_sent().unwrap().text, messages::INVALID_PHONE);
        assert_eq!(state_of(&h).await.mode, InputMode::WaitingPhone);
        assert!(h.factory.client(OPERATOR).code_requests().is_empty());
    }

    #[tokio::test]
    async fn test_code_request_failure_keeps_waiting() {
        let h = harness();
        h.factory
            .client(OPERATOR)
            .fail_request_code(crate::protocol::ProtocolError::Rpc("FLOOD_WAIT".to_string()));

        h.controller.handle_event(text("/login")).await;
        h.controller.handle_event(text("+79991234567")).await;

        assert_eq!(
            h.frontend.last_sent().unwrap().text,
            messages::CODE_REQUEST_FAILED
        );
        assert_eq!(state_of(&h).await.mode, InputMode::WaitingPhone);
    }

    #[tokio::test]
    async fn test_wrong_code_allows_retry() {
        let h = harness();
        h.controller.handle_event(text("/login")).await;
        h.controller.handle_event(text("+79991234567")).await;

        h.controller.handle_event(text("5 4 3 2 1")).await;
        assert_eq!(h.frontend.last_sent().unwrap().text, messages::LOGIN_FAILED);
        assert!(matches!(
            state_of(&h).await.mode,
            InputMode::WaitingCode { .. }
        ));

        h.controller.handle_event(text("1 2 3 4 5")).await;
        assert_eq!(
            state_of(&h).await.auth,
            AuthStatus::Authenticated(Role::User)
        );
    }

    #[tokio::test]
    async fn test_malformed_code_is_not_submitted() {
        let h = harness();
        h.controller.handle_event(text("/login")).await;
        h.controller.handle_event(text("+79991234567")).await;
        h.controller.handle_event(text("12a45")).await;

        assert_eq!(h.frontend.last_sent().unwrap().text, messages::INVALID_CODE);
        assert!(h.factory.client(OPERATOR).sign_in_calls().is_empty());
    }

    #[tokio::test]
    async fn test_service_login_starts_relay() {
        let h = harness();
        h.factory
            .client(OPERATOR)
            .set_login_profile(profile("79990000000"));

        log_in(&h).await;

        assert_eq!(
            state_of(&h).await.auth,
            AuthStatus::Authenticated(Role::Service)
        );
        assert_eq!(h.router.active_relays(), 1);
        assert!(h.router.get_sender(OPERATOR).is_none());
        assert!(h
            .frontend
            .texts_to(CHAT)
            .contains(&"New messages listening ...".to_string()));

        h.router.shutdown().await;
    }

    #[tokio::test]
    async fn test_login_when_already_authenticated() {
        let h = harness();
        log_in(&h).await;
        h.controller.handle_event(text("/login")).await;

        assert_eq!(
            h.frontend.last_sent().unwrap().text,
            messages::ALREADY_LOGGED_IN
        );
        assert_eq!(state_of(&h).await.mode, InputMode::Idle);
    }

    #[tokio::test]
    async fn test_start_welcomes_unauthenticated() {
        let h = harness();
        h.controller.handle_event(text("/start")).await;

        assert_eq!(h.frontend.texts_to(CHAT), vec![messages::WELCOME.to_string()]);
        assert_eq!(state_of(&h).await.auth, AuthStatus::Unauthenticated);
    }

    #[tokio::test]
    async fn test_hydration_after_restart() {
        let h = harness();
        h.factory.insert(
            OPERATOR,
            MockProtocolClient::authorized(profile("79991234567")),
        );

        h.controller.handle_event(text("/start")).await;
        assert_eq!(
            h.frontend.texts_to(CHAT),
            vec!["Ready to send replies from your account".to_string()]
        );
        assert_eq!(
            state_of(&h).await.auth,
            AuthStatus::Authenticated(Role::User)
        );

        // Second /start neither re-activates nor greets
        h.controller.handle_event(text("/start")).await;
        assert_eq!(h.frontend.texts_to(CHAT).len(), 1);
    }

    #[tokio::test]
    async fn test_template_round_trip() {
        let h = harness();

        h.controller.handle_event(text("/template")).await;
        let menu = h.frontend.last_sent().unwrap();
        assert_eq!(menu.text, messages::TEMPLATE_MENU);
        assert_eq!(
            menu.keyboard.unwrap().actions(),
            vec!["set_template", "view_template"]
        );

        h.controller
            .handle_event(click("set_template", menu.message_id))
            .await;
        assert_eq!(h.frontend.last_sent().unwrap().text, messages::ASK_TEMPLATE);
        assert_eq!(state_of(&h).await.mode, InputMode::WaitingTemplate);

        h.controller
            .handle_event(text("Hi! I teach surfing in Bali"))
            .await;
        assert_eq!(h.frontend.last_sent().unwrap().text, messages::TEMPLATE_SAVED);
        assert_eq!(state_of(&h).await.mode, InputMode::Idle);
        assert_eq!(
            h.preferences.template(OPERATOR).await.unwrap().as_deref(),
            Some("Hi! I teach surfing in Bali")
        );

        h.controller
            .handle_event(click("view_template", menu.message_id))
            .await;
        assert_eq!(
            h.frontend.last_sent().unwrap().text,
            messages::your_template("Hi! I teach surfing in Bali")
        );
        assert_eq!(h.frontend.answered().len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_resets_to_idle() {
        let h = harness();
        h.controller
            .handle_event(click("set_template", MessageId(50)))
            .await;
        let prompt = h.frontend.last_sent().unwrap();

        h.controller
            .handle_event(click("cancel", prompt.message_id))
            .await;

        assert_eq!(state_of(&h).await.mode, InputMode::Idle);
        assert_eq!(
            h.frontend.last_sent().unwrap().text,
            messages::ACTION_CANCELLED
        );
        assert!(h.frontend.deleted().contains(&(CHAT, prompt.message_id)));
    }

    #[tokio::test]
    async fn test_set_template_refused_mid_login() {
        let h = harness();
        h.controller.handle_event(text("/login")).await;
        h.controller
            .handle_event(click("set_template", MessageId(50)))
            .await;

        assert_eq!(
            h.frontend.last_sent().unwrap().text,
            messages::FINISH_CURRENT_STEP
        );
        assert_eq!(state_of(&h).await.mode, InputMode::WaitingPhone);
    }

    #[tokio::test]
    async fn test_forward_then_accept_sends_template() {
        let h = harness();
        let client = MockProtocolClient::authorized(profile("79991234567"));
        h.factory.insert(OPERATOR, client.clone());
        h.preferences
            .save_template(OPERATOR, "Aloha! Lessons daily at 8am")
            .await
            .unwrap();

        h.controller
            .handle_event(BotEvent::Text(TextEvent {
                user: OPERATOR,
                chat: CHAT,
                message_id: MessageId(3),
                text: "looking for a surf coach".to_string(),
                forward_origin: Some(ForwardOrigin::User {
                    id: 555,
                    is_bot: false,
                }),
                from_bot: false,
            }))
            .await;

        let echo = h.frontend.last_sent().unwrap();
        assert_eq!(echo.text, "looking for a surf coach");
        assert_eq!(echo.keyboard.unwrap().actions(), vec!["accept", "decline"]);

        h.controller.handle_event(click("accept", echo.message_id)).await;

        let sent = client.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].user_id, 555);
        assert_eq!(sent[0].text, "Aloha! Lessons daily at 8am");
        assert!(state_of(&h).await.pending.is_empty());
    }

    #[tokio::test]
    async fn test_forwarded_slash_text_is_staged() {
        let h = harness();
        h.factory
            .insert(OPERATOR, MockProtocolClient::authorized(profile("79991234567")));

        h.controller
            .handle_event(BotEvent::Text(TextEvent {
                user: OPERATOR,
                chat: CHAT,
                message_id: MessageId(3),
                text: "/surf lessons this weekend?".to_string(),
                forward_origin: Some(ForwardOrigin::User {
                    id: 555,
                    is_bot: false,
                }),
                from_bot: false,
            }))
            .await;

        let echo = h.frontend.last_sent().unwrap();
        assert_eq!(echo.text, "/surf lessons this weekend?");
        assert_eq!(echo.keyboard.unwrap().actions(), vec!["accept", "decline"]);
        assert_eq!(state_of(&h).await.pending.len(), 1);
    }

    #[tokio::test]
    async fn test_forwarded_known_command_still_runs() {
        let h = harness();

        h.controller
            .handle_event(BotEvent::Text(TextEvent {
                user: OPERATOR,
                chat: CHAT,
                message_id: MessageId(3),
                text: "/help".to_string(),
                forward_origin: Some(ForwardOrigin::User {
                    id: 555,
                    is_bot: false,
                }),
                from_bot: false,
            }))
            .await;

        assert_eq!(h.frontend.last_sent().unwrap().text, help_text());
    }

    #[tokio::test]
    async fn test_plain_text_when_logged_out() {
        let h = harness();
        h.controller.handle_event(text("hello")).await;
        assert_eq!(h.frontend.last_sent().unwrap().text, messages::NOT_LOGGED_IN);
    }

    #[tokio::test]
    async fn test_front_end_failures_are_contained() {
        let h = harness();
        h.frontend.fail_sends(true);

        h.controller.handle_event(text("/login")).await;
        h.controller.handle_event(text("+79991234567")).await;

        assert!(h.frontend.sent().is_empty());
        assert!(matches!(
            state_of(&h).await.mode,
            InputMode::WaitingCode { .. }
        ));
    }
}
