//! Conversation store: the transcript, the selected provider and the
//! in-flight flag for one session
//!
//! All mutation goes through [`ConversationStore::submit`] and
//! [`ConversationStore::select_provider`]. The transcript is append-only and
//! at most one backend call is pending at any time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::clock::{Clock, IdGenerator, SystemClock, UuidGenerator};
use crate::context::WELCOME_MESSAGE;
use crate::dispatcher::Dispatcher;
use crate::providers::ProviderKind;
use crate::types::{ChatMessage, Role};

const EVENT_CAPACITY: usize = 64;

/// Change notifications for front ends
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    MessageAppended(ChatMessage),
    ProviderChanged(ProviderKind),
    InFlightChanged(bool),
}

/// What happened to a submission
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Blank text, nothing recorded
    Ignored,
    /// Another request is still pending, nothing recorded
    Busy,
    Replied { user: ChatMessage, reply: ChatMessage },
}

struct SessionState {
    transcript: Vec<ChatMessage>,
    provider: ProviderKind,
}

/// One chat session. The state lock is never held across an await, so the
/// in-flight guard can record a reply from `Drop`.
pub struct ConversationStore {
    dispatcher: Dispatcher,
    state: RwLock<SessionState>,
    in_flight: AtomicBool,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    events: broadcast::Sender<StoreEvent>,
}

impl ConversationStore {
    /// New session on the wall clock with UUID message ids
    pub fn new(dispatcher: Dispatcher, provider: ProviderKind) -> Self {
        Self::with_sources(
            dispatcher,
            provider,
            Arc::new(SystemClock),
            Arc::new(UuidGenerator),
        )
    }

    /// New session with explicit time and id sources
    pub fn with_sources(
        dispatcher: Dispatcher,
        provider: ProviderKind,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let welcome = ChatMessage::new(ids.next_id(), Role::System, WELCOME_MESSAGE, clock.now());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        info!("Started conversation with provider {}", provider);

        Self {
            dispatcher,
            state: RwLock::new(SessionState {
                transcript: vec![welcome],
                provider,
            }),
            in_flight: AtomicBool::new(false),
            clock,
            ids,
            events,
        }
    }

    /// Record `text` as a user turn, send it to the selected provider and
    /// record exactly one reply.
    ///
    /// If the returned future is dropped before the backend answers, the
    /// provider's error sentence is recorded as the reply.
    pub async fn submit(&self, text: &str) -> SubmitOutcome {
        let text = text.trim();
        if text.is_empty() {
            debug!("Ignoring blank submission");
            return SubmitOutcome::Ignored;
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Rejecting submission while a request is in flight");
            return SubmitOutcome::Busy;
        }
        let mut guard = InFlightGuard {
            store: self,
            awaiting: None,
        };
        self.emit(StoreEvent::InFlightChanged(true));

        let (provider, prior, user) = {
            let mut state = self.write_state();
            let prior: Vec<ChatMessage> = state
                .transcript
                .iter()
                .filter(|m| !m.is_system())
                .cloned()
                .collect();
            let user = self.message(Role::User, text);
            state.transcript.push(user.clone());
            (state.provider, prior, user)
        };
        guard.awaiting = Some(provider);
        self.emit(StoreEvent::MessageAppended(user.clone()));

        let reply_text = self.dispatcher.dispatch(provider, text, &prior).await;

        guard.awaiting = None;
        let reply = self.append_reply(provider, reply_text);

        debug!("Turn complete on {} ({} chars)", provider, reply.text.len());
        SubmitOutcome::Replied { user, reply }
    }

    /// Switch the backend used by later submissions
    pub fn select_provider(&self, provider: ProviderKind) {
        {
            let mut state = self.write_state();
            if state.provider == provider {
                return;
            }
            info!("Switching provider {} -> {}", state.provider, provider);
            state.provider = provider;
        }
        self.emit(StoreEvent::ProviderChanged(provider));
    }

    pub fn provider(&self) -> ProviderKind {
        self.read_state().provider
    }

    /// Snapshot of the transcript, oldest first
    pub fn transcript(&self) -> Vec<ChatMessage> {
        self.read_state().transcript.clone()
    }

    pub fn message_count(&self) -> usize {
        self.read_state().transcript.len()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn message(&self, role: Role, text: impl Into<String>) -> ChatMessage {
        ChatMessage::new(self.ids.next_id(), role, text, self.clock.now())
    }

    fn append_reply(&self, provider: ProviderKind, text: impl Into<String>) -> ChatMessage {
        let reply = self.message(Role::Model, text).tagged(provider);
        self.write_state().transcript.push(reply.clone());
        self.emit(StoreEvent::MessageAppended(reply.clone()));
        reply
    }

    fn read_state(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: StoreEvent) {
        // no receivers is fine
        let _ = self.events.send(event);
    }
}

/// Clears the in-flight flag however the submit future ends. A user turn
/// still awaiting its reply gets the provider's error sentence.
struct InFlightGuard<'a> {
    store: &'a ConversationStore,
    awaiting: Option<ProviderKind>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Some(provider) = self.awaiting.take() {
            warn!("Submit on {} was dropped before the reply arrived", provider);
            self.store.append_reply(provider, provider.error_reply());
        }
        self.store.in_flight.store(false, Ordering::Release);
        self.store.emit(StoreEvent::InFlightChanged(false));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{FixedClock, SequentialIds};
    use crate::providers::{HistoryPayload, HistoryTurn};
    use crate::testing::{Gate, Script, ScriptedProvider};
    use chrono::{DateTime, Utc};

    fn at() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-01T09:30:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn store_with(providers: Vec<ScriptedProvider>, provider: ProviderKind) -> ConversationStore {
        let mut dispatcher = Dispatcher::new();
        for p in providers {
            dispatcher.register(Box::new(p));
        }
        ConversationStore::with_sources(
            dispatcher,
            provider,
            Arc::new(FixedClock(at())),
            Arc::new(SequentialIds::new()),
        )
    }

    #[tokio::test]
    async fn test_new_session_seeds_welcome() {
        let store = store_with(vec![], ProviderKind::Gemini);
        let transcript = store.transcript();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].role, Role::System);
        assert_eq!(transcript[0].text, WELCOME_MESSAGE);
        assert_eq!(transcript[0].id, "msg-1");
        assert!(!store.is_in_flight());
    }

    #[tokio::test]
    async fn test_submit_appends_user_and_reply() {
        let store = store_with(
            vec![ScriptedProvider::new(
                ProviderKind::Gemini,
                vec![Script::Reply("Drink fluids.")],
            )],
            ProviderKind::Gemini,
        );

        let outcome = store.submit("  I have a cold  ").await;

        let SubmitOutcome::Replied { user, reply } = outcome else {
            panic!("expected a reply");
        };
        assert_eq!(user.role, Role::User);
        assert_eq!(user.text, "I have a cold");
        assert_eq!(user.timestamp, at());
        assert_eq!(reply.role, Role::Model);
        assert_eq!(reply.text, "Drink fluids.");
        assert_eq!(reply.provider, Some(ProviderKind::Gemini));
        assert_eq!(store.message_count(), 3);
        assert!(!store.is_in_flight());
    }

    #[tokio::test]
    async fn test_each_accepted_submit_adds_two() {
        let store = store_with(
            vec![ScriptedProvider::new(ProviderKind::OpenAi, vec![])],
            ProviderKind::OpenAi,
        );
        for i in 1..=3 {
            store.submit("question").await;
            assert_eq!(store.message_count(), 1 + 2 * i);
        }
    }

    #[tokio::test]
    async fn test_blank_submit_is_ignored() {
        let store = store_with(vec![], ProviderKind::Gemini);
        assert_eq!(store.submit("").await, SubmitOutcome::Ignored);
        assert_eq!(store.submit(" \n\t ").await, SubmitOutcome::Ignored);
        assert_eq!(store.message_count(), 1);
    }

    #[tokio::test]
    async fn test_history_excludes_system_and_current_turn() {
        let gemini = ScriptedProvider::new(
            ProviderKind::Gemini,
            vec![Script::Reply("Hello"), Script::Reply("See a doctor.")],
        );
        let calls = gemini.calls();
        let store = store_with(vec![gemini], ProviderKind::Gemini);

        store.submit("Hi").await;
        store.submit("chest pain").await;

        let calls = calls.lock().unwrap();
        assert_eq!(calls[0].1, HistoryPayload::ContextBlock(String::new()));
        assert_eq!(calls[1].0, "chest pain");
        assert_eq!(
            calls[1].1,
            HistoryPayload::ContextBlock("User: Hi\nAssistant: Hello".to_string())
        );
    }

    #[tokio::test]
    async fn test_openai_history_keeps_model_role() {
        let openai = ScriptedProvider::new(ProviderKind::OpenAi, vec![Script::Reply("Hello")]);
        let calls = openai.calls();
        let store = store_with(vec![openai], ProviderKind::OpenAi);

        store.submit("Hi").await;
        store.submit("next").await;

        let calls = calls.lock().unwrap();
        assert_eq!(
            calls[1].1,
            HistoryPayload::Turns(vec![
                HistoryTurn {
                    role: Role::User,
                    text: "Hi".to_string()
                },
                HistoryTurn {
                    role: Role::Model,
                    text: "Hello".to_string()
                },
            ])
        );
    }

    #[tokio::test]
    async fn test_backend_failure_still_replies_once() {
        let store = store_with(
            vec![ScriptedProvider::new(ProviderKind::Gemini, vec![Script::Fail])],
            ProviderKind::Gemini,
        );

        let outcome = store.submit("chest pain").await;

        let SubmitOutcome::Replied { reply, .. } = outcome else {
            panic!("expected a reply");
        };
        assert_eq!(reply.role, Role::Model);
        assert_eq!(reply.text, ProviderKind::Gemini.error_reply());
        assert_eq!(store.message_count(), 3);
        assert!(!store.is_in_flight());
    }

    #[tokio::test]
    async fn test_in_flight_rejects_concurrent_submit() {
        let gate = Gate::default();
        let store = Arc::new(store_with(
            vec![
                ScriptedProvider::new(ProviderKind::Gemini, vec![Script::Reply("done")])
                    .with_gate(gate.clone()),
            ],
            ProviderKind::Gemini,
        ));

        let pending = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.submit("first").await })
        };

        gate.entered.notified().await;
        assert!(store.is_in_flight());
        assert_eq!(store.message_count(), 2);

        assert_eq!(store.submit("second").await, SubmitOutcome::Busy);
        assert_eq!(store.message_count(), 2);

        gate.release.notify_one();
        let outcome = pending.await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Replied { .. }));
        assert!(!store.is_in_flight());
        assert_eq!(store.message_count(), 3);

        // accepted again once settled
        gate.release.notify_one();
        assert!(matches!(
            store.submit("third").await,
            SubmitOutcome::Replied { .. }
        ));
    }

    #[tokio::test]
    async fn test_dropped_submit_clears_in_flight_and_replies() {
        let gate = Gate::default();
        let store = Arc::new(store_with(
            vec![ScriptedProvider::new(ProviderKind::Gemini, vec![]).with_gate(gate.clone())],
            ProviderKind::Gemini,
        ));

        let pending = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.submit("first").await })
        };
        gate.entered.notified().await;
        assert!(store.is_in_flight());

        pending.abort();
        let _ = pending.await;
        assert!(!store.is_in_flight());

        // the abandoned turn still gets exactly one reply
        let transcript = store.transcript();
        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript[1].role, Role::User);
        assert_eq!(transcript[2].role, Role::Model);
        assert_eq!(transcript[2].text, ProviderKind::Gemini.error_reply());
        assert_eq!(transcript[2].provider, Some(ProviderKind::Gemini));
    }

    #[tokio::test]
    async fn test_switching_provider_keeps_history() {
        let store = store_with(
            vec![
                ScriptedProvider::new(ProviderKind::Gemini, vec![Script::Reply("from gemini")]),
                ScriptedProvider::new(ProviderKind::OpenAi, vec![Script::Reply("from openai")]),
            ],
            ProviderKind::Gemini,
        );

        store.submit("one").await;
        let before = store.transcript();

        store.select_provider(ProviderKind::OpenAi);
        assert_eq!(store.provider(), ProviderKind::OpenAi);
        assert_eq!(store.transcript(), before);

        store.submit("two").await;
        let after = store.transcript();
        assert_eq!(&after[..before.len()], &before[..]);
        assert_eq!(after[2].provider, Some(ProviderKind::Gemini));
        assert_eq!(after[4].text, "from openai");
        assert_eq!(after[4].provider, Some(ProviderKind::OpenAi));
    }

    #[tokio::test]
    async fn test_subscribe_sees_turn_events_in_order() {
        let store = store_with(
            vec![ScriptedProvider::new(ProviderKind::Gemini, vec![Script::Reply("ok")])],
            ProviderKind::Gemini,
        );
        let mut rx = store.subscribe();

        store.submit("hi").await;
        store.select_provider(ProviderKind::OpenAi);
        // selecting the current provider again emits nothing
        store.select_provider(ProviderKind::OpenAi);

        assert_eq!(rx.recv().await.unwrap(), StoreEvent::InFlightChanged(true));
        assert!(matches!(
            rx.recv().await.unwrap(),
            StoreEvent::MessageAppended(m) if m.role == Role::User
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            StoreEvent::MessageAppended(m) if m.role == Role::Model
        ));
        assert_eq!(rx.recv().await.unwrap(), StoreEvent::InFlightChanged(false));
        assert_eq!(
            rx.recv().await.unwrap(),
            StoreEvent::ProviderChanged(ProviderKind::OpenAi)
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_gemini_without_key_replies_configuration_error() {
        let dispatcher = Dispatcher::new().with_provider(Box::new(
            crate::providers::GeminiProvider::new(String::new(), "gemini-2.5-flash".to_string()),
        ));
        let store = ConversationStore::new(dispatcher, ProviderKind::Gemini);

        let SubmitOutcome::Replied { reply, .. } = store.submit("hello").await else {
            panic!("expected a reply");
        };
        assert_eq!(reply.text, ProviderKind::Gemini.missing_key_reply());
        assert!(!store.is_in_flight());
    }

    #[tokio::test]
    async fn test_missing_provider_replies_generic_error() {
        let store = store_with(vec![], ProviderKind::OpenAi);
        let SubmitOutcome::Replied { reply, .. } = store.submit("hello").await else {
            panic!("expected a reply");
        };
        assert_eq!(
            reply.text,
            crate::providers::types::GENERIC_ERROR_REPLY
        );
    }
}
