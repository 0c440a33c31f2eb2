use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use lumen_llm::{DispatchResult, PromptDispatcher};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::message::{Message, MessageId, Sender};
use crate::transcript::{Transcript, TranscriptSnapshot};

pub const DEFAULT_FALLBACK_MESSAGE: &str =
    "Sorry, I couldn't reach the tutor right now. Please check your connection and try again.";

/// Counter identifying one prompt/answer exchange within a session.
///
/// A resolution is only accepted while its turn is the one being awaited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TurnId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExchangeState {
    #[default]
    Idle,
    AwaitingResponse(TurnId),
}

impl ExchangeState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn awaited_turn(&self) -> Option<TurnId> {
        match self {
            Self::Idle => None,
            Self::AwaitingResponse(turn) => Some(*turn),
        }
    }
}

/// What `submit` does with input that arrives while an answer is still pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverlapPolicy {
    /// Keep the newest input and send it once the current exchange resolves.
    #[default]
    Queue,
    /// Discard the input.
    Drop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub fallback_message: String,
    pub overlap_policy: OverlapPolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            fallback_message: DEFAULT_FALLBACK_MESSAGE.to_string(),
            overlap_policy: OverlapPolicy::default(),
        }
    }
}

impl ControllerConfig {
    pub fn with_fallback_message(mut self, fallback_message: impl Into<String>) -> Self {
        self.fallback_message = fallback_message.into();
        self
    }

    pub fn with_overlap_policy(mut self, overlap_policy: OverlapPolicy) -> Self {
        self.overlap_policy = overlap_policy;
        self
    }

    fn normalized(mut self) -> Self {
        if self.fallback_message.trim().is_empty() {
            self.fallback_message = DEFAULT_FALLBACK_MESSAGE.to_string();
        }
        self
    }
}

/// Drives one conversational session: optimistic user appends, one dispatch at a time,
/// and an assistant append for every resolution.
///
/// Dispatches run on the ambient Tokio runtime, so `submit` must be called from within
/// one. Dropping the controller tears the session down; answers that resolve afterwards
/// are discarded.
pub struct ConversationController {
    shared: Arc<Shared>,
}

struct Shared {
    dispatcher: Arc<dyn PromptDispatcher>,
    transcript: Transcript,
    config: ControllerConfig,
    cancel: CancellationToken,
    state_tx: watch::Sender<ExchangeState>,
    inner: Mutex<Inner>,
}

struct Inner {
    state: ExchangeState,
    pending: Option<String>,
    next_message_id: u64,
    next_turn: u64,
    torn_down: bool,
}

impl Inner {
    fn alloc_message_id(&mut self) -> MessageId {
        let id = MessageId::new(self.next_message_id);
        self.next_message_id = self.next_message_id.saturating_add(1);
        id
    }

    fn alloc_turn(&mut self) -> TurnId {
        let turn = TurnId(self.next_turn);
        self.next_turn = self.next_turn.saturating_add(1);
        turn
    }
}

impl ConversationController {
    pub fn new(dispatcher: Arc<dyn PromptDispatcher>, config: ControllerConfig) -> Self {
        let (state_tx, _) = watch::channel(ExchangeState::Idle);
        Self {
            shared: Arc::new(Shared {
                dispatcher,
                transcript: Transcript::new(),
                config: config.normalized(),
                cancel: CancellationToken::new(),
                state_tx,
                inner: Mutex::new(Inner {
                    state: ExchangeState::Idle,
                    pending: None,
                    next_message_id: 1,
                    next_turn: 1,
                    torn_down: false,
                }),
            }),
        }
    }

    /// Accepts raw user input.
    ///
    /// Blank input is ignored. Otherwise the trimmed text is appended as a user message
    /// before the dispatcher is invoked, and the answer shows up in the transcript later.
    pub fn submit(&self, raw: &str) {
        let text = raw.trim();
        if text.is_empty() {
            tracing::trace!("ignoring blank submission");
            return;
        }

        let mut inner = self.shared.lock_inner();
        match inner.state {
            ExchangeState::Idle => {
                Shared::begin_exchange(&self.shared, &mut inner, text.to_string());
            }
            ExchangeState::AwaitingResponse(turn) => match self.shared.config.overlap_policy {
                OverlapPolicy::Queue => {
                    let replaced = inner.pending.replace(text.to_string()).is_some();
                    tracing::debug!(
                        awaited_turn = turn.0,
                        replaced,
                        "queued submission until the current answer arrives"
                    );
                }
                OverlapPolicy::Drop => {
                    tracing::info!(
                        awaited_turn = turn.0,
                        "dropped submission while an answer is pending"
                    );
                }
            },
        }
    }

    pub fn state(&self) -> ExchangeState {
        self.shared.lock_inner().state
    }

    pub fn pending_input(&self) -> Option<String> {
        self.shared.lock_inner().pending.clone()
    }

    pub fn snapshot(&self) -> TranscriptSnapshot {
        self.shared.transcript.snapshot()
    }

    /// Receives a fresh transcript snapshot after every append.
    pub fn subscribe(&self) -> watch::Receiver<TranscriptSnapshot> {
        self.shared.transcript.subscribe()
    }

    pub fn dispatcher_id(&self) -> &str {
        self.shared.dispatcher.id()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.shared.config
    }

    /// Waits until no answer is pending and nothing is queued.
    pub async fn settled(&self) {
        let mut state = self.shared.state_tx.subscribe();
        // The sender lives as long as `self`, so this only errors during teardown.
        let _ = state.wait_for(ExchangeState::is_idle).await;
    }
}

impl Drop for ConversationController {
    fn drop(&mut self) {
        let mut inner = self.shared.lock_inner();
        inner.torn_down = true;
        let discarded_pending = inner.pending.take().is_some();
        // Cancel under the lock so an in-progress resolution either finished already or
        // will see the teardown.
        self.shared.cancel.cancel();
        tracing::debug!(
            awaited_turn = inner.state.awaited_turn().map(|turn| turn.0),
            discarded_pending,
            "conversation session torn down"
        );
    }
}

impl Shared {
    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends the user message and spawns its dispatch. Returns whether an exchange started.
    ///
    /// Nothing changes when no tokio runtime is available to run the dispatch.
    fn begin_exchange(shared: &Arc<Self>, inner: &mut Inner, text: String) -> bool {
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(error) => {
                tracing::warn!(%error, "no async runtime to dispatch on; submission dropped");
                return false;
            }
        };
        let message_id = inner.alloc_message_id();
        let Some(message) = Message::new(message_id, Sender::User, text.clone()) else {
            return false;
        };
        shared.transcript.append(message);

        let turn = inner.alloc_turn();
        inner.state = ExchangeState::AwaitingResponse(turn);
        shared.state_tx.send_replace(inner.state);
        tracing::debug!(
            turn = turn.0,
            message_id = %message_id,
            dispatcher_id = %shared.dispatcher.id(),
            "dispatching prompt"
        );

        runtime.spawn(run_exchange(
            Arc::downgrade(shared),
            shared.dispatcher.clone(),
            shared.cancel.child_token(),
            turn,
            text,
        ));
        true
    }

    fn resolve(self: &Arc<Self>, turn: TurnId, result: DispatchResult<String>) {
        let mut inner = self.lock_inner();
        if inner.torn_down || self.cancel.is_cancelled() {
            tracing::debug!(turn = turn.0, "discarding answer for a torn-down session");
            return;
        }

        if inner.state != ExchangeState::AwaitingResponse(turn) {
            tracing::warn!(
                turn = turn.0,
                state = ?inner.state,
                "discarding answer for a turn that is no longer awaited"
            );
            return;
        }

        let text = match result {
            Ok(answer) if !answer.trim().is_empty() => answer,
            Ok(_) => {
                tracing::warn!(
                    turn = turn.0,
                    dispatcher_id = %self.dispatcher.id(),
                    "dispatcher returned a blank answer; using fallback"
                );
                self.config.fallback_message.clone()
            }
            Err(error) => {
                tracing::warn!(
                    turn = turn.0,
                    dispatcher_id = %self.dispatcher.id(),
                    stage = error.stage(),
                    error = %error,
                    "dispatch failed; using fallback"
                );
                self.config.fallback_message.clone()
            }
        };

        let message_id = inner.alloc_message_id();
        if let Some(message) = Message::new(message_id, Sender::Assistant, text) {
            self.transcript.append(message);
        }
        inner.state = ExchangeState::Idle;
        tracing::debug!(turn = turn.0, message_id = %message_id, "answer appended");

        let replayed = match inner.pending.take() {
            Some(next) => Self::begin_exchange(self, &mut inner, next),
            None => false,
        };
        if !replayed {
            self.state_tx.send_replace(ExchangeState::Idle);
        }
    }
}

async fn run_exchange(
    session: Weak<Shared>,
    dispatcher: Arc<dyn PromptDispatcher>,
    cancel: CancellationToken,
    turn: TurnId,
    prompt: String,
) {
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::debug!(turn = turn.0, "dispatch abandoned by teardown");
            return;
        }
        result = dispatcher.send(&prompt) => result,
    };

    let Some(shared) = session.upgrade() else {
        tracing::debug!(turn = turn.0, "session dropped before the answer arrived");
        return;
    };
    shared.resolve(turn, result);
}


#[cfg(test)]
mod tests {
    use super::testing::{StubDispatcher, offline};
    use super::*;

    fn controller_with(
        config: ControllerConfig,
    ) -> (
        ConversationController,
        Arc<StubDispatcher>,
        tokio::sync::mpsc::UnboundedSender<DispatchResult<String>>,
    ) {
        let (dispatcher, replies) = StubDispatcher::new();
        let dispatcher = Arc::new(dispatcher);
        let controller = ConversationController::new(dispatcher.clone(), config);
        (controller, dispatcher, replies)
    }

    fn transcript_pairs(snapshot: &TranscriptSnapshot) -> Vec<(Sender, String)> {
        snapshot
            .iter()
            .map(|message| (message.sender(), message.text().to_string()))
            .collect()
    }

    async fn wait_for_len(updates: &mut watch::Receiver<TranscriptSnapshot>, len: usize) {
        updates
            .wait_for(|snapshot| snapshot.len() >= len)
            .await
            .expect("transcript still alive");
    }

    #[tokio::test]
    async fn hello_yields_user_then_assistant_answer() {
        let (controller, dispatcher, replies) = controller_with(ControllerConfig::default());
        replies.send(Ok("X".to_string())).unwrap();

        controller.submit("hello");
        controller.settled().await;

        assert_eq!(
            transcript_pairs(&controller.snapshot()),
            vec![
                (Sender::User, "hello".to_string()),
                (Sender::Assistant, "X".to_string()),
            ]
        );
        assert_eq!(dispatcher.prompts(), vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn user_message_is_visible_before_dispatch_starts() {
        let (controller, dispatcher, replies) = controller_with(ControllerConfig::default());

        controller.submit("  what is photosynthesis?  ");

        // Nothing has been polled yet on this single-threaded runtime.
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].text(), "what is photosynthesis?");
        assert!(dispatcher.prompts().is_empty());
        assert_eq!(
            controller.state(),
            ExchangeState::AwaitingResponse(TurnId(1))
        );

        replies.send(Ok("Plants turn light into sugar.".to_string())).unwrap();
        controller.settled().await;

        assert_eq!(dispatcher.prompts(), vec!["what is photosynthesis?".to_string()]);
        assert_eq!(controller.snapshot().len(), 2);
        assert!(controller.state().is_idle());
    }

    #[tokio::test]
    async fn blank_input_changes_nothing() {
        let (controller, dispatcher, _replies) = controller_with(ControllerConfig::default());
        let updates = controller.subscribe();

        controller.submit("");
        controller.submit("   ");
        controller.submit("\n\t");

        assert!(controller.snapshot().is_empty());
        assert!(controller.state().is_idle());
        assert!(!updates.has_changed().unwrap());
        tokio::task::yield_now().await;
        assert!(dispatcher.prompts().is_empty());
    }

    #[tokio::test]
    async fn every_exchange_adds_exactly_two_messages_in_order() {
        let (controller, _dispatcher, replies) = controller_with(ControllerConfig::default());

        for round in 1..=5 {
            replies.send(Ok(format!("answer {round}"))).unwrap();
            controller.submit(&format!("question {round}"));
            controller.settled().await;

            let snapshot = controller.snapshot();
            assert_eq!(snapshot.len(), round * 2);
            assert_eq!(snapshot[round * 2 - 2].sender(), Sender::User);
            assert_eq!(snapshot[round * 2 - 1].sender(), Sender::Assistant);
            assert_eq!(snapshot[round * 2 - 1].text(), format!("answer {round}"));
        }

        let ids = controller
            .snapshot()
            .iter()
            .map(|message| message.id())
            .collect::<Vec<_>>();
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[tokio::test]
    async fn failures_become_the_fallback_and_the_session_stays_usable() {
        let config = ControllerConfig::default().with_fallback_message("Connection problem.");
        let (controller, _dispatcher, replies) = controller_with(config);

        for prompt in ["first", "second"] {
            replies.send(Err(offline())).unwrap();
            controller.submit(prompt);
            controller.settled().await;
        }
        replies.send(Ok("back online".to_string())).unwrap();
        controller.submit("third");
        controller.settled().await;

        assert_eq!(
            transcript_pairs(&controller.snapshot()),
            vec![
                (Sender::User, "first".to_string()),
                (Sender::Assistant, "Connection problem.".to_string()),
                (Sender::User, "second".to_string()),
                (Sender::Assistant, "Connection problem.".to_string()),
                (Sender::User, "third".to_string()),
                (Sender::Assistant, "back online".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn blank_answers_and_blank_fallback_use_the_default_text() {
        let config = ControllerConfig::default().with_fallback_message("  ");
        let (controller, _dispatcher, replies) = controller_with(config);
        assert_eq!(controller.config().fallback_message, DEFAULT_FALLBACK_MESSAGE);

        replies.send(Ok("   ".to_string())).unwrap();
        controller.submit("hi");
        controller.settled().await;

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[1].text(), DEFAULT_FALLBACK_MESSAGE);
    }

    #[tokio::test]
    async fn overlapping_input_is_queued_and_latest_wins() {
        let (controller, dispatcher, replies) = controller_with(ControllerConfig::default());
        let mut updates = controller.subscribe();

        controller.submit("a");
        controller.submit("b");
        controller.submit("c");
        controller.submit("   ");

        assert_eq!(controller.pending_input(), Some("c".to_string()));
        assert_eq!(controller.snapshot().len(), 1);

        replies.send(Ok("answer a".to_string())).unwrap();
        wait_for_len(&mut updates, 3).await;

        assert_eq!(
            controller.state(),
            ExchangeState::AwaitingResponse(TurnId(2))
        );
        assert_eq!(controller.pending_input(), None);

        replies.send(Ok("answer c".to_string())).unwrap();
        controller.settled().await;

        assert_eq!(
            transcript_pairs(&controller.snapshot()),
            vec![
                (Sender::User, "a".to_string()),
                (Sender::Assistant, "answer a".to_string()),
                (Sender::User, "c".to_string()),
                (Sender::Assistant, "answer c".to_string()),
            ]
        );
        assert_eq!(dispatcher.prompts(), vec!["a".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn overlapping_input_is_dropped_under_drop_policy() {
        let config = ControllerConfig::default().with_overlap_policy(OverlapPolicy::Drop);
        let (controller, dispatcher, replies) = controller_with(config);

        controller.submit("a");
        controller.submit("b");
        assert_eq!(controller.pending_input(), None);

        replies.send(Ok("answer a".to_string())).unwrap();
        controller.settled().await;

        assert_eq!(controller.snapshot().len(), 2);
        assert_eq!(dispatcher.prompts(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn teardown_while_awaiting_discards_the_late_answer() {
        let (controller, dispatcher, replies) = controller_with(ControllerConfig::default());
        let updates = controller.subscribe();

        controller.submit("question");
        controller.submit("queued");
        tokio::task::yield_now().await;
        assert_eq!(dispatcher.prompts(), vec!["question".to_string()]);

        drop(controller);
        let _ = replies.send(Ok("too late".to_string()));
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        assert_eq!(updates.borrow().len(), 1);
        assert_eq!(dispatcher.prompts(), vec!["question".to_string()]);
    }

    #[tokio::test]
    async fn resolution_racing_teardown_is_discarded() {
        let (controller, _dispatcher, _replies) = controller_with(ControllerConfig::default());
        controller.submit("question");
        let shared = controller.shared.clone();

        drop(controller);
        shared.resolve(TurnId(1), Ok("too late".to_string()));

        assert_eq!(shared.transcript.len(), 1);
    }

    #[tokio::test]
    async fn stale_turns_are_ignored() {
        let (controller, _dispatcher, replies) = controller_with(ControllerConfig::default());
        controller.submit("question");

        controller.shared.resolve(TurnId(41), Ok("stale".to_string()));
        assert_eq!(controller.snapshot().len(), 1);
        assert_eq!(
            controller.state(),
            ExchangeState::AwaitingResponse(TurnId(1))
        );

        replies.send(Ok("fresh".to_string())).unwrap();
        controller.settled().await;
        assert_eq!(controller.snapshot()[1].text(), "fresh");
    }

    #[tokio::test]
    async fn snapshots_are_idempotent_between_submissions() {
        let (controller, _dispatcher, replies) = controller_with(ControllerConfig::default());
        replies.send(Ok("X".to_string())).unwrap();
        controller.submit("hello");
        controller.settled().await;

        assert_eq!(controller.snapshot(), controller.snapshot());
    }

    #[test]
    fn overlap_policy_uses_kebab_case_names() {
        let policy: OverlapPolicy = serde_json::from_str("\"drop\"").unwrap();
        assert_eq!(policy, OverlapPolicy::Drop);
        assert_eq!(
            serde_json::to_string(&OverlapPolicy::Queue).unwrap(),
            "\"queue\""
        );
    }

    #[test]
    fn submit_without_a_runtime_leaves_the_session_untouched() {
        let (controller, dispatcher, replies) = controller_with(ControllerConfig::default());

        controller.submit("hello");

        assert!(controller.snapshot().is_empty());
        assert!(controller.state().is_idle());
        assert!(controller.pending_input().is_none());
        assert!(dispatcher.prompts().is_empty());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        replies.send(Ok("X".to_string())).unwrap();
        runtime.block_on(async {
            controller.submit("hello");
            controller.settled().await;
        });

        let texts = controller
            .snapshot()
            .iter()
            .map(|message| message.text().to_string())
            .collect::<Vec<_>>();
        assert_eq!(texts, vec!["hello".to_string(), "X".to_string()]);
    }
}
