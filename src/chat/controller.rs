//! Streaming chat state machine.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::events::{ChatEvent, TurnOutcome};
use crate::generation::GenerationClient;

use super::turn::{ChatTurn, ConversationSnapshot, ConversationState, sanitize_input};

/// Answer text written when the generation server cannot be reached.
pub const COMMUNICATION_ERROR_MESSAGE: &str = "Error de comunicación.";

/// Answer text written when the request is aborted.
pub const CANCELLED_MESSAGE: &str = "La solicitud fue cancelada.";

/// Key that submits the current input.
pub const SUBMIT_KEY: &str = "Enter";

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Why a submission was ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// A request is already in flight.
    #[error("a request is already in progress")]
    Busy,
    /// The input is empty after trimming.
    #[error("input is empty")]
    EmptyInput,
}

/// The request started by a successful [`ChatController::begin`].
#[derive(Debug)]
struct ActiveTurn {
    epoch: u64,
    prompt: String,
    token: CancellationToken,
}

/// Settles an abandoned turn as cancelled.
struct SettleOnDrop<'a> {
    controller: &'a ChatController,
    turn: &'a ActiveTurn,
    armed: bool,
}

impl Drop for SettleOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!(epoch = self.turn.epoch, "Request future dropped");
            self.controller.finish(self.turn, TurnOutcome::Cancelled);
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: ConversationState,
    /// Bumped on every submit and clear; a request only writes while its
    /// epoch is current.
    epoch: u64,
    in_flight: Option<CancellationToken>,
}

/// Owns one conversation and drives its generation requests.
///
/// State sits behind a mutex that is never held across an `.await`;
/// every change is broadcast as a [`ChatEvent`] while the lock is held,
/// so subscribers see changes in the order they were applied.
pub struct ChatController {
    client: Arc<dyn GenerationClient>,
    inner: Mutex<Inner>,
    events: broadcast::Sender<ChatEvent>,
    closed: CancellationToken,
}

impl std::fmt::Debug for ChatController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatController")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl ChatController {
    /// Create a controller with an empty conversation.
    #[must_use]
    pub fn new(client: Arc<dyn GenerationClient>, max_history_length: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            client,
            inner: Mutex::new(Inner {
                state: ConversationState::new(max_history_length),
                epoch: 0,
                in_flight: None,
            }),
            events,
            closed: CancellationToken::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ChatEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Subscribe to change notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    /// Subscribe and snapshot under one lock.
    ///
    /// Every event received afterwards was applied after the snapshot.
    #[must_use]
    pub fn subscribe_with_snapshot(&self) -> (broadcast::Receiver<ChatEvent>, ConversationSnapshot) {
        let inner = self.lock();
        (self.events.subscribe(), inner.state.snapshot())
    }

    /// Number of live event subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    #[must_use]
    pub fn snapshot(&self) -> ConversationSnapshot {
        self.lock().state.snapshot()
    }

    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.lock().state.processing
    }

    /// Replace the input box contents.
    pub fn set_input(&self, text: impl Into<String>) {
        let text = text.into();
        let mut inner = self.lock();
        inner.state.current_input.clone_from(&text);
        self.emit(ChatEvent::InputChanged { text });
    }

    /// Submit the current input and stream the answer to completion.
    pub async fn submit(&self) -> Result<TurnOutcome, Rejection> {
        let turn = self.begin()?;
        Ok(self.drive(turn).await)
    }

    /// Like [`submit`](Self::submit), but runs the request on the runtime.
    ///
    /// The synchronous part (validation, new turn, input cleared) has
    /// happened by the time this returns.
    pub fn spawn_submit(self: &Arc<Self>) -> Result<JoinHandle<TurnOutcome>, Rejection> {
        let turn = self.begin()?;
        let this = Arc::clone(self);
        Ok(tokio::spawn(async move { this.drive(turn).await }))
    }

    /// Submit on [`SUBMIT_KEY`] when idle; any other key is ignored.
    pub async fn handle_key(&self, key: &str) -> Option<TurnOutcome> {
        if key != SUBMIT_KEY || self.is_processing() {
            return None;
        }
        self.submit().await.ok()
    }

    /// Abort the in-flight request, if any.
    ///
    /// Returns whether there was a request to abort.
    pub fn cancel(&self) -> bool {
        let inner = self.lock();
        match &inner.in_flight {
            Some(token) => {
                tracing::info!(name: "chat.turn.cancel", epoch = inner.epoch, "Cancelling request");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop all turns and reset the in-flight flag.
    ///
    /// An in-flight request is aborted and anything it produces afterwards
    /// is ignored.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.epoch += 1;
        if let Some(token) = inner.in_flight.take() {
            token.cancel();
        }
        inner.state.clear();
        self.emit(ChatEvent::HistoryCleared);
        self.emit(ChatEvent::Processing { processing: false });
    }

    /// Clear the conversation and end every event stream.
    pub fn close(&self) {
        self.clear();
        self.closed.cancel();
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub fn closed(&self) -> WaitForCancellationFutureOwned {
        self.closed.clone().cancelled_owned()
    }

    /// Validate the input and record the new turn.
    fn begin(&self) -> Result<ActiveTurn, Rejection> {
        let mut inner = self.lock();
        if inner.state.processing {
            return Err(Rejection::Busy);
        }
        let prompt = sanitize_input(&inner.state.current_input);
        if prompt.is_empty() {
            return Err(Rejection::EmptyInput);
        }

        inner.state.processing = true;
        self.emit(ChatEvent::Processing { processing: true });

        let evicted = inner.state.push_turn(ChatTurn::new(prompt.clone()));
        self.emit(ChatEvent::TurnStarted {
            user: prompt.clone(),
        });
        if evicted > 0 {
            self.emit(ChatEvent::HistoryEvicted { count: evicted });
        }

        inner.state.current_input.clear();
        self.emit(ChatEvent::InputChanged {
            text: String::new(),
        });

        inner.epoch += 1;
        let token = CancellationToken::new();
        inner.in_flight = Some(token.clone());

        tracing::info!(
            name: "chat.turn.started",
            epoch = inner.epoch,
            prompt_chars = prompt.chars().count(),
            history_len = inner.state.len(),
            "Turn started"
        );

        Ok(ActiveTurn {
            epoch: inner.epoch,
            prompt,
            token,
        })
    }

    /// Run the request for `turn` and settle it.
    ///
    /// Dropping the returned future settles the turn as cancelled.
    async fn drive(&self, turn: ActiveTurn) -> TurnOutcome {
        let mut guard = SettleOnDrop {
            controller: self,
            turn: &turn,
            armed: true,
        };
        let outcome = self.stream_answer(&turn).await;
        guard.armed = false;

        match outcome {
            TurnOutcome::Superseded => outcome,
            _ => self.finish(&turn, outcome),
        }
    }

    /// Stream fragments into the last turn until the request ends.
    async fn stream_answer(&self, turn: &ActiveTurn) -> TurnOutcome {
        let opened = tokio::select! {
            biased;
            () = turn.token.cancelled() => return TurnOutcome::Cancelled,
            res = self.client.generate(&turn.prompt) => res,
        };

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(name: "chat.turn.error", epoch = turn.epoch, error = %e, "Generation request failed");
                return TurnOutcome::Failed;
            }
        };

        loop {
            let next = tokio::select! {
                biased;
                () = turn.token.cancelled() => return TurnOutcome::Cancelled,
                item = stream.next() => item,
            };

            match next {
                Some(Ok(fragment)) => {
                    if !self.append_fragment(turn.epoch, fragment) {
                        return TurnOutcome::Superseded;
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(name: "chat.turn.error", epoch = turn.epoch, error = %e, "Generation stream failed");
                    return TurnOutcome::Failed;
                }
                None => return TurnOutcome::Completed,
            }
        }
    }

    /// Append to the last answer. Returns false if the request is stale.
    fn append_fragment(&self, epoch: u64, fragment: String) -> bool {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            return false;
        }
        if fragment.is_empty() {
            return true;
        }
        if let Some(last) = inner.state.last_turn_mut() {
            last.assistant.push_str(&fragment);
        }
        tracing::trace!(epoch, delta_len = fragment.len(), "Fragment");
        self.emit(ChatEvent::TurnDelta { text: fragment });
        true
    }

    /// Settle the turn and reset the in-flight flag.
    fn finish(&self, turn: &ActiveTurn, outcome: TurnOutcome) -> TurnOutcome {
        let mut inner = self.lock();
        if inner.epoch != turn.epoch {
            tracing::debug!(epoch = turn.epoch, "Dropping result of cleared turn");
            return TurnOutcome::Superseded;
        }

        let replacement = match outcome {
            TurnOutcome::Failed => Some(COMMUNICATION_ERROR_MESSAGE),
            TurnOutcome::Cancelled => Some(CANCELLED_MESSAGE),
            TurnOutcome::Completed | TurnOutcome::Superseded => None,
        };

        let assistant = match inner.state.last_turn_mut() {
            Some(last) => {
                if let Some(text) = replacement {
                    last.assistant = text.to_string();
                }
                last.assistant.clone()
            }
            None => String::new(),
        };

        inner.state.processing = false;
        inner.in_flight = None;

        tracing::info!(
            name: "chat.turn.finished",
            epoch = turn.epoch,
            outcome = ?outcome,
            answer_chars = assistant.chars().count(),
            "Turn finished"
        );

        self.emit(ChatEvent::TurnFinished { assistant, outcome });
        self.emit(ChatEvent::Processing { processing: false });
        outcome
    }
}
