//! Conversation change notifications.
//!
//! A [`ChatController`](crate::chat::ChatController) broadcasts one
//! [`ChatEvent`] per observable state change. The server forwards them to
//! the browser as Server-Sent Events; the page applies them to its local
//! copy of the conversation and re-renders.
//!
//! # Example
//!
//! ```rust
//! use streamchat::events::{ChatEvent, sse_event};
//!
//! let event = ChatEvent::TurnDelta {
//!     text: "Hola".to_string(),
//! };
//! let sse = sse_event(&event);
//! assert!(sse.starts_with("event: turn.delta\n"));
//! ```

use serde::{Deserialize, Serialize};

use crate::chat::ConversationSnapshot;

/// How a turn's request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnOutcome {
    /// The stream ran to completion.
    Completed,
    /// Transport failure; the answer holds the communication error message.
    Failed,
    /// The request was aborted; the answer holds the cancellation message.
    Cancelled,
    /// The conversation was cleared underneath the request, which was dropped.
    Superseded,
}

/// A single observable change to a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum ChatEvent {
    /// Full state, sent first on every new subscription.
    #[serde(rename = "snapshot")]
    Snapshot(ConversationSnapshot),

    /// The input box contents changed.
    #[serde(rename = "input.changed")]
    InputChanged {
        text: String,
    },

    /// The in-flight flag flipped.
    #[serde(rename = "processing")]
    Processing {
        processing: bool,
    },

    /// A new turn was appended with an empty answer.
    #[serde(rename = "turn.started")]
    TurnStarted {
        user: String,
    },

    /// Oldest turns were dropped to respect the history bound.
    #[serde(rename = "history.evicted")]
    HistoryEvicted {
        count: usize,
    },

    /// Text appended to the last turn's answer.
    #[serde(rename = "turn.delta")]
    TurnDelta {
        text: String,
    },

    /// The last turn settled; `assistant` is its final answer.
    #[serde(rename = "turn.finished")]
    TurnFinished {
        assistant: String,
        outcome: TurnOutcome,
    },

    /// All turns were removed.
    #[serde(rename = "history.cleared")]
    HistoryCleared,
}

/// Convert a [`ChatEvent`] to an SSE-formatted string.
///
/// The output carries both an `event:` line (for `EventSource` listeners)
/// and a `data:` line with the JSON payload.
pub fn sse_event(evt: &ChatEvent) -> String {
    let json = serde_json::to_string(evt).unwrap_or_else(|e| {
        serde_json::json!({ "type": "error", "data": { "message": e.to_string() } }).to_string()
    });

    let event_name = event_name(evt);

    format!("event: {event_name}\ndata: {json}\n\n")
}

/// Get the SSE event name for a [`ChatEvent`].
pub fn event_name(evt: &ChatEvent) -> &'static str {
    match evt {
        ChatEvent::Snapshot(_) => "snapshot",
        ChatEvent::InputChanged { .. } => "input.changed",
        ChatEvent::Processing { .. } => "processing",
        ChatEvent::TurnStarted { .. } => "turn.started",
        ChatEvent::HistoryEvicted { .. } => "history.evicted",
        ChatEvent::TurnDelta { .. } => "turn.delta",
        ChatEvent::TurnFinished { .. } => "turn.finished",
        ChatEvent::HistoryCleared => "history.cleared",
    }
}
