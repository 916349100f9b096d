//! Conversation data model.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Hard cap on prompt length, in characters.
pub const MAX_INPUT_CHARS: usize = 500;

/// Default number of turns kept per conversation.
pub const DEFAULT_MAX_HISTORY_LENGTH: usize = 20;

/// Trim surrounding whitespace and cap the prompt at [`MAX_INPUT_CHARS`].
///
/// Truncation counts characters, so a multi-byte character is never split.
#[must_use]
pub fn sanitize_input(text: &str) -> String {
    text.trim().chars().take(MAX_INPUT_CHARS).collect()
}

/// One user question paired with its (possibly partial) answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    /// Sanitized prompt.
    pub user: String,
    /// Assistant answer, grown in place while streaming.
    pub assistant: String,
}

impl ChatTurn {
    #[must_use]
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: String::new(),
        }
    }
}

/// Mutable conversation state owned by a chat controller.
#[derive(Debug, Clone)]
pub struct ConversationState {
    turns: VecDeque<ChatTurn>,
    /// True while a generation request is in flight.
    pub processing: bool,
    /// Text currently in the input box.
    pub current_input: String,
    max_history_length: usize,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY_LENGTH)
    }
}

impl ConversationState {
    /// Create an empty conversation.
    ///
    /// A bound of zero is raised to one so the turn being answered is
    /// never evicted by its own append.
    #[must_use]
    pub fn new(max_history_length: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            processing: false,
            current_input: String::new(),
            max_history_length: max_history_length.max(1),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Append a turn, evicting the oldest ones beyond the bound.
    ///
    /// Returns the number of evicted turns.
    pub fn push_turn(&mut self, turn: ChatTurn) -> usize {
        self.turns.push_back(turn);
        let mut evicted = 0;
        while self.turns.len() > self.max_history_length {
            self.turns.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// The turn currently being answered, if any.
    pub fn last_turn_mut(&mut self) -> Option<&mut ChatTurn> {
        self.turns.back_mut()
    }

    /// Drop every turn and reset the in-flight flag.
    pub fn clear(&mut self) {
        self.turns.clear();
        self.processing = false;
    }

    #[must_use]
    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            turns: self.turns.iter().cloned().collect(),
            processing: self.processing,
            current_input: self.current_input.clone(),
            max_history_length: self.max_history_length,
        }
    }
}

/// Serializable copy of a conversation, handed to the UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub turns: Vec<ChatTurn>,
    pub processing: bool,
    pub current_input: String,
    pub max_history_length: usize,
}
