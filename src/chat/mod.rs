//! Conversation state and the streaming chat controller.
//!
//! # Architecture
//!
//! - [`ChatTurn`] / [`ConversationState`]: the conversation data model
//! - [`ChatController`]: submit, stream, cancel and clear for one conversation
//! - [`SessionStore`]: one controller per browser session
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use streamchat::chat::ChatController;
//!
//! let chat = ChatController::new(Arc::new(client), 20);
//! chat.set_input("¿Qué es Rust?");
//! let outcome = chat.submit().await?;
//! println!("{}", chat.snapshot().turns[0].assistant);
//! ```

mod controller;
mod store;
mod turn;

pub use controller::{
    CANCELLED_MESSAGE, COMMUNICATION_ERROR_MESSAGE, ChatController, Rejection, SUBMIT_KEY,
};
pub use store::{Session, SessionStore};
pub use turn::{
    ChatTurn, ConversationSnapshot, ConversationState, DEFAULT_MAX_HISTORY_LENGTH,
    MAX_INPUT_CHARS, sanitize_input,
};
