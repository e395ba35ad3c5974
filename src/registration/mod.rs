//! Registration dialogue — LINE users sign up by chatting with the bot.
//!
//! The user sends the register keyword, then a name, then a phone number.
//! `ConversationEngine` validates each step, tracks progress in the
//! `SessionStore`, and creates the account once the phone number is
//! accepted.

pub mod engine;
pub mod replies;
pub mod session_store;
pub mod state;
pub mod trigger;
pub mod validation;

pub use engine::ConversationEngine;
pub use session_store::{SessionGuard, SessionStore, spawn_expiry_task};
pub use state::{ConversationState, Session};
pub use trigger::Trigger;
pub use validation::{validate_name, validate_phone};
