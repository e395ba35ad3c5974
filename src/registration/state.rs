//! Conversation state — where a user is in the registration dialogue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The steps of the registration dialogue.
///
/// Idle → AwaitingName → AwaitingPhone → (record persisted) → Idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    #[default]
    Idle,
    AwaitingName,
    AwaitingPhone,
}

impl ConversationState {
    /// Whether the user is somewhere inside the registration flow.
    pub fn is_in_flow(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

impl std::fmt::Display for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::AwaitingName => "awaiting_name",
            Self::AwaitingPhone => "awaiting_phone",
        };
        write!(f, "{s}")
    }
}

/// One user's in-progress registration.
///
/// `pending_name` is present exactly when the state is `AwaitingPhone`; the
/// fields are private so the constructors are the only way to build one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    identity: String,
    state: ConversationState,
    pending_name: Option<String>,
    updated_at: DateTime<Utc>,
}

impl Session {
    pub fn idle(identity: impl Into<String>) -> Self {
        Self::build(identity.into(), ConversationState::Idle, None)
    }

    pub fn awaiting_name(identity: impl Into<String>) -> Self {
        Self::build(identity.into(), ConversationState::AwaitingName, None)
    }

    pub fn awaiting_phone(identity: impl Into<String>, name: impl Into<String>) -> Self {
        Self::build(
            identity.into(),
            ConversationState::AwaitingPhone,
            Some(name.into()),
        )
    }

    fn build(identity: String, state: ConversationState, pending_name: Option<String>) -> Self {
        Self {
            identity,
            state,
            pending_name,
            updated_at: Utc::now(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    /// The validated name waiting for a phone number.
    pub fn pending_name(&self) -> Option<&str> {
        self.pending_name.as_deref()
    }

    /// When this session last changed.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// An idle session carries no data and is equivalent to no session.
    pub fn is_idle(&self) -> bool {
        self.state == ConversationState::Idle
    }
}
