//! ConversationEngine — drives one user's registration dialogue.
//!
//! Every inbound message is handled while holding that user's session lock,
//! so duplicate or overlapping deliveries for the same user are applied one
//! after another against the state the previous one left behind.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::store::{ConflictKind, Database, InsertOutcome, NewRegistration};

use super::replies;
use super::session_store::{SessionGuard, SessionStore};
use super::state::{ConversationState, Session};
use super::trigger::Trigger;
use super::validation::{validate_name, validate_phone};

/// The registration state machine.
pub struct ConversationEngine {
    sessions: SessionStore,
    db: Arc<dyn Database>,
}

impl ConversationEngine {
    pub fn new(sessions: SessionStore, db: Arc<dyn Database>) -> Self {
        Self { sessions, db }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Handle one message from `identity` and return the reply to send.
    ///
    /// Trigger keywords win over free text in every state. Input mistakes,
    /// conflicts, and failed inserts are answered with a reply; `Err` is only
    /// returned when the account lookup for a new registration fails.
    pub async fn handle(&self, identity: &str, text: &str) -> Result<String, EngineError> {
        let mut guard = self.sessions.lock(identity).await;
        let session = guard.session();
        debug!(user = %identity, state = %session.state(), "Handling message");

        if let Some(trigger) = Trigger::parse(text) {
            return self.apply_trigger(&mut guard, trigger).await;
        }

        let reply = match session.state() {
            ConversationState::Idle => replies::HELP.to_string(),
            ConversationState::AwaitingName => accept_name(&mut guard, text),
            ConversationState::AwaitingPhone => {
                let name = session.pending_name().unwrap_or_default();
                self.accept_phone(&mut guard, name, text).await
            }
        };
        Ok(reply)
    }

    async fn apply_trigger(
        &self,
        guard: &mut SessionGuard,
        trigger: Trigger,
    ) -> Result<String, EngineError> {
        let identity = guard.identity().to_string();
        let state = guard.state();

        let reply = match trigger {
            Trigger::Register => {
                if let Some(record) = self.db.find_user_by_line_id(&identity).await? {
                    info!(user = %identity, user_id = record.id, "Registration requested by registered user");
                    guard.clear();
                    return Ok(replies::ALREADY_REGISTERED.to_string());
                }
                guard.set(Session::awaiting_name(&identity));
                info!(user = %identity, "Registration started");
                replies::NAME_PROMPT
            }
            Trigger::Cancel => {
                if state.is_in_flow() {
                    info!(user = %identity, from = %state, "Registration cancelled");
                }
                guard.clear();
                replies::CANCELLED
            }
            Trigger::CustomerService => {
                info!(user = %identity, "Customer service requested");
                replies::CUSTOMER_SERVICE
            }
            Trigger::Restart => match state {
                ConversationState::AwaitingPhone => {
                    guard.set(Session::awaiting_name(&identity));
                    replies::NAME_PROMPT_AGAIN
                }
                ConversationState::AwaitingName => replies::NAME_PROMPT,
                ConversationState::Idle => replies::HELP,
            },
        };
        Ok(reply.to_string())
    }

    /// Final step: check the phone number and create the account.
    async fn accept_phone(&self, guard: &mut SessionGuard, name: &str, text: &str) -> String {
        if !validate_phone(text) {
            return replies::PHONE_FORMAT_ERROR.to_string();
        }
        let identity = guard.identity().to_string();
        let phone = text.trim();

        match self.db.find_user_by_phone(phone).await {
            Ok(Some(_)) => {
                info!(user = %identity, "Phone number already registered");
                return replies::PHONE_TAKEN.to_string();
            }
            Ok(None) => {}
            Err(e) => {
                error!(user = %identity, error = %e, "Phone lookup failed, resetting registration");
                guard.clear();
                return replies::REGISTRATION_FAILED.to_string();
            }
        }

        let new = NewRegistration {
            name: name.to_string(),
            phone: phone.to_string(),
            line_user_id: identity.clone(),
        };

        match self.db.insert_user(&new).await {
            Ok(InsertOutcome::Created(record)) => {
                guard.clear();
                info!(user = %identity, user_id = record.id, "User registered");
                replies::registration_complete(&record.name, &record.phone)
            }
            Ok(InsertOutcome::Conflict(ConflictKind::Phone)) => {
                info!(user = %identity, "Phone number taken by a concurrent registration");
                replies::PHONE_TAKEN.to_string()
            }
            Ok(InsertOutcome::Conflict(ConflictKind::Identity)) => {
                warn!(user = %identity, "User registered by a concurrent request");
                guard.clear();
                replies::ALREADY_REGISTERED.to_string()
            }
            Err(e) => {
                error!(user = %identity, error = %e, "Registration insert failed, resetting registration");
                guard.clear();
                replies::REGISTRATION_FAILED.to_string()
            }
        }
    }
}

fn accept_name(guard: &mut SessionGuard, text: &str) -> String {
    if !validate_name(text) {
        return replies::NAME_FORMAT_ERROR.to_string();
    }
    let name = text.trim();
    let session = Session::awaiting_phone(guard.identity(), name);
    guard.set(session);
    replies::phone_prompt(name)
}
