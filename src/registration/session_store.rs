//! Session store — in-memory per-user conversation sessions.
//!
//! Each identity owns a lock slot. `lock()` hands out a guard that keeps the
//! slot locked across `.await` points, so a caller can read the session, call
//! out to the database, and write the result back without another delivery
//! for the same user slipping in between. Different identities never share a
//! slot, so one user's slow request never holds up another's.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use super::state::{ConversationState, Session};

type Slot = Arc<Mutex<Option<Session>>>;

#[derive(Default)]
struct Slots {
    map: StdMutex<HashMap<String, Slot>>,
}

impl Slots {
    /// The slot map. Only held for map lookups, never across an `.await`.
    fn map(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.map.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, identity: &str) -> Slot {
        Arc::clone(self.map().entry(identity.to_string()).or_default())
    }

    /// Drop the slot for `identity` if it is empty and nobody holds or waits on it.
    fn prune(&self, identity: &str) {
        let mut map = self.map();
        let removable = map.get(identity).is_some_and(|slot| {
            Arc::strong_count(slot) == 1 && slot.try_lock().is_ok_and(|s| s.is_none())
        });
        if removable {
            map.remove(identity);
        }
    }
}

/// Concurrency-safe map from user identity to [`Session`].
///
/// Cloning is cheap and clones share the same sessions.
#[derive(Clone, Default)]
pub struct SessionStore {
    slots: Arc<Slots>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the session for `identity` for an atomic read-modify-write.
    ///
    /// Waits while another guard for the same identity is alive.
    pub async fn lock(&self, identity: &str) -> SessionGuard {
        let slot = self.slots.slot(identity);
        let guard = slot.lock_owned().await;
        SessionGuard {
            identity: identity.to_string(),
            guard: Some(guard),
            slots: Arc::clone(&self.slots),
        }
    }

    /// Current session, or an idle one if none is stored.
    pub async fn get(&self, identity: &str) -> Session {
        self.lock(identity).await.session()
    }

    /// Store `session`. Storing an idle session removes the entry.
    pub async fn set(&self, session: Session) {
        let identity = session.identity().to_string();
        self.lock(&identity).await.set(session);
    }

    /// Remove any session for `identity`. No-op when there is none.
    pub async fn clear(&self, identity: &str) {
        self.lock(identity).await.clear();
    }

    /// Number of users currently mid-registration.
    ///
    /// Sessions locked at the time of the call are counted as active.
    pub fn active_count(&self) -> usize {
        self.slots
            .map()
            .values()
            .filter(|slot| slot.try_lock().map_or(true, |s| s.is_some()))
            .count()
    }

    /// Drop sessions that have not changed for longer than `max_idle`.
    ///
    /// Sessions currently locked by a handler are skipped. Returns the number
    /// of sessions dropped.
    pub fn expire_idle(&self, max_idle: Duration) -> usize {
        let now = Utc::now();
        let mut expired = 0;

        self.slots.map().retain(|identity, slot| {
            let Ok(mut entry) = slot.try_lock() else {
                return true;
            };
            let stale = entry.as_ref().is_some_and(|session| {
                (now - session.updated_at())
                    .to_std()
                    .is_ok_and(|age| age > max_idle)
            });
            if stale {
                debug!(user = %identity, "Expiring idle registration session");
                *entry = None;
                expired += 1;
            }
            let empty = entry.is_none();
            drop(entry);
            !(empty && Arc::strong_count(slot) == 1)
        });

        if expired > 0 {
            info!(count = expired, "Expired idle registration sessions");
        }
        expired
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots.map().len()
    }
}

/// Exclusive access to one identity's session.
///
/// Changes made through the guard are visible to the next holder as soon as
/// it is dropped.
pub struct SessionGuard {
    identity: String,
    guard: Option<OwnedMutexGuard<Option<Session>>>,
    slots: Arc<Slots>,
}

impl SessionGuard {
    fn entry(&self) -> Option<&Session> {
        self.guard.as_deref().and_then(Option::as_ref)
    }

    fn entry_mut(&mut self) -> Option<&mut Option<Session>> {
        self.guard.as_deref_mut()
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Snapshot of the locked session, idle if none is stored.
    pub fn session(&self) -> Session {
        self.entry()
            .cloned()
            .unwrap_or_else(|| Session::idle(self.identity.clone()))
    }

    pub fn state(&self) -> ConversationState {
        self.entry()
            .map_or(ConversationState::Idle, Session::state)
    }

    /// Replace the session. An idle session clears the entry instead.
    pub fn set(&mut self, session: Session) {
        debug_assert_eq!(session.identity(), self.identity);
        let value = (!session.is_idle()).then_some(session);
        if let Some(entry) = self.entry_mut() {
            *entry = value;
        }
    }

    pub fn clear(&mut self) {
        if let Some(entry) = self.entry_mut() {
            *entry = None;
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        // Release the slot before pruning so the strong count reflects other holders only.
        drop(self.guard.take());
        self.slots.prune(&self.identity);
    }
}

/// Spawn a background task that expires idle sessions every minute.
pub fn spawn_expiry_task(store: SessionStore, max_idle: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            store.expire_idle(max_idle);
        }
    })
}
