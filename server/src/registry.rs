//! Concurrent map from user id to the live session for that user

use crate::session::Session;
use parking_lot::Mutex;
use parlor_shared::UserId;
use std::collections::HashMap;
use std::sync::Arc;

/// At most one session per user.
///
/// Every operation takes the lock only long enough to touch the map. Nothing
/// is awaited and no transport is written while it is held.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<UserId, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `session` as the live session for its user.
    ///
    /// A previous session for the same user is replaced, closed, and returned.
    pub fn register(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        let evicted = self.sessions.lock().insert(session.user_id(), session);
        if let Some(old) = &evicted {
            old.close();
        }
        evicted
    }

    pub fn lookup(&self, user_id: UserId) -> Option<Arc<Session>> {
        self.sessions.lock().get(&user_id).cloned()
    }

    pub fn remove(&self, user_id: UserId) -> Option<Arc<Session>> {
        self.sessions.lock().remove(&user_id)
    }

    /// Remove the entry for `session`'s user only if it still points at this
    /// very connection. A teardown racing with a newer login for the same
    /// user leaves the newer session in place.
    pub fn remove_if_current(&self, session: &Session) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get(&session.user_id()) {
            Some(current) if current.connection_id() == session.connection_id() => {
                sessions.remove(&session.user_id());
                true
            }
            _ => false,
        }
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.sessions.lock().contains_key(&user_id)
    }

    /// Online state for each id, resolved under a single lock acquisition.
    pub fn online_states(&self, user_ids: &[UserId]) -> Vec<bool> {
        let sessions = self.sessions.lock();
        user_ids.iter().map(|id| sessions.contains_key(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visit every live session.
    ///
    /// The visitor runs on a snapshot taken under the lock, after the lock is
    /// released, so it may write to transports.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&Arc<Session>),
    {
        let snapshot: Vec<Arc<Session>> = self.sessions.lock().values().cloned().collect();
        for session in &snapshot {
            visit(session);
        }
    }
}
