//! Process-wide session registry.
//!
//! One record per live connection, keyed by `clientId`, with lookups by
//! `sessionId` and `clientSessionId`. The expected session count is small,
//! so secondary lookups scan the map instead of maintaining indices. A
//! single mutex guards the whole map: the CHECK handler mutates two records
//! and must hold registry-wide exclusion for its full body.

use std::collections::HashMap;

use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::domain::Session;

/// The locked map of live sessions.
#[derive(Default)]
pub struct SessionMap {
    sessions: HashMap<Uuid, Session>,
}

impl SessionMap {
    pub fn insert(&mut self, session: Session) {
        self.sessions.insert(session.client_id, session);
    }

    #[must_use]
    pub fn get(&self, client_id: &Uuid) -> Option<&Session> {
        self.sessions.get(client_id)
    }

    #[must_use]
    pub fn get_mut(&mut self, client_id: &Uuid) -> Option<&mut Session> {
        self.sessions.get_mut(client_id)
    }

    #[must_use]
    pub fn find_by_session_id_mut(&mut self, session_id: &Uuid) -> Option<&mut Session> {
        self.sessions
            .values_mut()
            .find(|s| s.session_id == *session_id)
    }

    #[must_use]
    pub fn find_by_client_session_id_mut(
        &mut self,
        client_session_id: &Uuid,
    ) -> Option<&mut Session> {
        self.sessions
            .values_mut()
            .find(|s| s.client_session_id == Some(*client_session_id))
    }

    /// Remove a record, cancelling its authorization-window reaper.
    /// Idempotent: removing an absent record is a no-op.
    pub fn remove(&mut self, client_id: &Uuid) -> Option<Session> {
        let mut session = self.sessions.remove(client_id)?;
        session.cancel_reaper();
        Some(session)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshot of live client ids, for the liveness sweep.
    #[must_use]
    pub fn client_ids(&self) -> Vec<Uuid> {
        self.sessions.keys().copied().collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.sessions.values_mut()
    }
}

/// Shared registry handle.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<SessionMap>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire registry-wide exclusion.
    pub async fn lock(&self) -> MutexGuard<'_, SessionMap> {
        self.inner.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn new_session() -> Session {
        let (tx, _rx) = mpsc::unbounded_channel();
        Session::new(tx)
    }

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let registry = SessionRegistry::new();
        let session = new_session();
        let client_id = session.client_id;
        let session_id = session.session_id;

        let mut map = registry.lock().await;
        map.insert(session);

        assert!(map.get(&client_id).is_some());
        assert_eq!(
            map.find_by_session_id_mut(&session_id).unwrap().client_id,
            client_id
        );
        assert!(map.find_by_session_id_mut(&Uuid::new_v4()).is_none());
    }

    #[tokio::test]
    async fn test_lookup_by_client_session_id() {
        let registry = SessionRegistry::new();
        let mut session = new_session();
        let csid = Uuid::new_v4();
        session.client_session_id = Some(csid);
        let client_id = session.client_id;

        let mut map = registry.lock().await;
        map.insert(session);
        map.insert(new_session());

        let found = map.find_by_client_session_id_mut(&csid).unwrap();
        assert_eq!(found.client_id, client_id);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let registry = SessionRegistry::new();
        let session = new_session();
        let client_id = session.client_id;

        let mut map = registry.lock().await;
        map.insert(session);
        assert_eq!(map.len(), 1);

        assert!(map.remove(&client_id).is_some());
        assert!(map.remove(&client_id).is_none());
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn test_client_ids_snapshot() {
        let registry = SessionRegistry::new();
        let mut map = registry.lock().await;
        let a = new_session();
        let b = new_session();
        let mut expected = vec![a.client_id, b.client_id];
        map.insert(a);
        map.insert(b);

        let mut ids = map.client_ids();
        ids.sort();
        expected.sort();
        assert_eq!(ids, expected);
    }
}
