//! # Session Store
//!
//! Injectable ownership of live Session records. The engine is the only
//! writer; every mutation goes through [`SessionStore::update`] so status
//! checks and writes happen under one lock.

use std::collections::HashMap;
use std::sync::RwLock;

use super::session::Session;
use crate::error::{EngineError, EngineResult};

/// Mutation applied atomically to one session
pub type SessionMutation<'a> = &'a mut dyn FnMut(&mut Session) -> EngineResult<()>;

pub trait SessionStore: Send + Sync {
    fn insert(&self, session: Session) -> EngineResult<()>;

    fn get(&self, id: &str) -> EngineResult<Session>;

    /// Apply `mutation` to the stored session and return the updated copy.
    /// If the mutation fails the stored session is left untouched.
    fn update(&self, id: &str, mutation: SessionMutation<'_>) -> EngineResult<Session>;

    fn remove(&self, id: &str) -> EngineResult<Session>;

    /// All sessions, oldest first
    fn list(&self) -> EngineResult<Vec<Session>>;
}

/// Process-local session map
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_error(e: impl std::fmt::Display) -> EngineError {
    EngineError::Storage(format!("Lock error: {}", e))
}

impl SessionStore for InMemorySessionStore {
    fn insert(&self, session: Session) -> EngineResult<()> {
        let mut sessions = self.sessions.write().map_err(lock_error)?;
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    fn get(&self, id: &str) -> EngineResult<Session> {
        let sessions = self.sessions.read().map_err(lock_error)?;
        sessions
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::SessionNotFound(id.to_string()))
    }

    fn update(&self, id: &str, mutation: SessionMutation<'_>) -> EngineResult<Session> {
        let mut sessions = self.sessions.write().map_err(lock_error)?;
        let stored = sessions
            .get_mut(id)
            .ok_or_else(|| EngineError::SessionNotFound(id.to_string()))?;

        let mut draft = stored.clone();
        mutation(&mut draft)?;
        draft.touch();
        *stored = draft.clone();
        Ok(draft)
    }

    fn remove(&self, id: &str) -> EngineResult<Session> {
        let mut sessions = self.sessions.write().map_err(lock_error)?;
        sessions
            .remove(id)
            .ok_or_else(|| EngineError::SessionNotFound(id.to_string()))
    }

    fn list(&self) -> EngineResult<Vec<Session>> {
        let sessions = self.sessions.read().map_err(lock_error)?;
        let mut all: Vec<Session> = sessions.values().cloned().collect();
        all.sort_by_key(|s| s.created_at);
        Ok(all)
    }
}
