//! Per-session state (currently just GitHub access tokens), kept behind a trait so the workflow
//! never reaches for global state.

use std::collections::HashMap;
use std::sync::Mutex;

/// Storage for values tied to a session identifier.
pub trait SessionStore: Send + Sync {
    fn get(&self, session: &str) -> Option<String>;
    fn insert(&self, session: &str, value: String);
    fn remove(&self, session: &str) -> Option<String>;
}

/// A [SessionStore] that lives for the duration of the process.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, session: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(session)
            .cloned()
    }

    fn insert(&self, session: &str, value: String) {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(session.to_string(), value);
    }

    fn remove(&self, session: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(session)
    }
}
