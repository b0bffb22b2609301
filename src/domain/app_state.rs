use serde::{Deserialize, Serialize};

use super::entities::Session;

/// Root object handed to storage. Everything the user builds lives here.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(default)]
    pub sessions: Vec<Session>,
    #[serde(default)]
    pub last_session_id: Option<String>,
}

impl PersistedState {
    pub fn session(&self, session_id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == session_id)
    }

    pub fn session_index(&self, session_id: &str) -> Option<usize> {
        self.sessions.iter().position(|s| s.id == session_id)
    }

    /// Session the user was last working in, else the newest one.
    pub fn active_session_id(&self) -> Option<&str> {
        self.last_session_id
            .as_deref()
            .filter(|id| self.session(id).is_some())
            .or_else(|| self.sessions.first().map(|s| s.id.as_str()))
    }
}
