//! Conversational Session Store
//!
//! In-memory record of every text-chat onboarding dialogue, keyed by a
//! generated UUID. The store is owned by the application state and handed to
//! each connection; tool callbacks mutate it while a turn is running.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::{sync::RwLock, task::JoinHandle};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session '{0}' not found")]
    SessionNotFound(Uuid),
}

/// One `save_answer` call, in the order it happened.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEvent {
    pub key: String,
    pub value: String,
    pub recorded_at: DateTime<Utc>,
}

/// Server-side record of one user's in-progress dialogue.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub answers: HashMap<String, String>,
    pub history: Vec<HistoryEvent>,
    /// The schema document the client sent with its `start` message.
    pub schema: Value,
    pub turn_count: u32,
    pub last_llm_message: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    /// Open connections driving this session. Attached sessions never expire.
    #[serde(skip)]
    pub connections: u32,
}

impl Session {
    fn new(schema: Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            answers: HashMap::new(),
            history: Vec::new(),
            schema,
            turn_count: 0,
            last_llm_message: String::new(),
            created_at: now,
            last_active: now,
            connections: 0,
        }
    }
}

/// Read-only snapshot returned to the agent by `get_session_data`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionData {
    pub answers: HashMap<String, String>,
    pub history: Vec<HistoryEvent>,
}

/// Notification that an answer was written.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerSaved {
    pub session_id: Uuid,
    pub key: String,
    pub value: String,
}

/// The process-wide session table.
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, Session>>,
    ttl: Duration,
}

impl SessionStore {
    /// Creates an empty store whose sessions expire after `ttl` of inactivity.
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Registers a fresh session and returns its identifier.
    pub async fn start(&self, schema: Value) -> Uuid {
        let session = Session::new(schema);
        let id = session.id;
        self.sessions.write().await.insert(id, session);
        info!(session_id = %id, "Session started");
        id
    }

    /// Upserts `answers[key] = value` and appends a history event.
    ///
    /// Unknown ids leave the store untouched.
    pub async fn save_answer(
        &self,
        id: Uuid,
        key: &str,
        value: &str,
    ) -> Result<AnswerSaved, SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&id)
            .ok_or(SessionError::SessionNotFound(id))?;

        let now = Utc::now();
        session.answers.insert(key.to_string(), value.to_string());
        session.history.push(HistoryEvent {
            key: key.to_string(),
            value: value.to_string(),
            recorded_at: now,
        });
        session.last_active = now;
        debug!(session_id = %id, %key, "Answer saved");

        Ok(AnswerSaved {
            session_id: id,
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    pub async fn get_session_data(&self, id: Uuid) -> Result<SessionData, SessionError> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(&id).ok_or(SessionError::SessionNotFound(id))?;
        Ok(SessionData {
            answers: session.answers.clone(),
            history: session.history.clone(),
        })
    }

    pub async fn get(&self, id: Uuid) -> Option<Session> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Marks a completed turn and returns the new turn count.
    pub async fn record_turn(&self, id: Uuid, last_llm_message: &str) -> Result<u32, SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&id)
            .ok_or(SessionError::SessionNotFound(id))?;
        session.turn_count += 1;
        session.last_llm_message = last_llm_message.to_string();
        session.last_active = Utc::now();
        Ok(session.turn_count)
    }

    /// Refreshes the idle clock of a session.
    pub async fn touch(&self, id: Uuid) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&id)
            .ok_or(SessionError::SessionNotFound(id))?;
        session.last_active = Utc::now();
        Ok(())
    }

    /// Marks a connection as driving `id`; the sweeper skips it until the
    /// matching `detach`.
    pub async fn attach(&self, id: Uuid) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&id)
            .ok_or(SessionError::SessionNotFound(id))?;
        session.connections += 1;
        session.last_active = Utc::now();
        Ok(())
    }

    /// Releases a connection. The idle clock restarts from now.
    pub async fn detach(&self, id: Uuid) {
        if let Some(session) = self.sessions.write().await.get_mut(&id) {
            session.connections = session.connections.saturating_sub(1);
            session.last_active = Utc::now();
        }
    }

    /// Drops every detached session idle for longer than the configured TTL.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| {
            s.connections > 0 || now.signed_duration_since(s.last_active) <= ttl
        });
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

/// Spawns a task that purges expired sessions every `every`.
pub fn spawn_sweeper(store: Arc<SessionStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let removed = store.purge_expired(Utc::now()).await;
            if removed > 0 {
                info!(removed, "Purged idle sessions");
            }
        }
    })
}
