// ABOUTME: In-memory session registry mapping session ids to their record and environment handle
// ABOUTME: Owns the canonical session status and enforces the allowed status transitions

use crate::providers::Environment;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Bundle is installed and the session waits for `start`
    Pending,
    /// Environment created, bundle transport in progress
    Preparing,
    Running,
    Stopped,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Preparing => "preparing",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }

    /// Position in the forward lifecycle; terminal states have none
    fn rank(&self) -> Option<u8> {
        match self {
            Self::Preparing => Some(0),
            Self::Pending => Some(1),
            Self::Running => Some(2),
            Self::Stopped | Self::Error => None,
        }
    }

    /// Status only moves forward, except that live states may fail and anything may stop
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        match (self, next) {
            (Self::Stopped, _) => false,
            (_, Self::Stopped) => true,
            (Self::Error, _) => false,
            (_, Self::Error) => true,
            (current, next) => match (current.rank(), next.rank()) {
                (Some(from), Some(to)) => to > from,
                _ => false,
            },
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-visible record of one sandbox session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(id: impl Into<String>, status: SessionStatus, port: Option<u16>) -> Self {
        Self {
            id: id.into(),
            status,
            url: None,
            port,
            started_at: None,
        }
    }
}

struct Entry {
    session: Session,
    environment: Arc<dyn Environment>,
    /// Set once a `start` call has taken this pending session
    claimed: bool,
}

/// Registry of live sessions; cloning shares the same map
#[derive(Clone, Default)]
pub struct SessionRegistry {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session: Session, environment: Arc<dyn Environment>) {
        self.insert_entry(session, environment, false).await;
    }

    /// Insert a session that `claim_pending` must never hand out
    pub async fn insert_claimed(&self, session: Session, environment: Arc<dyn Environment>) {
        self.insert_entry(session, environment, true).await;
    }

    async fn insert_entry(&self, session: Session, environment: Arc<dyn Environment>, claimed: bool) {
        let mut entries = self.entries.write().await;
        entries.insert(
            session.id.clone(),
            Entry {
                session,
                environment,
                claimed,
            },
        );
    }

    /// Snapshot of a session record
    pub async fn get(&self, id: &str) -> Option<Session> {
        let entries = self.entries.read().await;
        entries.get(id).map(|entry| entry.session.clone())
    }

    pub async fn environment(&self, id: &str) -> Option<Arc<dyn Environment>> {
        let entries = self.entries.read().await;
        entries.get(id).map(|entry| entry.environment.clone())
    }

    /// Move a session to `status`; returns false when the id is unknown or the
    /// transition is not allowed
    pub async fn set_status(&self, id: &str, status: SessionStatus) -> bool {
        self.update(id, |session| {
            if session.status.can_transition_to(status) {
                session.status = status;
                true
            } else {
                false
            }
        })
        .await
        .unwrap_or(false)
    }

    /// Apply `f` to a session under the write lock
    pub async fn update<F, T>(&self, id: &str, f: F) -> Option<T>
    where
        F: FnOnce(&mut Session) -> T,
    {
        let mut entries = self.entries.write().await;
        entries.get_mut(id).map(|entry| f(&mut entry.session))
    }

    /// Take an unclaimed pending session prepared for `port`
    pub async fn claim_pending(&self, port: u16) -> Option<(Session, Arc<dyn Environment>)> {
        let mut entries = self.entries.write().await;
        entries
            .values_mut()
            .find(|entry| {
                !entry.claimed
                    && entry.session.status == SessionStatus::Pending
                    && entry.session.port == Some(port)
            })
            .map(|entry| {
                entry.claimed = true;
                (entry.session.clone(), entry.environment.clone())
            })
    }

    pub async fn remove(&self, id: &str) -> Option<(Session, Arc<dyn Environment>)> {
        let mut entries = self.entries.write().await;
        entries
            .remove(id)
            .map(|entry| (entry.session, entry.environment))
    }

    pub async fn list(&self) -> Vec<Session> {
        let entries = self.entries.read().await;
        let mut sessions: Vec<Session> = entries.values().map(|e| e.session.clone()).collect();
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        sessions
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
