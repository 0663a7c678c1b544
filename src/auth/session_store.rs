//! Local sign-in after a completed SAML login.
//!
//! The `SignIn` trait turns an accepted login into a local session keyed by a
//! random id (carried in the session cookie). `MemorySessionStore` is the
//! single-node implementation; sessions are lost on restart.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::saml::{Claim, CompletedLogin};

/// Result type for sign-in operations.
pub type SignInResult<T> = Result<T, SignInError>;

#[derive(Debug, thiserror::Error)]
pub enum SignInError {
    #[error("Session not found")]
    NotFound,

    #[error("Session expired")]
    Expired,

    #[error("Session storage error: {0}")]
    Storage(String),
}

/// A signed-in user.
#[derive(Debug, Clone, Serialize)]
pub struct LocalSession {
    pub id: Uuid,

    /// NameID asserted by the IdP
    pub subject: String,

    pub idp_entity_id: String,

    /// Claims routed to the session destination
    pub claims: Vec<Claim>,

    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LocalSession {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// First session claim of `claim_type`.
    pub fn claim(&self, claim_type: &str) -> Option<&str> {
        self.claims
            .iter()
            .find(|c| c.claim_type == claim_type)
            .map(|c| c.value.as_str())
    }
}

/// Establishes and looks up local sessions.
///
/// Implementations must be thread-safe and handle concurrent access.
#[async_trait]
pub trait SignIn: Send + Sync {
    /// Create a session for an accepted login.
    async fn sign_in(&self, login: &CompletedLogin) -> SignInResult<LocalSession>;

    /// Look up a live session. Expired sessions are removed and reported.
    async fn get_session(&self, id: Uuid) -> SignInResult<LocalSession>;

    /// Delete a session.
    async fn sign_out(&self, id: Uuid) -> SignInResult<()>;

    /// Drop expired sessions, returning how many were removed.
    async fn cleanup(&self) -> SignInResult<usize>;
}

/// In-memory session store.
///
/// Suitable for development and single-node deployments.
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<Uuid, LocalSession>>,
    duration: Duration,
}

impl MemorySessionStore {
    pub fn new(duration: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            duration,
        }
    }
}

#[async_trait]
impl SignIn for MemorySessionStore {
    async fn sign_in(&self, login: &CompletedLogin) -> SignInResult<LocalSession> {
        let now = Utc::now();
        let duration = chrono::Duration::from_std(self.duration)
            .map_err(|e| SignInError::Storage(format!("invalid session duration: {e}")))?;

        let session = LocalSession {
            id: Uuid::new_v4(),
            subject: login.response.name_id.clone(),
            idp_entity_id: login.response.idp_entity_id.clone(),
            claims: login.claims.session.clone(),
            created_at: now,
            expires_at: now + duration,
        };

        self.sessions
            .write()
            .await
            .insert(session.id, session.clone());

        tracing::debug!(
            session_id = %session.id,
            subject = %session.subject,
            expires_at = %session.expires_at,
            "Created local session"
        );
        Ok(session)
    }

    async fn get_session(&self, id: Uuid) -> SignInResult<LocalSession> {
        let session = self
            .sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(SignInError::NotFound)?;

        if session.is_expired() {
            self.sessions.write().await.remove(&id);
            return Err(SignInError::Expired);
        }
        Ok(session)
    }

    async fn sign_out(&self, id: Uuid) -> SignInResult<()> {
        self.sessions.write().await.remove(&id);
        Ok(())
    }

    async fn cleanup(&self) -> SignInResult<usize> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.expires_at > now);
        Ok(before - sessions.len())
    }
}
