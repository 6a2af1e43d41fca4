//! Login sessions keyed by random tokens.
//!
//! Expired sessions are evicted lazily when they are looked up, or in bulk
//! through [`SessionStore::purge_expired`].

use std::time::{Duration, Instant};

use dashmap::DashMap;
use uuid::Uuid;

use super::users::User;

/// An authenticated login.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: Option<u64>,
    pub username: String,
    pub is_admin: bool,
    pub created_at: Instant,
}

impl Session {
    pub fn for_user(user: &User) -> Self {
        Self {
            user_id: Some(user.id),
            username: user.username.clone(),
            is_admin: user.is_admin,
            created_at: Instant::now(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }

    pub fn is_admin(&self) -> bool {
        self.is_authenticated() && self.is_admin
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() >= ttl
    }
}

/// Concurrent token -> session map.
#[derive(Debug)]
pub struct SessionStore {
    sessions: DashMap<String, Session>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    /// Start a session and return its token.
    pub fn create(&self, session: Session) -> String {
        let token = Uuid::new_v4().to_string();
        self.sessions.insert(token.clone(), session);
        token
    }

    /// Look up a live session, evicting it if it has expired.
    pub fn get(&self, token: &str) -> Option<Session> {
        let session = self.sessions.get(token).map(|s| s.clone())?;
        if session.is_expired(self.ttl) {
            self.sessions.remove(token);
            tracing::debug!(username = %session.username, "session expired");
            return None;
        }
        Some(session)
    }

    /// End a session. Returns whether it existed.
    pub fn remove(&self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }

    /// Drop every expired session; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.is_expired(self.ttl));
        before - self.sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(is_admin: bool) -> User {
        User {
            id: 7,
            username: "alice".to_string(),
            password_hash: String::new(),
            is_admin,
        }
    }

    #[test]
    fn test_create_and_get() {
        let store = SessionStore::new(Duration::from_secs(60));
        let token = store.create(Session::for_user(&user(true)));

        let session = store.get(&token).unwrap();
        assert_eq!(session.user_id, Some(7));
        assert!(session.is_authenticated());
        assert!(session.is_admin());
        assert!(store.get("unknown-token").is_none());
    }

    #[test]
    fn test_tokens_are_unique() {
        let store = SessionStore::new(Duration::from_secs(60));
        let a = store.create(Session::for_user(&user(false)));
        let b = store.create(Session::for_user(&user(false)));
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_remove() {
        let store = SessionStore::new(Duration::from_secs(60));
        let token = store.create(Session::for_user(&user(false)));

        assert!(store.remove(&token));
        assert!(!store.remove(&token));
        assert!(store.get(&token).is_none());
    }

    #[test]
    fn test_expired_session_evicted_on_get() {
        let store = SessionStore::new(Duration::ZERO);
        let token = store.create(Session::for_user(&user(false)));

        assert!(store.get(&token).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_purge_expired() {
        let store = SessionStore::new(Duration::ZERO);
        store.create(Session::for_user(&user(false)));
        store.create(Session::for_user(&user(true)));

        assert_eq!(store.purge_expired(), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn test_anonymous_session_is_not_admin() {
        let session = Session {
            user_id: None,
            username: String::new(),
            is_admin: true,
            created_at: Instant::now(),
        };
        assert!(!session.is_authenticated());
        assert!(!session.is_admin());
    }
}
