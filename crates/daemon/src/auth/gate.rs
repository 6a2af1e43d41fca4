//! Login, logout and authorization checks.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tracing::{info, warn};

use super::password::{generate_password, hash_password, verify_password};
use super::session::{Session, SessionStore};
use super::users::{User, UserRepository};
use super::AuthError;

/// Front door for everything that needs to know who is calling.
pub struct SessionGate {
    users: Arc<dyn UserRepository>,
    sessions: SessionStore,
}

impl SessionGate {
    pub fn new(users: Arc<dyn UserRepository>, session_ttl: Duration) -> Self {
        Self {
            users,
            sessions: SessionStore::new(session_ttl),
        }
    }

    pub fn users(&self) -> &Arc<dyn UserRepository> {
        &self.users
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Check credentials and open a session.
    ///
    /// Unknown users and wrong passwords fail identically, and both run a
    /// full Argon2 verification.
    pub fn login(&self, username: &str, password: &str) -> Result<(String, Session), AuthError> {
        let user = self.users.find_by_username(username)?;

        let verified = match &user {
            Some(user) => verify_password(password, &user.password_hash)?,
            None => {
                let _ = verify_password(password, dummy_hash());
                false
            }
        };

        match user {
            Some(user) if verified => {
                let session = Session::for_user(&user);
                let token = self.sessions.create(session.clone());
                info!(username = %user.username, is_admin = user.is_admin, "login");
                Ok((token, session))
            }
            _ => {
                warn!(username, "failed login");
                Err(AuthError::InvalidCredentials)
            }
        }
    }

    /// End the session for `token`. Returns whether one was open.
    pub fn logout(&self, token: &str) -> bool {
        let removed = self.sessions.remove(token);
        if removed {
            info!("logout");
        }
        removed
    }

    /// Session for `token`, or `Unauthenticated`.
    pub fn authorize(&self, token: Option<&str>) -> Result<Session, AuthError> {
        token
            .and_then(|t| self.sessions.get(t))
            .filter(Session::is_authenticated)
            .ok_or(AuthError::Unauthenticated)
    }

    /// Like [`authorize`](Self::authorize) but also requires an admin.
    pub fn require_admin(&self, token: Option<&str>) -> Result<Session, AuthError> {
        let session = self.authorize(token)?;
        if !session.is_admin() {
            return Err(AuthError::NotAdmin);
        }
        Ok(session)
    }

    /// Create an account on behalf of the admin holding `token`.
    pub fn register(
        &self,
        token: Option<&str>,
        username: &str,
        password: &str,
        is_admin: bool,
    ) -> Result<User, AuthError> {
        let admin = self.require_admin(token)?;
        let user = self.create_user(username, password, is_admin)?;
        info!(by = %admin.username, username = %user.username, is_admin, "registered user");
        Ok(user)
    }

    /// Create an account without a session check (CLI and bootstrap).
    pub fn create_user(
        &self,
        username: &str,
        password: &str,
        is_admin: bool,
    ) -> Result<User, AuthError> {
        validate_username(username)?;
        if password.is_empty() {
            return Err(AuthError::InvalidInput("password must not be empty".to_string()));
        }
        if self.users.find_by_username(username)?.is_some() {
            return Err(AuthError::UsernameTaken(username.to_string()));
        }

        let password_hash = hash_password(password)?;
        self.users.insert(username, &password_hash, is_admin)
    }

    /// Make sure the administrator account exists.
    ///
    /// Returns the generated password when the account had to be created
    /// without a configured one.
    pub fn ensure_admin(
        &self,
        username: &str,
        configured_password: Option<&str>,
    ) -> Result<Option<String>, AuthError> {
        if self.users.find_by_username(username)?.is_some() {
            return Ok(None);
        }

        let generated = match configured_password {
            Some(_) => None,
            None => Some(generate_password()),
        };
        let password = configured_password.or(generated.as_deref()).unwrap_or_default();

        self.create_user(username, password, true)?;
        match &generated {
            Some(password) => warn!(
                username,
                password = %password,
                "created admin account with a generated password; it will not be shown again"
            ),
            None => info!(username, "created admin account"),
        }
        Ok(generated)
    }
}

fn validate_username(username: &str) -> Result<(), AuthError> {
    if username.is_empty() || username.len() > 64 {
        return Err(AuthError::InvalidInput(
            "username must be 1 to 64 characters".to_string(),
        ));
    }
    if username.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(AuthError::InvalidInput(
            "username must not contain whitespace".to_string(),
        ));
    }
    Ok(())
}

/// Hash verified against when the user does not exist.
fn dummy_hash() -> &'static str {
    static DUMMY: OnceLock<String> = OnceLock::new();
    DUMMY.get_or_init(|| hash_password(&generate_password()).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::JsonUserStore;
    use tempfile::TempDir;

    fn gate(temp: &TempDir) -> SessionGate {
        let users = Arc::new(JsonUserStore::new(temp.path().join("users.json")));
        SessionGate::new(users, Duration::from_secs(3600))
    }

    #[test]
    fn test_login_logout() {
        let temp = TempDir::new().unwrap();
        let gate = gate(&temp);
        gate.create_user("alice", "pw", false).unwrap();

        let (token, session) = gate.login("alice", "pw").unwrap();
        assert_eq!(session.username, "alice");
        assert!(gate.authorize(Some(&token)).is_ok());

        assert!(gate.logout(&token));
        assert!(matches!(
            gate.authorize(Some(&token)),
            Err(AuthError::Unauthenticated)
        ));
        assert!(!gate.logout(&token));
    }

    #[test]
    fn test_login_failures_are_indistinguishable() {
        let temp = TempDir::new().unwrap();
        let gate = gate(&temp);
        gate.create_user("alice", "pw", false).unwrap();

        let wrong_password = gate.login("alice", "nope").unwrap_err();
        let unknown_user = gate.login("mallory", "pw").unwrap_err();

        assert!(matches!(wrong_password, AuthError::InvalidCredentials));
        assert_eq!(wrong_password.to_string(), unknown_user.to_string());
        assert!(gate.sessions().is_empty());
    }

    #[test]
    fn test_authorize_without_token() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            gate(&temp).authorize(None),
            Err(AuthError::Unauthenticated)
        ));
    }

    #[test]
    fn test_register_requires_admin() {
        let temp = TempDir::new().unwrap();
        let gate = gate(&temp);
        gate.create_user("root", "pw", true).unwrap();
        gate.create_user("bob", "pw", false).unwrap();

        let (bob, _) = gate.login("bob", "pw").unwrap();
        assert!(matches!(
            gate.register(Some(&bob), "carol", "pw", false),
            Err(AuthError::NotAdmin)
        ));
        assert!(matches!(
            gate.register(None, "carol", "pw", false),
            Err(AuthError::Unauthenticated)
        ));

        let (root, _) = gate.login("root", "pw").unwrap();
        let carol = gate.register(Some(&root), "carol", "pw", false).unwrap();
        assert!(!carol.is_admin);
        assert!(gate.login("carol", "pw").is_ok());

        assert!(matches!(
            gate.register(Some(&root), "carol", "other", false),
            Err(AuthError::UsernameTaken(_))
        ));
    }

    #[test]
    fn test_create_user_validation() {
        let temp = TempDir::new().unwrap();
        let gate = gate(&temp);

        for (username, password) in [("", "pw"), ("a b", "pw"), ("ok", "")] {
            assert!(matches!(
                gate.create_user(username, password, false),
                Err(AuthError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn test_ensure_admin_with_configured_password() {
        let temp = TempDir::new().unwrap();
        let gate = gate(&temp);

        assert_eq!(gate.ensure_admin("admin", Some("s3cret")).unwrap(), None);
        let (_, session) = gate.login("admin", "s3cret").unwrap();
        assert!(session.is_admin());

        assert_eq!(gate.ensure_admin("admin", Some("changed")).unwrap(), None);
        assert!(gate.login("admin", "s3cret").is_ok());
    }

    #[test]
    fn test_ensure_admin_generates_password_once() {
        let temp = TempDir::new().unwrap();
        let gate = gate(&temp);

        let generated = gate.ensure_admin("admin", None).unwrap().unwrap();
        assert!(gate.login("admin", &generated).is_ok());
        assert_eq!(gate.ensure_admin("admin", None).unwrap(), None);
    }
}
