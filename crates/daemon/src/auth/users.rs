//! Persistent user accounts.
//!
//! The store persists to JSON at `<data_dir>/users.json`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::AuthError;

/// A user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub username: String,
    /// Argon2 PHC string.
    pub password_hash: String,
    pub is_admin: bool,
}

/// Storage for user accounts.
pub trait UserRepository: Send + Sync {
    fn find_by_username(&self, username: &str) -> Result<Option<User>, AuthError>;

    /// Create a user with the next free id. Fails with `UsernameTaken` if the
    /// name exists.
    fn insert(&self, username: &str, password_hash: &str, is_admin: bool)
        -> Result<User, AuthError>;

    /// All users, ordered by id.
    fn list(&self) -> Result<Vec<User>, AuthError>;
}

/// Wrapper for serializing the user store.
#[derive(Debug, Serialize, Deserialize)]
struct UserStoreData {
    /// Version of the store format.
    version: u32,
    users: Vec<User>,
}

/// JSON-file backed [`UserRepository`].
///
/// Every insert is written to disk before it returns.
pub struct JsonUserStore {
    path: PathBuf,
    users: RwLock<HashMap<String, User>>,
}

impl JsonUserStore {
    /// Creates a store that persists to the given path.
    ///
    /// This does not load the file; call `load()` to read existing data.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            users: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a store and loads it from disk.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = Self::new(path);
        store.load()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads users from the JSON file.
    ///
    /// A missing file leaves the store empty.
    pub fn load(&self) -> Result<()> {
        if !self.path.exists() {
            tracing::debug!("User store not found at {:?}, starting empty", self.path);
            return Ok(());
        }

        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read user store: {}", self.path.display()))?;

        let data: UserStoreData = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse user store: {}", self.path.display()))?;

        let mut users = self
            .users
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on user store"))?;

        users.clear();
        for user in data.users {
            users.insert(user.username.clone(), user);
        }

        tracing::info!("Loaded {} users from {:?}", users.len(), self.path);
        Ok(())
    }

    /// Writes users to the JSON file (temp file + rename).
    fn write_file(&self, users: &HashMap<String, User>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create user store directory: {}", parent.display())
            })?;
        }

        let data = UserStoreData {
            version: 1,
            users: sorted(users.values().cloned()),
        };
        let contents =
            serde_json::to_string_pretty(&data).context("Failed to serialize user store")?;

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &contents).with_context(|| {
            format!("Failed to write temp user store: {}", temp_path.display())
        })?;

        fs::rename(&temp_path, &self.path).with_context(|| {
            format!(
                "Failed to rename temp user store {} to {}",
                temp_path.display(),
                self.path.display()
            )
        })?;

        tracing::debug!("Saved {} users to {:?}", users.len(), self.path);
        Ok(())
    }
}

impl UserRepository for JsonUserStore {
    fn find_by_username(&self, username: &str) -> Result<Option<User>, AuthError> {
        let users = self
            .users
            .read()
            .map_err(|_| AuthError::Storage("user store lock poisoned".to_string()))?;
        Ok(users.get(username).cloned())
    }

    fn insert(
        &self,
        username: &str,
        password_hash: &str,
        is_admin: bool,
    ) -> Result<User, AuthError> {
        let mut users = self
            .users
            .write()
            .map_err(|_| AuthError::Storage("user store lock poisoned".to_string()))?;

        if users.contains_key(username) {
            return Err(AuthError::UsernameTaken(username.to_string()));
        }

        let user = User {
            id: users.values().map(|u| u.id).max().unwrap_or(0) + 1,
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            is_admin,
        };

        users.insert(user.username.clone(), user.clone());
        if let Err(e) = self.write_file(&users) {
            users.remove(username);
            return Err(AuthError::Storage(format!("{e:#}")));
        }

        tracing::info!(username = %user.username, id = user.id, is_admin, "Added user");
        Ok(user)
    }

    fn list(&self) -> Result<Vec<User>, AuthError> {
        let users = self
            .users
            .read()
            .map_err(|_| AuthError::Storage("user store lock poisoned".to_string()))?;
        Ok(sorted(users.values().cloned()))
    }
}

fn sorted(users: impl Iterator<Item = User>) -> Vec<User> {
    let mut users: Vec<User> = users.collect();
    users.sort_by_key(|u| u.id);
    users
}
