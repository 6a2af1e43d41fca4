//! Accounts, passwords and login sessions.
//!
//! File handlers only ever see the outcome of [`SessionGate::authorize`]:
//! whether the caller is authenticated and whether they are an admin.

pub mod gate;
pub mod password;
pub mod session;
pub mod users;

use thiserror::Error;

pub use gate::SessionGate;
pub use session::{Session, SessionStore};
pub use users::{JsonUserStore, User, UserRepository};

#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown user or wrong password; never says which.
    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("not authenticated")]
    Unauthenticated,

    #[error("administrator privileges required")]
    NotAdmin,

    #[error("username already taken: {0}")]
    UsernameTaken(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error("user store error: {0}")]
    Storage(String),
}
