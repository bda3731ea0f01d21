//! Session lifecycle: configuration, login/logout and repository access.
//!
//! # Responsibility
//! - Own the connection configuration and the single open session.
//! - Rebuild roles and the repository registry on every successful login.
//!
//! # Invariants
//! - At most one session is open per `SessionManager`.
//! - Configuration changes never apply to a live session; they log out first.
//! - Logout clears properties, roles, registry and the factory together.

use crate::persistence::PersistenceError;
use crate::registry::DiscoveryError;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

mod manager;

pub use manager::SessionManager;

/// Identifier assigned to every successful login, used to correlate logs.
pub type SessionId = Uuid;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug)]
pub enum SessionError {
    /// Missing or malformed configuration (adapter inputs, URL, unit name).
    InvalidConfiguration(String),
    /// Operation not allowed in the current login state.
    InvalidState(String),
    /// Factory open or role acquisition failed during login.
    ConnectionFailure(PersistenceError),
    /// Repository discovery failed fatally during login.
    Discovery(DiscoveryError),
    /// A statement run on behalf of the session failed.
    Persistence(PersistenceError),
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidConfiguration(message) => write!(f, "invalid configuration: {message}"),
            Self::InvalidState(message) => write!(f, "invalid session state: {message}"),
            Self::ConnectionFailure(err) => write!(f, "connection failed: {err}"),
            Self::Discovery(err) => write!(f, "repository discovery failed: {err}"),
            Self::Persistence(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ConnectionFailure(err) | Self::Persistence(err) => Some(err),
            Self::Discovery(err) => Some(err),
            Self::InvalidConfiguration(_) | Self::InvalidState(_) => None,
        }
    }
}

impl From<DiscoveryError> for SessionError {
    fn from(value: DiscoveryError) -> Self {
        Self::Discovery(value)
    }
}

/// Serializable snapshot of a manager's state. Contains no credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub logged_in: bool,
    pub session_id: Option<SessionId>,
    pub adapter: Option<String>,
    /// Redacted connection URL.
    pub url: Option<String>,
    pub persistence_unit: Option<String>,
    pub roles: Vec<String>,
    pub repositories: Vec<String>,
}
