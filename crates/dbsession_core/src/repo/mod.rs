//! Repository layer: generic CRUD facades bound to a session.
//!
//! # Responsibility
//! - Map entity types onto tables (`Entity`).
//! - Run CRUD through the session factory of the current login.
//!
//! # Invariants
//! - Every call checks the bound session is still open before touching it.
//! - Persistence failures propagate to the caller unchanged; nothing here
//!   converts them into booleans.

use crate::persistence::PersistenceError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod entity;
pub mod repository;

pub use entity::{Entity, EntityQuery, OrderBy};
pub use repository::{Repository, SessionBinding};

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[derive(Debug)]
pub enum RepositoryError {
    SessionClosed,
    Persistence(PersistenceError),
    InvalidMapping(String),
    InvalidQuery(String),
    EntityNotFound(String),
    NotPersistent,
}

impl Display for RepositoryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SessionClosed => write!(f, "repository session is closed"),
            Self::Persistence(err) => write!(f, "{err}"),
            Self::InvalidMapping(message) => write!(f, "invalid entity mapping: {message}"),
            Self::InvalidQuery(message) => write!(f, "invalid entity query: {message}"),
            Self::EntityNotFound(key) => write!(f, "entity not found: {key}"),
            Self::NotPersistent => write!(f, "entity has no identifier and was never persisted"),
        }
    }
}

impl Error for RepositoryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Persistence(err) => Some(err),
            _ => None,
        }
    }
}

impl From<PersistenceError> for RepositoryError {
    fn from(value: PersistenceError) -> Self {
        match value {
            PersistenceError::Closed => Self::SessionClosed,
            other => Self::Persistence(other),
        }
    }
}

impl From<rusqlite::Error> for RepositoryError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Persistence(PersistenceError::Sqlite(value))
    }
}
