//! Persistence collaborator: session factories over SQLite.
//!
//! # Responsibility
//! - Turn a connection property bag plus a persistence unit into an open
//!   `SessionFactory`.
//! - Provide short-lived and transactional sessions to repositories.
//!
//! # Invariants
//! - A factory's schema steps are fully applied before it is returned.
//! - Once closed, a factory never hands out another session.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};

mod factory;
mod unit;

pub use factory::{SessionFactory, SQLITE_DRIVER_ID};
pub use unit::{PersistenceUnit, SchemaStep};

/// Backend URL handed to the provider.
pub const PROPERTY_URL: &str = "dbsession.connection.url";
/// Driver identity, as reported by `DbAdapter::driver_id`.
pub const PROPERTY_DRIVER: &str = "dbsession.connection.driver";
/// Login name. May be empty for backends without authentication.
pub const PROPERTY_USER: &str = "dbsession.connection.user";
/// Login password. Never logged.
pub const PROPERTY_PASSWORD: &str = "dbsession.connection.password";
/// Name of the persistence unit being opened.
pub const PROPERTY_UNIT: &str = "dbsession.persistence.unit";

pub type PersistenceResult<T> = Result<T, PersistenceError>;

#[derive(Debug)]
pub enum PersistenceError {
    Sqlite(rusqlite::Error),
    UnsupportedDriver(String),
    UnsupportedUrl(String),
    UnknownPersistenceUnit(String),
    InvalidSchema(String),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    Closed,
}

impl Display for PersistenceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedDriver(driver) => {
                write!(f, "no persistence provider for driver `{driver}`")
            }
            Self::UnsupportedUrl(url) => write!(f, "unsupported connection url `{url}`"),
            Self::UnknownPersistenceUnit(name) => {
                write!(f, "no persistence unit named `{name}`")
            }
            Self::InvalidSchema(message) => write!(f, "invalid persistence unit schema: {message}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::Closed => write!(f, "session factory is closed"),
        }
    }
}

impl Error for PersistenceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for PersistenceError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// String-keyed connection property bag.
///
/// Well-known keys are the `PROPERTY_*` constants; callers may add their own.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectionProperties {
    values: BTreeMap<String, String>,
}

impl ConnectionProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn url(&self) -> Option<&str> {
        self.get(PROPERTY_URL)
    }

    pub fn driver_id(&self) -> Option<&str> {
        self.get(PROPERTY_DRIVER)
    }

    pub fn user(&self) -> Option<&str> {
        self.get(PROPERTY_USER)
    }

    pub fn password(&self) -> Option<&str> {
        self.get(PROPERTY_PASSWORD)
    }
}

impl Debug for ConnectionProperties {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in &self.values {
            if key == PROPERTY_PASSWORD {
                map.entry(key, &"<redacted>");
            } else {
                map.entry(key, value);
            }
        }
        map.finish()
    }
}
