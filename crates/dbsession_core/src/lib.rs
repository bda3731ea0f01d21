//! Database session management core.
//! Adapters describe backends, the session manager owns login state, and
//! repositories give typed CRUD access for the current session.

pub mod adapter;
pub mod logging;
pub mod persistence;
pub mod registry;
pub mod repo;
pub mod session;

pub use adapter::{
    AdapterError, AdapterResult, DbAdapter, PostgreSqlAdapter, SqliteAdapter, SqliteMode,
};
pub use logging::{default_log_level, init_logging, logging_status, LoggingOptions};
pub use persistence::{
    ConnectionProperties, PersistenceError, PersistenceResult, PersistenceUnit, SessionFactory,
};
pub use registry::{
    DiscoveryError, DiscoveryReport, RepositoryCatalog, RepositoryDefinition, RepositoryRegistry,
};
pub use repo::{
    Entity, EntityQuery, OrderBy, Repository, RepositoryError, RepositoryResult, SessionBinding,
};
pub use session::{SessionError, SessionId, SessionManager, SessionResult, SessionStatus};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
