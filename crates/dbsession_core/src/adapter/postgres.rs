//! PostgreSQL adapter (networked backend, strict URL grammar).

use super::{require_database, require_host, AdapterError, AdapterResult, DbAdapter};
use std::collections::BTreeMap;

const ROLES_QUERY: &str = "WITH RECURSIVE cte AS (
    SELECT oid FROM pg_roles WHERE rolname = current_user
    UNION ALL
    SELECT m.roleid FROM cte JOIN pg_auth_members m ON m.member = cte.oid
)
SELECT oid::regrole::text AS rolename FROM cte;";

/// Networked PostgreSQL backend. Recognizes no extra properties.
#[derive(Debug, Clone, Default)]
pub struct PostgreSqlAdapter {
    extra_properties: BTreeMap<String, String>,
}

impl PostgreSqlAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DbAdapter for PostgreSqlAdapter {
    fn create_url(&self, host: &str, port: u16, database: &str) -> AdapterResult<String> {
        let host = require_host(host)?;
        let database = require_database(database)?;
        if port == 0 {
            return Err(AdapterError::ZeroPort);
        }
        Ok(format!("postgresql://{host}:{port}/{database}"))
    }

    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn supported_extra_properties(&self) -> &'static [&'static str] {
        &[]
    }

    fn driver_id(&self) -> &'static str {
        "postgres"
    }

    fn change_password_template(&self) -> &'static str {
        "ALTER USER \"{user}\" PASSWORD '{password}';"
    }

    fn acquire_roles_query(&self) -> &'static str {
        ROLES_QUERY
    }

    fn extra_properties(&self) -> &BTreeMap<String, String> {
        &self.extra_properties
    }

    fn extra_properties_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.extra_properties
    }
}

#[cfg(test)]
mod tests {
    use super::PostgreSqlAdapter;
    use crate::adapter::{AdapterError, DbAdapter};

    #[test]
    fn builds_network_url() {
        let adapter = PostgreSqlAdapter::new();
        assert_eq!(
            adapter.create_url("db.local", 5432, "sales").unwrap(),
            "postgresql://db.local:5432/sales"
        );
    }

    #[test]
    fn rejects_whitespace_only_host_and_database() {
        let adapter = PostgreSqlAdapter::new();
        assert_eq!(
            adapter.create_url("   ", 5432, "sales"),
            Err(AdapterError::MissingHost)
        );
        assert_eq!(
            adapter.create_url("db.local", 5432, " \t"),
            Err(AdapterError::MissingDatabase)
        );
    }

    #[test]
    fn exposes_no_extra_properties() {
        assert!(PostgreSqlAdapter::new()
            .supported_extra_properties()
            .is_empty());
    }
}
