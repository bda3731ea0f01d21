//! Backend adapters: per-RDBMS connection descriptors.
//!
//! # Responsibility
//! - Normalize URL grammar, driver identity and authentication SQL for one
//!   backend family behind the `DbAdapter` contract.
//! - Keep the session manager backend-agnostic.
//!
//! # Invariants
//! - `create_url` is a pure function of its inputs and the adapter's extra
//!   properties; invalid inputs fail deterministically.
//! - Static facts (`driver_id`, templates, role query) never change after
//!   construction. Only `extra_properties` is mutable.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

mod postgres;
mod sqlite;

pub use postgres::PostgreSqlAdapter;
pub use sqlite::{SqliteAdapter, SqliteMode, SQLITE_MODE_PROPERTY};

/// Placeholder for the login name in change-password templates.
pub const TEMPLATE_USER_SLOT: &str = "{user}";
/// Placeholder for the new password in change-password templates.
pub const TEMPLATE_PASSWORD_SLOT: &str = "{password}";

static TEMPLATE_SLOT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{(user|password)\}").expect("valid template slot regex"));

pub type AdapterResult<T> = Result<T, AdapterError>;

/// URL assembly and adapter configuration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    MissingHost,
    MissingDatabase,
    ZeroPort,
    UnsupportedMode(String),
    UnknownProperty(String),
}

impl Display for AdapterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingHost => write!(f, "database host cannot be empty"),
            Self::MissingDatabase => write!(f, "database name cannot be empty"),
            Self::ZeroPort => write!(f, "database port cannot be zero"),
            Self::UnsupportedMode(mode) => write!(f, "unsupported connection mode `{mode}`"),
            Self::UnknownProperty(key) => write!(f, "unknown extra property `{key}`"),
        }
    }
}

impl Error for AdapterError {}

/// Backend descriptor contract shared by every supported RDBMS.
///
/// New backends are added by implementing this trait; the session manager
/// only ever talks to `dyn DbAdapter`.
pub trait DbAdapter: Send + Sync {
    /// Combines host, port and database into this backend's URL form.
    ///
    /// A `port` of `0` means "not specified".
    fn create_url(&self, host: &str, port: u16, database: &str) -> AdapterResult<String>;

    /// Stable backend family name, used for diagnostics only.
    fn name(&self) -> &'static str;

    /// Extra property keys recognized by this backend.
    fn supported_extra_properties(&self) -> &'static [&'static str];

    /// Driver identity handed to the persistence provider.
    fn driver_id(&self) -> &'static str;

    /// Change-password statement with `{user}` and `{password}` slots.
    fn change_password_template(&self) -> &'static str;

    /// Statement returning one role name per row for the current user.
    fn acquire_roles_query(&self) -> &'static str;

    fn extra_properties(&self) -> &BTreeMap<String, String>;

    fn extra_properties_mut(&mut self) -> &mut BTreeMap<String, String>;

    /// Sets one extra property after checking the key is recognized.
    fn set_extra_property(&mut self, key: &str, value: &str) -> AdapterResult<()> {
        let key = key.trim();
        if !self.supported_extra_properties().contains(&key) {
            return Err(AdapterError::UnknownProperty(key.to_string()));
        }
        self.extra_properties_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Rejects extra property keys this backend does not recognize.
    fn validate_extra_properties(&self) -> AdapterResult<()> {
        let supported = self.supported_extra_properties();
        match self
            .extra_properties()
            .keys()
            .find(|key| !supported.contains(&key.as_str()))
        {
            Some(key) => Err(AdapterError::UnknownProperty(key.clone())),
            None => Ok(()),
        }
    }

    /// Renders the change-password template with quoted slot values.
    ///
    /// Slots are filled in one pass; inserted values are never scanned for
    /// further slots.
    fn render_change_password(&self, user: &str, new_password: &str) -> String {
        let user = user.replace('"', "\"\"");
        let new_password = new_password.replace('\'', "''");
        TEMPLATE_SLOT_RE
            .replace_all(self.change_password_template(), |caps: &Captures<'_>| {
                match &caps[0] {
                    TEMPLATE_USER_SLOT => user.clone(),
                    TEMPLATE_PASSWORD_SLOT => new_password.clone(),
                    other => other.to_string(),
                }
            })
            .into_owned()
    }
}

pub(crate) fn require_host(host: &str) -> AdapterResult<&str> {
    let host = host.trim();
    if host.is_empty() {
        return Err(AdapterError::MissingHost);
    }
    Ok(host)
}

pub(crate) fn require_database(database: &str) -> AdapterResult<&str> {
    let database = database.trim();
    if database.is_empty() {
        return Err(AdapterError::MissingDatabase);
    }
    Ok(database)
}

#[cfg(test)]
mod tests {
    use super::{AdapterError, DbAdapter, PostgreSqlAdapter, SqliteAdapter};

    #[test]
    fn render_change_password_escapes_slot_values() {
        let adapter = PostgreSqlAdapter::new();
        let sql = adapter.render_change_password("o\"neil", "it's");
        assert_eq!(sql, "ALTER USER \"o\"\"neil\" PASSWORD 'it''s';");
    }

    #[test]
    fn render_change_password_does_not_expand_slots_inside_values() {
        let adapter = PostgreSqlAdapter::new();
        let sql = adapter.render_change_password("{password}", "x\"; DROP TABLE t; --");
        assert_eq!(
            sql,
            "ALTER USER \"{password}\" PASSWORD 'x\"; DROP TABLE t; --';"
        );

        let sql = adapter.render_change_password("admin", "{user}'");
        assert_eq!(sql, "ALTER USER \"admin\" PASSWORD '{user}''';");
    }

    #[test]
    fn set_extra_property_rejects_unknown_keys() {
        let mut adapter = PostgreSqlAdapter::new();
        let err = adapter
            .set_extra_property("Mode", "memory")
            .expect_err("postgres has no extra properties");
        assert_eq!(err, AdapterError::UnknownProperty("Mode".to_string()));
    }

    #[test]
    fn validate_extra_properties_reports_first_unknown_key() {
        let mut adapter = SqliteAdapter::new();
        adapter
            .extra_properties_mut()
            .insert("Cache".to_string(), "shared".to_string());
        assert_eq!(
            adapter.validate_extra_properties(),
            Err(AdapterError::UnknownProperty("Cache".to_string()))
        );
    }
}
