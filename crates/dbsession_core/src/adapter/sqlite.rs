//! SQLite adapter (embeddable backend with three connection modes).
//!
//! The `Mode` extra property selects how the database is reached:
//! - `standalone` (default): database file on local disk.
//! - `memory`: private in-memory database, gone once the session closes.
//! - `server`: remote SQLite-compatible server; the port is appended to the
//!   host only when non-zero.

use super::{require_database, require_host, AdapterError, AdapterResult, DbAdapter};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Extra property key selecting the connection mode.
pub const SQLITE_MODE_PROPERTY: &str = "Mode";

/// Connection mode for the SQLite adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqliteMode {
    #[default]
    Standalone,
    Memory,
    Server,
}

impl SqliteMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standalone => "standalone",
            Self::Memory => "memory",
            Self::Server => "server",
        }
    }

    /// Parses a mode value, ignoring case and surrounding whitespace.
    pub fn parse(value: &str) -> AdapterResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "standalone" => Ok(Self::Standalone),
            "memory" => Ok(Self::Memory),
            "server" => Ok(Self::Server),
            _ => Err(AdapterError::UnsupportedMode(value.trim().to_string())),
        }
    }
}

/// Embeddable SQLite backend.
#[derive(Debug, Clone, Default)]
pub struct SqliteAdapter {
    extra_properties: BTreeMap<String, String>,
}

impl SqliteAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an adapter preconfigured with the given mode.
    pub fn with_mode(mode: SqliteMode) -> Self {
        let mut adapter = Self::new();
        adapter
            .extra_properties
            .insert(SQLITE_MODE_PROPERTY.to_string(), mode.as_str().to_string());
        adapter
    }

    /// Returns the configured mode, defaulting to `standalone`.
    pub fn mode(&self) -> AdapterResult<SqliteMode> {
        match self.extra_properties.get(SQLITE_MODE_PROPERTY) {
            Some(value) => SqliteMode::parse(value),
            None => Ok(SqliteMode::default()),
        }
    }
}

impl DbAdapter for SqliteAdapter {
    fn create_url(&self, host: &str, port: u16, database: &str) -> AdapterResult<String> {
        match self.mode()? {
            SqliteMode::Standalone => Ok(format!(
                "file:{}",
                encode_uri_path(require_database(database)?)
            )),
            SqliteMode::Memory => {
                let database = database.trim();
                if database.is_empty() {
                    Ok("file::memory:".to_string())
                } else {
                    Ok(format!("file:{}?mode=memory", encode_uri_path(database)))
                }
            }
            SqliteMode::Server => {
                let host = require_host(host)?;
                let database = require_database(database)?;
                if port == 0 {
                    Ok(format!("sqlite://{host}/{database}"))
                } else {
                    Ok(format!("sqlite://{host}:{port}/{database}"))
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "SQLite"
    }

    fn supported_extra_properties(&self) -> &'static [&'static str] {
        &[SQLITE_MODE_PROPERTY]
    }

    fn driver_id(&self) -> &'static str {
        "sqlite"
    }

    // SQLite has no user accounts; only encrypted builds honor `rekey`.
    fn change_password_template(&self) -> &'static str {
        "PRAGMA rekey = '{password}';"
    }

    fn acquire_roles_query(&self) -> &'static str {
        "SELECT 'owner' AS rolename;"
    }

    fn extra_properties(&self) -> &BTreeMap<String, String> {
        &self.extra_properties
    }

    fn extra_properties_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.extra_properties
    }
}

/// Escapes the characters SQLite's URI parser treats as delimiters or
/// escapes, so the path names exactly one file.
fn encode_uri_path(path: &str) -> String {
    let mut encoded = String::with_capacity(path.len());
    for ch in path.chars() {
        match ch {
            '%' => encoded.push_str("%25"),
            '?' => encoded.push_str("%3F"),
            '#' => encoded.push_str("%23"),
            other => encoded.push(other),
        }
    }
    encoded
}
