//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `dbsession_core` linkage end to end: login, repository access,
//!   logout against a private in-memory SQLite database.
//! - Keep output deterministic for quick local sanity checks.

use dbsession_core::{
    core_version, declare_repository, Entity, PersistenceUnit, Repository, SessionManager,
    SqliteAdapter, SqliteMode,
};
use rusqlite::types::Value;
use rusqlite::Row;
use std::process::ExitCode;

const PROBE_UNIT: &str = "probePU";
const PROBE_REPOSITORY: &str = "Probe";

#[derive(Debug, Clone)]
struct Probe {
    id: Option<i64>,
    label: String,
}

impl Entity for Probe {
    type Id = i64;
    const TABLE: &'static str = "probe";
    const ID_COLUMN: &'static str = "id";
    const COLUMNS: &'static [&'static str] = &["label"];

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn column_values(&self) -> Vec<Value> {
        vec![Value::Text(self.label.clone())]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            label: row.get(1)?,
        })
    }
}

fn main() -> ExitCode {
    println!("dbsession_core version={}", core_version());

    let mut manager = SessionManager::new();
    manager
        .set_adapter(SqliteAdapter::with_mode(SqliteMode::Memory))
        .register_persistence_unit(PersistenceUnit::new(PROBE_UNIT).with_schema_step(
            1,
            "CREATE TABLE probe (id INTEGER PRIMARY KEY, label TEXT NOT NULL);",
        ))
        .register_repository(declare_repository!(PROBE_REPOSITORY, Probe));

    if let Err(err) = manager
        .set_url("", 0, "")
        .and_then(|manager| manager.set_persistence_unit_name(PROBE_UNIT))
    {
        eprintln!("configuration error: {err}");
        return ExitCode::FAILURE;
    }

    match manager.login("", "") {
        Ok(true) => {}
        Ok(false) => {
            let cause = manager
                .last_failure()
                .map(ToString::to_string)
                .unwrap_or_default();
            eprintln!("login failed: {cause}");
            return ExitCode::FAILURE;
        }
        Err(err) => {
            eprintln!("login failed: {err}");
            return ExitCode::FAILURE;
        }
    }

    println!("roles={}", manager.roles().join(","));
    println!("repositories={}", manager.repository_names().join(","));

    if let Some(repository) = manager.get_repository::<Repository<Probe>>(PROBE_REPOSITORY) {
        let probe = Probe {
            id: None,
            label: "smoke".to_string(),
        };
        match repository.save_and_flush(probe).and_then(|_| repository.count()) {
            Ok(count) => println!("probe_rows={count}"),
            Err(err) => {
                eprintln!("repository probe failed: {err}");
                manager.logout();
                return ExitCode::FAILURE;
            }
        }
    }

    manager.logout();
    println!("logged_in={}", manager.is_logged_in());
    ExitCode::SUCCESS
}
