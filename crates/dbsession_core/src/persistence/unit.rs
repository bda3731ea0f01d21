//! Persistence units: named schema definitions applied on factory open.
//!
//! # Invariants
//! - Step versions must be strictly increasing.
//! - The applied version is mirrored to `PRAGMA user_version`.

use super::{PersistenceError, PersistenceResult};
use rusqlite::Connection;

/// One versioned schema statement batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaStep {
    pub version: u32,
    pub sql: String,
}

/// Named set of entity tables a session factory manages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceUnit {
    name: String,
    steps: Vec<SchemaStep>,
}

impl PersistenceUnit {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            steps: Vec::new(),
        }
    }

    /// Appends one schema step. Ordering is checked when the unit is applied.
    pub fn with_schema_step(mut self, version: u32, sql: impl Into<String>) -> Self {
        self.steps.push(SchemaStep {
            version,
            sql: sql.into(),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[SchemaStep] {
        &self.steps
    }

    /// Returns the latest schema version declared by this unit.
    pub fn latest_version(&self) -> u32 {
        self.steps.last().map_or(0, |step| step.version)
    }

    fn check_ordering(&self) -> PersistenceResult<()> {
        let mut previous = 0;
        for step in &self.steps {
            if step.version <= previous {
                return Err(PersistenceError::InvalidSchema(format!(
                    "unit `{}` step version {} must be greater than {}",
                    self.name, step.version, previous
                )));
            }
            previous = step.version;
        }
        Ok(())
    }
}

/// Applies all pending schema steps of `unit` in one transaction.
pub(crate) fn apply_schema(conn: &mut Connection, unit: &PersistenceUnit) -> PersistenceResult<()> {
    unit.check_ordering()?;

    let current_version = current_user_version(conn)?;
    let latest = unit.latest_version();

    if current_version > latest {
        return Err(PersistenceError::UnsupportedSchemaVersion {
            db_version: current_version,
            latest_supported: latest,
        });
    }

    if current_version == latest {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for step in unit.steps() {
        if step.version <= current_version {
            continue;
        }

        tx.execute_batch(&step.sql)?;
        tx.execute_batch(&format!("PRAGMA user_version = {};", step.version))?;
    }
    tx.commit()?;

    Ok(())
}

fn current_user_version(conn: &Connection) -> PersistenceResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}
