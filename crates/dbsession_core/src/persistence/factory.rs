//! SQLite-backed session factory.
//!
//! # Responsibility
//! - Open and configure the backing connection for one login.
//! - Hand out ad-hoc and transactional sessions until closed.
//!
//! # Invariants
//! - Returned factories have `foreign_keys=ON` and their unit schema applied.
//! - Sessions are serialized through one connection; there is no pooling.

use super::unit::apply_schema;
use super::{ConnectionProperties, PersistenceError, PersistenceResult, PersistenceUnit};
use crate::logging::{redact_url, sanitize_message};
use log::{debug, error, info};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, Transaction};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Driver id accepted by the bundled provider.
pub const SQLITE_DRIVER_ID: &str = "sqlite";

const SQLITE_URL_PREFIX: &str = "file:";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Long-lived handle producing sessions for one logged-in user.
pub struct SessionFactory {
    unit_name: String,
    conn: Mutex<Option<Connection>>,
}

impl SessionFactory {
    /// Opens a factory for `unit` using the given connection properties.
    ///
    /// # Side effects
    /// - Creates the database file in `standalone` mode if missing.
    /// - Emits `factory_open` logging events with duration and status.
    pub fn open(
        unit: &PersistenceUnit,
        properties: &ConnectionProperties,
    ) -> PersistenceResult<Self> {
        let started_at = Instant::now();
        let url = properties.url().unwrap_or_default();
        info!(
            "event=factory_open module=persistence status=start unit={} url={}",
            unit.name(),
            redact_url(url)
        );

        match connect(unit, properties) {
            Ok(conn) => {
                info!(
                    "event=factory_open module=persistence status=ok unit={} duration_ms={}",
                    unit.name(),
                    started_at.elapsed().as_millis()
                );
                Ok(Self {
                    unit_name: unit.name().to_string(),
                    conn: Mutex::new(Some(conn)),
                })
            }
            Err(err) => {
                error!(
                    "event=factory_open module=persistence status=error unit={} duration_ms={} error_code=factory_open_failed error={}",
                    unit.name(),
                    started_at.elapsed().as_millis(),
                    sanitize_message(&err.to_string())
                );
                Err(err)
            }
        }
    }

    pub fn unit_name(&self) -> &str {
        &self.unit_name
    }

    /// Returns whether sessions can still be opened.
    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    /// Runs `f` against a short-lived session.
    pub fn with_session<T, E>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<PersistenceError>,
    {
        let mut guard = self.lock();
        match guard.as_mut() {
            Some(conn) => f(conn),
            None => Err(PersistenceError::Closed.into()),
        }
    }

    /// Runs `f` inside one transaction and commits it.
    ///
    /// The transaction is rolled back when `f` fails; a failed commit is
    /// returned to the caller.
    pub fn with_transaction<T, E>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<PersistenceError>,
    {
        self.with_session(|conn| {
            let tx = conn.transaction().map_err(PersistenceError::from)?;
            let value = f(&tx)?;
            tx.commit().map_err(PersistenceError::from)?;
            Ok(value)
        })
    }

    /// Executes `sql` and returns the first column of every row as text.
    ///
    /// `NULL` cells are skipped.
    pub fn query_strings(&self, sql: &str) -> PersistenceResult<Vec<String>> {
        self.with_session(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query([])?;
            let mut values = Vec::new();
            while let Some(row) = rows.next()? {
                match row.get_ref(0)? {
                    ValueRef::Null => {}
                    ValueRef::Integer(value) => values.push(value.to_string()),
                    ValueRef::Real(value) => values.push(value.to_string()),
                    ValueRef::Text(value) | ValueRef::Blob(value) => {
                        values.push(String::from_utf8_lossy(value).into_owned())
                    }
                }
            }
            Ok(values)
        })
    }

    /// Closes the backing connection. Closing twice is a no-op.
    pub fn close(&self) -> PersistenceResult<()> {
        let Some(conn) = self.lock().take() else {
            return Ok(());
        };
        match conn.close() {
            Ok(()) => {
                info!(
                    "event=factory_close module=persistence status=ok unit={}",
                    self.unit_name
                );
                Ok(())
            }
            Err((_, err)) => {
                error!(
                    "event=factory_close module=persistence status=error unit={} error={}",
                    self.unit_name,
                    sanitize_message(&err.to_string())
                );
                Err(err.into())
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn connect(
    unit: &PersistenceUnit,
    properties: &ConnectionProperties,
) -> PersistenceResult<Connection> {
    let driver = properties.driver_id().unwrap_or_default();
    if driver != SQLITE_DRIVER_ID {
        return Err(PersistenceError::UnsupportedDriver(driver.to_string()));
    }

    let url = properties.url().unwrap_or_default();
    if !url.starts_with(SQLITE_URL_PREFIX) {
        return Err(PersistenceError::UnsupportedUrl(redact_url(url)));
    }

    if properties.user().is_some_and(|user| !user.is_empty()) {
        debug!(
            "event=factory_open module=persistence status=skip unit={} reason=sqlite_has_no_accounts",
            unit.name()
        );
    }

    let flags = OpenFlags::default() | OpenFlags::SQLITE_OPEN_URI;
    let mut conn = Connection::open_with_flags(url, flags)?;
    bootstrap_connection(&mut conn, unit)?;
    Ok(conn)
}

fn bootstrap_connection(conn: &mut Connection, unit: &PersistenceUnit) -> PersistenceResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    apply_schema(conn, unit)?;
    Ok(())
}
