//! Generic CRUD repository over one entity type.
//!
//! # Responsibility
//! - Provide merge/find/delete/refresh operations for an `Entity`.
//! - Keep SQL details inside the persistence boundary.
//!
//! # Invariants
//! - A repository never owns its session factory; it holds a weak binding
//!   and fails with `SessionClosed` once the login that created it ended.
//! - Each write operation runs in exactly one transaction.

use super::entity::{Entity, EntityQuery, EntitySql};
use super::{RepositoryError, RepositoryResult};
use crate::persistence::SessionFactory;
use log::warn;
use rusqlite::types::{ToSql, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

/// Non-owning link from a repository to the session factory of one login.
#[derive(Clone, Default)]
pub struct SessionBinding {
    factory: Weak<SessionFactory>,
}

impl SessionBinding {
    pub(crate) fn new(factory: &Arc<SessionFactory>) -> Self {
        Self {
            factory: Arc::downgrade(factory),
        }
    }

    /// A binding that was never attached to a session.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.factory
            .upgrade()
            .is_some_and(|factory| factory.is_open())
    }

    fn resolve(&self) -> RepositoryResult<Arc<SessionFactory>> {
        match self.factory.upgrade() {
            Some(factory) if factory.is_open() => Ok(factory),
            _ => Err(RepositoryError::SessionClosed),
        }
    }
}

impl Debug for SessionBinding {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBinding")
            .field("open", &self.is_open())
            .finish()
    }
}

/// CRUD facade for entity type `E`, registered under a unique name.
pub struct Repository<E: Entity> {
    name: String,
    binding: SessionBinding,
    sql: EntitySql,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Repository<E> {
    /// Binds a repository to the session behind `binding`.
    ///
    /// # Errors
    /// - `InvalidMapping` when `E`'s table or column names are not plain SQL
    ///   identifiers.
    pub fn bind(name: impl Into<String>, binding: SessionBinding) -> RepositoryResult<Self> {
        Ok(Self {
            name: name.into(),
            binding,
            sql: EntitySql::for_entity::<E>()?,
            _entity: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns whether the bound session is still usable.
    pub fn is_open(&self) -> bool {
        self.binding.is_open()
    }

    /// Inserts or updates `entity` and returns it with its identifier set.
    pub fn save_and_flush(&self, entity: E) -> RepositoryResult<E> {
        let factory = self.binding.resolve()?;
        factory.with_transaction(|tx| self.merge(tx, entity))
    }

    /// Merges every entity in one transaction, preserving input order.
    pub fn save_and_flush_all(&self, entities: Vec<E>) -> RepositoryResult<Vec<E>> {
        let factory = self.binding.resolve()?;
        factory.with_transaction(|tx| {
            entities
                .into_iter()
                .map(|entity| self.merge(tx, entity))
                .collect()
        })
    }

    /// Looks up one entity. `None` as id yields `Ok(None)`.
    pub fn find_by_id(&self, id: impl Into<Option<E::Id>>) -> RepositoryResult<Option<E>> {
        let Some(id) = id.into() else {
            return Ok(None);
        };
        let factory = self.binding.resolve()?;
        factory.with_session(|conn| self.select_by_id(conn, &id))
    }

    /// Looks up each id independently; ids that are not found are omitted.
    pub fn find_all_by_id<I>(&self, ids: I) -> RepositoryResult<Vec<E>>
    where
        I: IntoIterator,
        I::Item: Into<Option<E::Id>>,
    {
        let mut found = Vec::new();
        for id in ids {
            if let Some(entity) = self.find_by_id(id)? {
                found.push(entity);
            }
        }
        Ok(found)
    }

    /// Returns every row, in identifier order.
    pub fn find_all(&self) -> RepositoryResult<Vec<E>> {
        self.list(&EntityQuery::default())
    }

    /// Returns rows ordered and paged by `query`.
    pub fn list(&self, query: &EntityQuery) -> RepositoryResult<Vec<E>> {
        let (sql, bind_values) = self.sql.list(query)?;
        let factory = self.binding.resolve()?;
        factory.with_session(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(bind_values), E::from_row)?;
            let entities = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(entities)
        })
    }

    pub fn count(&self) -> RepositoryResult<u64> {
        let factory = self.binding.resolve()?;
        factory.with_session(|conn| {
            let count = conn.query_row(&self.sql.count, [], |row| row.get::<_, i64>(0))?;
            Ok(u64::try_from(count).unwrap_or_default())
        })
    }

    /// Merges then removes `entity` in one transaction.
    pub fn delete(&self, entity: &E) -> RepositoryResult<()> {
        let factory = self.binding.resolve()?;
        factory.with_transaction(|tx| self.remove(tx, entity.clone()))
    }

    /// Merges then removes every entity in one transaction.
    pub fn delete_all(&self, entities: &[E]) -> RepositoryResult<()> {
        let factory = self.binding.resolve()?;
        factory.with_transaction(|tx| {
            for entity in entities {
                self.remove(tx, entity.clone())?;
            }
            Ok(())
        })
    }

    /// Deletes the entity with `id` if it exists.
    pub fn delete_by_id(&self, id: impl Into<Option<E::Id>>) -> RepositoryResult<()> {
        match self.find_by_id(id)? {
            Some(entity) => self.delete(&entity),
            None => Ok(()),
        }
    }

    /// Deletes every entity found among `ids`; missing ids are ignored.
    pub fn delete_all_by_id<I>(&self, ids: I) -> RepositoryResult<()>
    where
        I: IntoIterator,
        I::Item: Into<Option<E::Id>>,
    {
        let entities = self.find_all_by_id(ids)?;
        self.delete_all(&entities)
    }

    /// Reloads `entity` from the store in place and returns it.
    pub fn refresh<'e>(&self, entity: &'e mut E) -> RepositoryResult<&'e mut E> {
        let id = entity.id().ok_or(RepositoryError::NotPersistent)?;
        let factory = self.binding.resolve()?;
        let fresh = factory.with_session(|conn| self.select_by_id(conn, &id))?;
        match fresh {
            Some(fresh) => {
                *entity = fresh;
                Ok(entity)
            }
            None => Err(RepositoryError::EntityNotFound(format!(
                "{}#{id:?}",
                E::TABLE
            ))),
        }
    }

    /// Removes every row of the entity's table. Returns the number removed.
    ///
    /// Destructive: meant for test setup and resets, never for regular flows.
    pub fn delete_everything(&self) -> RepositoryResult<usize> {
        let factory = self.binding.resolve()?;
        let removed = factory.with_transaction(|tx| {
            let removed = tx.execute(&self.sql.delete_all, [])?;
            Ok::<_, RepositoryError>(removed)
        })?;
        warn!(
            "event=repository_delete_everything module=repo status=ok repository={} table={} removed={}",
            self.name,
            E::TABLE,
            removed
        );
        Ok(removed)
    }

    /// Runs `f` with the raw session for queries the repository does not cover.
    ///
    /// The session lock is held while `f` runs and is not reentrant: `f` must
    /// use only the given connection. Calling this or any other repository
    /// bound to the same session from inside `f` deadlocks.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> RepositoryResult<T> {
        let factory = self.binding.resolve()?;
        factory.with_session(|conn| Ok(f(conn)?))
    }

    fn select_by_id(&self, conn: &Connection, id: &E::Id) -> RepositoryResult<Option<E>> {
        let entity = conn
            .query_row(&self.sql.select_by_id, params![id], E::from_row)
            .optional()?;
        Ok(entity)
    }

    fn merge(&self, conn: &Connection, mut entity: E) -> RepositoryResult<E> {
        let values = entity.column_values();
        if values.len() != self.sql.column_count() {
            return Err(RepositoryError::InvalidMapping(format!(
                "`{}` produced {} values for {} columns",
                E::TABLE,
                values.len(),
                self.sql.column_count()
            )));
        }

        let Some(id) = entity.id() else {
            conn.execute(&self.sql.insert_generated, params_from_iter(values.iter()))?;
            let rowid = conn.last_insert_rowid();
            let id = conn.query_row(&self.sql.select_id_by_rowid, [rowid], |row| {
                row.get::<_, E::Id>(0)
            })?;
            entity.set_id(id);
            return Ok(entity);
        };

        let exists = conn.query_row(&self.sql.exists, params![id], |row| row.get::<_, bool>(0))?;
        if exists {
            if let Some(update) = &self.sql.update {
                let mut bound = values.iter().map(as_sql).collect::<Vec<_>>();
                bound.push(&id);
                conn.execute(update, bound.as_slice())?;
            }
        } else {
            let mut bound: Vec<&dyn ToSql> = vec![&id];
            bound.extend(values.iter().map(as_sql));
            conn.execute(&self.sql.insert_with_id, bound.as_slice())?;
        }
        Ok(entity)
    }

    fn remove(&self, conn: &Connection, entity: E) -> RepositoryResult<()> {
        let merged = self.merge(conn, entity)?;
        if let Some(id) = merged.id() {
            conn.execute(&self.sql.delete_by_id, params![id])?;
        }
        Ok(())
    }
}

impl<E: Entity> Debug for Repository<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("name", &self.name)
            .field("table", &E::TABLE)
            .field("binding", &self.binding)
            .finish()
    }
}

fn as_sql(value: &Value) -> &dyn ToSql {
    value
}
