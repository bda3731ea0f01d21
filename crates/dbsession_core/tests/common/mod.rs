#![allow(dead_code)]

use dbsession_core::registry::RepositoryHandle;
use dbsession_core::{
    declare_repository, Entity, PersistenceUnit, Repository, RepositoryResult, SessionBinding,
    SessionManager, SqliteAdapter, SqliteMode,
};
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, Row};
use std::sync::Arc;

pub const TEST_UNIT: &str = "testPU";
pub const PERSON_REPOSITORY: &str = "Person";
pub const PERSON_DIRECTORY: &str = "PersonDirectory";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Person {
    pub id: Option<i64>,
    pub name: String,
}

impl Person {
    pub fn new(name: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
        }
    }
}

impl Entity for Person {
    type Id = i64;
    const TABLE: &'static str = "person";
    const ID_COLUMN: &'static str = "id";
    const COLUMNS: &'static [&'static str] = &["name"];

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn column_values(&self) -> Vec<Value> {
        vec![Value::Text(self.name.clone())]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
        })
    }
}

/// Custom repository type layered on the generic one.
pub struct PersonDirectory {
    people: Repository<Person>,
}

impl PersonDirectory {
    pub fn people(&self) -> &Repository<Person> {
        &self.people
    }

    pub fn find_by_name(&self, name: &str) -> RepositoryResult<Option<Person>> {
        let id = self.people.with_connection(|conn| {
            conn.query_row(
                "SELECT id FROM person WHERE name = ?1 ORDER BY id LIMIT 1;",
                [name],
                |row| row.get::<_, i64>(0),
            )
            .optional()
        })?;
        self.people.find_by_id(id)
    }
}

pub fn build_person_directory(
    name: &str,
    binding: &SessionBinding,
) -> RepositoryResult<RepositoryHandle> {
    let directory: RepositoryHandle = Arc::new(PersonDirectory {
        people: Repository::bind(name, binding.clone())?,
    });
    Ok(directory)
}

pub fn test_unit() -> PersistenceUnit {
    PersistenceUnit::new(TEST_UNIT).with_schema_step(
        1,
        "CREATE TABLE person (id INTEGER PRIMARY KEY, name TEXT NOT NULL);",
    )
}

/// Configures `manager` for a private in-memory database with the person
/// repositories declared.
pub fn configure_memory(manager: &mut SessionManager, database: &str) {
    manager
        .set_adapter(SqliteAdapter::with_mode(SqliteMode::Memory))
        .register_persistence_unit(test_unit())
        .register_repository(declare_repository!(PERSON_REPOSITORY, Person))
        .register_repository(declare_repository!(
            PERSON_DIRECTORY,
            fn build_person_directory
        ));
    manager.set_url("", 0, database).unwrap();
    manager.set_persistence_unit_name(TEST_UNIT).unwrap();
}

pub fn memory_manager(database: &str) -> SessionManager {
    let mut manager = SessionManager::new();
    configure_memory(&mut manager, database);
    manager
}

/// Logged-in manager plus its person repository.
pub fn logged_in(database: &str) -> (SessionManager, Arc<Repository<Person>>) {
    let mut manager = memory_manager(database);
    assert!(manager.login("", "").unwrap());
    let people = manager
        .get_repository::<Repository<Person>>(PERSON_REPOSITORY)
        .expect("person repository is registered");
    (manager, people)
}
