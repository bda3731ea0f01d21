//! Repository registry and discovery.
//!
//! # Responsibility
//! - Hold the name-keyed repository singletons of the current login.
//! - Build that registry from explicitly registered declarations.
//!
//! # Invariants
//! - One live repository per name; a second declaration of a name is a
//!   fatal configuration error, never an overwrite.
//! - The registry is replaced wholesale, never patched.

use std::any::Any;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

mod discovery;

pub use discovery::{
    discover, DiscoveryReport, Instantiate, RepositoryCatalog, RepositoryDefinition,
    SkippedDefinition,
};

/// Type-erased repository instance stored in the registry.
pub type RepositoryHandle = Arc<dyn Any + Send + Sync>;

/// Fatal discovery errors. These abort the enclosing login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    NameCollision(String),
    InvalidDeclaration(String),
}

impl Display for DiscoveryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NameCollision(name) => write!(f, "repository `{name}` is declared more than once"),
            Self::InvalidDeclaration(name) => {
                write!(f, "repository declaration name is invalid: `{name}`")
            }
        }
    }
}

impl Error for DiscoveryError {}

/// Name-keyed repository singletons for one login.
#[derive(Clone, Default)]
pub struct RepositoryRegistry {
    entries: BTreeMap<String, RepositoryHandle>,
}

impl RepositoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts one repository; an already registered name is rejected.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        repository: RepositoryHandle,
    ) -> Result<(), DiscoveryError> {
        let name = name.into();
        if self.entries.contains_key(name.as_str()) {
            return Err(DiscoveryError::NameCollision(name));
        }
        self.entries.insert(name, repository);
        Ok(())
    }

    /// Returns the repository registered as `name` if it has type `R`.
    pub fn get<R>(&self, name: &str) -> Option<Arc<R>>
    where
        R: Any + Send + Sync,
    {
        self.entries
            .get(name.trim())
            .cloned()
            .and_then(|handle| handle.downcast::<R>().ok())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name.trim())
    }

    /// Returns sorted repository names.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Debug for RepositoryRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}
