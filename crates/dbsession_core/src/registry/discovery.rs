//! Explicit repository declarations and the discovery pass over them.
//!
//! Declarations are collected up front (`RepositoryCatalog::register` or
//! `declare_repository!`); discovery instantiates the ones in scope once per
//! login.

use super::{DiscoveryError, RepositoryHandle, RepositoryRegistry};
use crate::logging::sanitize_message;
use crate::repo::{Entity, Repository, RepositoryResult, SessionBinding};
use log::{error, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Instant;

static REPOSITORY_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_.\-]*$").expect("valid repository name regex")
});

/// Builds one repository instance for a declared name.
pub type Instantiate = fn(&str, &SessionBinding) -> RepositoryResult<RepositoryHandle>;

/// One repository declaration: a unique name, where it was declared, and
/// how to build it.
#[derive(Clone)]
pub struct RepositoryDefinition {
    name: String,
    location: String,
    instantiate: Instantiate,
}

impl RepositoryDefinition {
    pub fn new(
        name: impl Into<String>,
        location: impl Into<String>,
        instantiate: Instantiate,
    ) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            instantiate,
        }
    }

    /// Declares a plain `Repository<E>` under `name`.
    pub fn for_entity<E: Entity>(name: impl Into<String>, location: impl Into<String>) -> Self {
        Self::new(name, location, instantiate_entity_repository::<E>)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Module path the declaration belongs to; matched against scan locations.
    pub fn location(&self) -> &str {
        &self.location
    }
}

impl Debug for RepositoryDefinition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryDefinition")
            .field("name", &self.name)
            .field("location", &self.location)
            .finish()
    }
}

fn instantiate_entity_repository<E: Entity>(
    name: &str,
    binding: &SessionBinding,
) -> RepositoryResult<RepositoryHandle> {
    let repository: RepositoryHandle = Arc::new(Repository::<E>::bind(name, binding.clone())?);
    Ok(repository)
}

/// Declares a repository at the call site, recording `module_path!()` as its
/// location.
///
/// - `declare_repository!("Person", Person)` declares `Repository<Person>`.
/// - `declare_repository!("Person", fn build_person_repository)` declares a
///   custom type built by the given `Instantiate` function.
#[macro_export]
macro_rules! declare_repository {
    ($name:expr, fn $instantiate:path) => {
        $crate::registry::RepositoryDefinition::new($name, module_path!(), $instantiate)
    };
    ($name:expr, $entity:ty) => {
        $crate::registry::RepositoryDefinition::for_entity::<$entity>($name, module_path!())
    };
}

/// Ordered list of declarations known to a session manager.
///
/// Duplicate names are accepted here and rejected during discovery.
#[derive(Debug, Clone, Default)]
pub struct RepositoryCatalog {
    definitions: Vec<RepositoryDefinition>,
}

impl RepositoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: RepositoryDefinition) -> &mut Self {
        self.definitions.push(definition);
        self
    }

    pub fn definitions(&self) -> &[RepositoryDefinition] {
        &self.definitions
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

/// A declaration whose instantiation failed and was left out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedDefinition {
    pub name: String,
    pub reason: String,
}

/// Outcome of one discovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryReport {
    pub registered: Vec<String>,
    pub skipped: Vec<SkippedDefinition>,
}

/// Instantiates every in-scope declaration exactly once.
///
/// `scan_locations = None` scans the whole catalog; otherwise a declaration
/// is in scope when its location equals a scan location or is nested below
/// it (`location::...`).
///
/// # Errors
/// - `InvalidDeclaration` for a blank or malformed name.
/// - `NameCollision` when two in-scope declarations share a name.
///
/// A declaration that fails to instantiate is logged and skipped.
pub fn discover(
    catalog: &RepositoryCatalog,
    scan_locations: Option<&[String]>,
    binding: &SessionBinding,
) -> Result<(RepositoryRegistry, DiscoveryReport), DiscoveryError> {
    let started_at = Instant::now();
    let mut registry = RepositoryRegistry::new();
    let mut report = DiscoveryReport::default();
    let mut seen = BTreeSet::new();

    for definition in catalog
        .definitions()
        .iter()
        .filter(|definition| in_scope(definition.location(), scan_locations))
    {
        let name = normalize_name(definition.name())?;
        if !seen.insert(name.clone()) {
            error!(
                "event=repository_discovery module=registry status=error error_code=name_collision repository={} location={}",
                name,
                definition.location()
            );
            return Err(DiscoveryError::NameCollision(name));
        }

        match (definition.instantiate)(&name, binding) {
            Ok(repository) => {
                registry.insert(name.clone(), repository)?;
                report.registered.push(name);
            }
            Err(err) => {
                let reason = sanitize_message(&err.to_string());
                warn!(
                    "event=repository_discovery module=registry status=skip repository={} location={} error={}",
                    name,
                    definition.location(),
                    reason
                );
                report.skipped.push(SkippedDefinition { name, reason });
            }
        }
    }

    info!(
        "event=repository_discovery module=registry status=ok registered={} skipped={} duration_ms={}",
        report.registered.len(),
        report.skipped.len(),
        started_at.elapsed().as_millis()
    );
    Ok((registry, report))
}

fn normalize_name(name: &str) -> Result<String, DiscoveryError> {
    let trimmed = name.trim();
    if !REPOSITORY_NAME_RE.is_match(trimmed) {
        return Err(DiscoveryError::InvalidDeclaration(trimmed.to_string()));
    }
    Ok(trimmed.to_string())
}

fn in_scope(location: &str, scan_locations: Option<&[String]>) -> bool {
    let Some(scan_locations) = scan_locations else {
        return true;
    };
    scan_locations
        .iter()
        .map(|scan| scan.trim())
        .filter(|scan| !scan.is_empty())
        .any(|scan| {
            location == scan
                || location
                    .strip_prefix(scan)
                    .is_some_and(|rest| rest.starts_with("::"))
        })
}
