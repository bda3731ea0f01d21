//! Login/logout state machine and configuration holder.

use super::{SessionError, SessionId, SessionResult, SessionStatus};
use crate::adapter::DbAdapter;
use crate::logging::{redact_url, sanitize_message};
use crate::persistence::{
    ConnectionProperties, PersistenceError, PersistenceUnit, SessionFactory, PROPERTY_DRIVER,
    PROPERTY_PASSWORD, PROPERTY_UNIT, PROPERTY_URL, PROPERTY_USER,
};
use crate::registry::{
    discover, DiscoveryReport, RepositoryCatalog, RepositoryDefinition, RepositoryRegistry,
};
use crate::repo::SessionBinding;
use log::{error, info, warn};
use once_cell::sync::Lazy;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use uuid::Uuid;

static GLOBAL_SESSION_MANAGER: Lazy<Mutex<SessionManager>> =
    Lazy::new(|| Mutex::new(SessionManager::new()));

/// Keys injected by `login`; removed again when a login attempt fails.
const LOGIN_PROPERTY_KEYS: [&str; 5] = [
    PROPERTY_URL,
    PROPERTY_DRIVER,
    PROPERTY_USER,
    PROPERTY_PASSWORD,
    PROPERTY_UNIT,
];

/// State that exists only while logged in. Dropped as a whole on logout.
struct ActiveSession {
    id: SessionId,
    username: String,
    factory: Arc<SessionFactory>,
    roles: BTreeSet<String>,
    registry: RepositoryRegistry,
}

/// Owns the connection configuration and at most one open session.
///
/// Use `SessionManager::global()` for the process-wide instance, or
/// `SessionManager::new()` for an isolated one (tests, tools).
pub struct SessionManager {
    adapter: Option<Box<dyn DbAdapter>>,
    url: Option<String>,
    persistence_unit_name: Option<String>,
    package_list: Option<Vec<String>>,
    properties: ConnectionProperties,
    persistence_units: BTreeMap<String, PersistenceUnit>,
    catalog: RepositoryCatalog,
    active: Option<ActiveSession>,
    last_failure: Option<SessionError>,
    last_discovery: Option<DiscoveryReport>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    /// Creates an unconfigured, logged-out manager.
    pub fn new() -> Self {
        Self {
            adapter: None,
            url: None,
            persistence_unit_name: None,
            package_list: None,
            properties: ConnectionProperties::new(),
            persistence_units: BTreeMap::new(),
            catalog: RepositoryCatalog::new(),
            active: None,
            last_failure: None,
            last_discovery: None,
        }
    }

    /// Process-wide manager, created lazily on first access.
    pub fn global() -> &'static Mutex<SessionManager> {
        &GLOBAL_SESSION_MANAGER
    }

    /// Replaces the backend adapter. Logs out first.
    pub fn set_adapter(&mut self, adapter: impl DbAdapter + 'static) -> &mut Self {
        self.set_boxed_adapter(Box::new(adapter))
    }

    /// Replaces the backend adapter with an already boxed one. Logs out first.
    pub fn set_boxed_adapter(&mut self, adapter: Box<dyn DbAdapter>) -> &mut Self {
        self.logout();
        self.adapter = Some(adapter);
        self
    }

    pub fn adapter(&self) -> Option<&dyn DbAdapter> {
        self.adapter.as_deref()
    }

    /// Mutable access for tuning extra properties before `set_url`.
    pub fn adapter_mut(&mut self) -> Option<&mut (dyn DbAdapter + 'static)> {
        self.adapter.as_deref_mut()
    }

    /// Builds and stores the connection URL through the current adapter.
    /// Logs out first, even when the URL is rejected.
    ///
    /// # Errors
    /// - `InvalidConfiguration` when no adapter is set or the adapter rejects
    ///   its inputs or extra properties.
    pub fn set_url(&mut self, host: &str, port: u16, database: &str) -> SessionResult<&mut Self> {
        self.logout();
        let adapter = self.adapter.as_deref().ok_or_else(|| {
            SessionError::InvalidConfiguration("database adapter is not set".to_string())
        })?;
        let url = adapter
            .validate_extra_properties()
            .and_then(|()| adapter.create_url(host, port, database))
            .map_err(|err| SessionError::InvalidConfiguration(err.to_string()))?;
        info!(
            "event=session_configure module=session status=ok field=url adapter={} url={}",
            adapter.name(),
            redact_url(&url)
        );
        self.url = Some(url);
        Ok(self)
    }

    /// Stores a provider URL verbatim, bypassing the adapter's grammar.
    /// Logs out first.
    pub fn set_raw_url(&mut self, url: impl Into<String>) -> SessionResult<&mut Self> {
        self.logout();
        let url = url.into();
        if url.trim().is_empty() {
            return Err(SessionError::InvalidConfiguration(
                "connection url cannot be empty".to_string(),
            ));
        }
        self.url = Some(url.trim().to_string());
        Ok(self)
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Selects the persistence unit opened by `login`. Logs out first.
    pub fn set_persistence_unit_name(&mut self, name: &str) -> SessionResult<&mut Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SessionError::InvalidConfiguration(
                "persistence unit name cannot be empty".to_string(),
            ));
        }
        self.logout();
        self.persistence_unit_name = Some(name.to_string());
        Ok(self)
    }

    pub fn persistence_unit_name(&self) -> Option<&str> {
        self.persistence_unit_name.as_deref()
    }

    /// Limits discovery to declarations under the given module paths.
    /// Applies from the next login; the current session is kept.
    ///
    /// Without a package list, discovery registers every declaration in the
    /// catalog regardless of where it was declared. Set a list (for example
    /// `[module_path!()]`) to restrict discovery to the caller's own modules.
    pub fn set_package_list<I, S>(&mut self, locations: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.package_list = Some(locations.into_iter().map(Into::into).collect());
        self
    }

    /// Removes the discovery scope so every declaration is considered.
    pub fn clear_package_list(&mut self) -> &mut Self {
        self.package_list = None;
        self
    }

    pub fn package_list(&self) -> Option<&[String]> {
        self.package_list.as_deref()
    }

    /// Adds a caller-defined connection property, passed to the provider on
    /// the next login. Well-known keys are overwritten by `login`.
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.properties.set(key, value);
        self
    }

    pub fn properties(&self) -> &ConnectionProperties {
        &self.properties
    }

    /// Makes a persistence unit available to `login`, replacing one with the
    /// same name.
    pub fn register_persistence_unit(&mut self, unit: PersistenceUnit) -> &mut Self {
        self.persistence_units.insert(unit.name().to_string(), unit);
        self
    }

    /// Adds a repository declaration, instantiated on the next login.
    pub fn register_repository(&mut self, definition: RepositoryDefinition) -> &mut Self {
        self.catalog.register(definition);
        self
    }

    /// Opens a session for `username`.
    ///
    /// Returns `Ok(false)` when the backend cannot be reached or the roles
    /// cannot be read; the cause is kept in `last_failure`.
    ///
    /// # Errors
    /// - `InvalidState` when a session is already open.
    /// - `InvalidConfiguration` when adapter, URL or unit name is missing.
    /// - `Discovery` when repository declarations are invalid or collide.
    pub fn login(&mut self, username: &str, password: &str) -> SessionResult<bool> {
        if self.active.is_some() {
            return Err(SessionError::InvalidState(
                "a session is already open; logout first".to_string(),
            ));
        }
        let adapter = self.adapter.as_deref().ok_or_else(|| {
            SessionError::InvalidConfiguration("database adapter is not set".to_string())
        })?;
        let (adapter_name, driver_id, roles_query) =
            (adapter.name(), adapter.driver_id(), adapter.acquire_roles_query());
        let url = self.url.clone().ok_or_else(|| {
            SessionError::InvalidConfiguration("connection url is not set".to_string())
        })?;
        let unit_name = self.persistence_unit_name.clone().ok_or_else(|| {
            SessionError::InvalidConfiguration("persistence unit name is not set".to_string())
        })?;

        let started_at = Instant::now();
        info!(
            "event=session_login module=session status=start adapter={} unit={} url={}",
            adapter_name,
            unit_name,
            redact_url(&url)
        );

        self.properties
            .set(PROPERTY_URL, url)
            .set(PROPERTY_DRIVER, driver_id)
            .set(PROPERTY_USER, username)
            .set(PROPERTY_PASSWORD, password)
            .set(PROPERTY_UNIT, unit_name.as_str());

        let opened = match self.persistence_units.get(&unit_name) {
            Some(unit) => SessionFactory::open(unit, &self.properties),
            None => Err(PersistenceError::UnknownPersistenceUnit(unit_name.clone())),
        };
        let factory = match opened {
            Ok(factory) => Arc::new(factory),
            Err(err) => return Ok(self.fail_login(err, started_at)),
        };

        let roles = match factory.query_strings(roles_query) {
            Ok(rows) => rows.into_iter().collect::<BTreeSet<_>>(),
            Err(err) => {
                release(&factory);
                return Ok(self.fail_login(err, started_at));
            }
        };

        let binding = SessionBinding::new(&factory);
        let (registry, report) =
            match discover(&self.catalog, self.package_list.as_deref(), &binding) {
                Ok(discovered) => discovered,
                Err(err) => {
                    release(&factory);
                    self.remove_login_properties();
                    error!(
                        "event=session_login module=session status=error duration_ms={} error_code=discovery_failed error={}",
                        started_at.elapsed().as_millis(),
                        sanitize_message(&err.to_string())
                    );
                    return Err(SessionError::Discovery(err));
                }
            };

        let id = Uuid::new_v4();
        info!(
            "event=session_login module=session status=ok session_id={} unit={} roles={} repositories={} duration_ms={}",
            id,
            unit_name,
            roles.len(),
            registry.len(),
            started_at.elapsed().as_millis()
        );
        self.last_failure = None;
        self.last_discovery = Some(report);
        self.active = Some(ActiveSession {
            id,
            username: username.to_string(),
            factory,
            roles,
            registry,
        });
        Ok(true)
    }

    /// Closes the current session and clears every derived field.
    /// Does nothing when logged out.
    pub fn logout(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        self.properties.clear();
        self.last_discovery = None;
        if let Err(err) = active.factory.close() {
            warn!(
                "event=session_logout module=session status=degraded session_id={} error={}",
                active.id,
                sanitize_message(&err.to_string())
            );
        }
        info!(
            "event=session_logout module=session status=ok session_id={} unit={}",
            active.id,
            active.factory.unit_name()
        );
    }

    /// Returns whether a session is open and its factory still usable.
    pub fn is_logged_in(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.factory.is_open())
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.active.as_ref().map(|active| active.id)
    }

    pub fn username(&self) -> Option<&str> {
        self.active.as_ref().map(|active| active.username.as_str())
    }

    /// Cause of the most recent failed login, cleared by a successful one.
    pub fn last_failure(&self) -> Option<&SessionError> {
        self.last_failure.as_ref()
    }

    /// Sorted role names of the current session; empty when logged out.
    pub fn roles(&self) -> Vec<String> {
        self.active
            .as_ref()
            .map(|active| active.roles.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.roles.contains(role))
    }

    /// Returns the repository registered as `name` when it has type `R`.
    pub fn get_repository<R>(&self, name: &str) -> Option<Arc<R>>
    where
        R: Any + Send + Sync,
    {
        self.active
            .as_ref()
            .and_then(|active| active.registry.get::<R>(name))
    }

    pub fn repository_names(&self) -> Vec<String> {
        self.active
            .as_ref()
            .map(|active| active.registry.names())
            .unwrap_or_default()
    }

    /// Discovery outcome of the current session.
    pub fn last_discovery(&self) -> Option<&DiscoveryReport> {
        self.last_discovery.as_ref()
    }

    /// Changes the current user's password with the adapter's template.
    ///
    /// # Errors
    /// - `InvalidState` when logged out.
    /// - `Persistence` when the backend rejects the statement.
    pub fn change_password(&mut self, new_password: &str) -> SessionResult<()> {
        let (Some(active), Some(adapter)) = (self.active.as_ref(), self.adapter.as_deref()) else {
            return Err(SessionError::InvalidState(
                "no open session to change the password of".to_string(),
            ));
        };
        let session_id = active.id;
        let sql = adapter.render_change_password(&active.username, new_password);
        active
            .factory
            .with_session(|conn| conn.execute_batch(&sql).map_err(PersistenceError::from))
            .map_err(|err| {
                error!(
                    "event=session_change_password module=session status=error session_id={} error={}",
                    session_id,
                    sanitize_message(&err.to_string())
                );
                SessionError::Persistence(err)
            })?;

        self.properties.set(PROPERTY_PASSWORD, new_password);
        info!(
            "event=session_change_password module=session status=ok session_id={}",
            session_id
        );
        Ok(())
    }

    /// Credential-free snapshot for diagnostics.
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            logged_in: self.is_logged_in(),
            session_id: self.session_id(),
            adapter: self.adapter.as_deref().map(|adapter| adapter.name().to_string()),
            url: self.url.as_deref().map(redact_url),
            persistence_unit: self.persistence_unit_name.clone(),
            roles: self.roles(),
            repositories: self.repository_names(),
        }
    }

    fn fail_login(&mut self, err: PersistenceError, started_at: Instant) -> bool {
        error!(
            "event=session_login module=session status=error duration_ms={} error_code=connection_failed error={}",
            started_at.elapsed().as_millis(),
            sanitize_message(&err.to_string())
        );
        self.remove_login_properties();
        self.last_failure = Some(SessionError::ConnectionFailure(err));
        false
    }

    fn remove_login_properties(&mut self) {
        for key in LOGIN_PROPERTY_KEYS {
            self.properties.remove(key);
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.logout();
    }
}

impl Debug for SessionManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("adapter", &self.adapter.as_deref().map(|adapter| adapter.name()))
            .field("url", &self.url.as_deref().map(redact_url))
            .field("persistence_unit_name", &self.persistence_unit_name)
            .field("package_list", &self.package_list)
            .field("properties", &self.properties)
            .field("session_id", &self.session_id())
            .finish()
    }
}

fn release(factory: &SessionFactory) {
    if let Err(err) = factory.close() {
        warn!(
            "event=factory_release module=session status=degraded unit={} error={}",
            factory.unit_name(),
            sanitize_message(&err.to_string())
        );
    }
}
