mod common;

use common::{
    configure_memory, memory_manager, test_unit, Person, PersonDirectory, PERSON_DIRECTORY,
    PERSON_REPOSITORY, TEST_UNIT,
};
use dbsession_core::adapter::AdapterResult;
use dbsession_core::persistence::{SQLITE_DRIVER_ID, PROPERTY_PASSWORD, PROPERTY_URL};
use dbsession_core::registry::RepositoryDefinition;
use dbsession_core::{
    declare_repository, DbAdapter, DiscoveryError, PersistenceError, PostgreSqlAdapter,
    Repository, SessionError, SessionManager, SessionStatus, SqliteAdapter, SqliteMode,
};
use std::collections::BTreeMap;
use std::sync::PoisonError;

/// Reaches SQLite but asks for roles from a table that does not exist.
#[derive(Default)]
struct BrokenRolesAdapter {
    extra_properties: BTreeMap<String, String>,
}

impl DbAdapter for BrokenRolesAdapter {
    fn create_url(&self, _host: &str, _port: u16, database: &str) -> AdapterResult<String> {
        Ok(format!("file:{database}?mode=memory"))
    }

    fn name(&self) -> &'static str {
        "BrokenRoles"
    }

    fn supported_extra_properties(&self) -> &'static [&'static str] {
        &[]
    }

    fn driver_id(&self) -> &'static str {
        SQLITE_DRIVER_ID
    }

    fn change_password_template(&self) -> &'static str {
        ""
    }

    fn acquire_roles_query(&self) -> &'static str {
        "SELECT rolename FROM missing_roles;"
    }

    fn extra_properties(&self) -> &BTreeMap<String, String> {
        &self.extra_properties
    }

    fn extra_properties_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.extra_properties
    }
}

#[test]
fn login_while_logged_in_is_rejected_and_keeps_the_session() {
    let mut manager = memory_manager("lifecycle_relogin");
    assert!(manager.login("", "").unwrap());
    let session_id = manager.session_id();
    let roles = manager.roles();
    let names = manager.repository_names();
    let before = manager
        .get_repository::<Repository<Person>>(PERSON_REPOSITORY)
        .unwrap();

    let err = manager.login("other", "pw").unwrap_err();
    assert!(matches!(err, SessionError::InvalidState(_)));

    assert!(manager.is_logged_in());
    assert_eq!(manager.session_id(), session_id);
    assert_eq!(manager.roles(), roles);
    assert_eq!(manager.repository_names(), names);
    let after = manager
        .get_repository::<Repository<Person>>(PERSON_REPOSITORY)
        .unwrap();
    assert!(std::sync::Arc::ptr_eq(&before, &after));
    assert!(after.is_open());
}

#[test]
fn successful_login_exposes_roles_and_every_discovered_repository() {
    let mut manager = memory_manager("lifecycle_login");
    assert!(!manager.is_logged_in());
    assert!(manager.login("", "").unwrap());

    assert!(manager.is_logged_in());
    assert_eq!(manager.roles(), vec!["owner".to_string()]);
    assert_eq!(
        manager.repository_names(),
        vec![PERSON_REPOSITORY.to_string(), PERSON_DIRECTORY.to_string()]
    );
    for name in manager.repository_names() {
        assert!(manager.status().repositories.contains(&name));
    }
    assert!(manager
        .get_repository::<Repository<Person>>(PERSON_REPOSITORY)
        .is_some());
    assert!(manager
        .get_repository::<PersonDirectory>(PERSON_DIRECTORY)
        .is_some());
    assert!(manager.get_repository::<PersonDirectory>("Unknown").is_none());

    let report = manager.last_discovery().unwrap();
    assert_eq!(report.registered.len(), 2);
    assert!(report.skipped.is_empty());
}

#[test]
fn logout_makes_every_repository_unresolvable() {
    let mut manager = memory_manager("lifecycle_logout");
    assert!(manager.login("", "").unwrap());
    let names = manager.repository_names();
    assert!(!names.is_empty());

    manager.logout();
    assert!(!manager.is_logged_in());
    for name in &names {
        assert!(manager
            .get_repository::<Repository<Person>>(name)
            .is_none());
        assert!(manager.get_repository::<PersonDirectory>(name).is_none());
    }
    assert!(manager.roles().is_empty());
    assert!(manager.last_discovery().is_none());

    manager.logout();
    assert!(!manager.is_logged_in());
}

#[test]
fn relogin_after_logout_opens_a_fresh_session() {
    let mut manager = memory_manager("lifecycle_relogin_after_logout");
    assert!(manager.login("", "").unwrap());
    let first = manager.session_id().unwrap();
    manager.logout();

    assert!(manager.login("", "").unwrap());
    let second = manager.session_id().unwrap();
    assert_ne!(first, second);
}

#[test]
fn duplicate_repository_names_fail_login_fatally() {
    let mut manager = memory_manager("lifecycle_collision");
    manager.register_repository(declare_repository!(PERSON_REPOSITORY, Person));

    let err = manager.login("", "").unwrap_err();
    assert!(matches!(
        err,
        SessionError::Discovery(DiscoveryError::NameCollision(ref name)) if name == PERSON_REPOSITORY
    ));
    assert!(!manager.is_logged_in());
    assert!(manager.last_failure().is_none());
    assert!(manager.repository_names().is_empty());
    assert!(manager.properties().get(PROPERTY_PASSWORD).is_none());
}

#[test]
fn unreachable_backend_returns_false_with_connection_failure() {
    let mut manager = SessionManager::new();
    manager
        .set_adapter(PostgreSqlAdapter::new())
        .register_persistence_unit(test_unit());
    manager.set_url("db.example", 5432, "app").unwrap();
    manager.set_persistence_unit_name(TEST_UNIT).unwrap();

    assert!(!manager.login("admin", "secret").unwrap());
    assert!(!manager.is_logged_in());
    assert!(matches!(
        manager.last_failure(),
        Some(SessionError::ConnectionFailure(
            PersistenceError::UnsupportedDriver(_)
        ))
    ));
    assert!(manager.properties().get(PROPERTY_PASSWORD).is_none());
}

#[test]
fn unknown_persistence_unit_returns_false() {
    let mut manager = memory_manager("lifecycle_unknown_unit");
    manager.set_persistence_unit_name("otherPU").unwrap();

    assert!(!manager.login("", "").unwrap());
    assert!(matches!(
        manager.last_failure(),
        Some(SessionError::ConnectionFailure(
            PersistenceError::UnknownPersistenceUnit(name)
        )) if name == "otherPU"
    ));
}

#[test]
fn failing_role_query_returns_false_and_releases_the_factory() {
    let mut manager = SessionManager::new();
    manager
        .set_adapter(BrokenRolesAdapter::default())
        .register_persistence_unit(test_unit());
    manager.set_url("", 0, "lifecycle_broken_roles").unwrap();
    manager.set_persistence_unit_name(TEST_UNIT).unwrap();

    assert!(!manager.login("", "").unwrap());
    assert!(!manager.is_logged_in());
    assert!(matches!(
        manager.last_failure(),
        Some(SessionError::ConnectionFailure(PersistenceError::Sqlite(_)))
    ));
}

#[test]
fn configuration_setters_log_out_first() {
    let mut manager = memory_manager("lifecycle_setters");

    assert!(manager.login("", "").unwrap());
    manager.set_adapter(SqliteAdapter::with_mode(SqliteMode::Memory));
    assert!(!manager.is_logged_in());

    assert!(manager.login("", "").unwrap());
    manager.set_url("", 0, "lifecycle_setters_2").unwrap();
    assert!(!manager.is_logged_in());

    assert!(manager.login("", "").unwrap());
    manager.set_persistence_unit_name(TEST_UNIT).unwrap();
    assert!(!manager.is_logged_in());

    assert!(manager.login("", "").unwrap());
    manager.set_raw_url("file:lifecycle_setters_3?mode=memory").unwrap();
    assert!(!manager.is_logged_in());
    assert!(manager.login("", "").unwrap());
}

#[test]
fn rejected_url_still_logs_out() {
    let mut manager = memory_manager("lifecycle_bad_url");
    assert!(manager.login("", "").unwrap());
    manager.set_adapter(PostgreSqlAdapter::new());
    assert!(manager.set_url("", 5432, "app").is_err());
    assert!(!manager.is_logged_in());
}

#[test]
fn repository_handles_outlive_logout_but_report_session_closed() {
    let mut manager = memory_manager("lifecycle_stale_handle");
    assert!(manager.login("", "").unwrap());
    let people = manager
        .get_repository::<Repository<Person>>(PERSON_REPOSITORY)
        .unwrap();
    people.save_and_flush(Person::new("Ada")).unwrap();

    manager.logout();
    assert!(!people.is_open());
    assert!(matches!(
        people.find_all(),
        Err(dbsession_core::RepositoryError::SessionClosed)
    ));
}

#[test]
fn package_list_limits_discovery_scope() {
    let mut manager = memory_manager("lifecycle_scope");
    manager.register_repository(RepositoryDefinition::for_entity::<Person>(
        "VendorPerson",
        "vendor::people",
    ));

    manager.set_package_list([module_path!()]);
    assert!(manager.login("", "").unwrap());
    assert!(!manager
        .repository_names()
        .contains(&"VendorPerson".to_string()));
    manager.logout();

    manager.set_package_list(["vendor"]);
    assert!(manager.login("", "").unwrap());
    assert_eq!(manager.repository_names(), vec!["VendorPerson".to_string()]);
    manager.logout();

    manager.clear_package_list();
    assert!(manager.login("", "").unwrap());
    assert_eq!(manager.repository_names().len(), 3);
}

#[test]
fn custom_properties_survive_until_logout() {
    let mut manager = memory_manager("lifecycle_properties");
    manager.set_property("app.client", "tests");
    assert!(manager.login("sa", "pw").unwrap());
    assert_eq!(manager.properties().get("app.client"), Some("tests"));
    assert!(manager.properties().get(PROPERTY_URL).is_some());

    manager.logout();
    assert!(manager.properties().is_empty());
}

#[test]
fn change_password_updates_the_stored_credential() {
    let mut manager = memory_manager("lifecycle_password");
    assert!(manager.login("sa", "old").unwrap());
    manager.change_password("new").unwrap();
    assert_eq!(manager.properties().get(PROPERTY_PASSWORD), Some("new"));
    assert!(manager.is_logged_in());
}

#[test]
fn status_serializes_without_credentials() {
    let mut manager = memory_manager("lifecycle_status");
    assert!(manager.login("sa", "top-secret").unwrap());

    let status = manager.status();
    let json = serde_json::to_string(&status).unwrap();
    assert!(!json.contains("top-secret"));

    let decoded: SessionStatus = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded, status);
    assert!(decoded.logged_in);
    assert_eq!(decoded.persistence_unit.as_deref(), Some(TEST_UNIT));
    assert_eq!(decoded.session_id, manager.session_id());
}

#[test]
fn global_manager_is_one_shared_instance() {
    let first = SessionManager::global();
    let second = SessionManager::global();
    assert!(std::ptr::eq(first, second));

    {
        let mut manager = first.lock().unwrap_or_else(PoisonError::into_inner);
        configure_memory(&mut manager, "lifecycle_global");
        assert!(manager.login("", "").unwrap());
    }
    {
        let mut manager = second.lock().unwrap_or_else(PoisonError::into_inner);
        assert!(manager.is_logged_in());
        manager.logout();
        assert!(!manager.is_logged_in());
    }
}
