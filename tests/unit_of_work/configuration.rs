//! `unitwork.toml` driven services

use crate::*;
use std::time::Duration;
use tempfile::TempDir;
use unitwork::{
    PersistenceContext, ScopeOption, UnitOfWorkManager, UowConfig, UowError, CONFIG_FILE_NAME,
    MUST_HAVE_TENANT, TENANT_ID_PARAM,
};

const CONFIG: &str = r#"
default_connection_string = "Data Source=main"
clock = "utc"

[connection_strings]
Orders = "Data Source=orders;Command Timeout=10"

[unit_of_work]
is_transactional = false
timeout_secs = 45
is_lazy_load_enabled = true

[[filters]]
name = "SoftDelete"
enabled = false

[[filters]]
name = "MustHaveTenant"
parameters = { tenant_id = "acme" }
"#;

fn manager_from(path: &std::path::Path, backend: &MemoryBackend) -> UnitOfWorkManager {
    let config = UowConfig::from_file(path).unwrap();
    let services = UnitOfWorkServices::builder(Arc::new(backend.clone()))
        .config(&config)
        .unwrap()
        .transaction_provider(MemoryTransactionProvider::new(backend))
        .build();
    UnitOfWorkManager::new(services)
}

#[test]
fn test_config_file_drives_scopes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(&path, CONFIG).unwrap();

    let backend = MemoryBackend::new();
    let manager = manager_from(&path, &backend);
    let mut uow = manager.begin_default().unwrap();
    assert!(!uow.with_scope(|s| s.is_transactional()).unwrap());

    let blogs = uow.context::<Blogs>().unwrap();
    let orders = uow.context::<Orders>().unwrap();
    assert_eq!(blogs.key().connection_string, "Data Source=main");
    assert_eq!(orders.key().connection_string, "Data Source=orders;Command Timeout=10");

    let (timeout, lazy) = blogs
        .with(|ctx: &mut MemoryContext| (ctx.command_timeout(), ctx.is_lazy_loading_enabled()))
        .unwrap();
    assert_eq!(timeout, Some(Duration::from_secs(45)));
    assert!(lazy);

    let filters = uow.filters().unwrap();
    assert_eq!(filters.len(), 2);
    assert!(!filters.is_enabled("SoftDelete"));
    assert_eq!(
        filters
            .get(MUST_HAVE_TENANT)
            .and_then(|f| f.parameter(TENANT_ID_PARAM))
            .and_then(|v| v.as_str()),
        Some("acme")
    );

    uow.complete().unwrap();
    uow.dispose().unwrap();
    assert_eq!(backend.journal().begins(), 0);
}

#[test]
fn test_explicit_options_override_config_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(&path, CONFIG).unwrap();

    let backend = MemoryBackend::new();
    let manager = manager_from(&path, &backend);
    let mut uow = manager
        .begin(
            UnitOfWorkOptions::transactional()
                .with_timeout(Duration::from_secs(5))
                .with_scope(ScopeOption::RequiresNew),
        )
        .unwrap();
    assert!(uow.with_scope(|s| s.is_transactional()).unwrap());
    let timeout = uow
        .context::<Blogs>()
        .unwrap()
        .with(|ctx: &mut MemoryContext| ctx.command_timeout())
        .unwrap();
    assert_eq!(timeout, Some(Duration::from_secs(5)));
    uow.dispose().unwrap();
    assert_eq!(backend.journal().begins(), 1);
}

#[test]
fn test_default_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    UowConfig::write_default_if_missing(&path).unwrap();

    let config = UowConfig::from_file(&path).unwrap();
    assert_eq!(config, UowConfig::default());

    let backend = MemoryBackend::new();
    let manager = manager_from(&path, &backend);
    let uow = manager.begin_default().unwrap();
    assert!(matches!(
        uow.context::<Blogs>(),
        Err(UowError::Configuration(_))
    ));
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(&path, "clock = \"martian\"\n").unwrap();
    assert!(matches!(
        UowConfig::from_file(&path),
        Err(UowError::Configuration(_))
    ));
    assert!(matches!(
        UowConfig::from_file(&dir.path().join("missing.toml")),
        Err(UowError::Configuration(_))
    ));
}
