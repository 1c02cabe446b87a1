//! Integration tests for registry lifecycle, probing and health reporting,
//! backed by on-disk SQLite databases.

use multidb::{BackendType, DatabaseConfig, DatabaseError, DatabaseManager};
use std::sync::Arc;
use tempfile::TempDir;

/// Opt-in log output for debugging: RUST_LOG=debug cargo test
fn trace_init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn sqlite_config(name: &str, dir: &TempDir) -> DatabaseConfig {
    let path = dir.path().join(format!("{}.db", name));
    DatabaseConfig::new(name, BackendType::Sqlite, path.to_str().unwrap()).unwrap()
}

/// Config whose database file can never be created.
fn unreachable_config(name: &str) -> DatabaseConfig {
    DatabaseConfig::new(
        name,
        BackendType::Sqlite,
        "/nonexistent-dir-multidb/never.db",
    )
    .unwrap()
}

#[tokio::test]
async fn test_get_connects_lazily_and_reuses_the_connection() {
    trace_init();
    let dir = TempDir::new().unwrap();
    let manager = DatabaseManager::new();
    manager.register(sqlite_config("primary", &dir)).await;

    assert!(manager.has("primary").await);
    assert!(!manager.is_connected("primary").await);

    let first = tokio_test::assert_ok!(manager.get("primary").await);
    assert!(manager.is_connected("primary").await);

    let second = tokio_test::assert_ok!(manager.get("primary").await);
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn test_concurrent_first_access_shares_one_connect() {
    let dir = TempDir::new().unwrap();
    let manager = Arc::new(DatabaseManager::new());
    manager.register(sqlite_config("primary", &dir)).await;

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.get("primary").await.unwrap() })
        })
        .collect();

    let mut connections = Vec::new();
    for task in tasks {
        connections.push(task.await.unwrap());
    }
    for conn in &connections[1..] {
        assert!(Arc::ptr_eq(&connections[0], conn));
    }
}

#[tokio::test]
async fn test_disabled_config_fails_without_connecting() {
    let dir = TempDir::new().unwrap();
    let manager = DatabaseManager::new();
    manager
        .register(sqlite_config("secondary", &dir).with_enabled(false))
        .await;

    let err = manager.get("secondary").await.unwrap_err();
    assert!(matches!(err, DatabaseError::Disabled { .. }));
    assert_eq!(err.database(), "secondary");
    assert!(!manager.is_connected("secondary").await);
}

#[tokio::test]
async fn test_unknown_name_is_not_configured() {
    let manager = DatabaseManager::new();
    let err = manager.get("missing").await.unwrap_err();
    assert!(matches!(err, DatabaseError::NotConfigured { .. }));
}

#[tokio::test]
async fn test_disconnect_then_get_reconnects() {
    let dir = TempDir::new().unwrap();
    let manager = DatabaseManager::new();
    manager.register(sqlite_config("primary", &dir)).await;

    manager.get("primary").await.unwrap();
    assert_eq!(manager.list_connected().await, vec!["primary".to_string()]);

    manager.disconnect("primary").await;
    assert!(!manager.is_connected("primary").await);
    assert!(manager.list_connected().await.is_empty());

    // still registered, so get() builds a fresh connection
    assert!(manager.has("primary").await);
    manager.get("primary").await.unwrap();
    assert!(manager.is_connected("primary").await);
}

#[tokio::test]
async fn test_disconnect_all() {
    let dir = TempDir::new().unwrap();
    let manager = DatabaseManager::new();
    manager.register(sqlite_config("one", &dir)).await;
    manager.register(sqlite_config("two", &dir)).await;

    manager.get("one").await.unwrap();
    manager.get("two").await.unwrap();
    assert_eq!(manager.list_connected().await.len(), 2);

    manager.disconnect_all().await;
    assert!(manager.list_connected().await.is_empty());
    assert_eq!(manager.list_registered().await.len(), 2);
}

#[tokio::test]
async fn test_connect_failure_leaves_nothing_and_retries() {
    let manager = DatabaseManager::new();
    manager.register(unreachable_config("broken")).await;

    let err = manager.get("broken").await.unwrap_err();
    assert!(matches!(err, DatabaseError::ConnectionFailed { .. }));
    assert!(err.is_retryable());
    assert!(!manager.is_connected("broken").await);

    // the failed attempt is not cached
    let err = manager.get("broken").await.unwrap_err();
    assert!(matches!(err, DatabaseError::ConnectionFailed { .. }));
}

#[tokio::test]
async fn test_test_connection_swallows_failures() {
    let manager = DatabaseManager::new();
    manager.register(unreachable_config("broken")).await;

    assert!(!manager.test_connection("broken").await);
    assert!(!manager.test_connection("never-registered").await);
}

#[tokio::test]
async fn test_test_all_connections_mixed() {
    let dir = TempDir::new().unwrap();
    let manager = DatabaseManager::new();
    manager.register(sqlite_config("reachable", &dir)).await;
    manager.register(unreachable_config("unreachable")).await;
    manager
        .register(sqlite_config("disabled", &dir).with_enabled(false))
        .await;

    let results = manager.test_all_connections().await;
    assert_eq!(results.get("reachable"), Some(&true));
    assert_eq!(results.get("unreachable"), Some(&false));
    assert_eq!(results.get("disabled"), Some(&false));
    assert_eq!(results.len(), 3);
}

#[tokio::test]
async fn test_stats_cover_connected_names_only() {
    let dir = TempDir::new().unwrap();
    let manager = DatabaseManager::new();
    manager.register(sqlite_config("primary", &dir)).await;
    manager.register(sqlite_config("idle", &dir)).await;

    manager.get("primary").await.unwrap();

    let stats = manager.stats().await;
    assert!(stats.contains_key("primary"));
    assert!(!stats.contains_key("idle"));
    let primary = &stats["primary"];
    assert!(primary.total >= 1);
    assert_eq!(primary.total, primary.active + primary.idle);
}

#[tokio::test]
async fn test_health_report_aggregates() {
    let dir = TempDir::new().unwrap();
    let manager = DatabaseManager::new();
    manager.register(sqlite_config("primary", &dir)).await;
    manager
        .register(sqlite_config("spare", &dir).with_enabled(false))
        .await;

    let report = manager.health_report().await;
    assert!(report.healthy);
    assert!(report.databases["primary"].healthy);
    assert!(report.databases["primary"].connected);
    assert_eq!(report.databases["primary"].backend, BackendType::Sqlite);
    assert!(!report.databases["spare"].healthy);
    assert!(!report.databases["spare"].enabled);

    // an enabled database that cannot connect flips the aggregate
    manager.register(unreachable_config("broken")).await;
    let report = manager.health_report().await;
    assert!(!report.healthy);
    assert!(!report.databases["broken"].healthy);
}
