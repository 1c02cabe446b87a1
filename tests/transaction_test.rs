//! Integration tests for transaction scoping: commit visibility, rollback
//! invisibility, and session release on every exit path.

use multidb::{BackendType, DatabaseConfig, DatabaseManager, NamedParams, ParamValue};
use tempfile::TempDir;

async fn manager_with_table(dir: &TempDir) -> DatabaseManager {
    let path = dir.path().join("tx.db");
    let manager = DatabaseManager::new();
    manager
        .register(
            DatabaseConfig::new("primary", BackendType::Sqlite, path.to_str().unwrap()).unwrap(),
        )
        .await;
    let db = manager.get("primary").await.unwrap();
    db.query(
        "CREATE TABLE entries (id INTEGER PRIMARY KEY, label TEXT)",
        &NamedParams::new(),
    )
    .await
    .unwrap();
    manager
}

fn entry(id: i64, label: &str) -> NamedParams {
    let mut params = NamedParams::new();
    params.insert("id".to_string(), ParamValue::Int(id));
    params.insert("label".to_string(), ParamValue::Text(label.to_string()));
    params
}

async fn count_entries(manager: &DatabaseManager) -> i64 {
    let db = manager.get("primary").await.unwrap();
    let result = db
        .query("SELECT COUNT(*) as n FROM entries", &NamedParams::new())
        .await
        .unwrap();
    result.rows[0]["n"].as_i64().unwrap()
}

#[tokio::test]
async fn test_committed_writes_are_visible() {
    let dir = TempDir::new().unwrap();
    let manager = manager_with_table(&dir).await;
    let db = manager.get("primary").await.unwrap();

    let mut tx = db.begin().await.unwrap();
    tx.query(
        "INSERT INTO entries (id, label) VALUES (:id, :label)",
        &entry(1, "first"),
    )
    .await
    .unwrap();
    tx.query(
        "INSERT INTO entries (id, label) VALUES (:id, :label)",
        &entry(2, "second"),
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();

    assert_eq!(count_entries(&manager).await, 2);
}

#[tokio::test]
async fn test_rolled_back_writes_are_invisible() {
    let dir = TempDir::new().unwrap();
    let manager = manager_with_table(&dir).await;
    let db = manager.get("primary").await.unwrap();

    let mut tx = db.begin().await.unwrap();
    tx.query(
        "INSERT INTO entries (id, label) VALUES (:id, :label)",
        &entry(1, "first"),
    )
    .await
    .unwrap();
    tx.query(
        "INSERT INTO entries (id, label) VALUES (:id, :label)",
        &entry(2, "second"),
    )
    .await
    .unwrap();
    tx.rollback().await.unwrap();

    assert_eq!(count_entries(&manager).await, 0);
}

#[tokio::test]
async fn test_transaction_sees_its_own_writes() {
    let dir = TempDir::new().unwrap();
    let manager = manager_with_table(&dir).await;
    let db = manager.get("primary").await.unwrap();

    let mut tx = db.begin().await.unwrap();
    tx.query(
        "INSERT INTO entries (id, label) VALUES (:id, :label)",
        &entry(1, "mine"),
    )
    .await
    .unwrap();

    let seen = tx
        .query("SELECT label FROM entries WHERE id = :id", &entry(1, "mine"))
        .await
        .unwrap();
    assert_eq!(seen.row_count, 1);
    assert_eq!(seen.rows[0]["label"], "mine");

    tx.rollback().await.unwrap();
    assert_eq!(count_entries(&manager).await, 0);
}

#[tokio::test]
async fn test_dropped_transaction_rolls_back_and_releases_session() {
    let dir = TempDir::new().unwrap();
    let manager = manager_with_table(&dir).await;
    let db = manager.get("primary").await.unwrap();

    {
        let mut tx = db.begin().await.unwrap();
        tx.query(
            "INSERT INTO entries (id, label) VALUES (:id, :label)",
            &entry(1, "leaked"),
        )
        .await
        .unwrap();
        // neither commit nor rollback: the handle is dropped here
    }

    // the session went back to the pool (SQLite's pool holds a single
    // connection, so this query would hang if it had leaked) and the
    // write was rolled back
    assert_eq!(count_entries(&manager).await, 0);
}

#[tokio::test]
async fn test_statement_failure_inside_transaction() {
    let dir = TempDir::new().unwrap();
    let manager = manager_with_table(&dir).await;
    let db = manager.get("primary").await.unwrap();

    let mut tx = db.begin().await.unwrap();
    tx.query(
        "INSERT INTO entries (id, label) VALUES (:id, :label)",
        &entry(1, "kept"),
    )
    .await
    .unwrap();
    let err = tx
        .query("INSERT INTO nope (x) VALUES (1)", &NamedParams::new())
        .await
        .unwrap_err();
    assert!(matches!(err, multidb::DatabaseError::QueryFailed { .. }));

    // caller decides: commit what succeeded
    tx.commit().await.unwrap();
    assert_eq!(count_entries(&manager).await, 1);
}

#[tokio::test]
async fn test_execute_routine_inside_transaction() {
    let dir = TempDir::new().unwrap();
    let manager = manager_with_table(&dir).await;
    let db = manager.get("primary").await.unwrap();

    let mut tx = db.begin().await.unwrap();
    let result = tx
        .execute("json_each", &[ParamValue::Text("[10, 20]".into())])
        .await
        .unwrap();
    assert_eq!(result.row_count, 2);
    assert_eq!(result.rows[0]["value"], 10);

    let err = tx.execute("json_each; --", &[]).await.unwrap_err();
    assert!(matches!(err, multidb::DatabaseError::QueryFailed { .. }));
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn test_transaction_metadata() {
    let dir = TempDir::new().unwrap();
    let manager = manager_with_table(&dir).await;
    let db = manager.get("primary").await.unwrap();

    let tx = db.begin().await.unwrap();
    assert!(tx.id().starts_with("tx_"));
    assert_eq!(tx.database(), "primary");
    assert_eq!(tx.backend_type(), BackendType::Sqlite);
    tx.rollback().await.unwrap();
}
