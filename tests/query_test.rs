//! Integration tests for query execution, parameter binding, routine
//! invocation and result normalization over SQLite.

use multidb::{BackendType, DatabaseConfig, DatabaseError, DatabaseManager, NamedParams, ParamValue};
use tempfile::TempDir;

async fn manager_with(name: &str, dir: &TempDir) -> DatabaseManager {
    let path = dir.path().join(format!("{}.db", name));
    let manager = DatabaseManager::new();
    manager
        .register(DatabaseConfig::new(name, BackendType::Sqlite, path.to_str().unwrap()).unwrap())
        .await;
    manager
}

fn params(list: &[(&str, ParamValue)]) -> NamedParams {
    list.iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[tokio::test]
async fn test_select_one_roundtrip() {
    let dir = TempDir::new().unwrap();
    let manager = manager_with("primary", &dir).await;

    let db = manager.get("primary").await.unwrap();
    let result = db.query("SELECT 1 as test", &NamedParams::new()).await.unwrap();

    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.row_count, 1);
    assert_eq!(result.rows[0]["test"], 1);
}

#[tokio::test]
async fn test_query_reports_field_metadata() {
    let dir = TempDir::new().unwrap();
    let manager = manager_with("primary", &dir).await;
    let db = manager.get("primary").await.unwrap();

    let result = db
        .query("SELECT 1 as id, 'x' as label", &NamedParams::new())
        .await
        .unwrap();
    let fields = result.fields.unwrap();
    let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["id", "label"]);
}

#[tokio::test]
async fn test_empty_rowset_is_empty_not_absent() {
    let dir = TempDir::new().unwrap();
    let manager = manager_with("primary", &dir).await;
    let db = manager.get("primary").await.unwrap();

    let result = db
        .query("SELECT 1 as n WHERE 1 = 0", &NamedParams::new())
        .await
        .unwrap();
    assert!(result.rows.is_empty());
    assert_eq!(result.row_count, 0);
}

#[tokio::test]
async fn test_writes_report_affected_count() {
    let dir = TempDir::new().unwrap();
    let manager = manager_with("primary", &dir).await;
    let db = manager.get("primary").await.unwrap();

    db.query(
        "CREATE TABLE clients (id INTEGER PRIMARY KEY, name TEXT)",
        &NamedParams::new(),
    )
    .await
    .unwrap();

    let insert = db
        .query(
            "INSERT INTO clients (id, name) VALUES (:id, :name)",
            &params(&[("id", 1.into()), ("name", "Acme".into())]),
        )
        .await
        .unwrap();
    assert!(insert.rows.is_empty());
    assert_eq!(insert.row_count, 1);

    let update = db
        .query(
            "UPDATE clients SET name = :name WHERE id = :id",
            &params(&[("id", 1.into()), ("name", "Acme Ltd".into())]),
        )
        .await
        .unwrap();
    assert_eq!(update.row_count, 1);

    let missing = db
        .query(
            "DELETE FROM clients WHERE id = :id",
            &params(&[("id", 999.into())]),
        )
        .await
        .unwrap();
    assert_eq!(missing.row_count, 0);
}

#[tokio::test]
async fn test_named_params_bind_by_name_not_position() {
    let dir = TempDir::new().unwrap();
    let manager = manager_with("primary", &dir).await;
    let db = manager.get("primary").await.unwrap();

    db.query(
        "CREATE TABLE calls (id INTEGER PRIMARY KEY, caller TEXT, callee TEXT)",
        &NamedParams::new(),
    )
    .await
    .unwrap();
    db.query(
        "INSERT INTO calls (id, caller, callee) VALUES (:id, :caller, :callee)",
        &params(&[
            ("callee", "bob".into()),
            ("id", 10.into()),
            ("caller", "alice".into()),
        ]),
    )
    .await
    .unwrap();

    // same name used twice in one template
    let result = db
        .query(
            "SELECT * FROM calls WHERE caller = :who OR callee = :who",
            &params(&[("who", "bob".into())]),
        )
        .await
        .unwrap();
    assert_eq!(result.row_count, 1);
    assert_eq!(result.rows[0]["caller"], "alice");
    assert_eq!(result.rows[0]["callee"], "bob");
}

#[tokio::test]
async fn test_prefix_parameter_names_do_not_collide() {
    let dir = TempDir::new().unwrap();
    let manager = manager_with("primary", &dir).await;
    let db = manager.get("primary").await.unwrap();

    let result = db
        .query(
            "SELECT :id as short, :identifier as long",
            &params(&[("id", 1.into()), ("identifier", "long-value".into())]),
        )
        .await
        .unwrap();
    assert_eq!(result.rows[0]["short"], 1);
    assert_eq!(result.rows[0]["long"], "long-value");
}

#[tokio::test]
async fn test_datetime_columns_decode_as_strings() {
    let dir = TempDir::new().unwrap();
    let manager = manager_with("primary", &dir).await;
    let db = manager.get("primary").await.unwrap();

    db.query(
        "CREATE TABLE call_logs (id INTEGER PRIMARY KEY, started_at DATETIME)",
        &NamedParams::new(),
    )
    .await
    .unwrap();
    db.query(
        "INSERT INTO call_logs (id, started_at) VALUES (:id, :at)",
        &params(&[("id", 1.into()), ("at", "2024-03-07 09:15:00".into())]),
    )
    .await
    .unwrap();

    let result = db
        .query("SELECT started_at FROM call_logs", &NamedParams::new())
        .await
        .unwrap();
    assert_eq!(result.rows[0]["started_at"], "2024-03-07 09:15:00");
}

#[tokio::test]
async fn test_failed_query_leaves_connection_usable() {
    let dir = TempDir::new().unwrap();
    let manager = manager_with("primary", &dir).await;
    let db = manager.get("primary").await.unwrap();

    let err = db
        .query("SELECT * FROM no_such_table", &NamedParams::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::QueryFailed { .. }));
    assert_eq!(err.database(), "primary");
    assert_eq!(err.backend(), Some(BackendType::Sqlite));

    // pool survives the failure
    assert!(manager.is_connected("primary").await);
    let result = db.query("SELECT 2 as two", &NamedParams::new()).await.unwrap();
    assert_eq!(result.rows[0]["two"], 2);
}

#[tokio::test]
async fn test_execute_table_valued_function() {
    let dir = TempDir::new().unwrap();
    let manager = manager_with("primary", &dir).await;
    let db = manager.get("primary").await.unwrap();

    let result = db
        .execute("json_each", &[ParamValue::Text("[\"a\",\"b\",\"c\"]".into())])
        .await
        .unwrap();
    assert_eq!(result.row_count, 3);
    assert_eq!(result.rows[0]["value"], "a");
}

#[tokio::test]
async fn test_execute_rejects_unsafe_routine_names() {
    let dir = TempDir::new().unwrap();
    let manager = manager_with("primary", &dir).await;
    let db = manager.get("primary").await.unwrap();

    let err = db
        .execute("json_each(1); DROP TABLE x", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::QueryFailed { .. }));
}

#[tokio::test]
async fn test_typed_row_decoding() {
    #[derive(serde::Deserialize)]
    struct Client {
        id: i64,
        name: String,
    }

    let dir = TempDir::new().unwrap();
    let manager = manager_with("primary", &dir).await;
    let db = manager.get("primary").await.unwrap();

    db.query(
        "CREATE TABLE clients (id INTEGER PRIMARY KEY, name TEXT)",
        &NamedParams::new(),
    )
    .await
    .unwrap();
    db.query(
        "INSERT INTO clients (id, name) VALUES (:id, :name)",
        &params(&[("id", 5.into()), ("name", "Initech".into())]),
    )
    .await
    .unwrap();

    let result = db
        .query("SELECT id, name FROM clients", &NamedParams::new())
        .await
        .unwrap();
    let clients: Vec<Client> = result.rows_as().unwrap();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].id, 5);
    assert_eq!(clients[0].name, "Initech");
}

#[tokio::test]
async fn test_query_connects_when_not_yet_connected() {
    let dir = TempDir::new().unwrap();
    let manager = manager_with("primary", &dir).await;

    let db = manager.get("primary").await.unwrap();
    manager.disconnect("primary").await;

    // the held handle reconnects its own pool on demand
    let result = db.query("SELECT 7 as n", &NamedParams::new()).await.unwrap();
    assert_eq!(result.rows[0]["n"], 7);
}
