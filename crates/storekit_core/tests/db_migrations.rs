use rusqlite::Connection;
use storekit_core::db::migrations::{apply_migrations, latest_version};
use storekit_core::db::{open_db, open_db_in_memory, DbError};

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "records");
    assert_table_exists(&conn, "entity_versions");
    assert_table_exists(&conn, "store_metadata");
}

#[test]
fn opening_same_store_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Inventory.sqlite");

    let conn_first = open_db(&path).unwrap();
    conn_first
        .execute(
            "INSERT INTO records (object_id, entity, payload) VALUES ('id-1', 'Widget', '{}');",
            [],
        )
        .unwrap();
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    let rows: i64 = conn_second
        .query_row("SELECT COUNT(*) FROM records;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 1);
}

#[test]
fn opening_store_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.sqlite");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    match open_db(&path).unwrap_err() {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn apply_migrations_reports_applied_steps() {
    let mut conn = Connection::open_in_memory().unwrap();

    assert_eq!(apply_migrations(&mut conn).unwrap(), 2);
    assert_eq!(apply_migrations(&mut conn).unwrap(), 0);
    assert_eq!(schema_version(&conn), latest_version());
}

#[test]
fn failed_migration_names_the_step_and_applies_nothing() {
    let mut conn = Connection::open_in_memory().unwrap();
    conn.execute_batch("CREATE TABLE store_metadata (key TEXT);")
        .unwrap();

    match apply_migrations(&mut conn).unwrap_err() {
        DbError::Migration { version, name, .. } => {
            assert_eq!(version, 2);
            assert_eq!(name, "store_metadata");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(schema_version(&conn), 0);
    let records_exists: i64 = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE name = 'records');",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(records_exists, 0);
}

#[test]
fn records_table_rejects_invalid_json_payloads() {
    let conn = open_db_in_memory().unwrap();
    let result = conn.execute(
        "INSERT INTO records (object_id, entity, payload) VALUES ('id-1', 'Widget', 'not json');",
        [],
    );
    assert!(result.is_err());
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
