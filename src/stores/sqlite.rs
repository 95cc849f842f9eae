//! SQLite-backed relational store.
//!
//! rusqlite is synchronous, so every call hops onto the blocking pool.
//! The connection is shared behind a mutex; the engines only read.

use crate::stores::SqlStore;
use crate::types::{AssistantError, Result};
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Embedded relational store.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

/// Strip characters that would break out of a quoted identifier.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', ""))
}

fn row_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::from(n),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(_) => Value::Null,
    }
}

fn run_select(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> rusqlite::Result<Vec<Value>> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

    let mut rows = stmt.query(params)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut obj = serde_json::Map::new();
        for (i, col) in columns.iter().enumerate() {
            obj.insert(col.clone(), row_value(row.get_ref(i)?));
        }
        out.push(Value::Object(obj));
    }
    Ok(out)
}

impl SqliteStore {
    /// Open (or create) a database file, `~` expanded.
    pub fn open(path: &str) -> Result<Self> {
        let expanded = shellexpand::tilde(path).into_owned();
        let conn = Connection::open(&expanded)
            .map_err(|e| AssistantError::SqlError(format!("failed to open {expanded}: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database (tests and local experiments).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AssistantError::SqlError(format!("failed to open memory db: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Execute arbitrary DDL/DML (fixtures and local setup only; the
    /// query path never goes through here).
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| AssistantError::SqlError("connection lock poisoned".to_string()))?;
        conn.execute_batch(sql)
            .map_err(|e| AssistantError::SqlError(format!("execute failed: {e}")))
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| AssistantError::SqlError("connection lock poisoned".to_string()))?;
            f(&guard).map_err(|e| AssistantError::SqlError(e.to_string()))
        })
        .await
        .map_err(|e| AssistantError::SqlError(format!("blocking task failed: {e}")))?
    }
}

#[async_trait]
impl SqlStore for SqliteStore {
    async fn query(&self, sql: &str) -> Result<Vec<Value>> {
        let sql = sql.to_string();
        self.with_conn(move |conn| run_select(conn, &sql, &[])).await
    }

    async fn fetch_records(&self, table: &str, ids: &[String]) -> Result<Vec<Value>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT * FROM {} WHERE name IN ({placeholders})",
            quote_ident(table)
        );
        let ids = ids.to_vec();
        self.with_conn(move |conn| {
            let params: Vec<&dyn rusqlite::ToSql> =
                ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
            run_select(conn, &sql, &params)
        })
        .await
    }

    async fn fetch_page(&self, table: &str, offset: u64, limit: u64) -> Result<Vec<Value>> {
        let sql = format!(
            "SELECT * FROM {} ORDER BY name LIMIT {limit} OFFSET {offset}",
            quote_ident(table)
        );
        self.with_conn(move |conn| run_select(conn, &sql, &[])).await
    }

    async fn count(&self, table: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) AS c FROM {}", quote_ident(table));
        self.with_conn(move |conn| {
            conn.query_row(&sql, [], |row| row.get::<_, i64>(0))
                .map(|c| c as u64)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fixture() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .execute_batch(
                r#"
                CREATE TABLE "tabCourse Video" (
                    name TEXT PRIMARY KEY,
                    video_name TEXT,
                    difficulty_tier TEXT,
                    link TEXT
                );
                INSERT INTO "tabCourse Video" VALUES
                    ('CV-001', 'Needs First, Wants Later', 'Basic', 'https://v/1'),
                    ('CV-002', 'Budgeting Deep Dive', 'Advanced', 'https://v/2'),
                    ('CV-003', 'Saving Small', 'Basic', NULL);
                "#,
            )
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_query_returns_json_rows() {
        let store = fixture().await;
        let rows = store
            .query("SELECT video_name FROM \"tabCourse Video\" WHERE difficulty_tier = 'Basic' ORDER BY name")
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["video_name"], "Needs First, Wants Later");
    }

    #[tokio::test]
    async fn test_fetch_records_by_ids() {
        let store = fixture().await;
        let rows = store
            .fetch_records("tabCourse Video", &["CV-002".to_string(), "CV-404".to_string()])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "CV-002");
    }

    #[tokio::test]
    async fn test_count_and_paging() {
        let store = fixture().await;
        assert_eq!(store.count("tabCourse Video").await.unwrap(), 3);
        let page = store.fetch_page("tabCourse Video", 1, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0]["name"], "CV-002");
    }

    #[tokio::test]
    async fn test_null_maps_to_json_null() {
        let store = fixture().await;
        let rows = store
            .fetch_records("tabCourse Video", &["CV-003".to_string()])
            .await
            .unwrap();
        assert!(rows[0]["link"].is_null());
    }
}
