//! SQLite-backed job and key-value stores.
//!
//! The engine is synchronous, so each store drives sqlx through a private
//! tokio runtime with `block_on`. Callers must not invoke these stores from
//! inside another tokio runtime.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tokio::runtime::Runtime;
use tracing::{debug, warn};

use courier_core::JobId;

use crate::kv::KeyValueStore;
use crate::store::{JobStore, StoreError};
use crate::types::JobRecord;

fn storage(err: sqlx::Error) -> StoreError {
    StoreError::Storage(err.to_string())
}

/// Shared connection pool and runtime for the SQLite stores.
#[derive(Debug, Clone)]
pub struct SqliteDatabase {
    pool: SqlitePool,
    runtime: Arc<Runtime>,
}

impl SqliteDatabase {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create database directory at {parent:?}"))?;
            }
        }
        Self::connect(&format!("sqlite://{}", path.to_string_lossy()))
    }

    /// Private in-memory database; contents vanish with the last handle.
    pub fn in_memory() -> anyhow::Result<Self> {
        Self::connect("sqlite::memory:")
    }

    fn connect(url: &str) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("courier-sqlite")
            .enable_all()
            .build()
            .context("failed to build sqlite runtime")?;

        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("invalid sqlite url {url}"))?
            .create_if_missing(true);

        // One connection keeps in-memory databases alive and serializes writers.
        let pool = runtime
            .block_on(
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .min_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect_with(options),
            )
            .with_context(|| format!("failed to create SQLite pool at {url}"))?;

        runtime
            .block_on(async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS jobs (
                        id        TEXT PRIMARY KEY,
                        sequence  INTEGER NOT NULL,
                        kind      TEXT NOT NULL,
                        record    TEXT NOT NULL
                    )
                    "#,
                )
                .execute(&pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS kv (
                        key    TEXT PRIMARY KEY,
                        value  TEXT NOT NULL
                    )
                    "#,
                )
                .execute(&pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .context("failed to create courier tables")?;

        debug!(url, "sqlite database ready");

        Ok(Self {
            pool,
            runtime: Arc::new(runtime),
        })
    }

    pub fn job_store(&self) -> SqliteJobStore {
        SqliteJobStore { db: self.clone() }
    }

    pub fn kv_store(&self) -> SqliteKeyValueStore {
        SqliteKeyValueStore { db: self.clone() }
    }
}

#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    db: SqliteDatabase,
}

impl JobStore for SqliteJobStore {
    fn insert(&self, record: &JobRecord) -> Result<(), StoreError> {
        let body = serde_json::to_string(record)?;
        let pool = &self.db.pool;
        let result = self.db.runtime.block_on(async {
            sqlx::query("INSERT INTO jobs (id, sequence, kind, record) VALUES (?1, ?2, ?3, ?4)")
                .bind(record.id.to_string())
                .bind(record.sequence as i64)
                .bind(&record.kind)
                .bind(body)
                .execute(pool)
                .await
        });

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::AlreadyExists(record.id))
            }
            Err(err) => Err(storage(err)),
        }
    }

    fn update(&self, record: &JobRecord) -> Result<(), StoreError> {
        let body = serde_json::to_string(record)?;
        let pool = &self.db.pool;
        let result = self
            .db
            .runtime
            .block_on(async {
                sqlx::query("UPDATE jobs SET record = ?2 WHERE id = ?1")
                    .bind(record.id.to_string())
                    .bind(body)
                    .execute(pool)
                    .await
            })
            .map_err(storage)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(record.id));
        }
        Ok(())
    }

    fn remove(&self, id: JobId) -> Result<(), StoreError> {
        let pool = &self.db.pool;
        self.db
            .runtime
            .block_on(async {
                sqlx::query("DELETE FROM jobs WHERE id = ?1")
                    .bind(id.to_string())
                    .execute(pool)
                    .await
            })
            .map_err(storage)?;
        Ok(())
    }

    fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        let pool = &self.db.pool;
        let row = self
            .db
            .runtime
            .block_on(async {
                sqlx::query("SELECT record FROM jobs WHERE id = ?1")
                    .bind(id.to_string())
                    .fetch_optional(pool)
                    .await
            })
            .map_err(storage)?;

        match row {
            Some(row) => {
                let body: String = row.try_get("record").map_err(storage)?;
                Ok(Some(serde_json::from_str(&body)?))
            }
            None => Ok(None),
        }
    }

    /// Rows that no longer decode are logged and deleted; the rest load.
    fn load_all(&self) -> Result<Vec<JobRecord>, StoreError> {
        let pool = &self.db.pool;
        let rows = self
            .db
            .runtime
            .block_on(async {
                sqlx::query("SELECT id, kind, record FROM jobs ORDER BY sequence ASC")
                    .fetch_all(pool)
                    .await
            })
            .map_err(storage)?;

        let mut records = Vec::with_capacity(rows.len());
        let mut corrupt = Vec::new();
        for row in &rows {
            let id: String = row.try_get("id").map_err(storage)?;
            let body: String = row.try_get("record").map_err(storage)?;
            match serde_json::from_str::<JobRecord>(&body) {
                Ok(record) => records.push(record),
                Err(err) => {
                    let kind: String = row.try_get("kind").unwrap_or_default();
                    warn!(job_id = %id, kind = %kind, error = %err, "dropping undecodable job record");
                    corrupt.push(id);
                }
            }
        }

        if !corrupt.is_empty() {
            self.db
                .runtime
                .block_on(async {
                    for id in &corrupt {
                        sqlx::query("DELETE FROM jobs WHERE id = ?1")
                            .bind(id)
                            .execute(pool)
                            .await?;
                    }
                    Ok::<_, sqlx::Error>(())
                })
                .map_err(storage)?;
        }
        Ok(records)
    }
}

#[derive(Debug, Clone)]
pub struct SqliteKeyValueStore {
    db: SqliteDatabase,
}

impl SqliteKeyValueStore {
    async fn read(conn: &mut sqlx::SqliteConnection, key: &str) -> Result<Option<Value>, StoreError> {
        let row = sqlx::query("SELECT value FROM kv WHERE key = ?1")
            .bind(key)
            .fetch_optional(&mut *conn)
            .await
            .map_err(storage)?;

        match row {
            Some(row) => {
                let body: String = row.try_get("value").map_err(storage)?;
                Ok(Some(serde_json::from_str(&body)?))
            }
            None => Ok(None),
        }
    }

    async fn write(conn: &mut sqlx::SqliteConnection, key: &str, value: Option<&Value>) -> Result<(), StoreError> {
        match value {
            Some(value) => {
                sqlx::query(
                    "INSERT INTO kv (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                )
                .bind(key)
                .bind(serde_json::to_string(value)?)
                .execute(&mut *conn)
                .await
                .map_err(storage)?;
            }
            None => {
                sqlx::query("DELETE FROM kv WHERE key = ?1")
                    .bind(key)
                    .execute(&mut *conn)
                    .await
                    .map_err(storage)?;
            }
        }
        Ok(())
    }
}

impl KeyValueStore for SqliteKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.db.runtime.block_on(async {
            let mut conn = self.db.pool.acquire().await.map_err(storage)?;
            Self::read(&mut conn, key).await
        })
    }

    fn put(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.db.runtime.block_on(async {
            let mut conn = self.db.pool.acquire().await.map_err(storage)?;
            Self::write(&mut conn, key, Some(&value)).await
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.db.runtime.block_on(async {
            let mut conn = self.db.pool.acquire().await.map_err(storage)?;
            Self::write(&mut conn, key, None).await
        })
    }

    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<Value>) -> Option<Value>,
    ) -> Result<Option<Value>, StoreError> {
        self.db.runtime.block_on(async {
            let mut tx = self.db.pool.begin().await.map_err(storage)?;
            let current = Self::read(&mut tx, key).await?;
            let next = f(current);
            Self::write(&mut tx, key, next.as_ref()).await?;
            tx.commit().await.map_err(storage)?;
            Ok(next)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::KeyValueStoreExt;
    use crate::types::{JobParameters, JobStatus};

    #[test]
    fn records_survive_reopening_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");

        let mut first = JobRecord::new("a", JobParameters::default(), serde_json::json!({"n": 1}));
        first.sequence = 2;
        let mut second = JobRecord::new("b", JobParameters::default(), serde_json::json!({"n": 2}));
        second.sequence = 1;

        {
            let store = SqliteDatabase::open(&path).unwrap().job_store();
            store.insert(&first).unwrap();
            store.insert(&second).unwrap();
            first.status = JobStatus::RetryScheduled;
            first.attempt = 3;
            store.update(&first).unwrap();
        }

        let store = SqliteDatabase::open(&path).unwrap().job_store();
        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, second.id);
        assert_eq!(loaded[1].id, first.id);
        assert_eq!(loaded[1].attempt, 3);
        assert_eq!(loaded[1].status, JobStatus::RetryScheduled);
        assert_eq!(loaded[1].payload, serde_json::json!({"n": 1}));
    }

    #[test]
    fn duplicate_insert_and_missing_update_are_reported() {
        let store = SqliteDatabase::in_memory().unwrap().job_store();
        let record = JobRecord::new("a", JobParameters::default(), Value::Null);

        assert!(matches!(store.update(&record), Err(StoreError::NotFound(_))));
        store.insert(&record).unwrap();
        assert!(matches!(store.insert(&record), Err(StoreError::AlreadyExists(_))));

        store.remove(record.id).unwrap();
        assert!(store.get(record.id).unwrap().is_none());
    }

    #[test]
    fn undecodable_rows_are_dropped_and_the_rest_load() {
        let db = SqliteDatabase::in_memory().unwrap();
        let store = db.job_store();
        let mut good = JobRecord::new("good", JobParameters::default(), Value::Null);
        good.sequence = 2;
        store.insert(&good).unwrap();
        db.runtime
            .block_on(async {
                sqlx::query("INSERT INTO jobs (id, sequence, kind, record) VALUES ('broken', 1, 'bad', '{not json')")
                    .execute(&db.pool)
                    .await
            })
            .unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, good.id);

        let left: i64 = db
            .runtime
            .block_on(async {
                sqlx::query_scalar("SELECT COUNT(*) FROM jobs").fetch_one(&db.pool).await
            })
            .unwrap();
        assert_eq!(left, 1);
    }

    #[test]
    fn kv_counter_and_flags() {
        let kv = SqliteDatabase::in_memory().unwrap().kv_store();

        assert_eq!(kv.increment("failures", 1).unwrap(), 1);
        assert_eq!(kv.increment("failures", 2).unwrap(), 3);
        kv.put_as("needs_pull", &true).unwrap();
        assert!(kv.get_bool("needs_pull").unwrap());

        kv.remove("needs_pull").unwrap();
        assert!(!kv.get_bool("needs_pull").unwrap());
    }
}
