//! Durable path → record index backed by SQLite

use crate::error::Result;
use crate::types::{CacheRecord, ContentMetadata, IndexSummary};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::{QueryBuilder, Sqlite};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Bound parameters per `IN (...)` lookup, below SQLite's variable limit
const LOOKUP_CHUNK: usize = 500;

const SELECT_COLUMNS: &str = "path, checksum, size, modified_time, cached_time, compressed, \
     access_count, last_accessed, content_path, metadata";

pub struct MetadataIndex {
    pool: SqlitePool,
    /// Serializes every mutation
    write_lock: Mutex<()>,
}

#[derive(sqlx::FromRow)]
struct EntryRow {
    path: String,
    checksum: String,
    size: i64,
    modified_time: f64,
    cached_time: f64,
    compressed: bool,
    access_count: i64,
    last_accessed: f64,
    content_path: String,
    metadata: Json<ContentMetadata>,
}

impl From<EntryRow> for CacheRecord {
    fn from(row: EntryRow) -> Self {
        CacheRecord {
            path: row.path,
            checksum: row.checksum,
            size: row.size.max(0) as u64,
            source_modified: from_unix(row.modified_time),
            cached_at: from_unix(row.cached_time),
            compressed: row.compressed,
            access_count: row.access_count,
            last_accessed: from_unix(row.last_accessed),
            content_location: row.content_path,
            metadata: row.metadata.0,
        }
    }
}

pub(crate) fn to_unix(time: DateTime<Utc>) -> f64 {
    time.timestamp_micros() as f64 / 1_000_000.0
}

pub(crate) fn from_unix(secs: f64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros((secs * 1_000_000.0).round() as i64)
        .unwrap_or(DateTime::UNIX_EPOCH)
}

impl MetadataIndex {
    /// Open (creating if needed) the index at `db_path` and apply migrations
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        info!(path = %db_path.display(), "Running index migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self {
            pool,
            write_lock: Mutex::new(()),
        })
    }

    pub async fn get(&self, path: &str) -> Result<Option<CacheRecord>> {
        let row: Option<EntryRow> = sqlx::query_as(&format!(
            "SELECT {} FROM cache_entries WHERE path = ?",
            SELECT_COLUMNS
        ))
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(CacheRecord::from))
    }

    /// Records for every path in `paths` that has one, keyed by path
    pub async fn get_many(&self, paths: &[String]) -> Result<HashMap<String, CacheRecord>> {
        let mut found = HashMap::with_capacity(paths.len());
        for chunk in paths.chunks(LOOKUP_CHUNK) {
            let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
                "SELECT {} FROM cache_entries WHERE path IN (",
                SELECT_COLUMNS
            ));
            let mut separated = query.separated(", ");
            for path in chunk {
                separated.push_bind(path.as_str());
            }
            separated.push_unseparated(")");

            let rows: Vec<EntryRow> = query.build_query_as().fetch_all(&self.pool).await?;
            for row in rows {
                let record = CacheRecord::from(row);
                found.insert(record.path.clone(), record);
            }
        }
        Ok(found)
    }

    pub async fn upsert(&self, record: &CacheRecord) -> Result<()> {
        self.upsert_many(std::slice::from_ref(record)).await
    }

    /// Insert or replace every record in a single transaction
    pub async fn upsert_many(&self, records: &[CacheRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO cache_entries
                    (path, checksum, size, modified_time, cached_time, compressed,
                     access_count, last_accessed, content_path, metadata)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record.path)
            .bind(&record.checksum)
            .bind(record.size as i64)
            .bind(to_unix(record.source_modified))
            .bind(to_unix(record.cached_at))
            .bind(record.compressed)
            .bind(record.access_count)
            .bind(to_unix(record.last_accessed))
            .bind(&record.content_location)
            .bind(Json(&record.metadata))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(count = records.len(), "Upserted index records");
        Ok(())
    }

    /// Delete records cached before `cutoff` (all records when `None`), returning them
    pub async fn delete_older_than(
        &self,
        cutoff: Option<DateTime<Utc>>,
    ) -> Result<Vec<CacheRecord>> {
        let cutoff = cutoff.map(to_unix);
        let filter = if cutoff.is_some() {
            "WHERE cached_time < ?"
        } else {
            ""
        };
        let select_sql = format!("SELECT {} FROM cache_entries {}", SELECT_COLUMNS, filter);
        let delete_sql = format!("DELETE FROM cache_entries {}", filter);

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let mut select = sqlx::query_as::<_, EntryRow>(&select_sql);
        let mut delete = sqlx::query(&delete_sql);
        if let Some(cutoff) = cutoff {
            select = select.bind(cutoff);
            delete = delete.bind(cutoff);
        }
        let rows = select.fetch_all(&mut *tx).await?;
        delete.execute(&mut *tx).await?;
        tx.commit().await?;

        Ok(rows.into_iter().map(CacheRecord::from).collect())
    }

    /// Delete one record, returning it if it existed
    pub async fn delete_by_path(&self, path: &str) -> Result<Option<CacheRecord>> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let row: Option<EntryRow> = sqlx::query_as(&format!(
            "SELECT {} FROM cache_entries WHERE path = ?",
            SELECT_COLUMNS
        ))
        .bind(path)
        .fetch_optional(&mut *tx)
        .await?;
        if row.is_some() {
            sqlx::query("DELETE FROM cache_entries WHERE path = ?")
                .bind(path)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(row.map(CacheRecord::from))
    }

    pub async fn scan_all(&self) -> Result<Vec<CacheRecord>> {
        let rows: Vec<EntryRow> = sqlx::query_as(&format!(
            "SELECT {} FROM cache_entries ORDER BY path",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(CacheRecord::from).collect())
    }

    /// Record an access; returns the updated access count
    pub async fn touch(&self, path: &str) -> Result<Option<i64>> {
        let _guard = self.write_lock.lock().await;
        let count: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE cache_entries
            SET access_count = access_count + 1, last_accessed = ?
            WHERE path = ?
            RETURNING access_count
            "#,
        )
        .bind(to_unix(Utc::now()))
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(count)
    }

    /// Number of records referencing `checksum`
    pub async fn count_by_checksum(&self, checksum: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM cache_entries WHERE checksum = ?")
                .bind(checksum)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    pub async fn summary(&self) -> Result<IndexSummary> {
        let (records, total_size, oldest, newest): (i64, Option<i64>, Option<f64>, Option<f64>) =
            sqlx::query_as(
                "SELECT COUNT(*), SUM(size), MIN(cached_time), MAX(cached_time) FROM cache_entries",
            )
            .fetch_one(&self.pool)
            .await?;

        Ok(IndexSummary {
            records: records.max(0) as u64,
            total_size: total_size.unwrap_or(0).max(0) as u64,
            oldest: oldest.map(from_unix),
            newest: newest.map(from_unix),
        })
    }

    /// Cheap liveness query for health checks
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
