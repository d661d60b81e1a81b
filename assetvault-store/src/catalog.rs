//! Metadata catalog: one row per stored object.
//!
//! The service talks to the catalog only through the `Catalog` trait so the
//! persistence engine can be swapped. `SqliteCatalog` is the bundled
//! implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use assetvault_common::{ObjectRecord, Page, ProviderKind, StorageError, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

/// Object count and byte total for one (provider, deleted) bucket of records.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageRow {
    pub provider: ProviderKind,
    pub is_deleted: bool,
    pub files: u64,
    pub size: u64,
}

#[async_trait]
pub trait Catalog: Send + Sync {
    /// Look up a record by key, soft-deleted or not.
    async fn find_by_key(&self, key: &str) -> StorageResult<Option<ObjectRecord>>;

    /// Insert a new record. A duplicate `object_key` is `InvalidState`.
    async fn insert(&self, record: &ObjectRecord) -> StorageResult<()>;

    async fn update_flags(
        &self,
        key: &str,
        is_deleted: bool,
        deleted_at: Option<DateTime<Utc>>,
    ) -> StorageResult<()>;

    async fn update_provider(
        &self,
        key: &str,
        provider: ProviderKind,
        bucket: &str,
        migrated_from: ProviderKind,
        migrated_at: DateTime<Utc>,
    ) -> StorageResult<()>;

    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Soft-deleted records whose `deleted_at` is before `cutoff`.
    async fn list_deleted_older_than(&self, cutoff: DateTime<Utc>) -> StorageResult<Vec<ObjectRecord>>;

    /// Up to `limit` non-deleted records on `provider`, ordered by id, strictly after `after_id`.
    async fn list_by_provider(
        &self,
        provider: ProviderKind,
        after_id: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<ObjectRecord>>;

    /// Soft-deleted records, most recently deleted first.
    async fn list_deleted(&self, page: u32, limit: u32) -> StorageResult<Page<ObjectRecord>>;

    async fn usage(&self) -> StorageResult<Vec<UsageRow>>;
}

// ── SQLite implementation ────────────────────────────────────────────────────

const COLUMNS: &str = "id, provider, bucket, object_key, original_name, mime_type, size, checksum, \
                       is_deleted, deleted_at, migrated_from, migrated_at, created_at, updated_at";

pub struct SqliteCatalog {
    conn: Mutex<Connection>,
}

impl SqliteCatalog {
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").map_err(db_err)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> StorageResult<Self> {
        Self::init(Connection::open_in_memory().map_err(db_err)?)
    }

    fn init(conn: Connection) -> StorageResult<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS storage_objects (
                id              TEXT PRIMARY KEY,
                provider        TEXT NOT NULL,
                bucket          TEXT NOT NULL,
                object_key      TEXT NOT NULL UNIQUE,
                original_name   TEXT NOT NULL,
                mime_type       TEXT NOT NULL,
                size            INTEGER NOT NULL,
                checksum        TEXT NOT NULL,
                is_deleted      INTEGER NOT NULL DEFAULT 0,
                deleted_at      TEXT,
                migrated_from   TEXT,
                migrated_at     TEXT,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_objects_provider ON storage_objects (provider, is_deleted);
            CREATE INDEX IF NOT EXISTS idx_objects_deleted ON storage_objects (is_deleted, deleted_at);
            ",
        )
        .map_err(db_err)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn query_records(&self, sql: &str, params: impl rusqlite::Params) -> StorageResult<Vec<ObjectRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let rows = stmt.query_map(params, row_to_record).map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }
}

fn db_err(e: rusqlite::Error) -> StorageError {
    StorageError::Catalog(e.to_string())
}

fn not_found(key: &str) -> StorageError {
    StorageError::NotFound(format!("no catalog record for '{}'", key))
}

/// Fixed-width UTC timestamps so string comparison in SQL is chronological.
fn ts(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_err(idx: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn parse_ts(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn parse_opt_ts(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| {
        DateTime::parse_from_rfc3339(&r)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| conversion_err(idx, e))
    })
    .transpose()
}

fn parse_provider(row: &Row, idx: usize) -> rusqlite::Result<ProviderKind> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_err(idx, e))
}

fn row_to_record(row: &Row) -> rusqlite::Result<ObjectRecord> {
    let migrated_from: Option<String> = row.get(10)?;
    let migrated_from = match migrated_from {
        Some(raw) => Some(raw.parse::<ProviderKind>().map_err(|e| conversion_err(10, e))?),
        None => None,
    };
    Ok(ObjectRecord {
        id: row.get(0)?,
        provider: parse_provider(row, 1)?,
        bucket: row.get(2)?,
        object_key: row.get(3)?,
        original_name: row.get(4)?,
        mime_type: row.get(5)?,
        size: row.get::<_, i64>(6)? as u64,
        checksum: row.get(7)?,
        is_deleted: row.get(8)?,
        deleted_at: parse_opt_ts(row, 9)?,
        migrated_from,
        migrated_at: parse_opt_ts(row, 11)?,
        created_at: parse_ts(row, 12)?,
        updated_at: parse_ts(row, 13)?,
    })
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn find_by_key(&self, key: &str) -> StorageResult<Option<ObjectRecord>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {} FROM storage_objects WHERE object_key = ?1", COLUMNS),
            params![key],
            row_to_record,
        )
        .optional()
        .map_err(db_err)
    }

    async fn insert(&self, record: &ObjectRecord) -> StorageResult<()> {
        let conn = self.conn();
        let result = conn.execute(
            &format!(
                "INSERT INTO storage_objects ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                COLUMNS
            ),
            params![
                record.id,
                record.provider.as_str(),
                record.bucket,
                record.object_key,
                record.original_name,
                record.mime_type,
                record.size as i64,
                record.checksum,
                record.is_deleted,
                record.deleted_at.as_ref().map(ts),
                record.migrated_from.map(|p| p.as_str()),
                record.migrated_at.as_ref().map(ts),
                ts(&record.created_at),
                ts(&record.updated_at),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => Err(
                StorageError::InvalidState(format!("object key '{}' already catalogued", record.object_key)),
            ),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn update_flags(
        &self,
        key: &str,
        is_deleted: bool,
        deleted_at: Option<DateTime<Utc>>,
    ) -> StorageResult<()> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE storage_objects SET is_deleted = ?1, deleted_at = ?2, updated_at = ?3
                 WHERE object_key = ?4",
                params![is_deleted, deleted_at.as_ref().map(ts), ts(&Utc::now()), key],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(not_found(key));
        }
        Ok(())
    }

    async fn update_provider(
        &self,
        key: &str,
        provider: ProviderKind,
        bucket: &str,
        migrated_from: ProviderKind,
        migrated_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE storage_objects
                 SET provider = ?1, bucket = ?2, migrated_from = ?3, migrated_at = ?4, updated_at = ?5
                 WHERE object_key = ?6",
                params![
                    provider.as_str(),
                    bucket,
                    migrated_from.as_str(),
                    ts(&migrated_at),
                    ts(&Utc::now()),
                    key
                ],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(not_found(key));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let conn = self.conn();
        let changed = conn
            .execute("DELETE FROM storage_objects WHERE object_key = ?1", params![key])
            .map_err(db_err)?;
        if changed == 0 {
            return Err(not_found(key));
        }
        Ok(())
    }

    async fn list_deleted_older_than(&self, cutoff: DateTime<Utc>) -> StorageResult<Vec<ObjectRecord>> {
        let records = self.query_records(
            &format!(
                "SELECT {} FROM storage_objects
                 WHERE is_deleted = 1 AND deleted_at IS NOT NULL AND deleted_at < ?1
                 ORDER BY deleted_at",
                COLUMNS
            ),
            params![ts(&cutoff)],
        )?;
        Ok(records)
    }

    async fn list_by_provider(
        &self,
        provider: ProviderKind,
        after_id: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<ObjectRecord>> {
        self.query_records(
            &format!(
                "SELECT {} FROM storage_objects
                 WHERE provider = ?1 AND is_deleted = 0 AND id > ?2
                 ORDER BY id LIMIT ?3",
                COLUMNS
            ),
            params![provider.as_str(), after_id.unwrap_or(""), limit as i64],
        )
    }

    async fn list_deleted(&self, page: u32, limit: u32) -> StorageResult<Page<ObjectRecord>> {
        let (page, limit) = Page::<ObjectRecord>::normalize(page, limit);
        let offset = Page::<ObjectRecord>::offset(page, limit);

        let total: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM storage_objects WHERE is_deleted = 1", [], |row| row.get(0))
            .map_err(db_err)?;

        let items = self.query_records(
            &format!(
                "SELECT {} FROM storage_objects WHERE is_deleted = 1
                 ORDER BY deleted_at DESC, id LIMIT ?1 OFFSET ?2",
                COLUMNS
            ),
            params![limit as i64, offset as i64],
        )?;

        Ok(Page {
            items,
            total: total as u64,
            page,
            limit,
        })
    }

    async fn usage(&self) -> StorageResult<Vec<UsageRow>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT provider, is_deleted, COUNT(*), COALESCE(SUM(size), 0)
                 FROM storage_objects GROUP BY provider, is_deleted",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(UsageRow {
                    provider: parse_provider(row, 0)?,
                    is_deleted: row.get(1)?,
                    files: row.get::<_, i64>(2)? as u64,
                    size: row.get::<_, i64>(3)? as u64,
                })
            })
            .map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }
}
