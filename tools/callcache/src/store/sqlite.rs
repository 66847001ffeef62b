use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use serde_json::json;

use crate::errors::CacheError;
use crate::logging::append_run_log;
use crate::store::{parse_counter, resolve_range, KeyValueStore};

type StoreResult<T> = Result<T, CacheError>;

/// File-backed store. Strings and counters share `kv_strings`; lists live in
/// `kv_lists` keyed by `(list_key, position)`.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        append_run_log(
            "info",
            "sqlite_store.open",
            json!({ "path": path.display().to_string() }),
        );
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| CacheError::StoreUnavailable(e.to_string()))?;
            }
        }

        let existed_before_open = path.exists();
        let mut conn = Connection::open(&path).map_err(db_err)?;
        configure_connection(&conn)?;

        if existed_before_open {
            let integrity: String = conn
                .pragma_query_value(None, "quick_check", |row| row.get(0))
                .map_err(db_err)?;
            if integrity != "ok" {
                return Err(CacheError::StoreUnavailable(format!(
                    "store database failed integrity check: {integrity}"
                )));
            }
        }

        run_migrations(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: path,
        })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| {
            CacheError::StoreUnavailable("sqlite connection lock poisoned".to_string())
        })
    }
}

impl KeyValueStore for SqliteStore {
    fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO kv_strings(key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT value FROM kv_strings WHERE key = ?1",
            params![key],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()
        .map_err(db_err)
    }

    fn incr(&self, name: &str) -> StoreResult<i64> {
        let mut conn = self.conn()?;
        let tx = begin_write(&mut conn)?;
        let current = tx
            .query_row(
                "SELECT value FROM kv_strings WHERE key = ?1",
                params![name],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()
            .map_err(db_err)?;
        let current = match current {
            Some(raw) => parse_counter(&raw)?,
            None => 0,
        };
        let next = current
            .checked_add(1)
            .ok_or_else(|| CacheError::Store("increment would overflow".to_string()))?;
        tx.execute(
            "INSERT INTO kv_strings(key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![name, next.to_string().into_bytes()],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(next)
    }

    fn rpush(&self, list: &str, entry: &[u8]) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO kv_lists(list_key, position, entry)
             SELECT ?1, COALESCE(MAX(position) + 1, 0), ?2 FROM kv_lists WHERE list_key = ?1",
            params![list, entry],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn lrange(&self, list: &str, start: i64, end: i64) -> StoreResult<Vec<Vec<u8>>> {
        let conn = self.conn()?;
        let len: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM kv_lists WHERE list_key = ?1",
                params![list],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        let Some((from, to)) = resolve_range(len as usize, start, end) else {
            return Ok(Vec::new());
        };

        let mut stmt = conn
            .prepare(
                "SELECT entry FROM kv_lists WHERE list_key = ?1
                 ORDER BY position LIMIT ?2 OFFSET ?3",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![list, (to - from) as i64, from as i64], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    fn flush_all(&self) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = begin_write(&mut conn)?;
        tx.execute("DELETE FROM kv_strings", []).map_err(db_err)?;
        tx.execute("DELETE FROM kv_lists", []).map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        append_run_log(
            "info",
            "sqlite_store.flushed",
            json!({ "path": self.db_path.display().to_string() }),
        );
        Ok(())
    }
}

fn configure_connection(conn: &Connection) -> StoreResult<()> {
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .map_err(db_err)?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(db_err)?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .map_err(db_err)?;
    Ok(())
}

/// Takes the write lock up front. A deferred transaction that reads before
/// it writes fails with `SQLITE_BUSY` under WAL instead of waiting out the
/// busy timeout.
fn begin_write(conn: &mut Connection) -> StoreResult<rusqlite::Transaction<'_>> {
    conn.transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(db_err)
}

fn run_migrations(conn: &mut Connection) -> StoreResult<()> {
    let migrations = [(1_i64, include_str!("../../migrations/0001_kv.sql"))];

    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_migrations (version INTEGER PRIMARY KEY, applied_at INTEGER NOT NULL);")
        .map_err(db_err)?;

    for (version, sql) in migrations {
        let tx = begin_write(conn)?;
        let exists = tx
            .query_row(
                "SELECT 1 FROM schema_migrations WHERE version = ?1 LIMIT 1",
                [version],
                |_| Ok(()),
            )
            .optional()
            .map_err(db_err)?
            .is_some();

        if exists {
            continue;
        }

        tx.execute_batch(sql).map_err(db_err)?;
        tx.execute(
            "INSERT INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
            params![version, system_time_unix()],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        append_run_log(
            "info",
            "sqlite_store.migration.applied",
            json!({ "version": version }),
        );
    }

    Ok(())
}

/// Failures that mean the database cannot be reached become
/// `StoreUnavailable`; anything else is a rejected command.
fn db_err(error: rusqlite::Error) -> CacheError {
    match &error {
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(
                failure.code,
                ErrorCode::CannotOpen
                    | ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::DiskFull
                    | ErrorCode::ReadOnly
                    | ErrorCode::PermissionDenied
                    | ErrorCode::NotADatabase
            ) =>
        {
            CacheError::StoreUnavailable(error.to_string())
        }
        _ => CacheError::Store(error.to_string()),
    }
}

fn system_time_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
