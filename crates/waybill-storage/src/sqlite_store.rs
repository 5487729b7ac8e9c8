use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use rusqlite::{params, types::ValueRef, Connection, OpenFlags, OptionalExtension};
use tracing::{debug, info, instrument, warn};
use waybill_core::storage::{RecordStore, StoreError};

const SCHEMA_SQL: &str = "CREATE TABLE IF NOT EXISTS storage (key TEXT PRIMARY KEY, value TEXT);";
const UPSERT_SQL: &str = "INSERT OR REPLACE INTO storage (key, value) VALUES (?1, ?2)";
const SELECT_SQL: &str = "SELECT value FROM storage WHERE key = ?1";

/// Single-connection SQLite record store.
///
/// The connection sits behind a mutex so the store can be shared across
/// threads and dispatcher tasks; every statement runs with exclusive access.
pub struct SqliteRecordStore {
    path: Option<PathBuf>,
    conn: Mutex<Option<Connection>>,
}

impl SqliteRecordStore {
    /// Open or create the database at `path` and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(init_err)?;
        }
        info!(?path, "opening record store");

        let conn = Connection::open(path).map_err(init_err)?;
        Self::with_schema(conn, Some(path.to_path_buf()))
    }

    /// Open a database that must already exist; never creates files or directories.
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(StoreError::Init {
                reason: format!("database not found: {}", path.display()),
            });
        }
        info!(?path, "opening existing record store");

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(init_err)?;
        Self::with_schema(conn, Some(path.to_path_buf()))
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        debug!("opening in-memory record store");
        let conn = Connection::open_in_memory().map_err(init_err)?;
        Self::with_schema(conn, None)
    }

    fn with_schema(conn: Connection, path: Option<PathBuf>) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA_SQL).map_err(init_err)?;
        Ok(Self {
            path,
            conn: Mutex::new(Some(conn)),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        self.with_conn(read_err, |conn| {
            conn.query_row("SELECT COUNT(*) FROM storage", [], |row| row.get::<_, i64>(0))
                .map(|n| n as usize)
                .map_err(read_err)
        })
    }

    fn with_conn<T>(
        &self,
        on_poison: fn(String) -> StoreError,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let guard = self
            .conn
            .lock()
            .map_err(|err| on_poison(format!("lock poisoned: {err}")))?;
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(StoreError::Closed),
        }
    }
}

impl RecordStore for SqliteRecordStore {
    #[instrument(skip_all, fields(key = %key, len = value.len()))]
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.with_conn(write_err, |conn| {
            let mut stmt = conn.prepare_cached(UPSERT_SQL).map_err(write_err)?;
            stmt.execute(params![key, value]).map_err(write_err)?;
            debug!("record upserted");
            Ok(())
        })
    }

    #[instrument(skip_all, fields(key = %key))]
    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.with_conn(read_err, |conn| {
            let mut stmt = conn.prepare_cached(SELECT_SQL).map_err(read_err)?;
            stmt.query_row([key], |row| column_bytes(row.get_ref(0)?))
                .optional()
                .map_err(read_err)?
                .ok_or_else(|| StoreError::NotFound {
                    key: key.to_string(),
                })
        })
    }

    fn close(&self) -> Result<(), StoreError> {
        let mut guard = self.conn.lock().map_err(|err| StoreError::Write {
            reason: format!("lock poisoned: {err}"),
        })?;
        let Some(conn) = guard.take() else {
            return Ok(());
        };
        info!(path = ?self.path, "closing record store");
        conn.close().map_err(|(_, err)| {
            warn!(%err, "record store did not close cleanly");
            write_err(err)
        })
    }
}

/// Values are opaque bytes; rows written as TEXT by other tools are accepted too.
fn column_bytes(value: ValueRef<'_>) -> rusqlite::Result<Vec<u8>> {
    match value {
        ValueRef::Blob(bytes) | ValueRef::Text(bytes) => Ok(bytes.to_vec()),
        other => Err(rusqlite::Error::InvalidColumnType(
            0,
            "value".to_string(),
            other.data_type(),
        )),
    }
}

fn init_err<E: ToString>(err: E) -> StoreError {
    StoreError::Init {
        reason: err.to_string(),
    }
}

fn write_err<E: ToString>(err: E) -> StoreError {
    StoreError::Write {
        reason: err.to_string(),
    }
}

fn read_err<E: ToString>(err: E) -> StoreError {
    StoreError::Read {
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn upsert_replaces_existing_value() {
        let store = SqliteRecordStore::open_in_memory().expect("open");
        store.put("k", b"v1").expect("first put");
        store.put("k", b"v2").expect("second put");

        assert_eq!(store.get("k").expect("get"), b"v2");
        assert_eq!(store.len().expect("len"), 1);
    }

    #[test]
    fn missing_key_is_not_found() {
        let store = SqliteRecordStore::open_in_memory().expect("open");
        let err = store.get("absent-key").expect_err("should be missing");
        assert_eq!(
            err,
            StoreError::NotFound {
                key: "absent-key".into()
            }
        );
    }

    #[test]
    fn stores_arbitrary_bytes() {
        let store = SqliteRecordStore::open_in_memory().expect("open");
        let value: Vec<u8> = (0..=255u8).collect();
        store.put("binary", &value).expect("put");
        assert_eq!(store.get("binary").expect("get"), value);
    }

    #[test]
    fn reads_values_written_as_text() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("legacy.db");
        let store = SqliteRecordStore::open(&path).expect("open");
        store.close().expect("close");

        let conn = Connection::open(&path).expect("raw open");
        conn.execute(
            "INSERT INTO storage (key, value) VALUES ('legacy', 'plain text')",
            [],
        )
        .expect("raw insert");
        drop(conn);

        let store = SqliteRecordStore::open(&path).expect("reopen");
        assert_eq!(store.get("legacy").expect("get"), b"plain text");
    }

    #[test]
    fn data_survives_reopen_and_creates_parent_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("waybill.db");

        let store = SqliteRecordStore::open(&path).expect("open");
        store.put("k1", b"persisted").expect("put");
        store.close().expect("close");

        let reopened = SqliteRecordStore::open(&path).expect("reopen");
        assert_eq!(reopened.path(), Some(path.as_path()));
        assert_eq!(reopened.get("k1").expect("get"), b"persisted");
    }

    #[test]
    fn open_existing_never_creates_a_database() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("typo").join("waybill.db");

        let err = SqliteRecordStore::open_existing(&path).err().expect("missing db");
        assert!(matches!(err, StoreError::Init { .. }), "{err}");
        assert!(!path.exists());
        assert!(!dir.path().join("typo").exists());

        SqliteRecordStore::open(&path).expect("create").close().expect("close");
        let store = SqliteRecordStore::open_existing(&path).expect("open existing");
        store.put("k", b"v").expect("put");
        assert_eq!(store.get("k").expect("get"), b"v");
    }

    #[test]
    fn statement_failures_map_to_write_and_read_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("dropped.db");
        let store = SqliteRecordStore::open(&path).expect("open");

        let raw = Connection::open(&path).expect("raw open");
        raw.execute_batch("DROP TABLE storage;").expect("drop table");
        drop(raw);

        let err = store.put("k", b"v").expect_err("write should fail");
        assert!(
            matches!(err, StoreError::Write { .. }),
            "{err:?}"
        );
        let err = store.get("k").expect_err("read should fail");
        assert!(
            matches!(err, StoreError::Read { .. }),
            "{err:?}"
        );
    }

    #[test]
    fn open_fails_on_unusable_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = SqliteRecordStore::open(dir.path()).err().expect("directory is not a db");
        assert!(matches!(err, StoreError::Init { .. }));
    }

    #[test]
    fn close_is_idempotent_and_blocks_further_use() {
        let store = SqliteRecordStore::open_in_memory().expect("open");
        store.put("k", b"v").expect("put");
        store.close().expect("close");
        store.close().expect("close again");

        assert_eq!(store.get("k"), Err(StoreError::Closed));
        assert_eq!(store.put("k", b"v"), Err(StoreError::Closed));
        assert_eq!(store.len(), Err(StoreError::Closed));
    }

    #[test]
    fn concurrent_writers_are_serialized() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(SqliteRecordStore::open(dir.path().join("shared.db")).expect("open"));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..25 {
                        let key = format!("t{t}/k{i}");
                        store.put(&key, key.as_bytes()).expect("put");
                        assert_eq!(store.get(&key).expect("get"), key.as_bytes());
                    }
                    // Every thread also fights over one shared key.
                    store.put("shared", format!("t{t}").as_bytes()).expect("put shared");
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("writer thread");
        }

        assert_eq!(store.len().expect("len"), 8 * 25 + 1);
        let shared = String::from_utf8(store.get("shared").expect("get shared")).expect("utf8");
        assert!(shared.starts_with('t'));
    }
}
