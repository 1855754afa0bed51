//! Key-scoped document store with exclusive leases.
//!
//! Every piece of shared bot state (reminders, mood, mutes, ...) lives in a
//! named *document*: one JSON value per key. Callers never touch the backend
//! directly; they take a [`DocumentLease`] on a key, read and stage a new
//! value, and release it:
//!
//! ```no_run
//! # use pgbot_core::store::DocumentStore;
//! # async fn demo(store: DocumentStore) -> pgbot_core::Result<()> {
//! let mut lease = store.acquire("emotions").await;
//! let mut counts: std::collections::BTreeMap<String, i64> = lease.get(Default::default())?;
//! *counts.entry("happy".into()).or_default() += 1;
//! lease.set(&counts)?;
//! lease.release().await?;
//! # Ok(()) }
//! ```
//!
//! At most one lease per key exists at a time; a second `acquire` on the same
//! key waits until the first lease is released. Leases on different keys
//! never wait on each other. Every write replaces the whole document.
//!
//! Backend I/O runs on tokio's blocking pool: the document is fetched when
//! the lease is granted and written back by [`DocumentLease::release`].
//!
//! The SQLite schema is a single table:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS documents (
//!     key        TEXT PRIMARY KEY,
//!     data       BLOB NOT NULL,
//!     updated_at TEXT NOT NULL,
//!     checksum   TEXT
//! );
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, warn};

use crate::config::StoreConfig;
use crate::error::{PgError, Result};

// ---------------------------------------------------------------------------
// CRC-32 checksum helper
// ---------------------------------------------------------------------------

/// CRC-32 (ISO 3309) of `data` as lowercase hex.
fn crc32_hex(data: &[u8]) -> String {
    const POLY: u32 = 0xEDB8_8320;
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            crc = if crc & 1 == 1 { (crc >> 1) ^ POLY } else { crc >> 1 };
        }
    }
    format!("{:08x}", !crc)
}

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

/// Raw persistence underneath the store: atomic get/set of bytes per key.
///
/// Implementations must make `save` all-or-nothing; the store relies on it to
/// guarantee that no half-written document is ever loaded.
pub trait DocumentBackend: Send + Sync + 'static {
    /// Load the bytes stored under `key`, or `None` if it was never written.
    ///
    /// # Errors
    /// Backend-specific read failures.
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Replace the bytes stored under `key`.
    ///
    /// # Errors
    /// Backend-specific write failures. On error the previous value must be
    /// left intact.
    fn save(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Remove `key`. Returns `true` if something was deleted.
    ///
    /// # Errors
    /// Backend-specific write failures.
    fn delete(&self, key: &str) -> Result<bool>;

    /// All keys currently stored.
    ///
    /// # Errors
    /// Backend-specific read failures.
    fn keys(&self) -> Result<Vec<String>>;
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS documents (
    key        TEXT PRIMARY KEY,
    data       BLOB NOT NULL,
    updated_at TEXT NOT NULL,
    checksum   TEXT
);";

/// SQLite-backed document persistence.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    config: StoreConfig,
    db_path: PathBuf,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("db_path", &self.db_path)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SqliteBackend {
    /// Open (or create) the database at `path`, creating the schema.
    ///
    /// # Errors
    ///
    /// Returns [`PgError::Database`] on SQLite failures.
    pub fn open<P: AsRef<Path>>(path: P, config: &StoreConfig) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(&db_path, flags)?;
        if config.wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        conn.execute_batch(SCHEMA)?;

        info!(
            path = %db_path.display(),
            wal = config.wal_mode,
            "document store opened"
        );

        Ok(Self {
            conn: Mutex::new(conn),
            config: config.clone(),
            db_path,
        })
    }

    /// Open an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`PgError::Database`] on SQLite failures.
    pub fn open_in_memory(config: &StoreConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            config: config.clone(),
            db_path: PathBuf::from(":memory:"),
        })
    }

    /// Open whatever `config.path` points at (`:memory:` included).
    ///
    /// # Errors
    ///
    /// Returns [`PgError::Database`] on SQLite failures.
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        if config.path.as_os_str() == ":memory:" {
            Self::open_in_memory(config)
        } else {
            Self::open(&config.path, config)
        }
    }

    /// Path of the database file (`:memory:` for in-memory databases).
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Run `PRAGMA integrity_check`; `Ok(false)` means corruption.
    ///
    /// # Errors
    ///
    /// Returns [`PgError::Database`] if the check itself fails.
    pub fn integrity_check(&self) -> Result<bool> {
        let result: String = self
            .conn
            .lock()
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        Ok(result == "ok")
    }

    /// Copy the database to `dest_path` with SQLite's online-backup API.
    ///
    /// # Errors
    ///
    /// Returns [`PgError::Database`] on SQLite failures.
    pub fn backup<P: AsRef<Path>>(&self, dest_path: P) -> Result<()> {
        let start = Instant::now();
        let mut dest = Connection::open(dest_path.as_ref())?;
        let conn = self.conn.lock();
        let backup = rusqlite::backup::Backup::new(&conn, &mut dest)?;
        backup.run_to_completion(256, std::time::Duration::from_millis(50), None)?;

        info!(
            dest = %dest_path.as_ref().display(),
            elapsed_ms = start.elapsed().as_millis(),
            "document store backup completed"
        );
        Ok(())
    }
}

impl DocumentBackend for SqliteBackend {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT data, checksum FROM documents WHERE key = ?1")?;
        let row: Option<(Vec<u8>, Option<String>)> = stmt
            .query_row(params![key], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;

        let Some((data, stored_checksum)) = row else {
            return Ok(None);
        };

        if self.config.checksum_enabled {
            if let Some(expected) = stored_checksum {
                let actual = crc32_hex(&data);
                if expected != actual {
                    warn!(
                        key,
                        expected = %expected,
                        actual = %actual,
                        "checksum mismatch, document may be corrupt"
                    );
                }
            }
        }

        Ok(Some(data))
    }

    fn save(&self, key: &str, data: &[u8]) -> Result<()> {
        let checksum = self.config.checksum_enabled.then(|| crc32_hex(data));
        let now = Utc::now().to_rfc3339();

        self.conn.lock().execute(
            "INSERT INTO documents (key, data, updated_at, checksum)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at,
                checksum = excluded.checksum",
            params![key, data, now, checksum],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let deleted = self
            .conn
            .lock()
            .execute("DELETE FROM documents WHERE key = ?1", params![key])?;
        Ok(deleted > 0)
    }

    fn keys(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT key FROM documents ORDER BY key")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut keys = Vec::new();
        for key in rows {
            keys.push(key?);
        }
        Ok(keys)
    }
}

/// Process-local backend. Nothing survives the process; used by tests and
/// benches, and handy for dry runs.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    docs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentBackend for MemoryBackend {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.docs.lock().get(key).cloned())
    }

    fn save(&self, key: &str, data: &[u8]) -> Result<()> {
        self.docs.lock().insert(key.to_owned(), data.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.docs.lock().remove(key).is_some())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.docs.lock().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

// ---------------------------------------------------------------------------
// DocumentStore
// ---------------------------------------------------------------------------

struct StoreInner {
    backend: Arc<dyn DocumentBackend>,
    leases: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

/// Shared handle to the document store. Cloning is cheap and every clone
/// sees the same leases.
#[derive(Clone)]
pub struct DocumentStore {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("open_keys", &self.inner.leases.len())
            .finish_non_exhaustive()
    }
}

impl DocumentStore {
    /// Wrap a backend.
    #[must_use]
    pub fn new(backend: impl DocumentBackend) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                backend: Arc::new(backend),
                leases: DashMap::new(),
            }),
        }
    }

    /// A store over a fresh [`MemoryBackend`].
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    /// Open the SQLite store described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`PgError::Database`] if the database cannot be opened.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        Ok(Self::new(SqliteBackend::from_config(config)?))
    }

    /// Begin an exclusive session on `key`, waiting for any current holder.
    ///
    /// The stored document is fetched once the lease is granted; a fetch
    /// failure surfaces from the first [`DocumentLease::get`].
    pub async fn acquire(&self, key: &str) -> DocumentLease {
        let lock = {
            let entry = self.inner.leases.entry(key.to_owned()).or_default();
            Arc::clone(entry.value())
        };

        let guard = match Arc::clone(&lock).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                debug!(key, "waiting for document lease");
                lock.lock_owned().await
            }
        };

        let fetched = self.load_blocking(key).await;
        DocumentLease {
            store: self.clone(),
            key: key.to_owned(),
            guard: Some(guard),
            fetched: Some(fetched),
            current: None,
            dirty: false,
        }
    }

    /// Read `key` under a lease and release it without writing.
    ///
    /// # Errors
    ///
    /// Backend or decoding failures.
    pub async fn read<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        let mut lease = self.acquire(key).await;
        let value = lease.get(default)?;
        lease.release().await?;
        Ok(value)
    }

    /// Acquire `key`, hand its value to `f` for mutation, write it back and
    /// release. Returns whatever `f` returns.
    ///
    /// # Errors
    ///
    /// Backend, encoding or decoding failures. The lease is released either way.
    pub async fn update<T, R, F>(&self, key: &str, default: T, f: F) -> Result<R>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T) -> R,
    {
        let mut lease = self.acquire(key).await;
        let mut value = lease.get(default)?;
        let out = f(&mut value);
        lease.set(&value)?;
        lease.release().await?;
        Ok(out)
    }

    /// Every key the backend currently holds.
    ///
    /// # Errors
    ///
    /// Backend failures.
    pub fn keys(&self) -> Result<Vec<String>> {
        self.inner.backend.keys()
    }

    fn backend(&self) -> &dyn DocumentBackend {
        self.inner.backend.as_ref()
    }

    async fn load_blocking(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let backend = Arc::clone(&self.inner.backend);
        let key = key.to_owned();
        tokio::task::spawn_blocking(move || backend.load(&key))
            .await
            .map_err(|e| PgError::Io(std::io::Error::other(e)))?
    }
}

// ---------------------------------------------------------------------------
// DocumentLease
// ---------------------------------------------------------------------------

/// Exclusive session on one document.
///
/// Prefer [`release`](Self::release): it reports write-back failures. A lease
/// that is simply dropped still writes back its staged value, but can only
/// log a failure.
pub struct DocumentLease {
    store: DocumentStore,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    fetched: Option<Result<Option<Vec<u8>>>>,
    current: Option<serde_json::Value>,
    dirty: bool,
}

impl std::fmt::Debug for DocumentLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentLease")
            .field("key", &self.key)
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}

impl DocumentLease {
    /// Key this lease covers.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current value: the staged one if [`set`](Self::set) was called,
    /// otherwise what is stored, otherwise `default`.
    ///
    /// # Errors
    ///
    /// Backend read failures, or [`PgError::Serialization`] if the stored
    /// document does not decode as `T`.
    pub fn get<T: DeserializeOwned>(&mut self, default: T) -> Result<T> {
        if self.current.is_none() {
            // After a failed fetch or decode, retry against the backend.
            let loaded = match self.fetched.take() {
                Some(fetched) => fetched,
                None => self.store.backend().load(&self.key),
            };
            if let Some(bytes) = loaded? {
                let value: serde_json::Value =
                    serde_json::from_slice(&bytes).map_err(|e| self.serde_error(&e))?;
                self.current = Some(value);
            } else {
                self.fetched = Some(Ok(None));
            }
        }

        match &self.current {
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| self.serde_error(&e)),
            None => Ok(default),
        }
    }

    /// Stage `value` to be written when the lease ends.
    ///
    /// # Errors
    ///
    /// [`PgError::Serialization`] if `value` cannot be encoded.
    pub fn set<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let value = serde_json::to_value(value).map_err(|e| self.serde_error(&e))?;
        self.current = Some(value);
        self.dirty = true;
        Ok(())
    }

    /// Write back the staged value (if any) and release the lease.
    ///
    /// # Errors
    ///
    /// The write-back failure, if any. The lease is released regardless and
    /// the previously stored document is left untouched.
    pub async fn release(mut self) -> Result<()> {
        let staged = self.take_staged();
        let guard = self.guard.take();
        let bytes = match staged {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Ok(()),
            Err(e) => return Err(e),
        };

        let start = Instant::now();
        let len = bytes.len();
        let backend = Arc::clone(&self.store.inner.backend);
        let key = self.key.clone();
        // The guard moves into the write so the key stays locked until the
        // save lands, even if this future is dropped.
        tokio::task::spawn_blocking(move || {
            let saved = backend.save(&key, &bytes);
            drop(guard);
            saved
        })
        .await
        .map_err(|e| PgError::Io(std::io::Error::other(e)))??;

        debug!(
            key = %self.key,
            bytes = len,
            elapsed_us = start.elapsed().as_micros(),
            "document written back"
        );
        Ok(())
    }

    /// Encoded staged value, if `set` was called since the last write.
    fn take_staged(&mut self) -> Result<Option<Vec<u8>>> {
        if !self.dirty {
            return Ok(None);
        }
        self.dirty = false;
        let Some(value) = self.current.as_ref() else {
            return Ok(None);
        };
        serde_json::to_vec(value).map(Some).map_err(|e| self.serde_error(&e))
    }

    fn serde_error(&self, err: &serde_json::Error) -> PgError {
        PgError::Serialization {
            key: self.key.clone(),
            reason: err.to_string(),
        }
    }
}

impl Drop for DocumentLease {
    fn drop(&mut self) {
        if self.guard.is_none() {
            return;
        }
        let written = self.take_staged().and_then(|staged| match staged {
            Some(bytes) => self.store.backend().save(&self.key, &bytes),
            None => Ok(()),
        });
        if let Err(e) = written {
            error!(key = %self.key, error = %e, "write-back on drop failed");
        }
        self.guard.take();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
