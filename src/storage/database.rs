//! Shared database handle and connection pool.
//!
//! The embedded engine requires a single shared handle per physical database
//! directory; multiple connections are derived from it, but writes
//! serialise. A process-wide registry keyed by canonical path enforces the
//! one-handle rule; each handle owns a fixed pool of connections plus a
//! writer slot that at most one writer holds at a time.
//!
//! # Concurrency Model
//!
//! - **Readers** lease any free pooled connection and run concurrently.
//! - **Writers** first claim the writer slot, retrying with exponential
//!   backoff and full jitter, then lease a connection. Exhausting the retry
//!   budget fails with `BusyTimeout`.
//! - Engine errors classified as transient (lock contention) retry under the
//!   same policy; everything else fails fast.
//! - Shutdown drains: new leases are refused, in-flight operations get a
//!   grace period, then connections close in LIFO order before the handle
//!   itself is dropped.

// Allow cast lints for millisecond/byte conversions into metrics and delays.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]

use crate::config::PerformanceConfig;
use crate::{Error, Result};
use once_cell::sync::Lazy;
use rand::Rng;
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Name of the engine file inside the database directory.
const ENGINE_FILE_NAME: &str = "memories.sqlite3";

/// Process-wide registry of shared handles, keyed by canonical path.
static REGISTRY: Lazy<Mutex<HashMap<PathBuf, Arc<SharedDatabase>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Helper to acquire a mutex lock with poison recovery.
///
/// If the mutex is poisoned by a panic in another thread, the inner value is
/// recovered and a warning logged; blocking every future operation on a
/// transient panic would be worse than continuing.
fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("database mutex was poisoned, recovering");
            metrics::counter!("storage_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

/// Configures a connection for concurrent access.
///
/// WAL journalling allows concurrent readers alongside the single writer;
/// the busy timeout bounds engine-level lock waits.
fn configure_connection(conn: &Connection) -> Result<()> {
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    let _ = conn.pragma_update(None, "busy_timeout", "5000");
    let _ = conn.pragma_update(None, "foreign_keys", "ON");
    Ok(())
}

/// Write retry policy: exponential backoff with full jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Base delay before the first retry.
    pub base: Duration,
    /// Multiplier applied per attempt.
    pub factor: u32,
    /// Attempts before giving up.
    pub max_attempts: u32,
    /// Jitter fraction applied symmetrically (0.25 means ±25%).
    pub jitter: f64,
}

impl RetryPolicy {
    /// Builds the policy from configuration.
    #[must_use]
    pub fn from_config(config: &PerformanceConfig) -> Self {
        Self {
            base: Duration::from_millis(config.write_retry_base_ms),
            factor: 2,
            max_attempts: config.write_retry_max_attempts.max(1),
            jitter: 0.25,
        }
    }

    /// Delay before retry number `attempt` (0-based), jittered.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let nominal = self.base.as_millis() as f64 * f64::from(self.factor).powi(attempt as i32);
        let spread = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
        Duration::from_millis((nominal * spread).round() as u64)
    }
}

/// Classifies an engine error.
fn classify_engine_error(operation: &str, e: &rusqlite::Error) -> Error {
    use rusqlite::ErrorCode;
    if let rusqlite::Error::SqliteFailure(code, msg) = e {
        match code.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                return Error::BusyTimeout {
                    operation: operation.to_string(),
                    attempts: 1,
                };
            },
            ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => {
                return Error::Corrupt(msg.clone().unwrap_or_else(|| code.to_string()));
            },
            _ => {},
        }
    }
    Error::OperationFailed {
        operation: operation.to_string(),
        cause: e.to_string(),
    }
}

/// A leased pooled connection.
///
/// Holding the lease keeps the slot exclusive; dropping it returns the
/// connection to the pool.
pub struct ConnectionLease<'a> {
    guard: MutexGuard<'a, Option<Connection>>,
    db: &'a SharedDatabase,
}

impl ConnectionLease<'_> {
    /// Returns the underlying connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the pool is draining and the
    /// connection has already been closed.
    pub fn connection(&self) -> Result<&Connection> {
        self.guard.as_ref().ok_or_else(|| Error::OperationFailed {
            operation: "lease_connection".to_string(),
            cause: "connection pool is draining".to_string(),
        })
    }
}

impl Drop for ConnectionLease<'_> {
    fn drop(&mut self) {
        self.db.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A write lease: the writer slot plus a pooled connection.
pub struct WriteLease<'a> {
    /// Keeps the writer slot held for the lease lifetime.
    _writer: MutexGuard<'a, ()>,
    /// The leased connection.
    pub lease: ConnectionLease<'a>,
}

/// Shared database handle with its connection pool.
pub struct SharedDatabase {
    /// Canonical database directory.
    path: PathBuf,
    /// Pooled connections; `None` once closed during drain.
    connections: Vec<Mutex<Option<Connection>>>,
    /// Single-writer slot.
    writer_slot: Mutex<()>,
    /// Round-robin cursor for reader leases.
    cursor: AtomicUsize,
    /// Set once drain starts; refuses new leases.
    draining: AtomicBool,
    /// Operations currently holding a lease.
    in_flight: AtomicUsize,
    /// Write retry policy.
    retry: RetryPolicy,
}

impl std::fmt::Debug for SharedDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedDatabase")
            .field("path", &self.path)
            .field("pool_size", &self.connections.len())
            .finish_non_exhaustive()
    }
}

impl SharedDatabase {
    /// Opens (or reuses) the shared handle for a database directory.
    ///
    /// Exactly one handle exists per canonical path for the lifetime of the
    /// process; repeat calls return the registered instance regardless of
    /// the configuration they pass.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the directory cannot be created
    /// or connections cannot be opened.
    pub fn open(path: &Path, config: &PerformanceConfig) -> Result<Arc<Self>> {
        std::fs::create_dir_all(path).map_err(|e| Error::OperationFailed {
            operation: "create_database_dir".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        let canonical = path.canonicalize().map_err(|e| Error::OperationFailed {
            operation: "canonicalize_database_dir".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;

        let mut registry = acquire_lock(&REGISTRY);
        if let Some(existing) = registry.get(&canonical) {
            return Ok(Arc::clone(existing));
        }

        let engine_file = canonical.join(ENGINE_FILE_NAME);
        let pool_size = config.connection_pool_size.max(1);
        let mut connections = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            let conn = Connection::open(&engine_file).map_err(|e| Error::OperationFailed {
                operation: "open_database".to_string(),
                cause: format!("{}: {e}", engine_file.display()),
            })?;
            configure_connection(&conn)?;
            connections.push(Mutex::new(Some(conn)));
        }

        let db = Arc::new(Self {
            path: canonical.clone(),
            connections,
            writer_slot: Mutex::new(()),
            cursor: AtomicUsize::new(0),
            draining: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            retry: RetryPolicy::from_config(config),
        });
        registry.insert(canonical, Arc::clone(&db));
        tracing::info!(path = %db.path.display(), pool = pool_size, "opened shared database");
        Ok(db)
    }

    /// Returns the canonical database directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the engine file on disk, in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        std::fs::metadata(self.path.join(ENGINE_FILE_NAME)).map_or(0, |m| m.len())
    }

    /// Leases a connection for a read.
    ///
    /// Readers run concurrently on distinct connections: the pool is probed
    /// round-robin for a free slot, falling back to a blocking wait on one
    /// slot (bounded by the engine's busy timeout downstream).
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] once draining has started.
    pub fn lease_read(&self) -> Result<ConnectionLease<'_>> {
        if self.draining.load(Ordering::SeqCst) {
            return Err(Error::OperationFailed {
                operation: "lease_read".to_string(),
                cause: "database is shutting down".to_string(),
            });
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        let n = self.connections.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % n;
        for offset in 0..n {
            let slot = &self.connections[(start + offset) % n];
            if let Ok(guard) = slot.try_lock() {
                return Ok(ConnectionLease { guard, db: self });
            }
        }
        // All busy: wait on the round-robin slot.
        let guard = acquire_lock(&self.connections[start]);
        Ok(ConnectionLease { guard, db: self })
    }

    /// Leases the writer slot plus a connection.
    ///
    /// Waits with exponential backoff and full jitter while another writer
    /// holds the slot; after the retry budget is spent the operation fails
    /// with [`Error::BusyTimeout`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::BusyTimeout`] on writer contention or
    /// [`Error::OperationFailed`] once draining has started.
    pub fn lease_write(&self, operation: &str) -> Result<WriteLease<'_>> {
        if self.draining.load(Ordering::SeqCst) {
            return Err(Error::OperationFailed {
                operation: operation.to_string(),
                cause: "database is shutting down".to_string(),
            });
        }

        let mut attempt = 0_u32;
        let writer = loop {
            match self.writer_slot.try_lock() {
                Ok(guard) => break guard,
                Err(std::sync::TryLockError::Poisoned(poisoned)) => {
                    tracing::warn!("writer slot was poisoned, recovering");
                    break poisoned.into_inner();
                },
                Err(std::sync::TryLockError::WouldBlock) => {
                    if attempt >= self.retry.max_attempts {
                        metrics::counter!("storage_write_busy_timeout_total").increment(1);
                        return Err(Error::BusyTimeout {
                            operation: operation.to_string(),
                            attempts: attempt,
                        });
                    }
                    let delay = self.retry.delay(attempt);
                    tracing::debug!(operation, attempt, delay_ms = delay.as_millis() as u64, "writer slot busy, backing off");
                    metrics::counter!("storage_write_retries_total").increment(1);
                    std::thread::sleep(delay);
                    attempt += 1;
                },
            }
        };

        let lease = self.lease_read()?;
        Ok(WriteLease { _writer: writer, lease })
    }

    /// Runs a read closure on a leased connection.
    ///
    /// # Errors
    ///
    /// Propagates lease failures and the closure's own error.
    pub fn with_read<T>(&self, operation: &str, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let start = Instant::now();
        let lease = self.lease_read()?;
        let result = f(lease.connection()?).map_err(|e| classify_engine_error(operation, &e));
        metrics::histogram!("storage_read_duration_ms", "operation" => operation.to_string())
            .record(start.elapsed().as_millis() as f64);
        result
    }

    /// Runs a write closure inside a transaction on the writer lease.
    ///
    /// The closure executes between `BEGIN IMMEDIATE` and `COMMIT`; any error
    /// rolls back. Transient engine failures (lock contention) are retried
    /// under the backoff policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BusyTimeout`] when the retry budget is exhausted,
    /// [`Error::Corrupt`] on unrecoverable engine state, otherwise
    /// [`Error::OperationFailed`].
    pub fn with_write<T>(
        &self,
        operation: &str,
        mut f: impl FnMut(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let start = Instant::now();
        let mut attempt = 0_u32;
        loop {
            let outcome = self.try_write_once(operation, &mut f);
            match outcome {
                Err(ref e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay(attempt);
                    tracing::debug!(operation, attempt, "transient write failure, retrying");
                    metrics::counter!("storage_write_retries_total").increment(1);
                    std::thread::sleep(delay);
                    attempt += 1;
                },
                other => {
                    metrics::histogram!("storage_write_duration_ms", "operation" => operation.to_string())
                        .record(start.elapsed().as_millis() as f64);
                    return other;
                },
            }
        }
    }

    /// One transactional write attempt.
    fn try_write_once<T>(
        &self,
        operation: &str,
        f: &mut impl FnMut(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let write = self.lease_write(operation)?;
        let conn = write.lease.connection()?;

        conn.execute("BEGIN IMMEDIATE", [])
            .map_err(|e| classify_engine_error(operation, &e))?;
        match f(conn) {
            Ok(value) => {
                conn.execute("COMMIT", [])
                    .map_err(|e| classify_engine_error(operation, &e))?;
                Ok(value)
            },
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(classify_engine_error(operation, &e))
            },
        }
    }

    /// Drains the pool and unregisters the handle.
    ///
    /// New leases are refused immediately; in-flight operations get `grace`
    /// to finish, then connections close in LIFO order.
    pub fn shutdown(&self, grace: Duration) {
        self.draining.store(true, Ordering::SeqCst);

        let deadline = Instant::now() + grace;
        while self.in_flight.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }

        for slot in self.connections.iter().rev() {
            let mut guard = acquire_lock(slot);
            if let Some(conn) = guard.take() {
                let _ = conn.close();
            }
        }

        let mut registry = acquire_lock(&REGISTRY);
        registry.remove(&self.path);
        tracing::info!(path = %self.path.display(), "closed shared database");
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    fn open_db(tmp: &TempDir) -> Arc<SharedDatabase> {
        SharedDatabase::open(&tmp.path().join("memorydb"), &PerformanceConfig::default())
            .expect("open db")
    }

    #[test]
    fn test_registry_returns_same_handle() {
        let tmp = TempDir::new().expect("tempdir");
        let a = open_db(&tmp);
        let b = open_db(&tmp);
        assert!(Arc::ptr_eq(&a, &b));
        a.shutdown(Duration::from_millis(100));
    }

    #[test]
    fn test_read_leases_are_concurrent() {
        let tmp = TempDir::new().expect("tempdir");
        let db = open_db(&tmp);
        let l1 = db.lease_read().expect("lease 1");
        let l2 = db.lease_read().expect("lease 2");
        assert!(l1.connection().is_ok());
        assert!(l2.connection().is_ok());
        drop((l1, l2));
        db.shutdown(Duration::from_millis(100));
    }

    #[test]
    fn test_writer_slot_times_out_under_contention() {
        let tmp = TempDir::new().expect("tempdir");
        let config = PerformanceConfig {
            write_retry_base_ms: 1,
            write_retry_max_attempts: 2,
            ..PerformanceConfig::default()
        };
        let db = SharedDatabase::open(&tmp.path().join("memorydb"), &config).expect("open");

        let held = db.lease_write("holder").expect("first writer");
        let err = db.lease_write("contender");
        assert!(matches!(err, Err(Error::BusyTimeout { .. })));
        drop(held);
        db.shutdown(Duration::from_millis(100));
    }

    #[test]
    fn test_writes_serialise_but_succeed() {
        let tmp = TempDir::new().expect("tempdir");
        let db = open_db(&tmp);
        db.with_write("create", |conn| {
            conn.execute("CREATE TABLE t (n INTEGER)", [])?;
            Ok(())
        })
        .expect("create table");

        let mut handles = vec![];
        for i in 0..8 {
            let db = Arc::clone(&db);
            handles.push(thread::spawn(move || {
                db.with_write("insert", |conn| {
                    conn.execute("INSERT INTO t (n) VALUES (?1)", [i])?;
                    Ok(())
                })
            }));
        }
        for handle in handles {
            handle.join().expect("join").expect("write");
        }

        let count: i64 = db
            .with_read("count", |conn| {
                conn.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            })
            .expect("count");
        assert_eq!(count, 8);
        db.shutdown(Duration::from_millis(100));
    }

    #[test]
    fn test_shutdown_refuses_new_leases() {
        let tmp = TempDir::new().expect("tempdir");
        let db = open_db(&tmp);
        db.shutdown(Duration::from_millis(50));
        assert!(db.lease_read().is_err());
        assert!(db.lease_write("late").is_err());
    }

    #[test]
    fn test_retry_delay_is_jittered_exponential() {
        let policy = RetryPolicy {
            base: Duration::from_millis(100),
            factor: 2,
            max_attempts: 10,
            jitter: 0.25,
        };
        for attempt in 0..4 {
            let nominal = 100.0 * 2.0_f64.powi(attempt);
            let delay = policy.delay(attempt as u32).as_millis() as f64;
            assert!(delay >= nominal * 0.75 - 1.0, "attempt {attempt}: {delay} < {nominal}*0.75");
            assert!(delay <= nominal * 1.25 + 1.0, "attempt {attempt}: {delay} > {nominal}*1.25");
        }
    }
}
