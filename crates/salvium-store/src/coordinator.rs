//! Transaction coordinator.
//!
//! Owns the named SQLite databases and the single write lock that
//! serializes every writer across all stores built on the coordinator.
//! Writers get a [`Transaction`] guard from [`Coordinator::begin_transaction`];
//! the guard holds the lock until it is committed, rolled back, or dropped.
//!
//! Each handle keeps two connections to its file: one for writers, used only
//! under the lock, and one for readers. Databases run in WAL mode, so the
//! read connection sees committed data only.

use crate::config::{DatabaseConfig, StoreConfig};
use crate::error::{Result, StoreError};
use log::{debug, warn};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

// ─── DbHandle ───────────────────────────────────────────────────────────────

/// One named database file with its write and read connections.
pub struct DbHandle {
    name: String,
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

fn lock_conn(conn: &Mutex<Connection>) -> Result<std::sync::MutexGuard<'_, Connection>> {
    conn.lock().map_err(|e| StoreError::Poisoned(e.to_string()))
}

impl DbHandle {
    fn open(name: &str, path: &Path, busy_timeout: Duration) -> Result<Self> {
        let writer = Connection::open(path)?;
        writer.busy_timeout(busy_timeout)?;
        writer.execute_batch("PRAGMA journal_mode = WAL;")?;

        let reader = Connection::open(path)?;
        reader.busy_timeout(busy_timeout)?;

        Ok(Self {
            name: name.to_string(),
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `f` against the read connection. Sees committed data only.
    pub fn with_reader<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let conn = lock_conn(&self.reader)?;
        f(&conn)
    }

    /// Run `f` against the write connection without taking the coordinator
    /// lock. Writers should go through [`Transaction::execute`] instead.
    pub fn with_writer<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let conn = lock_conn(&self.writer)?;
        f(&conn)
    }

    /// Whether the engine reports an open transaction on the write connection.
    pub fn in_transaction(&self) -> Result<bool> {
        self.with_writer(|c| Ok(!c.is_autocommit()))
    }

    fn begin(&self) -> Result<()> {
        self.with_writer(|c| {
            c.execute_batch("BEGIN TRANSACTION")?;
            Ok(())
        })
    }

    /// Commits pending changes. Nothing pending is a no-op.
    fn commit(&self) -> Result<()> {
        self.with_writer(|c| {
            if !c.is_autocommit() {
                c.execute_batch("COMMIT")?;
            }
            Ok(())
        })
    }

    /// Rolls back only if a transaction is open.
    fn rollback(&self) -> Result<()> {
        self.with_writer(|c| {
            if !c.is_autocommit() {
                c.execute_batch("ROLLBACK")?;
            }
            Ok(())
        })
    }
}

// ─── Coordinator ────────────────────────────────────────────────────────────

/// Name -> handle map plus the write lock shared by every store built on it.
pub struct Coordinator {
    handles: HashMap<String, DbHandle>,
    write_lock: AsyncMutex<()>,
    // Backing directory of `open_temporary`; dropped after the handles.
    _scratch: Option<tempfile::TempDir>,
}

impl Coordinator {
    /// Open every database file named in `config`, creating parent
    /// directories as needed.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let mut handles = HashMap::new();
        for db in &config.databases {
            if let Some(parent) = db.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let handle = DbHandle::open(&db.name, &db.path, busy_timeout)?;
            debug!("opened database '{}' at {}", db.name, db.path.display());
            handles.insert(db.name.clone(), handle);
        }
        Ok(Self {
            handles,
            write_lock: AsyncMutex::new(()),
            _scratch: None,
        })
    }

    /// One database per name in a private temporary directory, removed
    /// when the coordinator is dropped.
    pub fn open_temporary(names: &[&str]) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let config = StoreConfig::new(
            names
                .iter()
                .map(|name| DatabaseConfig {
                    name: name.to_string(),
                    path: dir.path().join(format!("{name}.db")),
                })
                .collect(),
        );
        let mut coord = Self::open(&config)?;
        coord._scratch = Some(dir);
        Ok(coord)
    }

    pub fn handle(&self, db_name: &str) -> Result<&DbHandle> {
        self.handles
            .get(db_name)
            .ok_or_else(|| StoreError::DatabaseNotFound(db_name.to_string()))
    }

    pub fn db_names(&self) -> impl Iterator<Item = &str> {
        self.handles.keys().map(String::as_str)
    }

    /// Acquire the write lock and open a transaction on `db_name`.
    ///
    /// Waits (FIFO, without timeout) while another writer holds the lock.
    /// The lock is not re-entrant: a task already holding a `Transaction`
    /// from this coordinator must not call this again.
    pub async fn begin_transaction(&self, db_name: &str) -> Result<Transaction<'_>> {
        self.handle(db_name)?;
        let lock = self.write_lock.lock().await;
        let mut tx = Transaction {
            coordinator: self,
            enlisted: Vec::new(),
            finished: false,
            _lock: lock,
        };
        tx.enlist(db_name)?;
        Ok(tx)
    }

    /// Run `f` on `db_name`'s write connection in autocommit mode while
    /// holding the write lock.
    ///
    /// For statements SQLite refuses inside a transaction, such as changing
    /// the journal mode.
    pub async fn run_exclusive<F, R>(&self, db_name: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let handle = self.handle(db_name)?;
        let _lock = self.write_lock.lock().await;
        handle.with_writer(f)
    }

    /// Recovery tool: commit whatever raw [`DbHandle::with_writer`] use left
    /// pending on `db_name`. Safe when nothing is pending.
    ///
    /// Not part of a normal unit of work. This waits for the write lock, so
    /// it never touches a live [`Transaction`]; commit that through the guard.
    pub async fn commit_transaction(&self, db_name: &str) -> Result<()> {
        let handle = self.handle(db_name)?;
        let _lock = self.write_lock.lock().await;
        handle.commit()
    }

    /// Recovery tool: roll back a transaction that raw
    /// [`DbHandle::with_writer`] use left open on `db_name`; otherwise a no-op.
    ///
    /// Not part of a normal unit of work, for the same reason as
    /// [`commit_transaction`](Self::commit_transaction).
    pub async fn rollback_transaction(&self, db_name: &str) -> Result<()> {
        let handle = self.handle(db_name)?;
        let _lock = self.write_lock.lock().await;
        handle.rollback()
    }
}

// ─── Transaction ────────────────────────────────────────────────────────────

/// A unit of work holding the coordinator's write lock.
///
/// Consumed by exactly one of [`commit`](Self::commit) or
/// [`rollback`](Self::rollback). Dropping it unfinished rolls back.
pub struct Transaction<'a> {
    coordinator: &'a Coordinator,
    enlisted: Vec<&'a DbHandle>,
    finished: bool,
    _lock: MutexGuard<'a, ()>,
}

impl<'a> Transaction<'a> {
    /// Bring another named handle into this unit of work.
    ///
    /// Enlisting a handle twice is a no-op.
    pub fn enlist(&mut self, db_name: &str) -> Result<&'a DbHandle> {
        let handle = self.coordinator.handle(db_name)?;
        if !self.enlisted.iter().any(|h| std::ptr::eq(*h, handle)) {
            handle.begin()?;
            debug!("began transaction on '{}'", handle.name());
            self.enlisted.push(handle);
        }
        Ok(handle)
    }

    pub fn is_enlisted(&self, db_name: &str) -> bool {
        self.enlisted.iter().any(|h| h.name() == db_name)
    }

    pub(crate) fn belongs_to(&self, coordinator: &Coordinator) -> bool {
        std::ptr::eq(self.coordinator, coordinator)
    }

    /// Run `f` on `db_name`'s connection inside this transaction,
    /// enlisting the handle first if needed.
    pub fn execute<F, R>(&mut self, db_name: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let handle = self.enlist(db_name)?;
        handle.with_writer(f)
    }

    /// Commit every enlisted handle in enlistment order, then release the lock.
    ///
    /// If a commit fails, the handles not yet committed are rolled back and
    /// the error is returned. Handles committed before the failure stay
    /// committed.
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        let mut handles = std::mem::take(&mut self.enlisted).into_iter();
        while let Some(handle) = handles.next() {
            if let Err(e) = handle.commit() {
                warn!("commit failed on '{}': {e}; rolling back the rest", handle.name());
                for h in std::iter::once(handle).chain(handles) {
                    if let Err(re) = h.rollback() {
                        warn!("rollback of '{}' failed: {re}", h.name());
                    }
                }
                return Err(e);
            }
            debug!("committed '{}'", handle.name());
        }
        Ok(())
    }

    /// Roll back every enlisted handle, then release the lock.
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        let mut first_err = None;
        for handle in std::mem::take(&mut self.enlisted) {
            if let Err(e) = handle.rollback() {
                warn!("rollback of '{}' failed: {e}", handle.name());
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.finished || self.enlisted.is_empty() {
            return;
        }
        warn!(
            "transaction dropped without commit; rolling back {} handle(s)",
            self.enlisted.len()
        );
        for handle in &self.enlisted {
            if let Err(e) = handle.rollback() {
                warn!("rollback of '{}' failed: {e}", handle.name());
            }
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
