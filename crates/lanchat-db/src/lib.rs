pub mod error;
pub mod files;
pub mod groups;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

pub use error::{ChatError, ChatResult};

/// The authoritative store. One SQLite connection behind a mutex; every
/// mutation runs while the lock is held, so concurrent readers never observe
/// partial writes.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> ChatResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| ChatError::Persistence(format!("opening {}: {e}", path.display())))?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> ChatResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> ChatResult<T>
    where
        F: FnOnce(&Connection) -> ChatResult<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ChatError::Persistence(format!("DB lock poisoned: {e}")))?;
        f(&conn)
    }

    /// Run `f` inside an explicit transaction; committed on Ok, rolled back
    /// on Err. Multi-row cascades go through here so readers never see a
    /// half-applied mutation.
    pub fn with_tx<F, T>(&self, f: F) -> ChatResult<T>
    where
        F: FnOnce(&rusqlite::Transaction) -> ChatResult<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| ChatError::Persistence(format!("DB lock poisoned: {e}")))?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}
