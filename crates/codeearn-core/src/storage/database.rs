//! SQLite-backed persistence.
//!
//! Provides durable storage for:
//! - The single-row time wallet (remaining milliseconds)
//! - Restricted apps and their active toggle
//! - Claimed judge submissions, so a reward is paid once
//! - Key-value store for application state

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::data_dir;
use crate::error::{CoreError, DatabaseError, Result};
use crate::restricted::RestrictedApp;

const WALLET_ID: i64 = 0;

/// A database handle shared between the stores of one process.
pub type SharedDatabase = Arc<Mutex<Database>>;

/// SQLite database for wallet, restricted apps and claimed submissions.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open the database at `<data_dir>/codeearn.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or the schema
    /// cannot be created.
    pub fn open() -> Result<Self> {
        let path = data_dir()?.join("codeearn.db");
        Self::open_at(&path)
    }

    /// Open (or create) a database file at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database (tests and embedding).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(DatabaseError::from)?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Wrap this database for sharing between stores.
    pub fn into_shared(self) -> SharedDatabase {
        Arc::new(Mutex::new(self))
    }

    fn migrate(&self) -> Result<(), DatabaseError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS wallet (
                id          INTEGER PRIMARY KEY,
                balance_ms  INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS restricted_apps (
                package_name TEXT PRIMARY KEY,
                app_name     TEXT NOT NULL DEFAULT '',
                is_locked    INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS claimed_submissions (
                submission_id INTEGER PRIMARY KEY,
                claimed_at    TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    // ── Wallet ───────────────────────────────────────────────────────

    /// Current wallet balance, or `None` if the row was never written.
    pub fn wallet_balance(&self) -> Result<Option<u64>, DatabaseError> {
        let value = self
            .conn
            .query_row(
                "SELECT balance_ms FROM wallet WHERE id = ?1",
                params![WALLET_ID],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(value.map(|ms| ms.max(0) as u64))
    }

    /// Overwrite the wallet balance.
    pub fn set_wallet_balance(&self, balance_ms: u64) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO wallet (id, balance_ms) VALUES (?1, ?2)",
            params![WALLET_ID, to_sql_ms(balance_ms)],
        )?;
        Ok(())
    }

    /// Move the wallet balance by `delta_ms`, saturating at zero.
    ///
    /// A missing row is treated as `base_ms`. Returns the new balance.
    pub fn add_wallet_balance(&self, delta_ms: i64, base_ms: u64) -> Result<u64, DatabaseError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO wallet (id, balance_ms) VALUES (?1, ?2)",
            params![WALLET_ID, to_sql_ms(base_ms)],
        )?;
        self.conn.execute(
            "UPDATE wallet SET balance_ms = MAX(balance_ms + ?2, 0) WHERE id = ?1",
            params![WALLET_ID, delta_ms],
        )?;
        Ok(self.wallet_balance()?.unwrap_or(0))
    }

    // ── Restricted apps ──────────────────────────────────────────────

    pub fn list_restricted_apps(&self) -> Result<Vec<RestrictedApp>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT package_name, app_name, is_locked FROM restricted_apps ORDER BY package_name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(RestrictedApp {
                package_name: row.get(0)?,
                app_name: row.get(1)?,
                active: row.get::<_, i64>(2)? != 0,
            })
        })?;
        let mut apps = Vec::new();
        for row in rows {
            apps.push(row?);
        }
        Ok(apps)
    }

    /// Insert or replace a restricted app by package name.
    pub fn upsert_restricted_app(&self, app: &RestrictedApp) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO restricted_apps (package_name, app_name, is_locked)
             VALUES (?1, ?2, ?3)",
            params![app.package_name, app.app_name, app.active as i64],
        )?;
        Ok(())
    }

    /// Toggle the active flag. Returns false if the app is not recorded.
    pub fn set_restricted_app_active(&self, package_name: &str, active: bool) -> Result<bool, DatabaseError> {
        let changed = self.conn.execute(
            "UPDATE restricted_apps SET is_locked = ?2 WHERE package_name = ?1",
            params![package_name, active as i64],
        )?;
        Ok(changed > 0)
    }

    /// Remove an app from the set. Returns false if it was not recorded.
    pub fn delete_restricted_app(&self, package_name: &str) -> Result<bool, DatabaseError> {
        let changed = self.conn.execute(
            "DELETE FROM restricted_apps WHERE package_name = ?1",
            params![package_name],
        )?;
        Ok(changed > 0)
    }

    // ── Claimed submissions ──────────────────────────────────────────

    /// Record a claim. Returns false if the submission was already claimed.
    pub fn claim_submission(&self, submission_id: i64, claimed_at: DateTime<Utc>) -> Result<bool, DatabaseError> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO claimed_submissions (submission_id, claimed_at) VALUES (?1, ?2)",
            params![submission_id, claimed_at.to_rfc3339()],
        )?;
        Ok(inserted > 0)
    }

    // ── Key-value ────────────────────────────────────────────────────

    /// Get a value from the kv store.
    pub fn kv_get(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Set a value in the kv store.
    pub fn kv_set(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }
}

/// Lock a shared database, mapping poisoning to a database error.
pub(crate) fn lock(db: &SharedDatabase) -> Result<MutexGuard<'_, Database>> {
    db.lock().map_err(|_| CoreError::Database(DatabaseError::Poisoned))
}

fn to_sql_ms(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wallet_starts_absent() {
        let db = Database::open_memory().unwrap();
        assert_eq!(db.wallet_balance().unwrap(), None);
        db.set_wallet_balance(5_000).unwrap();
        assert_eq!(db.wallet_balance().unwrap(), Some(5_000));
    }

    #[test]
    fn add_uses_base_for_missing_row_and_saturates() {
        let db = Database::open_memory().unwrap();
        assert_eq!(db.add_wallet_balance(1_000, 120_000).unwrap(), 121_000);
        assert_eq!(db.add_wallet_balance(-500_000, 120_000).unwrap(), 0);
    }

    #[test]
    fn restricted_apps_toggle_and_delete() {
        let db = Database::open_memory().unwrap();
        db.upsert_restricted_app(&RestrictedApp::new("com.instagram.android", "Instagram"))
            .unwrap();
        assert!(db.set_restricted_app_active("com.instagram.android", false).unwrap());
        assert!(!db.set_restricted_app_active("com.unknown", false).unwrap());

        let apps = db.list_restricted_apps().unwrap();
        assert_eq!(apps.len(), 1);
        assert!(!apps[0].active);

        assert!(db.delete_restricted_app("com.instagram.android").unwrap());
        assert!(db.list_restricted_apps().unwrap().is_empty());
    }

    #[test]
    fn submissions_are_claimed_once() {
        let db = Database::open_memory().unwrap();
        assert!(db.claim_submission(42, Utc::now()).unwrap());
        assert!(!db.claim_submission(42, Utc::now()).unwrap());
        assert!(db.claim_submission(43, Utc::now()).unwrap());
    }

    #[test]
    fn kv_store() {
        let db = Database::open_memory().unwrap();
        assert!(db.kv_get("test").unwrap().is_none());
        db.kv_set("test", "hello").unwrap();
        assert_eq!(db.kv_get("test").unwrap().unwrap(), "hello");
    }
}
