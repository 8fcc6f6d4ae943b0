//! Time balance store.
//!
//! The balance is a single non-negative millisecond counter shared between
//! the lock engine (which decrements it while enforcing) and the reward path
//! (which increments it). The two writers do not coordinate: a concurrent
//! `set` and `add` may race, last write wins, and either ordering is
//! acceptable. The engine bounds the damage by re-reading the store once per
//! tick and adopting any value it did not write itself.
//!
//! [`TimeBalanceStore::subscribe`] is a live stream of the balance as seen by
//! this process. Writes made by other processes show up there on the next
//! [`TimeBalanceStore::read_once`].

use std::sync::{Mutex, MutexGuard};

use tokio::sync::watch;

use crate::error::Result;
use crate::storage::database::{self, SharedDatabase};

/// Durable single-value counter of remaining milliseconds.
pub trait TimeBalanceStore: Send + Sync {
    /// Live stream of the current balance.
    fn subscribe(&self) -> watch::Receiver<u64>;

    /// Current balance, initializing it to the default if never set.
    fn read_once(&self) -> Result<u64>;

    /// Overwrite the balance.
    fn set(&self, balance_ms: u64) -> Result<()>;

    /// Move the balance by `delta_ms`, clamping at zero. Returns the new value.
    fn add(&self, delta_ms: i64) -> Result<u64>;
}

/// Balance store backed by the `wallet` table.
pub struct SqliteBalanceStore {
    db: SharedDatabase,
    default_ms: u64,
    tx: watch::Sender<u64>,
}

impl SqliteBalanceStore {
    /// Create a store over a shared database.
    ///
    /// The live stream starts at the persisted value (or the default).
    pub fn new(db: SharedDatabase, default_ms: u64) -> Result<Self> {
        let initial = database::lock(&db)?.wallet_balance()?.unwrap_or(default_ms);
        let (tx, _rx) = watch::channel(initial);
        Ok(Self { db, default_ms, tx })
    }

    fn publish(&self, balance_ms: u64) {
        self.tx.send_if_modified(|current| {
            if *current == balance_ms {
                false
            } else {
                *current = balance_ms;
                true
            }
        });
    }
}

impl TimeBalanceStore for SqliteBalanceStore {
    fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }

    fn read_once(&self) -> Result<u64> {
        let db = database::lock(&self.db)?;
        let balance = match db.wallet_balance()? {
            Some(balance) => balance,
            None => {
                tracing::info!(default_ms = self.default_ms, "initializing time wallet");
                db.set_wallet_balance(self.default_ms)?;
                self.default_ms
            }
        };
        // Published under the guard so writers in this process publish in
        // the order they wrote.
        self.publish(balance);
        Ok(balance)
    }

    fn set(&self, balance_ms: u64) -> Result<()> {
        let db = database::lock(&self.db)?;
        db.set_wallet_balance(balance_ms)?;
        self.publish(balance_ms);
        Ok(())
    }

    fn add(&self, delta_ms: i64) -> Result<u64> {
        let db = database::lock(&self.db)?;
        let balance = db.add_wallet_balance(delta_ms, self.default_ms)?;
        self.publish(balance);
        Ok(balance)
    }
}

/// In-memory balance store for tests and embedding.
pub struct MemoryBalanceStore {
    value: Mutex<Option<u64>>,
    default_ms: u64,
    tx: watch::Sender<u64>,
}

impl MemoryBalanceStore {
    /// A store that has never been written; the first read yields `default_ms`.
    pub fn new(default_ms: u64) -> Self {
        let (tx, _rx) = watch::channel(default_ms);
        Self {
            value: Mutex::new(None),
            default_ms,
            tx,
        }
    }

    /// A store already holding `balance_ms`.
    pub fn with_balance(balance_ms: u64, default_ms: u64) -> Self {
        let store = Self::new(default_ms);
        *store.slot() = Some(balance_ms);
        store.tx.send_replace(balance_ms);
        store
    }

    /// The stored value without initializing it.
    pub fn peek(&self) -> Option<u64> {
        *self.slot()
    }

    fn slot(&self) -> MutexGuard<'_, Option<u64>> {
        self.value.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Callers hold the slot guard while publishing.
    fn publish(&self, balance_ms: u64) {
        self.tx.send_if_modified(|current| {
            let changed = *current != balance_ms;
            *current = balance_ms;
            changed
        });
    }
}

impl TimeBalanceStore for MemoryBalanceStore {
    fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }

    fn read_once(&self) -> Result<u64> {
        let mut slot = self.slot();
        let balance = *slot.get_or_insert(self.default_ms);
        self.publish(balance);
        Ok(balance)
    }

    fn set(&self, balance_ms: u64) -> Result<()> {
        let mut slot = self.slot();
        *slot = Some(balance_ms);
        self.publish(balance_ms);
        Ok(())
    }

    fn add(&self, delta_ms: i64) -> Result<u64> {
        let mut slot = self.slot();
        let balance = slot.unwrap_or(self.default_ms).saturating_add_signed(delta_ms);
        *slot = Some(balance);
        self.publish(balance);
        Ok(balance)
    }
}
