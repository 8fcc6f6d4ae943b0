//! Restricted app set.
//!
//! Apps are recorded with an active toggle; recording an app and locking it
//! are separate so a user can keep an app in the list but temporarily
//! unlock it. The lock engine only ever sees the effective set: the
//! identifiers currently marked active.

use std::collections::{BTreeSet, HashSet};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::Result;
use crate::storage::database::{self, SharedDatabase};

/// The identifiers currently under lock policy.
pub type ActiveSet = HashSet<String>;

/// One recorded app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestrictedApp {
    pub package_name: String,
    pub app_name: String,
    pub active: bool,
}

impl RestrictedApp {
    /// A newly recorded app, active by default.
    pub fn new(package_name: impl Into<String>, app_name: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            app_name: app_name.into(),
            active: true,
        }
    }
}

/// Durable, live-observable set of restricted apps.
pub trait RestrictedSet: Send + Sync {
    /// Live stream of the effective (active) set.
    fn subscribe(&self) -> watch::Receiver<ActiveSet>;

    /// Every recorded app, active or not.
    fn list(&self) -> Result<Vec<RestrictedApp>>;

    /// Record an app, replacing any previous entry with the same identifier.
    fn upsert(&self, app: RestrictedApp) -> Result<()>;

    /// Toggle an app's active flag. Returns false if it is not recorded.
    fn set_active(&self, package_name: &str, active: bool) -> Result<bool>;

    /// Forget an app. Returns false if it is not recorded.
    fn remove(&self, package_name: &str) -> Result<bool>;

    /// Bring the live stream up to date with the backing storage.
    fn refresh(&self) -> Result<()> {
        Ok(())
    }

    /// The effective set right now.
    fn active(&self) -> Result<ActiveSet> {
        Ok(effective(&self.list()?))
    }

    /// Record `defaults` if nothing has been recorded yet. Returns how many
    /// apps were added.
    fn seed_if_empty(&self, defaults: &[String]) -> Result<usize> {
        if !self.list()?.is_empty() {
            return Ok(0);
        }
        let unique: BTreeSet<&String> = defaults.iter().collect();
        for package_name in &unique {
            self.upsert(RestrictedApp::new(package_name.as_str(), ""))?;
        }
        Ok(unique.len())
    }
}

fn effective(apps: &[RestrictedApp]) -> ActiveSet {
    apps.iter()
        .filter(|app| app.active)
        .map(|app| app.package_name.clone())
        .collect()
}

/// Restricted set backed by the `restricted_apps` table.
pub struct SqliteRestrictedSet {
    db: SharedDatabase,
    tx: watch::Sender<ActiveSet>,
}

impl SqliteRestrictedSet {
    pub fn new(db: SharedDatabase) -> Result<Self> {
        let initial = effective(&database::lock(&db)?.list_restricted_apps()?);
        let (tx, _rx) = watch::channel(initial);
        Ok(Self { db, tx })
    }
}

impl RestrictedSet for SqliteRestrictedSet {
    fn subscribe(&self) -> watch::Receiver<ActiveSet> {
        self.tx.subscribe()
    }

    /// Re-read the table and notify subscribers if the effective set moved.
    ///
    /// Picks up writes made through other connections, including other
    /// processes.
    fn refresh(&self) -> Result<()> {
        let db = database::lock(&self.db)?;
        let active = effective(&db.list_restricted_apps()?);
        self.tx.send_if_modified(|current| {
            if *current == active {
                false
            } else {
                tracing::debug!(count = active.len(), "restricted set updated");
                *current = active;
                true
            }
        });
        Ok(())
    }

    fn list(&self) -> Result<Vec<RestrictedApp>> {
        Ok(database::lock(&self.db)?.list_restricted_apps()?)
    }

    fn upsert(&self, app: RestrictedApp) -> Result<()> {
        database::lock(&self.db)?.upsert_restricted_app(&app)?;
        self.refresh()
    }

    fn set_active(&self, package_name: &str, active: bool) -> Result<bool> {
        let changed = database::lock(&self.db)?.set_restricted_app_active(package_name, active)?;
        self.refresh()?;
        Ok(changed)
    }

    fn remove(&self, package_name: &str) -> Result<bool> {
        let removed = database::lock(&self.db)?.delete_restricted_app(package_name)?;
        self.refresh()?;
        Ok(removed)
    }
}

/// In-memory restricted set for tests and embedding.
pub struct MemoryRestrictedSet {
    apps: Mutex<Vec<RestrictedApp>>,
    tx: watch::Sender<ActiveSet>,
}

impl MemoryRestrictedSet {
    /// A set with each of `package_names` recorded and active.
    pub fn with_active<I, S>(package_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let apps: Vec<RestrictedApp> = package_names
            .into_iter()
            .map(|name| RestrictedApp::new(name, ""))
            .collect();
        let (tx, _rx) = watch::channel(effective(&apps));
        Self {
            apps: Mutex::new(apps),
            tx,
        }
    }

    fn update<T>(&self, f: impl FnOnce(&mut Vec<RestrictedApp>) -> T) -> T {
        let mut apps = self.apps.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let out = f(&mut apps);
        let active = effective(&apps);
        drop(apps);
        self.tx.send_if_modified(|current| {
            let changed = *current != active;
            *current = active;
            changed
        });
        out
    }
}

impl RestrictedSet for MemoryRestrictedSet {
    fn subscribe(&self) -> watch::Receiver<ActiveSet> {
        self.tx.subscribe()
    }

    fn list(&self) -> Result<Vec<RestrictedApp>> {
        Ok(self.update(|apps| apps.clone()))
    }

    fn upsert(&self, app: RestrictedApp) -> Result<()> {
        self.update(|apps| {
            apps.retain(|existing| existing.package_name != app.package_name);
            apps.push(app);
        });
        Ok(())
    }

    fn set_active(&self, package_name: &str, active: bool) -> Result<bool> {
        Ok(self.update(|apps| {
            match apps.iter_mut().find(|app| app.package_name == package_name) {
                Some(app) => {
                    app.active = active;
                    true
                }
                None => false,
            }
        }))
    }

    fn remove(&self, package_name: &str) -> Result<bool> {
        Ok(self.update(|apps| {
            let before = apps.len();
            apps.retain(|app| app.package_name != package_name);
            apps.len() != before
        }))
    }
}
