//! Lock state machine.
//!
//! The machine owns the enforcement session and decides every transition.
//! Like the rest of the core it has no internal timer: the caller feeds it
//! foreground events, restricted-set changes and balance changes, and calls
//! [`LockMachine::tick`] once per tick interval while
//! [`LockMachine::is_ticking`] is true.
//!
//! ## State Transitions
//!
//! ```text
//! Idle --restricted--> Countdown --tick to 0--> Exhausted
//!  ^                       |                        |
//!  +----- unrestricted ----+                        |
//!  +---------------- unrestricted (overlay released)+
//! Exhausted --restricted, balance > 0--> Countdown
//! ```
//!
//! Switching between restricted apps keeps one continuous session.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::balance::TimeBalanceStore;
use crate::events::LockEvent;
use crate::overlay::OverlayPresenter;
use crate::restricted::ActiveSet;
use crate::storage::LockConfig;

/// Externally visible phase of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockPhase {
    Idle,
    Countdown,
    Exhausted,
}

/// Snapshot published to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockState {
    pub phase: LockPhase,
    /// The app the current session is charged against.
    pub app_id: Option<String>,
    /// In-memory balance of the current session.
    pub remaining_ms: Option<u64>,
    /// Whether the engine has asked for the overlay. The presenter does not
    /// acknowledge, so this can be true while nothing is on screen.
    pub overlay_requested: bool,
}

impl Default for LockState {
    fn default() -> Self {
        Self {
            phase: LockPhase::Idle,
            app_id: None,
            remaining_ms: None,
            overlay_requested: false,
        }
    }
}

/// Tuning for the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockSettings {
    pub tick_ms: u64,
    /// How often a locked engine re-reads storage shared with other processes.
    pub sync_ms: u64,
    pub default_balance_ms: u64,
    pub hold_overlay_after_exhaustion: bool,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self::from(&LockConfig::default())
    }
}

impl From<&LockConfig> for LockSettings {
    fn from(config: &LockConfig) -> Self {
        Self {
            tick_ms: config.tick_ms.max(1),
            sync_ms: config.sync_ms.max(1),
            default_balance_ms: config.default_balance_ms,
            hold_overlay_after_exhaustion: config.hold_overlay_after_exhaustion,
        }
    }
}

#[derive(Debug)]
struct Session {
    app_id: String,
    /// In-memory balance, saves a store round-trip per tick.
    snapshot_ms: u64,
    /// Last value this machine wrote (or read) from the store. A stored
    /// value that differs came from another writer.
    persisted_ms: u64,
}

/// Enforcement state machine.
pub struct LockMachine {
    store: Arc<dyn TimeBalanceStore>,
    overlay: Arc<dyn OverlayPresenter>,
    settings: LockSettings,
    phase: LockPhase,
    session: Option<Session>,
    overlay_requested: bool,
    /// Last non-host app reported in the foreground.
    foreground: Option<String>,
}

impl LockMachine {
    pub fn new(
        store: Arc<dyn TimeBalanceStore>,
        overlay: Arc<dyn OverlayPresenter>,
        settings: LockSettings,
    ) -> Self {
        Self {
            store,
            overlay,
            settings,
            phase: LockPhase::Idle,
            session: None,
            overlay_requested: false,
            foreground: None,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn phase(&self) -> LockPhase {
        self.phase
    }

    pub fn settings(&self) -> &LockSettings {
        &self.settings
    }

    /// True while a countdown should be ticking.
    pub fn is_ticking(&self) -> bool {
        self.phase == LockPhase::Countdown
    }

    pub fn state(&self) -> LockState {
        LockState {
            phase: self.phase,
            app_id: self.session.as_ref().map(|s| s.app_id.clone()),
            remaining_ms: self.session.as_ref().map(|s| s.snapshot_ms),
            overlay_requested: self.overlay_requested,
        }
    }

    // ── Inputs ───────────────────────────────────────────────────────

    /// The system foreground moved to `app_id`.
    ///
    /// Host-app events must already be filtered out by the watcher.
    pub fn on_foreground(&mut self, app_id: &str, active: &ActiveSet) -> Vec<LockEvent> {
        self.foreground = Some(app_id.to_string());
        let restricted = active.contains(app_id);

        match (self.phase, restricted) {
            (LockPhase::Idle, true) => self.start_session(app_id),
            (LockPhase::Idle, false) => Vec::new(),
            (LockPhase::Countdown, true) => {
                // Same session, possibly a different restricted app.
                if let Some(session) = self.session.as_mut() {
                    session.app_id = app_id.to_string();
                }
                Vec::new()
            }
            (LockPhase::Countdown, false) => self.stop_session(),
            (LockPhase::Exhausted, true) => self.reenter(app_id),
            (LockPhase::Exhausted, false) if self.settings.hold_overlay_after_exhaustion => Vec::new(),
            (LockPhase::Exhausted, false) => self.release(),
        }
    }

    /// Charge one tick. Only meaningful during a countdown.
    pub fn tick(&mut self) -> Vec<LockEvent> {
        if self.phase != LockPhase::Countdown {
            return Vec::new();
        }
        let mut events = self.reconcile();
        if self.phase != LockPhase::Countdown {
            return events;
        }
        let tick_ms = self.settings.tick_ms;

        let Some(session) = self.session.as_mut() else {
            return events;
        };
        session.snapshot_ms = session.snapshot_ms.saturating_sub(tick_ms);
        let remaining_ms = session.snapshot_ms;
        self.persist(remaining_ms);
        tracing::debug!(remaining_secs = remaining_ms / 1000, "time remaining");
        events.push(LockEvent::CountdownTicked {
            remaining_ms,
            at: Utc::now(),
        });

        if remaining_ms == 0 {
            events.extend(self.exhaust());
        }
        events
    }

    /// The effective restricted set changed.
    pub fn on_restricted_changed(&mut self, active: &ActiveSet) -> Vec<LockEvent> {
        let Some(app_id) = self.session.as_ref().map(|s| s.app_id.clone()) else {
            return Vec::new();
        };
        if active.contains(&app_id) {
            return Vec::new();
        }
        tracing::info!(app_id = %app_id, "locked app lifted from restriction");
        match self.phase {
            LockPhase::Countdown => self.stop_session(),
            LockPhase::Exhausted => self.release(),
            LockPhase::Idle => Vec::new(),
        }
    }

    /// The live balance stream reported `balance_ms`.
    pub fn on_balance_changed(&mut self, balance_ms: u64, active: &ActiveSet) -> Vec<LockEvent> {
        match self.phase {
            LockPhase::Countdown => {
                let Some(session) = self.session.as_mut() else {
                    return Vec::new();
                };
                if balance_ms == session.persisted_ms {
                    return Vec::new();
                }
                let previous_ms = session.snapshot_ms;
                session.snapshot_ms = balance_ms;
                session.persisted_ms = balance_ms;
                tracing::info!(previous_ms, balance_ms, "adopted balance written elsewhere");
                let mut events = vec![LockEvent::BalanceAdopted {
                    previous_ms,
                    balance_ms,
                    at: Utc::now(),
                }];
                if balance_ms == 0 {
                    events.extend(self.exhaust());
                }
                events
            }
            LockPhase::Exhausted if self.settings.hold_overlay_after_exhaustion && balance_ms > 0 => {
                let on_restricted = self
                    .foreground
                    .as_deref()
                    .is_some_and(|app| active.contains(app));
                if on_restricted {
                    // Needs a fresh foreground event to resume.
                    Vec::new()
                } else {
                    self.release()
                }
            }
            _ => Vec::new(),
        }
    }

    /// Lifecycle resume: re-evaluate the last known foreground app.
    pub fn resume(&mut self, active: &ActiveSet) -> Vec<LockEvent> {
        if self.phase != LockPhase::Exhausted {
            return Vec::new();
        }
        match self.foreground.clone() {
            Some(app_id) if active.contains(&app_id) => self.reenter(&app_id),
            _ => Vec::new(),
        }
    }

    /// Engine teardown: flush, stop ticking, release the overlay.
    pub fn teardown(&mut self) -> Vec<LockEvent> {
        let persisted_ms = match self.phase {
            LockPhase::Countdown => {
                self.reconcile();
                let snapshot_ms = self.session.as_ref().map(|s| s.snapshot_ms);
                if let Some(ms) = snapshot_ms {
                    self.persist(ms);
                }
                snapshot_ms
            }
            _ => None,
        };
        self.hide_overlay();
        self.phase = LockPhase::Idle;
        self.session = None;
        vec![LockEvent::EngineStopped {
            persisted_ms,
            at: Utc::now(),
        }]
    }

    // ── Transitions ──────────────────────────────────────────────────

    fn start_session(&mut self, app_id: &str) -> Vec<LockEvent> {
        let balance_ms = self.read_balance();
        self.session = Some(Session {
            app_id: app_id.to_string(),
            snapshot_ms: balance_ms,
            persisted_ms: balance_ms,
        });

        if balance_ms == 0 {
            return self.exhaust();
        }

        self.hide_overlay();
        self.phase = LockPhase::Countdown;
        tracing::info!(app_id, balance_ms, "starting countdown");
        vec![LockEvent::CountdownStarted {
            app_id: app_id.to_string(),
            balance_ms,
            at: Utc::now(),
        }]
    }

    fn stop_session(&mut self) -> Vec<LockEvent> {
        let mut events = self.reconcile();
        let Some(session) = self.session.take() else {
            self.phase = LockPhase::Idle;
            return events;
        };
        self.persist(session.snapshot_ms);
        self.hide_overlay();
        self.phase = LockPhase::Idle;
        tracing::info!(app_id = %session.app_id, persisted_ms = session.snapshot_ms, "stopping countdown (left app)");
        events.push(LockEvent::CountdownStopped {
            app_id: session.app_id,
            persisted_ms: session.snapshot_ms,
            at: Utc::now(),
        });
        events
    }

    fn exhaust(&mut self) -> Vec<LockEvent> {
        let app_id = match self.session.as_mut() {
            Some(session) => {
                session.snapshot_ms = 0;
                session.app_id.clone()
            }
            None => return Vec::new(),
        };
        self.persist(0);
        self.phase = LockPhase::Exhausted;
        tracing::info!(app_id = %app_id, "time's up, locking screen");
        self.show_overlay();
        vec![LockEvent::BalanceExhausted {
            app_id,
            at: Utc::now(),
        }]
    }

    fn reenter(&mut self, app_id: &str) -> Vec<LockEvent> {
        let balance_ms = self.read_balance();
        if balance_ms > 0 {
            return self.start_session(app_id);
        }
        if let Some(session) = self.session.as_mut() {
            session.app_id = app_id.to_string();
        }
        // Retried so a presenter that failed earlier gets another chance.
        self.show_overlay();
        Vec::new()
    }

    fn release(&mut self) -> Vec<LockEvent> {
        let app_id = self
            .session
            .take()
            .map(|s| s.app_id)
            .unwrap_or_default();
        self.hide_overlay();
        self.phase = LockPhase::Idle;
        vec![LockEvent::OverlayReleased {
            app_id,
            at: Utc::now(),
        }]
    }

    // ── Store and overlay plumbing ───────────────────────────────────

    fn read_balance(&self) -> u64 {
        match self.store.read_once() {
            Ok(balance_ms) => balance_ms,
            Err(e) => {
                tracing::warn!(error = %e, default_ms = self.settings.default_balance_ms, "balance unavailable, using default");
                self.settings.default_balance_ms
            }
        }
    }

    /// Adopt a stored value written by someone else since our last write.
    fn reconcile(&mut self) -> Vec<LockEvent> {
        let Some(session) = self.session.as_ref() else {
            return Vec::new();
        };
        let persisted_ms = session.persisted_ms;
        let observed = match self.store.read_once() {
            Ok(observed) => observed,
            Err(e) => {
                tracing::warn!(error = %e, "could not re-read balance");
                return Vec::new();
            }
        };
        if observed == persisted_ms {
            return Vec::new();
        }
        self.on_balance_changed(observed, &ActiveSet::new())
    }

    fn persist(&mut self, balance_ms: u64) {
        match self.store.set(balance_ms) {
            Ok(()) => {
                if let Some(session) = self.session.as_mut() {
                    session.persisted_ms = balance_ms;
                }
            }
            Err(e) => tracing::warn!(error = %e, balance_ms, "failed to persist balance"),
        }
    }

    fn show_overlay(&mut self) {
        self.overlay_requested = true;
        self.overlay.show();
    }

    fn hide_overlay(&mut self) {
        if self.overlay_requested {
            self.overlay_requested = false;
            self.overlay.hide();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::MemoryBalanceStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingOverlay {
        shows: AtomicUsize,
        hides: AtomicUsize,
    }

    impl OverlayPresenter for CountingOverlay {
        fn show(&self) {
            self.shows.fetch_add(1, Ordering::SeqCst);
        }
        fn hide(&self) {
            self.hides.fetch_add(1, Ordering::SeqCst);
        }
        fn is_shown(&self) -> bool {
            self.shows.load(Ordering::SeqCst) > self.hides.load(Ordering::SeqCst)
        }
        fn trigger_action(&self) {}
    }

    fn active(apps: &[&str]) -> ActiveSet {
        apps.iter().map(|s| s.to_string()).collect()
    }

    fn machine(balance_ms: u64, hold: bool) -> (LockMachine, Arc<MemoryBalanceStore>, Arc<CountingOverlay>) {
        let store = Arc::new(MemoryBalanceStore::with_balance(balance_ms, 120_000));
        let overlay = Arc::new(CountingOverlay::default());
        let settings = LockSettings {
            hold_overlay_after_exhaustion: hold,
            ..LockSettings::default()
        };
        let machine = LockMachine::new(store.clone(), overlay.clone(), settings);
        (machine, store, overlay)
    }

    #[test]
    fn fresh_store_starts_from_default() {
        let store = Arc::new(MemoryBalanceStore::new(120_000));
        let overlay = Arc::new(CountingOverlay::default());
        let mut machine = LockMachine::new(store.clone(), overlay, LockSettings::default());
        let events = machine.on_foreground("a", &active(&["a"]));
        assert!(matches!(
            events.as_slice(),
            [LockEvent::CountdownStarted { balance_ms: 120_000, .. }]
        ));
        assert_eq!(store.peek(), Some(120_000));
    }

    #[test]
    fn unrestricted_foreground_in_idle_is_noop() {
        let (mut machine, store, _) = machine(5_000, false);
        assert!(machine.on_foreground("b", &active(&["a"])).is_empty());
        assert_eq!(machine.phase(), LockPhase::Idle);
        assert_eq!(store.peek(), Some(5_000));
    }

    #[test]
    fn countdown_flushes_on_exit() {
        let (mut machine, store, overlay) = machine(5_000, false);
        let set = active(&["a"]);
        machine.on_foreground("a", &set);
        machine.tick();
        machine.tick();
        let events = machine.on_foreground("b", &set);
        assert!(matches!(
            events.as_slice(),
            [LockEvent::CountdownStopped { persisted_ms: 3_000, .. }]
        ));
        assert_eq!(store.peek(), Some(3_000));
        assert_eq!(machine.phase(), LockPhase::Idle);
        assert_eq!(overlay.shows.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn switching_restricted_apps_keeps_session() {
        let (mut machine, store, _) = machine(10_000, false);
        let set = active(&["a", "b"]);
        machine.on_foreground("a", &set);
        machine.tick();
        assert!(machine.on_foreground("b", &set).is_empty());
        machine.tick();
        assert!(machine.on_foreground("a", &set).is_empty());
        assert!(machine.on_foreground("a", &set).is_empty());
        machine.tick();
        assert_eq!(store.peek(), Some(7_000));
        assert_eq!(machine.state().app_id.as_deref(), Some("a"));
    }

    #[test]
    fn exhaustion_shows_overlay_once() {
        let (mut machine, store, overlay) = machine(2_000, false);
        machine.on_foreground("a", &active(&["a"]));
        machine.tick();
        let events = machine.tick();
        assert!(matches!(events.last(), Some(LockEvent::BalanceExhausted { .. })));
        assert_eq!(machine.phase(), LockPhase::Exhausted);
        assert!(!machine.is_ticking());
        assert!(machine.tick().is_empty());
        assert_eq!(store.peek(), Some(0));
        assert_eq!(overlay.shows.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_balance_exhausts_on_entry() {
        let (mut machine, _, overlay) = machine(0, false);
        let events = machine.on_foreground("a", &active(&["a"]));
        assert!(matches!(events.as_slice(), [LockEvent::BalanceExhausted { .. }]));
        assert!(overlay.is_shown());
    }

    #[test]
    fn leaving_exhausted_app_releases_overlay() {
        let (mut machine, _, overlay) = machine(1_000, false);
        let set = active(&["a"]);
        machine.on_foreground("a", &set);
        machine.tick();
        let events = machine.on_foreground("b", &set);
        assert!(matches!(events.as_slice(), [LockEvent::OverlayReleased { .. }]));
        assert!(!overlay.is_shown());
        assert_eq!(machine.phase(), LockPhase::Idle);
    }

    #[test]
    fn hold_policy_keeps_overlay_until_balance_returns() {
        let (mut machine, store, overlay) = machine(1_000, true);
        let set = active(&["a"]);
        machine.on_foreground("a", &set);
        machine.tick();
        assert!(machine.on_foreground("launcher", &set).is_empty());
        assert!(overlay.is_shown());
        assert_eq!(machine.phase(), LockPhase::Exhausted);

        let balance = store.add(60_000).unwrap();
        let events = machine.on_balance_changed(balance, &set);
        assert!(matches!(events.as_slice(), [LockEvent::OverlayReleased { .. }]));
        assert!(!overlay.is_shown());
    }

    #[test]
    fn reward_while_exhausted_needs_reentry() {
        let (mut machine, store, overlay) = machine(1_000, false);
        let set = active(&["a"]);
        machine.on_foreground("a", &set);
        machine.tick();

        let balance = store.add(1_800_000).unwrap();
        assert!(machine.on_balance_changed(balance, &set).is_empty());
        assert_eq!(machine.phase(), LockPhase::Exhausted);

        let events = machine.on_foreground("a", &set);
        assert!(matches!(
            events.as_slice(),
            [LockEvent::CountdownStarted { balance_ms: 1_800_000, .. }]
        ));
        assert!(!overlay.is_shown());
    }

    #[test]
    fn resume_reevaluates_foreground_app() {
        let (mut machine, store, _) = machine(1_000, false);
        let set = active(&["a"]);
        machine.on_foreground("a", &set);
        machine.tick();
        assert!(machine.resume(&set).is_empty());

        store.add(5_000).unwrap();
        let events = machine.resume(&set);
        assert!(matches!(events.as_slice(), [LockEvent::CountdownStarted { .. }]));
    }

    #[test]
    fn lifting_restriction_mid_countdown_goes_idle() {
        let (mut machine, store, _) = machine(10_000, false);
        machine.on_foreground("a", &active(&["a"]));
        machine.tick();
        let events = machine.on_restricted_changed(&active(&[]));
        assert!(matches!(events.as_slice(), [LockEvent::CountdownStopped { persisted_ms: 9_000, .. }]));
        assert_eq!(machine.phase(), LockPhase::Idle);
        assert_eq!(store.peek(), Some(9_000));
    }

    #[test]
    fn tick_adopts_out_of_band_reward() {
        let (mut machine, store, _) = machine(10_000, false);
        machine.on_foreground("a", &active(&["a"]));
        machine.tick();
        store.add(1_800_000).unwrap();
        let events = machine.tick();
        assert!(matches!(
            events.first(),
            Some(LockEvent::BalanceAdopted { previous_ms: 9_000, balance_ms: 1_809_000, .. })
        ));
        assert_eq!(store.peek(), Some(1_808_000));
    }

    #[test]
    fn own_writes_are_not_adopted() {
        let (mut machine, store, _) = machine(10_000, false);
        let set = active(&["a"]);
        machine.on_foreground("a", &set);
        machine.tick();
        assert!(machine.on_balance_changed(store.peek().unwrap(), &set).is_empty());
    }

    #[test]
    fn teardown_flushes_and_hides() {
        let (mut machine, store, overlay) = machine(1_000, false);
        machine.on_foreground("a", &active(&["a"]));
        machine.tick();
        assert!(overlay.is_shown());
        let events = machine.teardown();
        assert!(matches!(events.as_slice(), [LockEvent::EngineStopped { persisted_ms: None, .. }]));
        assert!(!overlay.is_shown());
        assert_eq!(store.peek(), Some(0));
    }
}
