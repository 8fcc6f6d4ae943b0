//! Integration tests for the lock engine runtime.
//!
//! Time is paused, so every sleep below advances the mock clock. Checks are
//! made half a tick away from tick boundaries.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use codeearn_core::{
    EngineHandle, EnforcementEngine, ForegroundSource, ForegroundWatcher, LockEvent, LockPhase,
    LockSettings, MemoryBalanceStore, MemoryRestrictedSet, OverlayContent, OverlayError,
    OverlayPresenter, OverlaySurface, OverlayWindowManager, RawSignal, RestrictedSet,
    TimeBalanceStore,
};

const HOST: &str = "com.example.codeforcesapplocker";
const DEFAULT_MS: u64 = 120_000;

#[derive(Default)]
struct CountingOverlay {
    shows: AtomicUsize,
    hides: AtomicUsize,
    instances: AtomicUsize,
}

impl CountingOverlay {
    fn shows(&self) -> usize {
        self.shows.load(Ordering::SeqCst)
    }
}

impl OverlayPresenter for CountingOverlay {
    fn show(&self) {
        self.shows.fetch_add(1, Ordering::SeqCst);
        if !self.is_shown() {
            self.instances.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn hide(&self) {
        self.hides.fetch_add(1, Ordering::SeqCst);
        if self.is_shown() {
            self.instances.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn is_shown(&self) -> bool {
        self.instances.load(Ordering::SeqCst) > 0
    }

    fn trigger_action(&self) {}
}

struct Harness {
    source: ForegroundSource,
    handle: EngineHandle,
    store: Arc<MemoryBalanceStore>,
    restricted: Arc<MemoryRestrictedSet>,
    overlay: Arc<CountingOverlay>,
}

impl Harness {
    fn spawn(balance_ms: Option<u64>, restricted: &[&str], hold: bool) -> Self {
        let store = Arc::new(match balance_ms {
            Some(balance_ms) => MemoryBalanceStore::with_balance(balance_ms, DEFAULT_MS),
            None => MemoryBalanceStore::new(DEFAULT_MS),
        });
        let restricted = Arc::new(MemoryRestrictedSet::with_active(restricted.iter().copied()));
        let overlay = Arc::new(CountingOverlay::default());
        let settings = LockSettings {
            tick_ms: 1_000,
            sync_ms: 2_000,
            default_balance_ms: DEFAULT_MS,
            hold_overlay_after_exhaustion: hold,
        };
        let (source, watcher) = ForegroundWatcher::channel(HOST);
        let handle = EnforcementEngine::new(settings, store.clone(), restricted.clone(), overlay.clone())
            .spawn(watcher);
        Self {
            source,
            handle,
            store,
            restricted,
            overlay,
        }
    }

    /// Report `app` in the foreground and let the engine handle it.
    async fn open(&self, app: &str) {
        assert!(self.source.send(RawSignal::window_changed(app)).await);
        advance(10).await;
    }

    fn phase(&self) -> LockPhase {
        self.handle.state().borrow().phase
    }

    fn balance(&self) -> Option<u64> {
        self.store.peek()
    }
}

async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn countdown_drains_balance_and_shows_overlay_once() {
    let h = Harness::spawn(Some(3_000), &["com.a"], false);
    h.open("com.a").await;
    assert_eq!(h.phase(), LockPhase::Countdown);

    advance(1_490).await; // t = 1500
    assert_eq!(h.balance(), Some(2_000));
    assert!(!h.overlay.is_shown());

    advance(2_000).await; // t = 3500
    assert_eq!(h.balance(), Some(0));
    assert_eq!(h.phase(), LockPhase::Exhausted);
    assert!(h.overlay.is_shown());
    assert_eq!(h.overlay.shows(), 1);

    // Nothing ticks once exhausted.
    advance(5_000).await;
    assert_eq!(h.balance(), Some(0));
    assert_eq!(h.overlay.shows(), 1);
}

#[tokio::test(start_paused = true)]
async fn leaving_exhausted_app_releases_overlay_by_default() {
    let h = Harness::spawn(Some(3_000), &["com.a"], false);
    h.open("com.a").await;
    advance(3_490).await;
    assert!(h.overlay.is_shown());

    h.open("com.launcher").await;
    assert!(!h.overlay.is_shown());
    assert_eq!(h.phase(), LockPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn hold_policy_keeps_overlay_until_balance_increases() {
    let h = Harness::spawn(Some(3_000), &["com.a"], true);
    h.open("com.a").await;
    advance(3_490).await; // t = 3500
    assert!(h.overlay.is_shown());

    h.open("com.launcher").await;
    advance(10_000).await;
    assert!(h.overlay.is_shown());
    assert_eq!(h.phase(), LockPhase::Exhausted);

    h.store.add(1_800_000).unwrap();
    advance(10).await;
    assert!(!h.overlay.is_shown());
    assert_eq!(h.phase(), LockPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn early_exit_hides_nothing_and_flushes_once() {
    let h = Harness::spawn(Some(10_000), &["com.a"], false);
    h.open("com.a").await;
    advance(3_480).await; // t = 3490
    h.open("com.b").await;
    assert_eq!(h.balance(), Some(7_000));
    assert_eq!(h.phase(), LockPhase::Idle);
    assert_eq!(h.overlay.shows(), 0);

    // Further unrestricted apps do not write to the store.
    h.store.set(42_000).unwrap();
    h.open("com.c").await;
    h.open("com.d").await;
    advance(5_000).await;
    assert_eq!(h.balance(), Some(42_000));
}

#[tokio::test(start_paused = true)]
async fn alternating_restricted_apps_is_one_session() {
    let h = Harness::spawn(Some(10_000), &["com.a", "com.b"], false);
    let mut events = h.handle.events();

    h.open("com.a").await;
    for app in ["com.b", "com.a", "com.b", "com.a", "com.b"] {
        advance(990).await;
        h.open(app).await;
    }
    // Ticks at 1000 through 5000, each switch landing on a tick boundary.
    advance(400).await;
    assert_eq!(h.balance(), Some(5_000));

    let mut started = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, LockEvent::CountdownStarted { .. }) {
            started += 1;
        }
    }
    assert_eq!(started, 1);
}

#[tokio::test(start_paused = true)]
async fn host_app_glance_keeps_overlay() {
    let h = Harness::spawn(Some(1_000), &["com.a"], false);
    h.open("com.a").await;
    advance(1_490).await;
    assert!(h.overlay.is_shown());

    h.open(HOST).await;
    assert!(h.overlay.is_shown());
    assert_eq!(h.phase(), LockPhase::Exhausted);
}

#[tokio::test(start_paused = true)]
async fn reward_while_exhausted_resumes_on_reentry() {
    let h = Harness::spawn(Some(1_000), &["com.a"], false);
    h.open("com.a").await;
    advance(1_490).await; // t = 1500
    assert_eq!(h.phase(), LockPhase::Exhausted);

    h.store.add(1_800_000).unwrap();
    advance(1_000).await;
    // Not a trigger on its own.
    assert_eq!(h.phase(), LockPhase::Exhausted);
    assert_eq!(h.balance(), Some(1_800_000));

    h.open("com.a").await; // re-entered at t = 2500
    assert_eq!(h.phase(), LockPhase::Countdown);
    assert!(!h.overlay.is_shown());

    advance(2_490).await; // t = 5000, ticks at 3500 and 4500
    assert_eq!(h.balance(), Some(1_798_000));
}

#[tokio::test(start_paused = true)]
async fn resume_command_reevaluates_after_reward() {
    let h = Harness::spawn(Some(1_000), &["com.a"], false);
    h.open("com.a").await;
    advance(1_490).await;
    h.store.add(60_000).unwrap();
    h.handle.resume().await;
    advance(10).await;
    assert_eq!(h.phase(), LockPhase::Countdown);
}

#[tokio::test(start_paused = true)]
async fn resume_trigger_works_from_sync_code() {
    let h = Harness::spawn(Some(1_000), &["com.a"], false);
    h.open("com.a").await;
    advance(1_490).await;
    assert_eq!(h.phase(), LockPhase::Exhausted);

    let trigger = h.handle.resume_trigger();
    // Without time the same app stays locked.
    assert!(trigger.trigger());
    advance(10).await;
    assert_eq!(h.phase(), LockPhase::Exhausted);

    h.store.add(60_000).unwrap();
    assert!(trigger.clone().trigger());
    advance(10).await;
    assert_eq!(h.phase(), LockPhase::Countdown);
    assert!(!h.overlay.is_shown());

    let Harness { handle, .. } = h;
    handle.shutdown().await;
    assert!(!trigger.trigger());
}

#[tokio::test(start_paused = true)]
async fn out_of_band_reward_mid_countdown_is_not_lost() {
    let h = Harness::spawn(Some(10_000), &["com.a"], false);
    h.open("com.a").await;
    advance(2_490).await; // t = 2500, balance 8000
    h.store.add(60_000).unwrap();
    advance(1_000).await; // t = 3500, one more tick at 3000
    assert_eq!(h.balance(), Some(67_000));
}

#[tokio::test(start_paused = true)]
async fn lifting_restriction_mid_countdown_stops_immediately() {
    let h = Harness::spawn(Some(10_000), &["com.a"], false);
    h.open("com.a").await;
    advance(2_490).await; // t = 2500
    h.restricted.set_active("com.a", false).unwrap();
    advance(10).await;
    assert_eq!(h.phase(), LockPhase::Idle);
    assert_eq!(h.balance(), Some(8_000));

    advance(5_000).await;
    assert_eq!(h.balance(), Some(8_000));
}

#[tokio::test(start_paused = true)]
async fn missing_balance_starts_from_default() {
    let h = Harness::spawn(None, &["com.a"], false);
    h.open("com.a").await;
    advance(1_490).await;
    assert_eq!(h.balance(), Some(DEFAULT_MS - 1_000));
}

#[tokio::test(start_paused = true)]
async fn closed_source_keeps_lock_engaged() {
    let Harness {
        source,
        handle,
        store: _store,
        restricted: _restricted,
        overlay,
    } = Harness::spawn(Some(1_000), &["com.a"], false);
    assert!(source.send(RawSignal::window_changed("com.a")).await);
    advance(1_500).await;
    drop(source);
    advance(1_000).await;
    assert!(overlay.is_shown());
    assert_eq!(handle.state().borrow().phase, LockPhase::Exhausted);
}

#[tokio::test(start_paused = true)]
async fn shutdown_flushes_and_releases() {
    let h = Harness::spawn(Some(10_000), &["com.a"], false);
    h.open("com.a").await;
    advance(2_490).await;
    let Harness { handle, store, .. } = h;
    handle.shutdown().await;
    assert_eq!(store.peek(), Some(8_000));

    advance(5_000).await;
    assert_eq!(store.peek(), Some(8_000));
}

struct RefusingSurface;

impl OverlaySurface for RefusingSurface {
    fn attach(&mut self, _content: &OverlayContent) -> Result<(), OverlayError> {
        Err(OverlayError::PermissionDenied("overlay permission revoked".into()))
    }

    fn detach(&mut self) -> Result<(), OverlayError> {
        Ok(())
    }
}

/// The presenter gives no acknowledgement: a failed show leaves the engine
/// believing the overlay is up. This pins that gap down so it stays visible.
#[tokio::test(start_paused = true)]
async fn overlay_failure_is_not_observed_by_engine() {
    let store = Arc::new(MemoryBalanceStore::with_balance(1_000, DEFAULT_MS));
    let restricted = Arc::new(MemoryRestrictedSet::with_active(["com.a"]));
    let overlay = Arc::new(OverlayWindowManager::new(
        RefusingSurface,
        OverlayContent::default(),
        Arc::new(|| {}),
    ));
    let (source, watcher) = ForegroundWatcher::channel(HOST);
    let handle = EnforcementEngine::new(LockSettings::default(), store, restricted, overlay.clone())
        .spawn(watcher);

    assert!(source.send(RawSignal::window_changed("com.a")).await);
    advance(1_500).await;

    let state = handle.state().borrow().clone();
    assert_eq!(state.phase, LockPhase::Exhausted);
    assert!(state.overlay_requested);
    assert!(!overlay.is_shown());
}
