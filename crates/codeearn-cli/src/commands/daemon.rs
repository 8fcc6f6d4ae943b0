//! Foreground daemon: runs the lock engine against signals read from stdin.
//!
//! Each input line is `<KIND> <app-id>`, e.g. `WINDOW_CHANGED com.instagram.android`,
//! as written by an accessibility bridge. A bare `RESUME` line tells the
//! engine the host came back to the foreground. The overlay is drawn on
//! stderr and its action opens the judge site in the browser.

use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use codeearn_core::foreground::pump_lines;
use codeearn_core::{
    Config, EnforcementEngine, ForegroundWatcher, LockSettings, LockState, OverlayAction,
    OverlayContent, OverlayWindowManager, RestrictedSet, SharedDatabase, SqliteBalanceStore,
    SqliteRestrictedSet, TerminalSurface,
};
use tokio::io::BufReader;
use tokio::sync::{broadcast, watch};

use super::{open_shared, LOCK_STATE_KEY};

#[derive(Args)]
pub struct DaemonArgs {
    /// Keep the overlay up after leaving an exhausted app
    #[arg(long)]
    hold_overlay: bool,
    /// Keep running after stdin closes, until Ctrl-C
    #[arg(long)]
    linger: bool,
    /// Print lock events to stdout as JSON lines
    #[arg(long)]
    json: bool,
}

pub fn run(args: DaemonArgs) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let result = runtime.block_on(serve(args));
    // A stdin read may still be parked on a blocking thread.
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}

async fn serve(args: DaemonArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::load()?;
    if args.hold_overlay {
        config.lock.hold_overlay_after_exhaustion = true;
    }
    config.validate()?;

    let db = open_shared()?;
    let store = Arc::new(SqliteBalanceStore::new(db.clone(), config.lock.default_balance_ms)?);
    let restricted = Arc::new(SqliteRestrictedSet::new(db.clone())?);
    let seeded = restricted.seed_if_empty(&config.lock.default_restricted)?;
    if seeded > 0 {
        tracing::info!(seeded, "recorded default restricted apps");
    }

    let judge_url = config.reward.judge_url.clone();
    let action: OverlayAction = Arc::new(move || {
        if let Err(e) = open::that(&judge_url) {
            tracing::warn!(error = %e, url = %judge_url, "could not open judge site");
        }
    });
    let overlay = Arc::new(OverlayWindowManager::new(
        TerminalSurface::stderr(),
        OverlayContent::default(),
        action,
    ));

    let (source, watcher) = ForegroundWatcher::channel(config.lock.host_app_id.clone());
    let handle = EnforcementEngine::new(LockSettings::from(&config.lock), store, restricted, overlay)
        .spawn(watcher);
    let resume = handle.resume_trigger();

    let recorder = tokio::spawn(record_states(handle.state(), db));
    let printer = args.json.then(|| tokio::spawn(print_events(handle.events())));

    let mut pump = tokio::spawn(pump_lines(BufReader::new(tokio::io::stdin()), source, move || {
        resume.trigger();
    }));
    tokio::select! {
        joined = &mut pump => {
            match joined {
                Ok(Ok(forwarded)) => tracing::info!(forwarded, "foreground input closed"),
                Ok(Err(e)) => tracing::warn!(error = %e, "foreground input failed"),
                Err(e) => tracing::error!(error = %e, "foreground reader panicked"),
            }
            if args.linger {
                tracing::info!("lingering until Ctrl-C");
                tokio::signal::ctrl_c().await?;
            }
        }
        interrupted = tokio::signal::ctrl_c() => {
            interrupted?;
            tracing::info!("interrupted");
            pump.abort();
        }
    }

    handle.shutdown().await;
    if let Err(e) = recorder.await {
        tracing::warn!(error = %e, "state recorder failed");
    }
    if let Some(printer) = printer {
        let _ = printer.await;
    }
    Ok(())
}

/// Mirror every published state into the kv table for `status`.
async fn record_states(mut state: watch::Receiver<LockState>, db: SharedDatabase) {
    loop {
        let snapshot = state.borrow_and_update().clone();
        record_state(&db, &snapshot);
        if state.changed().await.is_err() {
            break;
        }
    }
}

fn record_state(db: &SharedDatabase, state: &LockState) {
    let json = match serde_json::to_string(state) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!(error = %e, "could not encode lock state");
            return;
        }
    };
    let Ok(db) = db.lock() else {
        tracing::warn!("database lock poisoned, lock state not recorded");
        return;
    };
    if let Err(e) = db.kv_set(LOCK_STATE_KEY, &json) {
        tracing::warn!(error = %e, "could not record lock state");
    }
}

async fn print_events(mut events: broadcast::Receiver<codeearn_core::LockEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "could not encode lock event"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event printer fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
