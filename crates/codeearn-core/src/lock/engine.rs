//! Enforcement engine runtime.
//!
//! Runs a [`LockMachine`] on one long-lived tokio task. Every input
//! (foreground events, restricted-set changes, balance changes, ticks and
//! host commands) is handled by that task in turn, so the machine has a
//! single writer and no transition ever interleaves with another. Host
//! commands are polled last, so a shutdown lands after every foreground
//! event reported ahead of it.
//!
//! The countdown is an [`Interval`] that exists only while the machine is
//! ticking. Dropping it is the cancellation: no tick can fire after the
//! session stops, and no stale tick write can land after an exit flush.
//!
//! Stores only publish writes made in this process. Anything another
//! process writes (a reward, a restriction toggle) is picked up by
//! refreshing the restricted set before each foreground decision, and by a
//! second, slower interval that runs while a session is open: it refreshes
//! the restricted set and, once exhausted, re-reads the balance so a reward
//! can release a held overlay.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use super::machine::{LockMachine, LockPhase, LockSettings, LockState};
use crate::balance::TimeBalanceStore;
use crate::events::LockEvent;
use crate::foreground::ForegroundWatcher;
use crate::overlay::OverlayPresenter;
use crate::restricted::{ActiveSet, RestrictedSet};

const EVENT_BUFFER: usize = 256;

enum Command {
    Resume,
    Shutdown,
}

/// Builder for the engine task.
pub struct EnforcementEngine {
    machine: LockMachine,
    store: Arc<dyn TimeBalanceStore>,
    restricted_set: Arc<dyn RestrictedSet>,
    restricted: watch::Receiver<ActiveSet>,
    balance: watch::Receiver<u64>,
}

impl EnforcementEngine {
    pub fn new(
        settings: LockSettings,
        store: Arc<dyn TimeBalanceStore>,
        restricted_set: Arc<dyn RestrictedSet>,
        overlay: Arc<dyn OverlayPresenter>,
    ) -> Self {
        let balance = store.subscribe();
        let restricted = restricted_set.subscribe();
        Self {
            machine: LockMachine::new(store.clone(), overlay, settings),
            store,
            restricted_set,
            restricted,
            balance,
        }
    }

    /// Start the engine task on the current runtime.
    pub fn spawn(self, watcher: ForegroundWatcher) -> EngineHandle {
        let (command_tx, command_rx) = mpsc::channel(8);
        let (state_tx, state_rx) = watch::channel(self.machine.state());
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

        let worker = Worker {
            machine: self.machine,
            store: self.store,
            restricted_set: self.restricted_set,
            watcher,
            restricted: self.restricted,
            balance: self.balance,
            commands: command_rx,
            state_tx,
            event_tx: event_tx.clone(),
        };
        let task = tokio::spawn(worker.run());

        EngineHandle {
            commands: command_tx,
            state: state_rx,
            events: event_tx,
            task,
        }
    }
}

/// Handle to a running engine.
///
/// Dropping the handle shuts the engine down as well, without waiting.
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<LockState>,
    events: broadcast::Sender<LockEvent>,
    task: JoinHandle<()>,
}

impl EngineHandle {
    /// Live lock state for the UI layer.
    pub fn state(&self) -> watch::Receiver<LockState> {
        self.state.clone()
    }

    /// Stream of transitions from now on.
    pub fn events(&self) -> broadcast::Receiver<LockEvent> {
        self.events.subscribe()
    }

    /// Host lifecycle resume: re-evaluate the current foreground app.
    pub async fn resume(&self) {
        let _ = self.commands.send(Command::Resume).await;
    }

    /// A cloneable, non-async way to request [`EngineHandle::resume`].
    pub fn resume_trigger(&self) -> ResumeTrigger {
        ResumeTrigger {
            commands: self.commands.clone(),
        }
    }

    /// Stop the engine: cancel the countdown, flush, release the overlay.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown).await;
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "lock engine task failed");
        }
    }
}

/// Requests a resume from synchronous code, such as an input reader.
#[derive(Clone)]
pub struct ResumeTrigger {
    commands: mpsc::Sender<Command>,
}

impl ResumeTrigger {
    /// Queue a resume. Returns false if the engine is gone or backed up.
    pub fn trigger(&self) -> bool {
        match self.commands.try_send(Command::Resume) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "resume not queued");
                false
            }
        }
    }
}

struct Worker {
    machine: LockMachine,
    store: Arc<dyn TimeBalanceStore>,
    restricted_set: Arc<dyn RestrictedSet>,
    watcher: ForegroundWatcher,
    restricted: watch::Receiver<ActiveSet>,
    balance: watch::Receiver<u64>,
    commands: mpsc::Receiver<Command>,
    state_tx: watch::Sender<LockState>,
    event_tx: broadcast::Sender<LockEvent>,
}

impl Worker {
    async fn run(mut self) {
        tracing::info!("lock engine started");
        let tick = Duration::from_millis(self.machine.settings().tick_ms);
        let sync = Duration::from_millis(self.machine.settings().sync_ms);
        let mut countdown: Option<Interval> = None;
        let mut syncing: Option<Interval> = None;
        let mut watcher_open = true;
        let mut restricted_open = true;
        let mut balance_open = true;

        loop {
            let events = tokio::select! {
                biased;

                event = self.watcher.next(), if watcher_open => match event {
                    Some(event) => {
                        let active = self.fresh_active();
                        tracing::trace!(app_id = %event.app_id, "foreground changed");
                        self.machine.on_foreground(&event.app_id, &active)
                    }
                    None => {
                        // Fail safe: whatever lock is engaged stays engaged.
                        tracing::warn!("foreground source closed, keeping current lock state");
                        watcher_open = false;
                        Vec::new()
                    }
                },

                changed = self.restricted.changed(), if restricted_open => match changed {
                    Ok(()) => {
                        let active = self.restricted.borrow_and_update().clone();
                        self.machine.on_restricted_changed(&active)
                    }
                    Err(_) => {
                        restricted_open = false;
                        Vec::new()
                    }
                },

                changed = self.balance.changed(), if balance_open => match changed {
                    Ok(()) => {
                        let balance_ms = *self.balance.borrow_and_update();
                        let active = self.restricted.borrow().clone();
                        self.machine.on_balance_changed(balance_ms, &active)
                    }
                    Err(_) => {
                        balance_open = false;
                        Vec::new()
                    }
                },

                _ = next_tick(&mut countdown) => self.machine.tick(),

                _ = next_tick(&mut syncing) => self.sync(),

                command = self.commands.recv() => match command {
                    Some(Command::Resume) => {
                        let active = self.fresh_active();
                        self.machine.resume(&active)
                    }
                    Some(Command::Shutdown) | None => break,
                },
            };

            let restarted = events
                .iter()
                .any(|e| matches!(e, LockEvent::CountdownStarted { .. }));
            if !self.machine.is_ticking() {
                countdown = None;
            } else if restarted || countdown.is_none() {
                let mut interval = interval_at(Instant::now() + tick, tick);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                countdown = Some(interval);
            }
            if self.machine.phase() == LockPhase::Idle {
                syncing = None;
            } else if syncing.is_none() {
                let mut interval = interval_at(Instant::now() + sync, sync);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                syncing = Some(interval);
            }

            self.publish(events);
        }

        let events = self.machine.teardown();
        self.publish(events);
        tracing::info!("lock engine stopped");
    }

    /// The effective restricted set, re-read from storage first.
    ///
    /// Leaves the watch marked unseen so the change arm still runs.
    fn fresh_active(&self) -> ActiveSet {
        if let Err(e) = self.restricted_set.refresh() {
            tracing::warn!(error = %e, "could not refresh restricted apps, using last known set");
        }
        self.restricted.borrow().clone()
    }

    /// Pick up writes made by other processes while a session is open.
    fn sync(&mut self) -> Vec<LockEvent> {
        let active = self.fresh_active();
        let mut events = self.machine.on_restricted_changed(&active);
        if self.machine.phase() == LockPhase::Exhausted {
            match self.store.read_once() {
                Ok(balance_ms) => events.extend(self.machine.on_balance_changed(balance_ms, &active)),
                Err(e) => tracing::warn!(error = %e, "could not re-read balance"),
            }
        }
        events
    }

    fn publish(&self, events: Vec<LockEvent>) {
        for event in events {
            if matches!(event, LockEvent::CountdownTicked { .. }) {
                tracing::debug!(event = event.kind(), "lock transition");
            } else {
                tracing::info!(event = event.kind(), "lock transition");
            }
            // No subscribers is fine.
            let _ = self.event_tx.send(event);
        }
        let state = self.machine.state();
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
