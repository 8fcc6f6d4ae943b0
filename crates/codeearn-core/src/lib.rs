//! # CodeEarn Core Library
//!
//! This library provides the screen-lock enforcement engine behind CodeEarn:
//! selected distracting apps are gated behind a countdown, and the user
//! earns more time by solving problems on an external judge.
//!
//! ## Architecture
//!
//! - **Lock Engine**: an explicit state machine ([`LockMachine`]) driven by a
//!   single serialized tokio task ([`EnforcementEngine`])
//! - **Stores**: the time balance and the restricted app set, SQLite-backed
//!   with live `watch` streams
//! - **Foreground Watcher**: filters raw window signals into foreground events
//! - **Overlay**: idempotent blocking overlay with its own presentation lifecycle
//! - **Rewards**: pays time for newly accepted judge submissions
//!
//! ## Key Components
//!
//! - [`EnforcementEngine`]: spawns the engine and returns an [`EngineHandle`]
//! - [`TimeBalanceStore`]: shared millisecond balance
//! - [`RestrictedSet`]: apps under lock policy
//! - [`OverlayPresenter`]: show/hide contract for the blocking overlay
//! - [`RewardVerifier`]: the out-of-band balance writer

pub mod balance;
pub mod earn;
pub mod error;
pub mod events;
pub mod foreground;
pub mod lock;
pub mod overlay;
pub mod restricted;
pub mod storage;

pub use balance::{MemoryBalanceStore, SqliteBalanceStore, TimeBalanceStore};
pub use earn::{EarnOutcome, JsonFileSource, RewardVerifier, SubmissionSource};
pub use error::{ConfigError, CoreError, DatabaseError, EarnError, OverlayError, ValidationError};
pub use events::LockEvent;
pub use foreground::{ForegroundEvent, ForegroundSource, ForegroundWatcher, RawSignal, SignalKind};
pub use lock::{
    EngineHandle, EnforcementEngine, LockMachine, LockPhase, LockSettings, LockState, ResumeTrigger,
};
pub use overlay::{
    OverlayAction, OverlayContent, OverlayPresenter, OverlaySurface, OverlayWindowManager,
    TerminalSurface,
};
pub use restricted::{ActiveSet, MemoryRestrictedSet, RestrictedApp, RestrictedSet, SqliteRestrictedSet};
pub use storage::{Config, Database, SharedDatabase};
