mod engine;
mod machine;

pub use engine::{EngineHandle, EnforcementEngine, ResumeTrigger};
pub use machine::{LockMachine, LockPhase, LockSettings, LockState};
