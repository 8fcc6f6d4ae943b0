pub mod apps;
pub mod balance;
pub mod config;
pub mod daemon;
pub mod earn;
pub mod status;

use codeearn_core::storage::Database;
use codeearn_core::SharedDatabase;

/// Key under which the daemon records its latest lock state.
pub const LOCK_STATE_KEY: &str = "lock_state";

pub(crate) fn open_shared() -> Result<SharedDatabase, Box<dyn std::error::Error>> {
    Ok(Database::open()?.into_shared())
}

/// Format milliseconds as `m:ss`.
pub(crate) fn format_ms(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{}:{:02}", secs / 60, secs % 60)
}
