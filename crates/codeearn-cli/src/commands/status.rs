use codeearn_core::LockState;

use super::{open_shared, LOCK_STATE_KEY};

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let db = open_shared()?;
    let raw = db
        .lock()
        .map_err(|_| "database lock poisoned")?
        .kv_get(LOCK_STATE_KEY)?;

    let state: LockState = match raw {
        Some(raw) => serde_json::from_str(&raw)?,
        None => LockState::default(),
    };
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}
