use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Every lock engine transition produces an Event.
/// The UI subscribes to them; the CLI daemon prints them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LockEvent {
    /// A restricted app came to the foreground and a countdown began.
    CountdownStarted {
        app_id: String,
        balance_ms: u64,
        at: DateTime<Utc>,
    },
    /// One tick was charged and persisted.
    CountdownTicked {
        remaining_ms: u64,
        at: DateTime<Utc>,
    },
    /// The user left the restricted app; the balance was flushed.
    CountdownStopped {
        app_id: String,
        persisted_ms: u64,
        at: DateTime<Utc>,
    },
    /// Another writer changed the balance mid-countdown and the session
    /// picked up the stored value.
    BalanceAdopted {
        previous_ms: u64,
        balance_ms: u64,
        at: DateTime<Utc>,
    },
    /// The balance hit zero and the overlay was requested.
    BalanceExhausted {
        app_id: String,
        at: DateTime<Utc>,
    },
    /// The overlay was released without a countdown restarting.
    OverlayReleased {
        app_id: String,
        at: DateTime<Utc>,
    },
    /// The engine shut down.
    EngineStopped {
        persisted_ms: Option<u64>,
        at: DateTime<Utc>,
    },
}

impl LockEvent {
    /// Short machine-friendly name, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            LockEvent::CountdownStarted { .. } => "countdown_started",
            LockEvent::CountdownTicked { .. } => "countdown_ticked",
            LockEvent::CountdownStopped { .. } => "countdown_stopped",
            LockEvent::BalanceAdopted { .. } => "balance_adopted",
            LockEvent::BalanceExhausted { .. } => "balance_exhausted",
            LockEvent::OverlayReleased { .. } => "overlay_released",
            LockEvent::EngineStopped { .. } => "engine_stopped",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let event = LockEvent::BalanceExhausted {
            app_id: "com.instagram.android".into(),
            at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "BalanceExhausted");
        assert_eq!(json["app_id"], "com.instagram.android");
        assert_eq!(event.kind(), "balance_exhausted");
    }
}
