//! Foreground app watcher.
//!
//! The host platform reports raw window signals into a [`ForegroundSource`].
//! A [`ForegroundWatcher`] turns them into [`ForegroundEvent`]s for the lock
//! engine: it keeps only window-change signals and drops the hosting app's
//! own identifier, so glancing at the locking app never starts or stops a
//! countdown (and never hides an overlay the user still deserves).
//!
//! Consecutive duplicates are passed through untouched. A repeated event for
//! an exhausted app is how the engine notices a reward, so collapsing them
//! here would lose information; the engine treats them as no-ops otherwise.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;

/// Capacity of the channel between the platform callback and the engine.
const SIGNAL_BUFFER: usize = 64;

/// Kind of raw accessibility signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalKind {
    WindowChanged,
    /// Any other platform event type, kept by its raw name.
    Other(String),
}

/// A signal as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSignal {
    pub app_id: String,
    pub kind: SignalKind,
}

impl RawSignal {
    pub fn window_changed(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            kind: SignalKind::WindowChanged,
        }
    }

    /// Parse one line of the `<KIND> <app-id>` text protocol.
    ///
    /// Blank lines and lines starting with `#` yield `None`.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let mut parts = line.split_whitespace();
        let kind = parts.next()?;
        let app_id = parts.next()?;
        let kind = if kind.eq_ignore_ascii_case("WINDOW_CHANGED") {
            SignalKind::WindowChanged
        } else {
            SignalKind::Other(kind.to_string())
        };
        Some(Self {
            app_id: app_id.to_string(),
            kind,
        })
    }
}

/// A transition of the system foreground to `app_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForegroundEvent {
    pub app_id: String,
    pub at: DateTime<Utc>,
}

/// Sending half, handed to whatever receives platform callbacks.
///
/// `report` never blocks the calling thread.
#[derive(Debug, Clone)]
pub struct ForegroundSource {
    tx: mpsc::Sender<RawSignal>,
}

impl ForegroundSource {
    /// Forward a signal. Returns false if the watcher is gone or the buffer
    /// is full; the signal is dropped in both cases.
    pub fn report(&self, signal: RawSignal) -> bool {
        match self.tx.try_send(signal) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(signal)) => {
                tracing::warn!(app_id = %signal.app_id, "foreground signal dropped, engine is behind");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Forward a signal, waiting for buffer space.
    pub async fn send(&self, signal: RawSignal) -> bool {
        self.tx.send(signal).await.is_ok()
    }
}

/// Filtered stream of foreground events.
#[derive(Debug)]
pub struct ForegroundWatcher {
    rx: mpsc::Receiver<RawSignal>,
    host_app_id: String,
}

impl ForegroundWatcher {
    /// Create a watcher and the source that feeds it.
    pub fn channel(host_app_id: impl Into<String>) -> (ForegroundSource, Self) {
        let (tx, rx) = mpsc::channel(SIGNAL_BUFFER);
        (
            ForegroundSource { tx },
            Self {
                rx,
                host_app_id: host_app_id.into(),
            },
        )
    }

    /// Wait for the next relevant foreground transition.
    ///
    /// Returns `None` once every source has been dropped. The sequence is not
    /// restartable.
    pub async fn next(&mut self) -> Option<ForegroundEvent> {
        while let Some(signal) = self.rx.recv().await {
            if signal.kind != SignalKind::WindowChanged {
                continue;
            }
            if signal.app_id == self.host_app_id {
                tracing::trace!("ignoring host app window change");
                continue;
            }
            return Some(ForegroundEvent {
                app_id: signal.app_id,
                at: Utc::now(),
            });
        }
        None
    }
}

/// Line that asks the engine to re-evaluate the current foreground app.
pub const RESUME_LINE: &str = "RESUME";

/// Feed `source` from a line-oriented reader until EOF.
///
/// A bare `RESUME` line calls `on_resume` instead of producing a signal.
/// Returns the number of lines that parsed as signals.
pub async fn pump_lines<R, F>(reader: R, source: ForegroundSource, on_resume: F) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
    F: Fn(),
{
    let mut lines = reader.lines();
    let mut forwarded = 0;
    while let Some(line) = lines.next_line().await? {
        if line.trim().eq_ignore_ascii_case(RESUME_LINE) {
            tracing::debug!("host resumed");
            on_resume();
            continue;
        }
        match RawSignal::parse_line(&line) {
            Some(signal) => {
                if !source.send(signal).await {
                    break;
                }
                forwarded += 1;
            }
            None if !line.trim().is_empty() && !line.trim_start().starts_with('#') => {
                tracing::warn!(line = %line, "unparseable foreground signal");
            }
            None => {}
        }
    }
    Ok(forwarded)
}
