//! Blocking overlay presenter.
//!
//! The overlay is a system-level always-on-top view with no owning screen,
//! so it carries its own short-lived [`PresentationContext`]: created and
//! brought up to `Resumed` on `show`, walked down to `Destroyed` on `hide`.
//!
//! The presenter never decides when to dismiss. There is no skip action;
//! the only thing a user can do from the overlay is trigger the bound
//! "earn more time" action, which the engine does not interpret.
//!
//! Surface failures are logged and swallowed. The engine gets no
//! acknowledgement, so a failed `show` still leaves the engine believing the
//! overlay is up.

use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::error::OverlayError;

/// Callback bound to the overlay's single button.
pub type OverlayAction = Arc<dyn Fn() + Send + Sync>;

/// Something that can show and tear down the blocking overlay.
pub trait OverlayPresenter: Send + Sync {
    /// Show the overlay. No-op if already shown.
    fn show(&self);

    /// Tear the overlay down. No-op if not shown.
    fn hide(&self);

    fn is_shown(&self) -> bool;

    /// Run the bound "earn more time" action.
    fn trigger_action(&self);
}

/// What the overlay displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayContent {
    pub title: String,
    pub message: String,
    pub action_label: String,
}

impl Default for OverlayContent {
    fn default() -> Self {
        Self {
            title: "Time's Up!".into(),
            message: "Solve a problem to earn more time.".into(),
            action_label: "Go to Codeforces".into(),
        }
    }
}

/// Platform window layer the overlay is attached to.
pub trait OverlaySurface: Send {
    fn attach(&mut self, content: &OverlayContent) -> Result<(), OverlayError>;
    fn detach(&mut self) -> Result<(), OverlayError>;
}

/// Lifecycle stage of the overlay's presentation context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStage {
    Initialized,
    Created,
    Started,
    Resumed,
    Paused,
    Stopped,
    Destroyed,
}

/// Stand-in lifecycle owner for UI rendered outside any screen.
#[derive(Debug)]
pub struct PresentationContext {
    stage: LifecycleStage,
}

impl PresentationContext {
    fn new() -> Self {
        Self {
            stage: LifecycleStage::Initialized,
        }
    }

    pub fn stage(&self) -> LifecycleStage {
        self.stage
    }

    fn advance(&mut self, to: LifecycleStage) {
        tracing::trace!(from = ?self.stage, to = ?to, "overlay lifecycle");
        self.stage = to;
    }

    fn bring_up(&mut self) {
        self.advance(LifecycleStage::Created);
        self.advance(LifecycleStage::Started);
        self.advance(LifecycleStage::Resumed);
    }

    fn tear_down(&mut self) {
        self.advance(LifecycleStage::Paused);
        self.advance(LifecycleStage::Stopped);
        self.advance(LifecycleStage::Destroyed);
    }
}

struct Inner<S> {
    surface: S,
    context: Option<PresentationContext>,
}

/// Default presenter: one overlay instance on one surface.
pub struct OverlayWindowManager<S: OverlaySurface> {
    inner: Mutex<Inner<S>>,
    content: OverlayContent,
    action: OverlayAction,
}

impl<S: OverlaySurface> OverlayWindowManager<S> {
    pub fn new(surface: S, content: OverlayContent, action: OverlayAction) -> Self {
        Self {
            inner: Mutex::new(Inner {
                surface,
                context: None,
            }),
            content,
            action,
        }
    }

    /// Lifecycle stage of the live context, if the overlay is shown.
    pub fn stage(&self) -> Option<LifecycleStage> {
        self.lock().context.as_ref().map(PresentationContext::stage)
    }

    fn lock(&self) -> MutexGuard<'_, Inner<S>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<S: OverlaySurface> OverlayPresenter for OverlayWindowManager<S> {
    fn show(&self) {
        let mut inner = self.lock();
        if inner.context.is_some() {
            return;
        }
        tracing::debug!("attempting to show overlay");

        let mut context = PresentationContext::new();
        context.bring_up();
        match inner.surface.attach(&self.content) {
            Ok(()) => {
                inner.context = Some(context);
                tracing::info!("overlay shown");
            }
            Err(e) => {
                context.tear_down();
                tracing::error!(error = %e, "failed to show overlay");
            }
        }
    }

    fn hide(&self) {
        let mut inner = self.lock();
        let Some(mut context) = inner.context.take() else {
            return;
        };
        context.tear_down();
        match inner.surface.detach() {
            Ok(()) => tracing::info!("overlay hidden"),
            Err(e) => tracing::error!(error = %e, "error hiding overlay"),
        }
    }

    fn is_shown(&self) -> bool {
        self.lock().context.is_some()
    }

    fn trigger_action(&self) {
        if !self.is_shown() {
            tracing::debug!("overlay action triggered while hidden");
        }
        (self.action)();
    }
}

impl<S: OverlaySurface> fmt::Debug for OverlayWindowManager<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverlayWindowManager")
            .field("shown", &self.is_shown())
            .field("content", &self.content)
            .finish()
    }
}

/// Surface that renders the overlay as a text banner, on stderr by default.
#[derive(Debug)]
pub struct TerminalSurface<W = io::Stderr> {
    out: W,
}

impl TerminalSurface {
    pub fn stderr() -> Self {
        Self { out: io::stderr() }
    }
}

impl Default for TerminalSurface {
    fn default() -> Self {
        Self::stderr()
    }
}

impl<W: Write + Send> TerminalSurface<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> OverlaySurface for TerminalSurface<W> {
    fn attach(&mut self, content: &OverlayContent) -> Result<(), OverlayError> {
        write!(
            self.out,
            "\n==================== {} ====================\n{}\n[{}]\n",
            content.title, content.message, content.action_label
        )
        .and_then(|()| self.out.flush())
        .map_err(|e| OverlayError::AttachFailed(e.to_string()))
    }

    fn detach(&mut self) -> Result<(), OverlayError> {
        writeln!(self.out, "==================== overlay closed ====================\n")
            .and_then(|()| self.out.flush())
            .map_err(|e| OverlayError::DetachFailed(e.to_string()))
    }
}
