//! Loaded application surface and lifecycle
//!
//! An [`Application`] is user code executing on a dataplane: lifecycle hooks
//! plus the per-packet `process` entry point. The [`AppSlot`] tracks which
//! application a dataplane carries and walks it through
//! Init → Ready → Running → Stopped.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::context::Context;
use crate::dataplane::Dataplane;
use crate::error::{Error, Result};

/// Application lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    /// No application attached
    Init,
    /// Loaded, not yet started
    Ready,
    /// Processing packets
    Running,
    /// Stopped after running
    Stopped,
}

/// The entry points a loaded application exposes to the dataplane
pub trait Application: Send + Sync {
    /// Called once when the application is attached
    fn load(&self, dp: &Dataplane) -> Result<()> {
        let _ = dp;
        Ok(())
    }

    /// Called once when the application is detached
    fn unload(&self, dp: &Dataplane) -> Result<()> {
        let _ = dp;
        Ok(())
    }

    /// Called when processing begins; tables are typically created here
    fn start(&self, dp: &Dataplane) -> Result<()> {
        let _ = dp;
        Ok(())
    }

    /// Called when processing ends
    fn stop(&self, dp: &Dataplane) -> Result<()> {
        let _ = dp;
        Ok(())
    }

    /// Process one packet
    fn process(&self, ctx: &mut Context<'_>) -> Result<()>;
}

struct SlotInner {
    app: Option<Arc<dyn Application>>,
    state: AppState,
}

/// Holder for a dataplane's application and its lifecycle state
pub struct AppSlot {
    inner: RwLock<SlotInner>,
}

impl AppSlot {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(SlotInner {
                app: None,
                state: AppState::Init,
            }),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> AppState {
        self.inner.read().state
    }

    /// True when an application is attached
    pub fn is_loaded(&self) -> bool {
        self.inner.read().app.is_some()
    }

    /// Attach an application and run its `load` hook
    pub fn load(&self, app: Arc<dyn Application>, dp: &Dataplane) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.app.is_some() {
            return Err(Error::AppAlreadyLoaded);
        }
        app.load(dp)?;
        inner.app = Some(app);
        inner.state = AppState::Ready;
        info!(dataplane = dp.name(), "application loaded");
        Ok(())
    }

    /// Detach the application after running its `unload` hook.
    ///
    /// Fails when nothing is loaded.
    pub fn unload(&self, dp: &Dataplane) -> Result<()> {
        let mut inner = self.inner.write();
        let app = inner.app.clone().ok_or(Error::AppNotLoaded)?;
        app.unload(dp)?;
        inner.app = None;
        inner.state = AppState::Init;
        info!(dataplane = dp.name(), "application unloaded");
        Ok(())
    }

    /// Begin processing: Ready or Stopped → Running
    pub fn start(&self, dp: &Dataplane) -> Result<()> {
        let mut inner = self.inner.write();
        let app = inner.app.clone().ok_or(Error::AppNotLoaded)?;
        match inner.state {
            AppState::Ready | AppState::Stopped => {
                app.start(dp)?;
                inner.state = AppState::Running;
                info!(dataplane = dp.name(), "application started");
                Ok(())
            }
            state => Err(Error::AppLifecycle { state, op: "start" }),
        }
    }

    /// End processing: Running → Stopped
    pub fn stop(&self, dp: &Dataplane) -> Result<()> {
        let mut inner = self.inner.write();
        let app = inner.app.clone().ok_or(Error::AppNotLoaded)?;
        match inner.state {
            AppState::Running => {
                app.stop(dp)?;
                inner.state = AppState::Stopped;
                info!(dataplane = dp.name(), "application stopped");
                Ok(())
            }
            state => Err(Error::AppLifecycle { state, op: "stop" }),
        }
    }

    /// Invoke the application's `process` hook
    pub fn process(&self, ctx: &mut Context<'_>) -> Result<()> {
        let app = self
            .inner
            .read()
            .app
            .clone()
            .ok_or(Error::NoApplication)?;
        app.process(ctx)
    }
}
