//! Session lifecycle: connect -> start session -> stop session -> disconnect.
//!
//! ```text
//! Disconnected --connect()--> Connected --start_session()--> SessionActive
//! SessionActive --stop_session()--> Connected --disconnect()--> Disconnected
//! ```
//!
//! Scoped work goes through [`SessionGuard`], which releases the session and
//! the connection on every exit path, including when the owning future is
//! dropped mid-flight.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::backend::MobileDeviceBackend;
use crate::error::DeviceError;

/// Connection state of one device instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    SessionActive,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::SessionActive => write!(f, "a session is active"),
        }
    }
}

/// State machine bound to one vendor device handle.
///
/// Clones share the same state.
pub(crate) struct Lifecycle<B: MobileDeviceBackend> {
    backend: Arc<B>,
    handle: B::Handle,
    state: Arc<Mutex<SessionState>>,
}

impl<B: MobileDeviceBackend> Clone for Lifecycle<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            handle: self.handle.clone(),
            state: self.state.clone(),
        }
    }
}

impl<B: MobileDeviceBackend> Lifecycle<B> {
    pub(crate) fn new(backend: Arc<B>, handle: B::Handle) -> Self {
        Self {
            backend,
            handle,
            state: Arc::new(Mutex::new(SessionState::Disconnected)),
        }
    }

    pub(crate) fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub(crate) fn handle(&self) -> &B::Handle {
        &self.handle
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub(crate) fn connect(&self) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        expect_state(*state, SessionState::Disconnected, "connect")?;

        self.backend
            .connect(&self.handle)
            .map_err(|e| DeviceError::ConnectFailure { message: e.message })?;
        *state = SessionState::Connected;
        debug!(device = ?self.handle, "Connected");
        Ok(())
    }

    /// Releasing call: the local state moves even if the vendor reports an error.
    pub(crate) fn disconnect(&self) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        expect_state(*state, SessionState::Connected, "disconnect")?;

        let result = self.backend.disconnect(&self.handle);
        *state = SessionState::Disconnected;
        debug!(device = ?self.handle, "Disconnected");
        result.map_err(|e| DeviceError::DisconnectFailure { message: e.message })
    }

    pub(crate) fn start_session(&self) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        expect_state(*state, SessionState::Connected, "start a session")?;

        self.backend
            .start_session(&self.handle)
            .map_err(|e| DeviceError::SessionStartFailure { message: e.message })?;
        *state = SessionState::SessionActive;
        debug!(device = ?self.handle, "Session started");
        Ok(())
    }

    /// Releasing call: the local state moves even if the vendor reports an error.
    pub(crate) fn stop_session(&self) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        expect_state(*state, SessionState::SessionActive, "stop the session")?;

        let result = self.backend.stop_session(&self.handle);
        *state = SessionState::Connected;
        debug!(device = ?self.handle, "Session stopped");
        result.map_err(|e| DeviceError::SessionStopFailure { message: e.message })
    }

    /// Connect and start a session. A connection made here is released
    /// again if the session cannot be started.
    pub(crate) fn open_session(&self) -> Result<SessionGuard<B>, DeviceError> {
        self.connect()?;
        if let Err(e) = self.start_session() {
            if let Err(release) = self.disconnect() {
                warn!(error = %release, "Failed to disconnect after session start failure");
            }
            return Err(e);
        }
        Ok(SessionGuard {
            lifecycle: self.clone(),
            released: false,
        })
    }

    /// Stop the session then disconnect. Both steps always run; the first
    /// error is returned.
    fn release(&self) -> Result<(), DeviceError> {
        let stopped = self.stop_session();
        let disconnected = self.disconnect();
        stopped.and(disconnected)
    }
}

fn expect_state(
    actual: SessionState,
    expected: SessionState,
    operation: &'static str,
) -> Result<(), DeviceError> {
    if actual == expected {
        Ok(())
    } else {
        Err(DeviceError::InvalidSessionState {
            operation,
            state: actual,
        })
    }
}

/// An open connection + session, released when dropped.
///
/// Use [`close`](Self::close) to observe release failures; `Drop` can only
/// log them.
#[must_use = "dropping the guard immediately ends the session"]
pub struct SessionGuard<B: MobileDeviceBackend> {
    lifecycle: Lifecycle<B>,
    released: bool,
}

impl<B: MobileDeviceBackend> SessionGuard<B> {
    pub fn state(&self) -> SessionState {
        self.lifecycle.state()
    }

    /// Stop the session and disconnect, reporting the first failure.
    pub fn close(mut self) -> Result<(), DeviceError> {
        self.released = true;
        self.lifecycle.release()
    }
}

impl<B: MobileDeviceBackend> Drop for SessionGuard<B> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.lifecycle.release() {
            warn!(device = ?self.lifecycle.handle, error = %e, "Failed to release device session");
        }
    }
}
