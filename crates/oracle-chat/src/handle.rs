//! A cloneable handle for observing and interrupting a session from external code.

use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// A cloneable handle for observing and interrupting a session.
///
/// All fields are `Arc`-wrapped, so cloning is cheap.
#[derive(Clone)]
pub struct SessionHandle {
    pub(crate) cancel: Arc<Mutex<CancellationToken>>,
    pub(crate) generation: Arc<AtomicU64>,
    pub(crate) idle_notify: Arc<tokio::sync::Notify>,
    pub(crate) is_busy: Arc<AtomicBool>,
}

impl SessionHandle {
    pub(crate) fn new() -> Self {
        Self {
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            generation: Arc::new(AtomicU64::new(0)),
            idle_notify: Arc::new(tokio::sync::Notify::new()),
            is_busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Abort the in-flight turn.
    ///
    /// Bumps the generation so payloads still in transit are discarded.
    pub fn abort(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.cancel.lock().cancel();
    }

    /// Current generation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Whether `generation` is still the active one
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }

    /// Whether a submission is in flight.
    pub fn is_busy(&self) -> bool {
        self.is_busy.load(Ordering::Acquire)
    }

    /// Wait until the session becomes idle.
    pub async fn wait_for_idle(&self) {
        let notified = self.idle_notify.notified();
        if !self.is_busy() {
            return;
        }
        notified.await;
    }

    /// Wait until the session becomes idle, with a timeout.
    /// Returns `true` if idle was reached, `false` on timeout.
    pub async fn wait_for_idle_timeout(&self, timeout: std::time::Duration) -> bool {
        if !self.is_busy() {
            return true;
        }
        tokio::time::timeout(timeout, self.wait_for_idle())
            .await
            .is_ok()
    }

    /// Claim the session for one submission.
    ///
    /// Fails with [`Error::Busy`] if another submission holds it. The returned
    /// guard carries the new generation and a fresh cancellation token.
    pub(crate) fn begin(&self) -> Result<TurnGuard> {
        if self
            .is_busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::Busy);
        }

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();

        Ok(TurnGuard {
            handle: self.clone(),
            generation,
            cancel: token,
        })
    }
}

/// Holds the busy flag for one submission; releases it on drop.
pub(crate) struct TurnGuard {
    handle: SessionHandle,
    pub(crate) generation: u64,
    pub(crate) cancel: CancellationToken,
}

impl TurnGuard {
    /// Whether this submission has been superseded or aborted
    pub(crate) fn is_stale(&self) -> bool {
        !self.handle.is_current(self.generation)
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.handle.is_busy.store(false, Ordering::Release);
        self.handle.idle_notify.notify_waiters();
    }
}
