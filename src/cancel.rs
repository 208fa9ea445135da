use std::os::unix::prelude::RawFd;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use nix::sys::eventfd::{eventfd, EfdFlags};
use tokio::sync::Notify;

use crate::errors::{Error, Result};

/// Shared cancellation handle.
///
/// A `Cancellable` can be observed three ways, all of which agree:
///
/// - [`check`][`Cancellable::check`] / [`is_cancelled`][`Cancellable::is_cancelled`]
///   for synchronous re-checks around a blocking wait,
/// - [`wait_fd`][`Cancellable::wait_fd`] as a native signal to include in a
///   multiplexed readiness wait,
/// - [`cancelled`][`Cancellable::cancelled`] for event-loop driven waits.
///
/// Cancellation is monotone: once set it is never cleared, and a second
/// [`cancel`][`Cancellable::cancel`] is a no-op.
#[derive(Debug, Clone, Default)]
pub struct Cancellable {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
    // Level-triggered once written; never drained so that every waiter,
    // present and future, observes the signal.
    wait_fd: Option<RawFd>,
}

impl Default for Inner {
    fn default() -> Self {
        // A kernel without eventfd support leaves us without a wait-able
        // signal; waits then fall back to checking the flag around the
        // blocking call.
        let wait_fd = eventfd(0, EfdFlags::EFD_CLOEXEC | EfdFlags::EFD_NONBLOCK).ok();

        Inner {
            cancelled: AtomicBool::new(false),
            notify: Notify::new(),
            wait_fd,
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(fd) = self.wait_fd.take() {
            let _ = nix::unistd::close(fd);
        }
    }
}

impl Cancellable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the cancellation signal. Idempotent.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(fd) = self.inner.wait_fd {
            let _ = nix::unistd::write(fd, &1u64.to_ne_bytes());
        }

        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with [`Error::Cancelled`] if the signal has been raised.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Native wait-able signal, readable once cancelled. `None` when the
    /// platform could not supply one.
    pub fn wait_fd(&self) -> Option<RawFd> {
        self.inner.wait_fd
    }

    /// Resolve once the signal is raised. Never resolves otherwise.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }

            // Register before re-checking so a cancel between the check and
            // the await still wakes us.
            let notified = self.inner.notify.notified();

            if self.is_cancelled() {
                return;
            }

            notified.await;
        }
    }
}
