use std::os::unix::prelude::RawFd;

use tokio::io::{unix::AsyncFd, Interest};
use tokio::runtime::Handle;

use crate::cancel::Cancellable;
use crate::errors::{Error, Result};

/// Callback handed to the event loop. Runs at most once.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// The two scheduling modes consumed from the event-loop collaborator.
///
/// `watch_readable` and `defer` are deliberately distinct: a readiness
/// completion must run inline in the callout that observed readiness (the
/// caller relies on bounded latency), while deferred work is allowed to
/// block and therefore must not run on the path that requested it.
pub trait EventLoop {
    /// Watch `fd` for readability once, then invoke `callback` and detach.
    ///
    /// The attached cancellation also completes the watch: the callback runs
    /// either way and is responsible for re-checking cancellation before
    /// acting on the descriptor.
    fn watch_readable(&self, fd: RawFd, cancellable: Option<Cancellable>, callback: Callback);

    /// Run `callback` later, off the caller's path. The callback may block.
    fn defer(&self, callback: Callback);
}

/// [`EventLoop`] over a tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioEventLoop {
    handle: Handle,
}

impl TokioEventLoop {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Bind to the runtime of the calling context.
    pub fn current() -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|_| Error::Init("no tokio runtime in the calling context".into()))?;

        Ok(Self { handle })
    }
}

impl EventLoop for TokioEventLoop {
    fn watch_readable(&self, fd: RawFd, cancellable: Option<Cancellable>, callback: Callback) {
        self.handle.spawn(async move {
            match AsyncFd::with_interest(fd, Interest::READABLE) {
                Ok(ready) => match &cancellable {
                    Some(cancellable) => {
                        tokio::select! {
                            _ = ready.readable() => {}
                            _ = cancellable.cancelled() => {}
                        }
                    }
                    None => {
                        let _ = ready.readable().await;
                    }
                },
                Err(error) => {
                    // Registration failure leaves nothing to wait on; run the
                    // callback now and let the descriptor operation report
                    // the real problem.
                    tracing_impl::warn!(%error, fd, "could not register readiness watch");
                }
            }

            callback();
        });
    }

    fn defer(&self, callback: Callback) {
        // Deferred callbacks are the ones allowed to block (close may), so
        // they leave the reactor thread entirely.
        self.handle.spawn_blocking(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::pipe;

    #[tokio::test]
    async fn readable_watch_fires_once_ready() {
        let (read_end, write_end) = pipe().unwrap();
        let event_loop = TokioEventLoop::current().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();

        event_loop.watch_readable(
            read_end,
            None,
            Box::new(move || {
                let _ = tx.send(());
            }),
        );

        nix::unistd::write(write_end, b"x").unwrap();
        rx.await.unwrap();

        let _ = nix::unistd::close(read_end);
        let _ = nix::unistd::close(write_end);
    }

    #[tokio::test]
    async fn cancellation_completes_a_watch_with_no_data() {
        let (read_end, write_end) = pipe().unwrap();
        let event_loop = TokioEventLoop::current().unwrap();
        let cancellable = Cancellable::new();
        let (tx, rx) = tokio::sync::oneshot::channel();

        event_loop.watch_readable(
            read_end,
            Some(cancellable.clone()),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );

        cancellable.cancel();
        rx.await.unwrap();

        let _ = nix::unistd::close(read_end);
        let _ = nix::unistd::close(write_end);
    }

    #[tokio::test]
    async fn deferred_callback_runs() {
        let event_loop = TokioEventLoop::current().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();

        event_loop.defer(Box::new(move || {
            let _ = tx.send(());
        }));

        rx.await.unwrap();
    }
}
