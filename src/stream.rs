use std::os::unix::prelude::RawFd;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};

use crate::cancel::Cancellable;
use crate::errors::{Error, Result};
use crate::event_loop::EventLoop;

/// Syscall seam for [`FdStream`].
///
/// The production implementation is [`RawDescriptor`]; tests substitute a
/// counting fake to assert which syscalls ran.
pub trait Descriptor {
    fn raw_fd(&self) -> RawFd;

    fn read(&self, buf: &mut [u8]) -> nix::Result<usize>;

    fn close(&self) -> nix::Result<()>;
}

/// A plain kernel descriptor.
#[derive(Debug, Clone, Copy)]
pub struct RawDescriptor(pub RawFd);

impl Descriptor for RawDescriptor {
    fn raw_fd(&self) -> RawFd {
        self.0
    }

    fn read(&self, buf: &mut [u8]) -> nix::Result<usize> {
        nix::unistd::read(self.0, buf)
    }

    fn close(&self) -> nix::Result<()> {
        nix::unistd::close(self.0)
    }
}

/// Cancellable read/close bridge over a single descriptor.
///
/// The stream owns the descriptor only when constructed with
/// `close_fd_at_close`; otherwise it is a non-owning view and close is a
/// trivial success. At most one operation may be outstanding per stream at a
/// time; completions are therefore observed in issuance order.
#[derive(Debug)]
pub struct FdStream<D = RawDescriptor> {
    inner: D,
    close_fd_at_close: bool,
}

impl FdStream<RawDescriptor> {
    pub fn new(fd: RawFd, close_fd_at_close: bool) -> Self {
        Self::with_descriptor(RawDescriptor(fd), close_fd_at_close)
    }
}

impl<D: Descriptor> FdStream<D> {
    pub fn with_descriptor(inner: D, close_fd_at_close: bool) -> Self {
        Self {
            inner,
            close_fd_at_close,
        }
    }

    /// Read up to `buf.len()` bytes, blocking until the descriptor is
    /// readable or `cancellable` fires.
    ///
    /// With a cancellation handle that carries a native signal, the wait is a
    /// single multiplexed `poll` over both descriptors; cancellation is
    /// re-checked after the wait so that a race between readiness and
    /// cancellation still resolves to [`Error::Cancelled`] with no read
    /// performed. Without a handle the read is issued directly and may block
    /// indefinitely, matching the descriptor's blocking mode.
    ///
    /// `Ok(0)` signals end-of-data.
    pub fn read(&self, buf: &mut [u8], cancellable: Option<&Cancellable>) -> Result<usize> {
        if let Some(cancel_fd) = cancellable.and_then(Cancellable::wait_fd) {
            loop {
                let mut fds = [
                    PollFd::new(self.inner.raw_fd(), PollFlags::POLLIN),
                    PollFd::new(cancel_fd, PollFlags::POLLIN),
                ];

                match poll(&mut fds, -1) {
                    Err(Errno::EINTR) => continue,
                    Err(errno) => return Err(Error::Io(errno)),
                    Ok(_) => break,
                }
            }
        }

        read_ready(&self.inner, buf, cancellable)
    }

    /// Close the descriptor if this stream owns it.
    ///
    /// Closing is terminal: there are no portable retry semantics for an
    /// interrupted close, so a single attempt is made and any failure leaves
    /// the descriptor in an undefined but non-double-closed state. A
    /// cancellation handle is accepted for interface symmetry but cannot
    /// stop a close.
    pub fn close(&self, cancellable: Option<&Cancellable>) -> Result<()> {
        let _ = cancellable;

        if !self.close_fd_at_close {
            return Ok(());
        }

        self.inner.close().map_err(Error::Io)
    }

    /// Skipping is not supported by this bridge.
    ///
    /// # Panics
    ///
    /// Always. Calling this is a contract violation, not a recoverable error.
    pub fn skip_async(&self, _count: usize, _cancellable: Option<&Cancellable>) -> ! {
        unimplemented!("skip is not supported on descriptor streams")
    }
}

impl<D> FdStream<D>
where
    D: Descriptor + Clone + Send + 'static,
{
    /// Read asynchronously once the descriptor becomes readable.
    ///
    /// A one-shot readiness watch is registered with the event loop, with
    /// `cancellable` attached so the watch itself can be cancelled
    /// externally. The completion runs inline in the event-loop callout that
    /// observed readiness and fires exactly once with the filled buffer and
    /// either a byte count, [`Error::Cancelled`], or a translated OS error.
    pub fn read_async<E, C>(
        &self,
        event_loop: &E,
        mut buf: Vec<u8>,
        cancellable: Option<Cancellable>,
        completion: C,
    ) where
        E: EventLoop + ?Sized,
        C: FnOnce(Vec<u8>, Result<usize>) + Send + 'static,
    {
        let inner = self.inner.clone();
        let cancel = cancellable.clone();

        event_loop.watch_readable(
            self.inner.raw_fd(),
            cancellable,
            Box::new(move || {
                let outcome = read_ready(&inner, &mut buf, cancel.as_ref());
                completion(buf, outcome);
            }),
        );
    }

    /// Close asynchronously.
    ///
    /// Deliberately scheduled through the event loop's deferred facility
    /// rather than run inline: close may itself block and the caller must
    /// not. `cancellable` is accepted by the interface but has no effect on
    /// a close once it has started running.
    pub fn close_async<E, C>(
        &self,
        event_loop: &E,
        cancellable: Option<Cancellable>,
        completion: C,
    ) where
        E: EventLoop + ?Sized,
        C: FnOnce(Result<()>) + Send + 'static,
    {
        let _ = cancellable;

        let inner = self.inner.clone();
        let owns_fd = self.close_fd_at_close;

        event_loop.defer(Box::new(move || {
            let outcome = if owns_fd {
                inner.close().map_err(Error::Io)
            } else {
                Ok(())
            };

            completion(outcome);
        }));
    }
}

/// Shared tail of every read path: the descriptor is (believed) readable, so
/// re-check cancellation, then attempt the read, retrying only the read on
/// interruption.
fn read_ready<D: Descriptor>(
    inner: &D,
    buf: &mut [u8],
    cancellable: Option<&Cancellable>,
) -> Result<usize> {
    loop {
        if let Some(cancellable) = cancellable {
            cancellable.check()?;
        }

        match inner.read(buf) {
            Err(Errno::EINTR) => continue,
            Err(errno) => return Err(Error::Io(errno)),
            Ok(count) => return Ok(count),
        }
    }
}
