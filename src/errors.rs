use std::io;

use nix::errno::Errno;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Terminal outcomes surfaced by the bridges.
///
/// Interruption of a syscall by an unrelated signal (`EINTR`) is never one of
/// these: it is retried locally and does not escape this crate. Calling an
/// explicitly unsupported operation is a programming-contract violation and
/// panics instead of returning a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// An OS failure, translated from the raw errno of the failing syscall.
    #[error("i/o error: {0}")]
    Io(Errno),

    /// A cancellation signal was observed before the operation took effect.
    #[error("operation was cancelled")]
    Cancelled,

    /// The change-notification backend could not be brought up. Permanent
    /// for the lifetime of the process when returned from [`startup`].
    ///
    /// [`startup`]: crate::dispatch::startup
    #[error("change notification backend failed to start: {0}")]
    Init(String),
}

impl Error {
    /// Generic [`io::ErrorKind`] for an [`Error::Io`], `None` otherwise.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        let Error::Io(errno) = self else { return None };

        Some(match errno {
            Errno::EACCES | Errno::EPERM => io::ErrorKind::PermissionDenied,
            Errno::ENOENT => io::ErrorKind::NotFound,
            Errno::EEXIST => io::ErrorKind::AlreadyExists,
            Errno::EINVAL => io::ErrorKind::InvalidInput,
            Errno::EPIPE => io::ErrorKind::BrokenPipe,
            Errno::EAGAIN => io::ErrorKind::WouldBlock,
            Errno::ETIMEDOUT => io::ErrorKind::TimedOut,
            Errno::EINTR => io::ErrorKind::Interrupted,
            _ => io::ErrorKind::Other,
        })
    }
}

impl From<Errno> for Error {
    fn from(errno: Errno) -> Self {
        Error::Io(errno)
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        match error.raw_os_error() {
            Some(raw) => Error::Io(Errno::from_i32(raw)),
            None => Error::Io(Errno::EIO),
        }
    }
}
