//! Cancellable descriptor I/O and filesystem change-notification bridges.
//!
//! Two components, independent but structurally analogous:
//!
//! - [`FdStream`]: a cancellable read/close bridge over a raw descriptor.
//!   Synchronous calls race the blocking syscall against a [`Cancellable`]
//!   in a single multiplexed wait; asynchronous calls go through an
//!   [`EventLoop`], completing inline on readiness (read) or deferred
//!   (close). Every issued operation completes exactly once.
//!
//! - [`Dispatcher`]: a subscription registry that turns raw kernel change
//!   events into typed per-subscriber callbacks, with a missing-path
//!   fallback for watching paths that do not exist yet. One lock serializes
//!   API callers, the kernel-event consumer and the missing-path scanner.
//!
//! Linux only: the bridges are built on `poll(2)`, eventfd and inotify.

/// Shared cancellation handles.
pub mod cancel;

/// Subscription registry and change-event dispatch.
pub mod dispatch;

/// Errors produced by this crate.
pub mod errors;

/// Event-loop collaborator interface and its tokio implementation.
pub mod event_loop;

/// Raw kernel events and their consumer-facing translation.
pub mod events;

/// inotify-backed kernel watch table.
pub mod inotify;

/// Stream consumers over subscriptions.
pub mod monitor;

/// Periodic re-checks for watch requests on paths that do not exist yet.
pub mod scanner;

/// Cancellable read/close over a raw descriptor.
pub mod stream;

/// Watch subscriptions and their consumer capabilities.
pub mod sub;

pub use cancel::Cancellable;
pub use dispatch::{
    startup, Dispatcher, DispatcherHandle, EventCallback, Scanner, WatchManager, WatchOutcome,
};
pub use errors::{Error, Result};
pub use event_loop::{Callback, EventLoop, TokioEventLoop};
pub use events::{ChangeEvent, ChangeKind, KernelEvent};
pub use inotify::InotifyWatchManager;
pub use monitor::{ChannelSink, MonitorStream};
pub use scanner::IntervalScanner;
pub use stream::{Descriptor, FdStream, RawDescriptor};
pub use sub::{Consumer, EventSink, Subscription};
