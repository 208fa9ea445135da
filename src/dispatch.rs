use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use nix::sys::inotify::AddWatchFlags;

use crate::errors::{Error, Result};
use crate::events::{ChangeEvent, ChangeKind, KernelEvent};
use crate::sub::Subscription;

/// Outcome of installing a native kernel watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    Installed,
    /// The target path is absent (or installation failed because of it);
    /// the subscription becomes a missing-set candidate.
    NotFound,
}

/// Per-event callback registered with the watch manager at startup.
pub type EventCallback = Arc<dyn Fn(&KernelEvent, &Arc<Subscription>) + Send + Sync>;

/// The kernel watch-table collaborator.
///
/// Owns the native watches and the raw kernel read loop; maps raw events back
/// to subscriptions and hands each pair to the callback registered at
/// startup. Implementations must not invoke the callback while holding any
/// lock of their own.
pub trait WatchManager: Send {
    fn startup(&mut self, on_event: EventCallback) -> Result<()>;

    fn start_watching(&mut self, sub: &Arc<Subscription>) -> WatchOutcome;

    fn stop_watching(&mut self, sub: &Arc<Subscription>);
}

/// The missing-path scanner collaborator.
///
/// Periodically re-checks registered subscriptions through the
/// [`DispatcherHandle`] it receives at startup. `register` and `deregister`
/// are called with the dispatcher lock held and must not re-enter the
/// dispatcher synchronously.
pub trait Scanner: Send + Sync {
    fn startup(&self, dispatcher: DispatcherHandle) -> Result<()>;

    fn register(&self, sub: &Arc<Subscription>);

    fn deregister(&self, sub: &Arc<Subscription>);
}

/// Subscription registry and change-event dispatcher.
///
/// One lock serializes the three actors that touch the registry: API
/// callers ([`add`][`Dispatcher::add`] / [`cancel`][`Dispatcher::cancel`]),
/// the kernel-event consumer ([`deliver`][`Dispatcher::deliver`]) and the
/// missing-path scanner ([`DispatcherHandle`]). The lock is never held
/// across a blocking syscall or a consumer callout.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

struct Shared {
    scanner: Arc<dyn Scanner>,
    state: Mutex<State>,
}

struct State {
    watches: Box<dyn WatchManager>,
    watching: Vec<Arc<Subscription>>,
    missing: Vec<Arc<Subscription>>,
}

/// Initialize the process-wide dispatcher over the real collaborators.
///
/// Idempotent: the first call constructs the inotify watch manager and the
/// interval scanner; every later call observes the same outcome. A failure
/// here is permanent for the process. Must be called within a tokio runtime.
pub fn startup() -> Result<Dispatcher> {
    static GLOBAL: OnceLock<Result<Dispatcher>> = OnceLock::new();

    GLOBAL
        .get_or_init(|| {
            let watches = crate::inotify::InotifyWatchManager::new()?;
            let scanner = crate::scanner::IntervalScanner::default();

            Dispatcher::new(Box::new(watches), Arc::new(scanner))
        })
        .clone()
}

impl Dispatcher {
    /// Construct a dispatcher over explicit collaborators.
    ///
    /// Starts the watch manager (registering the delivery callback) and the
    /// scanner; either failing fails construction.
    pub fn new(watches: Box<dyn WatchManager>, scanner: Arc<dyn Scanner>) -> Result<Self> {
        let shared = Arc::new(Shared {
            scanner: scanner.clone(),
            state: Mutex::new(State {
                watches,
                watching: Vec::new(),
                missing: Vec::new(),
            }),
        });

        let weak = Arc::downgrade(&shared);
        let on_event: EventCallback = Arc::new(move |event, sub| {
            if let Some(shared) = weak.upgrade() {
                shared.deliver(event, sub);
            }
        });

        shared.lock().watches.startup(on_event)?;
        scanner.startup(DispatcherHandle {
            shared: Arc::downgrade(&shared),
        })?;

        tracing_impl::info!("change notification dispatcher started");

        Ok(Self { shared })
    }

    /// Handle for the scanner-facing operations.
    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Begin monitoring for `sub`.
    ///
    /// Never fails from the caller's point of view: a path that cannot be
    /// watched because it is absent lands in the missing set and is
    /// re-checked by the scanner until it appears or the subscription is
    /// cancelled.
    pub fn add(&self, sub: Arc<Subscription>) {
        let mut state = self.shared.lock();

        match state.watches.start_watching(&sub) {
            WatchOutcome::Installed => state.watching.push(sub),
            WatchOutcome::NotFound => {
                self.shared.scanner.register(&sub);
                state.missing.push(sub);
            }
        }
    }

    /// Stop monitoring for `sub`. Idempotent.
    ///
    /// Marks the subscription cancelled under the registry lock so no later
    /// delivery can reach it, and removes it from exactly the set it is in.
    /// A delivery already past its cancellation check is not retroactively
    /// suppressed.
    pub fn cancel(&self, sub: &Arc<Subscription>) {
        let mut state = self.shared.lock();

        if sub.set_cancelled() {
            return;
        }

        if let Some(index) = position(&state.watching, sub) {
            state.watching.remove(index);
            state.watches.stop_watching(sub);
        } else if let Some(index) = position(&state.missing, sub) {
            state.missing.remove(index);
            self.shared.scanner.deregister(sub);
        }
    }

    /// Deliver a raw kernel event to a subscription.
    ///
    /// Translates the mask (emitting nothing for meaningless kinds),
    /// re-checks cancellation under the registry lock, constructs the full
    /// event path, and emits at most one consumer event.
    pub fn deliver(&self, event: &KernelEvent, sub: &Arc<Subscription>) {
        self.shared.deliver(event, sub);
    }

    pub fn is_watching(&self, sub: &Arc<Subscription>) -> bool {
        position(&self.shared.lock().watching, sub).is_some()
    }

    pub fn is_missing(&self, sub: &Arc<Subscription>) -> bool {
        position(&self.shared.lock().missing, sub).is_some()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        // A panicking consumer must not wedge the registry; cancelled flags
        // are monotone so the state stays coherent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self, event: &KernelEvent, sub: &Arc<Subscription>) {
        let Some(kind) = ChangeKind::from_mask(event.mask) else {
            return;
        };

        let path = {
            let _state = self.lock();

            if sub.is_cancelled() {
                return;
            }

            sub.event_path(event.name.as_deref())
        };

        // Emitted outside the lock; a cancel landing between the check and
        // here is delivered best-effort.
        sub.consumer().emit(ChangeEvent {
            path,
            other_path: None,
            kind,
        });
    }
}

fn position(set: &[Arc<Subscription>], sub: &Arc<Subscription>) -> Option<usize> {
    set.iter().position(|candidate| Arc::ptr_eq(candidate, sub))
}

/// Scanner-facing view of a dispatcher.
///
/// Weak: outliving the dispatcher makes every operation a no-op.
#[derive(Clone)]
pub struct DispatcherHandle {
    shared: Weak<Shared>,
}

impl DispatcherHandle {
    /// Authoritatively re-check a missing subscription's path and promote it
    /// when possible.
    ///
    /// Returns whether the scanner should forget the subscription. A path
    /// that still does not exist returns `false` and nothing happens. When
    /// the path exists and the kernel watch installs, the subscription moves
    /// to the watching set, exactly one synthetic created event
    /// (directory-qualified when the subscription has no leaf name) is
    /// delivered through the normal path, and `true` is returned. When the
    /// watch does not install (the path vanished again, or the kernel
    /// refused it), the subscription stays missing, nothing is emitted, and
    /// the next tick retries. A subscription no longer in the missing set
    /// (cancelled, or already promoted) returns `true` without emitting.
    pub fn recheck_missing(&self, sub: &Arc<Subscription>) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return true;
        };

        if !sub.target_path().exists() {
            return false;
        }

        {
            let mut state = shared.lock();

            let Some(index) = position(&state.missing, sub) else {
                return true;
            };

            match state.watches.start_watching(sub) {
                WatchOutcome::Installed => {
                    let sub = state.missing.remove(index);
                    state.watching.push(sub);
                }
                WatchOutcome::NotFound => return false,
            }
        }

        // The synthetic event is tied to the promotion: raising it without a
        // live watch behind it would repeat on every tick.
        let mask = if sub.leaf_name().is_none() {
            AddWatchFlags::IN_CREATE | AddWatchFlags::IN_ISDIR
        } else {
            AddWatchFlags::IN_CREATE
        };

        let event = KernelEvent {
            mask,
            name: sub.leaf_name().map(|name| name.to_os_string()),
        };

        shared.deliver(&event, sub);

        true
    }
}
