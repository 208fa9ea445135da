use std::collections::HashMap;
use std::io;
use std::ops::Deref;
use std::os::unix::prelude::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify, InotifyEvent, WatchDescriptor};
use tokio::io::{unix::AsyncFd, Interest};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::dispatch::{EventCallback, WatchManager, WatchOutcome};
use crate::errors::{Error, Result};
use crate::events::KernelEvent;
use crate::sub::Subscription;

struct OwnedInotify(Inotify);

impl Drop for OwnedInotify {
    fn drop(&mut self) {
        // SAFETY: drop has exclusive access and runs at most once, and the
        // descriptor is unreachable afterwards, so taking ownership of it
        // here to close it cannot double-close or race a user.
        drop(unsafe { OwnedFd::from_raw_fd(self.0.as_raw_fd()) });
    }
}

impl Deref for OwnedInotify {
    type Target = Inotify;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRawFd for OwnedInotify {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

#[derive(Default)]
struct WatchTable {
    by_path: HashMap<PathBuf, WatchDescriptor>,
    by_wd: HashMap<WatchDescriptor, Entry>,
}

struct Entry {
    path: PathBuf,
    subs: Vec<Arc<Subscription>>,
}

/// Kernel watch table over inotify.
///
/// One native watch per directory path, fanned out to every subscription on
/// it; file subscriptions receive only events naming their leaf (or nameless
/// self events). The raw read loop runs on a spawned task and hands each
/// (event, subscription) pair to the callback registered at startup.
pub struct InotifyWatchManager {
    fd: Arc<AsyncFd<OwnedInotify>>,
    table: Arc<Mutex<WatchTable>>,
    reader: Option<JoinHandle<()>>,
}

impl InotifyWatchManager {
    /// Initialize the inotify instance. Must run within a tokio runtime.
    pub fn new() -> Result<Self> {
        // Registering with the reactor outside a runtime would panic.
        Handle::try_current()
            .map_err(|_| Error::Init("no tokio runtime for the inotify backend".into()))?;

        let inotify = Inotify::init(InitFlags::IN_NONBLOCK | InitFlags::IN_CLOEXEC)
            .map_err(|errno| Error::Init(format!("inotify_init1: {errno}")))?;

        let fd = AsyncFd::with_interest(OwnedInotify(inotify), Interest::READABLE)
            .map_err(|error| Error::Init(format!("could not register inotify fd: {error}")))?;

        Ok(Self {
            fd: Arc::new(fd),
            table: Arc::new(Mutex::new(WatchTable::default())),
            reader: None,
        })
    }

    fn watch_mask() -> AddWatchFlags {
        AddWatchFlags::IN_MODIFY
            | AddWatchFlags::IN_ATTRIB
            | AddWatchFlags::IN_MOVE_SELF
            | AddWatchFlags::IN_MOVED_FROM
            | AddWatchFlags::IN_MOVED_TO
            | AddWatchFlags::IN_CREATE
            | AddWatchFlags::IN_DELETE
            | AddWatchFlags::IN_DELETE_SELF
    }
}

impl WatchManager for InotifyWatchManager {
    fn startup(&mut self, on_event: EventCallback) -> Result<()> {
        let handle = Handle::try_current()
            .map_err(|_| Error::Init("no tokio runtime for the inotify read task".into()))?;

        self.reader = Some(handle.spawn(read_loop(
            self.fd.clone(),
            self.table.clone(),
            on_event,
        )));

        Ok(())
    }

    fn start_watching(&mut self, sub: &Arc<Subscription>) -> WatchOutcome {
        let path = sub.path().to_path_buf();
        let mut table = lock(&self.table);

        if let Some(wd) = table.by_path.get(&path).copied() {
            if let Some(entry) = table.by_wd.get_mut(&wd) {
                entry.subs.push(sub.clone());
                return WatchOutcome::Installed;
            }
        }

        match self.fd.get_ref().add_watch(&path, Self::watch_mask()) {
            Ok(wd) => {
                table.by_path.insert(path.clone(), wd);
                table.by_wd.insert(
                    wd,
                    Entry {
                        path,
                        subs: vec![sub.clone()],
                    },
                );
                WatchOutcome::Installed
            }
            Err(errno) => {
                if errno != nix::errno::Errno::ENOENT {
                    tracing_impl::warn!(%errno, path = %path.display(), "could not install watch");
                }
                WatchOutcome::NotFound
            }
        }
    }

    fn stop_watching(&mut self, sub: &Arc<Subscription>) {
        let mut table = lock(&self.table);

        let Some(wd) = table.by_path.get(sub.path()).copied() else {
            return;
        };

        let Some(entry) = table.by_wd.get_mut(&wd) else {
            return;
        };

        entry.subs.retain(|candidate| !Arc::ptr_eq(candidate, sub));

        if entry.subs.is_empty() {
            let path = entry.path.clone();
            table.by_wd.remove(&wd);
            table.by_path.remove(&path);

            if let Err(errno) = self.fd.get_ref().rm_watch(wd) {
                tracing_impl::warn!(%errno, path = %path.display(), "could not remove watch");
            }
        }
    }
}

impl Drop for InotifyWatchManager {
    fn drop(&mut self) {
        if let Some(reader) = &self.reader {
            reader.abort();
        }
    }
}

fn lock(table: &Mutex<WatchTable>) -> MutexGuard<'_, WatchTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Does `sub` want this event? Directory subscriptions take everything on
/// their watch; file subscriptions only their own entry and self events.
fn interested(sub: &Subscription, event: &InotifyEvent) -> bool {
    match sub.leaf_name() {
        None => true,
        Some(leaf) => match &event.name {
            Some(name) => name.as_os_str() == leaf,
            None => true,
        },
    }
}

async fn read_loop(
    fd: Arc<AsyncFd<OwnedInotify>>,
    table: Arc<Mutex<WatchTable>>,
    on_event: EventCallback,
) {
    loop {
        let mut guard = match fd.readable().await {
            Ok(guard) => guard,
            Err(error) => {
                tracing_impl::error!(%error, "inotify readiness wait failed");
                return;
            }
        };

        let events = match guard.try_io(|inner| {
            inner
                .get_ref()
                .read_events()
                .map_err(|errno| io::Error::from_raw_os_error(errno as i32))
        }) {
            Ok(Ok(events)) => events,
            Ok(Err(error)) => {
                tracing_impl::error!(%error, "could not read kernel events");
                return;
            }
            // Spurious readiness; the guard has been cleared.
            Err(_would_block) => continue,
        };

        for event in events {
            // Snapshot the interested subscriptions, then dispatch with the
            // table unlocked: the callback takes the registry lock.
            let subs: Vec<Arc<Subscription>> = {
                let table = lock(&table);
                match table.by_wd.get(&event.wd) {
                    Some(entry) => entry
                        .subs
                        .iter()
                        .filter(|sub| interested(sub, &event))
                        .cloned()
                        .collect(),
                    // Watch already removed; late events for it are noise.
                    None => continue,
                }
            };

            let kernel_event = KernelEvent {
                mask: event.mask,
                name: event.name.clone(),
            };

            for sub in subs {
                on_event(&kernel_event, &sub);
            }
        }
    }
}
