use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::events::ChangeEvent;

/// Receives translated change events for one subscription.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ChangeEvent);
}

/// The consumer capability of a subscription.
///
/// The variant scopes what emitted events mean: a directory consumer is told
/// about the contents of the watched directory, a file consumer about a
/// single entry. Dispatch is a two-way switch over this enum.
pub enum Consumer {
    Directory(Box<dyn EventSink>),
    File(Box<dyn EventSink>),
}

impl Consumer {
    pub(crate) fn emit(&self, event: ChangeEvent) {
        match self {
            Consumer::Directory(sink) | Consumer::File(sink) => sink.emit(event),
        }
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Consumer::Directory(_) => f.write_str("Consumer::Directory"),
            Consumer::File(_) => f.write_str("Consumer::File"),
        }
    }
}

/// A watch request for a directory, or for a single entry within one.
///
/// Identity is the `Arc` allocation: registry membership and cancellation
/// compare subscriptions by pointer. The `cancelled` flag is monotone and is
/// only mutated with the dispatcher lock held (see `dispatch`).
#[derive(Debug)]
pub struct Subscription {
    path: PathBuf,
    leaf_name: Option<OsString>,
    cancelled: AtomicBool,
    consumer: Consumer,
}

impl Subscription {
    /// Watch the contents of `path` itself.
    pub fn directory(path: impl Into<PathBuf>, sink: Box<dyn EventSink>) -> Arc<Self> {
        Arc::new(Self {
            path: path.into(),
            leaf_name: None,
            cancelled: AtomicBool::new(false),
            consumer: Consumer::Directory(sink),
        })
    }

    /// Watch the single entry `leaf_name` within the directory `path`.
    pub fn file(
        path: impl Into<PathBuf>,
        leaf_name: impl Into<OsString>,
        sink: Box<dyn EventSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            path: path.into(),
            leaf_name: Some(leaf_name.into()),
            cancelled: AtomicBool::new(false),
            consumer: Consumer::File(sink),
        })
    }

    /// The watched directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn leaf_name(&self) -> Option<&OsStr> {
        self.leaf_name.as_deref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn consumer(&self) -> &Consumer {
        &self.consumer
    }

    /// Mark cancelled, returning whether it already was. Caller holds the
    /// dispatcher lock.
    pub(crate) fn set_cancelled(&self) -> bool {
        self.cancelled.swap(true, Ordering::SeqCst)
    }

    /// Full path carried by an emitted event: the event's child name if it
    /// has one, else this subscription's leaf, else the trailing-slash form
    /// naming the directory itself.
    pub(crate) fn event_path(&self, child: Option<&OsStr>) -> PathBuf {
        match child.or(self.leaf_name.as_deref()) {
            Some(name) => self.path.join(name),
            None => self.path.join(""),
        }
    }

    /// The path whose existence decides watching vs. missing.
    pub(crate) fn target_path(&self) -> PathBuf {
        match &self.leaf_name {
            Some(name) => self.path.join(name),
            None => self.path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChangeKind;

    struct NullSink;

    impl EventSink for NullSink {
        fn emit(&self, _event: ChangeEvent) {}
    }

    #[test]
    fn event_path_joins_the_child_name() {
        let sub = Subscription::directory("/tmp/d", Box::new(NullSink));
        assert_eq!(
            sub.event_path(Some(OsStr::new("f"))),
            PathBuf::from("/tmp/d/f")
        );
    }

    #[test]
    fn event_path_falls_back_to_the_leaf_name() {
        let sub = Subscription::file("/tmp/d", "f", Box::new(NullSink));
        assert_eq!(sub.event_path(None), PathBuf::from("/tmp/d/f"));
    }

    #[test]
    fn nameless_directory_event_uses_the_trailing_slash_form() {
        let sub = Subscription::directory("/tmp/d", Box::new(NullSink));
        assert_eq!(sub.event_path(None), PathBuf::from("/tmp/d/"));
    }

    #[test]
    fn target_path_includes_the_leaf() {
        let dir = Subscription::directory("/tmp/d", Box::new(NullSink));
        let file = Subscription::file("/tmp/d", "f", Box::new(NullSink));

        assert_eq!(dir.target_path(), PathBuf::from("/tmp/d"));
        assert_eq!(file.target_path(), PathBuf::from("/tmp/d/f"));
    }

    #[test]
    fn consumer_dispatch_reaches_the_sink_for_both_variants() {
        use std::sync::Mutex;

        struct Recording(Arc<Mutex<Vec<ChangeKind>>>);

        impl EventSink for Recording {
            fn emit(&self, event: ChangeEvent) {
                self.0.lock().unwrap().push(event.kind);
            }
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let event = ChangeEvent {
            path: PathBuf::from("/tmp/d/f"),
            other_path: None,
            kind: ChangeKind::Created,
        };

        for sub in [
            Subscription::directory("/tmp/d", Box::new(Recording(seen.clone()))),
            Subscription::file("/tmp/d", "f", Box::new(Recording(seen.clone()))),
        ] {
            sub.consumer().emit(event.clone());
        }

        assert_eq!(*seen.lock().unwrap(), [ChangeKind::Created; 2]);
    }
}
