use std::ffi::OsString;
use std::path::PathBuf;

use nix::sys::inotify::AddWatchFlags;

/// A raw kernel change event, as handed over by the watch manager.
///
/// `name` is present when the event pertains to an entry inside a watched
/// directory; self events carry no name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelEvent {
    pub mask: AddWatchFlags,
    pub name: Option<OsString>,
}

/// The closed vocabulary of change kinds consumers see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, displaydoc::Display)]
pub enum ChangeKind {
    /// contents changed
    Changed,
    /// attributes changed
    AttributeChanged,
    /// deleted or moved away
    Deleted,
    /// created or moved in
    Created,
    /// filesystem unmounted
    Unmounted,
}

impl ChangeKind {
    /// Translate a raw mask into a change kind.
    ///
    /// The directory qualifier bit is stripped before matching. Kinds with
    /// no consumer meaning (queue overflow, open/close/access traffic, watch
    /// removal, unknown bits) translate to `None` and emit nothing; the
    /// translation is total.
    pub fn from_mask(mask: AddWatchFlags) -> Option<Self> {
        let mask = mask & !AddWatchFlags::IN_ISDIR;

        if mask == AddWatchFlags::IN_MODIFY {
            Some(ChangeKind::Changed)
        } else if mask == AddWatchFlags::IN_ATTRIB {
            Some(ChangeKind::AttributeChanged)
        } else if mask == AddWatchFlags::IN_MOVE_SELF
            || mask == AddWatchFlags::IN_MOVED_FROM
            || mask == AddWatchFlags::IN_DELETE
            || mask == AddWatchFlags::IN_DELETE_SELF
        {
            Some(ChangeKind::Deleted)
        } else if mask == AddWatchFlags::IN_CREATE || mask == AddWatchFlags::IN_MOVED_TO {
            Some(ChangeKind::Created)
        } else if mask == AddWatchFlags::IN_UNMOUNT {
            Some(ChangeKind::Unmounted)
        } else {
            None
        }
    }
}

/// A fully-formed event delivered to a consumer.
///
/// `other_path` is reserved for rename/move pairing; no cross-event
/// correlation is performed by this crate, so it is always `None` here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub other_path: Option<PathBuf>,
    pub kind: ChangeKind,
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::inotify::AddWatchFlags as F;

    #[test]
    fn every_meaningful_kind_translates_per_the_table() {
        assert_eq!(ChangeKind::from_mask(F::IN_MODIFY), Some(ChangeKind::Changed));
        assert_eq!(
            ChangeKind::from_mask(F::IN_ATTRIB),
            Some(ChangeKind::AttributeChanged)
        );
        assert_eq!(ChangeKind::from_mask(F::IN_MOVE_SELF), Some(ChangeKind::Deleted));
        assert_eq!(ChangeKind::from_mask(F::IN_MOVED_FROM), Some(ChangeKind::Deleted));
        assert_eq!(ChangeKind::from_mask(F::IN_DELETE), Some(ChangeKind::Deleted));
        assert_eq!(ChangeKind::from_mask(F::IN_DELETE_SELF), Some(ChangeKind::Deleted));
        assert_eq!(ChangeKind::from_mask(F::IN_CREATE), Some(ChangeKind::Created));
        assert_eq!(ChangeKind::from_mask(F::IN_MOVED_TO), Some(ChangeKind::Created));
        assert_eq!(ChangeKind::from_mask(F::IN_UNMOUNT), Some(ChangeKind::Unmounted));
    }

    #[test]
    fn noise_kinds_translate_to_nothing() {
        assert_eq!(ChangeKind::from_mask(F::IN_OPEN), None);
        assert_eq!(ChangeKind::from_mask(F::IN_CLOSE_WRITE), None);
        assert_eq!(ChangeKind::from_mask(F::IN_CLOSE_NOWRITE), None);
        assert_eq!(ChangeKind::from_mask(F::IN_ACCESS), None);
        assert_eq!(ChangeKind::from_mask(F::empty()), None);
        assert_eq!(ChangeKind::from_mask(F::IN_OPEN | F::IN_ACCESS), None);
    }

    #[test]
    fn directory_qualifier_is_stripped_before_matching() {
        assert_eq!(
            ChangeKind::from_mask(F::IN_CREATE | F::IN_ISDIR),
            Some(ChangeKind::Created)
        );
        assert_eq!(
            ChangeKind::from_mask(F::IN_DELETE | F::IN_ISDIR),
            Some(ChangeKind::Deleted)
        );
        assert_eq!(ChangeKind::from_mask(F::IN_ISDIR), None);
    }
}
