//! Event records, identifiers and flag sets
//!
//! Bit values mirror the FSEvents constants so records translated from any
//! facility carry the same meaning.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Monotonic identifier assigned by the native facility to every change
///
/// Totally ordered across all paths of one subscription. [`SINCE_NOW`] is
/// only ever a starting cursor, never the identifier of a delivered record.
///
/// [`SINCE_NOW`]: EventIdentifier::SINCE_NOW
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventIdentifier(u64);

impl EventIdentifier {
    /// Starting cursor meaning "only changes after the subscription opens"
    pub const SINCE_NOW: Self = Self(u64::MAX);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    pub const fn is_since_now(self) -> bool {
        self.0 == u64::MAX
    }
}

impl Default for EventIdentifier {
    fn default() -> Self {
        Self::SINCE_NOW
    }
}

impl From<u64> for EventIdentifier {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for EventIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_since_now() {
            f.write_str("since-now")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

bitflags! {
    /// Kinds of change reported for one path; several may be set at once
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct EventFlags: u32 {
        const MUST_SCAN_SUB_DIRS = 0x0000_0001;
        const USER_DROPPED = 0x0000_0002;
        const KERNEL_DROPPED = 0x0000_0004;
        const EVENT_IDS_WRAPPED = 0x0000_0008;
        const HISTORY_DONE = 0x0000_0010;
        const ROOT_CHANGED = 0x0000_0020;
        const MOUNT = 0x0000_0040;
        const UNMOUNT = 0x0000_0080;
        const ITEM_CREATED = 0x0000_0100;
        const ITEM_REMOVED = 0x0000_0200;
        const ITEM_INODE_META_MOD = 0x0000_0400;
        const ITEM_RENAMED = 0x0000_0800;
        const ITEM_MODIFIED = 0x0000_1000;
        const ITEM_FINDER_INFO_MOD = 0x0000_2000;
        const ITEM_CHANGE_OWNER = 0x0000_4000;
        const ITEM_XATTR_MOD = 0x0000_8000;
        const ITEM_IS_FILE = 0x0001_0000;
        const ITEM_IS_DIR = 0x0002_0000;
        const ITEM_IS_SYMLINK = 0x0004_0000;
        const OWN_EVENT = 0x0008_0000;
        const ITEM_IS_HARDLINK = 0x0010_0000;
        const ITEM_IS_LAST_HARDLINK = 0x0020_0000;
        const ITEM_CLONED = 0x0040_0000;
    }
}

impl EventFlags {
    /// Flags signalling that the facility lost track of changes and the
    /// consumer should re-enumerate the affected subtree
    pub const ANOMALIES: Self = Self::MUST_SCAN_SUB_DIRS
        .union(Self::USER_DROPPED)
        .union(Self::KERNEL_DROPPED)
        .union(Self::EVENT_IDS_WRAPPED);

    /// Flags describing the item itself rather than the stream
    pub const ITEM_KIND: Self = Self::ITEM_IS_FILE
        .union(Self::ITEM_IS_DIR)
        .union(Self::ITEM_IS_SYMLINK)
        .union(Self::ITEM_IS_HARDLINK)
        .union(Self::ITEM_IS_LAST_HARDLINK);
}

impl fmt::Display for EventFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }
        bitflags::parser::to_writer(self, f)
    }
}

bitflags! {
    /// Opaque creation options passed through to the native facility
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct StreamCreationFlags: u32 {
        const USE_CF_TYPES = 0x0000_0001;
        /// Deliver the first change after a quiet period without waiting
        const NO_DEFER = 0x0000_0002;
        /// Report moves and removals of the watched roots themselves
        const WATCH_ROOT = 0x0000_0004;
        /// Drop changes made by the current process
        const IGNORE_SELF = 0x0000_0008;
        /// File-level granularity instead of directory-level
        const FILE_EVENTS = 0x0000_0010;
        /// Flag changes made by the current process with `OWN_EVENT`
        const MARK_SELF = 0x0000_0020;
    }
}

impl Default for StreamCreationFlags {
    fn default() -> Self {
        Self::USE_CF_TYPES | Self::WATCH_ROOT
    }
}

impl fmt::Display for StreamCreationFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }
        bitflags::parser::to_writer(self, f)
    }
}

/// One reported change. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    identifier: EventIdentifier,
    path: PathBuf,
    flags: EventFlags,
    date: SystemTime,
}

impl Event {
    /// Create a record stamped with the current wall-clock time
    pub fn new(identifier: EventIdentifier, path: impl Into<PathBuf>, flags: EventFlags) -> Self {
        Self::new_at(identifier, path, flags, SystemTime::now())
    }

    pub fn new_at(
        identifier: EventIdentifier,
        path: impl Into<PathBuf>,
        flags: EventFlags,
        date: SystemTime,
    ) -> Self {
        Self {
            identifier,
            path: path.into(),
            flags,
            date,
        }
    }

    pub fn identifier(&self) -> EventIdentifier {
        self.identifier
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn flags(&self) -> EventFlags {
        self.flags
    }

    /// When the record was constructed
    pub fn date(&self) -> SystemTime {
        self.date
    }

    /// No specific flag is set; something changed somewhere under `path`
    pub fn is_generic_change(&self) -> bool {
        self.flags.is_empty()
    }

    /// The facility dropped or coalesced changes under `path`; the consumer
    /// should re-enumerate the subtree
    pub fn is_delivery_anomaly(&self) -> bool {
        self.flags.intersects(EventFlags::ANOMALIES)
    }

    pub fn must_rescan_subdirectories(&self) -> bool {
        self.flags.contains(EventFlags::MUST_SCAN_SUB_DIRS)
    }

    pub fn is_user_dropped(&self) -> bool {
        self.flags.contains(EventFlags::USER_DROPPED)
    }

    pub fn is_kernel_dropped(&self) -> bool {
        self.flags.contains(EventFlags::KERNEL_DROPPED)
    }

    pub fn is_event_identifiers_wrapped(&self) -> bool {
        self.flags.contains(EventFlags::EVENT_IDS_WRAPPED)
    }

    pub fn is_history_done(&self) -> bool {
        self.flags.contains(EventFlags::HISTORY_DONE)
    }

    pub fn is_root_changed(&self) -> bool {
        self.flags.contains(EventFlags::ROOT_CHANGED)
    }

    pub fn did_volume_mount(&self) -> bool {
        self.flags.contains(EventFlags::MOUNT)
    }

    pub fn did_volume_unmount(&self) -> bool {
        self.flags.contains(EventFlags::UNMOUNT)
    }

    pub fn is_created(&self) -> bool {
        self.flags.contains(EventFlags::ITEM_CREATED)
    }

    pub fn is_removed(&self) -> bool {
        self.flags.contains(EventFlags::ITEM_REMOVED)
    }

    pub fn is_inode_metadata_modified(&self) -> bool {
        self.flags.contains(EventFlags::ITEM_INODE_META_MOD)
    }

    pub fn is_renamed(&self) -> bool {
        self.flags.contains(EventFlags::ITEM_RENAMED)
    }

    pub fn is_modified(&self) -> bool {
        self.flags.contains(EventFlags::ITEM_MODIFIED)
    }

    pub fn is_finder_info_modified(&self) -> bool {
        self.flags.contains(EventFlags::ITEM_FINDER_INFO_MOD)
    }

    pub fn did_change_owner(&self) -> bool {
        self.flags.contains(EventFlags::ITEM_CHANGE_OWNER)
    }

    pub fn is_xattr_modified(&self) -> bool {
        self.flags.contains(EventFlags::ITEM_XATTR_MOD)
    }

    pub fn is_file(&self) -> bool {
        self.flags.contains(EventFlags::ITEM_IS_FILE)
    }

    pub fn is_dir(&self) -> bool {
        self.flags.contains(EventFlags::ITEM_IS_DIR)
    }

    pub fn is_symlink(&self) -> bool {
        self.flags.contains(EventFlags::ITEM_IS_SYMLINK)
    }

    pub fn is_own_event(&self) -> bool {
        self.flags.contains(EventFlags::OWN_EVENT)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({})",
            self.identifier,
            self.path.display(),
            self.flags
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_since_now_sentinel() {
        assert!(EventIdentifier::SINCE_NOW.is_since_now());
        assert!(!EventIdentifier::new(42).is_since_now());
        assert_eq!(EventIdentifier::default(), EventIdentifier::SINCE_NOW);
        assert_eq!(EventIdentifier::SINCE_NOW.to_string(), "since-now");
        assert_eq!(EventIdentifier::new(42).to_string(), "42");
    }

    #[test]
    fn test_identifier_ordering() {
        assert!(EventIdentifier::new(1) < EventIdentifier::new(2));
        assert!(EventIdentifier::new(u64::MAX - 1) < EventIdentifier::SINCE_NOW);
    }

    #[test]
    fn test_event_predicates() {
        let event = Event::new(
            EventIdentifier::new(7),
            "/tmp/a/file1",
            EventFlags::ITEM_CREATED | EventFlags::ITEM_MODIFIED | EventFlags::ITEM_IS_FILE,
        );

        assert!(event.is_created());
        assert!(event.is_modified());
        assert!(event.is_file());
        assert!(!event.is_dir());
        assert!(!event.is_removed());
        assert!(!event.is_generic_change());
        assert!(!event.is_delivery_anomaly());
        assert_eq!(event.path(), Path::new("/tmp/a/file1"));
    }

    #[test]
    fn test_delivery_anomaly() {
        let rescan = Event::new(
            EventIdentifier::new(1),
            "/tmp/a",
            EventFlags::MUST_SCAN_SUB_DIRS | EventFlags::KERNEL_DROPPED,
        );
        assert!(rescan.is_delivery_anomaly());
        assert!(rescan.must_rescan_subdirectories());
        assert!(rescan.is_kernel_dropped());
        assert!(!rescan.is_user_dropped());

        let generic = Event::new(EventIdentifier::new(2), "/tmp/a", EventFlags::empty());
        assert!(generic.is_generic_change());
        assert!(!generic.is_delivery_anomaly());
    }

    #[test]
    fn test_flags_display() {
        assert_eq!(EventFlags::empty().to_string(), "NONE");
        assert_eq!(
            (EventFlags::ITEM_CREATED | EventFlags::ITEM_IS_FILE).to_string(),
            "ITEM_CREATED | ITEM_IS_FILE"
        );
        assert_eq!(
            StreamCreationFlags::default().to_string(),
            "USE_CF_TYPES | WATCH_ROOT"
        );
    }

    #[test]
    fn test_creation_flags_from_name() {
        assert_eq!(
            StreamCreationFlags::from_name("FILE_EVENTS"),
            Some(StreamCreationFlags::FILE_EVENTS)
        );
        assert_eq!(StreamCreationFlags::from_name("BOGUS"), None);
    }

    #[test]
    fn test_event_json_shape() {
        let event = Event::new(
            EventIdentifier::new(9),
            "/tmp/a/file1",
            EventFlags::ITEM_REMOVED,
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["identifier"], 9);
        assert_eq!(json["path"], "/tmp/a/file1");
        assert_eq!(json["flags"], "ITEM_REMOVED");
    }
}
