//! Facility backed by the platform watcher `notify` recommends
//!
//! FSEvents on macOS, inotify on Linux, ReadDirectoryChangesW on Windows.
//! Kernel notifications are translated into flag sets, stamped with process
//! identifiers and coalesced per latency window before delivery.

use super::{
    BatchHandler, CoalescingBuffer, NativeFacility, NativeStream, RawEvent, StreamRequest,
};
use fsstream_core::error::{Error, Result};
use fsstream_core::event::{EventFlags, StreamCreationFlags};
use notify::event::{CreateKind, MetadataKind, ModifyKind, RemoveKind};
use notify::{
    Config as NotifyConfig, Event as NotifyEvent, EventKind, RecommendedWatcher, RecursiveMode,
    Watcher,
};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, trace};

/// Opens subscriptions on the platform's native watcher
#[derive(Debug, Default, Clone)]
pub struct RecommendedFacility;

impl RecommendedFacility {
    pub fn new() -> Self {
        Self
    }
}

impl NativeFacility for RecommendedFacility {
    fn name(&self) -> &'static str {
        "recommended"
    }

    fn open(
        &self,
        request: StreamRequest,
        handler: Arc<dyn BatchHandler>,
    ) -> Result<Box<dyn NativeStream>> {
        let buffer = CoalescingBuffer::new(&request, handler);
        let translator = Arc::new(Translator::new(&request));

        // Kernel history is not retained across processes, so replay is
        // immediately complete. The marker is queued before any kernel
        // record can be observed.
        if request.replays_history() {
            buffer.push_marker(request.history_done_path(), EventFlags::HISTORY_DONE);
        }

        let watcher = match create_watcher(&request, buffer.clone(), Arc::clone(&translator)) {
            Ok(watcher) => watcher,
            Err(e) => {
                buffer.stop();
                return Err(e);
            }
        };

        if request.replays_history() {
            buffer.flush();
        }

        info!(
            "Opened native stream on {} path(s) (recursive: {})",
            request.watched_paths.len(),
            request.recursive
        );
        Ok(Box::new(RecommendedStream {
            watcher: Mutex::new(Some(watcher)),
            buffer,
            request,
        }))
    }
}

fn create_watcher(
    request: &StreamRequest,
    buffer: CoalescingBuffer,
    translator: Arc<Translator>,
) -> Result<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |res: std::result::Result<NotifyEvent, notify::Error>| match res {
            Ok(event) => {
                trace!("Received notify event: {:?}", event);
                let records = translator.translate(&event);
                if !records.is_empty() {
                    buffer.push(records);
                }
            }
            Err(e) => {
                error!("Notify error: {}", e);
                buffer.push(translator.dropped());
            }
        },
        NotifyConfig::default(),
    )
    .map_err(|e| Error::stream_creation(format!("Failed to create watcher: {e}")))?;

    let mode = if request.recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };
    for path in &request.watched_paths {
        watcher
            .watch(path, mode)
            .map_err(|e| Error::stream_creation(format!("Failed to watch path {path:?}: {e}")))?;
        debug!("Watching path: {:?}", path);
    }

    Ok(watcher)
}

struct RecommendedStream {
    watcher: Mutex<Option<RecommendedWatcher>>,
    buffer: CoalescingBuffer,
    request: StreamRequest,
}

impl NativeStream for RecommendedStream {
    fn flush(&self) {
        self.buffer.flush();
    }

    fn stop(&mut self) {
        if let Some(watcher) = self.watcher.lock().take() {
            drop(watcher);
            self.buffer.stop();
            info!("Stopped native stream");
        }
    }

    fn describe(&self) -> String {
        let paths: Vec<String> = self
            .request
            .watched_paths
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        format!(
            "native stream on [{}] since {} latency {:?} flags {} recursive {} ({} pending)",
            paths.join(", "),
            self.request.since,
            self.request.latency,
            self.request.flags,
            self.request.recursive,
            self.buffer.pending_count()
        )
    }
}

impl Drop for RecommendedStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Maps notify events onto flag sets for one subscription
struct Translator {
    roots: Vec<PathBuf>,
    flags: StreamCreationFlags,
}

impl Translator {
    fn new(request: &StreamRequest) -> Self {
        Self {
            roots: request.watched_paths.clone(),
            flags: request.flags,
        }
    }

    fn translate(&self, event: &NotifyEvent) -> Vec<RawEvent> {
        let Some(mut base) = kind_flags(&event.kind) else {
            return Vec::new();
        };

        if event.need_rescan() {
            base |= EventFlags::MUST_SCAN_SUB_DIRS;
            if event.paths.is_empty() {
                // Queue overflow; the kernel could not say where
                return self.dropped();
            }
        }

        event
            .paths
            .iter()
            .map(|path| self.record(path, base))
            .collect()
    }

    fn record(&self, path: &Path, base: EventFlags) -> RawEvent {
        let mut flags = base;
        if !flags.intersects(EventFlags::ITEM_KIND) {
            flags |= item_kind(path);
        }

        let is_root = self.roots.iter().any(|root| root == path);
        if is_root
            && self.flags.contains(StreamCreationFlags::WATCH_ROOT)
            && flags.intersects(EventFlags::ITEM_REMOVED | EventFlags::ITEM_RENAMED)
        {
            flags |= EventFlags::ROOT_CHANGED;
        }

        if self.flags.contains(StreamCreationFlags::FILE_EVENTS) {
            return RawEvent::observed(path, flags);
        }

        // Directory granularity: report the containing directory
        let directory = if is_root {
            path
        } else {
            path.parent().unwrap_or(path)
        };
        RawEvent::observed(directory, flags & (EventFlags::ANOMALIES | EventFlags::ROOT_CHANGED))
    }

    /// Records telling the consumer to rescan every root
    fn dropped(&self) -> Vec<RawEvent> {
        self.roots
            .iter()
            .map(|root| {
                RawEvent::observed(
                    root,
                    EventFlags::KERNEL_DROPPED | EventFlags::MUST_SCAN_SUB_DIRS,
                )
            })
            .collect()
    }
}

/// Flag set for a notify event kind; `None` for kinds that are not changes
fn kind_flags(kind: &EventKind) -> Option<EventFlags> {
    let flags = match kind {
        EventKind::Access(_) => return None,
        EventKind::Create(create) => {
            EventFlags::ITEM_CREATED
                | match create {
                    CreateKind::File => EventFlags::ITEM_IS_FILE,
                    CreateKind::Folder => EventFlags::ITEM_IS_DIR,
                    _ => EventFlags::empty(),
                }
        }
        EventKind::Remove(remove) => {
            EventFlags::ITEM_REMOVED
                | match remove {
                    RemoveKind::File => EventFlags::ITEM_IS_FILE,
                    RemoveKind::Folder => EventFlags::ITEM_IS_DIR,
                    _ => EventFlags::empty(),
                }
        }
        EventKind::Modify(ModifyKind::Metadata(MetadataKind::Ownership)) => {
            EventFlags::ITEM_CHANGE_OWNER
        }
        EventKind::Modify(ModifyKind::Metadata(MetadataKind::Extended)) => {
            EventFlags::ITEM_XATTR_MOD
        }
        EventKind::Modify(ModifyKind::Metadata(_)) => EventFlags::ITEM_INODE_META_MOD,
        EventKind::Modify(ModifyKind::Name(_)) => EventFlags::ITEM_RENAMED,
        EventKind::Modify(_) => EventFlags::ITEM_MODIFIED,
        EventKind::Any | EventKind::Other => EventFlags::empty(),
    };
    Some(flags)
}

/// Item kind of a path that still exists
fn item_kind(path: &Path) -> EventFlags {
    match std::fs::symlink_metadata(path) {
        Ok(metadata) if metadata.file_type().is_symlink() => EventFlags::ITEM_IS_SYMLINK,
        Ok(metadata) if metadata.is_dir() => EventFlags::ITEM_IS_DIR,
        Ok(_) => EventFlags::ITEM_IS_FILE,
        Err(_) => EventFlags::empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::native::current_event_identifier;
    use fsstream_core::{EventIdentifier, StreamConfig};
    use std::time::Duration;
    use notify::event::{DataChange, Flag, RenameMode};
    use pretty_assertions::assert_eq;

    fn translator(flags: StreamCreationFlags) -> Translator {
        Translator {
            roots: vec![PathBuf::from("/tmp/a")],
            flags,
        }
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            kind_flags(&EventKind::Create(CreateKind::File)),
            Some(EventFlags::ITEM_CREATED | EventFlags::ITEM_IS_FILE)
        );
        assert_eq!(
            kind_flags(&EventKind::Remove(RemoveKind::Folder)),
            Some(EventFlags::ITEM_REMOVED | EventFlags::ITEM_IS_DIR)
        );
        assert_eq!(
            kind_flags(&EventKind::Modify(ModifyKind::Data(DataChange::Content))),
            Some(EventFlags::ITEM_MODIFIED)
        );
        assert_eq!(
            kind_flags(&EventKind::Modify(ModifyKind::Metadata(
                MetadataKind::Permissions
            ))),
            Some(EventFlags::ITEM_INODE_META_MOD)
        );
        assert_eq!(
            kind_flags(&EventKind::Modify(ModifyKind::Name(RenameMode::Both))),
            Some(EventFlags::ITEM_RENAMED)
        );
        assert_eq!(
            kind_flags(&EventKind::Access(notify::event::AccessKind::Any)),
            None
        );
        assert_eq!(kind_flags(&EventKind::Any), Some(EventFlags::empty()));
    }

    #[test]
    fn test_rename_reports_both_paths() {
        let event = NotifyEvent::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/tmp/a/old"))
            .add_path(PathBuf::from("/tmp/a/new"));

        let records = translator(StreamCreationFlags::FILE_EVENTS).translate(&event);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].path, PathBuf::from("/tmp/a/old"));
        assert_eq!(records[1].path, PathBuf::from("/tmp/a/new"));
        assert!(records.iter().all(|r| r.flags.contains(EventFlags::ITEM_RENAMED)));
        assert!(records[1].identifier > records[0].identifier);
    }

    #[test]
    fn test_directory_granularity() {
        let event = NotifyEvent::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/tmp/a/sub/file"));

        let records = translator(StreamCreationFlags::default()).translate(&event);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path, PathBuf::from("/tmp/a/sub"));
        assert_eq!(records[0].flags, EventFlags::empty());
    }

    #[test]
    fn test_root_removal() {
        let event = NotifyEvent::new(EventKind::Remove(RemoveKind::Folder))
            .add_path(PathBuf::from("/tmp/a"));

        let records = translator(StreamCreationFlags::default()).translate(&event);
        assert!(records[0].flags.contains(EventFlags::ROOT_CHANGED));
        assert_eq!(records[0].path, PathBuf::from("/tmp/a"));

        let records = translator(StreamCreationFlags::FILE_EVENTS).translate(&event);
        assert!(!records[0].flags.contains(EventFlags::ROOT_CHANGED));
    }

    #[test]
    fn test_overflow_requests_rescan_of_roots() {
        let event = NotifyEvent::new(EventKind::Other).set_flag(Flag::Rescan);

        let records = translator(StreamCreationFlags::FILE_EVENTS).translate(&event);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path, PathBuf::from("/tmp/a"));
        assert!(records[0]
            .flags
            .contains(EventFlags::KERNEL_DROPPED | EventFlags::MUST_SCAN_SUB_DIRS));
    }

    #[derive(Default)]
    struct Collector {
        batches: Mutex<Vec<Vec<RawEvent>>>,
    }

    impl BatchHandler for Collector {
        fn handle_batch(&self, batch: Vec<RawEvent>) {
            self.batches.lock().push(batch);
        }
    }

    fn resumed_request(root: PathBuf, since: EventIdentifier) -> StreamRequest {
        let config = StreamConfig::builder([root])
            .notification_latency(Duration::from_secs(60))
            .since_event_identifier(since)
            .build()
            .expect("valid configuration");
        StreamRequest::from_config(&config, ExecutionContext::current().expect("runtime"))
    }

    #[tokio::test]
    async fn test_missing_root_fails_stream_creation() {
        let temp_dir = tempfile::TempDir::new().expect("temp dir");
        let missing = temp_dir.path().join("does-not-exist");
        let collector = Arc::new(Collector::default());

        let err = RecommendedFacility::new()
            .open(
                resumed_request(missing, current_event_identifier()),
                collector.clone(),
            )
            .err()
            .expect("missing root is refused");
        assert!(err.is_stream_creation());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(collector.batches.lock().is_empty());
    }

    #[tokio::test]
    async fn test_history_done_precedes_kernel_records() {
        let temp_dir = tempfile::TempDir::new().expect("temp dir");
        let root = temp_dir.path().canonicalize().expect("canonical root");
        let since = current_event_identifier();
        let collector = Arc::new(Collector::default());

        let mut stream = RecommendedFacility::new()
            .open(resumed_request(root.clone(), since), collector.clone())
            .expect("stream opens");
        std::fs::write(root.join("file"), "content").expect("write");
        tokio::time::sleep(Duration::from_millis(200)).await;
        stream.flush();
        stream.stop();

        let records: Vec<RawEvent> = collector.batches.lock().iter().flatten().cloned().collect();
        assert!(records[0].flags.contains(EventFlags::HISTORY_DONE));
        assert!(records[0].identifier > since);
        assert!(records
            .windows(2)
            .all(|pair| pair[0].identifier < pair[1].identifier));
    }
}
