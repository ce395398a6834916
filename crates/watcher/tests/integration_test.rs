//! Integration tests against the platform watcher
//!
//! These tests use temporary directories and real filesystem operations
//! to validate the recommended facility end to end.

use fsstream_core::{Event, EventIdentifier, StreamCreationFlags};
use fsstream_watcher::{current_event_identifier, EventsManager};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Temp dir with its canonical path, so reported paths compare equal
fn setup_dir() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().canonicalize().unwrap();
    (temp_dir, root)
}

/// Helper to create a test file
async fn create_test_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    tokio::fs::write(&path, content).await.unwrap();
    path
}

fn open_manager(
    root: &Path,
    flags: StreamCreationFlags,
    latency: Duration,
) -> (EventsManager, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let manager = EventsManager::builder([root])
        .notification_latency(latency)
        .creation_flags(flags)
        .callback(move |_, event| {
            let _ = tx.send(event.clone());
        })
        .build()
        .unwrap();
    (manager, rx)
}

fn file_events() -> StreamCreationFlags {
    StreamCreationFlags::default() | StreamCreationFlags::FILE_EVENTS
}

/// Next record for `path`, skipping records for anything else
async fn next_for(rx: &mut mpsc::UnboundedReceiver<Event>, path: &Path) -> Event {
    loop {
        let event = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        if event.path() == path {
            return event;
        }
    }
}

#[tokio::test]
async fn test_file_creation_detection() {
    let (_temp_dir, root) = setup_dir();
    let (_manager, mut events) = open_manager(&root, file_events(), Duration::from_millis(50));

    // Wait a bit for watcher to stabilize
    tokio::time::sleep(Duration::from_millis(100)).await;

    let test_file = create_test_file(&root, "test.rs", "fn main() {}").await;

    let event = next_for(&mut events, &test_file).await;
    assert!(event.is_created(), "Expected created record, got {event}");
}

#[tokio::test]
async fn test_file_modification_detection() {
    let (_temp_dir, root) = setup_dir();
    let test_file = create_test_file(&root, "test.rs", "fn main() {}").await;
    let (_manager, mut events) = open_manager(&root, file_events(), Duration::from_millis(50));

    tokio::time::sleep(Duration::from_millis(100)).await;

    tokio::fs::write(&test_file, "fn main() { println!(\"Hello\"); }")
        .await
        .unwrap();

    let event = next_for(&mut events, &test_file).await;
    assert!(event.is_modified(), "Expected modified record, got {event}");
}

#[tokio::test]
async fn test_file_deletion_detection() {
    let (_temp_dir, root) = setup_dir();
    let test_file = create_test_file(&root, "test.rs", "fn main() {}").await;
    let (_manager, mut events) = open_manager(&root, file_events(), Duration::from_millis(50));

    tokio::time::sleep(Duration::from_millis(100)).await;

    tokio::fs::remove_file(&test_file).await.unwrap();

    let event = next_for(&mut events, &test_file).await;
    assert!(event.is_removed(), "Expected removed record, got {event}");
}

#[tokio::test]
async fn test_nested_directory_watching() {
    let (_temp_dir, root) = setup_dir();
    let nested = root.join("src").join("module");
    tokio::fs::create_dir_all(&nested).await.unwrap();
    let (_manager, mut events) = open_manager(&root, file_events(), Duration::from_millis(50));

    tokio::time::sleep(Duration::from_millis(100)).await;

    let nested_file = create_test_file(&nested, "lib.rs", "pub fn test() {}").await;

    let event = next_for(&mut events, &nested_file).await;
    assert!(event.identifier() > EventIdentifier::new(0));
}

#[tokio::test]
async fn test_directory_granularity_reports_parent() {
    let (_temp_dir, root) = setup_dir();
    let (_manager, mut events) = open_manager(
        &root,
        StreamCreationFlags::default(),
        Duration::from_millis(50),
    );

    tokio::time::sleep(Duration::from_millis(100)).await;

    create_test_file(&root, "test.rs", "fn main() {}").await;

    let event = timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.path(), root.as_path());
    assert!(event.is_generic_change());
}

#[tokio::test]
async fn test_excluded_subtree_not_delivered() {
    let (_temp_dir, root) = setup_dir();
    let ignored = root.join("ignored");
    tokio::fs::create_dir(&ignored).await.unwrap();

    let (tx, mut events) = mpsc::unbounded_channel();
    let _manager = EventsManager::builder([&root])
        .exclude(&ignored)
        .notification_latency(Duration::from_millis(50))
        .creation_flags(file_events())
        .callback(move |_, event| {
            let _ = tx.send(event.clone());
        })
        .build()
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;

    create_test_file(&ignored, "file2.txt", "ignored").await;
    let kept = create_test_file(&root, "file1.txt", "kept").await;

    next_for(&mut events, &kept).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    while let Ok(event) = events.try_recv() {
        assert!(
            !event.path().starts_with(&ignored),
            "excluded path delivered: {event}"
        );
    }
}

#[tokio::test]
async fn test_flush_synchronously_skips_latency() {
    let (_temp_dir, root) = setup_dir();
    let (manager, mut events) = open_manager(&root, file_events(), Duration::from_secs(30));

    tokio::time::sleep(Duration::from_millis(100)).await;

    let test_file = create_test_file(&root, "test.rs", "fn main() {}").await;

    // Give the kernel notification time to reach the stream
    tokio::time::sleep(Duration::from_millis(500)).await;
    manager.flush_synchronously().await.unwrap();

    let mut delivered = Vec::new();
    while let Ok(event) = events.try_recv() {
        delivered.push(event.path().to_path_buf());
    }
    assert!(delivered.contains(&test_file), "got {delivered:?}");
}

#[tokio::test]
async fn test_since_identifier_orders_after_cursor() {
    let (_temp_dir, root) = setup_dir();
    let since = current_event_identifier();

    let (tx, mut events) = mpsc::unbounded_channel();
    let _manager = EventsManager::builder([&root])
        .since_event_identifier(since)
        .notification_latency(Duration::from_millis(50))
        .creation_flags(file_events())
        .callback(move |_, event| {
            let _ = tx.send(event.clone());
        })
        .build()
        .unwrap();

    let first = timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(first.is_history_done());
    assert!(first.identifier() > since);

    let test_file = create_test_file(&root, "test.rs", "fn main() {}").await;
    let event = next_for(&mut events, &test_file).await;
    assert!(event.identifier() > first.identifier());
}

#[tokio::test]
async fn test_missing_root_fails_stream_creation() {
    let (_temp_dir, root) = setup_dir();

    let err = EventsManager::builder([root.join("does-not-exist")])
        .callback(|_, _| {})
        .build()
        .unwrap_err();
    assert!(err.is_stream_creation());
}
