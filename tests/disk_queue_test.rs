//! Integration tests for the file-backed durable queue
//!
//! Covers record framing on disk, corruption detection, replay of a leftover file, and
//! concurrent appends racing a reader.

use prometheus_spillway::core::QueueError;
use prometheus_spillway::infra::queue::{DurableQueue, FileDiskQueue};
use std::sync::Arc;
use std::thread;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn frame(payload: &str) -> Vec<u8> {
    let mut bytes = (payload.len() as i32).to_be_bytes().to_vec();
    bytes.extend_from_slice(payload.as_bytes());
    bytes
}

fn drain(queue: &FileDiskQueue) -> Vec<String> {
    let mut out = Vec::new();
    while let Some(record) = queue.poll().expect("Failed to poll") {
        queue.ack(record.next_position).expect("Failed to ack");
        out.push(record.message);
    }
    out
}

// ============================================================================
// FRAMING
// ============================================================================

#[test]
fn test_on_disk_layout_is_length_prefixed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.queue");
    let queue = FileDiskQueue::open(&path).unwrap();

    queue.append("abc").unwrap();
    queue.append("héllo").unwrap();

    let mut expected = frame("abc");
    expected.extend(frame("héllo"));
    assert_eq!(std::fs::read(&path).unwrap(), expected);
}

#[test]
fn test_fifo_with_positions() {
    let dir = tempfile::tempdir().unwrap();
    let queue = FileDiskQueue::open(dir.path().join("tasks.queue")).unwrap();
    assert!(queue.is_empty().unwrap());
    assert!(queue.poll().unwrap().is_none());

    queue.append("first").unwrap();
    queue.append("").unwrap();
    queue.append("third").unwrap();
    assert!(!queue.is_empty().unwrap());

    let first = queue.poll().unwrap().unwrap();
    assert_eq!(first.message, "first");
    assert_eq!(first.next_position, 9);
    let empty = queue.poll().unwrap().unwrap();
    assert_eq!(empty.message, "");
    assert_eq!(empty.next_position, 13);
    let third = queue.poll().unwrap().unwrap();
    assert_eq!(third.message, "third");
    assert_eq!(third.next_position, 22);

    assert!(queue.is_empty().unwrap());
    assert!(queue.poll().unwrap().is_none());

    // Out-of-order acks never move the commit position backwards.
    queue.ack(third.next_position).unwrap();
    queue.ack(first.next_position).unwrap();
    assert_eq!(queue.commit_position(), 22);
}

// ============================================================================
// CORRUPTION
// ============================================================================

#[test]
fn test_negative_length_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.queue");
    std::fs::write(&path, (-5i32).to_be_bytes()).unwrap();

    let queue = FileDiskQueue::open(&path).unwrap();
    assert!(!queue.is_empty().unwrap());
    let err = queue.poll().unwrap_err();
    assert!(matches!(err, QueueError::Corrupt(_)), "unexpected error: {err}");
    assert!(err.to_string().contains("-5"));
}

#[test]
fn test_oversized_length_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.queue");
    let mut bytes = 20_000_000i32.to_be_bytes().to_vec();
    bytes.extend_from_slice(b"short");
    std::fs::write(&path, bytes).unwrap();

    let queue = FileDiskQueue::open(&path).unwrap();
    assert!(matches!(queue.poll(), Err(QueueError::Corrupt(_))));
}

#[test]
fn test_truncated_payload_is_corrupt_after_good_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.queue");
    let mut bytes = frame("ok-1");
    bytes.extend_from_slice(&100i32.to_be_bytes());
    bytes.extend_from_slice(b"partial");
    std::fs::write(&path, bytes).unwrap();

    let queue = FileDiskQueue::open(&path).unwrap();
    assert_eq!(queue.poll().unwrap().unwrap().message, "ok-1");
    assert!(matches!(queue.poll(), Err(QueueError::Corrupt(_))));
    // The failed read does not advance past the bad record.
    assert_eq!(queue.read_position(), 8);
}

#[test]
fn test_truncated_header_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.queue");
    std::fs::write(&path, [0u8, 0]).unwrap();

    let queue = FileDiskQueue::open(&path).unwrap();
    assert!(matches!(queue.poll(), Err(QueueError::Corrupt(_))));
}

// ============================================================================
// LIFECYCLE
// ============================================================================

#[test]
fn test_reopen_replays_unconsumed_and_consumed_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.queue");
    {
        let queue = FileDiskQueue::open(&path).unwrap();
        queue.append("a").unwrap();
        queue.append("b").unwrap();
        let record = queue.poll().unwrap().unwrap();
        queue.ack(record.next_position).unwrap();
        // Dropped without close: the file stays.
    }
    assert!(path.exists());

    let queue = FileDiskQueue::open(&path).unwrap();
    assert_eq!(drain(&queue), vec!["a", "b"]);
}

#[test]
fn test_close_removes_file_and_rejects_use() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.queue");
    let queue = FileDiskQueue::open(&path).unwrap();
    queue.append("x").unwrap();

    queue.close().unwrap();
    assert!(!path.exists());
    queue.close().unwrap();

    assert!(matches!(queue.append("y"), Err(QueueError::Closed)));
    assert!(matches!(queue.poll(), Err(QueueError::Closed)));
    assert!(matches!(queue.ack(1), Err(QueueError::Closed)));
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[test]
fn test_concurrent_writers_and_reader() {
    const WRITERS: usize = 4;
    const PER_WRITER: usize = 50;

    let dir = tempfile::tempdir().unwrap();
    let queue = Arc::new(FileDiskQueue::open(dir.path().join("tasks.queue")).unwrap());

    let writers: Vec<_> = (0..WRITERS)
        .map(|w| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..PER_WRITER {
                    queue.append(&format!("w{w}-{i}")).unwrap();
                }
            })
        })
        .collect();

    let reader = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            let mut seen = Vec::new();
            while seen.len() < WRITERS * PER_WRITER {
                match queue.poll().unwrap() {
                    Some(record) => {
                        queue.ack(record.next_position).unwrap();
                        seen.push(record.message);
                    }
                    None => thread::yield_now(),
                }
            }
            seen
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    let seen = reader.join().unwrap();

    // Each writer's records come back in the order it wrote them.
    for w in 0..WRITERS {
        let prefix = format!("w{w}-");
        let mine: Vec<_> = seen.iter().filter(|m| m.starts_with(&prefix)).cloned().collect();
        let expected: Vec<_> = (0..PER_WRITER).map(|i| format!("w{w}-{i}")).collect();
        assert_eq!(mine, expected);
    }
    assert!(queue.is_empty().unwrap());
}
