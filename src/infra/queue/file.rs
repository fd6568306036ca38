//! Single-file durable queue.
//!
//! Records are appended to one growing file as `[4-byte big-endian length][UTF-8 payload]`
//! with no header, checksum, or rotation. Reads walk the file from a read position;
//! acknowledgments advance a separate commit position. The file is never rewritten in
//! place and is only deleted by [`DurableQueue::close`].
//!
//! Opening an existing file starts reading at offset 0, so anything left behind by a
//! previous process is delivered again.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::FairMutex;
use tracing::{debug, error, warn};

use super::{DiskRecord, DurableQueue};
use crate::core::QueueError;

/// Largest payload a record may declare.
pub const MAX_RECORD_LEN: usize = 10_000_000;

const HEADER_LEN: u64 = 4;

#[derive(Debug)]
struct Inner {
    file: Option<File>,
    read_position: u64,
    commit_position: u64,
}

impl Inner {
    fn file(&mut self) -> Result<&mut File, QueueError> {
        self.file.as_mut().ok_or(QueueError::Closed)
    }
}

/// File-backed [`DurableQueue`]. Every operation is serialized by one fair lock.
#[derive(Debug)]
pub struct FileDiskQueue {
    path: PathBuf,
    inner: FairMutex<Inner>,
}

impl FileDiskQueue {
    /// Create or open the queue file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Io`] if the file cannot be created or opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let existing = file.metadata()?.len();
        if existing > 0 {
            warn!(path = %path.display(), bytes = existing, "opened non-empty queue file; replaying from start");
        }
        debug!(path = %path.display(), "disk queue opened");
        Ok(Self {
            path,
            inner: FairMutex::new(Inner {
                file: Some(file),
                read_position: 0,
                commit_position: 0,
            }),
        })
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next unread byte offset.
    #[must_use]
    pub fn read_position(&self) -> u64 {
        self.inner.lock().read_position
    }

    /// Highest acknowledged byte offset.
    #[must_use]
    pub fn commit_position(&self) -> u64 {
        self.inner.lock().commit_position
    }
}

/// Storage a frame is appended to.
trait FrameSink: Write + Seek {
    fn sync(&mut self) -> io::Result<()>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl FrameSink for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Write `frame` at the end of `sink` and flush it. On failure the sink is cut back to
/// its previous length so no partial frame is left in front of later appends.
fn append_frame<S: FrameSink>(sink: &mut S, frame: &[u8]) -> io::Result<()> {
    let start = sink.seek(SeekFrom::End(0))?;
    if let Err(e) = sink.write_all(frame).and_then(|()| sink.sync()) {
        warn!(offset = start, error = %e, "append failed; rolling back partial frame");
        if let Err(rollback) = sink.truncate(start).and_then(|()| sink.sync()) {
            error!(offset = start, error = %rollback, "failed to roll back partial frame");
        }
        return Err(e);
    }
    Ok(())
}

impl DurableQueue for FileDiskQueue {
    fn append(&self, message: &str) -> Result<(), QueueError> {
        let data = message.as_bytes();
        if data.len() > MAX_RECORD_LEN {
            return Err(QueueError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("record of {} bytes exceeds {MAX_RECORD_LEN}", data.len()),
            )));
        }
        // MAX_RECORD_LEN fits in an i32.
        let len = i32::try_from(data.len())
            .map_err(|e| QueueError::Io(io::Error::new(io::ErrorKind::InvalidInput, e)))?;

        let mut frame = Vec::with_capacity(data.len() + 4);
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(data);

        let mut inner = self.inner.lock();
        append_frame(inner.file()?, &frame)?;
        Ok(())
    }

    fn poll(&self) -> Result<Option<DiskRecord>, QueueError> {
        let mut inner = self.inner.lock();
        let read_position = inner.read_position;
        let file = inner.file()?;
        let size = file.metadata()?.len();
        if read_position >= size {
            return Ok(None);
        }
        if size - read_position < HEADER_LEN {
            return Err(QueueError::Corrupt(format!(
                "truncated record header at offset {read_position}"
            )));
        }

        let mut header = [0u8; 4];
        file.seek(SeekFrom::Start(read_position))?;
        file.read_exact(&mut header)?;
        let declared = i32::from_be_bytes(header);
        let len = usize::try_from(declared)
            .ok()
            .filter(|len| *len <= MAX_RECORD_LEN)
            .ok_or_else(|| QueueError::Corrupt(format!("invalid record length {declared}")))?;

        let payload_position = read_position + HEADER_LEN;
        let next_position = payload_position + len as u64;
        if next_position > size {
            return Err(QueueError::Corrupt(format!(
                "incomplete payload at offset {payload_position}: declared {len} bytes, {} available",
                size - payload_position
            )));
        }

        let mut data = vec![0u8; len];
        file.read_exact(&mut data)?;
        let message = String::from_utf8(data)
            .map_err(|e| QueueError::Corrupt(format!("payload at offset {payload_position} is not UTF-8: {e}")))?;

        inner.read_position = next_position;
        Ok(Some(DiskRecord {
            next_position,
            message,
        }))
    }

    fn ack(&self, next_position: u64) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        inner.file()?;
        if next_position > inner.read_position {
            warn!(next_position, read_position = inner.read_position, "ignoring ack past read position");
            return Ok(());
        }
        if next_position > inner.commit_position {
            inner.commit_position = next_position;
        }
        Ok(())
    }

    fn is_empty(&self) -> Result<bool, QueueError> {
        let mut inner = self.inner.lock();
        let read_position = inner.read_position;
        let size = inner.file()?.metadata()?.len();
        Ok(read_position >= size)
    }

    fn close(&self) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        if inner.file.take().is_none() {
            return Ok(());
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        debug!(path = %self.path.display(), "disk queue closed and removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> (tempfile::TempDir, FileDiskQueue) {
        let dir = tempfile::tempdir().unwrap();
        let q = FileDiskQueue::open(dir.path().join("q.bin")).unwrap();
        (dir, q)
    }

    #[test]
    fn test_fifo_order() {
        let (_dir, q) = queue();
        assert!(q.is_empty().unwrap());

        q.append("A").unwrap();
        q.append("B").unwrap();
        assert!(!q.is_empty().unwrap());

        let a = q.poll().unwrap().unwrap();
        assert_eq!(a.message, "A");
        assert_eq!(a.next_position, 5);
        let b = q.poll().unwrap().unwrap();
        assert_eq!(b.message, "B");
        assert_eq!(b.next_position, 10);

        assert!(q.poll().unwrap().is_none());
        assert!(q.is_empty().unwrap());
    }

    #[test]
    fn test_ack_is_monotonic_and_idempotent() {
        let (_dir, q) = queue();
        q.append("first").unwrap();
        q.append("second").unwrap();
        let first = q.poll().unwrap().unwrap();
        let second = q.poll().unwrap().unwrap();

        q.ack(second.next_position).unwrap();
        assert_eq!(q.commit_position(), second.next_position);
        q.ack(second.next_position).unwrap();
        q.ack(first.next_position).unwrap();
        q.ack(0).unwrap();
        assert_eq!(q.commit_position(), second.next_position);
    }

    #[test]
    fn test_ack_past_read_position_is_ignored() {
        let (_dir, q) = queue();
        q.append("pending").unwrap();
        q.ack(1_000).unwrap();
        assert_eq!(q.commit_position(), 0);
    }

    #[test]
    fn test_multibyte_payload_positions() {
        let (_dir, q) = queue();
        q.append("héllo-1").unwrap();
        let rec = q.poll().unwrap().unwrap();
        assert_eq!(rec.message, "héllo-1");
        assert_eq!(rec.next_position, 4 + "héllo-1".len() as u64);
        assert_eq!(q.read_position(), rec.next_position);
    }

    #[test]
    fn test_oversized_append_rejected() {
        let (_dir, q) = queue();
        let big = "x".repeat(MAX_RECORD_LEN + 1);
        assert!(matches!(q.append(&big), Err(QueueError::Io(_))));
        assert!(q.is_empty().unwrap());
    }

    /// In-memory sink that accepts `budget` bytes before writes start failing.
    struct FlakySink {
        data: io::Cursor<Vec<u8>>,
        budget: usize,
        fail_sync: bool,
    }

    impl FlakySink {
        fn new(existing: &[u8], budget: usize, fail_sync: bool) -> Self {
            Self {
                data: io::Cursor::new(existing.to_vec()),
                budget,
                fail_sync,
            }
        }
    }

    impl Write for FlakySink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::new(io::ErrorKind::StorageFull, "no space left"));
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            self.data.write(&buf[..n])
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for FlakySink {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.data.seek(pos)
        }
    }

    impl FrameSink for FlakySink {
        fn sync(&mut self) -> io::Result<()> {
            if self.fail_sync {
                self.fail_sync = false;
                return Err(io::Error::other("sync failed"));
            }
            Ok(())
        }

        fn truncate(&mut self, len: u64) -> io::Result<()> {
            self.data.get_mut().truncate(usize::try_from(len).unwrap());
            Ok(())
        }
    }

    fn frame(payload: &str) -> Vec<u8> {
        let mut bytes = (payload.len() as i32).to_be_bytes().to_vec();
        bytes.extend_from_slice(payload.as_bytes());
        bytes
    }

    #[test]
    fn test_failed_write_leaves_no_partial_frame() {
        let existing = frame("kept-1");
        let mut sink = FlakySink::new(&existing, 3, false);

        assert!(append_frame(&mut sink, &frame("lost-2")).is_err());
        assert_eq!(sink.data.get_ref(), &existing);

        sink.budget = usize::MAX;
        append_frame(&mut sink, &frame("next-3")).unwrap();
        let mut expected = existing;
        expected.extend(frame("next-3"));
        assert_eq!(sink.data.get_ref(), &expected);
    }

    #[test]
    fn test_failed_sync_rolls_back_frame() {
        let existing = frame("kept-1");
        let mut sink = FlakySink::new(&existing, usize::MAX, true);

        assert!(append_frame(&mut sink, &frame("unsynced-2")).is_err());
        assert_eq!(sink.data.get_ref(), &existing);
    }

    #[test]
    fn test_close_deletes_file_and_blocks_further_use() {
        let (_dir, q) = queue();
        q.append("A").unwrap();
        let path = q.path().to_path_buf();
        assert!(path.exists());
        q.close().unwrap();
        assert!(!path.exists());
        assert!(matches!(q.append("B"), Err(QueueError::Closed)));
        assert!(matches!(q.poll(), Err(QueueError::Closed)));
        q.close().unwrap();
    }
}
