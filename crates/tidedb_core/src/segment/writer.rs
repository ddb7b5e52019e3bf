//! Per-segment background writer.
//!
//! Each writable segment owns one thread that performs the physical appends.
//! Callers enqueue bytes on a bounded channel and return; the segment's
//! logical size is advanced at enqueue time so offsets stay gap-free while
//! the disk write is still pending.
//!
//! The writer publishes a *written watermark* (bytes physically handed to the
//! backend). Readers block on it, which gives read-your-write within the
//! process even while the queue is non-empty.

use crate::error::{CoreError, CoreResult};
use parking_lot::{Condvar, Mutex};
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::Arc;
use tidedb_storage::StorageBackend;
use tracing::error;

/// Work items for the writer thread.
pub(crate) enum WriteCommand {
    /// Append `data`, which the segment has already assigned to `offset`.
    Append { offset: u64, data: Vec<u8> },
    /// Fsync once everything queued before this command is written.
    Sync(SyncSender<Result<(), String>>),
}

#[derive(Debug)]
struct Progress {
    written: u64,
    failure: Option<String>,
}

/// State shared between a segment and its writer thread.
#[derive(Debug)]
pub(crate) struct WriterShared {
    segment: u32,
    progress: Mutex<Progress>,
    advanced: Condvar,
}

impl WriterShared {
    pub(crate) fn new(segment: u32, written: u64) -> Self {
        Self {
            segment,
            progress: Mutex::new(Progress {
                written,
                failure: None,
            }),
            advanced: Condvar::new(),
        }
    }

    /// Returns the sticky writer failure, if any.
    pub(crate) fn check(&self) -> CoreResult<()> {
        match &self.progress.lock().failure {
            Some(message) => Err(self.failed(message.clone())),
            None => Ok(()),
        }
    }

    /// Blocks until at least `end` bytes are physically written.
    pub(crate) fn wait_written(&self, end: u64) -> CoreResult<()> {
        let mut progress = self.progress.lock();
        while progress.written < end {
            if let Some(message) = &progress.failure {
                return Err(self.failed(message.clone()));
            }
            self.advanced.wait(&mut progress);
        }
        Ok(())
    }

    /// Bytes physically written so far.
    pub(crate) fn written(&self) -> u64 {
        self.progress.lock().written
    }

    fn advance(&self, written: u64) {
        self.progress.lock().written = written;
        self.advanced.notify_all();
    }

    fn fail(&self, message: String) {
        let mut progress = self.progress.lock();
        if progress.failure.is_none() {
            error!(segment = self.segment, %message, "segment writer failed");
            progress.failure = Some(message);
        }
        drop(progress);
        self.advanced.notify_all();
    }

    fn failure(&self) -> Option<String> {
        self.progress.lock().failure.clone()
    }

    pub(crate) fn failed(&self, message: String) -> CoreError {
        CoreError::WriterFailed {
            segment: self.segment,
            message,
        }
    }
}

/// Writer thread body. Returns once every sender is dropped and the queue
/// is drained.
pub(crate) fn run(
    backend: Arc<dyn StorageBackend>,
    commands: Receiver<WriteCommand>,
    shared: Arc<WriterShared>,
) {
    for command in commands {
        match command {
            WriteCommand::Append { offset, data } => {
                if shared.failure().is_some() {
                    continue;
                }
                match backend.append(&data) {
                    Ok(actual) if actual == offset => shared.advance(offset + data.len() as u64),
                    Ok(actual) => shared.fail(format!(
                        "append landed at offset {actual}, expected {offset}"
                    )),
                    Err(e) => shared.fail(e.to_string()),
                }
            }
            WriteCommand::Sync(reply) => {
                let result = match shared.failure() {
                    Some(message) => Err(message),
                    None => backend.sync().map_err(|e| e.to_string()),
                };
                if let Err(message) = &result {
                    shared.fail(message.clone());
                }
                // The requester may have given up; nothing to do then.
                let _ = reply.send(result);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;
    use tidedb_storage::InMemoryBackend;

    #[test]
    fn writer_drains_queue_in_order() {
        let backend = Arc::new(InMemoryBackend::new());
        let shared = Arc::new(WriterShared::new(0, 0));
        let (tx, rx) = mpsc::sync_channel(2);

        let handle = {
            let backend: Arc<dyn StorageBackend> = backend.clone();
            let shared = Arc::clone(&shared);
            thread::spawn(move || run(backend, rx, shared))
        };

        let mut offset = 0;
        for i in 0..10u8 {
            tx.send(WriteCommand::Append {
                offset,
                data: vec![i; 3],
            })
            .unwrap();
            offset += 3;
        }
        drop(tx);
        handle.join().unwrap();

        assert_eq!(shared.written(), 30);
        let data = backend.data();
        for (i, chunk) in data.chunks(3).enumerate() {
            assert_eq!(chunk, &[i as u8; 3]);
        }
    }

    #[test]
    fn offset_mismatch_is_sticky_failure() {
        let backend = Arc::new(InMemoryBackend::with_data(vec![0; 4]));
        let shared = Arc::new(WriterShared::new(5, 4));
        let (tx, rx) = mpsc::sync_channel(4);

        tx.send(WriteCommand::Append {
            offset: 0,
            data: vec![1],
        })
        .unwrap();
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        tx.send(WriteCommand::Sync(reply_tx)).unwrap();
        drop(tx);

        let backend: Arc<dyn StorageBackend> = backend;
        run(backend, rx, Arc::clone(&shared));

        assert!(reply_rx.recv().unwrap().is_err());
        assert!(matches!(
            shared.check(),
            Err(CoreError::WriterFailed { segment: 5, .. })
        ));
    }

    #[test]
    fn readers_wait_for_watermark() {
        let shared = Arc::new(WriterShared::new(0, 0));

        let waiter = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || shared.wait_written(10))
        };

        thread::sleep(Duration::from_millis(20));
        shared.advance(4);
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        shared.advance(10);
        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn failure_wakes_waiting_readers() {
        let shared = Arc::new(WriterShared::new(2, 0));

        let waiter = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || shared.wait_written(10))
        };

        thread::sleep(Duration::from_millis(20));
        shared.fail("disk full".into());

        assert!(matches!(
            waiter.join().unwrap(),
            Err(CoreError::WriterFailed { segment: 2, .. })
        ));
    }
}
