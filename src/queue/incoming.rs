//! Durable spool of received ciphertext packets, feeding the processing
//! task's job channel. See SPEC_FULL.md 4.3.

use super::entry::QueueEntry;
use crate::error::QueueError;
use crate::packet::Packet;
use crate::worker::ProcessingJob;
use std::path::PathBuf;
use tokio::sync::mpsc::Sender;
use tracing::info;

pub struct IncomingQueue {
    dir: PathBuf,
    processing: Sender<ProcessingJob>,
}

impl IncomingQueue {
    pub fn new(dir: PathBuf, processing: Sender<ProcessingJob>) -> Self {
        Self { dir, processing }
    }

    /// Persist a freshly received packet atomically, then enqueue its
    /// handle on the processing task.
    pub async fn accept(&self, packet: Packet) -> Result<String, QueueError> {
        let entry = QueueEntry::new(packet);
        entry.persist(&self.dir)?;
        let handle = entry.handle.clone();
        self.processing
            .send(ProcessingJob::Unwrap(handle.clone()))
            .await
            .map_err(|_| QueueError::NoSuchEntry("processing task channel closed".into()))?;
        Ok(handle)
    }

    /// Re-enqueue every surviving handle on startup (SPEC_FULL.md 4.3).
    pub async fn recover(&self) -> Result<usize, QueueError> {
        let handles = QueueEntry::list_handles(&self.dir)?;
        let count = handles.len();
        for handle in handles {
            info!(handle = %handle, "recovering incoming entry from previous run");
            self.processing
                .send(ProcessingJob::Unwrap(handle))
                .await
                .map_err(|_| QueueError::NoSuchEntry("processing task channel closed".into()))?;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accept_persists_and_enqueues() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let queue = IncomingQueue::new(dir.path().to_path_buf(), tx);

        let handle = queue.accept(Packet(vec![1, 2, 3])).await.unwrap();
        assert!(dir.path().join(&handle).exists());

        let job = rx.recv().await.unwrap();
        matches!(job, ProcessingJob::Unwrap(h) if h == handle);
    }

    #[tokio::test]
    async fn recover_reenqueues_surviving_handles() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let entry = QueueEntry::new(Packet(vec![9]));
        entry.persist(dir.path()).unwrap();

        let queue = IncomingQueue::new(dir.path().to_path_buf(), tx);
        let count = queue.recover().await.unwrap();
        assert_eq!(count, 1);
        let job = rx.recv().await.unwrap();
        matches!(job, ProcessingJob::Unwrap(h) if h == entry.handle);
    }
}
