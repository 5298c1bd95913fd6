//! Delivery queue with a per-entry retry counter and configured retry
//! schedule. See SPEC_FULL.md 4.3 and the retry-ladder scenario in 8.

use super::entry::QueueEntry;
use crate::error::QueueError;
use crate::transport::{DeliveryBatch, DeliveryOutcome, Transport};
use crate::worker::{tombstone_and_clean, CleaningJob};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub struct OutgoingQueue {
    dir: PathBuf,
    entries: Mutex<HashMap<String, QueueEntry>>,
    retry_schedule: Vec<u64>,
    cleaning: mpsc::Sender<CleaningJob>,
}

impl OutgoingQueue {
    pub fn open(dir: PathBuf, retry_schedule: Vec<u64>, cleaning: mpsc::Sender<CleaningJob>) -> Result<Self, QueueError> {
        std::fs::create_dir_all(&dir)?;
        let mut entries = HashMap::new();
        for handle in QueueEntry::list_handles(&dir)? {
            match QueueEntry::load(&dir, &handle) {
                Ok(entry) => {
                    entries.insert(handle, entry);
                }
                Err(e) => warn!(handle = %handle, error = %e, "dropping unreadable outgoing entry"),
            }
        }
        Ok(Self { dir, entries: Mutex::new(entries), retry_schedule, cleaning })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn insert(&self, mut entry: QueueEntry) -> Result<(), QueueError> {
        entry.next_attempt = Some(Utc::now());
        entry.persist(&self.dir)?;
        self.entries.lock().unwrap().insert(entry.handle.clone(), entry);
        Ok(())
    }

    /// Register an entry whose backing file the caller has already renamed
    /// into `dir` (the mix-to-outgoing handoff, SPEC_FULL.md 9: cross-queue
    /// transfer is rename, not delete-then-recreate). Does not touch disk.
    pub fn adopt(&self, entry: QueueEntry) {
        self.entries.lock().unwrap().insert(entry.handle.clone(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// `_deliverMessages`: group pending (due) entries by destination and
    /// hand each group to the transport as a single batch.
    pub async fn deliver_cycle(&self, transport: &Arc<dyn Transport>, now: DateTime<Utc>) -> Result<(), QueueError> {
        let groups = {
            let entries = self.entries.lock().unwrap();
            let mut groups: HashMap<String, Vec<String>> = HashMap::new();
            for (handle, entry) in entries.iter() {
                if entry.next_attempt.is_none_or(|t| t <= now) {
                    let dest = entry.destination.clone().unwrap_or_default();
                    groups.entry(dest).or_default().push(handle.clone());
                }
            }
            groups
        };

        for (destination, handles) in groups {
            let packets: Vec<Vec<u8>> = {
                let entries = self.entries.lock().unwrap();
                handles.iter().filter_map(|h| entries.get(h).map(|e| e.packet.clone())).collect()
            };
            if packets.is_empty() {
                continue;
            }

            let outcome = transport.send_batch(DeliveryBatch { destination: destination.clone(), packets }).await;
            self.apply_outcome(&handles, outcome, now).await?;
        }
        Ok(())
    }

    async fn apply_outcome(&self, handles: &[String], outcome: DeliveryOutcome, now: DateTime<Utc>) -> Result<(), QueueError> {
        match outcome {
            DeliveryOutcome::Success => {
                for handle in handles {
                    self.remove(handle).await?;
                }
            }
            DeliveryOutcome::Permanent(reason) => {
                for handle in handles {
                    warn!(handle = %handle, reason = %reason, "permanent delivery failure, dropping");
                    self.remove(handle).await?;
                }
            }
            DeliveryOutcome::Transient(reason) => {
                for handle in handles {
                    self.reschedule_or_drop(handle, &reason, now).await?;
                }
            }
        }
        Ok(())
    }

    async fn reschedule_or_drop(&self, handle: &str, reason: &str, now: DateTime<Utc>) -> Result<(), QueueError> {
        let exhausted = {
            let mut entries = self.entries.lock().unwrap();
            let Some(entry) = entries.get_mut(handle) else { return Ok(()) };

            match self.retry_schedule.get(entry.retry_count as usize) {
                Some(&delay) => {
                    entry.retry_count += 1;
                    entry.next_attempt = Some(now + chrono::Duration::seconds(delay as i64));
                    entry.persist(&self.dir)?;
                    info!(handle = %handle, reason = %reason, retry_count = entry.retry_count, delay, "rescheduled after transient failure");
                    false
                }
                None => {
                    warn!(handle = %handle, reason = %reason, "retry schedule exhausted, dropping");
                    entries.remove(handle);
                    true
                }
            }
        };
        if exhausted {
            tombstone_and_clean(&self.dir, handle, &self.cleaning).await;
        }
        Ok(())
    }

    /// Drop a delivered or permanently-failed entry: tombstone its file and
    /// hand the tombstone off to the cleaning task for secure deletion
    /// (SPEC_FULL.md 6 and 9 — no direct unlinking of ciphertext).
    async fn remove(&self, handle: &str) -> Result<(), QueueError> {
        self.entries.lock().unwrap().remove(handle);
        tombstone_and_clean(&self.dir, handle, &self.cleaning).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Packet;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct ScriptedTransport {
        attempt: AtomicUsize,
        outcomes: Vec<DeliveryOutcome>,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn process(&self, _timeout: Duration) {}
        async fn reap_connections(&self) {}
        fn next_timeout(&self) -> DateTime<Utc> {
            Utc::now()
        }
        async fn send_batch(&self, _batch: DeliveryBatch) -> DeliveryOutcome {
            let i = self.attempt.fetch_add(1, Ordering::SeqCst);
            self.outcomes.get(i).cloned().unwrap_or(DeliveryOutcome::Permanent("exhausted script".into()))
        }
        async fn install_transport_key(&self, _key: RsaPrivateKey) {}
        async fn shutdown(&self) {}
    }

    use rsa::RsaPrivateKey;

    fn test_cleaning_sender() -> mpsc::Sender<CleaningJob> {
        let (tx, mut rx) = mpsc::channel(1024);
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        tx
    }

    #[tokio::test]
    async fn retry_ladder_delivers_on_third_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let queue = OutgoingQueue::open(dir.path().to_path_buf(), vec![60, 300, 3600], test_cleaning_sender()).unwrap();
        let mut entry = QueueEntry::new(Packet(vec![1]));
        entry.destination = Some("dest".to_string());
        queue.insert(entry.clone()).unwrap();

        let transport: Arc<dyn Transport> = Arc::new(ScriptedTransport {
            attempt: AtomicUsize::new(0),
            outcomes: vec![
                DeliveryOutcome::Transient("refused".into()),
                DeliveryOutcome::Transient("refused".into()),
                DeliveryOutcome::Success,
            ],
        });

        let t0 = Utc::now();
        queue.deliver_cycle(&transport, t0).await.unwrap();
        assert_eq!(queue.len(), 1);

        queue.deliver_cycle(&transport, t0 + chrono::Duration::seconds(61)).await.unwrap();
        assert_eq!(queue.len(), 1);

        queue.deliver_cycle(&transport, t0 + chrono::Duration::seconds(61 + 301)).await.unwrap();
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn permanent_failure_drops_entry() {
        let dir = tempfile::tempdir().unwrap();
        let queue = OutgoingQueue::open(dir.path().to_path_buf(), vec![60], test_cleaning_sender()).unwrap();
        let mut entry = QueueEntry::new(Packet(vec![2]));
        entry.destination = Some("dest".to_string());
        queue.insert(entry).unwrap();

        let transport: Arc<dyn Transport> = Arc::new(ScriptedTransport {
            attempt: AtomicUsize::new(0),
            outcomes: vec![DeliveryOutcome::Permanent("no such server".into())],
        });

        queue.deliver_cycle(&transport, Utc::now()).await.unwrap();
        assert_eq!(queue.len(), 0);
    }
}
