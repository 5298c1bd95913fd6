//! Processing and cleaning worker tasks, modeled on tokio per SPEC_FULL.md
//! 10.3 ("threads" -> tasks, "blocking get on a channel" -> `.recv().await`).
//! See SPEC_FULL.md 4.5.

use crate::keyring::Keyring;
use crate::packet::UnwrapPrimitive;
use crate::queue::entry::{QueueEntry, Tag};
use crate::queue::MixPool;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Job variants for the processing task, replacing the ad-hoc
/// "put a callable on the channel" pattern per SPEC_FULL.md 9.
#[derive(Debug, Clone)]
pub enum ProcessingJob {
    Unwrap(String),
    Shutdown,
}

/// Job variants for the cleaning task.
#[derive(Debug, Clone)]
pub enum CleaningJob {
    SecureDelete(PathBuf),
    Shutdown,
}

pub struct ProcessingTask {
    pub sender: mpsc::Sender<ProcessingJob>,
    pub handle: JoinHandle<()>,
}

/// Spawn the processing task: consumes `Unwrap(handle)` jobs from the
/// incoming queue's spool, applies the unwrap primitive, and routes the
/// result into the mix pool or drops it.
pub fn spawn_processing_task(
    incoming_dir: PathBuf,
    mix_pool: Arc<MixPool>,
    keyring: Arc<Keyring>,
    unwrap_primitive: Arc<dyn UnwrapPrimitive>,
    cleaning: mpsc::Sender<CleaningJob>,
) -> ProcessingTask {
    let (sender, mut receiver) = mpsc::channel::<ProcessingJob>(1024);

    let handle = tokio::spawn(async move {
        while let Some(job) = receiver.recv().await {
            match job {
                ProcessingJob::Shutdown => break,
                ProcessingJob::Unwrap(handle) => {
                    if let Err(e) = process_one(
                        &incoming_dir,
                        &handle,
                        &mix_pool,
                        &keyring,
                        unwrap_primitive.as_ref(),
                        &cleaning,
                    )
                    .await
                    {
                        error!(handle = %handle, error = %e, "unexpected error processing packet, dropping");
                        tombstone_and_clean(&incoming_dir, &handle, &cleaning).await;
                    }
                }
            }
        }
        info!("processing task shut down");
    });

    ProcessingTask { sender, handle }
}

#[allow(clippy::too_many_arguments)]
async fn process_one(
    incoming_dir: &std::path::Path,
    handle: &str,
    mix_pool: &MixPool,
    keyring: &Keyring,
    unwrap_primitive: &dyn UnwrapPrimitive,
    cleaning: &mpsc::Sender<CleaningJob>,
) -> Result<(), crate::error::QueueError> {
    let entry = match QueueEntry::load(incoming_dir, handle) {
        Ok(entry) => entry,
        Err(e) => {
            warn!(handle = %handle, error = %e, "missing incoming entry, skipping");
            return Ok(());
        }
    };

    let now = Utc::now();
    let packet_keys = keyring.live_packet_keys(now).await;
    let replay_logs = keyring.replay_logs_for_check().await;
    let seen_before = |digest: &[u8; 20]| replay_logs.iter().any(|log| log.contains(digest).unwrap_or(true));

    let outcome = unwrap_primitive.unwrap(&entry.packet(), &packet_keys, &seen_before);

    use crate::packet::UnwrapOutcome;
    match outcome {
        UnwrapOutcome::Padding => {
            tombstone_and_clean(incoming_dir, handle, cleaning).await;
        }
        UnwrapOutcome::Invalid(reason) => {
            warn!(handle = %handle, reason = %reason, "invalid packet, dropping");
            tombstone_and_clean(incoming_dir, handle, cleaning).await;
        }
        UnwrapOutcome::Relay(info) => {
            let mut mix_entry = entry;
            mix_entry.tag = Some(Tag::Relay);
            mix_entry.destination = Some(info.next_hop_nickname);
            mix_entry.packet = info.forwarded_ciphertext;
            mix_pool.insert(mix_entry)?;
            tombstone_and_clean(incoming_dir, handle, cleaning).await;
        }
        UnwrapOutcome::Exit(info) => {
            let mut mix_entry = entry;
            mix_entry.tag = Some(Tag::Exit);
            mix_entry.destination = Some(info.delivery_type);
            mix_entry.packet = info.payload;
            mix_pool.insert(mix_entry)?;
            tombstone_and_clean(incoming_dir, handle, cleaning).await;
        }
    }
    Ok(())
}

/// Rename `handle` in `dir` into `dir/tombstones/` and hand the tombstoned
/// path to the cleaning task for secure deletion. Every queue that disposes
/// of an entry goes through this rather than unlinking directly (SPEC_FULL.md
/// 6 and 9: all secure deletions pass through the cleaning thread).
pub async fn tombstone_and_clean(dir: &std::path::Path, handle: &str, cleaning: &mpsc::Sender<CleaningJob>) {
    match QueueEntry::tombstone(dir, handle) {
        Ok(path) => {
            if cleaning.send(CleaningJob::SecureDelete(path)).await.is_err() {
                warn!(handle = %handle, "cleaning task channel closed, entry left tombstoned");
            }
        }
        Err(e) => warn!(handle = %handle, error = %e, "failed to tombstone entry before secure delete"),
    }
}

use chrono::Utc;

pub struct CleaningTask {
    pub sender: mpsc::Sender<CleaningJob>,
    pub handle: JoinHandle<()>,
}

/// Spawn the cleaning task: consumes `SecureDelete(path)` jobs, overwriting
/// then unlinking tombstoned files. Missing files are warnings, not errors,
/// per SPEC_FULL.md 4.5.
pub fn spawn_cleaning_task() -> CleaningTask {
    let (sender, mut receiver) = mpsc::channel::<CleaningJob>(1024);

    let handle = tokio::spawn(async move {
        while let Some(job) = receiver.recv().await {
            match job {
                CleaningJob::Shutdown => break,
                CleaningJob::SecureDelete(path) => {
                    if let Err(e) = secure_delete(&path).await {
                        warn!(path = %path.display(), error = %e, "secure delete failed");
                    }
                }
            }
        }
        info!("cleaning task shut down");
    });

    CleaningTask { sender, handle }
}

async fn secure_delete(path: &std::path::Path) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let metadata = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    let zeros = vec![0u8; metadata.len() as usize];
    let mut file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
    file.write_all(&zeros).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::remove_file(path).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn secure_delete_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nonexistent");
        secure_delete(&path).await.unwrap();
    }

    #[tokio::test]
    async fn secure_delete_removes_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");
        tokio::fs::write(&path, b"secret").await.unwrap();
        secure_delete(&path).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn cleaning_task_processes_jobs_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");
        tokio::fs::write(&path, b"x").await.unwrap();

        let task = spawn_cleaning_task();
        task.sender.send(CleaningJob::SecureDelete(path.clone())).await.unwrap();
        task.sender.send(CleaningJob::Shutdown).await.unwrap();
        task.handle.await.unwrap();
        assert!(!path.exists());
    }
}
