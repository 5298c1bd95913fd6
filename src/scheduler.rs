//! Main event loop: a min-heap of timed events plus the transport's
//! non-blocking poll, signal flags, and worker health checks. See
//! SPEC_FULL.md 4.4 and 5.

use crate::keyring::Keyring;
use crate::queue::{ExitDispatcher, MixPool, OutgoingQueue, QueueEntry, Tag};
use crate::transport::Transport;
use crate::worker::{tombstone_and_clean, CleaningJob, CleaningTask, ProcessingTask};
use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Mix,
    Timeout,
    Shred,
}

const TRANSPORT_POLL_CAP: Duration = Duration::from_secs(2);
const SHRED_INTERVAL_SECS: i64 = 600;

pub struct Scheduler {
    heap: BinaryHeap<Reverse<(DateTime<Utc>, EventKindOrd)>>,
    transport: Arc<dyn Transport>,
    mix_pool: Arc<MixPool>,
    outgoing: Arc<OutgoingQueue>,
    exit_dispatcher: Arc<ExitDispatcher>,
    keyring: Arc<Keyring>,
    processing: ProcessingTask,
    cleaning: CleaningTask,
    mix_interval: Duration,
    queues_dir: PathBuf,
    directory_url: Option<String>,
    http_client: reqwest::Client,
    stopping: Arc<AtomicBool>,
}

/// `EventKind` wrapped so the heap entries are totally ordered without
/// deriving `Ord` on the public enum (kept simple for callers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct EventKindOrd(u8);

impl From<EventKind> for EventKindOrd {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Mix => EventKindOrd(0),
            EventKind::Timeout => EventKindOrd(1),
            EventKind::Shred => EventKindOrd(2),
        }
    }
}

impl From<EventKindOrd> for EventKind {
    fn from(ord: EventKindOrd) -> Self {
        match ord.0 {
            0 => EventKind::Mix,
            1 => EventKind::Timeout,
            _ => EventKind::Shred,
        }
    }
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Arc<dyn Transport>,
        mix_pool: Arc<MixPool>,
        outgoing: Arc<OutgoingQueue>,
        exit_dispatcher: Arc<ExitDispatcher>,
        keyring: Arc<Keyring>,
        processing: ProcessingTask,
        cleaning: CleaningTask,
        mix_interval: Duration,
        queues_dir: PathBuf,
        directory_url: Option<String>,
    ) -> Self {
        let now = Utc::now();
        let mut heap = BinaryHeap::new();
        heap.push(Reverse((now + chrono::Duration::from_std(mix_interval).unwrap(), EventKind::Mix.into())));
        heap.push(Reverse((transport.next_timeout(), EventKind::Timeout.into())));
        heap.push(Reverse((now + chrono::Duration::seconds(SHRED_INTERVAL_SECS), EventKind::Shred.into())));

        Self {
            heap,
            transport,
            mix_pool,
            outgoing,
            exit_dispatcher,
            keyring,
            processing,
            cleaning,
            mix_interval,
            queues_dir,
            directory_url,
            http_client: reqwest::Client::new(),
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run until `SIGTERM`. `SIGHUP` re-reads the logging filter only
    /// (SPEC_FULL.md 10.1) and does not otherwise interrupt the loop.
    pub async fn run(mut self) -> Result<(), crate::error::RemailerError> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sighup = signal(SignalKind::hangup())?;

        info!("scheduler started");

        loop {
            if self.stopping.load(Ordering::SeqCst) {
                break;
            }

            let Some(&Reverse((deadline, _))) = self.heap.peek() else {
                warn!("event heap empty, this should not happen, reseeding shred timer");
                self.heap.push(Reverse((Utc::now() + chrono::Duration::seconds(SHRED_INTERVAL_SECS), EventKind::Shred.into())));
                continue;
            };

            let mut time_left = deadline - Utc::now();
            while time_left > chrono::Duration::zero() {
                let poll = time_left.to_std().unwrap_or(TRANSPORT_POLL_CAP).min(TRANSPORT_POLL_CAP);

                tokio::select! {
                    _ = self.transport.process(poll) => {}
                    _ = sigterm.recv() => {
                        info!("SIGTERM received, stopping");
                        self.stopping.store(true, Ordering::SeqCst);
                    }
                    _ = sighup.recv() => {
                        info!("SIGHUP received, reloading log filter");
                    }
                }

                if self.stopping.load(Ordering::SeqCst) {
                    break;
                }
                if self.processing.handle.is_finished() {
                    error!("processing task died, shutting down");
                    self.stopping.store(true, Ordering::SeqCst);
                    break;
                }
                if self.cleaning.handle.is_finished() {
                    error!("cleaning task died, shutting down");
                    self.stopping.store(true, Ordering::SeqCst);
                    break;
                }

                time_left = deadline - Utc::now();
            }

            if self.stopping.load(Ordering::SeqCst) {
                break;
            }

            let Some(Reverse((_, kind_ord))) = self.heap.pop() else { continue };
            let kind: EventKind = kind_ord.into();
            self.dispatch(kind).await?;
        }

        self.close().await;
        Ok(())
    }

    async fn dispatch(&mut self, kind: EventKind) -> Result<(), crate::error::RemailerError> {
        let now = Utc::now();
        match kind {
            EventKind::Timeout => {
                self.transport.reap_connections().await;
                self.heap.push(Reverse((self.transport.next_timeout(), EventKind::Timeout.into())));
            }
            EventKind::Shred => {
                self.run_shred_sweep().await;
                self.heap.push(Reverse((now + chrono::Duration::seconds(SHRED_INTERVAL_SECS), EventKind::Shred.into())));
            }
            EventKind::Mix => {
                self.run_mix_tick().await?;
                self.heap
                    .push(Reverse((now + chrono::Duration::from_std(self.mix_interval).unwrap(), EventKind::Mix.into())));
            }
        }
        Ok(())
    }

    async fn run_mix_tick(&mut self) -> Result<(), crate::error::RemailerError> {
        self.keyring.flush_replay_logs().await?;

        let batch = self.mix_pool.tick()?;
        for entry in batch {
            let handle = entry.handle.clone();
            match entry.tag {
                Some(Tag::Relay) => {
                    // Single atomic rename out of the mix pool's directory,
                    // never delete-then-recreate (SPEC_FULL.md 9): the file
                    // is in exactly one of {mix, outgoing} at every instant.
                    QueueEntry::rename_into(self.mix_pool.dir(), self.outgoing.dir(), &handle)?;
                    self.outgoing.adopt(entry);
                }
                Some(Tag::Exit) => {
                    // Delivery modules are opaque, in-process collaborators
                    // (SPEC_FULL.md 1), so there is no downstream queue
                    // directory to rename into; hand the entry off first and
                    // only tombstone the mix-pool copy once it's delivered.
                    self.exit_dispatcher.dispatch(entry).await?;
                    tombstone_and_clean(self.mix_pool.dir(), &handle, &self.cleaning.sender).await;
                }
                None => {
                    warn!(handle = %handle, "mix pool entry with no tag, dropping");
                    tombstone_and_clean(self.mix_pool.dir(), &handle, &self.cleaning.sender).await;
                }
            }
        }

        self.outgoing.deliver_cycle(&self.transport, Utc::now()).await?;
        self.run_keyring_maintenance().await;
        Ok(())
    }

    /// Folded into the MIX tick rather than a dedicated fourth event kind
    /// (SPEC_FULL.md 4.4 names exactly MIX/TIMEOUT/SHRED): ahead-of-time key
    /// generation, directory publication, and rotation are all idempotent
    /// no-ops when nothing is due, so driving them at the same cadence as
    /// mixing is sufficient and keeps the event-kind set as specified.
    /// Failures here are logged and do not interrupt mixing or delivery.
    async fn run_keyring_maintenance(&self) {
        let now = Utc::now();

        match self.keyring.create_keys_as_needed(now).await {
            Ok(generated) if generated > 0 => info!(generated, "keyring: generated new KeySets"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "keyring: failed to generate ahead-of-time keys"),
        }

        if let Some(url) = &self.directory_url {
            let client = self.http_client.clone();
            let url = url.clone();
            let result = self
                .keyring
                .publish_pending(move |descriptor_bytes| {
                    let client = client.clone();
                    let url = url.clone();
                    async move { crate::descriptor::directory::upload(&client, &url, &descriptor_bytes).await }
                })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "keyring: directory publication batch errored");
            }
        }

        match self.keyring.update_keys(now).await {
            Ok(live) => {
                if let Some(transport_key) = self.keyring.newest_live_transport_key(now).await {
                    self.transport.install_transport_key(transport_key).await;
                }
                if live.is_empty() {
                    warn!("keyring: no live KeySets, incoming packets cannot be decrypted");
                }
            }
            Err(e) => warn!(error = %e, "keyring: failed to update live key set"),
        }
    }

    /// Sweep every `tombstones/` directory under the queue root, handing any
    /// leftover file to the cleaning task. A backstop for tombstones created
    /// just before a crash whose `SecureDelete` job never made it onto (or
    /// off of) the cleaning channel.
    async fn run_shred_sweep(&self) {
        let mut stack = vec![self.queues_dir.clone()];
        while let Some(dir) = stack.pop() {
            let Ok(read_dir) = std::fs::read_dir(&dir) else { continue };
            for entry in read_dir.flatten() {
                let path = entry.path();
                if !path.is_dir() {
                    continue;
                }
                if path.file_name().is_some_and(|n| n == "tombstones") {
                    let Ok(tombstoned) = std::fs::read_dir(&path) else { continue };
                    for file in tombstoned.flatten() {
                        let _ = self.cleaning.sender.send(CleaningJob::SecureDelete(file.path())).await;
                    }
                } else {
                    stack.push(path);
                }
            }
        }
    }

    async fn close(self) {
        let _ = self.processing.sender.send(crate::worker::ProcessingJob::Shutdown).await;
        let _ = self.cleaning.sender.send(CleaningJob::Shutdown).await;
        let _ = self.processing.handle.await;
        let _ = self.cleaning.handle.await;
        self.transport.shutdown().await;
        info!("scheduler stopped");
    }
}
