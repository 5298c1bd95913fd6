//! Ties the keyring, queues, worker tasks, and scheduler together into one
//! runnable server. See SPEC_FULL.md 2 (system overview) and 10.7 (CLI
//! surface: this is what `mixnode` starts).

use crate::config::Config;
use crate::error::RemailerError;
use crate::keyring::Keyring;
use crate::lockfile::LockFile;
use crate::packet::UnwrapPrimitive;
use crate::queue::{ExitDispatcher, IncomingQueue, MixPool, OutgoingQueue};
use crate::scheduler::Scheduler;
use crate::transport::Transport;
use crate::worker::{spawn_cleaning_task, spawn_processing_task};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct Server {
    config: Config,
    _lock: LockFile,
    keyring: Arc<Keyring>,
    incoming: IncomingQueue,
    scheduler: Scheduler,
}

impl Server {
    pub async fn start(
        config: Config,
        transport: Arc<dyn Transport>,
        unwrap_primitive: Arc<dyn UnwrapPrimitive>,
        exit_dispatcher: ExitDispatcher,
    ) -> Result<Self, RemailerError> {
        std::fs::create_dir_all(config.home_dir.clone())?;
        let lock = LockFile::acquire(config.lock_path(), config.pid_path())?;

        let incoming_cfg = config.incoming.clone();
        let keyring = Arc::new(Keyring::open(
            config.keys_dir(),
            config.hashlogs_dir(),
            config.keyring.clone(),
            config.server.nickname.clone(),
            config.server.contact.clone(),
            config.server.comments.clone(),
            incoming_cfg.as_ref().and_then(|i| i.hostname.clone()),
            incoming_cfg.as_ref().and_then(|i| i.ip.clone()),
            incoming_cfg.as_ref().map(|i| i.port).unwrap_or(48099),
        )?);

        let generated = keyring.create_keys_as_needed(chrono::Utc::now()).await?;
        if generated > 0 {
            info!(generated, "generated new KeySets at startup");
        }
        let live = keyring.update_keys(chrono::Utc::now()).await?;
        info!(live_count = live.len(), "keyring initialized");

        let queues_dir = config.queues_dir();
        let cleaning = spawn_cleaning_task();

        let mix_pool = Arc::new(MixPool::open(
            queues_dir.join("mix"),
            config.mix.algorithm,
            config.mix.min_pool,
            config.mix.send_rate,
        )?);
        let outgoing = Arc::new(OutgoingQueue::open(
            queues_dir.join("outgoing"),
            config.retry_schedule_secs.clone(),
            cleaning.sender.clone(),
        )?);
        let exit_dispatcher = Arc::new(exit_dispatcher);

        let processing = spawn_processing_task(
            queues_dir.join("incoming"),
            mix_pool.clone(),
            keyring.clone(),
            unwrap_primitive,
            cleaning.sender.clone(),
        );

        let incoming = IncomingQueue::new(queues_dir.join("incoming"), processing.sender.clone());
        let recovered = incoming.recover().await?;
        if recovered > 0 {
            info!(recovered, "re-enqueued surviving incoming packets from previous run");
        }

        let scheduler = Scheduler::new(
            transport,
            mix_pool,
            outgoing,
            exit_dispatcher,
            keyring.clone(),
            processing,
            cleaning,
            Duration::from_secs(config.mix.mix_interval_secs),
            queues_dir,
            config.keyring.directory_url.clone(),
        );

        Ok(Self { config, _lock: lock, keyring, incoming, scheduler })
    }

    pub fn keyring(&self) -> &Arc<Keyring> {
        &self.keyring
    }

    pub fn incoming(&self) -> &IncomingQueue {
        &self.incoming
    }

    pub fn home_dir(&self) -> &std::path::Path {
        &self.config.home_dir
    }

    pub async fn run(self) -> Result<(), RemailerError> {
        self.scheduler.run().await
    }
}
