//! Keyring: the sorted in-memory index of KeySets, key generation,
//! publication, and rotation. See SPEC_FULL.md 4.2.

pub mod keyset;
pub mod rotation;

use crate::config::KeyringConfig;
use crate::crypto::{self, IDENTITY_KEY_BITS};
use crate::descriptor;
use crate::error::KeyringError;
use chrono::{DateTime, Utc};
use keyset::KeySet;
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{info, warn};

struct KeyringState {
    sets: BTreeMap<u32, KeySet>,
    first_key: Option<u32>,
    last_key: Option<u32>,
    next_update: Option<DateTime<Utc>>,
}

pub struct Keyring {
    keys_dir: PathBuf,
    hashlogs_dir: PathBuf,
    identity_key: RsaPrivateKey,
    config: KeyringConfig,
    nickname: String,
    contact: Option<String>,
    comments: Option<String>,
    incoming_hostname: Option<String>,
    incoming_ip: Option<String>,
    incoming_port: u16,
    state: Mutex<KeyringState>,
}

impl Keyring {
    /// Open (or initialize) the keyring rooted at `keys_dir`/`hashlogs_dir`,
    /// loading the identity key (generating it on first run) and every
    /// KeySet directory already present.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        keys_dir: PathBuf,
        hashlogs_dir: PathBuf,
        config: KeyringConfig,
        nickname: String,
        contact: Option<String>,
        comments: Option<String>,
        incoming_hostname: Option<String>,
        incoming_ip: Option<String>,
        incoming_port: u16,
    ) -> Result<Self, KeyringError> {
        std::fs::create_dir_all(&keys_dir)?;
        std::fs::create_dir_all(&hashlogs_dir)?;

        let identity_key =
            crypto::load_or_generate_private_key(&keys_dir.join("identity.key"), IDENTITY_KEY_BITS)?;

        let mut sets = BTreeMap::new();
        let mut first_key = None;
        let mut last_key = None;
        if keys_dir.exists() {
            for entry in std::fs::read_dir(&keys_dir)? {
                let entry = entry?;
                let name = entry.file_name();
                let name = name.to_string_lossy();
                let Some(number_str) = name.strip_prefix("key_") else { continue };
                let Ok(number) = number_str.parse::<u32>() else {
                    warn!(dir = %name, "unknown directory under key root, skipping");
                    continue;
                };
                match KeySet::load(number, &keys_dir, &hashlogs_dir) {
                    Ok(keyset) => {
                        first_key = Some(first_key.map_or(number, |f: u32| f.min(number)));
                        last_key = Some(last_key.map_or(number, |l: u32| l.max(number)));
                        sets.insert(number, keyset);
                    }
                    Err(e) => {
                        warn!(keyset = %number, error = %e, "missing/corrupt descriptor, skipping (files left intact)");
                    }
                }
            }
        }

        Ok(Self {
            keys_dir,
            hashlogs_dir,
            identity_key,
            config,
            nickname,
            contact,
            comments,
            incoming_hostname,
            incoming_ip,
            incoming_port,
            state: Mutex::new(KeyringState { sets, first_key, last_key, next_update: None }),
        })
    }

    pub fn identity_public(&self) -> RsaPublicKey {
        RsaPublicKey::from(&self.identity_key)
    }

    /// `createKeysAsNeeded`: ensure key coverage extends at least
    /// `PREPUBLICATION_INTERVAL` past now.
    pub async fn create_keys_as_needed(&self, now: DateTime<Utc>) -> Result<usize, KeyringError> {
        let mut state = self.state.lock().await;

        let next_keygen = rotation::next_keygen_time(
            state.sets.values().map(|k| k.valid_until).max(),
            self.config.publication_latency_secs as i64,
        );
        if let Some(t) = next_keygen {
            if t > now - chrono::Duration::seconds(10) {
                return Ok(0);
            }
        }

        let last_expiry = state.sets.values().map(|k| k.valid_until).max();
        let plans = rotation::plan_new_slots(
            now,
            last_expiry,
            self.config.public_key_lifetime_secs as i64,
            self.config.prepublication_interval_secs as i64,
        );

        let mut generated = 0;
        for plan in &plans {
            let number = match (state.first_key, state.last_key) {
                (None, None) => 1,
                (Some(first), _) if first > 1 => first - 1,
                (_, Some(last)) => last + 1,
                _ => 1,
            };

            let keyset = KeySet::generate(
                number,
                plan.valid_after,
                plan.valid_until,
                &self.nickname,
                self.contact.as_deref(),
                self.comments.as_deref(),
                self.incoming_hostname.as_deref(),
                self.incoming_ip.as_deref(),
                self.incoming_port,
                &self.identity_key,
                &self.keys_dir,
                &self.hashlogs_dir,
            )?;

            info!(keyset = %KeySet::keyname(number), valid_after = %plan.valid_after, valid_until = %plan.valid_until, "generated key");

            // checkDescriptorConsistency against the previous live descriptor
            // (SPEC_FULL.md 4.1a/4.2): nickname drift is fatal, address/
            // contact drift is a warning.
            if let Some(previous) = state.sets.values().max_by_key(|k| k.valid_after) {
                descriptor::check_consistency(&previous.descriptor, &keyset.descriptor)?;
            }

            state.first_key = Some(state.first_key.map_or(number, |f| f.min(number)));
            state.last_key = Some(state.last_key.map_or(number, |l| l.max(number)));
            state.sets.insert(number, keyset);
            generated += 1;
        }

        Ok(generated)
    }

    /// Publish every unpublished KeySet's descriptor via `upload`. Returns
    /// `false` on the first `error` outcome (abort the batch), matching
    /// SPEC_FULL.md 4.2.
    pub async fn publish_pending<F, Fut>(&self, mut upload: F) -> Result<bool, KeyringError>
    where
        F: FnMut(Vec<u8>) -> Fut,
        Fut: std::future::Future<Output = Result<bool, String>>,
    {
        let state = self.state.lock().await;
        for keyset in state.sets.values() {
            if keyset.is_published() {
                continue;
            }
            match upload(keyset.descriptor.canonical_text.clone()).await {
                Ok(true) => {
                    keyset.mark_published(Utc::now())?;
                }
                Ok(false) => {
                    warn!(keyset = %KeySet::keyname(keyset.number), "descriptor rejected by directory");
                }
                Err(e) => {
                    warn!(keyset = %KeySet::keyname(keyset.number), error = %e, "directory upload error, aborting batch");
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// `removeDeadKeys`: drop every KeySet whose `Valid-Until + overlap` has
    /// passed.
    pub async fn remove_dead_keys(&self, now: DateTime<Utc>) -> Result<usize, KeyringError> {
        let mut state = self.state.lock().await;
        let overlap = self.config.overlap_secs as i64;

        let dead: Vec<u32> = state
            .sets
            .iter()
            .filter(|(_, k)| rotation::is_dead(k.valid_until, now, overlap))
            .map(|(n, _)| *n)
            .collect();

        for number in &dead {
            if let Some(keyset) = state.sets.remove(number) {
                info!(keyset = %KeySet::keyname(*number), "removing expired key");
                keyset.destroy(&self.hashlogs_dir)?;
            }
        }

        if state.sets.is_empty() {
            state.first_key = None;
            state.last_key = None;
        } else {
            state.first_key = state.sets.keys().next().copied();
            state.last_key = state.sets.keys().next_back().copied();
        }

        Ok(dead.len())
    }

    /// `updateKeys`: recompute the live set and the next rotation deadline.
    /// Returns the live KeySets' numbers, newest-first (the newest is the
    /// one installed as the transport's outgoing identity — see
    /// SPEC_FULL.md 4.2 overlap resolution).
    pub async fn update_keys(&self, now: DateTime<Utc>) -> Result<Vec<u32>, KeyringError> {
        self.remove_dead_keys(now).await?;

        let mut state = self.state.lock().await;
        let overlap = self.config.overlap_secs as i64;

        let mut live: Vec<u32> = state
            .sets
            .iter()
            .filter(|(_, k)| rotation::is_live(k.valid_after, k.valid_until, now, overlap))
            .map(|(n, _)| *n)
            .collect();
        live.sort_by_key(|n| std::cmp::Reverse(state.sets[n].valid_after));

        let live_bounds: Vec<(DateTime<Utc>, DateTime<Utc>)> =
            live.iter().map(|n| (state.sets[n].valid_after, state.sets[n].valid_until)).collect();
        state.next_update = rotation::next_update_time(&live_bounds, overlap);

        Ok(live)
    }

    pub async fn next_update(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.next_update
    }

    /// Borrow the replay log + packet key for every currently live KeySet,
    /// newest first. Used by the packet processor to install the live set
    /// into the unwrap primitive.
    pub async fn live_packet_keys(&self, now: DateTime<Utc>) -> Vec<(u32, RsaPublicKey)> {
        let state = self.state.lock().await;
        let overlap = self.config.overlap_secs as i64;
        let mut live: Vec<(u32, RsaPublicKey)> = state
            .sets
            .iter()
            .filter(|(_, k)| rotation::is_live(k.valid_after, k.valid_until, now, overlap))
            .map(|(n, k)| (*n, k.packet_public()))
            .collect();
        live.sort_by_key(|(n, _)| *n);
        live
    }

    /// The transport key of the newest (highest `Valid-After`) currently
    /// live KeySet, to be installed as the transport's outgoing identity.
    /// See the overlap-resolution decision in SPEC_FULL.md 4.2.
    pub async fn newest_live_transport_key(&self, now: DateTime<Utc>) -> Option<RsaPrivateKey> {
        let state = self.state.lock().await;
        let overlap = self.config.overlap_secs as i64;
        state
            .sets
            .values()
            .filter(|k| rotation::is_live(k.valid_after, k.valid_until, now, overlap))
            .max_by_key(|k| k.valid_after)
            .map(|k| k.transport_key.clone())
    }

    pub async fn key_count(&self) -> usize {
        self.state.lock().await.sets.len()
    }

    /// Replay logs for every currently live KeySet, for the processor's
    /// pre-unwrap duplicate check. A packet decrypting under any live key
    /// must be checked against that key's log specifically, but the unwrap
    /// primitive is external, so we hand it the full live set to consult.
    pub async fn replay_logs_for_check(&self) -> Vec<std::sync::Arc<crate::replaylog::ReplayLog>> {
        let state = self.state.lock().await;
        state.sets.values().map(|k| k.replay_log.clone()).collect()
    }

    /// Flush every live KeySet's replay log. Must be called before any
    /// mix-pool batch is dispatched (Invariant 4, SPEC_FULL.md 8).
    pub async fn flush_replay_logs(&self) -> Result<(), KeyringError> {
        let state = self.state.lock().await;
        for keyset in state.sets.values() {
            keyset.replay_log.flush()?;
        }
        Ok(())
    }

    /// The `mixnode-removekeys` operation: remove one KeySet's directory and
    /// replay log. Refuses on a currently live key unless `force`.
    pub async fn remove_keyset(&self, number: u32, force: bool, now: DateTime<Utc>) -> Result<(), KeyringError> {
        let overlap = self.config.overlap_secs as i64;
        let mut state = self.state.lock().await;

        let Some(keyset) = state.sets.get(&number) else {
            return Err(KeyringError::CorruptKeySet(
                KeySet::keyname(number),
                "no such key set".to_string(),
            ));
        };

        if !force && rotation::is_live(keyset.valid_after, keyset.valid_until, now, overlap) {
            return Err(KeyringError::CorruptKeySet(
                KeySet::keyname(number),
                "key set is currently live; pass --force to remove anyway".to_string(),
            ));
        }

        let keyset = state.sets.remove(&number).unwrap();
        keyset.destroy(&self.hashlogs_dir)?;

        if state.sets.is_empty() {
            state.first_key = None;
            state.last_key = None;
        } else {
            state.first_key = state.sets.keys().next().copied();
            state.last_key = state.sets.keys().next_back().copied();
        }
        Ok(())
    }

    /// Every KeySet number currently on disk, ascending.
    pub async fn all_keyset_numbers(&self) -> Vec<u32> {
        self.state.lock().await.sets.keys().copied().collect()
    }
}

pub fn keys_root(home_dir: &Path) -> PathBuf {
    home_dir.join("keys")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeyringConfig;

    fn open_test_keyring(dir: &Path) -> Keyring {
        Keyring::open(
            dir.join("keys"),
            dir.join("hashlogs"),
            KeyringConfig { public_key_lifetime_secs: 7 * 24 * 3600, ..KeyringConfig::default() },
            "testnode".to_string(),
            None,
            None,
            Some("mix.example.org".to_string()),
            None,
            48099,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn create_keys_as_needed_covers_prepublication_window() {
        let dir = tempfile::tempdir().unwrap();
        let keyring = open_test_keyring(dir.path());
        let now = Utc::now();

        let generated = keyring.create_keys_as_needed(now).await.unwrap();
        assert!(generated >= 2);
        assert_eq!(keyring.key_count().await, generated);
    }

    #[tokio::test]
    async fn remove_dead_keys_clears_expired_ring() {
        let dir = tempfile::tempdir().unwrap();
        let keyring = open_test_keyring(dir.path());
        let now = Utc::now();
        keyring.create_keys_as_needed(now).await.unwrap();

        let removed = keyring.remove_dead_keys(now + chrono::Duration::days(30)).await.unwrap();
        assert!(removed > 0);
        assert_eq!(keyring.key_count().await, 0);
    }

    #[tokio::test]
    async fn update_keys_orders_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let keyring = open_test_keyring(dir.path());
        let now = Utc::now();
        keyring.create_keys_as_needed(now).await.unwrap();

        let live = keyring.update_keys(now + chrono::Duration::days(1)).await.unwrap();
        assert!(!live.is_empty());
    }
}
