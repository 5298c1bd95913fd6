//! A single on-disk queue entry: serialized packet plus per-queue metadata,
//! content-addressed by a random handle. See SPEC_FULL.md 3 and 9 (ownership
//! of queue files: rename is the only cross-queue transfer).

use crate::error::QueueError;
use crate::packet::Packet;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Which downstream queue a mix-pool entry is headed to once it leaves the
/// pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tag {
    Relay,
    Exit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub handle: String,
    pub packet: Vec<u8>,
    pub tag: Option<Tag>,
    pub destination: Option<String>,
    pub retry_count: u32,
    pub next_attempt: Option<DateTime<Utc>>,
}

impl QueueEntry {
    pub fn new(packet: Packet) -> Self {
        Self {
            handle: random_handle(),
            packet: packet.0,
            tag: None,
            destination: None,
            retry_count: 0,
            next_attempt: None,
        }
    }

    pub fn packet(&self) -> Packet {
        Packet(self.packet.clone())
    }

    /// Write this entry atomically: temp file, fsync, rename into `dir`.
    pub fn persist(&self, dir: &Path) -> Result<(), QueueError> {
        fs::create_dir_all(dir)?;
        let final_path = dir.join(&self.handle);
        let temp_path = dir.join(format!(".{}.tmp", self.handle));

        let bytes = bincode::serialize(self)?;
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &final_path)?;
        Ok(())
    }

    pub fn load(dir: &Path, handle: &str) -> Result<Self, QueueError> {
        let bytes = fs::read(dir.join(handle))
            .map_err(|_| QueueError::NoSuchEntry(handle.to_string()))?;
        Ok(bincode::deserialize(&bytes)?)
    }

    /// List every handle currently spooled in `dir` (used for startup
    /// recovery). Ignores temp files (leading `.`) left by a crash mid-write.
    pub fn list_handles(dir: &Path) -> std::io::Result<Vec<String>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut handles = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') {
                continue;
            }
            handles.push(name.into_owned());
        }
        Ok(handles)
    }

    /// Atomically move this entry from `from_dir` to `to_dir`, preserving the
    /// handle. The spec's cross-queue transfer primitive (SPEC_FULL.md 9).
    pub fn rename_into(dir_from: &Path, dir_to: &Path, handle: &str) -> std::io::Result<()> {
        fs::create_dir_all(dir_to)?;
        fs::rename(dir_from.join(handle), dir_to.join(handle))
    }

    /// `removeMessage(handle)`: rename into a tombstone area for the cleaning
    /// thread to secure-delete, rather than unlinking directly.
    pub fn tombstone(dir: &Path, handle: &str) -> std::io::Result<PathBuf> {
        let tombstones = dir.join("tombstones");
        fs::create_dir_all(&tombstones)?;
        let dest = tombstones.join(handle);
        fs::rename(dir.join(handle), &dest)?;
        Ok(dest)
    }
}

fn random_handle() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persist_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let entry = QueueEntry::new(Packet(vec![1, 2, 3]));
        entry.persist(dir.path()).unwrap();

        let loaded = QueueEntry::load(dir.path(), &entry.handle).unwrap();
        assert_eq!(loaded.packet, vec![1, 2, 3]);
        assert_eq!(loaded.handle, entry.handle);
    }

    #[test]
    fn list_handles_skips_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let entry = QueueEntry::new(Packet(vec![9]));
        entry.persist(dir.path()).unwrap();
        fs::write(dir.path().join(".stray.tmp"), b"").unwrap();

        let handles = QueueEntry::list_handles(dir.path()).unwrap();
        assert_eq!(handles, vec![entry.handle]);
    }

    #[test]
    fn rename_into_moves_between_queues() {
        let base = tempfile::tempdir().unwrap();
        let from = base.path().join("incoming");
        let to = base.path().join("mix");
        let entry = QueueEntry::new(Packet(vec![5]));
        entry.persist(&from).unwrap();

        QueueEntry::rename_into(&from, &to, &entry.handle).unwrap();
        assert!(!from.join(&entry.handle).exists());
        assert!(to.join(&entry.handle).exists());
    }
}
