//! Disk-backed append-only set of 20-byte packet-hash digests, one per
//! KeySet, rooted at `work/hashlogs/hash_NNNN`. See SPEC_FULL.md 4.2a.
//!
//! Backed by `sled` rather than a hand-rolled B-tree: it already gives us a
//! durable ordered key-value store with an explicit `flush` boundary, which
//! is the only operation Invariant 4 (SPEC_FULL.md 8) actually requires.

use crate::error::KeyringError;
use std::path::Path;

pub struct ReplayLog {
    tree: sled::Db,
}

impl ReplayLog {
    pub fn open(path: &Path) -> Result<Self, KeyringError> {
        let tree = sled::open(path).map_err(|e| {
            KeyringError::CorruptKeySet(path.display().to_string(), e.to_string())
        })?;
        Ok(Self { tree })
    }

    /// Insert `digest`, returning `true` if it was not already present.
    pub fn add(&self, digest: &[u8; 20]) -> Result<bool, KeyringError> {
        let previous = self
            .tree
            .insert(digest, &[] as &[u8])
            .map_err(|e| KeyringError::CorruptKeySet("replaylog".into(), e.to_string()))?;
        Ok(previous.is_none())
    }

    pub fn contains(&self, digest: &[u8; 20]) -> Result<bool, KeyringError> {
        Ok(self
            .tree
            .contains_key(digest)
            .map_err(|e| KeyringError::CorruptKeySet("replaylog".into(), e.to_string()))?)
    }

    /// Durability boundary: every packet whose replay-log entry has been
    /// added must be fsynced here before it is allowed to leave the mix pool.
    pub fn flush(&self) -> Result<(), KeyringError> {
        self.tree
            .flush()
            .map(|_| ())
            .map_err(|e| KeyringError::CorruptKeySet("replaylog".into(), e.to_string()))
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_idempotent_and_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hash_0001");
        let digest = [7u8; 20];

        {
            let log = ReplayLog::open(&path).unwrap();
            assert!(log.add(&digest).unwrap());
            assert!(!log.add(&digest).unwrap());
            log.flush().unwrap();
        }

        let reopened = ReplayLog::open(&path).unwrap();
        assert!(reopened.contains(&digest).unwrap());
        assert!(!reopened.add(&digest).unwrap());
    }

    #[test]
    fn contains_is_false_for_unknown_digest() {
        let dir = tempfile::tempdir().unwrap();
        let log = ReplayLog::open(&dir.path().join("hash_0002")).unwrap();
        assert!(!log.contains(&[1u8; 20]).unwrap());
    }
}
