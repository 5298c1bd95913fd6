//! Crate-wide error taxonomy.
//!
//! One variant per failure class named in the error-handling design:
//! `ConfigInvalid` rejects input outright, `DescriptorInvalid`/`CryptoError`/
//! `PacketParseError`/`PacketContentError` drop the offending item and keep
//! serving, `TransportTransient` feeds the outgoing queue's retry ladder,
//! `IoFatal`/`InternalAssertion` shut the server down.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemailerError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error(transparent)]
    Keyring(#[from] KeyringError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("crypto error: {0}")]
    Crypto(#[from] crate::crypto::CryptoError),

    #[error("packet parse error: {0}")]
    PacketParseError(String),

    #[error("packet content error: {0}")]
    PacketContentError(String),

    #[error("transient transport error: {0}")]
    TransportTransient(String),

    #[error("permanent transport error: {0}")]
    TransportPermanent(String),

    #[error("fatal I/O error: {0}")]
    IoFatal(#[from] io::Error),

    #[error("internal assertion failed: {0}")]
    InternalAssertion(String),
}

#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("digest mismatch")]
    BadDigest,
    #[error("signature does not verify")]
    BadSignature,
    #[error("unsupported descriptor version: {0}")]
    BadVersion(String),
    #[error("field out of allowed length: {field} ({len} > {max})")]
    BadLength { field: &'static str, len: usize, max: usize },
    #[error("descriptor expired at {valid_until}")]
    Expired { valid_until: String },
    #[error("malformed section grammar: {0}")]
    Malformed(String),
    #[error("missing required field {0} in section {1}")]
    MissingField(&'static str, &'static str),
}

#[derive(Error, Debug)]
pub enum KeyringError {
    #[error("lock contention on home directory")]
    LockHeld,
    #[error("corrupt key set {0}: {1}")]
    CorruptKeySet(String, String),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error(transparent)]
    Crypto(#[from] crate::crypto::CryptoError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("no such queue entry: {0}")]
    NoSuchEntry(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] bincode::Error),
}
