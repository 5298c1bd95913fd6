//! A single dated KeySet: packet key, transport key, certificate chain
//! (modeled as the transport key's descriptor fields — full X.509 chain
//! construction belongs to the external transport per SPEC_FULL.md 1),
//! replay log, and signed descriptor. See SPEC_FULL.md 3.

use crate::crypto::{self, CryptoError, PACKET_KEY_BITS, TRANSPORT_KEY_BITS};
use crate::descriptor::{self, Descriptor, DescriptorFields};
use crate::replaylog::ReplayLog;
use chrono::{DateTime, Utc};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Grace window bracketing the descriptor validity on the certificate chain.
/// See SPEC_FULL.md 3 invariants and the `CERTIFICATE_EXPIRY_SLOPPINESS`
/// constant in the original key schedule.
pub const CERTIFICATE_EXPIRY_SLOPPINESS_SECS: i64 = 5 * 60;

pub struct KeySet {
    pub number: u32,
    pub valid_after: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub packet_key: RsaPrivateKey,
    pub transport_key: RsaPrivateKey,
    pub descriptor: Descriptor,
    pub replay_log: Arc<ReplayLog>,
    dir: PathBuf,
}

impl KeySet {
    pub fn keyname(number: u32) -> String {
        format!("{:04}", number)
    }

    pub fn dir_name(number: u32) -> String {
        format!("key_{}", Self::keyname(number))
    }

    pub fn published_marker_path(&self) -> PathBuf {
        self.dir.join("published")
    }

    pub fn is_published(&self) -> bool {
        self.published_marker_path().exists()
    }

    pub fn mark_published(&self, at: DateTime<Utc>) -> std::io::Result<()> {
        fs::write(self.published_marker_path(), at.to_rfc3339())
    }

    pub fn packet_public(&self) -> RsaPublicKey {
        RsaPublicKey::from(&self.packet_key)
    }

    pub fn transport_public(&self) -> RsaPublicKey {
        RsaPublicKey::from(&self.transport_key)
    }

    /// Valid-After/Valid-Until bracketed by the certificate sloppiness
    /// margin, satisfying Invariant 3 in SPEC_FULL.md 8.
    pub fn cert_not_before(&self) -> DateTime<Utc> {
        self.valid_after - chrono::Duration::seconds(CERTIFICATE_EXPIRY_SLOPPINESS_SECS)
    }

    pub fn cert_not_after(&self) -> DateTime<Utc> {
        self.valid_until + chrono::Duration::seconds(CERTIFICATE_EXPIRY_SLOPPINESS_SECS)
    }

    /// Generate a brand-new KeySet: fresh packet + transport keys, a signed
    /// descriptor, and an opened replay log. Persists the packet/transport
    /// keys at mode 0600 and the descriptor as `ServerDesc`.
    #[allow(clippy::too_many_arguments)]
    pub fn generate(
        number: u32,
        valid_after: DateTime<Utc>,
        valid_until: DateTime<Utc>,
        nickname: &str,
        contact: Option<&str>,
        comments: Option<&str>,
        incoming_hostname: Option<&str>,
        incoming_ip: Option<&str>,
        incoming_port: u16,
        identity_key: &RsaPrivateKey,
        keys_dir: &Path,
        hashlogs_dir: &Path,
    ) -> Result<Self, CryptoError> {
        let dir = keys_dir.join(Self::dir_name(number));
        fs::create_dir_all(&dir)?;

        let packet_key = crypto::load_or_generate_private_key(&dir.join("mix.key"), PACKET_KEY_BITS)?;
        let transport_key =
            crypto::load_or_generate_private_key(&dir.join("mmtp.key"), TRANSPORT_KEY_BITS)?;

        let fields = DescriptorFields {
            nickname: nickname.to_string(),
            contact: contact.map(str::to_string),
            comments: comments.map(str::to_string),
            published: Utc::now(),
            valid_after,
            valid_until,
            identity_public: RsaPublicKey::from(identity_key),
            packet_public: RsaPublicKey::from(&packet_key),
            incoming_hostname: incoming_hostname.map(str::to_string),
            incoming_ip: incoming_ip.map(str::to_string),
            incoming_port,
        };
        let descriptor = descriptor::build_and_sign(&fields, identity_key)?;
        fs::write(dir.join("ServerDesc"), &descriptor.canonical_text)?;

        let hashlog_path = hashlogs_dir.join(format!("hash_{}", Self::keyname(number)));
        let replay_log = Arc::new(
            ReplayLog::open(&hashlog_path)
                .map_err(|e| CryptoError::Io(std::io::Error::other(e.to_string())))?,
        );

        Ok(Self {
            number,
            valid_after,
            valid_until,
            packet_key,
            transport_key,
            descriptor,
            replay_log,
            dir,
        })
    }

    /// Re-load a previously generated KeySet from disk.
    pub fn load(
        number: u32,
        keys_dir: &Path,
        hashlogs_dir: &Path,
    ) -> Result<Self, crate::error::KeyringError> {
        let dir = keys_dir.join(Self::dir_name(number));
        let desc_bytes = fs::read(dir.join("ServerDesc"))?;
        let descriptor = descriptor::parse(&desc_bytes)?;

        let valid_after = descriptor
            .valid_after()
            .ok_or_else(|| crate::error::KeyringError::CorruptKeySet(Self::keyname(number), "missing Valid-After".into()))?;
        let valid_until = descriptor
            .valid_until()
            .ok_or_else(|| crate::error::KeyringError::CorruptKeySet(Self::keyname(number), "missing Valid-Until".into()))?;

        let packet_key_pem = fs::read_to_string(dir.join("mix.key"))?;
        let transport_key_pem = fs::read_to_string(dir.join("mmtp.key"))?;
        use rsa::pkcs1::DecodeRsaPrivateKey;
        let packet_key = RsaPrivateKey::from_pkcs1_pem(&packet_key_pem)
            .map_err(|e| crate::error::KeyringError::CorruptKeySet(Self::keyname(number), e.to_string()))?;
        let transport_key = RsaPrivateKey::from_pkcs1_pem(&transport_key_pem)
            .map_err(|e| crate::error::KeyringError::CorruptKeySet(Self::keyname(number), e.to_string()))?;

        let hashlog_path = hashlogs_dir.join(format!("hash_{}", Self::keyname(number)));
        let replay_log = Arc::new(ReplayLog::open(&hashlog_path)?);

        Ok(Self {
            number,
            valid_after,
            valid_until,
            packet_key,
            transport_key,
            descriptor,
            replay_log,
            dir,
        })
    }

    /// Permanently remove this KeySet's directory and replay log.
    pub fn destroy(self, hashlogs_dir: &Path) -> std::io::Result<()> {
        fs::remove_dir_all(&self.dir)?;
        let hashlog_path = hashlogs_dir.join(format!("hash_{}", Self::keyname(self.number)));
        if hashlog_path.exists() {
            fs::remove_dir_all(&hashlog_path)?;
        }
        Ok(())
    }

    pub fn ensure_key_file_permissions(dir: &Path) -> std::io::Result<()> {
        for name in ["mix.key", "mmtp.key"] {
            let path = dir.join(name);
            if path.exists() {
                fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
            }
        }
        Ok(())
    }
}
