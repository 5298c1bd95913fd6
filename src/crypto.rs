//! RSA identity/packet/transport key primitives: generation, PEM persistence,
//! PKCS#1 v1.5 signing over SHA-1 digests.
//!
//! Mixminion's wire format is fixed to RSA + SHA-1; this module exists to keep
//! that legacy choice isolated behind a small surface rather than scattered
//! through the descriptor and keyring code.

use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPublicKey};
use rsa::pkcs1::LineEnding;
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use thiserror::Error;

/// Identity keys are 2048-4096 bits; 2048 is the default we generate.
pub const IDENTITY_KEY_BITS: usize = 2048;
/// Packet keys are fixed at 2048 bits (256-byte modulus, per descriptor format).
pub const PACKET_KEY_BITS: usize = 2048;
/// Transport keys are fixed at 1024 bits per the original MMTP key schedule.
pub const TRANSPORT_KEY_BITS: usize = 1024;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("rsa error: {0}")]
    Rsa(#[from] rsa::Error),
    #[error("pkcs1 error: {0}")]
    Pkcs1(#[from] rsa::pkcs1::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("signature verification failed")]
    BadSignature,
}

/// Generate a fresh RSA keypair of the given modulus size.
pub fn generate_rsa_key(bits: usize) -> Result<RsaPrivateKey, CryptoError> {
    Ok(RsaPrivateKey::new(&mut OsRng, bits)?)
}

/// SHA-1 digest of arbitrary bytes (20 bytes), as required by the descriptor
/// digest/signature scheme.
pub fn sha1_digest(data: &[u8]) -> [u8; 20] {
    use sha1::{Digest, Sha1 as Sha1Hasher};
    let mut hasher = Sha1Hasher::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Sign a 20-byte SHA-1 digest with an RSA private key, PKCS#1 v1.5.
pub fn sign_digest(key: &RsaPrivateKey, digest: &[u8; 20]) -> Vec<u8> {
    let signing_key = SigningKey::<Sha1>::new(key.clone());
    let sig: Signature = signing_key.sign_with_rng(&mut OsRng, digest);
    sig.to_vec()
}

/// Verify a PKCS#1 v1.5 signature over a 20-byte SHA-1 digest.
pub fn verify_digest(public: &RsaPublicKey, digest: &[u8; 20], signature: &[u8]) -> Result<(), CryptoError> {
    let verifying_key = VerifyingKey::<Sha1>::new(public.clone());
    let sig = Signature::try_from(signature).map_err(|_| CryptoError::BadSignature)?;
    verifying_key.verify(digest, &sig).map_err(|_| CryptoError::BadSignature)
}

/// DER-encode a public key (goes into the descriptor's `Identity`/`Packet-Key`
/// fields as base64).
pub fn public_key_der(key: &RsaPublicKey) -> Result<Vec<u8>, CryptoError> {
    Ok(key.to_pkcs1_der()?.as_bytes().to_vec())
}

pub fn public_key_from_der(der: &[u8]) -> Result<RsaPublicKey, CryptoError> {
    Ok(RsaPublicKey::from_pkcs1_der(der)?)
}

/// Load a PEM-encoded private key from `path`, generating and persisting a new
/// one (mode 0600) if absent. Mirrors the load-or-generate pattern used for
/// every long-lived key file this server owns.
pub fn load_or_generate_private_key(path: &Path, bits: usize) -> Result<RsaPrivateKey, CryptoError> {
    if path.exists() {
        let pem = fs::read_to_string(path)?;
        return Ok(RsaPrivateKey::from_pkcs1_pem(&pem)?);
    }

    let key = generate_rsa_key(bits)?;
    let pem = key.to_pkcs1_pem(LineEnding::LF)?;
    fs::write(path, pem.as_bytes())?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(key)
}

pub fn base64_encode(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(data)
}

pub fn base64_decode(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(data.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let key = generate_rsa_key(512).expect("tiny key for test speed");
        let digest = sha1_digest(b"hello mix");
        let sig = sign_digest(&key, &digest);
        let public = RsaPublicKey::from(&key);
        verify_digest(&public, &digest, &sig).expect("signature must verify");
    }

    #[test]
    fn verify_rejects_tampered_digest() {
        let key = generate_rsa_key(512).expect("tiny key for test speed");
        let digest = sha1_digest(b"hello mix");
        let sig = sign_digest(&key, &digest);
        let public = RsaPublicKey::from(&key);
        let other_digest = sha1_digest(b"goodbye mix");
        assert!(verify_digest(&public, &other_digest, &sig).is_err());
    }

    #[test]
    fn load_or_generate_persists_mode_0600() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.key");
        let key1 = load_or_generate_private_key(&path, 512).unwrap();
        let meta = fs::metadata(&path).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
        let key2 = load_or_generate_private_key(&path, 512).unwrap();
        assert_eq!(key1.to_pkcs1_der().unwrap().as_bytes(), key2.to_pkcs1_der().unwrap().as_bytes());
    }
}
