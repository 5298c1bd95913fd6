//! Packet types and the unwrap primitive's declared interface.
//!
//! The actual onion-decryption algorithm ("process-one-hop" in SPEC_FULL.md 1)
//! is out of scope — it belongs to the Sphinx-like packet format this crate
//! does not implement. `UnwrapPrimitive` is the seam: something external
//! hands back one of the four outcomes below for each spooled packet.

use rsa::RsaPublicKey;

/// A fixed-size opaque on-wire packet, as received from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet(pub Vec<u8>);

impl Packet {
    pub fn digest(&self) -> [u8; 20] {
        crate::crypto::sha1_digest(&self.0)
    }
}

/// Routing information for a packet forwarded to the next hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayInfo {
    pub next_hop_nickname: String,
    pub forwarded_ciphertext: Vec<u8>,
}

/// A decoded terminal (exit) packet, tagged by delivery module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitInfo {
    pub delivery_type: String,
    pub payload: Vec<u8>,
}

/// The result of applying the unwrap primitive to one spooled packet.
/// See SPEC_FULL.md 3 and 4.3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnwrapOutcome {
    Relay(RelayInfo),
    Exit(ExitInfo),
    Padding,
    Invalid(String),
}

/// The external onion-unwrap collaborator. Given the packet keys currently
/// live on this server (newest first) and a replay-log check callback, peel
/// one layer and classify the result.
pub trait UnwrapPrimitive: Send + Sync {
    fn unwrap(
        &self,
        packet: &Packet,
        packet_keys: &[(u32, RsaPublicKey)],
        seen_before: &dyn Fn(&[u8; 20]) -> bool,
    ) -> UnwrapOutcome;
}

/// Marks every packet invalid. Satisfies the trait boundary until the real
/// Sphinx-like unwrap primitive is wired in.
pub struct AlwaysInvalidUnwrap;

impl UnwrapPrimitive for AlwaysInvalidUnwrap {
    fn unwrap(
        &self,
        _packet: &Packet,
        _packet_keys: &[(u32, RsaPublicKey)],
        _seen_before: &dyn Fn(&[u8; 20]) -> bool,
    ) -> UnwrapOutcome {
        UnwrapOutcome::Invalid("no unwrap primitive configured".to_string())
    }
}
