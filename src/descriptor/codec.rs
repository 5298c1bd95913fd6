//! Build, sign, canonicalize, and verify server descriptors. See
//! SPEC_FULL.md 4.1 and 6.

use super::canon::{canonicalize, digest_with_blanked_fields};
use super::grammar::{Document, Section};
use crate::crypto::{self, CryptoError};
use crate::error::DescriptorError;
use chrono::{DateTime, Utc};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};

pub const DESCRIPTOR_VERSION: &str = "0.2";
pub const MAX_CONTACT: usize = 256;
pub const MAX_COMMENTS: usize = 1024;
pub const MAX_FINGERPRINT: usize = 128;
pub const MIN_IDENTITY_BYTES: usize = 256;
pub const MAX_IDENTITY_BYTES: usize = 512;
pub const PACKET_KEY_BYTES: usize = 256;

/// Everything needed to build a `[Server]` + `[Incoming/MMTP]` descriptor for
/// one KeySet.
pub struct DescriptorFields {
    pub nickname: String,
    pub contact: Option<String>,
    pub comments: Option<String>,
    pub published: DateTime<Utc>,
    pub valid_after: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub identity_public: RsaPublicKey,
    pub packet_public: RsaPublicKey,
    pub incoming_hostname: Option<String>,
    pub incoming_ip: Option<String>,
    pub incoming_port: u16,
}

/// A parsed-and/or-signed descriptor: the section document plus the raw
/// canonical text it was produced from (needed so `verify` re-derives the
/// exact bytes that were digested, not a re-serialization that might differ
/// in incidental ways).
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub doc: Document,
    pub canonical_text: Vec<u8>,
}

impl Descriptor {
    pub fn nickname(&self) -> Option<&str> {
        self.doc.section("Server").and_then(|s| s.get("Nickname"))
    }

    pub fn valid_after(&self) -> Option<DateTime<Utc>> {
        self.doc
            .section("Server")
            .and_then(|s| s.get("Valid-After"))
            .and_then(parse_iso_date)
    }

    pub fn valid_until(&self) -> Option<DateTime<Utc>> {
        self.doc
            .section("Server")
            .and_then(|s| s.get("Valid-Until"))
            .and_then(parse_iso_date)
    }

    pub fn identity_public(&self) -> Result<RsaPublicKey, DescriptorError> {
        let b64 = self
            .doc
            .section("Server")
            .and_then(|s| s.get("Identity"))
            .ok_or(DescriptorError::MissingField("Identity", "Server"))?;
        let der = crypto::base64_decode(b64).map_err(|e| DescriptorError::Malformed(e.to_string()))?;
        crypto::public_key_from_der(&der).map_err(|_| DescriptorError::BadSignature)
    }
}

fn parse_iso_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc))
    .or_else(|| {
        chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .map(|d| d.and_hms_opt(0, 0, 0).unwrap().and_utc())
    })
}

fn format_date(d: &DateTime<Utc>) -> String {
    d.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Build, canonicalize, digest, and sign a fresh descriptor.
pub fn build_and_sign(
    fields: &DescriptorFields,
    identity_key: &RsaPrivateKey,
) -> Result<Descriptor, CryptoError> {
    let mut server = Section { name: "Server".to_string(), entries: Vec::new() };
    server.set("Descriptor-Version", DESCRIPTOR_VERSION);
    server.set("Nickname", &fields.nickname);
    server.set("Identity", crypto::base64_encode(&crypto::public_key_der(&fields.identity_public)?));
    server.set("Digest", "");
    server.set("Signature", "");
    server.set("Published", format_date(&fields.published));
    server.set("Valid-After", format_date(&fields.valid_after));
    server.set("Valid-Until", format_date(&fields.valid_until));
    server.set("Packet-Key", crypto::base64_encode(&crypto::public_key_der(&fields.packet_public)?));
    if let Some(contact) = &fields.contact {
        server.set("Contact", contact);
    }
    if let Some(comments) = &fields.comments {
        server.set("Comments", comments);
    }

    let mut doc = Document::default();
    doc.push_section(server);

    if fields.incoming_hostname.is_some() || fields.incoming_ip.is_some() {
        let mut incoming = Section { name: "Incoming/MMTP".to_string(), entries: Vec::new() };
        incoming.set("Version", "0.1");
        if let Some(hostname) = &fields.incoming_hostname {
            incoming.set("Hostname", hostname);
        }
        if let Some(ip) = &fields.incoming_ip {
            incoming.set("IP", ip);
        }
        incoming.set("Port", fields.incoming_port.to_string());
        doc.push_section(incoming);
    }

    let unsigned_text = doc.render();
    let canonical = canonicalize(unsigned_text.as_bytes());
    let digest = digest_with_blanked_fields(&canonical, "Digest", "Signature");
    let signature = crypto::sign_digest(identity_key, &digest);

    doc.section_mut("Server").unwrap().set("Digest", crypto::base64_encode(&digest));
    doc.section_mut("Server").unwrap().set("Signature", crypto::base64_encode(&signature));

    let final_text = doc.render();
    let canonical_text = canonicalize(final_text.as_bytes());

    Ok(Descriptor { doc, canonical_text })
}

/// Parse descriptor bytes, running the prevalidate pass (unknown section
/// versions dropped, `Descriptor-Version` must be 0.2).
pub fn parse(bytes: &[u8]) -> Result<Descriptor, DescriptorError> {
    let canonical_text = canonicalize(bytes);
    let text = String::from_utf8_lossy(&canonical_text);
    let mut doc = Document::parse(&text)?;

    let version = doc
        .section("Server")
        .and_then(|s| s.get("Descriptor-Version"))
        .ok_or(DescriptorError::MissingField("Descriptor-Version", "Server"))?;
    if version != DESCRIPTOR_VERSION {
        return Err(DescriptorError::BadVersion(version.to_string()));
    }

    doc.prevalidate(&[("Incoming/MMTP", "0.1"), ("Outgoing/MMTP", "0.1")]);

    Ok(Descriptor { doc, canonical_text })
}

/// Recompute the digest and verify it both matches the declared `Digest`
/// field and was signed by `identity_public`.
pub fn verify(descriptor: &Descriptor, identity_public: &RsaPublicKey) -> Result<(), DescriptorError> {
    let server = descriptor
        .doc
        .section("Server")
        .ok_or_else(|| DescriptorError::Malformed("missing [Server] section".into()))?;

    let declared_digest_b64 = server.get("Digest").ok_or(DescriptorError::MissingField("Digest", "Server"))?;
    let declared_sig_b64 = server.get("Signature").ok_or(DescriptorError::MissingField("Signature", "Server"))?;

    let declared_digest = crypto::base64_decode(declared_digest_b64)
        .map_err(|_| DescriptorError::BadDigest)?;
    let signature = crypto::base64_decode(declared_sig_b64).map_err(|_| DescriptorError::BadSignature)?;

    let recomputed = digest_with_blanked_fields(&descriptor.canonical_text, "Digest", "Signature");
    if recomputed.as_slice() != declared_digest.as_slice() {
        return Err(DescriptorError::BadDigest);
    }

    crypto::verify_digest(identity_public, &recomputed, &signature)
        .map_err(|_| DescriptorError::BadSignature)?;

    Ok(())
}

/// Semantic ("validate") pass: the length and numeric constraints §4.1 lists.
pub fn validate(descriptor: &Descriptor, now: DateTime<Utc>) -> Result<(), DescriptorError> {
    let server = descriptor
        .doc
        .section("Server")
        .ok_or_else(|| DescriptorError::Malformed("missing [Server] section".into()))?;

    if let Some(contact) = server.get("Contact") {
        if contact.len() > MAX_CONTACT {
            return Err(DescriptorError::BadLength { field: "Contact", len: contact.len(), max: MAX_CONTACT });
        }
    }
    if let Some(comments) = server.get("Comments") {
        if comments.len() > MAX_COMMENTS {
            return Err(DescriptorError::BadLength { field: "Comments", len: comments.len(), max: MAX_COMMENTS });
        }
    }
    if let Some(fp) = server.get("Contact-Fingerprint") {
        if fp.len() > MAX_FINGERPRINT {
            return Err(DescriptorError::BadLength { field: "Contact-Fingerprint", len: fp.len(), max: MAX_FINGERPRINT });
        }
    }

    let identity_der = crypto::base64_decode(
        server.get("Identity").ok_or(DescriptorError::MissingField("Identity", "Server"))?,
    )
    .map_err(|e| DescriptorError::Malformed(e.to_string()))?;
    let identity_public = crypto::public_key_from_der(&identity_der)
        .map_err(|e| DescriptorError::Malformed(e.to_string()))?;
    let identity_modulus_len = identity_public.n().to_bytes_be().len();
    if !(MIN_IDENTITY_BYTES..=MAX_IDENTITY_BYTES).contains(&identity_modulus_len) {
        return Err(DescriptorError::BadLength {
            field: "Identity",
            len: identity_modulus_len,
            max: MAX_IDENTITY_BYTES,
        });
    }

    let packet_der = crypto::base64_decode(
        server.get("Packet-Key").ok_or(DescriptorError::MissingField("Packet-Key", "Server"))?,
    )
    .map_err(|e| DescriptorError::Malformed(e.to_string()))?;
    let packet_public = crypto::public_key_from_der(&packet_der)
        .map_err(|e| DescriptorError::Malformed(e.to_string()))?;
    let modulus_len = packet_public.n().to_bytes_be().len();
    if modulus_len != PACKET_KEY_BYTES {
        return Err(DescriptorError::BadLength { field: "Packet-Key", len: modulus_len, max: PACKET_KEY_BYTES });
    }

    let valid_after = descriptor.valid_after().ok_or(DescriptorError::MissingField("Valid-After", "Server"))?;
    let valid_until = descriptor.valid_until().ok_or(DescriptorError::MissingField("Valid-Until", "Server"))?;
    if valid_after >= valid_until {
        return Err(DescriptorError::Malformed("Valid-After must precede Valid-Until".into()));
    }

    let published = server
        .get("Published")
        .and_then(parse_iso_date)
        .ok_or(DescriptorError::MissingField("Published", "Server"))?;
    if published > now + chrono::Duration::seconds(600) {
        return Err(DescriptorError::Malformed("Published is too far in the future".into()));
    }

    if valid_until + chrono::Duration::seconds(0) < now {
        return Err(DescriptorError::Expired { valid_until: format_date(&valid_until) });
    }

    if let Some(incoming) = descriptor.doc.section("Incoming/MMTP") {
        if incoming.get("Hostname").is_none() && incoming.get("IP").is_none() {
            return Err(DescriptorError::Malformed(
                "[Incoming/MMTP] must declare Hostname or IP".into(),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_rsa_key;

    fn sample_fields(identity_pub: RsaPublicKey, packet_pub: RsaPublicKey) -> DescriptorFields {
        DescriptorFields {
            nickname: "testnode".to_string(),
            contact: None,
            comments: None,
            published: DateTime::parse_from_rfc3339("2004-01-01T00:00:00Z").unwrap().with_timezone(&Utc),
            valid_after: DateTime::parse_from_rfc3339("2004-01-01T00:00:00Z").unwrap().with_timezone(&Utc),
            valid_until: DateTime::parse_from_rfc3339("2004-01-08T00:00:00Z").unwrap().with_timezone(&Utc),
            identity_public: identity_pub,
            packet_public: packet_pub,
            incoming_hostname: Some("mix.example.org".to_string()),
            incoming_ip: None,
            incoming_port: 48099,
        }
    }

    #[test]
    fn round_trip_descriptor_scenario() {
        let identity = generate_rsa_key(512).unwrap();
        let packet = generate_rsa_key(512).unwrap();
        let identity_pub = RsaPublicKey::from(&identity);
        let packet_pub = RsaPublicKey::from(&packet);

        let fields = sample_fields(identity_pub.clone(), packet_pub);
        let signed = build_and_sign(&fields, &identity).unwrap();

        let digest_before = signed.doc.section("Server").unwrap().get("Digest").unwrap().to_string();

        let reparsed = parse(&signed.canonical_text).unwrap();
        let digest_after = reparsed.doc.section("Server").unwrap().get("Digest").unwrap().to_string();
        assert_eq!(digest_before, digest_after);

        verify(&reparsed, &identity_pub).expect("signature must verify");
    }

    #[test]
    fn verify_rejects_tampered_descriptor() {
        let identity = generate_rsa_key(512).unwrap();
        let packet = generate_rsa_key(512).unwrap();
        let identity_pub = RsaPublicKey::from(&identity);
        let packet_pub = RsaPublicKey::from(&packet);

        let fields = sample_fields(identity_pub.clone(), packet_pub);
        let signed = build_and_sign(&fields, &identity).unwrap();

        let mut tampered_text = String::from_utf8(signed.canonical_text.clone()).unwrap();
        tampered_text = tampered_text.replace("testnode", "evilnode");
        let tampered = parse(tampered_text.as_bytes()).unwrap();

        assert!(verify(&tampered, &identity_pub).is_err());
    }

    #[test]
    fn canonicalization_idempotence_invariant() {
        let bytes = b"[Server]\r\nNickname: test  \r\n\r\n\r\n";
        let once = canonicalize(bytes);
        let twice = canonicalize(&once);
        assert_eq!(once, twice);
    }
}
