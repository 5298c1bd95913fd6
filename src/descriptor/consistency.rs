//! Cross-check a freshly generated descriptor against the previous live one
//! for the same server. Grounded on `checkDescriptorConsistency`, with the
//! open question it leaves ambiguous resolved here: nickname mismatch is
//! fatal, address/contact drift is a warning. See SPEC_FULL.md 4.1a.

use super::codec::Descriptor;
use crate::error::DescriptorError;
use tracing::warn;

pub fn check_consistency(previous: &Descriptor, next: &Descriptor) -> Result<(), DescriptorError> {
    let prev_nick = previous.nickname().unwrap_or_default();
    let next_nick = next.nickname().unwrap_or_default();
    if prev_nick != next_nick {
        return Err(DescriptorError::Malformed(format!(
            "nickname changed between descriptors: {prev_nick} -> {next_nick}"
        )));
    }

    let prev_incoming = previous.doc.section("Incoming/MMTP");
    let next_incoming = next.doc.section("Incoming/MMTP");
    let prev_addr = prev_incoming.and_then(|s| s.get("Hostname").or_else(|| s.get("IP")));
    let next_addr = next_incoming.and_then(|s| s.get("Hostname").or_else(|| s.get("IP")));
    if prev_addr != next_addr {
        warn!(
            nickname = %next_nick,
            previous = ?prev_addr,
            next = ?next_addr,
            "address changed between consecutive descriptors"
        );
    }

    let prev_contact = previous.doc.section("Server").and_then(|s| s.get("Contact"));
    let next_contact = next.doc.section("Server").and_then(|s| s.get("Contact"));
    if prev_contact != next_contact {
        warn!(nickname = %next_nick, "contact info changed between consecutive descriptors");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_rsa_key;
    use crate::descriptor::codec::{build_and_sign, DescriptorFields};
    use chrono::{DateTime, Utc};
    use rsa::RsaPublicKey;

    fn descriptor_with(nickname: &str, hostname: &str) -> Descriptor {
        let identity = generate_rsa_key(512).unwrap();
        let packet = generate_rsa_key(512).unwrap();
        let fields = DescriptorFields {
            nickname: nickname.to_string(),
            contact: None,
            comments: None,
            published: DateTime::parse_from_rfc3339("2004-01-01T00:00:00Z").unwrap().with_timezone(&Utc),
            valid_after: DateTime::parse_from_rfc3339("2004-01-01T00:00:00Z").unwrap().with_timezone(&Utc),
            valid_until: DateTime::parse_from_rfc3339("2004-01-08T00:00:00Z").unwrap().with_timezone(&Utc),
            identity_public: RsaPublicKey::from(&identity),
            packet_public: RsaPublicKey::from(&packet),
            incoming_hostname: Some(hostname.to_string()),
            incoming_ip: None,
            incoming_port: 48099,
        };
        build_and_sign(&fields, &identity).unwrap()
    }

    #[test]
    fn nickname_mismatch_is_fatal() {
        let a = descriptor_with("alice", "mix.example.org");
        let b = descriptor_with("bob", "mix.example.org");
        assert!(check_consistency(&a, &b).is_err());
    }

    #[test]
    fn address_drift_is_not_fatal() {
        let a = descriptor_with("alice", "old.example.org");
        let b = descriptor_with("alice", "new.example.org");
        assert!(check_consistency(&a, &b).is_ok());
    }
}
