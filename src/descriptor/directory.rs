//! Directory: a header (its own digest/signature over the canonicalized
//! whole) followed by a sequence of `[Server]`-introduced descriptor
//! records. See SPEC_FULL.md 3 and 6.

use super::canon::canonicalize;
use super::codec::{parse, Descriptor};
use crate::error::DescriptorError;

pub struct Directory {
    pub recommended_nicknames: Vec<String>,
    pub descriptors: Vec<Descriptor>,
}

impl Directory {
    /// Split concatenated directory bytes into descriptor records (each
    /// begins at a line starting with `[Server]`) and parse each one.
    pub fn parse(bytes: &[u8], recommended_nicknames: Vec<String>) -> Result<Self, DescriptorError> {
        let canonical = canonicalize(bytes);
        let text = String::from_utf8_lossy(&canonical);

        let mut records: Vec<String> = Vec::new();
        let mut current = String::new();
        for line in text.lines() {
            if line.trim() == "[Server]" && !current.is_empty() {
                records.push(std::mem::take(&mut current));
            }
            current.push_str(line);
            current.push('\n');
        }
        if !current.trim().is_empty() {
            records.push(current);
        }

        let descriptors = records
            .into_iter()
            .map(|record| parse(record.as_bytes()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { recommended_nicknames, descriptors })
    }

    /// A server not in the recommended list is retained but flagged.
    pub fn is_recommended(&self, nickname: &str) -> bool {
        self.recommended_nicknames.iter().any(|n| n == nickname)
    }
}

/// POST a descriptor to the directory server as
/// `application/x-www-form-urlencoded`, single field `desc`, per
/// SPEC_FULL.md 6. Returns `Ok(true)` on `Status: 1` (accepted), `Ok(false)`
/// on `Status: 0` (rejected), `Err` on a transport or malformed-response
/// error — matching `Keyring::publish_pending`'s three-outcome contract.
pub async fn upload(client: &reqwest::Client, directory_url: &str, descriptor_text: &[u8]) -> Result<bool, String> {
    let desc = String::from_utf8_lossy(descriptor_text).into_owned();
    let response = client
        .post(directory_url)
        .form(&[("desc", desc)])
        .send()
        .await
        .map_err(|e| e.to_string())?;
    let body = response.text().await.map_err(|e| e.to_string())?;
    parse_upload_response(&body).map(|(accepted, _message)| accepted).ok_or_else(|| format!("malformed directory response: {body:?}"))
}

/// Parse an HTTP directory-server upload response:
/// `^Status: (0|1)\s*\nMessage: (.*)$`.
pub fn parse_upload_response(body: &str) -> Option<(bool, String)> {
    let mut lines = body.trim_start().lines();
    let status_line = lines.next()?.trim();
    let message_line = lines.next().unwrap_or("").trim();

    let status = status_line.strip_prefix("Status:")?.trim();
    let accepted = match status {
        "1" => true,
        "0" => false,
        _ => return None,
    };
    let message = message_line.strip_prefix("Message:")?.trim().to_string();
    Some((accepted, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_accept_response() {
        let (ok, msg) = parse_upload_response("Status: 1\nMessage: ok\n").unwrap();
        assert!(ok);
        assert_eq!(msg, "ok");
    }

    #[test]
    fn parses_reject_response() {
        let (ok, msg) = parse_upload_response("Status: 0\nMessage: expired\n").unwrap();
        assert!(!ok);
        assert_eq!(msg, "expired");
    }

    #[test]
    fn rejects_malformed_response() {
        assert!(parse_upload_response("garbage").is_none());
    }
}
