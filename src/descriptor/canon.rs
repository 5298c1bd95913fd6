//! The canonicalization ("cleaning") transform applied before digesting a
//! descriptor or directory header, and the digest computation that follows
//! it. See SPEC_FULL.md 4.1.

/// Normalize line endings, strip leading/trailing horizontal whitespace on
/// every line, and ensure exactly one trailing LF.
///
/// Idempotent: `canonicalize(canonicalize(b)) == canonicalize(b)`.
pub fn canonicalize(input: &[u8]) -> Vec<u8> {
    let text = String::from_utf8_lossy(input);
    let unified: String = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut out = String::new();
    for line in unified.split('\n') {
        out.push_str(line.trim_matches(|c| c == ' ' || c == '\t'));
        out.push('\n');
    }
    while out.ends_with("\n\n") {
        out.pop();
    }
    if out.is_empty() {
        out.push('\n');
    }
    out.into_bytes()
}

/// Find the first line (by index) whose trimmed form starts with
/// `"<field>:"`.
fn find_field_line(lines: &[&str], field: &str) -> Option<usize> {
    let prefix = format!("{}:", field);
    lines.iter().position(|l| l.trim_start().starts_with(&prefix))
}

/// Blank out the digest and signature lines (replace `Field: value` with
/// `Field:`), then SHA-1 the result. Used both to compute the digest a
/// descriptor should carry and to recompute it for verification.
pub fn digest_with_blanked_fields(
    canonical: &[u8],
    digest_field: &str,
    signature_field: &str,
) -> [u8; 20] {
    let text = String::from_utf8_lossy(canonical);
    let mut lines: Vec<&str> = text.split('\n').collect();

    if let Some(idx) = find_field_line(&lines, digest_field) {
        lines[idx] = digest_field;
    }
    if let Some(idx) = find_field_line(&lines, signature_field) {
        lines[idx] = signature_field;
    }

    // Re-join, restoring the trailing colon each blanked field needs.
    let mut rebuilt = String::new();
    let blanked_digest = format!("{}:", digest_field);
    let blanked_sig = format!("{}:", signature_field);
    for (i, line) in lines.iter().enumerate() {
        if *line == digest_field {
            rebuilt.push_str(&blanked_digest);
        } else if *line == signature_field {
            rebuilt.push_str(&blanked_sig);
        } else {
            rebuilt.push_str(line);
        }
        if i + 1 < lines.len() {
            rebuilt.push('\n');
        }
    }

    crate::crypto::sha1_digest(rebuilt.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_normalizes_crlf_and_whitespace() {
        let input = b"[Server]\r\n  Nickname: test  \r\nDigest: x  \n\n\n";
        let out = canonicalize(input);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "[Server]\nNickname: test\nDigest: x\n");
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let input = b"[Server]\r\n  Nickname: test  \r\n";
        let once = canonicalize(input);
        let twice = canonicalize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn digest_blanks_reserved_fields() {
        let canonical = canonicalize(b"[Server]\nDigest: abc\nSignature: def\nNickname: test\n");
        let d1 = digest_with_blanked_fields(&canonical, "Digest", "Signature");
        let canonical2 = canonicalize(b"[Server]\nDigest: zzz\nSignature: yyy\nNickname: test\n");
        let d2 = digest_with_blanked_fields(&canonical2, "Digest", "Signature");
        assert_eq!(d1, d2, "digest must not depend on the reserved fields' prior values");
    }
}
