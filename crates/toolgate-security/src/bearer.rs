use sha2::{Digest, Sha256};

const BEARER_PREFIX: &str = "bearer ";

/// Compare two byte strings without leaking where (or whether) their lengths differ.
///
/// Both inputs are hashed first, so the comparison always runs over two
/// 32-byte digests regardless of the input lengths.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let left = Sha256::digest(a);
    let right = Sha256::digest(b);
    left.iter()
        .zip(right.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Extract the token from an `Authorization` header value.
///
/// The scheme is matched case-insensitively; the token itself is returned
/// verbatim. Returns `None` for any other scheme or an empty token.
pub fn extract_bearer(header: &str) -> Option<&str> {
    let prefix = header.get(..BEARER_PREFIX.len())?;
    if !prefix.eq_ignore_ascii_case(BEARER_PREFIX) {
        return None;
    }
    let token = header.get(BEARER_PREFIX.len()..)?;
    if token.is_empty() {
        return None;
    }
    Some(token)
}

/// Check an `Authorization` header value against the expected token.
///
/// Returns `false` for a missing or malformed header, a wrong token, or an
/// empty expected token.
pub fn verify_bearer(header: Option<&str>, expected: &str) -> bool {
    let presented = header.and_then(extract_bearer).unwrap_or_default();
    // Always run the comparison so a missing header costs the same as a wrong one.
    let matches = constant_time_eq(presented.as_bytes(), expected.as_bytes());
    matches && !expected.is_empty() && !presented.is_empty()
}
