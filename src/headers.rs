//! Case-insensitive predicates over raw header names and values.
//!
//! Header values are byte sequences; we need case insensitive comparison
//! with surrounding whitespace stripped out, without allocating.

fn eq_ignore_case(val: &[u8], token: &[u8]) -> bool {
    val.len() == token.len()
        && val
            .iter()
            .zip(token.iter())
            .all(|(a, b)| a.to_ascii_lowercase() == *b)
}

fn trimmed(val: &[u8]) -> &[u8] {
    let start = val
        .iter()
        .position(|c| !matches!(c, b'\r' | b'\n' | b' ' | b'\t'))
        .unwrap_or(val.len());
    let end = val
        .iter()
        .rposition(|c| !matches!(c, b'\r' | b'\n' | b' ' | b'\t'))
        .map(|x| x + 1)
        .unwrap_or(start);
    &val[start..end]
}

#[inline]
pub fn is_transfer_encoding(name: &str) -> bool {
    eq_ignore_case(name.as_bytes(), b"transfer-encoding")
}

#[inline]
pub fn is_content_length(name: &str) -> bool {
    eq_ignore_case(name.as_bytes(), b"content-length")
}

#[inline]
pub fn is_connection(name: &str) -> bool {
    eq_ignore_case(name.as_bytes(), b"connection")
}

#[inline]
pub fn is_close(val: &[u8]) -> bool {
    eq_ignore_case(trimmed(val), b"close")
}

#[inline]
pub fn is_keep_alive(val: &[u8]) -> bool {
    eq_ignore_case(trimmed(val), b"keep-alive")
}

/// Transfer-Encoding may carry a list; we only accept a lone "chunked".
#[inline]
pub fn is_chunked(val: &[u8]) -> bool {
    eq_ignore_case(trimmed(val), b"chunked")
}
