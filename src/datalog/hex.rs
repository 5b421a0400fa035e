// src/datalog/hex.rs
//! Strict hex decoding for log payloads
//!
//! Only `0-9`, `a-f` and `A-F` are accepted. Signs, whitespace and `0x`
//! prefixes are rejected.

fn nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Decode one byte from exactly two hex characters.
pub fn parse_pair(pair: &[u8]) -> Option<u8> {
    match pair {
        [hi, lo] => Some(nibble(*hi)? << 4 | nibble(*lo)?),
        _ => None,
    }
}

/// Decode an even-length hex string into bytes, in text order.
pub fn decode_bytes(hex: &str) -> Option<Vec<u8>> {
    let bytes = hex.as_bytes();
    if bytes.len() % 2 != 0 {
        return None;
    }
    bytes.chunks(2).map(parse_pair).collect()
}

/// Parse a big-endian hex number of 1 to 8 digits, e.g. `"1A"` or `"0001F000"`.
pub fn parse_u32(text: &str) -> Option<u32> {
    let digits = text.as_bytes();
    if digits.is_empty() || digits.len() > 8 {
        return None;
    }
    digits
        .iter()
        .try_fold(0u32, |acc, &c| Some(acc << 4 | u32::from(nibble(c)?)))
}
