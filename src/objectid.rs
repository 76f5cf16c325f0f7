use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::canonical::canonicalize;

pub type ObjectId = String;

fn to_hex(data: &[u8]) -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    let mut s = String::with_capacity(data.len() * 2);
    for b in data {
        s.push(HEX[(b >> 4) as usize] as char);
        s.push(HEX[(b & 0xf) as usize] as char);
    }
    s
}

/// `id(value) = sha256(canonicalize(value))`, as 64 lowercase hex chars.
pub fn id(value: &Value) -> ObjectId {
    let bytes = canonicalize(value);
    let digest = Sha256::digest(&bytes);
    to_hex(&digest)
}

/// Numeric comparison of two 64-char hex ids as unsigned 256-bit
/// big-endian integers, done byte-by-byte (no bignum crate needed: both
/// operands are always exactly 32 bytes).
pub fn hex_less_than(lhs: &str, rhs: &str) -> bool {
    let (Some(a), Some(b)) = (hex_to_bytes32(lhs), hex_to_bytes32(rhs)) else {
        return false;
    };
    a < b
}

fn hex_to_bytes32(s: &str) -> Option<[u8; 32]> {
    if s.len() != 64 {
        return None;
    }
    let mut out = [0u8; 32];
    for i in 0..32 {
        out[i] = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(out)
}

pub fn is_valid_hex64(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
}
