//! Helper functions for key encoding/decoding used by the stores.
//!
//! Multi-part keys are built by prefixing each part with its big-endian
//! `u32` length, so concatenated parts never alias and prefix scans over a
//! leading part are exact. Versions are encoded big-endian so that RocksDB's
//! byte order is version order.

use vellum_types::Version;

/// Concatenate parts, each prefixed with its big-endian `u32` length.
pub fn encode_parts(parts: &[&[u8]]) -> Vec<u8> {
    let total: usize = parts.iter().map(|p| 4 + p.len()).sum();
    let mut out = Vec::with_capacity(total);
    for part in parts {
        out.extend_from_slice(&(part.len() as u32).to_be_bytes());
        out.extend_from_slice(part);
    }
    out
}

/// Split a key produced by [`encode_parts`] back into its parts.
///
/// Returns `None` on malformed input (truncated length or payload).
pub fn decode_parts(mut bytes: &[u8]) -> Option<Vec<Vec<u8>>> {
    let mut parts = Vec::new();
    while !bytes.is_empty() {
        if bytes.len() < 4 {
            return None;
        }
        let len = u32::from_be_bytes(bytes[..4].try_into().ok()?) as usize;
        bytes = &bytes[4..];
        if bytes.len() < len {
            return None;
        }
        parts.push(bytes[..len].to_vec());
        bytes = &bytes[len..];
    }
    Some(parts)
}

/// Encode a version as 16 big-endian bytes ordered like the version itself.
pub fn version_key(version: Version) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..8].copy_from_slice(&version.block_num.to_be_bytes());
    out[8..].copy_from_slice(&version.tx_num.to_be_bytes());
    out
}

/// Compute the exclusive end key for a prefix scan.
///
/// Returns `None` if the prefix is all `0xFF` bytes (no valid exclusive
/// upper bound). Keys built by [`encode_parts`] start with a length byte of
/// `0x00`, so in practice this never happens.
pub fn next_prefix(prefix: &[u8]) -> Option<Vec<u8>> {
    debug_assert!(!prefix.is_empty(), "next_prefix called with empty prefix");
    let mut next = prefix.to_vec();
    for i in (0..next.len()).rev() {
        if next[i] < 255 {
            next[i] += 1;
            return Some(next);
        }
        next[i] = 0;
    }
    None
}

/// Decode a version from its 16-byte key form.
pub fn version_from_key(bytes: &[u8]) -> Option<Version> {
    if bytes.len() != 16 {
        return None;
    }
    Some(Version {
        block_num: u64::from_be_bytes(bytes[..8].try_into().ok()?),
        tx_num: u64::from_be_bytes(bytes[8..].try_into().ok()?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_parts_is_prefix_exact() {
        // Same concatenated bytes, different split points.
        assert_ne!(
            encode_parts(&[b"ab", b"c"]),
            encode_parts(&[b"a", b"bc"])
        );
    }

    #[test]
    fn test_decode_parts_roundtrip() {
        let encoded = encode_parts(&[b"db1", b"key1", b""]);
        let parts = decode_parts(&encoded).unwrap();
        assert_eq!(parts, vec![b"db1".to_vec(), b"key1".to_vec(), Vec::new()]);
    }

    #[test]
    fn test_decode_parts_rejects_truncation() {
        let mut encoded = encode_parts(&[b"db1"]);
        encoded.pop();
        assert!(decode_parts(&encoded).is_none());
    }

    #[test]
    fn test_next_prefix_increments_last_byte() {
        assert_eq!(next_prefix(&[1, 2, 3]), Some(vec![1, 2, 4]));
    }

    #[test]
    fn test_next_prefix_carries_through_max_bytes() {
        assert_eq!(next_prefix(&[1, 0xFF, 0xFF]), Some(vec![2, 0, 0]));
        assert_eq!(next_prefix(&[0xFF, 0xFF]), None);
    }

    #[test]
    fn test_version_key_orders_like_versions() {
        let a = version_key(Version::new(1, 9));
        let b = version_key(Version::new(2, 0));
        let c = version_key(Version::new(2, 1));
        assert!(a < b);
        assert!(b < c);
        assert_eq!(version_from_key(&a), Some(Version::new(1, 9)));
    }
}
