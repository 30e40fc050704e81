//! SHA-1 helpers shared by request signing, cache keys, job IDs, and the
//! logger's dedup table.

use std::fmt::Write as _;

use sha1::{Digest, Sha1};

/// Hex-encoded SHA-1 of the given parts, concatenated without separators.
pub fn sha1_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        // write! to a String cannot fail
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha1_hex_known_vector() {
        // sha1("abc") = a9993e364706816aba3e25717850c26c9cd0d89d
        assert_eq!(
            sha1_hex(&[b"abc"]),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_sha1_hex_concatenation() {
        // Parts are hashed as one contiguous byte sequence.
        assert_eq!(sha1_hex(&[b"ab", b"c"]), sha1_hex(&[b"abc"]));
        assert_ne!(sha1_hex(&[b"ab"]), sha1_hex(&[b"abc"]));
    }

    #[test]
    fn test_sha1_hex_length() {
        assert_eq!(sha1_hex(&[b""]).len(), 40);
    }
}
