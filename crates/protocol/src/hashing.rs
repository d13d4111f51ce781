//! Network hashing conventions.
//!
//! Content addresses and node identities are RIPEMD160 digests of SHA256
//! digests. A shard's address is `rmd160_sha256(shard bytes)` rendered as
//! 40 lowercase hex characters.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// SHA256 digest.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// RIPEMD160 over SHA256, the double hash used for all network addresses.
pub fn rmd160_sha256(data: &[u8]) -> [u8; 20] {
    rmd160(&sha256(data))
}

/// RIPEMD160 of an already-computed digest.
pub fn rmd160(digest: &[u8]) -> [u8; 20] {
    let mut hasher = Ripemd160::new();
    hasher.update(digest);
    hasher.finalize().into()
}

/// Content address of a byte string, hex-encoded.
pub fn content_hash(data: &[u8]) -> String {
    hex::encode(rmd160_sha256(data))
}

/// Content address from a streamed SHA256 digest.
///
/// Transfer paths hash bytes incrementally and only fold in the RIPEMD160
/// step once the stream ends.
pub fn content_hash_from_digest(sha256_digest: &[u8; 32]) -> String {
    hex::encode(rmd160(sha256_digest))
}

/// Whether a string is a well-formed content address: exactly 40 lowercase
/// hexadecimal characters.
pub fn is_content_hash(value: &str) -> bool {
    value.len() == 40
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_40_hex() {
        let hash = content_hash(b"this is a test shard");
        assert_eq!(hash.len(), 40);
        assert!(is_content_hash(&hash));
    }

    #[test]
    fn test_content_hash_matches_streamed_digest() {
        let data = b"stream me in pieces";
        let direct = content_hash(data);

        let mut hasher = sha2::Sha256::new();
        hasher.update(&data[..7]);
        hasher.update(&data[7..]);
        let digest: [u8; 32] = hasher.finalize().into();

        assert_eq!(direct, content_hash_from_digest(&digest));
    }

    #[test]
    fn test_is_content_hash_rejects_bad_input() {
        assert!(!is_content_hash(""));
        assert!(!is_content_hash("abc"));
        // Uppercase is not canonical.
        assert!(!is_content_hash(&"A".repeat(40)));
        assert!(!is_content_hash(&"g".repeat(40)));
        assert!(is_content_hash(&"0".repeat(40)));
    }

    #[test]
    fn test_double_hash_differs_from_plain_sha256() {
        let data = b"payload";
        assert_ne!(rmd160_sha256(data).to_vec(), sha256(data)[..20].to_vec());
    }
}
