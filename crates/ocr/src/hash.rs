use sha2::{Digest, Sha256};

/// Compute SHA-256 of an in-memory byte slice.
pub fn sha256_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Encode a raw 32-byte hash as a lowercase hex string (64 chars).
pub fn to_hex(hash: &[u8; 32]) -> String {
    hash.iter().map(|b| format!("{b:02x}")).collect()
}

/// Stable id for one label page: hex SHA-256 of the file plus 1-based page.
/// Re-submitting the same file yields the same ids.
pub fn label_id(data: &[u8], page: u32) -> String {
    format!("{}-p{page}", to_hex(&sha256_bytes(data)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_bytes_known_vector() {
        let hex = to_hex(&sha256_bytes(b""));
        assert_eq!(hex, "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855");
    }

    #[test]
    fn label_id_is_content_addressed() {
        assert_eq!(
            label_id(b"", 1),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855-p1"
        );
        assert_eq!(label_id(b"label", 2), label_id(b"label", 2));
        assert_ne!(label_id(b"label", 1), label_id(b"label", 2));
        assert_ne!(label_id(b"label", 1), label_id(b"other", 1));
    }
}
