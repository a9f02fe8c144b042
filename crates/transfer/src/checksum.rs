use sha2::{Digest, Sha256};

use crate::TransferError;

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Verifies `data` against a hex SHA-256 checksum.
///
/// An empty `expected` means the sender did not supply one and nothing is
/// verified. Comparison is case-insensitive.
pub fn verify_checksum(data: &[u8], expected: &str) -> Result<(), TransferError> {
    if expected.is_empty() {
        return Ok(());
    }
    if checksum_bytes(data).eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(TransferError::ChecksumMismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_bytes_deterministic() {
        let c1 = checksum_bytes(b"hello world");
        let c2 = checksum_bytes(b"hello world");
        assert_eq!(c1, c2);
        assert_eq!(c1.len(), 64); // SHA-256 = 64 hex chars.
    }

    #[test]
    fn checksum_bytes_different_data() {
        assert_ne!(checksum_bytes(b"hello"), checksum_bytes(b"world"));
    }

    #[test]
    fn verify_accepts_matching_checksum() {
        let data = b"chunk payload";
        let sum = checksum_bytes(data);
        assert!(verify_checksum(data, &sum).is_ok());
        assert!(verify_checksum(data, &sum.to_uppercase()).is_ok());
    }

    #[test]
    fn verify_skips_empty_checksum() {
        assert!(verify_checksum(b"anything", "").is_ok());
    }

    #[test]
    fn verify_rejects_mismatch() {
        let bad = "0".repeat(64);
        assert!(matches!(
            verify_checksum(b"data", &bad),
            Err(TransferError::ChecksumMismatch)
        ));
    }
}
