//! Content digests. Used for the `digest` reserved config key and for the
//! cloud-init meta-data `instance-id`.

use sha1::{Digest, Sha1};

/// Compute the lowercase hex SHA1 digest of `data`.
pub fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut out = String::with_capacity(result.len() * 2);
    for byte in result {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        // sha1("") is the well-known empty-string digest.
        assert_eq!(sha1_hex(b""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }

    #[test]
    fn test_stable_for_same_input() {
        let a = sha1_hex(b"memory=2048\nsockets=1\n");
        let b = sha1_hex(b"memory=2048\nsockets=1\n");
        assert_eq!(a, b);
    }

    #[test]
    fn test_differs_for_different_input() {
        let a = sha1_hex(b"memory=2048\n");
        let b = sha1_hex(b"memory=4096\n");
        assert_ne!(a, b);
    }
}
