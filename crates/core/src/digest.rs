use sha2::{Digest, Sha256};

/// SHA-256 of a raw store payload, hex encoded.
pub fn payload_digest(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}
