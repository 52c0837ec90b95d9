use sha2::{Digest, Sha256};

pub fn compute_sha256_hex(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    let bytes = hasher.finalize();
    hex::encode(bytes)
}
