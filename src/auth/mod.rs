pub mod middleware;

use sha2::{Digest, Sha256};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Holds the digest of the shared admin secret. Presented keys are hashed
/// and the fixed-width digests compared, so the comparison cost does not
/// depend on where the strings diverge.
pub struct ApiKeyGuard {
    digest: [u8; 32],
}

impl ApiKeyGuard {
    pub fn new(secret: &str) -> Self {
        Self {
            digest: Self::hash(secret),
        }
    }

    fn hash(key: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hasher.finalize().into()
    }

    pub fn verify(&self, presented: &str) -> bool {
        let presented = Self::hash(presented);
        let mut diff = 0u8;
        for (a, b) in presented.iter().zip(self.digest.iter()) {
            diff |= a ^ b;
        }
        diff == 0
    }
}
