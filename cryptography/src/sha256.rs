use crate::hex;
use rand::{CryptoRng, RngCore};
use sha2::{Digest as _, Sha256 as ISha256};
use std::fmt::{Debug, Display, Formatter};

/// Length of a [Digest] in bytes.
pub const DIGEST_LENGTH: usize = 32;

/// Output of [Sha256].
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; DIGEST_LENGTH]);

impl Digest {
    /// Generate a random [Digest].
    ///
    /// # Warning
    ///
    /// This function is typically used for testing and is not recommended
    /// for production use.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; DIGEST_LENGTH];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; DIGEST_LENGTH] {
        &self.0
    }
}

impl From<[u8; DIGEST_LENGTH]> for Digest {
    fn from(value: [u8; DIGEST_LENGTH]) -> Self {
        Self(value)
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex(&self.0))
    }
}

impl Debug for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

/// Hashes `message` with SHA-256.
pub fn hash(message: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(message);
    hasher.finalize()
}

/// Incremental SHA-256 hasher.
#[derive(Clone, Default)]
pub struct Sha256 {
    hasher: ISha256,
}

impl Sha256 {
    /// Create a new hasher.
    pub fn new() -> Self {
        Self {
            hasher: ISha256::new(),
        }
    }

    /// Append message to previously recorded data.
    pub fn update(&mut self, message: &[u8]) {
        self.hasher.update(message);
    }

    /// Hash all recorded data and reset the hasher to the initial state.
    pub fn finalize(&mut self) -> Digest {
        let digest = self.hasher.finalize_reset();
        Digest(digest.into())
    }

    /// Reset the hasher without generating a hash.
    pub fn reset(&mut self) {
        self.hasher = ISha256::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256() {
        let digest = b"hello world";

        // Generate initial hash
        let mut hasher = Sha256::new();
        hasher.update(digest);
        let hash = hasher.finalize();
        assert_eq!(
            hash.to_string(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );

        // Reuse hasher
        hasher.update(digest);
        let hash = hasher.finalize();
        assert_eq!(
            hash.to_string(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_sha256_incremental_matches_oneshot() {
        let mut hasher = Sha256::new();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.finalize(), hash(b"hello world"));
    }

    #[test]
    fn test_sha256_reset() {
        let mut hasher = Sha256::new();
        hasher.update(b"discarded");
        hasher.reset();
        hasher.update(b"hello world");
        assert_eq!(hasher.finalize(), hash(b"hello world"));
    }
}
