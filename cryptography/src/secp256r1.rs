//! Secp256r1 signatures that commit to the signer's [Address].
//!
//! Messages are hashed with SHA-256 before signing, signatures are deterministic as specified in
//! [RFC 6979](https://datatracker.ietf.org/doc/html/rfc6979), and `s` is normalized according to
//! [BIP 62](https://github.com/bitcoin/bips/blob/master/bip-0062.mediawiki#low-s-values-in-signatures).
//! A recovery byte is appended so that a verifier can derive the signing key (and so its
//! [Address]) from the signature alone.
//!
//! # Example
//! ```rust
//! use vidpay_cryptography::{secp256r1::{recover, PrivateKey}, Verifier, RecoveryVerifier};
//!
//! // Generate a new private key
//! let signer = PrivateKey::from_seed(0);
//!
//! // Sign a message
//! let msg = b"hello, world!";
//! let signature = signer.sign(msg).unwrap();
//!
//! // Recover the signer
//! assert_eq!(recover(msg, signature.as_ref()), Some(signer.address()));
//! assert!(RecoveryVerifier.verify(&signer.address(), msg, signature.as_ref()));
//! ```

use crate::{hash, Address, Error, Verifier, ADDRESS_LENGTH};
use ecdsa::RecoveryId;
use p256::{
    ecdsa::{Signature as ISignature, SigningKey, VerifyingKey},
    elliptic_curve::scalar::IsHigh,
};
use rand::{rngs::StdRng, CryptoRng, RngCore, SeedableRng};
use std::fmt::{Debug, Formatter};

const PRIVATE_KEY_LENGTH: usize = 32;
/// Length of a [Signature] in bytes.
pub const SIGNATURE_LENGTH: usize = 65; // R || S || V

/// A recoverable signature.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature([u8; SIGNATURE_LENGTH]);

impl AsRef<[u8]> for Signature {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for Signature {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; SIGNATURE_LENGTH] =
            value.try_into().map_err(|_| Error::InvalidLength {
                expected: SIGNATURE_LENGTH,
                actual: value.len(),
            })?;
        Ok(Self(bytes))
    }
}

impl Debug for Signature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", crate::hex(&self.0))
    }
}

/// Signing key of a ticket sender (or one of its approved signers).
#[derive(Clone)]
pub struct PrivateKey {
    signer: SigningKey,
}

impl PrivateKey {
    /// Create a fresh [PrivateKey] using the supplied RNG.
    pub fn from_rng<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self {
            signer: SigningKey::random(rng),
        }
    }

    /// Create a [PrivateKey] from a seed.
    ///
    /// # Warning
    ///
    /// This function is insecure and should only be used for examples
    /// and testing.
    pub fn from_seed(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::from_rng(&mut rng)
    }

    /// Parse a [PrivateKey] from its 32-byte scalar encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != PRIVATE_KEY_LENGTH {
            return Err(Error::InvalidLength {
                expected: PRIVATE_KEY_LENGTH,
                actual: bytes.len(),
            });
        }
        let signer = SigningKey::from_slice(bytes).map_err(|_| Error::InvalidPrivateKey)?;
        Ok(Self { signer })
    }

    /// Returns the 32-byte scalar encoding of the key.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.signer.to_bytes().to_vec()
    }

    /// Returns the [Address] controlled by this key.
    pub fn address(&self) -> Address {
        address(self.signer.verifying_key())
    }

    /// Sign a message.
    ///
    /// The message should not be hashed prior to calling this function.
    pub fn sign(&self, message: &[u8]) -> Result<Signature, Error> {
        let prehash = hash(message);
        let (signature, recovery_id) = self
            .signer
            .sign_prehash_recoverable(prehash.as_ref())
            .map_err(|err| Error::SigningFailed(err.to_string()))?;

        // Negating `s` mirrors the nonce point, so the y-parity of the recovery id flips with it
        let (signature, recovery_id) = match signature.normalize_s() {
            Some(normalized) => (
                normalized,
                RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced()),
            ),
            None => (signature, recovery_id),
        };

        let mut bytes = [0u8; SIGNATURE_LENGTH];
        bytes[..SIGNATURE_LENGTH - 1].copy_from_slice(&signature.to_bytes());
        bytes[SIGNATURE_LENGTH - 1] = recovery_id.to_byte();
        Ok(Signature(bytes))
    }
}

/// Derive the [Address] of a public key: the trailing bytes of the SHA-256 digest of its
/// uncompressed encoding (without the SEC1 tag).
pub fn address(key: &VerifyingKey) -> Address {
    let encoded = key.to_encoded_point(false);
    let digest = hash(&encoded.as_bytes()[1..]);
    let mut bytes = [0u8; ADDRESS_LENGTH];
    bytes.copy_from_slice(&digest.as_ref()[digest.as_ref().len() - ADDRESS_LENGTH..]);
    Address::new(bytes)
}

/// Recover the [Address] that produced `signature` over `message`.
///
/// Returns `None` if the signature is malformed, not normalized, or does not recover to a valid
/// public key.
pub fn recover(message: &[u8], signature: &[u8]) -> Option<Address> {
    if signature.len() != SIGNATURE_LENGTH {
        return None;
    }
    let (raw, v) = signature.split_at(SIGNATURE_LENGTH - 1);
    let recovery_id = RecoveryId::from_byte(v[0])?;
    let signature = ISignature::from_slice(raw).ok()?;
    if signature.s().is_high().into() {
        // Reject any signatures with a `s` value in the upper half of the curve order.
        return None;
    }
    let prehash = hash(message);
    let key = VerifyingKey::recover_from_prehash(prehash.as_ref(), &signature, recovery_id).ok()?;
    Some(address(&key))
}

/// [Verifier] that recovers the signing key from the signature and compares its [Address]
/// against the claimed one.
#[derive(Clone, Copy, Debug, Default)]
pub struct RecoveryVerifier;

impl Verifier for RecoveryVerifier {
    fn verify(&self, address: &Address, message: &[u8], signature: &[u8]) -> bool {
        recover(message, signature).as_ref() == Some(address)
    }
}
