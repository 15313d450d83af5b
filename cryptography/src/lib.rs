//! Sign ticket payloads, recover signer addresses, and hash transcoded media.
//!
//! # Status
//!
//! `vidpay-cryptography` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

use std::fmt::{Debug, Display, Formatter};
use thiserror::Error;

pub mod sha256;
pub use sha256::{hash, Digest, Sha256};
pub mod secp256r1;
pub use secp256r1::{PrivateKey, RecoveryVerifier, Signature};

/// Length of an [Address] in bytes.
pub const ADDRESS_LENGTH: usize = 20;

/// Errors that can occur when interacting with cryptographic primitives.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("signing failed: {0}")]
    SigningFailed(String),
    #[error("invalid private key")]
    InvalidPrivateKey,
}

/// Identity of a party that holds funds or signs tickets.
///
/// An [Address] is derived from a public key (see [secp256r1::PrivateKey::address]) and never
/// trusted on its own: callers must recover it from a signature before acting on it.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl Address {
    /// Wrap raw address bytes.
    pub const fn new(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Returns the raw address bytes.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }
}

impl From<[u8; ADDRESS_LENGTH]> for Address {
    fn from(value: [u8; ADDRESS_LENGTH]) -> Self {
        Self(value)
    }
}

impl TryFrom<&[u8]> for Address {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; ADDRESS_LENGTH] = value.try_into().map_err(|_| Error::InvalidLength {
            expected: ADDRESS_LENGTH,
            actual: value.len(),
        })?;
        Ok(Self(bytes))
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex(&self.0))
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

/// Verifies that a message was signed by a claimed [Address].
///
/// Implementations must derive the signing identity from the signature itself and compare it
/// against `address`. They must never accept a signature only because the caller says so.
pub trait Verifier: Send + Sync + 'static {
    /// Returns `true` if `signature` over `message` was produced by `address`.
    ///
    /// The message should not be hashed prior to calling this function. If a particular scheme
    /// requires a payload to be hashed before it is signed, it will be done internally.
    fn verify(&self, address: &Address, message: &[u8], signature: &[u8]) -> bool;
}

/// Converts bytes to a hexadecimal string.
pub fn hex(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes.iter() {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

/// Converts a hexadecimal string to bytes.
pub fn from_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }

    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}

/// Converts a hexadecimal string to bytes, stripping whitespace and/or a `0x` prefix.
pub fn from_hex_formatted(hex: &str) -> Option<Vec<u8>> {
    let hex = hex.replace(['\t', '\n', '\r', ' '], "");
    let res = hex.strip_prefix("0x").unwrap_or(&hex);
    from_hex(res)
}
