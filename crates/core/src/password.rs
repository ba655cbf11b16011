//! Password credentials for gated files.
//!
//! Passwords are stored as salted bcrypt hashes. A file without a password
//! has no credential at all; verification against an absent credential only
//! succeeds for the empty plaintext, which models "no password was ever
//! required".

use crate::error::{Error, Result};
use std::fmt;

/// An opaque stored password hash.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordCredential(String);

impl PasswordCredential {
    /// Wrap a hash loaded from storage. Empty values mean "no password".
    pub fn from_stored(hash: impl Into<String>) -> Option<Self> {
        let hash = hash.into();
        if hash.is_empty() {
            None
        } else {
            Some(Self(hash))
        }
    }

    /// Recognise a value that is already a bcrypt hash.
    ///
    /// Accepts the `$2a$`, `$2b$` and `$2y$` variants in their 60 character
    /// modular crypt encoding; anything else is treated as not a hash.
    pub fn from_bcrypt_hash(value: &str) -> Option<Self> {
        let bytes = value.as_bytes();
        if bytes.len() != 60 {
            return None;
        }
        let variant = matches!(&bytes[..4], b"$2a$" | b"$2b$" | b"$2y$");
        let cost = bytes[4..6].iter().all(u8::is_ascii_digit) && bytes[6] == b'$';
        let body = bytes[7..]
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'/'));
        (variant && cost && body).then(|| Self(value.to_string()))
    }

    /// The encoded hash, for persistence.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PasswordCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PasswordCredential(<redacted>)")
    }
}

/// Hashes and verifies passwords with a configurable bcrypt work factor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PasswordHasher {
    cost: u32,
}

impl PasswordHasher {
    /// Default work factor.
    pub const DEFAULT_COST: u32 = bcrypt::DEFAULT_COST;
    /// Lowest work factor bcrypt accepts.
    pub const MIN_COST: u32 = 4;
    /// Highest work factor bcrypt accepts.
    pub const MAX_COST: u32 = 31;

    /// Create a hasher with the given work factor.
    pub fn new(cost: u32) -> Result<Self> {
        if !(Self::MIN_COST..=Self::MAX_COST).contains(&cost) {
            return Err(Error::InvalidCost {
                cost,
                min: Self::MIN_COST,
                max: Self::MAX_COST,
            });
        }
        Ok(Self { cost })
    }

    /// Work factor in use.
    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Hash a plaintext password. An empty plaintext yields no credential.
    pub fn hash(&self, plaintext: &str) -> Result<Option<PasswordCredential>> {
        if plaintext.is_empty() {
            return Ok(None);
        }
        let hash =
            bcrypt::hash(plaintext, self.cost).map_err(|e| Error::PasswordHash(e.to_string()))?;
        Ok(Some(PasswordCredential(hash)))
    }

    /// Verify a plaintext against an optional stored credential.
    pub fn verify(&self, credential: Option<&PasswordCredential>, plaintext: &str) -> bool {
        let Some(credential) = credential else {
            return plaintext.is_empty();
        };
        if plaintext.is_empty() {
            return false;
        }
        match bcrypt::verify(plaintext, credential.as_str()) {
            Ok(valid) => valid,
            Err(e) => {
                tracing::warn!(error = %e, "Stored password hash could not be parsed");
                false
            }
        }
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self {
            cost: Self::DEFAULT_COST,
        }
    }
}
