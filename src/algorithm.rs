//! Supported digest algorithms.
//!
//! This is the only place that decides whether an algorithm name is
//! acceptable. Broken algorithms (MD5, SHA-1, RC4...) are deliberately absent.

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, VerifyError};

/// Algorithm used when the caller does not name one.
pub const DEFAULT_HASH_ALGORITHM: HashAlgorithm = HashAlgorithm::Sha256;

/// A digest algorithm from the SHA-2 family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    Sha224,
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 4] = [
        HashAlgorithm::Sha224,
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha384,
        HashAlgorithm::Sha512,
    ];

    /// Canonical lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha224 => "sha224",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha384 => "sha384",
            HashAlgorithm::Sha512 => "sha512",
        }
    }

    /// Length of a hex-encoded digest.
    pub fn hex_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha224 => 56,
            HashAlgorithm::Sha256 => 64,
            HashAlgorithm::Sha384 => 96,
            HashAlgorithm::Sha512 => 128,
        }
    }

    /// Resolves a user-supplied name, rejecting anything outside the supported set.
    pub fn parse(name: &str) -> Result<Self> {
        let wanted = name.trim();
        Self::ALL
            .into_iter()
            .find(|alg| alg.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| VerifyError::UnsupportedAlgorithm {
                name: name.to_string(),
            })
    }
}

/// Returns true if `name` is an accepted algorithm.
pub fn is_supported(name: &str) -> bool {
    HashAlgorithm::parse(name).is_ok()
}

impl FromStr for HashAlgorithm {
    type Err = VerifyError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
