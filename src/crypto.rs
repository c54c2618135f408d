//! Digest computation.
//!
//! Files are hashed by streaming them through a fixed buffer, so memory use
//! does not grow with artifact size.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Sha224, Sha256, Sha384, Sha512};

use crate::algorithm::HashAlgorithm;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// A computed digest, always lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: HashAlgorithm,
    hex: String,
}

impl Digest {
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn as_str(&self) -> &str {
        &self.hex
    }

    /// Compares against a user-supplied value, ignoring case and surrounding whitespace.
    pub fn matches(&self, expected: &str) -> bool {
        self.hex == normalize_digest(expected)
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex)
    }
}

/// Lowercases and trims a user-supplied digest.
pub fn normalize_digest(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

/// Computes the digest of the file at `path`.
///
/// A missing or unreadable file surfaces as the underlying `io::Error`.
pub fn file_digest(path: &Path, algorithm: HashAlgorithm) -> io::Result<Digest> {
    let file = File::open(path)?;
    reader_digest(file, algorithm)
}

/// Computes the digest of everything `reader` yields.
pub fn reader_digest<R: Read>(mut reader: R, algorithm: HashAlgorithm) -> io::Result<Digest> {
    let bytes = match algorithm {
        HashAlgorithm::Sha224 => stream::<Sha224, _>(&mut reader)?,
        HashAlgorithm::Sha256 => stream::<Sha256, _>(&mut reader)?,
        HashAlgorithm::Sha384 => stream::<Sha384, _>(&mut reader)?,
        HashAlgorithm::Sha512 => stream::<Sha512, _>(&mut reader)?,
    };
    Ok(Digest {
        algorithm,
        hex: hex::encode(bytes),
    })
}

fn stream<D: sha2::Digest, R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut hasher = D::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..read]);
    }
    Ok(hasher.finalize().to_vec())
}
