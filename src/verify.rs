//! Verification dispatch.
//!
//! A [`VerificationRequest`] names one of five modes. Every parameter is
//! validated before the first file is opened, then the mode's pipeline runs
//! once, stopping at the first failed step.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::info;

use crate::algorithm::{HashAlgorithm, DEFAULT_HASH_ALGORITHM};
use crate::error::{Result, VerifyError};
use crate::hash;
use crate::keyring::{import_keys_with, KeySource, Keyring};
use crate::keyserver::{HkpFetcher, KeyFetcher};
use crate::messages::{MessageLog, MessageSink};
use crate::signature;

/// How an artifact is verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerificationMode {
    /// Digest of the artifact equals the digest of a reference copy.
    CompareFiles,
    /// Digest equals an inline value.
    Checksum,
    /// Digest appears in a checksum listing.
    ChecksumFile,
    /// Detached PGP signature over the artifact.
    Pgp,
    /// Detached PGP signature over a checksum listing, then the listing check.
    PgpChecksumFile,
}

impl VerificationMode {
    pub const ALL: [VerificationMode; 5] = [
        VerificationMode::CompareFiles,
        VerificationMode::Checksum,
        VerificationMode::ChecksumFile,
        VerificationMode::Pgp,
        VerificationMode::PgpChecksumFile,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            VerificationMode::CompareFiles => "COMPARE_FILES",
            VerificationMode::Checksum => "VERIFY_VIA_CHECKSUM",
            VerificationMode::ChecksumFile => "VERIFY_VIA_CHECKSUMFILE",
            VerificationMode::Pgp => "VERIFY_VIA_PGP",
            VerificationMode::PgpChecksumFile => "VERIFY_VIA_PGPCHECKSUMFILE",
        }
    }
}

impl FromStr for VerificationMode {
    type Err = VerifyError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|mode| mode.tag().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| VerifyError::UnknownMode(s.to_string()))
    }
}

impl fmt::Display for VerificationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A mode plus whichever parameters that mode needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationRequest {
    pub mode: VerificationMode,
    /// The artifact under verification.
    pub file: Option<PathBuf>,
    /// Reference copy for [`VerificationMode::CompareFiles`].
    pub file2: Option<PathBuf>,
    /// Digest algorithm name; defaults to sha256.
    pub algorithm: Option<String>,
    pub checksum: Option<String>,
    pub checksum_file: Option<PathBuf>,
    pub signature_file: Option<PathBuf>,
    pub keyfile: Option<PathBuf>,
    pub keyid: Option<String>,
    pub keyserver: Option<String>,
    /// Persistent keyring; an ephemeral one is used when absent.
    pub keyring_dir: Option<PathBuf>,
}

impl VerificationRequest {
    pub fn new(mode: VerificationMode) -> Self {
        Self {
            mode,
            file: None,
            file2: None,
            algorithm: None,
            checksum: None,
            checksum_file: None,
            signature_file: None,
            keyfile: None,
            keyid: None,
            keyserver: None,
            keyring_dir: None,
        }
    }

    pub fn compare(file1: impl Into<PathBuf>, file2: impl Into<PathBuf>) -> Self {
        let mut request = Self::new(VerificationMode::CompareFiles);
        request.file = Some(file1.into());
        request.file2 = Some(file2.into());
        request
    }

    pub fn checksum(file: impl Into<PathBuf>, checksum: impl Into<String>) -> Self {
        let mut request = Self::new(VerificationMode::Checksum);
        request.file = Some(file.into());
        request.checksum = Some(checksum.into());
        request
    }

    pub fn checksum_file(file: impl Into<PathBuf>, listing: impl Into<PathBuf>) -> Self {
        let mut request = Self::new(VerificationMode::ChecksumFile);
        request.file = Some(file.into());
        request.checksum_file = Some(listing.into());
        request
    }

    pub fn pgp(file: impl Into<PathBuf>, signature: impl Into<PathBuf>) -> Self {
        let mut request = Self::new(VerificationMode::Pgp);
        request.file = Some(file.into());
        request.signature_file = Some(signature.into());
        request
    }

    pub fn pgp_checksum_file(
        file: impl Into<PathBuf>,
        listing: impl Into<PathBuf>,
        signature: impl Into<PathBuf>,
    ) -> Self {
        let mut request = Self::new(VerificationMode::PgpChecksumFile);
        request.file = Some(file.into());
        request.checksum_file = Some(listing.into());
        request.signature_file = Some(signature.into());
        request
    }

    pub fn with_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.algorithm = Some(algorithm.into());
        self
    }

    pub fn with_keyfile(mut self, keyfile: impl Into<PathBuf>) -> Self {
        self.keyfile = Some(keyfile.into());
        self
    }

    pub fn with_keyserver(mut self, keyid: impl Into<String>, keyserver: impl Into<String>) -> Self {
        self.keyid = Some(keyid.into());
        self.keyserver = Some(keyserver.into());
        self
    }

    pub fn with_keyring_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.keyring_dir = Some(dir.into());
        self
    }
}

/// Final verdict plus the transcript that led to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationOutcome {
    pub verified: bool,
    pub messages: Vec<String>,
}

/// Runs `request`, collecting the transcript.
pub fn verify(request: &VerificationRequest) -> Result<VerificationOutcome> {
    let mut log = MessageLog::new();
    let verified = run(request, &mut log)?;
    Ok(VerificationOutcome {
        verified,
        messages: log.into_lines(),
    })
}

/// Runs `request`, writing the transcript to `sink`.
pub fn run(request: &VerificationRequest, sink: &mut dyn MessageSink) -> Result<bool> {
    run_with(request, &HkpFetcher, sink)
}

/// Like [`run`] with an explicit key fetcher for key-server imports.
pub fn run_with(
    request: &VerificationRequest,
    fetcher: &dyn KeyFetcher,
    sink: &mut dyn MessageSink,
) -> Result<bool> {
    let plan = Plan::from_request(request)?;
    info!("verifying with mode {}", request.mode);

    let verified = plan.execute(fetcher, sink)?;
    info!(
        "{} verification {}",
        request.mode,
        if verified { "passed" } else { "failed" }
    );
    Ok(verified)
}

/// A fully validated request.
enum Plan<'a> {
    Compare {
        file1: &'a Path,
        file2: &'a Path,
    },
    Checksum {
        file: &'a Path,
        algorithm: HashAlgorithm,
        expected: &'a str,
    },
    ChecksumFile {
        file: &'a Path,
        algorithm: HashAlgorithm,
        listing: &'a Path,
    },
    Pgp {
        file: &'a Path,
        signature: &'a Path,
        keys: KeySource,
        keyring_dir: Option<&'a Path>,
    },
    PgpChecksumFile {
        file: &'a Path,
        algorithm: HashAlgorithm,
        listing: &'a Path,
        signature: &'a Path,
        keys: KeySource,
        keyring_dir: Option<&'a Path>,
    },
}

impl<'a> Plan<'a> {
    fn from_request(request: &'a VerificationRequest) -> Result<Self> {
        let file = || required(request.file.as_deref(), "file");
        let algorithm = || match request.algorithm.as_deref() {
            Some(name) => HashAlgorithm::parse(name),
            None => Ok(DEFAULT_HASH_ALGORITHM),
        };
        let keys = || {
            KeySource::from_options(
                request.keyfile.as_deref(),
                request.keyid.as_deref(),
                request.keyserver.as_deref(),
            )
        };

        let plan = match request.mode {
            VerificationMode::CompareFiles => Plan::Compare {
                file1: file()?,
                file2: required(request.file2.as_deref(), "file2")?,
            },
            VerificationMode::Checksum => Plan::Checksum {
                algorithm: algorithm()?,
                file: file()?,
                expected: required(request.checksum.as_deref(), "checksum")?,
            },
            VerificationMode::ChecksumFile => Plan::ChecksumFile {
                algorithm: algorithm()?,
                file: file()?,
                listing: required(request.checksum_file.as_deref(), "checksum_file")?,
            },
            VerificationMode::Pgp => Plan::Pgp {
                file: file()?,
                signature: required(request.signature_file.as_deref(), "signature_file")?,
                keys: keys()?,
                keyring_dir: request.keyring_dir.as_deref(),
            },
            VerificationMode::PgpChecksumFile => Plan::PgpChecksumFile {
                algorithm: algorithm()?,
                file: file()?,
                listing: required(request.checksum_file.as_deref(), "checksum_file")?,
                signature: required(request.signature_file.as_deref(), "signature_file")?,
                keys: keys()?,
                keyring_dir: request.keyring_dir.as_deref(),
            },
        };
        Ok(plan)
    }

    fn execute(self, fetcher: &dyn KeyFetcher, sink: &mut dyn MessageSink) -> Result<bool> {
        match self {
            Plan::Compare { file1, file2 } => Ok(hash::compare_files(file1, file2, sink)),
            Plan::Checksum {
                file,
                algorithm,
                expected,
            } => hash::verify_against_value(file, algorithm.name(), expected, sink),
            Plan::ChecksumFile {
                file,
                algorithm,
                listing,
            } => hash::verify_against_listing(file, algorithm.name(), listing, sink),
            Plan::Pgp {
                file,
                signature,
                keys,
                keyring_dir,
            } => {
                let keyring = Keyring::open_or_create(keyring_dir)?;
                Ok(signed_by_trusted_key(&keyring, &keys, file, signature, fetcher, sink))
            }
            Plan::PgpChecksumFile {
                file,
                algorithm,
                listing,
                signature,
                keys,
                keyring_dir,
            } => {
                let keyring = Keyring::open_or_create(keyring_dir)?;
                if !signed_by_trusted_key(&keyring, &keys, listing, signature, fetcher, sink) {
                    return Ok(false);
                }
                hash::verify_against_listing(file, algorithm.name(), listing, sink)
            }
        }
    }
}

/// Imports `keys` then checks the detached signature over `target`.
fn signed_by_trusted_key(
    keyring: &Keyring,
    keys: &KeySource,
    target: &Path,
    signature: &Path,
    fetcher: &dyn KeyFetcher,
    sink: &mut dyn MessageSink,
) -> bool {
    let import = import_keys_with(keyring, keys, fetcher, sink);
    if !import.succeeded() {
        return false;
    }
    signature::verify(keyring, target, signature, sink)
}

fn required<'a, T: ?Sized>(value: Option<&'a T>, name: &str) -> Result<&'a T> {
    value.ok_or_else(|| VerifyError::MissingParameter(name.to_string()))
}
