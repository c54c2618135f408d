//! relcheck
//!
//! Verifies downloaded release artifacts before they are trusted.
//!
//! Five verification modes are supported: comparing against a reference
//! copy, checking a digest value, looking a digest up in a checksum listing,
//! checking a detached PGP signature, and checking a signed checksum listing.
//! Each run produces a verdict plus a transcript of diagnostic messages.
//!
//! # Example
//!
//! ```no_run
//! use relcheck_cli::verify::{verify, VerificationRequest};
//!
//! let request = VerificationRequest::pgp_checksum_file(
//!     "tool-1.0.tar.gz",
//!     "SHA256SUMS",
//!     "SHA256SUMS.sig",
//! )
//! .with_keyfile("release-key.asc");
//!
//! let outcome = verify(&request)?;
//! if !outcome.verified {
//!     for line in &outcome.messages {
//!         eprintln!("{line}");
//!     }
//! }
//! # Ok::<(), relcheck_cli::VerifyError>(())
//! ```

pub mod algorithm;
pub mod canary;
pub mod crypto;
pub mod error;
pub mod hash;
pub mod keyring;
pub mod keyserver;
pub mod listing;
pub mod messages;
pub mod signature;
pub mod verify;

pub use algorithm::HashAlgorithm;
pub use error::{Result, VerifyError};
pub use messages::{MessageLog, MessageSink};
pub use signature::SignatureStatus;
pub use verify::{VerificationMode, VerificationOutcome, VerificationRequest};
