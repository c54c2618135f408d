//! Detached PGP signature verification.
//!
//! Only [`SignatureStatus::Valid`] counts as success. Every other status is a
//! failed verification whose description goes to the message sink.

use std::fmt;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;

use chrono::{DateTime, Utc};
use log::debug;
use pgp::composed::{Deserializable, SignedPublicKey, SignedPublicSubKey, StandaloneSignature};
use pgp::packet::SignatureType;
use pgp::types::{KeyDetails, PublicKeyTrait};

use crate::keyring::{describe_key, Keyring};
use crate::messages::MessageSink;

/// Result of checking one detached signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureStatus {
    /// Cryptographically valid, from a usable key.
    Valid { signer: String },
    /// No key in the keyring matches the signature's issuer.
    NoPublicKey { issuer: String },
    /// A matching key exists but the signature does not check out.
    BadSignature { signer: String, reason: String },
    /// Valid signature from a key past its expiration time.
    ExpiredKey { signer: String },
    /// Valid signature from a key carrying a revocation.
    RevokedKey { signer: String },
    /// The signature data could not be parsed.
    Malformed(String),
    /// The signed file could not be read.
    MissingFile(String),
    /// The keyring could not be read.
    KeyringError(String),
}

impl SignatureStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, SignatureStatus::Valid { .. })
    }
}

impl fmt::Display for SignatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureStatus::Valid { signer } => write!(f, "Good signature from {signer}"),
            SignatureStatus::NoPublicKey { issuer } => {
                write!(f, "Can't check signature: no public key for {issuer}")
            }
            SignatureStatus::BadSignature { signer, reason } => {
                write!(f, "BAD signature from {signer}: {reason}")
            }
            SignatureStatus::ExpiredKey { signer } => {
                write!(f, "Signature made by expired key {signer}")
            }
            SignatureStatus::RevokedKey { signer } => {
                write!(f, "Signature made by revoked key {signer}")
            }
            SignatureStatus::Malformed(reason) => write!(f, "Malformed signature: {reason}"),
            SignatureStatus::MissingFile(reason) => write!(f, "Can't read signed data: {reason}"),
            SignatureStatus::KeyringError(reason) => write!(f, "Can't read keyring: {reason}"),
        }
    }
}

/// Verifies `target` against the detached signature at `signature_path`.
///
/// An unreadable signature file fails with the read error as the only message.
pub fn verify(
    keyring: &Keyring,
    target: &Path,
    signature_path: &Path,
    sink: &mut dyn MessageSink,
) -> bool {
    let signature = match fs::read(signature_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            sink.emit(&format!("{}: {e}", signature_path.display()));
            return false;
        }
    };

    let status = check_detached(keyring, target, &signature);
    debug!("signature {} over {}: {status:?}", signature_path.display(), target.display());

    sink.emit("\n--- Results of verification ---");
    sink.emit(&status.to_string());
    status.is_valid()
}

/// Checks armored or binary signature bytes over the file at `target`.
pub fn check_detached(keyring: &Keyring, target: &Path, signature: &[u8]) -> SignatureStatus {
    let signature = match StandaloneSignature::from_reader_single(signature) {
        Ok((signature, _headers)) => signature,
        Err(e) => return SignatureStatus::Malformed(e.to_string()),
    };
    let keys = match keyring.public_keys() {
        Ok(keys) => keys,
        Err(e) => return SignatureStatus::KeyringError(e.to_string()),
    };

    let sig = &signature.signature;
    let issuers = sig.issuer();
    let issuer_fingerprints = sig.issuer_fingerprint();
    let is_candidate = |candidate: &dyn KeyDetails| {
        (issuers.is_empty() && issuer_fingerprints.is_empty())
            || issuers.iter().any(|id| **id == candidate.key_id())
            || issuer_fingerprints
                .iter()
                .any(|fp| **fp == candidate.fingerprint())
    };

    let mut rejection: Option<SignatureStatus> = None;
    for key in &keys {
        let mut attempts: Vec<(SigningKey, Attempt)> = Vec::new();
        if is_candidate(&key.primary_key) {
            attempts.push((SigningKey::Primary, attempt(&signature, &key.primary_key, target)));
        }
        for sub in &key.public_subkeys {
            if is_candidate(&sub.key) {
                attempts.push((SigningKey::Subkey(sub), attempt(&signature, &sub.key, target)));
            }
        }

        for (signing_key, outcome) in attempts {
            match outcome {
                Attempt::Verified => return key_standing(key, signing_key, Utc::now()),
                Attempt::Unreadable(reason) => return SignatureStatus::MissingFile(reason),
                Attempt::Rejected(reason) => {
                    rejection = Some(SignatureStatus::BadSignature {
                        signer: describe_key(key),
                        reason,
                    });
                }
            }
        }
    }

    rejection.unwrap_or_else(|| SignatureStatus::NoPublicKey {
        issuer: describe_issuer(&issuers, &issuer_fingerprints),
    })
}

/// The component key whose material checked out.
#[derive(Clone, Copy)]
enum SigningKey<'k> {
    Primary,
    Subkey(&'k SignedPublicSubKey),
}

enum Attempt {
    Verified,
    Rejected(String),
    Unreadable(String),
}

fn attempt(signature: &StandaloneSignature, key: &impl PublicKeyTrait, target: &Path) -> Attempt {
    let file = match File::open(target) {
        Ok(file) => file,
        Err(e) => return Attempt::Unreadable(format!("{}: {e}", target.display())),
    };
    match signature.signature.verify(key, BufReader::new(file)) {
        Ok(()) => Attempt::Verified,
        Err(e) => Attempt::Rejected(e.to_string()),
    }
}

/// Revocation and expiry of the certificate, then of the signing subkey.
fn key_standing(
    key: &SignedPublicKey,
    signing_key: SigningKey<'_>,
    now: DateTime<Utc>,
) -> SignatureStatus {
    let signer = describe_key(key);
    if !key.details.revocation_signatures.is_empty() {
        return SignatureStatus::RevokedKey { signer };
    }
    if key.expires_at().is_some_and(|expiry| expiry < now) {
        return SignatureStatus::ExpiredKey { signer };
    }

    match signing_key {
        SigningKey::Primary => SignatureStatus::Valid { signer },
        SigningKey::Subkey(sub) => subkey_standing(sub, signer, now),
    }
}

fn subkey_standing(
    sub: &SignedPublicSubKey,
    primary: String,
    now: DateTime<Utc>,
) -> SignatureStatus {
    let signer = format!(
        "{} (subkey of {primary})",
        sub.key.key_id().to_string().to_ascii_uppercase()
    );

    let revoked = sub
        .signatures
        .iter()
        .any(|sig| sig.typ() == Some(SignatureType::SubkeyRevocation));
    if revoked {
        return SignatureStatus::RevokedKey { signer };
    }

    // Newest binding decides flags and expiry.
    let binding = sub
        .signatures
        .iter()
        .filter(|sig| sig.typ() == Some(SignatureType::SubkeyBinding))
        .max_by_key(|sig| sig.created().copied());
    let Some(binding) = binding else {
        return SignatureStatus::BadSignature {
            signer,
            reason: "subkey has no binding signature".to_string(),
        };
    };

    let expired = binding
        .key_expiration_time()
        .is_some_and(|lifetime| *sub.key.created_at() + *lifetime < now);
    if expired {
        SignatureStatus::ExpiredKey { signer }
    } else if !binding.key_flags().sign() {
        SignatureStatus::BadSignature {
            signer,
            reason: "subkey is not certified for signing".to_string(),
        }
    } else {
        SignatureStatus::Valid { signer }
    }
}

fn describe_issuer(
    issuers: &[&pgp::types::KeyId],
    fingerprints: &[&pgp::types::Fingerprint],
) -> String {
    if let Some(fp) = fingerprints.first() {
        fp.to_string().to_ascii_uppercase()
    } else if let Some(id) = issuers.first() {
        id.to_string().to_ascii_uppercase()
    } else {
        "unknown issuer".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyring::import_from_file;
    use crate::messages::{Discard, MessageLog};
    use std::path::PathBuf;

    fn data(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests/data")
            .join(name)
    }

    fn keyring_with(key_file: &str) -> Keyring {
        let keyring = Keyring::open_or_create(None).unwrap();
        let result = import_from_file(&keyring, &data(key_file), &mut Discard);
        assert!(result.succeeded(), "{:?}", result.diagnostics);
        keyring
    }

    fn release_keyring() -> Keyring {
        keyring_with("release_key.asc")
    }

    fn stored_key(keyring: &Keyring) -> SignedPublicKey {
        let mut keys = keyring.public_keys().unwrap();
        assert_eq!(keys.len(), 1);
        keys.remove(0)
    }

    fn at(timestamp: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(timestamp)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_valid_binary_signature() {
        let keyring = release_keyring();
        assert!(verify(&keyring, &data("file1.txt"), &data("file1.txt.sig"), &mut Discard));
    }

    #[test]
    fn test_valid_armored_signature_verbose() {
        let keyring = release_keyring();
        let mut log = MessageLog::new();
        assert!(verify(&keyring, &data("file1.txt"), &data("file1.txt.asc"), &mut log));
        assert_eq!(log.len(), 2);
        assert_eq!(log.lines()[0], "\n--- Results of verification ---");
        assert!(log.lines()[1].starts_with("Good signature from 9D0D1B5B0000B36D"));
    }

    #[test]
    fn test_valid_checksum_listing_signature() {
        let keyring = release_keyring();
        assert!(verify(
            &keyring,
            &data("file1.txt.SHA256SUMS"),
            &data("file1.txt.SHA256SUMS.sig"),
            &mut Discard
        ));
    }

    #[test]
    fn test_wrong_file_is_bad_signature() {
        let keyring = release_keyring();
        let signature = fs::read(data("file1.txt.sig")).unwrap();
        let status = check_detached(&keyring, &data("file2.txt"), &signature);
        assert!(matches!(status, SignatureStatus::BadSignature { .. }), "{status:?}");
        assert!(!verify(&keyring, &data("file2.txt"), &data("file1.txt.sig"), &mut Discard));
    }

    #[test]
    fn test_signature_file_missing() {
        let keyring = release_keyring();
        let missing = data("foobar.sig");
        let mut log = MessageLog::new();
        assert!(!verify(&keyring, &data("file1.txt"), &missing, &mut log));
        assert_eq!(log.len(), 1);
        assert!(log.lines()[0].starts_with(&missing.display().to_string()));
    }

    #[test]
    fn test_target_missing() {
        let keyring = release_keyring();
        let signature = fs::read(data("file1.txt.sig")).unwrap();
        let status = check_detached(&keyring, &data("foobar"), &signature);
        assert!(matches!(status, SignatureStatus::MissingFile(_)), "{status:?}");
    }

    #[test]
    fn test_not_a_signature() {
        let keyring = release_keyring();
        let signature = fs::read(data("file2.txt")).unwrap();
        let status = check_detached(&keyring, &data("file1.txt"), &signature);
        assert!(matches!(status, SignatureStatus::Malformed(_)), "{status:?}");
    }

    #[test]
    fn test_unknown_signer() {
        let keyring = release_keyring();
        let signature = fs::read(data("file1.txt.other.sig")).unwrap();
        let status = check_detached(&keyring, &data("file1.txt"), &signature);
        assert_eq!(
            status,
            SignatureStatus::NoPublicKey {
                issuer: "E55666D36782246F10D59046B169DD53C85B45B2".to_string()
            }
        );
    }

    #[test]
    fn test_empty_keyring() {
        let keyring = Keyring::open_or_create(None).unwrap();
        let signature = fs::read(data("file1.txt.sig")).unwrap();
        let status = check_detached(&keyring, &data("file1.txt"), &signature);
        assert!(matches!(status, SignatureStatus::NoPublicKey { .. }));
    }

    #[test]
    fn test_revoked_key() {
        let keyring = keyring_with("revoked_key.asc");
        let signature = fs::read(data("file1.txt.revoked.sig")).unwrap();
        let status = check_detached(&keyring, &data("file1.txt"), &signature);
        match &status {
            SignatureStatus::RevokedKey { signer } => {
                assert!(signer.starts_with("2CA97F6F275CFF25"), "{signer}")
            }
            other => panic!("expected RevokedKey, got {other:?}"),
        }
        assert!(!verify(&keyring, &data("file1.txt"), &data("file1.txt.revoked.sig"), &mut Discard));
    }

    #[test]
    fn test_signing_subkey() {
        let keyring = keyring_with("subkey_key.asc");
        let signature = fs::read(data("file1.txt.subkey.sig")).unwrap();
        let status = check_detached(&keyring, &data("file1.txt"), &signature);
        match &status {
            SignatureStatus::Valid { signer } => {
                assert!(signer.starts_with("B791A6BF5B4FE5DD (subkey of C13B9AD7A34DEAB4"), "{signer}")
            }
            other => panic!("expected Valid, got {other:?}"),
        }
    }

    #[test]
    fn test_revoked_signing_subkey() {
        let keyring = keyring_with("subkey_revoked_key.asc");
        let signature = fs::read(data("file1.txt.subkey.sig")).unwrap();
        let status = check_detached(&keyring, &data("file1.txt"), &signature);
        match &status {
            SignatureStatus::RevokedKey { signer } => {
                assert!(signer.starts_with("B791A6BF5B4FE5DD"), "{signer}")
            }
            other => panic!("expected RevokedKey, got {other:?}"),
        }

        let mut log = MessageLog::new();
        assert!(!verify(&keyring, &data("file1.txt"), &data("file1.txt.subkey.sig"), &mut log));
        assert!(log.lines()[1].starts_with("Signature made by revoked key B791A6BF5B4FE5DD"));
    }

    #[test]
    fn test_expired_key() {
        let keyring = keyring_with("expired_key.asc");
        let signature = fs::read(data("file1.txt.expired.sig")).unwrap();
        let status = check_detached(&keyring, &data("file1.txt"), &signature);
        match &status {
            SignatureStatus::ExpiredKey { signer } => {
                assert!(signer.starts_with("EFE1D87D1CE533C8"), "{signer}")
            }
            other => panic!("expected ExpiredKey, got {other:?}"),
        }
        assert!(!verify(&keyring, &data("file1.txt"), &data("file1.txt.expired.sig"), &mut Discard));
    }

    #[test]
    fn test_expiry_is_relative_to_now() {
        // Created 2020-01-01T00:00Z with a one day lifetime.
        let key = stored_key(&keyring_with("expired_key.asc"));
        assert!(key_standing(&key, SigningKey::Primary, at("2020-01-01T12:00:00Z")).is_valid());
        assert!(matches!(
            key_standing(&key, SigningKey::Primary, at("2020-01-03T00:00:00Z")),
            SignatureStatus::ExpiredKey { .. }
        ));
    }

    #[test]
    fn test_encryption_subkey_cannot_sign() {
        let key = stored_key(&keyring_with("encrypt_subkey_key.asc"));
        let subkey = &key.public_subkeys[0];
        let status = key_standing(&key, SigningKey::Subkey(subkey), Utc::now());
        assert!(
            matches!(status, SignatureStatus::BadSignature { ref reason, .. } if reason.contains("signing")),
            "{status:?}"
        );
        assert!(key_standing(&key, SigningKey::Primary, Utc::now()).is_valid());
    }

    #[test]
    fn test_only_valid_is_success() {
        let failures = [
            SignatureStatus::NoPublicKey { issuer: "X".into() },
            SignatureStatus::BadSignature { signer: "X".into(), reason: "r".into() },
            SignatureStatus::ExpiredKey { signer: "X".into() },
            SignatureStatus::RevokedKey { signer: "X".into() },
            SignatureStatus::Malformed("r".into()),
            SignatureStatus::MissingFile("r".into()),
            SignatureStatus::KeyringError("r".into()),
        ];
        assert!(failures.iter().all(|status| !status.is_valid()));
        assert!(SignatureStatus::Valid { signer: "X".into() }.is_valid());
    }
}
