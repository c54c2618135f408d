//! Checksum-based verification.
//!
//! Three checks share one shape: validate arguments, hash the target, then
//! compare. Argument problems are `Err`; everything after that is a `bool`
//! with the reason written to the sink.

use std::path::Path;

use log::debug;

use crate::algorithm::{HashAlgorithm, DEFAULT_HASH_ALGORITHM};
use crate::crypto::{file_digest, normalize_digest, Digest};
use crate::error::{Result, VerifyError};
use crate::listing;
use crate::messages::MessageSink;

/// Compares two files by their default-algorithm digest.
///
/// Read failures resolve to `false` with the error as the only message.
pub fn compare_files(file1: &Path, file2: &Path, sink: &mut dyn MessageSink) -> bool {
    let Some(digest1) = digest_or_report(file1, DEFAULT_HASH_ALGORITHM, sink) else {
        return false;
    };
    let Some(digest2) = digest_or_report(file2, DEFAULT_HASH_ALGORITHM, sink) else {
        return false;
    };

    sink.emit(&format!("File1 checksum: {digest1}"));
    sink.emit(&format!("File2 checksum: {digest2}"));

    digest1 == digest2
}

/// Verifies `path` against an inline digest value.
pub fn verify_against_value(
    path: &Path,
    algorithm: &str,
    expected: &str,
    sink: &mut dyn MessageSink,
) -> Result<bool> {
    verify_checksum(path, algorithm, Some(expected), None, sink)
}

/// Verifies `path` by looking its digest up in a checksum listing file.
pub fn verify_against_listing(
    path: &Path,
    algorithm: &str,
    listing_path: &Path,
    sink: &mut dyn MessageSink,
) -> Result<bool> {
    verify_checksum(path, algorithm, None, Some(listing_path), sink)
}

/// Verifies `path` against an inline value or a listing file.
///
/// When both are given the inline value wins and the listing is never read.
pub fn verify_checksum(
    path: &Path,
    algorithm: &str,
    expected: Option<&str>,
    listing_path: Option<&Path>,
    sink: &mut dyn MessageSink,
) -> Result<bool> {
    let algorithm = HashAlgorithm::parse(algorithm)?;
    let source = match (expected, listing_path) {
        (Some(value), _) => Expected::Value(value),
        (None, Some(listing)) => Expected::Listing(listing),
        (None, None) => {
            return Err(VerifyError::MissingParameter(
                "either a checksum value or a checksum file".to_string(),
            ))
        }
    };

    let Some(digest) = digest_or_report(path, algorithm, sink) else {
        return Ok(false);
    };

    sink.emit(&format!("Algorithm: {algorithm}"));
    sink.emit(&format!("File checksum: {digest}"));

    let verified = match source {
        Expected::Value(value) => {
            let matched = digest.matches(value);
            if !matched {
                sink.emit(&format!(
                    "Checksum to check against: {}",
                    normalize_digest(value)
                ));
            }
            matched
        }
        Expected::Listing(listing_path) => match listing::read_listing(listing_path) {
            Ok(text) => {
                if let Some(line) = listing::matching_line(&text, digest.as_str()) {
                    debug!("{} matched listing entry '{line}'", path.display());
                    true
                } else {
                    sink.emit("No match found in checksum file");
                    false
                }
            }
            Err(e) => {
                sink.emit(&format!("{}: {e}", listing_path.display()));
                false
            }
        },
    };

    Ok(verified)
}

enum Expected<'a> {
    Value(&'a str),
    Listing(&'a Path),
}

fn digest_or_report(
    path: &Path,
    algorithm: HashAlgorithm,
    sink: &mut dyn MessageSink,
) -> Option<Digest> {
    match file_digest(path, algorithm) {
        Ok(digest) => {
            debug!("{algorithm} of {} is {digest}", path.display());
            Some(digest)
        }
        Err(e) => {
            sink.emit(&format!("{}: {e}", path.display()));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Discard, MessageLog};
    use std::path::PathBuf;

    const FILE1_HASH: &str = "5a122dc3f5af8a88ed71d2c16fdc30a2090573525614668634d8c45d5378e6fd";
    const FILE2_HASH: &str = "a4331a6f57c0474d9245f1d29edceff29974fc4646572a60f30deaa2384f0b6b";
    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    fn data(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests/data")
            .join(name)
    }

    #[test]
    fn test_compare_same_file() {
        assert!(compare_files(&data("file1.txt"), &data("file1.txt"), &mut Discard));
    }

    #[test]
    fn test_compare_same_file_verbose() {
        let mut log = MessageLog::new();
        assert!(compare_files(&data("file1.txt"), &data("file1.txt"), &mut log));
        assert_eq!(log.lines(), [
            format!("File1 checksum: {FILE1_HASH}"),
            format!("File2 checksum: {FILE1_HASH}"),
        ]);
    }

    #[test]
    fn test_compare_different_files() {
        let mut log = MessageLog::new();
        assert!(!compare_files(&data("file1.txt"), &data("file2.txt"), &mut log));
        assert_eq!(log.len(), 2);
        assert_eq!(log.lines()[0], format!("File1 checksum: {FILE1_HASH}"));
        assert_eq!(log.lines()[1], format!("File2 checksum: {FILE2_HASH}"));
    }

    #[test]
    fn test_compare_missing_file() {
        let missing = data("foobar.txt");
        let mut log = MessageLog::new();
        assert!(!compare_files(&missing, &data("file1.txt"), &mut log));
        assert_eq!(log.len(), 1);
        assert!(log.lines()[0].starts_with(&missing.display().to_string()));

        assert!(!compare_files(&data("file1.txt"), &missing, &mut Discard));
        assert!(!compare_files(&missing, &data("foobar2.txt"), &mut Discard));
    }

    #[test]
    fn test_value_matches() {
        let mut log = MessageLog::new();
        let ok = verify_against_value(&data("file1.txt"), "sha256", FILE1_HASH, &mut log).unwrap();
        assert!(ok);
        assert_eq!(log.lines(), [
            "Algorithm: sha256".to_string(),
            format!("File checksum: {FILE1_HASH}"),
        ]);
    }

    #[test]
    fn test_value_is_case_and_whitespace_insensitive() {
        let file = data("file1.txt");
        for value in [
            FILE1_HASH.to_string(),
            FILE1_HASH.to_uppercase(),
            format!(" {FILE1_HASH} "),
        ] {
            assert!(verify_against_value(&file, "sha256", &value, &mut Discard).unwrap());
        }
    }

    #[test]
    fn test_value_mismatch_reports_expected() {
        let mut log = MessageLog::new();
        let ok = verify_against_value(&data("file2.txt"), "sha256", " FOOBAR ", &mut log).unwrap();
        assert!(!ok);
        assert_eq!(log.lines(), [
            "Algorithm: sha256".to_string(),
            format!("File checksum: {FILE2_HASH}"),
            "Checksum to check against: foobar".to_string(),
        ]);
    }

    #[test]
    fn test_empty_file_digest() {
        let ok = verify_against_value(&data("empty.txt"), "sha256", EMPTY_SHA256, &mut Discard).unwrap();
        assert!(ok);
    }

    #[test]
    fn test_sha512_value() {
        let expected = "6a49005a5e6100708c2f3bffaf1a2e5f9ac34c40f89feeb6260cfd12945ecabc0510a826e4c6f031182ced20510ea1c334623e1a2f1e7a9728ef6d76f28373e1";
        assert!(verify_against_value(&data("file1.txt"), "sha512", expected, &mut Discard).unwrap());
    }

    #[test]
    fn test_listing_match() {
        let mut log = MessageLog::new();
        let ok = verify_against_listing(
            &data("file1.txt"),
            "sha256",
            &data("file1.txt.SHA256SUMS"),
            &mut log,
        )
        .unwrap();
        assert!(ok);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_listing_no_match() {
        let mut log = MessageLog::new();
        let ok = verify_against_listing(
            &data("file2.txt"),
            "sha256",
            &data("file1.txt.SHA256SUMS"),
            &mut log,
        )
        .unwrap();
        assert!(!ok);
        assert_eq!(log.lines()[2], "No match found in checksum file");
    }

    #[test]
    fn test_listing_missing_is_read_error_not_no_match() {
        let listing = data("foobar.txt");
        let mut log = MessageLog::new();
        let ok = verify_against_listing(&data("file1.txt"), "sha256", &listing, &mut log).unwrap();
        assert!(!ok);
        assert_eq!(log.len(), 3);
        assert_eq!(log.lines()[0], "Algorithm: sha256");
        assert_eq!(log.lines()[1], format!("File checksum: {FILE1_HASH}"));
        assert!(log.lines()[2].starts_with(&listing.display().to_string()));
    }

    #[test]
    fn test_target_missing_with_listing() {
        let target = data("foobar.txt");
        let mut log = MessageLog::new();
        let ok = verify_against_listing(&target, "sha256", &data("file1.txt.SHA256SUMS"), &mut log)
            .unwrap();
        assert!(!ok);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_listing_containment_anywhere() {
        let dir = tempfile::tempdir().unwrap();
        let listing = dir.path().join("SUMS");
        std::fs::write(&listing, format!("# release\nxx{}yy\n", FILE1_HASH.to_uppercase())).unwrap();
        assert!(verify_against_listing(&data("file1.txt"), "sha256", &listing, &mut Discard).unwrap());
    }

    #[test]
    fn test_unsupported_algorithm_raises_before_io() {
        for alg in ["md5", "rc4", "sha1"] {
            let result = verify_against_value(&data("does-not-exist"), alg, FILE1_HASH, &mut Discard);
            assert!(matches!(result, Err(VerifyError::UnsupportedAlgorithm { .. })));

            let result =
                verify_against_listing(&data("does-not-exist"), alg, &data("nope"), &mut Discard);
            assert!(matches!(result, Err(VerifyError::UnsupportedAlgorithm { .. })));
        }
    }

    #[test]
    fn test_neither_value_nor_listing_raises() {
        let result = verify_checksum(&data("file1.txt"), "sha256", None, None, &mut Discard);
        assert!(matches!(result, Err(VerifyError::MissingParameter(_))));
    }

    #[test]
    fn test_value_wins_over_listing() {
        let mut log = MessageLog::new();
        let ok = verify_checksum(
            &data("file1.txt"),
            "sha256",
            Some(FILE1_HASH),
            Some(&data("foobar.txt")),
            &mut log,
        )
        .unwrap();
        assert!(ok);
        assert_eq!(log.len(), 2);
    }
}
