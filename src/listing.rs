//! Checksum listing lookup.
//!
//! Listings come in many flavours (`sha256sum` output, BSD tags, bare digests,
//! several digests per line). Rather than parse any one grammar, a listing
//! "contains" a digest when the digest's text appears anywhere in it.

use std::fs;
use std::io;
use std::path::Path;

/// Reads a listing file. Invalid UTF-8 is replaced, since only hex matters.
pub fn read_listing(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Returns true if `digest` occurs in `listing`, ignoring case.
pub fn contains(listing: &str, digest: &str) -> bool {
    let needle = digest.trim().to_ascii_lowercase();
    if needle.is_empty() {
        return false;
    }
    listing.to_ascii_lowercase().contains(&needle)
}

/// The first listing line mentioning `digest`, trimmed.
pub fn matching_line<'a>(listing: &'a str, digest: &str) -> Option<&'a str> {
    listing
        .lines()
        .find(|line| contains(line, digest))
        .map(str::trim)
}
