//! Canary descriptors: verification requests stored as JSON.
//!
//! A descriptor file holds one descriptor object or an array of them.
//! Relative paths resolve against the descriptor file's directory.

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::keyserver::{HkpFetcher, KeyFetcher};
use crate::messages::MessageLog;
use crate::verify::{run_with, VerificationMode, VerificationRequest};

/// One verification job as written in a descriptor file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CanaryDescriptor {
    pub name: String,
    pub verification_mode: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub file2: Option<PathBuf>,
    #[serde(default)]
    pub algorithm: Option<String>,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub checksum_file: Option<PathBuf>,
    #[serde(default)]
    pub signature_file: Option<PathBuf>,
    #[serde(default)]
    pub keyfile: Option<PathBuf>,
    #[serde(default)]
    pub keyid: Option<String>,
    #[serde(default)]
    pub keyserver: Option<String>,
    #[serde(default)]
    pub keyring_dir: Option<PathBuf>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DescriptorFile {
    Many(Vec<CanaryDescriptor>),
    One(CanaryDescriptor),
}

impl CanaryDescriptor {
    /// Builds the request, resolving relative paths against `base`.
    pub fn to_request(&self, base: &Path) -> Result<VerificationRequest> {
        let mode: VerificationMode = self.verification_mode.parse()?;
        let resolve = |path: &Option<PathBuf>| path.as_ref().map(|p| base.join(p));

        let mut request = VerificationRequest::new(mode);
        request.file = resolve(&self.file);
        request.file2 = resolve(&self.file2);
        request.algorithm = self.algorithm.clone();
        request.checksum = self.checksum.clone();
        request.checksum_file = resolve(&self.checksum_file);
        request.signature_file = resolve(&self.signature_file);
        request.keyfile = resolve(&self.keyfile);
        request.keyid = self.keyid.clone();
        request.keyserver = self.keyserver.clone();
        request.keyring_dir = resolve(&self.keyring_dir);
        Ok(request)
    }
}

/// Outcome of one canary run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanaryReport {
    pub name: String,
    pub mode: String,
    pub verified: bool,
    pub messages: Vec<String>,
}

/// Reads every descriptor from the JSON file at `path`.
pub fn load_descriptors(path: &Path) -> Result<Vec<CanaryDescriptor>> {
    let text = fs::read_to_string(path)?;
    let parsed: DescriptorFile = serde_json::from_str(&text)?;
    Ok(match parsed {
        DescriptorFile::Many(descriptors) => descriptors,
        DescriptorFile::One(descriptor) => vec![descriptor],
    })
}

/// Runs one descriptor. Usage errors propagate; failed checks are reports.
pub fn run_descriptor(
    descriptor: &CanaryDescriptor,
    base: &Path,
    fetcher: &dyn KeyFetcher,
) -> Result<CanaryReport> {
    let request = descriptor.to_request(base)?;
    let mut log = MessageLog::new();
    let verified = run_with(&request, fetcher, &mut log)?;
    if !verified {
        warn!("canary '{}' failed {} verification", descriptor.name, request.mode);
    }
    Ok(CanaryReport {
        name: descriptor.name.clone(),
        mode: request.mode.to_string(),
        verified,
        messages: log.into_lines(),
    })
}

/// Loads and runs every descriptor in the file at `path`.
pub fn run_file(path: &Path) -> Result<Vec<CanaryReport>> {
    run_file_with(path, &HkpFetcher)
}

pub fn run_file_with(path: &Path, fetcher: &dyn KeyFetcher) -> Result<Vec<CanaryReport>> {
    let descriptors = load_descriptors(path)?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    info!("running {} canaries from {}", descriptors.len(), path.display());

    descriptors
        .iter()
        .map(|descriptor| run_descriptor(descriptor, base, fetcher))
        .collect()
}
