//! PGP keyring management.
//!
//! A keyring is a directory holding one binary transferable public key per
//! file under `pubkeys/`, named by fingerprint. Keyrings are either opened at
//! a caller-owned path or created as a temporary directory that is removed
//! when the [`Keyring`] is dropped.

use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use pgp::composed::{Deserializable, SignedPublicKey};
use pgp::ser::Serialize;
use pgp::types::KeyDetails;
use tempfile::TempDir;

use crate::error::{Result, VerifyError};
use crate::keyserver::{normalize_key_id, HkpFetcher, KeyFetcher};
use crate::messages::MessageSink;

const KEY_DIR: &str = "pubkeys";
const KEY_EXTENSION: &str = "pgp";

/// An opened keyring location.
#[derive(Debug)]
pub struct Keyring {
    home: PathBuf,
    // Held only so the directory lives as long as the keyring.
    temp: Option<TempDir>,
}

impl Keyring {
    /// Opens `home` if given, otherwise creates an ephemeral keyring.
    ///
    /// A caller-supplied path must be an existing, writable directory.
    pub fn open_or_create(home: Option<&Path>) -> Result<Self> {
        match home {
            Some(path) => Self::open(path),
            None => {
                let temp = tempfile::Builder::new()
                    .prefix("relcheck-keyring-")
                    .tempdir()?;
                debug!("created ephemeral keyring at {}", temp.path().display());
                Ok(Self {
                    home: temp.path().to_path_buf(),
                    temp: Some(temp),
                })
            }
        }
    }

    fn open(path: &Path) -> Result<Self> {
        let invalid = |reason: String| VerifyError::InvalidKeyringLocation {
            path: path.to_path_buf(),
            reason,
        };

        let metadata = fs::metadata(path).map_err(|e| invalid(e.to_string()))?;
        if !metadata.is_dir() {
            return Err(invalid("not a directory".to_string()));
        }
        tempfile::tempfile_in(path).map_err(|e| invalid(format!("not writable: {e}")))?;

        debug!("opened keyring at {}", path.display());
        Ok(Self {
            home: path.to_path_buf(),
            temp: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.home
    }

    /// True when the keyring is deleted on drop.
    pub fn is_ephemeral(&self) -> bool {
        self.temp.is_some()
    }

    /// Loads every stored key. Entries that fail to parse are skipped.
    pub fn public_keys(&self) -> io::Result<Vec<SignedPublicKey>> {
        let dir = self.key_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == KEY_EXTENSION))
            .collect();
        paths.sort();

        let mut keys = Vec::with_capacity(paths.len());
        for path in paths {
            let file = File::open(&path)?;
            match SignedPublicKey::from_bytes(BufReader::new(file)) {
                Ok(key) => keys.push(key),
                Err(e) => warn!("skipping unreadable keyring entry {}: {e}", path.display()),
            }
        }
        Ok(keys)
    }

    fn key_dir(&self) -> PathBuf {
        self.home.join(KEY_DIR)
    }

    fn store(&self, key: &SignedPublicKey) -> io::Result<Stored> {
        let dir = self.key_dir();
        fs::create_dir_all(&dir)?;

        let bytes = key.to_bytes().map_err(|e| io::Error::other(e.to_string()))?;
        let target = dir.join(format!("{}.{KEY_EXTENSION}", key.fingerprint()));
        if fs::read(&target).is_ok_and(|existing| existing == bytes) {
            return Ok(Stored::Unchanged);
        }

        let mut staged = tempfile::NamedTempFile::new_in(&dir)?;
        staged.write_all(&bytes)?;
        staged.persist(&target).map_err(|e| e.error)?;
        Ok(Stored::New)
    }
}

enum Stored {
    New,
    Unchanged,
}

/// Where public keys come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    File(PathBuf),
    Server { key_id: String, server: String },
}

impl KeySource {
    /// Builds a source from optional parameters.
    ///
    /// Exactly one of `keyfile` or the `keyid`/`keyserver` pair must be set.
    pub fn from_options(
        keyfile: Option<&Path>,
        keyid: Option<&str>,
        keyserver: Option<&str>,
    ) -> Result<Self> {
        match (keyfile, keyid, keyserver) {
            (Some(path), None, None) => Ok(KeySource::File(path.to_path_buf())),
            (None, Some(key_id), Some(server)) => Ok(KeySource::Server {
                key_id: key_id.to_string(),
                server: server.to_string(),
            }),
            (None, None, None) => Err(VerifyError::MissingParameter(
                "either a key file or a key id and key server".to_string(),
            )),
            (None, _, _) => Err(VerifyError::InvalidParameterCombination(
                "key id and key server must be given together".to_string(),
            )),
            (Some(_), _, _) => Err(VerifyError::InvalidParameterCombination(
                "a key file cannot be combined with a key id or key server".to_string(),
            )),
        }
    }
}

/// Outcome of a key import.
///
/// `imported` counts every valid key from the source that is now in the
/// keyring, including keys that were already present (`unchanged`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyImportResult {
    pub imported: usize,
    pub unchanged: usize,
    pub diagnostics: Vec<String>,
}

impl KeyImportResult {
    pub fn succeeded(&self) -> bool {
        self.imported > 0
    }

    fn failed(diagnostic: String) -> Self {
        Self {
            diagnostics: vec![diagnostic],
            ..Self::default()
        }
    }
}

/// Imports keys from `source` into `keyring`, using HKP for servers.
pub fn import_keys(
    keyring: &Keyring,
    source: &KeySource,
    sink: &mut dyn MessageSink,
) -> KeyImportResult {
    import_keys_with(keyring, source, &HkpFetcher, sink)
}

/// Like [`import_keys`] with an explicit key fetcher.
pub fn import_keys_with(
    keyring: &Keyring,
    source: &KeySource,
    fetcher: &dyn KeyFetcher,
    sink: &mut dyn MessageSink,
) -> KeyImportResult {
    match source {
        KeySource::File(path) => import_from_file(keyring, path, sink),
        KeySource::Server { key_id, server } => {
            import_from_server_with(keyring, key_id, server, fetcher, sink)
        }
    }
}

/// Imports every valid public key found in the file at `path`.
pub fn import_from_file(
    keyring: &Keyring,
    path: &Path,
    sink: &mut dyn MessageSink,
) -> KeyImportResult {
    let material = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            let result = KeyImportResult::failed(format!("{}: {e}", path.display()));
            report_read_failure(&result, sink);
            return result;
        }
    };

    let result = import_material(keyring, &material, None);
    report(&result, sink);
    result
}

/// Fetches `key_id` from `server` over HKP and imports it.
pub fn import_from_server(
    keyring: &Keyring,
    key_id: &str,
    server: &str,
    sink: &mut dyn MessageSink,
) -> KeyImportResult {
    import_from_server_with(keyring, key_id, server, &HkpFetcher, sink)
}

/// Like [`import_from_server`] with an explicit key fetcher.
pub fn import_from_server_with(
    keyring: &Keyring,
    key_id: &str,
    server: &str,
    fetcher: &dyn KeyFetcher,
    sink: &mut dyn MessageSink,
) -> KeyImportResult {
    let Some(wanted) = normalize_key_id(key_id) else {
        let result = KeyImportResult::failed(format!("Invalid key id '{key_id}'"));
        report(&result, sink);
        return result;
    };

    let result = match fetcher.fetch_key(server, &wanted) {
        Ok(armored) => import_material(keyring, armored.as_bytes(), Some(&wanted)),
        Err(e) => KeyImportResult::failed(e.to_string()),
    };
    report(&result, sink);
    result
}

/// Parses and stores keys from armored or binary `material`.
///
/// With `wanted`, keys not matching that id are ignored.
fn import_material(keyring: &Keyring, material: &[u8], wanted: Option<&str>) -> KeyImportResult {
    let mut result = KeyImportResult::default();

    let keys = match SignedPublicKey::from_reader_many(material) {
        Ok((keys, _headers)) => keys,
        Err(e) => {
            result.diagnostics.push(format!("no valid OpenPGP data: {e}"));
            return result;
        }
    };

    for parsed in keys {
        let key = match parsed {
            Ok(key) => key,
            Err(e) => {
                result.diagnostics.push(format!("skipped unparseable key block: {e}"));
                continue;
            }
        };
        let label = describe_key(&key);

        if let Some(wanted) = wanted {
            if !key_matches(&key, wanted) {
                result.diagnostics.push(format!("SKIPPED {label} (not the requested key {wanted})"));
                continue;
            }
        }
        if let Err(e) = key.verify() {
            result.diagnostics.push(format!("SKIPPED {label} (invalid self-signature: {e})"));
            continue;
        }

        match keyring.store(&key) {
            Ok(Stored::New) => {
                result.imported += 1;
                result.diagnostics.push(format!("IMPORTED {label}"));
            }
            Ok(Stored::Unchanged) => {
                result.imported += 1;
                result.unchanged += 1;
                result.diagnostics.push(format!("UNCHANGED {label}"));
            }
            Err(e) => result.diagnostics.push(format!("FAILED {label}: {e}")),
        }
    }

    if result.diagnostics.is_empty() {
        result.diagnostics.push("no valid OpenPGP public keys found".to_string());
    }
    result.diagnostics.push(format!(
        "imported: {} unchanged: {}",
        result.imported, result.unchanged
    ));
    debug!(
        "imported {} key(s) into {}",
        result.imported,
        keyring.path().display()
    );
    result
}

/// `KEYID "user id"` for transcript lines.
pub(crate) fn describe_key(key: &SignedPublicKey) -> String {
    let key_id = key.key_id().to_string().to_ascii_uppercase();
    match key.details.users.first() {
        Some(user) => format!("{key_id} \"{}\"", String::from_utf8_lossy(user.id.id())),
        None => key_id,
    }
}

fn key_matches(key: &SignedPublicKey, wanted: &str) -> bool {
    let matches = |fingerprint: String, key_id: String| {
        fingerprint.to_ascii_uppercase().ends_with(wanted)
            || key_id.to_ascii_uppercase() == wanted
    };
    matches(key.fingerprint().to_string(), key.key_id().to_string())
        || key
            .public_subkeys
            .iter()
            .any(|sub| matches(sub.key.fingerprint().to_string(), sub.key.key_id().to_string()))
}

fn report(result: &KeyImportResult, sink: &mut dyn MessageSink) {
    sink.emit("--- Results of key import ---\n");
    sink.emit(&result.diagnostics.join("\n"));
}

fn report_read_failure(result: &KeyImportResult, sink: &mut dyn MessageSink) {
    for line in &result.diagnostics {
        sink.emit(line);
    }
}
