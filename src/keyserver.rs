//! Public key retrieval from HKP key servers.
//!
//! The fetch sits behind [`KeyFetcher`] so keyring logic can be tested
//! without network access.

use std::sync::OnceLock;
use std::time::Duration;

use log::debug;

/// Network timeout for a single key lookup.
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Default port for plain `hkp://` servers.
const HKP_PORT: u16 = 11371;

/// Retrieves armored public keys by id.
#[cfg_attr(test, mockall::automock)]
pub trait KeyFetcher {
    /// Fetch the armored key block for `key_id` from `server`.
    ///
    /// `key_id` is already normalized to uppercase hex without a `0x` prefix.
    fn fetch_key(&self, server: &str, key_id: &str) -> Result<String, KeyServerError>;
}

/// Errors arising from key server lookups.
#[derive(Debug, thiserror::Error)]
pub enum KeyServerError {
    /// The server answered but does not know the key.
    #[error("key {key_id} not found on {url}")]
    NotFound { key_id: String, url: String },

    /// The server could not be reached or answered with an error.
    #[error("key server request to {url} failed: {reason}")]
    Http { url: String, reason: String },
}

/// HKP lookups over HTTP(S) using `ureq`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HkpFetcher;

impl HkpFetcher {
    /// Builds the machine-readable lookup URL for `key_id` on `server`.
    pub fn lookup_url(server: &str, key_id: &str) -> String {
        format!(
            "{}/pks/lookup?op=get&options=mr&search=0x{key_id}",
            server_base(server)
        )
    }
}

impl KeyFetcher for HkpFetcher {
    fn fetch_key(&self, server: &str, key_id: &str) -> Result<String, KeyServerError> {
        let url = Self::lookup_url(server, key_id);
        debug!("fetching key {key_id} from {url}");

        let response = http_agent()
            .get(url.as_str())
            .call()
            .map_err(|e| map_ureq_error(&url, key_id, &e))?;
        response
            .into_body()
            .read_to_string()
            .map_err(|e| KeyServerError::Http {
                url: url.clone(),
                reason: e.to_string(),
            })
    }
}

/// Validates and normalizes a key id or fingerprint.
///
/// Accepts 8, 16, 40 or 64 hex digits with an optional `0x` prefix and
/// embedded spaces; returns uppercase hex.
pub fn normalize_key_id(key_id: &str) -> Option<String> {
    let trimmed = key_id.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();

    let valid_len = matches!(compact.len(), 8 | 16 | 40 | 64);
    if valid_len && compact.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(compact.to_ascii_uppercase())
    } else {
        None
    }
}

fn server_base(server: &str) -> String {
    let server = server.trim().trim_end_matches('/');
    if let Some(host) = server.strip_prefix("hkps://") {
        format!("https://{host}")
    } else if let Some(host) = server.strip_prefix("hkp://") {
        if host.contains(':') {
            format!("http://{host}")
        } else {
            format!("http://{host}:{HKP_PORT}")
        }
    } else if server.starts_with("http://") || server.starts_with("https://") {
        server.to_string()
    } else {
        format!("https://{server}")
    }
}

/// Shared `ureq` agent with request timeout configuration.
fn http_agent() -> &'static ureq::Agent {
    static AGENT: OnceLock<ureq::Agent> = OnceLock::new();
    AGENT.get_or_init(|| {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(LOOKUP_TIMEOUT))
            .build();
        ureq::Agent::new_with_config(config)
    })
}

fn map_ureq_error(url: &str, key_id: &str, err: &ureq::Error) -> KeyServerError {
    match err {
        ureq::Error::StatusCode(404) => KeyServerError::NotFound {
            key_id: key_id.to_owned(),
            url: url.to_owned(),
        },
        other => KeyServerError::Http {
            url: url.to_owned(),
            reason: other.to_string(),
        },
    }
}
