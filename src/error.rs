//! Error types for release artifact verification.
//!
//! Only caller mistakes are errors. An artifact that fails to verify is a
//! normal `false` outcome with a transcript, never a `VerifyError`.

use std::path::PathBuf;

use thiserror::Error;

/// Usage errors with specific exit codes.
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("Unsupported hash algorithm '{name}'")]
    UnsupportedAlgorithm { name: String },

    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter combination: {0}")]
    InvalidParameterCombination(String),

    #[error("Unknown verification mode '{0}'")]
    UnknownMode(String),

    #[error("Keyring location {} cannot be used: {reason}", path.display())]
    InvalidKeyringLocation { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VerifyError {
    /// Returns the exit code for this error.
    ///
    /// Exit code 1 is reserved for "artifact did not verify".
    pub fn exit_code(&self) -> i32 {
        match self {
            VerifyError::UnsupportedAlgorithm { .. } => 2,
            VerifyError::MissingParameter(_) => 3,
            VerifyError::InvalidParameterCombination(_) => 3,
            VerifyError::UnknownMode(_) => 4,
            VerifyError::InvalidKeyringLocation { .. } => 5,
            VerifyError::Io(_) => 6,
            VerifyError::Json(_) => 7,
        }
    }
}

pub type Result<T> = std::result::Result<T, VerifyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_never_collide_with_failure() {
        let errors = [
            VerifyError::UnsupportedAlgorithm { name: "md5".into() },
            VerifyError::MissingParameter("checksum".into()),
            VerifyError::UnknownMode("FOO".into()),
            VerifyError::InvalidKeyringLocation {
                path: PathBuf::from("/nowhere"),
                reason: "not a directory".into(),
            },
        ];
        for err in &errors {
            assert!(err.exit_code() > 1, "{err} maps to {}", err.exit_code());
        }
    }

    #[test]
    fn test_keyring_location_message_names_path() {
        let err = VerifyError::InvalidKeyringLocation {
            path: PathBuf::from("/nowhere"),
            reason: "does not exist".into(),
        };
        assert_eq!(
            err.to_string(),
            "Keyring location /nowhere cannot be used: does not exist"
        );
    }
}
