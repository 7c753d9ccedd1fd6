//! Error taxonomy for the pRF pipeline.
//!
//! Every variant maps to a process exit code so the binary can report failures
//! the same way regardless of which stage raised them.

use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrfError {
    /// Invalid or inconsistent grid, extent or run parameters.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Data shapes disagree (volume count vs stimulus frames, mask vs functional data, ...).
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A model bank was requested from the cache but none matches the configuration.
    #[error("model bank missing: {0}")]
    ModelBankMissing(String),

    /// The requested fitting backend cannot run in this build or on this machine.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Malformed input file (NIfTI header, PNG frame, binary store, JSON).
    #[error("format error: {0}")]
    Format(String),
}

impl PrfError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn shape(message: impl Into<String>) -> Self {
        Self::ShapeMismatch(message.into())
    }

    pub fn format(message: impl Into<String>) -> Self {
        Self::Format(message.into())
    }

    /// Wrap an I/O error with the action and path that failed.
    pub fn io(action: &str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            context: format!("Failed to {action} '{}'", path.display()),
            source,
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            PrfError::Configuration(_) => 2,
            PrfError::ShapeMismatch(_) => 3,
            PrfError::ModelBankMissing(_) => 4,
            PrfError::BackendUnavailable(_) => 5,
            PrfError::Io { .. } | PrfError::Format(_) => 6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_per_category() {
        let codes = [
            PrfError::config("x").exit_code(),
            PrfError::shape("x").exit_code(),
            PrfError::ModelBankMissing("x".into()).exit_code(),
            PrfError::BackendUnavailable("x".into()).exit_code(),
            PrfError::format("x").exit_code(),
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn io_error_message_names_the_path() {
        let err = PrfError::io(
            "open mask",
            Path::new("/data/mask.nii"),
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/data/mask.nii"), "{msg}");
        assert!(msg.contains("gone"), "{msg}");
    }
}
