//! Error types for the content layer

use crate::fingerprint::{Fingerprint, FingerprintError};
use std::path::PathBuf;

/// Errors loading or saving expansion data
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    /// IO error touching the expansion root
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Manifest JSON could not be (de)serialized
    #[error("malformed manifest {path}: {source}")]
    ManifestParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Fingerprint could not be parsed
    #[error("invalid fingerprint: {0}")]
    InvalidFingerprint(#[from] FingerprintError),
}

impl ContentError {
    /// Create IO error for path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors recomputing fingerprints under the current normalization rule
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// Two chunks would share a fingerprint after migration
    #[error("fingerprint collision: {first} and {second} both map to {new}")]
    Collision {
        first: Fingerprint,
        second: Fingerprint,
        new: Fingerprint,
    },

    /// Chunks without embedded original text under the strict policy
    #[error("{} chunk(s) lack embedded original text: {chunks:?}", .chunks.len())]
    MissingOriginal { chunks: Vec<Fingerprint> },

    /// Directory rename failed
    #[error(transparent)]
    Content(#[from] ContentError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_original_display_counts_chunks() {
        let err = MigrationError::MissingOriginal {
            chunks: vec![Fingerprint::new([1, 2, 3, 4]), Fingerprint::new([5, 6, 7, 8])],
        };
        assert!(err.to_string().starts_with("2 chunk(s)"));
    }

    #[test]
    fn io_error_mentions_path() {
        let err = ContentError::io(
            "/tmp/manifest.json",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("/tmp/manifest.json"));
    }
}
