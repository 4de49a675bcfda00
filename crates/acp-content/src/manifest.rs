//! Persisted expansion manifest
//!
//! The manifest lists every chunk with its fingerprint, source descriptor,
//! original passage and generated versions. Version bodies may be embedded
//! directly (for deployment portability) or stored beside the manifest at
//! `<root>/<fingerprint>/v<version>.md`.

use crate::error::ContentError;
use crate::fingerprint::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Current manifest schema version
pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// Top-level manifest document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Schema version
    #[serde(default = "default_schema_version")]
    pub version: u32,
    /// When the expansions were generated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
    /// All chunks
    #[serde(default)]
    pub chunks: Vec<ExpansionChunk>,
}

fn default_schema_version() -> u32 {
    MANIFEST_SCHEMA_VERSION
}

impl Manifest {
    /// Create an empty manifest
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With chunks
    #[inline]
    #[must_use]
    pub fn with_chunks(mut self, chunks: Vec<ExpansionChunk>) -> Self {
        self.chunks = chunks;
        self
    }

    /// Parse a manifest from JSON text
    ///
    /// # Errors
    /// Returns [`ContentError::ManifestParse`] if the JSON is malformed
    pub fn from_json_str(json: &str) -> Result<Self, ContentError> {
        serde_json::from_str(json).map_err(|source| ContentError::ManifestParse {
            path: PathBuf::from("<inline>"),
            source,
        })
    }

    /// Load a manifest from disk
    ///
    /// # Errors
    /// IO failures and malformed JSON
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ContentError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ContentError::io(path, e))?;
        serde_json::from_str(&raw).map_err(|source| ContentError::ManifestParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the manifest to disk as pretty JSON
    ///
    /// # Errors
    /// IO failures
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), ContentError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).map_err(|source| {
            ContentError::ManifestParse {
                path: path.to_path_buf(),
                source,
            }
        })?;
        tokio::fs::write(path, json)
            .await
            .map_err(|e| ContentError::io(path, e))
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_SCHEMA_VERSION,
            generated_at: None,
            chunks: Vec::new(),
        }
    }
}

/// One addressable passage and its generated expansions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpansionChunk {
    /// Content fingerprint of the original passage
    pub hash: Fingerprint,
    /// Where the passage came from
    pub source: SourceDescriptor,
    /// The original passage
    pub original: OriginalPassage,
    /// Generated variants
    #[serde(default)]
    pub versions: Vec<ExpansionVersion>,
}

impl ExpansionChunk {
    /// Create chunk for an original passage, fingerprinting its text
    #[must_use]
    pub fn from_original(text: impl Into<String>, source: SourceDescriptor) -> Self {
        let text = text.into();
        Self {
            hash: Fingerprint::of(&text),
            source,
            original: OriginalPassage::embedded(text),
            versions: Vec::new(),
        }
    }

    /// With a version appended
    #[inline]
    #[must_use]
    pub fn with_version(mut self, version: ExpansionVersion) -> Self {
        self.versions.push(version);
        self
    }

    /// Versions eligible for serving
    pub fn passing_versions(&self) -> impl Iterator<Item = &ExpansionVersion> {
        self.versions.iter().filter(|v| v.evaluation.passed)
    }

    /// Exact version lookup, regardless of evaluation
    #[must_use]
    pub fn version(&self, number: u32) -> Option<&ExpansionVersion> {
        self.versions.iter().find(|v| v.version == number)
    }
}

/// Source location of a chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDescriptor {
    /// Source document
    pub file: String,
    /// Kind of element the passage was taken from
    pub element: ElementKind,
    /// Position of the element within the document
    #[serde(default)]
    pub index: usize,
}

impl SourceDescriptor {
    /// Create descriptor
    #[inline]
    #[must_use]
    pub fn new(file: impl Into<String>, element: ElementKind, index: usize) -> Self {
        Self {
            file: file.into(),
            element,
            index,
        }
    }
}

/// Element kind of a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Paragraph,
    Heading,
    ListItem,
    Blockquote,
    #[serde(other)]
    Other,
}

/// Original passage text and size
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginalPassage {
    /// Embedded original markup; absent in older manifests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Word count of the original
    pub word_count: usize,
}

impl OriginalPassage {
    /// Embed original text
    #[must_use]
    pub fn embedded(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            word_count: text.split_whitespace().count(),
            text: Some(text),
        }
    }

    /// Record only the word count
    #[inline]
    #[must_use]
    pub fn count_only(word_count: usize) -> Self {
        Self {
            text: None,
            word_count,
        }
    }
}

/// One generated candidate for a chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpansionVersion {
    /// Version number (unique per chunk)
    pub version: u32,
    /// Generation strategy name
    pub strategy: String,
    /// Length of expansion relative to original
    pub expansion_ratio: f64,
    /// Rubric evaluation
    pub evaluation: VersionEvaluation,
    /// Generated text, when embedded in the manifest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ExpansionVersion {
    /// Create version without embedded content
    #[inline]
    #[must_use]
    pub fn new(
        version: u32,
        strategy: impl Into<String>,
        expansion_ratio: f64,
        evaluation: VersionEvaluation,
    ) -> Self {
        Self {
            version,
            strategy: strategy.into(),
            expansion_ratio,
            evaluation,
            content: None,
        }
    }

    /// With embedded content
    #[inline]
    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }
}

/// Rubric evaluation of a version
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionEvaluation {
    pub effectiveness: f64,
    pub integrity: f64,
    pub technical_quality: f64,
    /// Mean of the three criteria
    pub average: f64,
    /// Only passing versions are served
    pub passed: bool,
}

impl VersionEvaluation {
    /// Build evaluation, computing the average
    #[must_use]
    pub fn new(effectiveness: f64, integrity: f64, technical_quality: f64, passed: bool) -> Self {
        Self {
            effectiveness,
            integrity,
            technical_quality,
            average: (effectiveness + integrity + technical_quality) / 3.0,
            passed,
        }
    }
}

/// Path of a non-embedded version body
#[must_use]
pub fn version_body_path(root: &Path, hash: &Fingerprint, version: u32) -> PathBuf {
    root.join(hash.to_string()).join(format!("v{version}.md"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "version": 1,
        "chunks": [{
            "hash": "0a1b2c3d",
            "source": { "file": "about.mdx", "element": "paragraph", "index": 3 },
            "original": { "text": "I build things.", "wordCount": 3 },
            "versions": [
                {
                    "version": 1,
                    "strategy": "elaborate",
                    "expansionRatio": 2.1,
                    "evaluation": {
                        "effectiveness": 8.0, "integrity": 7.5, "technicalQuality": 9.0,
                        "average": 8.17, "passed": true
                    },
                    "content": "I build things, mostly software."
                },
                {
                    "version": 2,
                    "strategy": "tangent",
                    "expansionRatio": 3.4,
                    "evaluation": {
                        "effectiveness": 3.0, "integrity": 2.0, "technicalQuality": 5.0,
                        "average": 3.33, "passed": false
                    }
                }
            ]
        }]
    }"#;

    #[test]
    fn parses_camel_case_manifest() {
        let manifest = Manifest::from_json_str(SAMPLE).unwrap();
        assert_eq!(manifest.chunks.len(), 1);

        let chunk = &manifest.chunks[0];
        assert_eq!(chunk.hash.to_string(), "0a1b2c3d");
        assert_eq!(chunk.source.element, ElementKind::Paragraph);
        assert_eq!(chunk.original.word_count, 3);
        assert_eq!(chunk.passing_versions().count(), 1);
        assert!(chunk.version(2).unwrap().content.is_none());
    }

    #[test]
    fn unknown_element_kind_maps_to_other() {
        let json = SAMPLE.replace("\"paragraph\"", "\"table\"");
        let manifest = Manifest::from_json_str(&json).unwrap();
        assert_eq!(manifest.chunks[0].source.element, ElementKind::Other);
    }

    #[test]
    fn malformed_manifest_is_an_error() {
        assert!(matches!(
            Manifest::from_json_str("{ not json"),
            Err(ContentError::ManifestParse { .. })
        ));
    }

    #[test]
    fn from_original_fingerprints_text() {
        let source = SourceDescriptor::new("index.mdx", ElementKind::Paragraph, 0);
        let chunk = ExpansionChunk::from_original("**Bold** start", source);
        assert_eq!(chunk.hash, Fingerprint::of("bold start"));
        assert_eq!(chunk.original.word_count, 2);
    }

    #[test]
    fn evaluation_average() {
        let eval = VersionEvaluation::new(6.0, 7.0, 8.0, true);
        assert!((eval.average - 7.0).abs() < f64::EPSILON);
    }

    #[test]
    fn body_path_layout() {
        let hash: Fingerprint = "deadbeef".parse().unwrap();
        let path = version_body_path(Path::new("/data"), &hash, 4);
        assert_eq!(path, PathBuf::from("/data/deadbeef/v4.md"));
    }
}
