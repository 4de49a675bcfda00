//! Read-only store of pre-generated expansions
//!
//! Resolves a visitor's passage to a previously vetted expansion without
//! invoking a model at request time. Every lookup failure is an explicit
//! `None`; nothing here propagates an error to the serving path.

use crate::cache::{CacheSettings, VersionBodyCache};
use crate::error::ContentError;
use crate::fingerprint::Fingerprint;
use crate::manifest::{version_body_path, ExpansionChunk, ExpansionVersion, Manifest};
use indexmap::IndexMap;
use rand::seq::IndexedRandom;
use rand::Rng;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Per-chunk statistics
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkStats {
    pub version_count: usize,
    pub passing_count: usize,
    /// Mean evaluation average across all versions
    pub average_score: f64,
}

/// Aggregate statistics across the store
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStats {
    pub chunk_count: usize,
    pub version_count: usize,
    pub passing_count: usize,
    /// Chunks with no servable version
    pub chunks_without_passing: usize,
    /// Mean evaluation average across all versions
    pub average_score: f64,
    /// Fraction of versions that passed
    pub pass_rate: f64,
}

/// Expansion store backed by a manifest
#[derive(Debug)]
pub struct ExpansionStore {
    root: Option<PathBuf>,
    chunks: IndexMap<Fingerprint, ExpansionChunk>,
    bodies: VersionBodyCache,
}

impl ExpansionStore {
    /// Build store from an in-memory manifest
    ///
    /// `root` is where non-embedded version bodies live. Later chunks with a
    /// duplicate fingerprint replace earlier ones.
    #[must_use]
    pub fn from_manifest(manifest: Manifest, root: Option<PathBuf>, cache: CacheSettings) -> Self {
        let mut chunks = IndexMap::with_capacity(manifest.chunks.len());
        for chunk in manifest.chunks {
            if let Some(previous) = chunks.insert(chunk.hash, chunk) {
                tracing::warn!(hash = %previous.hash, "duplicate chunk fingerprint in manifest");
            }
        }
        Self {
            root,
            chunks,
            bodies: VersionBodyCache::new(cache),
        }
    }

    /// Open a manifest file; bodies resolve relative to its directory
    ///
    /// # Errors
    /// IO failures and malformed manifest JSON
    pub async fn open(manifest_path: impl AsRef<Path>, cache: CacheSettings) -> Result<Self, ContentError> {
        let manifest_path = manifest_path.as_ref();
        let manifest = Manifest::load(manifest_path).await?;
        let root = manifest_path.parent().map(Path::to_path_buf);

        tracing::info!(
            chunks = manifest.chunks.len(),
            path = %manifest_path.display(),
            "loaded expansion manifest"
        );

        Ok(Self::from_manifest(manifest, root, cache))
    }

    /// Empty store
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self::from_manifest(Manifest::new(), None, CacheSettings::default())
    }

    /// Number of chunks
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether the store has no chunks
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Iterate chunks in manifest order
    pub fn chunks(&self) -> impl Iterator<Item = &ExpansionChunk> {
        self.chunks.values()
    }

    /// Chunk whose stored fingerprint equals `hash`
    #[inline]
    #[must_use]
    pub fn find_chunk_by_hash(&self, hash: &Fingerprint) -> Option<&ExpansionChunk> {
        self.chunks.get(hash)
    }

    /// Fingerprint raw content and look it up
    #[inline]
    #[must_use]
    pub fn find_chunk_by_content(&self, raw: &str) -> Option<&ExpansionChunk> {
        self.find_chunk_by_hash(&Fingerprint::of(raw))
    }

    /// Uniformly pick a passing version of a chunk
    #[must_use]
    pub fn random_passing_version(&self, chunk_id: &Fingerprint) -> Option<&ExpansionVersion> {
        self.random_passing_version_with(chunk_id, &mut rand::rng())
    }

    /// Uniformly pick a passing version using the supplied RNG
    pub fn random_passing_version_with<R: Rng + ?Sized>(
        &self,
        chunk_id: &Fingerprint,
        rng: &mut R,
    ) -> Option<&ExpansionVersion> {
        let chunk = self.find_chunk_by_hash(chunk_id)?;
        let passing: Vec<&ExpansionVersion> = chunk.passing_versions().collect();
        passing.choose(rng).copied()
    }

    /// Exact version lookup, ignoring pass/fail
    #[must_use]
    pub fn specific_version(&self, chunk_id: &Fingerprint, version: u32) -> Option<&ExpansionVersion> {
        self.find_chunk_by_hash(chunk_id)?.version(version)
    }

    /// Text of a version: embedded content, else the body file under the root
    ///
    /// Missing or unreadable bodies resolve to `None`.
    pub async fn resolve_content(&self, chunk_id: &Fingerprint, version: u32) -> Option<Arc<str>> {
        let entry = self.specific_version(chunk_id, version)?;
        if let Some(content) = &entry.content {
            return Some(Arc::from(content.as_str()));
        }

        let root = self.root.as_ref()?;
        let path = version_body_path(root, chunk_id, version);
        let loaded = self
            .bodies
            .try_get_or_load((*chunk_id, version), || async move {
                tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| ContentError::io(path, e))
            })
            .await;

        match loaded {
            Ok(body) => Some(body),
            Err(e) => {
                tracing::warn!(chunk = %chunk_id, version, error = %e, "version body unavailable");
                None
            }
        }
    }

    /// Statistics for one chunk
    #[must_use]
    pub fn stats_for(&self, chunk_id: &Fingerprint) -> Option<ChunkStats> {
        let chunk = self.find_chunk_by_hash(chunk_id)?;
        Some(ChunkStats {
            version_count: chunk.versions.len(),
            passing_count: chunk.passing_versions().count(),
            average_score: mean(chunk.versions.iter().map(|v| v.evaluation.average)),
        })
    }

    /// Aggregate statistics, or `None` if the store is empty
    #[must_use]
    pub fn global_stats(&self) -> Option<GlobalStats> {
        if self.chunks.is_empty() {
            return None;
        }

        let versions = || self.chunks.values().flat_map(|c| c.versions.iter());
        let version_count = versions().count();
        let passing_count = versions().filter(|v| v.evaluation.passed).count();
        let chunks_without_passing = self
            .chunks
            .values()
            .filter(|c| c.passing_versions().next().is_none())
            .count();

        Some(GlobalStats {
            chunk_count: self.chunks.len(),
            version_count,
            passing_count,
            chunks_without_passing,
            average_score: mean(versions().map(|v| v.evaluation.average)),
            pass_rate: if version_count == 0 {
                0.0
            } else {
                passing_count as f64 / version_count as f64
            },
        })
    }

    /// Cached body count
    #[inline]
    #[must_use]
    pub fn cached_bodies(&self) -> u64 {
        self.bodies.stats().entry_count
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}
