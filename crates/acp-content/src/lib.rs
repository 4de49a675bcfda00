//! ACP Content Layer
//!
//! Content-addressed lookup of pre-generated expansions.
//!
//! # Core Concepts
//!
//! - [`Fingerprint`]: 8-hex-character hash of a passage's *visible* text
//! - [`Manifest`]: persisted list of chunks and their generated versions
//! - [`ExpansionStore`]: read-only serving view over a manifest
//! - [`migrate_manifest`]: recompute fingerprints after a normalization change
//!
//! # Example
//!
//! ```rust,ignore
//! use acp_content::{CacheSettings, ExpansionStore, Fingerprint};
//!
//! let store = ExpansionStore::open("expansions/manifest.json", CacheSettings::default()).await?;
//! let id = Fingerprint::of("**Hello** world");
//! if let Some(version) = store.random_passing_version(&id) {
//!     let body = store.resolve_content(&id, version.version).await;
//! }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod cache;
pub mod error;
pub mod fingerprint;
pub mod manifest;
pub mod migration;
pub mod store;

// Re-exports
pub use cache::{CacheSettings, CacheStats, VersionBodyCache};
pub use error::{ContentError, MigrationError};
pub use fingerprint::{fingerprint, normalize, Fingerprint, FingerprintError};
pub use manifest::{
    version_body_path, ElementKind, ExpansionChunk, ExpansionVersion, Manifest, OriginalPassage,
    SourceDescriptor, VersionEvaluation,
};
pub use migration::{apply_directory_renames, migrate_manifest, MigrationPolicy, MigrationReport};
pub use store::{ChunkStats, ExpansionStore, GlobalStats};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
