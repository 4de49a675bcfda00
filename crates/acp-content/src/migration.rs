//! Fingerprint migration
//!
//! Recomputes chunk fingerprints from embedded original text under the
//! current normalization rule. The old → new mapping must stay one-to-one;
//! a collision aborts the migration. Chunks without embedded original text
//! cannot be recomputed and are always reported.

use crate::error::{ContentError, MigrationError};
use crate::fingerprint::Fingerprint;
use crate::manifest::Manifest;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

/// What to do with chunks that lack embedded original text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MigrationPolicy {
    /// Keep them under their old fingerprint and list them in the report
    #[default]
    ReportAndKeep,
    /// Refuse to migrate
    Strict,
}

/// Outcome of a migration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    /// `(old, new)` for every chunk whose fingerprint changed
    pub changed: Vec<(Fingerprint, Fingerprint)>,
    /// Chunks whose fingerprint is unchanged
    pub unchanged: usize,
    /// Chunks kept under their old fingerprint for lack of original text
    pub unmigratable: Vec<Fingerprint>,
}

impl MigrationReport {
    /// Whether the migration altered anything
    #[inline]
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.changed.is_empty()
    }
}

/// Recompute fingerprints for every chunk in `manifest`
///
/// # Errors
/// - [`MigrationError::MissingOriginal`] under [`MigrationPolicy::Strict`]
/// - [`MigrationError::Collision`] if two chunks would share a fingerprint
pub fn migrate_manifest(
    manifest: &Manifest,
    policy: MigrationPolicy,
) -> Result<(Manifest, MigrationReport), MigrationError> {
    let unmigratable: Vec<Fingerprint> = manifest
        .chunks
        .iter()
        .filter(|c| c.original.text.is_none())
        .map(|c| c.hash)
        .collect();

    if policy == MigrationPolicy::Strict && !unmigratable.is_empty() {
        return Err(MigrationError::MissingOriginal {
            chunks: unmigratable,
        });
    }

    let mut report = MigrationReport {
        unmigratable,
        ..MigrationReport::default()
    };
    let mut claimed: HashMap<Fingerprint, Fingerprint> = HashMap::with_capacity(manifest.chunks.len());
    let mut migrated = manifest.clone();

    for chunk in &mut migrated.chunks {
        let old = chunk.hash;
        let new = match &chunk.original.text {
            Some(text) => Fingerprint::of(text),
            None => {
                tracing::warn!(chunk = %old, "no embedded original text; keeping fingerprint");
                old
            }
        };

        if let Some(first) = claimed.insert(new, old) {
            return Err(MigrationError::Collision {
                first,
                second: old,
                new,
            });
        }

        if new == old {
            report.unchanged += 1;
        } else {
            report.changed.push((old, new));
            chunk.hash = new;
        }
    }

    tracing::info!(
        changed = report.changed.len(),
        unchanged = report.unchanged,
        unmigratable = report.unmigratable.len(),
        "fingerprint migration computed"
    );

    Ok((migrated, report))
}

/// Rename chunk directories under `root` to follow the migration
///
/// Renames go through a temporary name so swapped fingerprints cannot
/// clobber each other. Directories that do not exist are skipped. Returns
/// the number of directories moved.
///
/// # Errors
/// IO failures while renaming
pub async fn apply_directory_renames(
    root: &Path,
    report: &MigrationReport,
) -> Result<usize, MigrationError> {
    let mut staged = Vec::with_capacity(report.changed.len());

    for (old, new) in &report.changed {
        let from = root.join(old.to_string());
        if !tokio::fs::try_exists(&from)
            .await
            .map_err(|e| ContentError::io(&from, e))?
        {
            continue;
        }
        let temp = root.join(format!("{old}.migrating"));
        tokio::fs::rename(&from, &temp)
            .await
            .map_err(|e| ContentError::io(&from, e))?;
        staged.push((temp, root.join(new.to_string())));
    }

    for (temp, to) in &staged {
        tokio::fs::rename(temp, to)
            .await
            .map_err(|e| ContentError::io(to, e))?;
    }

    Ok(staged.len())
}
