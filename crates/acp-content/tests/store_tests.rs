//! Expansion store against an on-disk manifest and chunk directories

use acp_content::{
    migrate_manifest, CacheSettings, ElementKind, ExpansionChunk, ExpansionStore, ExpansionVersion,
    Fingerprint, Manifest, MigrationPolicy, SourceDescriptor, VersionEvaluation,
};
use pretty_assertions::assert_eq;
use std::path::Path;

const ORIGINAL: &str = "I write software and occasionally *essays*.";

async fn write_fixture(root: &Path) -> Fingerprint {
    let chunk = ExpansionChunk::from_original(
        ORIGINAL,
        SourceDescriptor::new("about.mdx", ElementKind::Paragraph, 2),
    )
    .with_version(ExpansionVersion::new(1, "elaborate", 2.2, VersionEvaluation::new(8.0, 8.0, 8.0, true)))
    .with_version(
        ExpansionVersion::new(2, "tangent", 3.1, VersionEvaluation::new(4.0, 3.0, 5.0, false))
            .with_content("Embedded but failing."),
    );
    let hash = chunk.hash;

    let manifest = Manifest::new().with_chunks(vec![chunk]);
    manifest.save(root.join("manifest.json")).await.unwrap();

    tokio::fs::create_dir_all(root.join(hash.to_string())).await.unwrap();
    tokio::fs::write(
        root.join(hash.to_string()).join("v1.md"),
        "I write software, mostly tools nobody asked for, and essays.",
    )
    .await
    .unwrap();

    hash
}

#[tokio::test]
async fn serves_body_from_chunk_directory() {
    let dir = tempfile::tempdir().unwrap();
    let hash = write_fixture(dir.path()).await;

    let store = ExpansionStore::open(dir.path().join("manifest.json"), CacheSettings::default())
        .await
        .unwrap();

    let version = store.random_passing_version(&hash).unwrap();
    assert_eq!(version.version, 1);
    assert!(version.content.is_none());

    let body = store.resolve_content(&hash, version.version).await.unwrap();
    assert!(body.starts_with("I write software, mostly tools"));

    let again = store.resolve_content(&hash, version.version).await.unwrap();
    assert_eq!(body, again);
}

#[tokio::test]
async fn content_lookup_matches_across_formatting() {
    let dir = tempfile::tempdir().unwrap();
    let hash = write_fixture(dir.path()).await;
    let store = ExpansionStore::open(dir.path().join("manifest.json"), CacheSettings::default())
        .await
        .unwrap();

    let found = store
        .find_chunk_by_content("I write **software** and occasionally essays.")
        .unwrap();
    assert_eq!(found.hash, hash);
}

#[tokio::test]
async fn missing_body_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let hash = write_fixture(dir.path()).await;
    tokio::fs::remove_file(dir.path().join(hash.to_string()).join("v1.md"))
        .await
        .unwrap();

    let store = ExpansionStore::open(dir.path().join("manifest.json"), CacheSettings::default())
        .await
        .unwrap();
    assert!(store.resolve_content(&hash, 1).await.is_none());
    assert!(store.resolve_content(&hash, 99).await.is_none());
}

#[tokio::test]
async fn missing_manifest_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = ExpansionStore::open(dir.path().join("absent.json"), CacheSettings::default()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn migrated_manifest_still_resolves() {
    let dir = tempfile::tempdir().unwrap();
    let _ = write_fixture(dir.path()).await;

    let manifest = Manifest::load(dir.path().join("manifest.json")).await.unwrap();
    let (migrated, report) = migrate_manifest(&manifest, MigrationPolicy::Strict).unwrap();
    assert!(report.is_noop());
    assert_eq!(migrated, manifest);
}
