//! Batch ingestion from provider files on disk
//!
//! Each provider file is written next to a `<file>.rows.jsonl` holding its
//! parser output, the layout the `ingest` command reads.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::path::{Path, PathBuf};

use common::*;
use hhml_merge::config::IngestSettings;
use hhml_merge::merge::CanonicalTable;
use hhml_merge::pipeline::{rows_path_for, IngestOutcome, IngestRequest};
use hhml_merge::staging::ParsedRow;
use hhml_merge::{FileType, MergeError};
use tempfile::TempDir;

// ============================================================================
// Test Helpers
// ============================================================================

/// Write a provider file and its parser rows; returns the provider file path
fn write_file(dir: &Path, name: &str, bytes: &[u8], rows: &[ParsedRow]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    serde_jsonlines::write_json_lines(rows_path_for(&path, "rows.jsonl"), rows).unwrap();
    path
}

fn request(path: &Path) -> IngestRequest {
    IngestRequest::from_path(path, &IngestSettings::default()).unwrap()
}

// ============================================================================
// Single files
// ============================================================================

#[tokio::test]
async fn test_ingest_file_infers_meta_and_merges() {
    let dir = TempDir::new().unwrap();
    let path = write_file(dir.path(), "pp_2023-05-01_CD.xml", b"<pp/>", &pp_file());
    let (store, pipeline) = pipeline();

    let outcome = pipeline.ingest_file(&request(&path)).await.unwrap();
    assert!(matches!(outcome, IngestOutcome::Merged { .. }));
    assert_eq!(store.row_count(CanonicalTable::Entry).await, 2);

    let file = pipeline.ledger().file(outcome.file_id()).await.unwrap().unwrap();
    assert_eq!(file.file_type, FileType::Pp);
    assert_eq!(file.track_code.as_deref(), Some("CD"));
    assert!(file.is_processed());
}

#[tokio::test]
async fn test_missing_rows_file_leaves_the_file_unprocessed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("chart_2023-05-01_CD.xml");
    std::fs::write(&path, b"<chart/>").unwrap();
    let (store, pipeline) = pipeline();

    let err = pipeline.ingest_file(&request(&path)).await.unwrap_err();
    assert!(matches!(err, MergeError::Io(_)));
    assert_eq!(pipeline.ledger().unprocessed().await.unwrap().len(), 1);

    // Nothing was staged, so resume refuses the file instead of finishing it
    let resumed = pipeline.resume().await.unwrap();
    assert_eq!(resumed.merged(), 0);
    assert!(matches!(resumed.files[0].result, Err(MergeError::IncompleteStaging(_))));
    assert_eq!(pipeline.ledger().unprocessed().await.unwrap().len(), 1);

    // Once the parser output shows up the same file goes through
    serde_jsonlines::write_json_lines(rows_path_for(&path, "rows.jsonl"), &chart_file(1, false)).unwrap();
    let outcome = pipeline.ingest_file(&request(&path)).await.unwrap();
    assert!(matches!(outcome, IngestOutcome::Merged { .. }));
    assert!(pipeline.ledger().unprocessed().await.unwrap().is_empty());
    assert_eq!(store.row_count(CanonicalTable::Result).await, 2);
}

#[tokio::test]
async fn test_rows_path_override() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pp_2023-05-01_CD.xml");
    std::fs::write(&path, b"<pp/>").unwrap();
    let rows = dir.path().join("parsed.jsonl");
    serde_jsonlines::write_json_lines(&rows, &pp_file()).unwrap();
    let (store, pipeline) = pipeline();

    pipeline
        .ingest_file(&request(&path).with_rows_path(&rows))
        .await
        .unwrap();
    assert_eq!(store.row_count(CanonicalTable::Race).await, 1);
}

// ============================================================================
// Batches
// ============================================================================

#[tokio::test]
async fn test_batch_merges_each_file_and_reports_in_order() {
    let dir = TempDir::new().unwrap();
    let pp = write_file(dir.path(), "pp_2023-05-01_CD.xml", b"<pp/>", &pp_file());
    let chart = write_file(dir.path(), "chart_2023-05-01_CD.xml", b"<chart/>", &chart_file(1, false));
    let (store, pipeline) = pipeline();

    let report = pipeline.run_batch(vec![request(&pp), request(&chart)]).await;
    assert!(report.is_success());
    assert_eq!(report.merged(), 2);
    assert_eq!(report.files[0].file_name, "pp_2023-05-01_CD.xml");
    assert_eq!(report.files[1].file_name, "chart_2023-05-01_CD.xml");
    assert_eq!(store.row_count(CanonicalTable::Result).await, 2);
}

#[tokio::test]
async fn test_batch_reports_repeated_content_as_duplicate() {
    let dir = TempDir::new().unwrap();
    let first = write_file(dir.path(), "pp_2023-05-01_CD.xml", b"<pp/>", &pp_file());
    let copy = write_file(dir.path(), "pp_2023-05-01_CD_copy.xml", b"<pp/>", &pp_file());
    let (_store, pipeline) = pipeline();

    let report = pipeline.run_batch(vec![request(&first), request(&copy)]).await;
    assert!(report.is_success());
    assert_eq!(report.merged(), 1);
    assert_eq!(report.duplicates(), 1);
    assert!(matches!(report.files[1].result, Ok(IngestOutcome::Duplicate { .. })));

    // A later batch sees the processed file as a duplicate too
    let again = pipeline.run_batch(vec![request(&first)]).await;
    assert_eq!(again.duplicates(), 1);
    assert_eq!(pipeline.ledger().files().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_one_bad_file_does_not_stop_the_batch() {
    let dir = TempDir::new().unwrap();
    let bad = dir.path().join("chart_2023-05-01_CD.xml");
    std::fs::write(&bad, b"<chart/>").unwrap();
    std::fs::write(rows_path_for(&bad, "rows.jsonl"), b"{not json}\n").unwrap();
    let good = write_file(dir.path(), "pp_2023-05-01_CD.xml", b"<pp/>", &pp_file());
    let (store, pipeline) = pipeline();

    let report = pipeline.run_batch(vec![request(&bad), request(&good)]).await;
    assert!(!report.is_success());
    assert_eq!(report.failures().count(), 1);
    assert_eq!(report.merged(), 1);
    assert_eq!(store.row_count(CanonicalTable::Entry).await, 2);
}
