//! Staging store
//!
//! Holds one row per (source file, kind, natural key). Staging the same file
//! again is a no-op as long as the parser reproduces the same rows; a row whose
//! fingerprint differs from what was staged before halts the file with
//! [`MergeError::NonDeterministicParse`] and clears its `staged_at` stamp, so
//! the merge engine refuses it until it stages cleanly. Rows that cannot be
//! keyed are recorded in the rejection log, once per distinct payload, and
//! skipped.

pub mod rows;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use hhml_common::checksum::file_hash;
use serde::{Deserialize, Serialize};

use crate::error::{MergeError, MergeResult};
use crate::ledger::FileId;
use crate::store::IngestStore;

pub use rows::{
    ChartEntryRow, ChartPayoutRow, ChartRaceRow, ChartScratchRow, KeyedRow, ParsedRow, PpEntryRow,
    PpRaceRow, PpWorkoutRow, SourceKind,
};

/// A parser row as held in staging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedRecord {
    pub source_file_id: FileId,
    pub kind: SourceKind,
    pub natural_key: String,
    pub payload: serde_json::Value,
    pub row_fingerprint: String,
}

impl StagedRecord {
    pub fn from_row(source_file_id: FileId, row: &ParsedRow) -> MergeResult<Self> {
        let kind = row.kind();
        let natural_key = row.natural_key().map_err(|e| MergeError::malformed(kind, e))?;
        let row_fingerprint = row.fingerprint().map_err(|e| MergeError::malformed(kind, e))?;
        Ok(Self {
            source_file_id,
            kind,
            natural_key,
            payload: serde_json::to_value(row)?,
            row_fingerprint,
        })
    }

    /// Decode the payload back into the parser row it was staged from
    pub fn row(&self) -> MergeResult<ParsedRow> {
        let row: ParsedRow = serde_json::from_value(self.payload.clone())?;
        if row.kind() != self.kind {
            return Err(MergeError::malformed(
                self.kind,
                hhml_common::HhmlError::invalid("kind", format!("payload holds a {} row", row.kind())),
            ));
        }
        Ok(row)
    }
}

/// A row skipped during staging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedRecord {
    pub source_file_id: FileId,
    pub kind: SourceKind,
    pub reason: String,
    pub payload: serde_json::Value,
}

impl RejectedRecord {
    /// SHA-256 of the payload's JSON rendering
    pub fn payload_hash(&self) -> String {
        file_hash(self.payload.to_string().as_bytes())
    }

    /// File, kind and payload hash; a re-stage never logs the same key twice
    pub fn dedup_key(&self) -> (FileId, SourceKind, String) {
        (self.source_file_id, self.kind, self.payload_hash())
    }
}

/// What the store holds for a key after a staging attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    pub stored_fingerprint: String,
    pub inserted: bool,
}

/// Per-file staging summary
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StageReport {
    pub file_id: FileId,
    /// Rows written for the first time
    pub staged: usize,
    /// Rows already staged by an earlier run with the same fingerprint
    pub unchanged: usize,
    /// Identical rows repeated within this batch
    pub repeated: usize,
    pub rejected: Vec<RejectedRecord>,
}

impl StageReport {
    fn new(file_id: FileId) -> Self {
        Self {
            file_id,
            ..Self::default()
        }
    }

    fn absorb(&mut self, other: StageReport) {
        self.staged += other.staged;
        self.unchanged += other.unchanged;
        self.repeated += other.repeated;
        self.rejected.extend(other.rejected);
    }
}

/// Stages parser rows for a registered file
#[derive(Clone)]
pub struct Stager {
    store: Arc<dyn IngestStore>,
}

impl Stager {
    pub fn new(store: Arc<dyn IngestStore>) -> Self {
        Self { store }
    }

    /// Stage a file's rows of every kind and stamp the file as staged
    ///
    /// Kinds are committed one at a time, so a failure can leave some kinds
    /// staged; the stamp is only set once every kind has gone through.
    #[tracing::instrument(skip(self, rows), fields(rows = rows.len()))]
    pub async fn stage(&self, file_id: FileId, rows: Vec<ParsedRow>) -> MergeResult<StageReport> {
        let mut by_kind: BTreeMap<SourceKind, Vec<ParsedRow>> = BTreeMap::new();
        for row in rows {
            by_kind.entry(row.kind()).or_default().push(row);
        }

        let mut report = StageReport::new(file_id);
        for (kind, rows) in by_kind {
            match self.stage_kind(file_id, kind, &rows).await {
                Ok(kind_report) => report.absorb(kind_report),
                Err(e @ MergeError::NonDeterministicParse { .. }) => {
                    self.store.set_staged(file_id, false).await?;
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }
        self.store.set_staged(file_id, true).await?;

        tracing::info!(
            file_id,
            staged = report.staged,
            unchanged = report.unchanged,
            rejected = report.rejected.len(),
            "Staged file"
        );
        Ok(report)
    }

    /// Stage rows of one kind
    ///
    /// Does not touch the file's `staged_at` stamp. Malformed rows are
    /// rejected and skipped. A key staged twice with
    /// different content, in this batch or against an earlier run, fails the
    /// whole call.
    pub async fn stage_kind(&self, file_id: FileId, kind: SourceKind, rows: &[ParsedRow]) -> MergeResult<StageReport> {
        if self.store.file(file_id).await?.is_none() {
            return Err(MergeError::UnknownFile(file_id));
        }

        let mut report = StageReport::new(file_id);
        let mut records: Vec<StagedRecord> = Vec::with_capacity(rows.len());
        let mut seen: HashMap<String, String> = HashMap::new();

        for row in rows {
            if row.kind() != kind {
                report.rejected.push(RejectedRecord {
                    source_file_id: file_id,
                    kind,
                    reason: format!("{} row staged as {kind}", row.kind()),
                    payload: serde_json::to_value(row)?,
                });
                continue;
            }

            let record = match StagedRecord::from_row(file_id, row) {
                Ok(record) => record,
                Err(MergeError::MalformedRecord { source, .. }) => {
                    tracing::warn!(file_id, %kind, reason = %source, "Skipping malformed row");
                    report.rejected.push(RejectedRecord {
                        source_file_id: file_id,
                        kind,
                        reason: source.to_string(),
                        payload: serde_json::to_value(row)?,
                    });
                    continue;
                }
                Err(e) => return Err(e),
            };

            match seen.get(&record.natural_key) {
                Some(fp) if *fp == record.row_fingerprint => {
                    report.repeated += 1;
                }
                Some(fp) => {
                    return Err(MergeError::NonDeterministicParse {
                        file_id,
                        kind,
                        natural_key: record.natural_key,
                        stored: fp.clone(),
                        incoming: record.row_fingerprint,
                    });
                }
                None => {
                    seen.insert(record.natural_key.clone(), record.row_fingerprint.clone());
                    records.push(record);
                }
            }
        }

        if !report.rejected.is_empty() {
            self.store.record_rejections(&report.rejected).await?;
        }

        let outcomes = self.store.stage_records(&records).await?;
        for (record, outcome) in records.into_iter().zip(outcomes) {
            if outcome.stored_fingerprint != record.row_fingerprint {
                tracing::error!(
                    file_id,
                    %kind,
                    natural_key = %record.natural_key,
                    fingerprint = %record.row_fingerprint,
                    stored = %outcome.stored_fingerprint,
                    "Re-parse disagrees with staged row"
                );
                return Err(MergeError::NonDeterministicParse {
                    file_id,
                    kind,
                    natural_key: record.natural_key,
                    stored: outcome.stored_fingerprint,
                    incoming: record.row_fingerprint,
                });
            }
            if outcome.inserted {
                report.staged += 1;
            } else {
                report.unchanged += 1;
            }
        }

        tracing::debug!(file_id, %kind, staged = report.staged, unchanged = report.unchanged, "Staged kind");
        Ok(report)
    }
}
