//! Merge engine
//!
//! Converts one file's staged rows into canonical state inside a single
//! [`MergeTransaction`]:
//!
//! 1. lock the ledger row; return early if the file is already processed and
//!    refuse it if its staging never completed
//! 2. decode staged rows and plan canonical writes
//! 3. check every planned segment against the field ownership table
//! 4. resolve tracks, then apply writes in dependency order
//! 5. stamp the ledger and commit
//!
//! A segment is written only when its fingerprint differs from the one stored
//! for the last merge of the same source kind, so replaying identical data
//! costs reads but no writes.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{MergeError, MergeResult};
use crate::identity::resolve_track_id;
use crate::ledger::FileId;
use crate::merge::ownership::{check_columns, CanonicalTable};
use crate::merge::plan::plan_row;
use crate::merge::write::CanonicalWrite;
use crate::store::{IngestStore, MergeTransaction, RowState};

/// Per-table write counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub identities_created: usize,
}

/// Outcome of merging one file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub file_id: FileId,
    /// The ledger already had the file as processed; nothing was read or written
    pub already_processed: bool,
    /// Rows inserted together with a segment
    pub inserted: usize,
    /// Segments overwritten because their fingerprint changed
    pub updated: usize,
    /// Segments skipped because their fingerprint matched
    pub unchanged: usize,
    /// Rows inserted with identity columns only
    pub identities_created: usize,
    pub by_table: BTreeMap<CanonicalTable, TableCounts>,
}

impl MergeReport {
    fn new(file_id: FileId) -> Self {
        Self {
            file_id,
            ..Self::default()
        }
    }

    /// Canonical writes performed
    pub fn writes(&self) -> usize {
        self.inserted + self.updated + self.identities_created
    }

    fn counts(&mut self, table: CanonicalTable) -> &mut TableCounts {
        self.by_table.entry(table).or_default()
    }

    fn record_identity(&mut self, table: CanonicalTable) {
        self.identities_created += 1;
        self.counts(table).identities_created += 1;
    }

    fn record_insert(&mut self, table: CanonicalTable) {
        self.inserted += 1;
        self.counts(table).inserted += 1;
    }

    fn record_update(&mut self, table: CanonicalTable) {
        self.updated += 1;
        self.counts(table).updated += 1;
    }

    fn record_unchanged(&mut self, table: CanonicalTable) {
        self.unchanged += 1;
        self.counts(table).unchanged += 1;
    }
}

/// Merges staged files into the canonical tables
#[derive(Clone)]
pub struct MergeEngine {
    store: Arc<dyn IngestStore>,
}

impl MergeEngine {
    pub fn new(store: Arc<dyn IngestStore>) -> Self {
        Self { store }
    }

    /// Merge one registered file's staged rows
    ///
    /// Any error rolls the whole file back and leaves it unprocessed.
    #[tracing::instrument(skip(self))]
    pub async fn merge_file(&self, file_id: FileId) -> MergeResult<MergeReport> {
        let mut tx = self.store.begin_merge().await?;
        let mut report = MergeReport::new(file_id);

        match tx.lock_file(file_id).await? {
            None => return Err(MergeError::UnknownFile(file_id)),
            Some(status) if status.processed => {
                info!(file_id, "File already processed; skipping merge");
                report.already_processed = true;
                return Ok(report);
            }
            Some(status) if !status.staged => {
                warn!(file_id, "File is not fully staged; refusing to merge");
                return Err(MergeError::IncompleteStaging(file_id));
            }
            Some(_) => {}
        }

        let staged = tx.staged_records(file_id).await?;
        let mut tracks = BTreeSet::new();
        let mut writes = Vec::new();

        for record in &staged {
            let planned = record.row().and_then(|row| {
                let track = row.track_code().map_err(|e| MergeError::malformed(record.kind, e))?;
                Ok((track, plan_row(&row, file_id)?))
            });
            match planned {
                Ok((track, planned)) => {
                    tracks.insert(track);
                    writes.extend(planned);
                }
                Err(e) => {
                    error!(
                        file_id,
                        kind = %record.kind,
                        natural_key = %record.natural_key,
                        fingerprint = %record.row_fingerprint,
                        error = %e,
                        "Staged row cannot be merged"
                    );
                    return Err(e);
                }
            }
        }

        for write in &writes {
            if let Some(segment) = &write.segment {
                if let Err(e) = check_columns(write.table, segment.kind, segment.column_names()) {
                    error!(file_id, natural_key = %write.natural_key, error = %e, "Field ownership violated");
                    return Err(e);
                }
            }
        }

        for track in &tracks {
            let (track_id, created) = resolve_track_id(tx.as_mut(), track).await?;
            if created {
                report.record_identity(CanonicalTable::Track);
            }
            debug!(file_id, track_code = %track, %track_id, "Resolved track");
        }

        writes.sort_by_key(|w| w.order_key());

        let mut seen: HashSet<(CanonicalTable, Uuid)> = HashSet::new();
        for write in &writes {
            let first_touch = seen.insert((write.table, write.id));
            if write.segment.is_none() && !first_touch {
                continue;
            }

            if let Err(e) = apply(tx.as_mut(), write, &mut report).await {
                error!(
                    file_id,
                    table = %write.table,
                    natural_key = %write.natural_key,
                    fingerprint = write.segment.as_ref().map(|s| s.fingerprint.as_str()),
                    error = %e,
                    "Canonical write failed"
                );
                return Err(e);
            }
        }

        tx.mark_processed(file_id).await?;
        tx.commit().await?;

        info!(
            file_id,
            staged = staged.len(),
            inserted = report.inserted,
            updated = report.updated,
            unchanged = report.unchanged,
            identities_created = report.identities_created,
            "Merged file"
        );
        Ok(report)
    }
}

async fn apply(tx: &mut dyn MergeTransaction, write: &CanonicalWrite, report: &mut MergeReport) -> MergeResult<()> {
    let kind = write.segment.as_ref().map(|s| s.kind);
    match (tx.row_state(write.table, write.id, kind).await?, &write.segment) {
        (RowState::Absent, Some(_)) => {
            tx.insert_row(write).await?;
            report.record_insert(write.table);
        }
        (RowState::Absent, None) => {
            tx.insert_row(write).await?;
            report.record_identity(write.table);
        }
        (RowState::Present { .. }, None) => {}
        (RowState::Present { fingerprint }, Some(segment)) => {
            if fingerprint.as_deref() == Some(segment.fingerprint.as_str()) {
                report.record_unchanged(write.table);
            } else {
                tx.update_segment(write, segment).await?;
                report.record_update(write.table);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ledger::{FileMeta, FileType, Ledger};
    use crate::staging::{ChartEntryRow, ChartScratchRow, ParsedRow, PpEntryRow, Stager};
    use crate::store::memory::MemoryStore;

    fn pp_entry(program: &str, odds: &str) -> ParsedRow {
        ParsedRow::PpEntry(PpEntryRow {
            track_code: Some("CD".into()),
            race_date: Some("2023-05-01".into()),
            race_number: Some(1),
            program_number: Some(program.into()),
            horse_name: Some("Mage".into()),
            trainer: Some("Gustavo Delgado".into()),
            ml_odds: Some(odds.into()),
            ..Default::default()
        })
    }

    async fn staged(store: &Arc<MemoryStore>, hash: &str, file_type: FileType, rows: Vec<ParsedRow>) -> FileId {
        let file_id = Ledger::new(store.clone())
            .register_file(&FileMeta::new("equibase", file_type, format!("{hash}.xml")), hash)
            .await
            .unwrap()
            .file_id();
        Stager::new(store.clone()).stage(file_id, rows).await.unwrap();
        file_id
    }

    #[tokio::test]
    async fn test_first_merge_creates_track_race_and_entry() {
        let store = Arc::new(MemoryStore::new());
        let file_id = staged(&store, "pp", FileType::Pp, vec![pp_entry("3", "5-2")]).await;

        let report = MergeEngine::new(store.clone()).merge_file(file_id).await.unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.identities_created, 2);
        assert_eq!(report.by_table[&CanonicalTable::Track].identities_created, 1);
        assert_eq!(report.by_table[&CanonicalTable::Race].identities_created, 1);
        assert_eq!(report.by_table[&CanonicalTable::Entry].inserted, 1);
        assert_eq!(store.row_count(CanonicalTable::Entry).await, 1);
        assert!(store.file(file_id).await.unwrap().unwrap().is_processed());
    }

    #[tokio::test]
    async fn test_replay_of_processed_file_is_a_no_op() {
        let store = Arc::new(MemoryStore::new());
        let file_id = staged(&store, "pp", FileType::Pp, vec![pp_entry("3", "5-2")]).await;
        let engine = MergeEngine::new(store.clone());
        engine.merge_file(file_id).await.unwrap();
        let writes_before = store.write_count().await;

        let report = engine.merge_file(file_id).await.unwrap();
        assert!(report.already_processed);
        assert_eq!(report.writes(), 0);
        assert_eq!(store.write_count().await, writes_before);
    }

    #[tokio::test]
    async fn test_unknown_file() {
        let store = Arc::new(MemoryStore::new());
        let err = MergeEngine::new(store).merge_file(42).await.unwrap_err();
        assert!(matches!(err, MergeError::UnknownFile(42)));
    }

    #[tokio::test]
    async fn test_unstaged_file_is_refused() {
        let store = Arc::new(MemoryStore::new());
        let file_id = Ledger::new(store.clone())
            .register_file(&FileMeta::new("equibase", FileType::Pp, "pp.xml"), "pp")
            .await
            .unwrap()
            .file_id();
        Stager::new(store.clone())
            .stage_kind(file_id, crate::staging::SourceKind::PpEntry, &[pp_entry("3", "5-2")])
            .await
            .unwrap();

        let err = MergeEngine::new(store.clone()).merge_file(file_id).await.unwrap_err();
        assert!(matches!(err, MergeError::IncompleteStaging(id) if id == file_id));
        assert_eq!(store.row_count(CanonicalTable::Entry).await, 0);
        assert!(!store.file(file_id).await.unwrap().unwrap().is_processed());
    }

    #[tokio::test]
    async fn test_scratch_after_chart_entry_updates_existing_entry() {
        let store = Arc::new(MemoryStore::new());
        let chart = staged(
            &store,
            "chart",
            FileType::Chart,
            vec![
                ParsedRow::ChartEntry(ChartEntryRow {
                    track_code: Some("CD".into()),
                    race_date: Some("2023-05-01".into()),
                    race_number: Some(1),
                    program_number: Some("5".into()),
                    ..Default::default()
                }),
                ParsedRow::ChartScratch(ChartScratchRow {
                    track_code: Some("CD".into()),
                    race_date: Some("2023-05-01".into()),
                    race_number: Some(1),
                    program_number: Some("5".into()),
                    reason: Some("Vet".into()),
                    ..Default::default()
                }),
            ],
        )
        .await;

        let report = MergeEngine::new(store.clone()).merge_file(chart).await.unwrap();
        assert_eq!(report.by_table[&CanonicalTable::Entry].identities_created, 1);
        assert_eq!(report.by_table[&CanonicalTable::Entry].updated, 1);

        let entries = store.rows(CanonicalTable::Entry).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].flag("scratch_flag"), Some(true));
        assert_eq!(entries[0].text("scratch_reason"), Some("Vet"));
    }
}
