//! In-process store
//!
//! Keeps ledger, staging and canonical state behind one async mutex. A merge
//! transaction holds the lock for its whole lifetime and works on a copy of
//! the state that replaces the shared state only on commit, so merges are
//! serialised and a dropped transaction leaves no trace.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{FileStatus, IngestStore, MergeTransaction, RowState};
use crate::error::{MergeError, MergeResult};
use crate::ledger::{FileId, FileMeta, IngestedFile, Registration};
use crate::merge::ownership::CanonicalTable;
use crate::merge::write::{CanonicalWrite, Segment, SqlValue};
use crate::staging::{RejectedRecord, SourceKind, StageOutcome, StagedRecord};

/// A canonical row as held in memory
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRow {
    pub values: BTreeMap<&'static str, SqlValue>,
    /// Write sequence number of the insert
    pub created_seq: u64,
    /// Write sequence number of the latest insert or update
    pub updated_seq: u64,
}

impl MemoryRow {
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.values.get(column)
    }

    pub fn text(&self, column: &str) -> Option<&str> {
        self.values.get(column).and_then(SqlValue::as_text)
    }

    pub fn int(&self, column: &str) -> Option<i32> {
        match self.values.get(column) {
            Some(SqlValue::Int(v)) => *v,
            _ => None,
        }
    }

    pub fn float(&self, column: &str) -> Option<f64> {
        match self.values.get(column) {
            Some(SqlValue::Float(v)) => *v,
            _ => None,
        }
    }

    pub fn flag(&self, column: &str) -> Option<bool> {
        match self.values.get(column) {
            Some(SqlValue::Bool(v)) => *v,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    files: BTreeMap<FileId, IngestedFile>,
    staged: BTreeMap<(FileId, SourceKind, String), StagedRecord>,
    rejected: Vec<RejectedRecord>,
    rows: HashMap<(CanonicalTable, Uuid), MemoryRow>,
    natural_keys: HashSet<(CanonicalTable, String)>,
    fingerprints: HashMap<(CanonicalTable, Uuid, SourceKind), String>,
    write_seq: u64,
}

/// Table referenced by a foreign-key column
fn referenced_table(column: &str) -> Option<CanonicalTable> {
    match column {
        "track_id" => Some(CanonicalTable::Track),
        "race_id" => Some(CanonicalTable::Race),
        "entry_id" => Some(CanonicalTable::Entry),
        _ => None,
    }
}

impl MemoryState {
    fn file_mut(&mut self, file_id: FileId) -> MergeResult<&mut IngestedFile> {
        self.files.get_mut(&file_id).ok_or(MergeError::UnknownFile(file_id))
    }

    fn mark_processed(&mut self, file_id: FileId) -> MergeResult<()> {
        self.file_mut(file_id)?.processed_at = Some(Utc::now());
        Ok(())
    }

    fn staged_for(&self, file_id: FileId) -> Vec<StagedRecord> {
        self.staged
            .values()
            .filter(|r| r.source_file_id == file_id)
            .cloned()
            .collect()
    }
}

/// Shared in-memory store; clones share state
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn row(&self, table: CanonicalTable, id: Uuid) -> Option<MemoryRow> {
        self.state.lock().await.rows.get(&(table, id)).cloned()
    }

    pub async fn rows(&self, table: CanonicalTable) -> Vec<MemoryRow> {
        let state = self.state.lock().await;
        let mut rows: Vec<MemoryRow> = state
            .rows
            .iter()
            .filter(|((t, _), _)| *t == table)
            .map(|(_, row)| row.clone())
            .collect();
        rows.sort_by_key(|r| r.created_seq);
        rows
    }

    pub async fn row_count(&self, table: CanonicalTable) -> usize {
        let state = self.state.lock().await;
        state.rows.keys().filter(|(t, _)| *t == table).count()
    }

    /// Last merged fingerprint of `kind` on a row
    pub async fn fingerprint(&self, table: CanonicalTable, id: Uuid, kind: SourceKind) -> Option<String> {
        self.state.lock().await.fingerprints.get(&(table, id, kind)).cloned()
    }

    /// Total canonical writes ever committed
    pub async fn write_count(&self) -> u64 {
        self.state.lock().await.write_seq
    }
}

#[async_trait]
impl IngestStore for MemoryStore {
    async fn register_file(&self, meta: &FileMeta, content_hash: &str) -> MergeResult<Registration> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.files.values().find(|f| f.content_hash == content_hash) {
            return Ok(Registration::Duplicate {
                file_id: existing.file_id,
                processed: existing.is_processed(),
            });
        }

        let file_id = state.files.keys().next_back().map_or(1, |last| last + 1);
        state.files.insert(
            file_id,
            IngestedFile {
                file_id,
                provider: meta.provider.clone(),
                file_type: meta.file_type,
                track_code: meta.track_code.clone(),
                file_date: meta.file_date,
                file_name: meta.file_name.clone(),
                content_hash: content_hash.to_string(),
                received_at: Utc::now(),
                staged_at: None,
                processed_at: None,
            },
        );
        Ok(Registration::New(file_id))
    }

    async fn file(&self, file_id: FileId) -> MergeResult<Option<IngestedFile>> {
        Ok(self.state.lock().await.files.get(&file_id).cloned())
    }

    async fn files(&self) -> MergeResult<Vec<IngestedFile>> {
        Ok(self.state.lock().await.files.values().cloned().collect())
    }

    async fn mark_processed(&self, file_id: FileId) -> MergeResult<()> {
        self.state.lock().await.mark_processed(file_id)
    }

    async fn set_staged(&self, file_id: FileId, staged: bool) -> MergeResult<()> {
        let mut state = self.state.lock().await;
        let file = state.file_mut(file_id)?;
        file.staged_at = if staged {
            file.staged_at.or_else(|| Some(Utc::now()))
        } else {
            None
        };
        Ok(())
    }

    async fn stage_records(&self, records: &[StagedRecord]) -> MergeResult<Vec<StageOutcome>> {
        let mut state = self.state.lock().await;
        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            if !state.files.contains_key(&record.source_file_id) {
                return Err(MergeError::UnknownFile(record.source_file_id));
            }
            let key = (record.source_file_id, record.kind, record.natural_key.clone());
            let outcome = match state.staged.get(&key) {
                Some(existing) => StageOutcome {
                    stored_fingerprint: existing.row_fingerprint.clone(),
                    inserted: false,
                },
                None => {
                    state.staged.insert(key, record.clone());
                    StageOutcome {
                        stored_fingerprint: record.row_fingerprint.clone(),
                        inserted: true,
                    }
                }
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn record_rejections(&self, rejections: &[RejectedRecord]) -> MergeResult<()> {
        let mut state = self.state.lock().await;
        for rejection in rejections {
            let key = rejection.dedup_key();
            if !state.rejected.iter().any(|r| r.dedup_key() == key) {
                state.rejected.push(rejection.clone());
            }
        }
        Ok(())
    }

    async fn staged_records(&self, file_id: FileId) -> MergeResult<Vec<StagedRecord>> {
        Ok(self.state.lock().await.staged_for(file_id))
    }

    async fn rejected_records(&self, file_id: FileId) -> MergeResult<Vec<RejectedRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .rejected
            .iter()
            .filter(|r| r.source_file_id == file_id)
            .cloned()
            .collect())
    }

    async fn begin_merge(&self) -> MergeResult<Box<dyn MergeTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryMergeTx { guard, working }))
    }
}

struct MemoryMergeTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

impl MemoryMergeTx {
    fn check_references(&self, write: &CanonicalWrite) -> MergeResult<()> {
        for (column, value) in &write.identity {
            if let (Some(table), SqlValue::Uuid(id)) = (referenced_table(column), value) {
                if !self.working.rows.contains_key(&(table, *id)) {
                    return Err(MergeError::DanglingReference {
                        table: write.table,
                        natural_key: write.natural_key.clone(),
                        column: (*column).to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn record_fingerprint(&mut self, table: CanonicalTable, id: Uuid, segment: &Segment) {
        self.working
            .fingerprints
            .insert((table, id, segment.kind), segment.fingerprint.clone());
    }
}

#[async_trait]
impl MergeTransaction for MemoryMergeTx {
    async fn lock_file(&mut self, file_id: FileId) -> MergeResult<Option<FileStatus>> {
        Ok(self.working.files.get(&file_id).map(FileStatus::from))
    }

    async fn staged_records(&mut self, file_id: FileId) -> MergeResult<Vec<StagedRecord>> {
        Ok(self.working.staged_for(file_id))
    }

    async fn row_state(&mut self, table: CanonicalTable, id: Uuid, kind: Option<SourceKind>) -> MergeResult<RowState> {
        if !self.working.rows.contains_key(&(table, id)) {
            return Ok(RowState::Absent);
        }
        let fingerprint = kind.and_then(|k| self.working.fingerprints.get(&(table, id, k)).cloned());
        Ok(RowState::Present { fingerprint })
    }

    async fn insert_row(&mut self, write: &CanonicalWrite) -> MergeResult<()> {
        let natural = (write.table, write.natural_key.clone());
        if self.working.rows.contains_key(&(write.table, write.id)) || self.working.natural_keys.contains(&natural) {
            return Err(MergeError::UniquenessRaceCondition {
                table: write.table,
                natural_key: write.natural_key.clone(),
            });
        }
        self.check_references(write)?;

        self.working.write_seq += 1;
        let seq = self.working.write_seq;
        let values = write
            .all_columns()
            .map(|(column, value)| (*column, value.clone()))
            .collect();
        self.working.rows.insert(
            (write.table, write.id),
            MemoryRow {
                values,
                created_seq: seq,
                updated_seq: seq,
            },
        );
        self.working.natural_keys.insert(natural);
        if let Some(segment) = &write.segment {
            self.record_fingerprint(write.table, write.id, segment);
        }
        Ok(())
    }

    async fn update_segment(&mut self, write: &CanonicalWrite, segment: &Segment) -> MergeResult<()> {
        self.working.write_seq += 1;
        let seq = self.working.write_seq;
        let row = self
            .working
            .rows
            .get_mut(&(write.table, write.id))
            .ok_or_else(|| MergeError::DanglingReference {
                table: write.table,
                natural_key: write.natural_key.clone(),
                column: write.table.id_column().to_string(),
            })?;
        for (column, value) in &segment.columns {
            row.values.insert(*column, value.clone());
        }
        row.updated_seq = seq;
        self.record_fingerprint(write.table, write.id, segment);
        Ok(())
    }

    async fn mark_processed(&mut self, file_id: FileId) -> MergeResult<()> {
        self.working.mark_processed(file_id)
    }

    async fn commit(self: Box<Self>) -> MergeResult<()> {
        let MemoryMergeTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::identity::track_write;
    use crate::ledger::FileType;
    use hhml_common::types::TrackCode;

    #[tokio::test]
    async fn test_dropped_transaction_leaves_no_trace() {
        let store = MemoryStore::new();
        let code = TrackCode::parse(Some("CD")).unwrap();
        {
            let mut tx = store.begin_merge().await.unwrap();
            tx.insert_row(&track_write(&code)).await.unwrap();
        }
        assert_eq!(store.row_count(CanonicalTable::Track).await, 0);

        let mut tx = store.begin_merge().await.unwrap();
        tx.insert_row(&track_write(&code)).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.row_count(CanonicalTable::Track).await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_uniqueness_race() {
        let store = MemoryStore::new();
        let code = TrackCode::parse(Some("CD")).unwrap();
        let mut tx = store.begin_merge().await.unwrap();
        tx.insert_row(&track_write(&code)).await.unwrap();
        let err = tx.insert_row(&track_write(&code)).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_staging_never_overwrites() {
        let store = MemoryStore::new();
        let file_id = store
            .register_file(&FileMeta::new("equibase", FileType::Pp, "a.xml"), "h")
            .await
            .unwrap()
            .file_id();
        let record = StagedRecord {
            source_file_id: file_id,
            kind: SourceKind::PpRace,
            natural_key: "CD|2023-05-01|1".into(),
            payload: serde_json::json!({}),
            row_fingerprint: "aa".into(),
        };
        let changed = StagedRecord {
            row_fingerprint: "bb".into(),
            ..record.clone()
        };

        let first = store.stage_records(&[record]).await.unwrap();
        assert!(first[0].inserted);
        let second = store.stage_records(&[changed]).await.unwrap();
        assert!(!second[0].inserted);
        assert_eq!(second[0].stored_fingerprint, "aa");
    }
}
