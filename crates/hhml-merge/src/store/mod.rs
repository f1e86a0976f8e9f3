//! Storage seam
//!
//! [`IngestStore`] covers the ledger and staging tables; [`MergeTransaction`]
//! is one file's atomic merge unit against the canonical tables. Dropping a
//! transaction without calling [`MergeTransaction::commit`] discards every
//! write made through it.
//!
//! - [`postgres::PgStore`]: production, Postgres through `sqlx`
//! - [`memory::MemoryStore`]: in-process, used by tests and `--dry-run`

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::MergeResult;
use crate::ledger::{FileId, FileMeta, IngestedFile, Registration};
use crate::merge::ownership::CanonicalTable;
use crate::merge::write::{CanonicalWrite, Segment};
use crate::staging::{RejectedRecord, SourceKind, StageOutcome, StagedRecord};

/// Ledger and staging persistence
#[async_trait]
pub trait IngestStore: Send + Sync {
    /// Insert a ledger row unless `content_hash` is already registered
    async fn register_file(&self, meta: &FileMeta, content_hash: &str) -> MergeResult<Registration>;

    async fn file(&self, file_id: FileId) -> MergeResult<Option<IngestedFile>>;

    /// All ledger rows, ordered by file id
    async fn files(&self) -> MergeResult<Vec<IngestedFile>>;

    async fn mark_processed(&self, file_id: FileId) -> MergeResult<()>;

    /// Set or clear the file's `staged_at` stamp
    async fn set_staged(&self, file_id: FileId, staged: bool) -> MergeResult<()>;

    /// Insert each record unless its (file, kind, key) is already staged
    ///
    /// Returns, in input order, the fingerprint the store holds for each key
    /// afterwards and whether this call inserted it. Existing rows are never
    /// overwritten.
    async fn stage_records(&self, records: &[StagedRecord]) -> MergeResult<Vec<StageOutcome>>;

    /// Record skipped rows; a rejection already logged for the same file,
    /// kind and payload is not logged again
    async fn record_rejections(&self, rejections: &[RejectedRecord]) -> MergeResult<()>;

    async fn staged_records(&self, file_id: FileId) -> MergeResult<Vec<StagedRecord>>;

    async fn rejected_records(&self, file_id: FileId) -> MergeResult<Vec<RejectedRecord>>;

    /// Open a merge transaction
    async fn begin_merge(&self) -> MergeResult<Box<dyn MergeTransaction>>;
}

/// Ledger flags of a locked file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStatus {
    pub staged: bool,
    pub processed: bool,
}

impl From<&IngestedFile> for FileStatus {
    fn from(file: &IngestedFile) -> Self {
        Self {
            staged: file.is_staged(),
            processed: file.is_processed(),
        }
    }
}

/// What the canonical store holds for a row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowState {
    Absent,
    /// The row exists; `fingerprint` is the last merged fingerprint of the
    /// requested source kind, if that kind has ever written it
    Present { fingerprint: Option<String> },
}

/// One file's merge, committed or discarded as a unit
#[async_trait]
pub trait MergeTransaction: Send {
    /// Lock the file's ledger row for the rest of the transaction
    ///
    /// `None` if the file is not registered.
    async fn lock_file(&mut self, file_id: FileId) -> MergeResult<Option<FileStatus>>;

    async fn staged_records(&mut self, file_id: FileId) -> MergeResult<Vec<StagedRecord>>;

    async fn row_state(&mut self, table: CanonicalTable, id: Uuid, kind: Option<SourceKind>) -> MergeResult<RowState>;

    /// Insert a new row with its identity and segment columns, and record the
    /// segment fingerprint
    ///
    /// Fails with `UniquenessRaceCondition` if the natural key already exists.
    async fn insert_row(&mut self, write: &CanonicalWrite) -> MergeResult<()>;

    /// Overwrite one segment's columns and its stored fingerprint
    async fn update_segment(&mut self, write: &CanonicalWrite, segment: &Segment) -> MergeResult<()>;

    async fn mark_processed(&mut self, file_id: FileId) -> MergeResult<()>;

    async fn commit(self: Box<Self>) -> MergeResult<()>;
}
