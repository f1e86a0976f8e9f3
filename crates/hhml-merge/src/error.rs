//! Error types for staging and merging

use hhml_common::HhmlError;
use thiserror::Error;

use crate::ledger::FileId;
use crate::merge::ownership::CanonicalTable;
use crate::staging::SourceKind;

pub type MergeResult<T> = Result<T, MergeError>;

/// Errors raised while registering, staging or merging a provider file
#[derive(Error, Debug)]
pub enum MergeError {
    /// A row could not be keyed or fingerprinted
    #[error("Malformed {kind} record: {source}")]
    MalformedRecord {
        kind: SourceKind,
        #[source]
        source: HhmlError,
    },

    /// The same file produced two different rows for one natural key
    #[error(
        "Non-deterministic parse of file {file_id}: {kind} '{natural_key}' was staged as {stored} but re-parsed as {incoming}"
    )]
    NonDeterministicParse {
        file_id: FileId,
        kind: SourceKind,
        natural_key: String,
        stored: String,
        incoming: String,
    },

    /// A source kind tried to write a column it does not own
    #[error(
        "Canonical conflict on {table}.{column}: owned by {}, written by {attempted}",
        .owner.map(|k| k.as_str()).unwrap_or("no source kind")
    )]
    CanonicalConflict {
        table: CanonicalTable,
        column: String,
        owner: Option<SourceKind>,
        attempted: SourceKind,
    },

    /// Another transaction inserted the same natural key first
    #[error("Concurrent insert of {table} '{natural_key}'; retry the merge")]
    UniquenessRaceCondition {
        table: CanonicalTable,
        natural_key: String,
    },

    /// A canonical row points at a row that does not exist
    #[error("{table} '{natural_key}' references a missing row through {column}")]
    DanglingReference {
        table: CanonicalTable,
        natural_key: String,
        column: String,
    },

    #[error("File {0} is not registered in the ingestion ledger")]
    UnknownFile(FileId),

    /// Staging never completed for the file, or a re-parse disagreed with it
    #[error("File {0} is not fully staged; ingest it again")]
    IncompleteStaging(FileId),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Common(#[from] HhmlError),
}

impl MergeError {
    pub fn malformed(kind: SourceKind, source: HhmlError) -> Self {
        Self::MalformedRecord { kind, source }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Transient failures leave the file unprocessed and are worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, MergeError::UniquenessRaceCondition { .. })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_only_uniqueness_races_are_transient() {
        let race = MergeError::UniquenessRaceCondition {
            table: CanonicalTable::Race,
            natural_key: "CD|2023-05-01|1".into(),
        };
        assert!(race.is_transient());
        assert!(!MergeError::UnknownFile(7).is_transient());
        assert!(!MergeError::IncompleteStaging(7).is_transient());
    }

    #[test]
    fn test_conflict_message_names_both_kinds() {
        let err = MergeError::CanonicalConflict {
            table: CanonicalTable::Entry,
            column: "trainer".into(),
            owner: Some(SourceKind::PpEntry),
            attempted: SourceKind::ChartEntry,
        };
        let msg = err.to_string();
        assert!(msg.contains("entry.trainer"));
        assert!(msg.contains("pp_entry"));
        assert!(msg.contains("chart_entry"));
    }
}
