//! Batch ingestion pipeline
//!
//! hash → register → (duplicate short-circuit) → read parser rows → stage →
//! merge. Files are staged concurrently; merges run with their own, usually
//! smaller, concurrency bound and are retried when they lose a uniqueness
//! race to another merge.
//!
//! A file that is registered but never finished merging (a crash, a failed
//! stage or a failed merge in an earlier run) is not treated as a duplicate:
//! its rows are staged again, which is a no-op for rows already staged, and
//! the merge is retried.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use hhml_common::checksum::file_hash;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::IngestSettings;
use crate::error::MergeResult;
use crate::ledger::{FileId, FileMeta, Ledger, Registration};
use crate::merge::{MergeEngine, MergeReport};
use crate::staging::{ParsedRow, StageReport, Stager};
use crate::store::IngestStore;

/// Parser output path for a provider file: `<file>.<extension>`
pub fn rows_path_for(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

/// Read a JSON Lines file of tagged parser rows
pub fn read_rows(path: &Path) -> MergeResult<Vec<ParsedRow>> {
    let rows = serde_jsonlines::json_lines(path)?.collect::<std::io::Result<Vec<ParsedRow>>>()?;
    Ok(rows)
}

async fn read_rows_blocking(path: PathBuf) -> MergeResult<Vec<ParsedRow>> {
    tokio::task::spawn_blocking(move || read_rows(&path))
        .await
        .map_err(std::io::Error::from)?
}

/// One provider file and its parser output
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub path: PathBuf,
    pub rows_path: PathBuf,
    pub meta: FileMeta,
}

impl IngestRequest {
    /// Infer metadata from the file name and locate rows next to the file
    pub fn from_path(path: impl Into<PathBuf>, settings: &IngestSettings) -> MergeResult<Self> {
        let path = path.into();
        let meta = FileMeta::from_path(&path, &settings.provider)?;
        let rows_path = rows_path_for(&path, &settings.rows_extension);
        Ok(Self { path, rows_path, meta })
    }

    pub fn with_rows_path(mut self, rows_path: impl Into<PathBuf>) -> Self {
        self.rows_path = rows_path.into();
        self
    }

    pub fn with_meta(mut self, meta: FileMeta) -> Self {
        self.meta = meta;
        self
    }
}

/// What happened to one file
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// The content was already merged under `file_id`
    Duplicate { file_id: FileId },
    /// `stage` is `None` when merging rows staged by an earlier run
    Merged {
        file_id: FileId,
        stage: Option<StageReport>,
        merge: MergeReport,
    },
}

impl IngestOutcome {
    pub fn file_id(&self) -> FileId {
        match self {
            IngestOutcome::Duplicate { file_id } | IngestOutcome::Merged { file_id, .. } => *file_id,
        }
    }
}

#[derive(Debug)]
pub struct FileOutcome {
    pub file_name: String,
    pub result: MergeResult<IngestOutcome>,
}

/// Per-file results of a batch, in input order
#[derive(Debug, Default)]
pub struct BatchReport {
    pub files: Vec<FileOutcome>,
}

impl BatchReport {
    pub fn merged(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f.result, Ok(IngestOutcome::Merged { .. })))
            .count()
    }

    pub fn duplicates(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f.result, Ok(IngestOutcome::Duplicate { .. })))
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileOutcome> {
        self.files.iter().filter(|f| f.result.is_err())
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }
}

enum Staged {
    Duplicate(FileId),
    Ready { file_id: FileId, stage: StageReport },
}

/// Ledger, stager and merge engine over one store
#[derive(Clone)]
pub struct IngestPipeline {
    ledger: Ledger,
    stager: Stager,
    engine: MergeEngine,
    settings: IngestSettings,
}

impl IngestPipeline {
    pub fn new(store: Arc<dyn IngestStore>, settings: IngestSettings) -> Self {
        Self {
            ledger: Ledger::new(store.clone()),
            stager: Stager::new(store.clone()),
            engine: MergeEngine::new(store),
            settings,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn engine(&self) -> &MergeEngine {
        &self.engine
    }

    /// Ingest a file already in memory together with its parsed rows
    pub async fn ingest_bytes(&self, meta: &FileMeta, bytes: &[u8], rows: Vec<ParsedRow>) -> MergeResult<IngestOutcome> {
        let staged = match self.ledger.register_file(meta, &file_hash(bytes)).await? {
            Registration::Duplicate { file_id, processed: true } => Staged::Duplicate(file_id),
            registration => Staged::Ready {
                file_id: registration.file_id(),
                stage: self.stager.stage(registration.file_id(), rows).await?,
            },
        };
        self.finish(staged).await
    }

    /// Ingest one provider file from disk
    #[tracing::instrument(skip(self, request), fields(path = %request.path.display()))]
    pub async fn ingest_file(&self, request: &IngestRequest) -> MergeResult<IngestOutcome> {
        let staged = self.stage_file(request).await?;
        self.finish(staged).await
    }

    async fn stage_file(&self, request: &IngestRequest) -> MergeResult<Staged> {
        let bytes = tokio::fs::read(&request.path).await?;
        let content_hash = file_hash(&bytes);

        match self.ledger.register_file(&request.meta, &content_hash).await? {
            Registration::Duplicate { file_id, processed: true } => Ok(Staged::Duplicate(file_id)),
            registration => {
                let file_id = registration.file_id();
                if !registration.is_new() {
                    warn!(file_id, "File registered by an earlier run but never merged; staging again");
                }
                let rows = read_rows_blocking(request.rows_path.clone()).await?;
                let stage = self.stager.stage(file_id, rows).await?;
                Ok(Staged::Ready { file_id, stage })
            }
        }
    }

    async fn finish(&self, staged: Staged) -> MergeResult<IngestOutcome> {
        match staged {
            Staged::Duplicate(file_id) => Ok(IngestOutcome::Duplicate { file_id }),
            Staged::Ready { file_id, stage } => {
                let merge = self.merge_with_retry(file_id).await?;
                Ok(IngestOutcome::Merged {
                    file_id,
                    stage: Some(stage),
                    merge,
                })
            }
        }
    }

    /// Merge a file, retrying transient failures with linear backoff
    pub async fn merge_with_retry(&self, file_id: FileId) -> MergeResult<MergeReport> {
        let mut attempt: u32 = 0;
        loop {
            match self.engine.merge_file(file_id).await {
                Err(e) if e.is_transient() && attempt < self.settings.merge_max_retries => {
                    attempt += 1;
                    let delay = Duration::from_millis(self.settings.retry_backoff_ms * u64::from(attempt));
                    warn!(
                        file_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Merge lost a uniqueness race; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }

    /// Stage every file, then merge the staged ones
    ///
    /// One file's failure does not stop the others. Files whose content
    /// repeats an earlier file in the same batch are reported as duplicates.
    pub async fn run_batch(&self, requests: Vec<IngestRequest>) -> BatchReport {
        info!(files = requests.len(), "Starting batch");

        let staged: Vec<(String, MergeResult<Staged>)> = stream::iter(requests)
            .map(|request| async move {
                let result = self.stage_file(&request).await;
                (request.meta.file_name, result)
            })
            .buffered(self.settings.stage_concurrency.max(1))
            .collect()
            .await;

        let mut seen = HashSet::new();
        let staged: Vec<(String, MergeResult<Staged>)> = staged
            .into_iter()
            .map(|(file_name, result)| match result {
                Ok(Staged::Ready { file_id, .. }) if !seen.insert(file_id) => {
                    (file_name, Ok(Staged::Duplicate(file_id)))
                }
                other => (file_name, other),
            })
            .collect();

        let files: Vec<FileOutcome> = stream::iter(staged)
            .map(|(file_name, result)| async move {
                let result = match result {
                    Ok(staged) => self.finish(staged).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = &result {
                    error!(file_name = %file_name, error = %e, "File failed");
                }
                FileOutcome { file_name, result }
            })
            .buffered(self.settings.merge_concurrency.max(1))
            .collect()
            .await;

        let report = BatchReport { files };
        info!(
            merged = report.merged(),
            duplicates = report.duplicates(),
            failed = report.failures().count(),
            "Batch complete"
        );
        report
    }

    /// Merge every registered file that has not been processed, from its
    /// already-staged rows
    ///
    /// Files whose staging never completed are reported as
    /// [`crate::MergeError::IncompleteStaging`] failures and stay unprocessed
    /// until they are ingested again.
    pub async fn resume(&self) -> MergeResult<BatchReport> {
        let pending = self.ledger.unprocessed().await?;
        info!(files = pending.len(), "Resuming unprocessed files");

        let files = stream::iter(pending)
            .map(|file| async move {
                let result = self
                    .merge_with_retry(file.file_id)
                    .await
                    .map(|merge| IngestOutcome::Merged {
                        file_id: file.file_id,
                        stage: None,
                        merge,
                    });
                if let Err(e) = &result {
                    error!(file_id = file.file_id, error = %e, "Resume failed");
                }
                FileOutcome {
                    file_name: file.file_name,
                    result,
                }
            })
            .buffered(self.settings.merge_concurrency.max(1))
            .collect()
            .await;

        Ok(BatchReport { files })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::IngestSettings;
    use std::io::Write;

    #[test]
    fn test_rows_path_appends_extension() {
        let path = rows_path_for(Path::new("/data/pp_2023-05-01_CD.xml"), "rows.jsonl");
        assert_eq!(path, PathBuf::from("/data/pp_2023-05-01_CD.xml.rows.jsonl"));
    }

    #[test]
    fn test_request_infers_meta() {
        let request = IngestRequest::from_path("/data/chart_2023-05-01_CD.xml", &IngestSettings::default()).unwrap();
        assert_eq!(request.meta.file_type, crate::ledger::FileType::Chart);
        assert_eq!(request.rows_path, PathBuf::from("/data/chart_2023-05-01_CD.xml.rows.jsonl"));
    }

    #[test]
    fn test_read_rows_parses_tagged_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"kind":"pp_race","track_code":"CD","race_date":"2023-05-01","race_number":1}}"#
        )
        .unwrap();
        writeln!(
            file,
            r#"{{"kind":"chart_scratch","track_code":"CD","race_date":"20230501","race_number":1,"program_number":"5"}}"#
        )
        .unwrap();

        let rows = read_rows(file.path()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].kind(), crate::staging::SourceKind::ChartScratch);
    }
}
