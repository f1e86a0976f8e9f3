//! Ingestion ledger
//!
//! One row per distinct file body. The content hash is unique, so the same
//! bytes delivered twice (under any name) register once. `staged_at` is set
//! once all of the file's rows are staged, and `processed_at` stays null until
//! the file's merge transaction commits. A staged file whose merge never
//! committed is eligible for [`crate::pipeline::IngestPipeline::resume`]; an
//! unstaged one has to be ingested again.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{MergeError, MergeResult};
use crate::store::IngestStore;

/// Ledger row id; every staged row and canonical fingerprint points at one
pub type FileId = i64;

/// Past-performance (pre-race) or result chart (post-race)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pp,
    Chart,
}

impl FileType {
    pub fn as_str(self) -> &'static str {
        match self {
            FileType::Pp => "pp",
            FileType::Chart => "chart",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileType {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pp" | "past_performance" | "past-performance" => Ok(FileType::Pp),
            "chart" | "result" | "results" => Ok(FileType::Chart),
            other => Err(MergeError::config(format!("Unknown file type: {other}"))),
        }
    }
}

/// What the caller knows about a file before it is hashed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMeta {
    pub provider: String,
    pub file_type: FileType,
    pub track_code: Option<String>,
    pub file_date: Option<NaiveDate>,
    pub file_name: String,
}

impl FileMeta {
    pub fn new(provider: impl Into<String>, file_type: FileType, file_name: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            file_type,
            track_code: None,
            file_date: None,
            file_name: file_name.into(),
        }
    }

    /// Infer file type, track and date from a provider file name
    ///
    /// Recognises `SIMD20230501CD_...` past-performance extracts and
    /// `pp_2023-05-01_CD` / `chart_2023-05-01_CD` names. Anything else is
    /// treated as a past-performance file with no track or date; callers
    /// override with [`FileMeta::with_file_type`] and friends.
    pub fn from_path(path: &Path, provider: &str) -> MergeResult<Self> {
        let simd_pattern = Regex::new(r"(?i)^SIMD(\d{8})([A-Z]{2,3})")?;
        let dated_pattern = Regex::new(r"(?i)^(pp|chart)_(\d{4}-\d{2}-\d{2})_([A-Z]{2,4})")?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut meta = FileMeta::new(provider, FileType::Pp, file_name);

        if let Some(caps) = simd_pattern.captures(&stem) {
            meta.file_date = NaiveDate::parse_from_str(&caps[1], "%Y%m%d").ok();
            meta.track_code = Some(caps[2].to_uppercase());
        } else if let Some(caps) = dated_pattern.captures(&stem) {
            if caps[1].eq_ignore_ascii_case("chart") {
                meta.file_type = FileType::Chart;
            }
            meta.file_date = NaiveDate::parse_from_str(&caps[2], "%Y-%m-%d").ok();
            meta.track_code = Some(caps[3].to_uppercase());
        }

        Ok(meta)
    }

    pub fn with_file_type(mut self, file_type: FileType) -> Self {
        self.file_type = file_type;
        self
    }

    pub fn with_track(mut self, track_code: impl Into<String>) -> Self {
        self.track_code = Some(track_code.into().trim().to_uppercase());
        self
    }

    pub fn with_date(mut self, file_date: NaiveDate) -> Self {
        self.file_date = Some(file_date);
        self
    }
}

/// A ledger row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestedFile {
    pub file_id: FileId,
    pub provider: String,
    pub file_type: FileType,
    pub track_code: Option<String>,
    pub file_date: Option<NaiveDate>,
    pub file_name: String,
    pub content_hash: String,
    pub received_at: DateTime<Utc>,
    pub staged_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl IngestedFile {
    pub fn is_staged(&self) -> bool {
        self.staged_at.is_some()
    }

    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }
}

/// Outcome of [`Ledger::register_file`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// First sighting of these bytes
    New(FileId),
    /// The bytes were registered before, possibly under another name
    Duplicate { file_id: FileId, processed: bool },
}

impl Registration {
    pub fn file_id(&self) -> FileId {
        match *self {
            Registration::New(file_id) | Registration::Duplicate { file_id, .. } => file_id,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Registration::New(_))
    }
}

/// Ledger operations over an [`IngestStore`]
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn IngestStore>,
}

impl Ledger {
    pub fn new(store: Arc<dyn IngestStore>) -> Self {
        Self { store }
    }

    /// Insert the file unless its content hash is already known
    #[tracing::instrument(skip(self, meta), fields(file_name = %meta.file_name))]
    pub async fn register_file(&self, meta: &FileMeta, content_hash: &str) -> MergeResult<Registration> {
        let registration = self.store.register_file(meta, content_hash).await?;
        match registration {
            Registration::New(file_id) => {
                tracing::info!(file_id, file_type = %meta.file_type, "Registered new file");
            }
            Registration::Duplicate { file_id, processed } => {
                tracing::info!(file_id, processed, "Duplicate file content; already registered");
            }
        }
        Ok(registration)
    }

    /// Stamp `processed_at` outside a merge transaction
    ///
    /// The merge engine stamps the ledger inside its own transaction; this is
    /// for operators repairing a ledger by hand.
    pub async fn mark_processed(&self, file_id: FileId) -> MergeResult<()> {
        self.store.mark_processed(file_id).await
    }

    pub async fn is_processed(&self, file_id: FileId) -> MergeResult<bool> {
        match self.store.file(file_id).await? {
            Some(file) => Ok(file.is_processed()),
            None => Err(MergeError::UnknownFile(file_id)),
        }
    }

    pub async fn file(&self, file_id: FileId) -> MergeResult<Option<IngestedFile>> {
        self.store.file(file_id).await
    }

    pub async fn files(&self) -> MergeResult<Vec<IngestedFile>> {
        self.store.files().await
    }

    pub async fn is_staged(&self, file_id: FileId) -> MergeResult<bool> {
        match self.store.file(file_id).await? {
            Some(file) => Ok(file.is_staged()),
            None => Err(MergeError::UnknownFile(file_id)),
        }
    }

    /// Registered files whose merge has not committed, oldest first
    ///
    /// Includes files whose staging never completed; see
    /// [`IngestedFile::is_staged`].
    pub async fn unprocessed(&self) -> MergeResult<Vec<IngestedFile>> {
        let mut files = self.store.files().await?;
        files.retain(|f| !f.is_processed());
        files.sort_by_key(|f| f.file_id);
        Ok(files)
    }
}
