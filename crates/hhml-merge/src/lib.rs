//! HHML Merge Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Reconciles parsed racing-data files into canonical tables.
//!
//! # Overview
//!
//! - **Ledger**: one row per received file, deduplicated by content hash
//! - **Staging**: parser rows held per (file, kind, natural key)
//! - **Identity**: deterministic surrogate ids from natural keys
//! - **Merge**: fingerprint-gated, ownership-checked canonical writes in one
//!   transaction per file
//! - **Pipeline**: batch staging and merging with retry
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use hhml_merge::config::IngestSettings;
//! use hhml_merge::pipeline::{IngestPipeline, IngestRequest};
//! use hhml_merge::store::memory::MemoryStore;
//!
//! async fn example() -> hhml_merge::MergeResult<()> {
//!     let settings = IngestSettings::default();
//!     let pipeline = IngestPipeline::new(Arc::new(MemoryStore::new()), settings.clone());
//!     let request = IngestRequest::from_path("data/chart_2023-05-01_CD.xml", &settings)?;
//!     let outcome = pipeline.ingest_file(&request).await?;
//!     println!("{outcome:?}");
//!     Ok(())
//! }
//! ```

pub mod canonical;
pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod merge;
pub mod pipeline;
pub mod staging;
pub mod store;

pub use error::{MergeError, MergeResult};
pub use ledger::{FileId, FileMeta, FileType, Ledger, Registration};
pub use merge::{MergeEngine, MergeReport};
pub use pipeline::{BatchReport, IngestOutcome, IngestPipeline, IngestRequest};
pub use staging::{ParsedRow, SourceKind, StageReport, Stager};
