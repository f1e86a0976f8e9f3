//! HHML Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, hashing utilities, and error handling for the racing-data
//! ingestion workspace.
//!
//! # Overview
//!
//! - **Error Handling**: Common error type and result alias
//! - **Checksums**: Whole-file content hashes used by the ingestion ledger
//! - **Fingerprints**: Normalised per-row digests used for change detection
//! - **Types**: Natural keys for tracks, races, entries, payouts and workouts
//!
//! # Example
//!
//! ```no_run
//! use hhml_common::checksum::file_hash;
//! use hhml_common::fingerprint::RowFields;
//!
//! fn example() -> hhml_common::Result<()> {
//!     let digest = file_hash(b"<chart/>");
//!     let row = RowFields::new()
//!         .required_text("track_code", Some("CD"))?
//!         .int("race_number", Some(1))
//!         .fingerprint()?;
//!     println!("{digest} {row}");
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{HhmlError, Result};
