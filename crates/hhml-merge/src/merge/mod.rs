//! Staging → canonical reconciliation
//!
//! - [`ownership`]: which source kind may write each canonical column
//! - [`write`]: planned writes and their segment fingerprints
//! - [`plan`]: staged row → planned writes
//! - [`engine`]: the per-file transactional merge

pub mod engine;
pub mod ownership;
pub mod plan;
pub mod write;

pub use engine::{MergeEngine, MergeReport, TableCounts};
pub use ownership::CanonicalTable;
pub use write::{CanonicalWrite, Segment, SqlValue};
