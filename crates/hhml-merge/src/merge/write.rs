//! Planned canonical writes
//!
//! A [`CanonicalWrite`] targets one canonical row by surrogate id. Its
//! identity columns are written only when the row is first inserted; its
//! optional [`Segment`] is the set of columns one source kind owns on that
//! row, together with the fingerprint the merge engine compares against the
//! fingerprint stored for the last merge of that kind.

use chrono::NaiveDate;
use hhml_common::fingerprint::{normalize_text, RowFields};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{MergeError, MergeResult};
use crate::ledger::FileId;
use crate::merge::ownership::CanonicalTable;
use crate::staging::SourceKind;

/// A typed column value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Text(Option<String>),
    /// Text whose casing is significant (odds, times, wager combinations)
    Verbatim(Option<String>),
    Int(Option<i32>),
    Float(Option<f64>),
    Bool(Option<bool>),
    Date(NaiveDate),
    Uuid(Uuid),
}

impl SqlValue {
    /// Trimmed, whitespace-collapsed text; blank becomes NULL
    pub fn text(raw: Option<&str>) -> Self {
        SqlValue::Text(raw.and_then(normalize_text))
    }

    /// Like [`SqlValue::text`], but fingerprinted without case folding
    pub fn verbatim(raw: Option<&str>) -> Self {
        SqlValue::Verbatim(raw.and_then(normalize_text))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(v) | SqlValue::Verbatim(v) => v.as_deref(),
            _ => None,
        }
    }

    fn fingerprint_into(&self, fields: RowFields, name: &str) -> hhml_common::Result<RowFields> {
        match self {
            SqlValue::Text(v) => Ok(fields.text(name, v.as_deref())),
            SqlValue::Verbatim(v) => Ok(fields.verbatim(name, v.as_deref())),
            SqlValue::Int(v) => Ok(fields.int(name, *v)),
            SqlValue::Float(v) => fields.float(name, *v),
            SqlValue::Bool(v) => Ok(fields.flag(name, *v)),
            SqlValue::Date(d) => Ok(fields.date(name, Some(*d))),
            SqlValue::Uuid(u) => Ok(fields.verbatim(name, Some(&u.to_string()))),
        }
    }
}

pub type Column = (&'static str, SqlValue);

/// Columns one source kind owns on a canonical row
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub kind: SourceKind,
    pub columns: Vec<Column>,
    pub fingerprint: String,
    pub source_file_id: FileId,
}

impl Segment {
    pub fn new(kind: SourceKind, source_file_id: FileId, columns: Vec<Column>) -> MergeResult<Self> {
        let fields = columns
            .iter()
            .try_fold(RowFields::new(), |acc, (name, value)| value.fingerprint_into(acc, name))
            .map_err(|e| MergeError::malformed(kind, e))?;
        Ok(Self {
            kind,
            fingerprint: fields.fingerprint()?,
            columns,
            source_file_id,
        })
    }

    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|(name, _)| *name)
    }
}

/// One planned write against a canonical row
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalWrite {
    pub table: CanonicalTable,
    pub id: Uuid,
    /// Human-readable key for logs and errors
    pub natural_key: String,
    pub identity: Vec<Column>,
    pub segment: Option<Segment>,
}

impl CanonicalWrite {
    pub fn identity(table: CanonicalTable, id: Uuid, natural_key: String, identity: Vec<Column>) -> Self {
        Self {
            table,
            id,
            natural_key,
            identity,
            segment: None,
        }
    }

    pub fn with_segment(mut self, segment: Segment) -> Self {
        self.segment = Some(segment);
        self
    }

    /// Merge order; scratches apply after the entries they flag
    pub fn rank(&self) -> u8 {
        match &self.segment {
            Some(segment) if segment.kind == SourceKind::ChartScratch => CanonicalTable::Result.merge_rank(),
            _ => self.table.merge_rank(),
        }
    }

    /// Sort key: dependency rank, then segment writes ahead of bare identities
    pub fn order_key(&self) -> (u8, CanonicalTable, bool, Option<SourceKind>) {
        (
            self.rank(),
            self.table,
            self.segment.is_none(),
            self.segment.as_ref().map(|s| s.kind),
        )
    }

    /// Identity columns followed by segment columns
    pub fn all_columns(&self) -> impl Iterator<Item = &Column> {
        self.identity
            .iter()
            .chain(self.segment.iter().flat_map(|s| s.columns.iter()))
    }
}
