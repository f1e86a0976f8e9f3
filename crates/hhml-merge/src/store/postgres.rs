//! Postgres store
//!
//! Ledger and staging calls run on the pool. A merge transaction is a plain
//! `sqlx` transaction at the default isolation level; the natural-key unique
//! constraints decide which of two concurrent first inserts wins, and the
//! loser surfaces as `UniquenessRaceCondition` for the pipeline to retry.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgExecutor, PgPool};
use sqlx::{Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use super::{FileStatus, IngestStore, MergeTransaction, RowState};
use crate::error::{MergeError, MergeResult};
use crate::ledger::{FileId, FileMeta, IngestedFile, Registration};
use crate::merge::ownership::CanonicalTable;
use crate::merge::write::{CanonicalWrite, Segment, SqlValue};
use crate::staging::{RejectedRecord, SourceKind, StageOutcome, StagedRecord};

const FILE_COLUMNS: &str =
    "file_id, provider, file_type, track_code, file_date, file_name, content_hash, received_at, staged_at, processed_at";

#[derive(sqlx::FromRow)]
struct IngestedFileRow {
    file_id: i64,
    provider: String,
    file_type: String,
    track_code: Option<String>,
    file_date: Option<NaiveDate>,
    file_name: String,
    content_hash: String,
    received_at: DateTime<Utc>,
    staged_at: Option<DateTime<Utc>>,
    processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<IngestedFileRow> for IngestedFile {
    type Error = MergeError;

    fn try_from(row: IngestedFileRow) -> MergeResult<Self> {
        Ok(IngestedFile {
            file_id: row.file_id,
            provider: row.provider,
            file_type: row.file_type.parse()?,
            track_code: row.track_code,
            file_date: row.file_date,
            file_name: row.file_name,
            content_hash: row.content_hash,
            received_at: row.received_at,
            staged_at: row.staged_at,
            processed_at: row.processed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StagedRow {
    source_file_id: i64,
    source_kind: String,
    natural_key: String,
    payload: serde_json::Value,
    row_fingerprint: String,
}

impl TryFrom<StagedRow> for StagedRecord {
    type Error = MergeError;

    fn try_from(row: StagedRow) -> MergeResult<Self> {
        Ok(StagedRecord {
            source_file_id: row.source_file_id,
            kind: row.source_kind.parse()?,
            natural_key: row.natural_key,
            payload: row.payload,
            row_fingerprint: row.row_fingerprint,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RejectedRow {
    source_file_id: i64,
    source_kind: String,
    reason: String,
    payload: serde_json::Value,
}

async fn fetch_staged<'e, E: PgExecutor<'e>>(executor: E, file_id: FileId) -> MergeResult<Vec<StagedRecord>> {
    let rows: Vec<StagedRow> = sqlx::query_as(
        r#"
        SELECT source_file_id, source_kind, natural_key, payload, row_fingerprint
        FROM staged_record
        WHERE source_file_id = $1
        ORDER BY source_kind, natural_key
        "#,
    )
    .bind(file_id)
    .fetch_all(executor)
    .await?;

    rows.into_iter().map(StagedRecord::try_from).collect()
}

async fn stamp_processed<'e, E: PgExecutor<'e>>(executor: E, file_id: FileId) -> MergeResult<()> {
    let result = sqlx::query("UPDATE ingested_file SET processed_at = NOW() WHERE file_id = $1")
        .bind(file_id)
        .execute(executor)
        .await?;

    if result.rows_affected() == 0 {
        return Err(MergeError::UnknownFile(file_id));
    }
    Ok(())
}

/// Production store backed by a Postgres pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl IngestStore for PgStore {
    async fn register_file(&self, meta: &FileMeta, content_hash: &str) -> MergeResult<Registration> {
        let inserted: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO ingested_file (provider, file_type, track_code, file_date, file_name, content_hash)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (content_hash) DO NOTHING
            RETURNING file_id
            "#,
        )
        .bind(&meta.provider)
        .bind(meta.file_type.as_str())
        .bind(&meta.track_code)
        .bind(meta.file_date)
        .bind(&meta.file_name)
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(file_id) = inserted {
            return Ok(Registration::New(file_id));
        }

        let (file_id, processed): (i64, bool) =
            sqlx::query_as("SELECT file_id, processed_at IS NOT NULL FROM ingested_file WHERE content_hash = $1")
                .bind(content_hash)
                .fetch_one(&self.pool)
                .await?;

        Ok(Registration::Duplicate { file_id, processed })
    }

    async fn file(&self, file_id: FileId) -> MergeResult<Option<IngestedFile>> {
        let row: Option<IngestedFileRow> =
            sqlx::query_as(&format!("SELECT {FILE_COLUMNS} FROM ingested_file WHERE file_id = $1"))
                .bind(file_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(IngestedFile::try_from).transpose()
    }

    async fn files(&self) -> MergeResult<Vec<IngestedFile>> {
        let rows: Vec<IngestedFileRow> =
            sqlx::query_as(&format!("SELECT {FILE_COLUMNS} FROM ingested_file ORDER BY file_id"))
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(IngestedFile::try_from).collect()
    }

    async fn mark_processed(&self, file_id: FileId) -> MergeResult<()> {
        stamp_processed(&self.pool, file_id).await
    }

    async fn set_staged(&self, file_id: FileId, staged: bool) -> MergeResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE ingested_file
            SET staged_at = CASE WHEN $2 THEN COALESCE(staged_at, NOW()) ELSE NULL END
            WHERE file_id = $1
            "#,
        )
        .bind(file_id)
        .bind(staged)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MergeError::UnknownFile(file_id));
        }
        Ok(())
    }

    async fn stage_records(&self, records: &[StagedRecord]) -> MergeResult<Vec<StageOutcome>> {
        let mut tx = self.pool.begin().await?;
        let mut outcomes = Vec::with_capacity(records.len());

        for record in records {
            // The no-op update lets RETURNING report the row already stored
            let (stored_fingerprint, inserted): (String, bool) = sqlx::query_as(
                r#"
                INSERT INTO staged_record (source_file_id, source_kind, natural_key, payload, row_fingerprint)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (source_file_id, source_kind, natural_key)
                DO UPDATE SET natural_key = EXCLUDED.natural_key
                RETURNING row_fingerprint, (xmax = 0) AS inserted
                "#,
            )
            .bind(record.source_file_id)
            .bind(record.kind.as_str())
            .bind(&record.natural_key)
            .bind(&record.payload)
            .bind(&record.row_fingerprint)
            .fetch_one(&mut *tx)
            .await?;

            outcomes.push(StageOutcome {
                stored_fingerprint,
                inserted,
            });
        }

        tx.commit().await?;
        Ok(outcomes)
    }

    async fn record_rejections(&self, rejections: &[RejectedRecord]) -> MergeResult<()> {
        if rejections.is_empty() {
            return Ok(());
        }

        let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO rejected_record (source_file_id, source_kind, payload_hash, reason, payload) ",
        );
        query_builder.push_values(rejections, |mut b, rejected| {
            b.push_bind(rejected.source_file_id)
                .push_bind(rejected.kind.as_str())
                .push_bind(rejected.payload_hash())
                .push_bind(rejected.reason.clone())
                .push_bind(rejected.payload.clone());
        });
        query_builder.push(" ON CONFLICT (source_file_id, source_kind, payload_hash) DO NOTHING");
        query_builder.build().execute(&self.pool).await?;

        Ok(())
    }

    async fn staged_records(&self, file_id: FileId) -> MergeResult<Vec<StagedRecord>> {
        fetch_staged(&self.pool, file_id).await
    }

    async fn rejected_records(&self, file_id: FileId) -> MergeResult<Vec<RejectedRecord>> {
        let rows: Vec<RejectedRow> = sqlx::query_as(
            r#"
            SELECT source_file_id, source_kind, reason, payload
            FROM rejected_record
            WHERE source_file_id = $1
            ORDER BY rejected_id
            "#,
        )
        .bind(file_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(RejectedRecord {
                    source_file_id: row.source_file_id,
                    kind: row.source_kind.parse()?,
                    reason: row.reason,
                    payload: row.payload,
                })
            })
            .collect()
    }

    async fn begin_merge(&self) -> MergeResult<Box<dyn MergeTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgMergeTx { tx }))
    }
}

fn push_value(query_builder: &mut QueryBuilder<'_, Postgres>, value: &SqlValue) {
    match value {
        SqlValue::Text(v) | SqlValue::Verbatim(v) => query_builder.push_bind(v.clone()),
        SqlValue::Int(v) => query_builder.push_bind(*v),
        SqlValue::Float(v) => query_builder.push_bind(*v),
        SqlValue::Bool(v) => query_builder.push_bind(*v),
        SqlValue::Date(d) => query_builder.push_bind(*d),
        SqlValue::Uuid(u) => query_builder.push_bind(*u),
    };
}

/// Map constraint violations onto the merge error taxonomy
fn classify(err: sqlx::Error, write: &CanonicalWrite) -> MergeError {
    if let sqlx::Error::Database(db_err) = &err {
        // 40001: serialization_failure
        if db_err.is_unique_violation() || db_err.code().as_deref() == Some("40001") {
            return MergeError::UniquenessRaceCondition {
                table: write.table,
                natural_key: write.natural_key.clone(),
            };
        }
        if db_err.is_foreign_key_violation() {
            return MergeError::DanglingReference {
                table: write.table,
                natural_key: write.natural_key.clone(),
                column: db_err.constraint().unwrap_or("foreign key").to_string(),
            };
        }
    }
    MergeError::Database(err)
}

struct PgMergeTx {
    tx: Transaction<'static, Postgres>,
}

impl PgMergeTx {
    async fn store_fingerprint(&mut self, table: CanonicalTable, id: Uuid, segment: &Segment) -> MergeResult<()> {
        sqlx::query(
            r#"
            INSERT INTO canonical_fingerprint (entity_table, entity_id, source_kind, row_fingerprint, source_file_id)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (entity_table, entity_id, source_kind)
            DO UPDATE SET row_fingerprint = EXCLUDED.row_fingerprint,
                          source_file_id = EXCLUDED.source_file_id,
                          merged_at = NOW()
            "#,
        )
        .bind(table.table_name())
        .bind(id)
        .bind(segment.kind.as_str())
        .bind(&segment.fingerprint)
        .bind(segment.source_file_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl MergeTransaction for PgMergeTx {
    async fn lock_file(&mut self, file_id: FileId) -> MergeResult<Option<FileStatus>> {
        let flags: Option<(bool, bool)> = sqlx::query_as(
            r#"
            SELECT staged_at IS NOT NULL, processed_at IS NOT NULL
            FROM ingested_file
            WHERE file_id = $1
            FOR UPDATE
            "#,
        )
        .bind(file_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(flags.map(|(staged, processed)| FileStatus { staged, processed }))
    }

    async fn staged_records(&mut self, file_id: FileId) -> MergeResult<Vec<StagedRecord>> {
        fetch_staged(&mut *self.tx, file_id).await
    }

    async fn row_state(&mut self, table: CanonicalTable, id: Uuid, kind: Option<SourceKind>) -> MergeResult<RowState> {
        let exists: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE {} = $1)",
            table.table_name(),
            table.id_column()
        ))
        .bind(id)
        .fetch_one(&mut *self.tx)
        .await?;

        if !exists {
            return Ok(RowState::Absent);
        }

        let fingerprint = match kind {
            Some(kind) => {
                sqlx::query_scalar(
                    r#"
                    SELECT row_fingerprint FROM canonical_fingerprint
                    WHERE entity_table = $1 AND entity_id = $2 AND source_kind = $3
                    "#,
                )
                .bind(table.table_name())
                .bind(id)
                .bind(kind.as_str())
                .fetch_optional(&mut *self.tx)
                .await?
            }
            None => None,
        };

        Ok(RowState::Present { fingerprint })
    }

    async fn insert_row(&mut self, write: &CanonicalWrite) -> MergeResult<()> {
        let columns: Vec<&str> = std::iter::once(write.table.id_column())
            .chain(write.all_columns().map(|(column, _)| *column))
            .collect();

        let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {} ({}) VALUES (",
            write.table.table_name(),
            columns.join(", ")
        ));
        query_builder.push_bind(write.id);
        for (_, value) in write.all_columns() {
            query_builder.push(", ");
            push_value(&mut query_builder, value);
        }
        query_builder.push(")");

        query_builder
            .build()
            .execute(&mut *self.tx)
            .await
            .map_err(|e| classify(e, write))?;

        if let Some(segment) = &write.segment {
            self.store_fingerprint(write.table, write.id, segment).await?;
        }
        Ok(())
    }

    async fn update_segment(&mut self, write: &CanonicalWrite, segment: &Segment) -> MergeResult<()> {
        let mut query_builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("UPDATE {} SET ", write.table.table_name()));
        for (column, value) in &segment.columns {
            query_builder.push(column).push(" = ");
            push_value(&mut query_builder, value);
            query_builder.push(", ");
        }
        query_builder
            .push("updated_at = NOW() WHERE ")
            .push(write.table.id_column())
            .push(" = ")
            .push_bind(write.id);

        query_builder
            .build()
            .execute(&mut *self.tx)
            .await
            .map_err(|e| classify(e, write))?;

        self.store_fingerprint(write.table, write.id, segment).await
    }

    async fn mark_processed(&mut self, file_id: FileId) -> MergeResult<()> {
        stamp_processed(&mut *self.tx, file_id).await
    }

    async fn commit(self: Box<Self>) -> MergeResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
