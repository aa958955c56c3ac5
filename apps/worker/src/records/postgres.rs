use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::{FromRow, PgExecutor, PgPool};
use tracing::{debug, warn};

use crate::errors::{AppError, Result};
use crate::records::backend::{LiveRowUpdate, RecordBackend, SortKeyCondition};
use crate::records::model::{EntryStatus, StoredRow};

const SELECT_COLUMNS: &str = "partition_key, sort_key, entity_id, latest_version, entry_status, \
     create_date, update_date, updated_by, attributes";

#[derive(Debug, FromRow)]
struct RecordRow {
    partition_key: String,
    sort_key: String,
    entity_id: String,
    latest_version: i64,
    entry_status: String,
    create_date: Option<DateTime<Utc>>,
    update_date: Option<DateTime<Utc>>,
    updated_by: Option<String>,
    attributes: Json<Map<String, Value>>,
}

impl TryFrom<RecordRow> for StoredRow {
    type Error = AppError;

    fn try_from(row: RecordRow) -> Result<Self> {
        Ok(StoredRow {
            partition_key: row.partition_key,
            sort_key: row.sort_key,
            entity_id: row.entity_id,
            latest_version: row.latest_version,
            entry_status: row.entry_status.parse()?,
            create_date: row.create_date,
            update_date: row.update_date,
            updated_by: row.updated_by,
            attributes: row.attributes.0,
        })
    }
}

/// `versioned_records` table on PostgreSQL. Updates run in one sqlx transaction.
#[derive(Clone)]
pub struct PgRecordBackend {
    pool: PgPool,
}

impl PgRecordBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn insert_row<'e, E: PgExecutor<'e>>(executor: E, row: &StoredRow) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO versioned_records
            (partition_key, sort_key, entity_id, latest_version, entry_status,
             create_date, update_date, updated_by, attributes)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(&row.partition_key)
    .bind(&row.sort_key)
    .bind(&row.entity_id)
    .bind(row.latest_version)
    .bind(row.entry_status.as_str())
    .bind(row.create_date)
    .bind(row.update_date)
    .bind(&row.updated_by)
    .bind(Json(&row.attributes))
    .execute(executor)
    .await?;
    Ok(())
}

fn into_stored(rows: Vec<RecordRow>) -> Result<Vec<StoredRow>> {
    rows.into_iter().map(StoredRow::try_from).collect()
}

#[async_trait]
impl RecordBackend for PgRecordBackend {
    async fn query(
        &self,
        partition_key: &str,
        condition: &SortKeyCondition,
        status: Option<EntryStatus>,
    ) -> Result<Vec<StoredRow>> {
        let (predicate, operand) = match condition {
            SortKeyCondition::Equals(key) => ("sort_key = $2", key),
            SortKeyCondition::BeginsWith(prefix) => ("starts_with(sort_key, $2)", prefix),
        };
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM versioned_records \
             WHERE partition_key = $1 AND {predicate} \
               AND ($3::TEXT IS NULL OR entry_status = $3) \
             ORDER BY sort_key"
        );

        let rows: Vec<RecordRow> = sqlx::query_as(&sql)
            .bind(partition_key)
            .bind(operand)
            .bind(status.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await?;

        debug!("[{partition_key}] query {condition:?} returned {} rows", rows.len());
        into_stored(rows)
    }

    async fn query_by_entity_id(
        &self,
        partition_key: &str,
        entity_id: &str,
    ) -> Result<Vec<StoredRow>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM versioned_records \
             WHERE partition_key = $1 AND entity_id = $2 \
             ORDER BY latest_version ASC"
        );
        let rows: Vec<RecordRow> = sqlx::query_as(&sql)
            .bind(partition_key)
            .bind(entity_id)
            .fetch_all(&self.pool)
            .await?;
        into_stored(rows)
    }

    async fn insert(&self, row: &StoredRow) -> Result<()> {
        insert_row(&self.pool, row).await
    }

    async fn put(&self, row: &StoredRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO versioned_records
                (partition_key, sort_key, entity_id, latest_version, entry_status,
                 create_date, update_date, updated_by, attributes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (partition_key, sort_key) DO UPDATE SET
                entity_id = EXCLUDED.entity_id,
                latest_version = EXCLUDED.latest_version,
                entry_status = EXCLUDED.entry_status,
                create_date = EXCLUDED.create_date,
                update_date = EXCLUDED.update_date,
                updated_by = EXCLUDED.updated_by,
                attributes = EXCLUDED.attributes
            "#,
        )
        .bind(&row.partition_key)
        .bind(&row.sort_key)
        .bind(&row.entity_id)
        .bind(row.latest_version)
        .bind(row.entry_status.as_str())
        .bind(row.create_date)
        .bind(row.update_date)
        .bind(&row.updated_by)
        .bind(Json(&row.attributes))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn put_if_version(&self, row: &StoredRow, expected_version: i64) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE versioned_records SET
                entity_id = $3,
                latest_version = $4,
                entry_status = $5,
                create_date = $6,
                update_date = $7,
                updated_by = $8,
                attributes = $9
            WHERE partition_key = $1 AND sort_key = $2 AND latest_version = $10
            "#,
        )
        .bind(&row.partition_key)
        .bind(&row.sort_key)
        .bind(&row.entity_id)
        .bind(row.latest_version)
        .bind(row.entry_status.as_str())
        .bind(row.create_date)
        .bind(row.update_date)
        .bind(&row.updated_by)
        .bind(Json(&row.attributes))
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!(
                "[{}] live row is no longer at version {expected_version}",
                row.sort_key
            );
            return Err(AppError::Conflict(format!(
                "Record {} was modified concurrently (expected version {expected_version})",
                row.sort_key
            )));
        }
        Ok(())
    }

    async fn transact_update(&self, update: &LiveRowUpdate, snapshot: &StoredRow) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE versioned_records SET
                attributes = attributes || $1,
                latest_version = $2,
                update_date = COALESCE($3, update_date),
                updated_by = COALESCE($4, updated_by),
                entry_status = COALESCE($5, entry_status)
            WHERE partition_key = $6 AND sort_key = $7 AND latest_version = $8
            "#,
        )
        .bind(Json(&update.changes))
        .bind(update.new_version)
        .bind(update.update_date)
        .bind(&update.updated_by)
        .bind(update.entry_status.map(|s| s.as_str()))
        .bind(&update.partition_key)
        .bind(&update.sort_key)
        .bind(update.expected_version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            warn!(
                "[{}] live row is no longer at version {}",
                update.sort_key, update.expected_version
            );
            return Err(AppError::Conflict(format!(
                "Record {} was modified concurrently (expected version {})",
                update.sort_key, update.expected_version
            )));
        }

        // A duplicate snapshot key surfaces as a unique violation, i.e. Conflict;
        // dropping `tx` without commit rolls the live-row update back.
        insert_row(&mut *tx, snapshot).await?;

        tx.commit().await?;
        Ok(())
    }
}
