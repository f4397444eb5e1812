//! PostgreSQL implementation of the persistence gateway.
//!
//! Each [`JobStore::begin`] opens a database transaction; commit and
//! rollback map directly onto the database's. The failure-record upsert
//! relies on `ON CONFLICT` so overlapping firings of the same descriptor
//! increment one row instead of racing to create two.
//!
//! Schema lives in the `schedd` binary's migrations: `job_descriptors`
//! (unique on `(tenant_id, job_name)`), `job_parameters`, and
//! `failed_jobs`, both keyed by `(tenant_id, descriptor_id)` with cascade
//! deletes from the descriptor table.

use crate::error::StoreError;
use crate::repository::{FailedJob, JobStore, JobStoreTx, QueryOptions, SortOrder};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use iron_cadence_core::{JobDescriptorId, TenantId};
use iron_cadence_job::{JobDescriptor, JobParameter, ParameterValue};
use sqlx::postgres::Postgres;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;

/// Row type for descriptor queries.
#[derive(FromRow)]
struct DescriptorRow {
    id: String,
    tenant_id: String,
    job_type: String,
    job_name: String,
    created_at: DateTime<Utc>,
}

impl DescriptorRow {
    fn try_into_descriptor(self) -> Result<JobDescriptor, StoreError> {
        let id = JobDescriptorId::from_str(&self.id)
            .map_err(|e| StoreError::read(format!("invalid descriptor id '{}': {e}", self.id)))?;
        let tenant_id = TenantId::from_str(&self.tenant_id)
            .map_err(|e| StoreError::read(format!("invalid tenant id '{}': {e}", self.tenant_id)))?;

        Ok(JobDescriptor {
            id,
            tenant_id,
            job_type: self.job_type,
            job_name: self.job_name,
            created_at: self.created_at,
        })
    }
}

/// Row type for parameter queries.
#[derive(FromRow)]
struct ParameterRow {
    key: String,
    value: String,
}

impl ParameterRow {
    fn try_into_parameter(self) -> Result<JobParameter, StoreError> {
        let value: ParameterValue = serde_json::from_str(&self.value).map_err(|e| {
            StoreError::read(format!("invalid parameter value for '{}': {e}", self.key))
        })?;
        Ok(JobParameter {
            key: self.key,
            value,
        })
    }
}

/// Row type for failure-record queries.
#[derive(FromRow)]
struct FailedJobRow {
    descriptor_id: String,
    tenant_id: String,
    job_name: String,
    last_message: String,
    number_of_failures: i32,
    last_failed_at: DateTime<Utc>,
}

impl FailedJobRow {
    fn try_into_record(self) -> Result<FailedJob, StoreError> {
        let descriptor_id = JobDescriptorId::from_str(&self.descriptor_id).map_err(|e| {
            StoreError::read(format!(
                "invalid descriptor id '{}': {e}",
                self.descriptor_id
            ))
        })?;
        let tenant_id = TenantId::from_str(&self.tenant_id)
            .map_err(|e| StoreError::read(format!("invalid tenant id '{}': {e}", self.tenant_id)))?;

        Ok(FailedJob {
            descriptor_id,
            tenant_id,
            job_name: self.job_name,
            last_message: self.last_message,
            number_of_failures: u32::try_from(self.number_of_failures).unwrap_or(0),
            last_failed_at: self.last_failed_at,
        })
    }
}

fn read_err(e: sqlx::Error) -> StoreError {
    StoreError::read(e.to_string())
}

fn write_err(e: sqlx::Error) -> StoreError {
    StoreError::persistence(e.to_string())
}

/// PostgreSQL-backed job store.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    /// Creates a store over an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn begin(&self) -> Result<Box<dyn JobStoreTx>, StoreError> {
        let tx = self.pool.begin().await.map_err(write_err)?;
        Ok(Box::new(PgJobStoreTx { tx }))
    }
}

struct PgJobStoreTx {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl JobStoreTx for PgJobStoreTx {
    async fn create_job_descriptor(
        &mut self,
        descriptor: &JobDescriptor,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO job_descriptors (id, tenant_id, job_type, job_name, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(descriptor.id.to_string())
        .bind(descriptor.tenant_id.to_string())
        .bind(&descriptor.job_type)
        .bind(&descriptor.job_name)
        .bind(descriptor.created_at)
        .execute(&mut *self.tx)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e)
                if e.as_database_error()
                    .is_some_and(|db| db.is_unique_violation()) =>
            {
                Err(StoreError::DuplicateJobName {
                    tenant_id: descriptor.tenant_id,
                    job_name: descriptor.job_name.clone(),
                })
            }
            Err(e) => Err(write_err(e)),
        }
    }

    async fn job_descriptor(
        &mut self,
        tenant_id: TenantId,
        id: JobDescriptorId,
    ) -> Result<Option<JobDescriptor>, StoreError> {
        let row: Option<DescriptorRow> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, job_type, job_name, created_at
            FROM job_descriptors
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(tenant_id.to_string())
        .bind(id.to_string())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(read_err)?;

        row.map(DescriptorRow::try_into_descriptor).transpose()
    }

    async fn job_descriptor_by_name(
        &mut self,
        tenant_id: TenantId,
        job_name: &str,
    ) -> Result<Option<JobDescriptor>, StoreError> {
        let row: Option<DescriptorRow> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, job_type, job_name, created_at
            FROM job_descriptors
            WHERE tenant_id = $1 AND job_name = $2
            "#,
        )
        .bind(tenant_id.to_string())
        .bind(job_name)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(read_err)?;

        row.map(DescriptorRow::try_into_descriptor).transpose()
    }

    async fn search_job_descriptors(
        &mut self,
        tenant_id: TenantId,
        options: &QueryOptions,
    ) -> Result<Vec<JobDescriptor>, StoreError> {
        let order = match options.order {
            SortOrder::IdAscending => "ASC",
            SortOrder::IdDescending => "DESC",
        };
        let term_clause = if options.term.is_some() {
            "AND job_name LIKE '%' || $4 || '%'"
        } else {
            ""
        };
        let sql = format!(
            r#"
            SELECT id, tenant_id, job_type, job_name, created_at
            FROM job_descriptors
            WHERE tenant_id = $1 {term_clause}
            ORDER BY id {order}
            OFFSET $2 LIMIT $3
            "#,
        );

        let mut query = sqlx::query_as::<_, DescriptorRow>(&sql)
            .bind(tenant_id.to_string())
            .bind(options.from as i64)
            .bind(options.number_of_results as i64);
        if let Some(term) = &options.term {
            query = query.bind(term);
        }

        let rows = query.fetch_all(&mut *self.tx).await.map_err(read_err)?;
        rows.into_iter()
            .map(DescriptorRow::try_into_descriptor)
            .collect()
    }

    async fn delete_job_descriptor(
        &mut self,
        tenant_id: TenantId,
        id: JobDescriptorId,
    ) -> Result<bool, StoreError> {
        // Parameters and failure records go via ON DELETE CASCADE.
        let result = sqlx::query(
            r#"
            DELETE FROM job_descriptors
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(tenant_id.to_string())
        .bind(id.to_string())
        .execute(&mut *self.tx)
        .await
        .map_err(write_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_job_descriptors(&mut self, tenant_id: TenantId) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM job_descriptors
            WHERE tenant_id = $1
            "#,
        )
        .bind(tenant_id.to_string())
        .execute(&mut *self.tx)
        .await
        .map_err(write_err)?;

        Ok(result.rows_affected())
    }

    async fn create_job_parameters(
        &mut self,
        tenant_id: TenantId,
        id: JobDescriptorId,
        parameters: &[JobParameter],
    ) -> Result<(), StoreError> {
        for parameter in parameters {
            let value = serde_json::to_string(&parameter.value)
                .map_err(|e| StoreError::persistence(format!("unserializable parameter: {e}")))?;
            sqlx::query(
                r#"
                INSERT INTO job_parameters (tenant_id, descriptor_id, key, value)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (tenant_id, descriptor_id, key)
                DO UPDATE SET value = EXCLUDED.value
                "#,
            )
            .bind(tenant_id.to_string())
            .bind(id.to_string())
            .bind(&parameter.key)
            .bind(value)
            .execute(&mut *self.tx)
            .await
            .map_err(write_err)?;
        }
        Ok(())
    }

    async fn job_parameters(
        &mut self,
        tenant_id: TenantId,
        id: JobDescriptorId,
    ) -> Result<Vec<JobParameter>, StoreError> {
        let rows: Vec<ParameterRow> = sqlx::query_as(
            r#"
            SELECT key, value
            FROM job_parameters
            WHERE tenant_id = $1 AND descriptor_id = $2
            ORDER BY key
            "#,
        )
        .bind(tenant_id.to_string())
        .bind(id.to_string())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(read_err)?;

        rows.into_iter()
            .map(ParameterRow::try_into_parameter)
            .collect()
    }

    async fn replace_job_parameters(
        &mut self,
        tenant_id: TenantId,
        id: JobDescriptorId,
        parameters: &[JobParameter],
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            DELETE FROM job_parameters
            WHERE tenant_id = $1 AND descriptor_id = $2
            "#,
        )
        .bind(tenant_id.to_string())
        .bind(id.to_string())
        .execute(&mut *self.tx)
        .await
        .map_err(write_err)?;

        self.create_job_parameters(tenant_id, id, parameters).await
    }

    async fn record_failure(
        &mut self,
        tenant_id: TenantId,
        id: JobDescriptorId,
        job_name: &str,
        message: &str,
    ) -> Result<FailedJob, StoreError> {
        let row: FailedJobRow = sqlx::query_as(
            r#"
            INSERT INTO failed_jobs
                (tenant_id, descriptor_id, job_name, last_message, number_of_failures, last_failed_at)
            VALUES ($1, $2, $3, $4, 1, $5)
            ON CONFLICT (tenant_id, descriptor_id)
            DO UPDATE SET
                number_of_failures = failed_jobs.number_of_failures + 1,
                last_message = EXCLUDED.last_message,
                last_failed_at = EXCLUDED.last_failed_at
            RETURNING descriptor_id, tenant_id, job_name, last_message,
                      number_of_failures, last_failed_at
            "#,
        )
        .bind(tenant_id.to_string())
        .bind(id.to_string())
        .bind(job_name)
        .bind(message)
        .bind(Utc::now())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(write_err)?;

        row.try_into_record()
    }

    async fn failed_job(
        &mut self,
        tenant_id: TenantId,
        id: JobDescriptorId,
    ) -> Result<Option<FailedJob>, StoreError> {
        let row: Option<FailedJobRow> = sqlx::query_as(
            r#"
            SELECT descriptor_id, tenant_id, job_name, last_message,
                   number_of_failures, last_failed_at
            FROM failed_jobs
            WHERE tenant_id = $1 AND descriptor_id = $2
            "#,
        )
        .bind(tenant_id.to_string())
        .bind(id.to_string())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(read_err)?;

        row.map(FailedJobRow::try_into_record).transpose()
    }

    async fn failed_jobs(
        &mut self,
        tenant_id: TenantId,
        from: usize,
        number_of_results: usize,
    ) -> Result<Vec<FailedJob>, StoreError> {
        let rows: Vec<FailedJobRow> = sqlx::query_as(
            r#"
            SELECT descriptor_id, tenant_id, job_name, last_message,
                   number_of_failures, last_failed_at
            FROM failed_jobs
            WHERE tenant_id = $1
            ORDER BY descriptor_id
            OFFSET $2 LIMIT $3
            "#,
        )
        .bind(tenant_id.to_string())
        .bind(from as i64)
        .bind(number_of_results as i64)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(read_err)?;

        rows.into_iter().map(FailedJobRow::try_into_record).collect()
    }

    async fn delete_failed_job(
        &mut self,
        tenant_id: TenantId,
        id: JobDescriptorId,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM failed_jobs
            WHERE tenant_id = $1 AND descriptor_id = $2
            "#,
        )
        .bind(tenant_id.to_string())
        .bind(id.to_string())
        .execute(&mut *self.tx)
        .await
        .map_err(write_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(write_err)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(write_err)
    }
}
