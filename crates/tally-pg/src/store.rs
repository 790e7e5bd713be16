//! PostgresStore - jobs と votes の正本
//!
//! Every port call is exactly one SQL statement, so each mutation is atomic on
//! its own. Nothing spans statements: a failure after `increment_tally` leaves
//! the tally applied.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info};

use tally_core::domain::{
    Choice, ConnectivityError, Job, JobId, JobStatus, StoreError, UnknownStatus, VoteTally,
};
use tally_core::ports::{JobStore, TallyStore};

use crate::config::DbConfig;

const CREATE_JOBS: &str = r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id         TEXT PRIMARY KEY,
        choice     TEXT NOT NULL,
        status     TEXT NOT NULL DEFAULT 'queued',
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
"#;

const CREATE_VOTES: &str = r#"
    CREATE TABLE IF NOT EXISTS votes (
        choice TEXT PRIMARY KEY,
        count  BIGINT NOT NULL DEFAULT 0 CHECK (count >= 0)
    )
"#;

// completed からは戻さない（再配送された完了済みジョブは no-op）
const MARK_PROCESSING: &str = r#"
    UPDATE jobs
    SET status = 'processing'
    WHERE id = $1 AND status <> 'completed'
"#;

const MARK_COMPLETED: &str = r#"
    UPDATE jobs
    SET status = 'completed'
    WHERE id = $1
"#;

const INCREMENT_TALLY: &str = r#"
    INSERT INTO votes (choice, count)
    VALUES ($1, 1)
    ON CONFLICT (choice) DO UPDATE SET count = votes.count + 1
    RETURNING count
"#;

/// Store backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Open the pool and verify one connection.
    pub async fn connect(config: &DbConfig) -> Result<Self, ConnectivityError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(config.connect_options())
            .await
            .map_err(ConnectivityError::store)?;

        info!(
            host = %config.host,
            port = config.port,
            database = %config.name,
            max_connections = config.max_connections,
            "Connected to PostgreSQL"
        );
        Ok(Self { pool })
    }

    /// Create `jobs` and `votes` if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in [CREATE_JOBS, CREATE_VOTES] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(store_error)?;
        }
        debug!("Schema ready");
        Ok(())
    }

    /// Producer side: record a new job as `queued`.
    pub async fn insert_queued_job(&self, job_id: &JobId, choice: &Choice) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO jobs (id, choice, status) VALUES ($1, $2, $3)")
            .bind(job_id.as_str())
            .bind(choice.as_str())
            .bind(JobStatus::Queued.as_str())
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    /// Most recently created jobs first.
    pub async fn recent_jobs(&self, limit: i64) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, String, DateTime<Utc>)>(
            "SELECT id, choice, status, created_at FROM jobs ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.into_iter()
            .map(|(id, choice, status, created_at)| {
                Ok(Job {
                    id: JobId::new(id),
                    choice: Choice::new(choice),
                    status: status
                        .parse()
                        .map_err(|e: UnknownStatus| StoreError::Rejected(e.to_string()))?,
                    created_at,
                })
            })
            .collect()
    }

    /// Release every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn execute(&self, sql: &'static str, job_id: &JobId) -> Result<u64, StoreError> {
        let result = sqlx::query(sql)
            .bind(job_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl JobStore for PostgresStore {
    async fn mark_processing(&self, job_id: &JobId) -> Result<u64, StoreError> {
        self.execute(MARK_PROCESSING, job_id).await
    }

    async fn mark_completed(&self, job_id: &JobId) -> Result<u64, StoreError> {
        self.execute(MARK_COMPLETED, job_id).await
    }

    async fn job_status(&self, job_id: &JobId) -> Result<Option<JobStatus>, StoreError> {
        let status = sqlx::query_scalar::<_, String>("SELECT status FROM jobs WHERE id = $1")
            .bind(job_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;

        status
            .map(|s| s.parse::<JobStatus>())
            .transpose()
            .map_err(|e| StoreError::Rejected(e.to_string()))
    }
}

#[async_trait]
impl TallyStore for PostgresStore {
    async fn increment_tally(&self, choice: &Choice) -> Result<u64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(INCREMENT_TALLY)
            .bind(choice.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(store_error)?;
        to_count(count)
    }

    async fn tallies(&self) -> Result<Vec<VoteTally>, StoreError> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT choice, count FROM votes ORDER BY choice",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.into_iter()
            .map(|(choice, count)| Ok(VoteTally::new(Choice::new(choice), to_count(count)?)))
            .collect()
    }
}

/// Classify a driver error.
///
/// The database refusing a statement is `Rejected`; everything else (I/O,
/// pool exhaustion, TLS, protocol) is `Unavailable`. Both requeue the vote.
fn store_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Database(db) => StoreError::Rejected(db.to_string()),
        sqlx::Error::RowNotFound | sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Rejected(e.to_string())
        }
        other => StoreError::Unavailable(other.to_string()),
    }
}

fn to_count(count: i64) -> Result<u64, StoreError> {
    u64::try_from(count).map_err(|_| StoreError::Rejected(format!("negative vote count {count}")))
}
