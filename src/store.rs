//! Durable record of generation jobs.
//!
//! Any update to a job that is already terminal is a successful no-op.
//! [`SqliteJobStore`] enforces this in the `UPDATE` itself; the in-memory store
//! relies on the map's per-entry lock.

use crate::models::{Job, JobStatus, NewJob};
use crate::storage::database::{parse_timestamp, parse_uuid, timestamp};
use crate::storage::SharedDatabase;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job in `processing`.
    async fn create(&self, job: NewJob) -> Result<Job>;

    /// Move a job forward and return the stored state after the call.
    async fn update(
        &self,
        job_id: Uuid,
        status: JobStatus,
        generated_image_url: Option<String>,
    ) -> Result<Job>;

    async fn get(&self, job_id: Uuid) -> Result<Job>;

    /// Jobs owned by `user_id`, newest first.
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Job>>;
}

/// Process-local store for tests and demos. Nothing survives a restart.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: DashMap<Uuid, Job>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: NewJob) -> Result<Job> {
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            user_id: job.user_id,
            original_image_url: job.original_image_url,
            style: job.style,
            room_type: job.room_type,
            prompt: job.prompt,
            status: JobStatus::Processing,
            generated_image_url: None,
            created_at: now,
            updated_at: now,
        };
        self.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn update(
        &self,
        job_id: Uuid,
        status: JobStatus,
        generated_image_url: Option<String>,
    ) -> Result<Job> {
        let mut job = self.jobs.get_mut(&job_id).ok_or(Error::JobNotFound(job_id))?;

        if job.status.is_terminal() {
            debug!(
                "[{}] Ignoring {} update, job already {}",
                job_id, status, job.status
            );
            return Ok(job.clone());
        }
        if status == JobStatus::Processing {
            return Ok(job.clone());
        }

        job.status = status;
        if status == JobStatus::Completed {
            job.generated_image_url = generated_image_url;
        }
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn get(&self, job_id: Uuid) -> Result<Job> {
        self.jobs
            .get(&job_id)
            .map(|job| job.clone())
            .ok_or(Error::JobNotFound(job_id))
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }
}

const JOB_COLUMNS: &str = "id, user_id, original_image_url, style, room_type, prompt, \
     status, generated_image_url, created_at, updated_at";

/// Job store persisted in the `generations` table.
#[derive(Clone)]
pub struct SqliteJobStore {
    db: SharedDatabase,
}

impl SqliteJobStore {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    let id: String = row.get(0)?;
    let status: String = row.get(6)?;
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;

    Ok(Job {
        id: parse_uuid(0, &id)?,
        user_id: row.get(1)?,
        original_image_url: row.get(2)?,
        style: row.get(3)?,
        room_type: row.get(4)?,
        prompt: row.get(5)?,
        status: status
            .parse()
            .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, e.into()))?,
        generated_image_url: row.get(7)?,
        created_at: parse_timestamp(8, &created_at)?,
        updated_at: parse_timestamp(9, &updated_at)?,
    })
}

fn find_job(conn: &Connection, job_id: Uuid) -> Result<Job> {
    conn.query_row(
        &format!("SELECT {} FROM generations WHERE id = ?1", JOB_COLUMNS),
        params![job_id.to_string()],
        job_from_row,
    )
    .optional()?
    .ok_or(Error::JobNotFound(job_id))
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create(&self, job: NewJob) -> Result<Job> {
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            user_id: job.user_id,
            original_image_url: job.original_image_url,
            style: job.style,
            room_type: job.room_type,
            prompt: job.prompt,
            status: JobStatus::Processing,
            generated_image_url: None,
            created_at: now,
            updated_at: now,
        };

        let row = job.clone();
        self.db
            .run(move |db| {
                db.conn()?.execute(
                    &format!(
                        "INSERT INTO generations ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                        JOB_COLUMNS
                    ),
                    params![
                        row.id.to_string(),
                        row.user_id,
                        row.original_image_url,
                        row.style,
                        row.room_type,
                        row.prompt,
                        row.status.as_str(),
                        row.generated_image_url,
                        timestamp(row.created_at),
                        timestamp(row.updated_at)
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(job)
    }

    async fn update(
        &self,
        job_id: Uuid,
        status: JobStatus,
        generated_image_url: Option<String>,
    ) -> Result<Job> {
        self.db
            .run(move |db| {
                db.transaction(|conn| {
                    if status != JobStatus::Processing {
                        let url = generated_image_url.filter(|_| status == JobStatus::Completed);
                        let changed = conn.execute(
                            "UPDATE generations
                             SET status = ?2, generated_image_url = ?3, updated_at = ?4
                             WHERE id = ?1 AND status = 'processing'",
                            params![
                                job_id.to_string(),
                                status.as_str(),
                                url,
                                timestamp(Utc::now())
                            ],
                        )?;
                        if changed == 0 {
                            debug!("[{}] Ignoring {} update, job not processing", job_id, status);
                        }
                    }
                    find_job(conn, job_id)
                })
            })
            .await
    }

    async fn get(&self, job_id: Uuid) -> Result<Job> {
        self.db
            .run(move |db| find_job(&*db.conn()?, job_id))
            .await
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Job>> {
        let user_id = user_id.to_string();
        self.db
            .run(move |db| {
                let conn = db.conn()?;
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM generations WHERE user_id = ?1
                     ORDER BY created_at DESC, rowid DESC",
                    JOB_COLUMNS
                ))?;
                let jobs = stmt
                    .query_map(params![user_id], job_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(jobs)
            })
            .await
    }
}
