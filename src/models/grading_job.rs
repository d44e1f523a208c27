// src/models/grading_job.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    /// Retries exhausted.
    Failed,
}

/// Represents the 'grading_jobs' table: one ticket per scheduled code grading.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct GradingJob {
    pub id: i64,
    pub answer_id: i64,
    pub status: JobStatus,
    /// Deliveries so far.
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
