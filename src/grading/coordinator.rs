// src/grading/coordinator.rs

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tokio::{sync::Notify, task::JoinHandle};

use crate::{
    config::GradingConfig,
    db,
    grading::sandbox::{CodeRunner, outputs_match},
};

/// Handle to the durable grading queue.
///
/// Jobs live in the `grading_jobs` table and are inserted inside the
/// transaction that creates the answer, so a committed submission always
/// has its jobs. The in-memory `Notify` only shortens the polling delay.
#[derive(Clone, Default)]
pub struct GradingQueue {
    notify: Arc<Notify>,
}

/// A job taken off the queue by a worker.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClaimedJob {
    pub id: i64,
    pub answer_id: i64,
    /// Deliveries including this one.
    pub attempts: i64,
}

/// Result of running one code answer through its test cases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeGrade {
    Graded {
        attempt_id: i64,
        passed_cases: usize,
        total_cases: usize,
        points: i64,
        attempt_total: i64,
    },
    /// The answer was deleted before the job ran.
    Missing,
    /// A regrade or stale-job sweep took the job away while it ran; its
    /// result was discarded.
    Superseded,
}

#[derive(sqlx::FromRow)]
struct CodeAnswerRow {
    attempt_id: i64,
    code_submitted: Option<String>,
    question_id: i64,
    points: i64,
}

#[derive(sqlx::FromRow)]
struct TestCaseRow {
    id: i64,
    input_data: String,
    expected_output: String,
}

impl GradingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a grading job for `answer_id` and returns its ticket.
    ///
    /// Runs on the caller's connection so it commits or rolls back with
    /// the surrounding transaction. Call [`GradingQueue::wake`] after commit.
    pub async fn enqueue(
        &self,
        conn: &mut SqliteConnection,
        answer_id: i64,
    ) -> Result<i64, sqlx::Error> {
        let now = Utc::now();
        let ticket = sqlx::query(
            r#"
            INSERT INTO grading_jobs (answer_id, status, attempts, available_at, created_at, updated_at)
            VALUES (?, 'queued', 0, ?, ?, ?)
            "#,
        )
        .bind(answer_id)
        .bind(now.timestamp_millis())
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();

        Ok(ticket)
    }

    /// Wakes idle workers.
    pub fn wake(&self) {
        self.notify.notify_waiters();
    }

    /// Puts jobs left `running` by a previous process back in the queue.
    pub async fn recover(&self, pool: &SqlitePool) -> Result<u64, sqlx::Error> {
        let requeued = requeue_running_since(pool, Utc::now()).await?;
        if requeued > 0 {
            tracing::warn!(requeued, "Re-queued grading jobs interrupted by a restart");
        }
        Ok(requeued)
    }

    /// Puts jobs that have been `running` for longer than `stale_after`
    /// back in the queue.
    ///
    /// Catches jobs whose worker lost track of them without the process
    /// restarting, e.g. when recording a failure hit a database error.
    pub async fn requeue_stale(
        &self,
        pool: &SqlitePool,
        stale_after: Duration,
    ) -> Result<u64, sqlx::Error> {
        let age = chrono::Duration::from_std(stale_after)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let cutoff = Utc::now() - age;

        let requeued = requeue_running_since(pool, cutoff).await?;
        if requeued > 0 {
            tracing::warn!(requeued, "Re-queued stale grading jobs");
            self.wake();
        }
        Ok(requeued)
    }

    /// Starts the background worker pool, plus a sweeper for stale jobs
    /// when there is at least one worker.
    pub fn spawn_workers(
        &self,
        pool: SqlitePool,
        runner: Arc<dyn CodeRunner>,
        config: GradingConfig,
    ) -> Vec<JoinHandle<()>> {
        let mut handles: Vec<JoinHandle<()>> = (0..config.workers)
            .map(|worker| {
                let pool = pool.clone();
                let runner = runner.clone();
                let config = config.clone();
                let notify = self.notify.clone();
                tokio::spawn(async move {
                    tracing::info!(worker, "Grading worker started");
                    loop {
                        match process_next_job(&pool, runner.as_ref(), &config).await {
                            Ok(Some(_)) => continue,
                            Ok(None) => {}
                            Err(e) => tracing::error!(worker, "Grading queue unavailable: {}", e),
                        }
                        tokio::select! {
                            _ = notify.notified() => {}
                            _ = tokio::time::sleep(config.poll_interval) => {}
                        }
                    }
                })
            })
            .collect();

        if config.workers > 0 {
            let queue = self.clone();
            let stale_after = config.stale_after;
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(stale_after.max(Duration::from_millis(10)) / 2);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if let Err(e) = queue.requeue_stale(&pool, stale_after).await {
                        tracing::error!("Stale grading job sweep failed: {}", e);
                    }
                }
            }));
        }

        handles
    }
}

async fn requeue_running_since(
    pool: &SqlitePool,
    cutoff: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let requeued = sqlx::query(
        r#"
        UPDATE grading_jobs
        SET status = 'queued', updated_at = ?
        WHERE status = 'running' AND julianday(updated_at) <= julianday(?)
        "#,
    )
    .bind(Utc::now())
    .bind(cutoff)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(requeued)
}

/// Claims and runs one job. Returns the job id, or `None` when idle.
///
/// Grading errors are recorded against the job (and, once retries are
/// exhausted, the answer); only queue bookkeeping failures bubble up.
pub async fn process_next_job(
    pool: &SqlitePool,
    runner: &dyn CodeRunner,
    config: &GradingConfig,
) -> Result<Option<i64>, sqlx::Error> {
    let Some(job) = claim_next(pool).await? else {
        return Ok(None);
    };

    tracing::debug!(job_id = job.id, answer_id = job.answer_id, delivery = job.attempts, "Claimed grading job");

    match grade_code_answer(pool, runner, &job).await {
        Ok(grade) => {
            if let CodeGrade::Graded {
                attempt_id,
                passed_cases,
                total_cases,
                points,
                attempt_total,
            } = &grade
            {
                tracing::info!(
                    job_id = job.id,
                    answer_id = job.answer_id,
                    attempt_id,
                    passed_cases,
                    total_cases,
                    points,
                    attempt_total,
                    "Code answer graded"
                );
            } else if grade == CodeGrade::Missing {
                tracing::info!(job_id = job.id, answer_id = job.answer_id, "Answer gone, nothing to grade");
            } else {
                tracing::info!(job_id = job.id, answer_id = job.answer_id, "Job superseded, result discarded");
            }
        }
        Err(e) => record_failure(pool, &job, &e.to_string(), config).await?,
    }

    Ok(Some(job.id))
}

async fn claim_next(pool: &SqlitePool) -> Result<Option<ClaimedJob>, sqlx::Error> {
    let now = Utc::now();
    sqlx::query_as(
        r#"
        UPDATE grading_jobs
        SET status = 'running', attempts = attempts + 1, updated_at = ?
        WHERE id = (
            SELECT id FROM grading_jobs
            WHERE status = 'queued' AND available_at <= ?
            ORDER BY id
            LIMIT 1
        )
        RETURNING id, answer_id, attempts
        "#,
    )
    .bind(now)
    .bind(now.timestamp_millis())
    .fetch_optional(pool)
    .await
}

/// Requeues with backoff, or marks job and answer failed once the
/// delivery budget is spent.
async fn record_failure(
    pool: &SqlitePool,
    job: &ClaimedJob,
    error: &str,
    config: &GradingConfig,
) -> Result<(), sqlx::Error> {
    let now = Utc::now();

    if job.attempts < config.max_attempts {
        let delay = retry_delay(config.retry_backoff, job.attempts);
        tracing::warn!(
            job_id = job.id,
            answer_id = job.answer_id,
            delivery = job.attempts,
            retry_in_ms = delay.as_millis() as u64,
            "Grading failed, will retry: {}",
            error
        );
        sqlx::query(
            r#"
            UPDATE grading_jobs
            SET status = 'queued', last_error = ?, available_at = ?, updated_at = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(error)
        .bind(now.timestamp_millis() + delay.as_millis() as i64)
        .bind(now)
        .bind(job.id)
        .execute(pool)
        .await?;
        return Ok(());
    }

    tracing::error!(
        job_id = job.id,
        answer_id = job.answer_id,
        deliveries = job.attempts,
        "Grading failed permanently: {}",
        error
    );

    let message = format!("Grading failed after {} attempts: {}", job.attempts, error);
    let mut tx = db::begin_write(pool).await?;

    let owned = sqlx::query(
        "UPDATE grading_jobs SET status = 'failed', last_error = ?, updated_at = ? WHERE id = ? AND status = 'running'",
    )
    .bind(error)
    .bind(now)
    .bind(job.id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    // A newer job owns the answer now
    if owned == 0 {
        return Ok(());
    }

    let attempt_id: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE answers
        SET grading_status = 'failed', grading_error = ?, graded_score = 0, is_correct = 0, graded_at = ?
        WHERE id = ?
        RETURNING attempt_id
        "#,
    )
    .bind(&message)
    .bind(now)
    .bind(job.answer_id)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(attempt_id) = attempt_id {
        recompute_attempt_score(&mut *tx, attempt_id).await?;
    }

    tx.commit().await
}

/// Exponential backoff: `base * 2^(delivery - 1)`, capped at 2^10 steps.
pub fn retry_delay(base: Duration, delivery: i64) -> Duration {
    let exponent = (delivery.clamp(1, 11) - 1) as u32;
    base.saturating_mul(1u32 << exponent)
}

/// Runs a claimed job's code answer against every test case of its question.
///
/// Cases run in id order and stop at the first mismatch. The answer gets
/// the full points only when every case passed. The job is marked done,
/// the score stored and the attempt total recomputed in one transaction,
/// and only while the job is still `running`.
pub async fn grade_code_answer(
    pool: &SqlitePool,
    runner: &dyn CodeRunner,
    job: &ClaimedJob,
) -> Result<CodeGrade, sqlx::Error> {
    let answer_id = job.answer_id;
    let answer: Option<CodeAnswerRow> = sqlx::query_as(
        r#"
        SELECT a.attempt_id, a.code_submitted, a.question_id, q.points
        FROM answers a
        JOIN questions q ON q.id = a.question_id
        WHERE a.id = ? AND q.question_type = 'code'
        "#,
    )
    .bind(answer_id)
    .fetch_optional(pool)
    .await?;

    let Some(answer) = answer else {
        let mut conn = pool.acquire().await?;
        return Ok(if finish_job(&mut conn, job.id).await? {
            CodeGrade::Missing
        } else {
            CodeGrade::Superseded
        });
    };

    let cases: Vec<TestCaseRow> = sqlx::query_as(
        "SELECT id, input_data, expected_output FROM test_cases WHERE question_id = ? ORDER BY id",
    )
    .bind(answer.question_id)
    .fetch_all(pool)
    .await?;

    let code = answer.code_submitted.unwrap_or_default();
    let mut passed_cases = 0;
    for case in &cases {
        let outcome = runner.run(&code, &case.input_data).await;
        if !outputs_match(&case.expected_output, outcome.effective_output()) {
            tracing::debug!(
                answer_id,
                test_case_id = case.id,
                timed_out = outcome.timed_out,
                exit_code = ?outcome.exit_code,
                "Test case failed"
            );
            break;
        }
        passed_cases += 1;
    }

    let all_passed = passed_cases == cases.len();
    let points = if all_passed { answer.points } else { 0 };

    let mut tx = db::begin_write(pool).await?;

    if !finish_job(&mut tx, job.id).await? {
        return Ok(CodeGrade::Superseded);
    }

    sqlx::query(
        r#"
        UPDATE answers
        SET graded_score = ?, is_correct = ?, grading_status = 'graded', grading_error = NULL, graded_at = ?
        WHERE id = ?
        "#,
    )
    .bind(points)
    .bind(all_passed)
    .bind(Utc::now())
    .bind(answer_id)
    .execute(&mut *tx)
    .await?;

    let attempt_total = recompute_attempt_score(&mut *tx, answer.attempt_id).await?;
    tx.commit().await?;

    Ok(CodeGrade::Graded {
        attempt_id: answer.attempt_id,
        passed_cases,
        total_cases: cases.len(),
        points,
        attempt_total,
    })
}

/// Marks a claimed job done. False when it is no longer `running`.
async fn finish_job(conn: &mut SqliteConnection, job_id: i64) -> Result<bool, sqlx::Error> {
    let finished = sqlx::query(
        "UPDATE grading_jobs SET status = 'done', last_error = NULL, updated_at = ? WHERE id = ? AND status = 'running'",
    )
    .bind(Utc::now())
    .bind(job_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    Ok(finished == 1)
}

/// Sets an attempt's total to the sum of its answers' graded scores.
///
/// One statement, so concurrent completions cannot lose updates, and a
/// full recomputation, so completions may arrive in any order.
pub async fn recompute_attempt_score(
    conn: &mut SqliteConnection,
    attempt_id: i64,
) -> Result<i64, sqlx::Error> {
    let total: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE attempts
        SET total_score = (
            SELECT COALESCE(SUM(graded_score), 0) FROM answers WHERE attempt_id = ?1
        )
        WHERE id = ?1
        RETURNING total_score
        "#,
    )
    .bind(attempt_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(total.unwrap_or(0))
}

/// Sets an attempt's possible points to the points of the questions it
/// still has answers for.
pub async fn recompute_possible_points(
    conn: &mut SqliteConnection,
    attempt_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE attempts
        SET total_possible_points = (
            SELECT COALESCE(SUM(q.points), 0)
            FROM answers a JOIN questions q ON q.id = a.question_id
            WHERE a.attempt_id = ?1
        )
        WHERE id = ?1
        "#,
    )
    .bind(attempt_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_doubles() {
        let base = Duration::from_millis(100);
        assert_eq!(retry_delay(base, 1), Duration::from_millis(100));
        assert_eq!(retry_delay(base, 2), Duration::from_millis(200));
        assert_eq!(retry_delay(base, 3), Duration::from_millis(400));
    }

    #[test]
    fn test_retry_delay_is_capped() {
        let base = Duration::from_millis(1);
        assert_eq!(retry_delay(base, 50), Duration::from_millis(1024));
        assert_eq!(retry_delay(base, 0), Duration::from_millis(1));
    }
}
