// src/handlers/attempt.rs

use std::collections::HashSet;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool, types::Json as SqlJson};

use crate::{
    config::LEADERBOARD_SIZE,
    db,
    error::{AppError, PolicyViolation},
    grading::{
        coordinator::{GradingQueue, recompute_attempt_score, recompute_possible_points},
        grader::{Grade, Submission, grade, load_answer_keys},
    },
    models::{
        answer::{AnswerView, SubmittedAnswer},
        attempt::{
            Attempt, AttemptView, LeaderboardEntry, StartAttemptResponse, SubmitAttemptRequest,
        },
        quiz::Quiz,
    },
    utils::{jwt::Claims, lock::AttemptLocks},
};

/// Decides whether a student may open one more attempt.
///
/// Checked in order: attempt budget, opening time, closing time, active flag.
pub fn check_eligibility(
    quiz: &Quiz,
    prior_attempts: i64,
    now: DateTime<Utc>,
) -> Result<(), PolicyViolation> {
    if prior_attempts >= quiz.max_attempts {
        return Err(PolicyViolation::AttemptLimitExceeded);
    }
    if quiz.start_time.is_some_and(|start| now < start) {
        return Err(PolicyViolation::QuizNotYetOpen);
    }
    if quiz.end_time.is_some_and(|end| now > end) {
        return Err(PolicyViolation::QuizClosed);
    }
    if !quiz.active {
        return Err(PolicyViolation::QuizInactive);
    }
    Ok(())
}

/// Starts a new attempt for the caller.
///
/// The insert re-checks the attempt count in the same statement, so two
/// racing starts cannot both slip under `max_attempts`.
pub async fn start_attempt(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let now = Utc::now();

    let quiz: Quiz = sqlx::query_as("SELECT * FROM quizzes WHERE id = ?")
        .bind(quiz_id)
        .fetch_optional(&pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Quiz not found".to_string()))?;

    let prior: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM attempts WHERE user_id = ? AND quiz_id = ?")
            .bind(user_id)
            .bind(quiz_id)
            .fetch_one(&pool)
            .await?;

    check_eligibility(&quiz, prior, now)?;

    let result = sqlx::query(
        r#"
        INSERT INTO attempts (user_id, quiz_id, start_time, submitted, total_score, total_possible_points)
        SELECT ?1, ?2, ?3, 0, 0, 0
        WHERE (SELECT COUNT(*) FROM attempts WHERE user_id = ?1 AND quiz_id = ?2) < ?4
        "#,
    )
    .bind(user_id)
    .bind(quiz_id)
    .bind(now)
    .bind(quiz.max_attempts)
    .execute(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create attempt: {:?}", e);
        AppError::from(e)
    })?;

    if result.rows_affected() == 0 {
        return Err(PolicyViolation::AttemptLimitExceeded.into());
    }

    let attempt_id = result.last_insert_rowid();
    tracing::info!(user_id, quiz_id, attempt_id, "Attempt started");

    Ok((
        StatusCode::CREATED,
        Json(StartAttemptResponse { attempt_id }),
    ))
}

/// Submits the answers of an attempt and returns the graded view.
pub async fn submit_attempt(
    State(pool): State<SqlitePool>,
    State(queue): State<GradingQueue>,
    State(locks): State<AttemptLocks>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<i64>,
    Json(req): Json<SubmitAttemptRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let _guard = locks.lock(attempt_id).await;
    submit(&pool, &queue, attempt_id, user_id, &req.answers).await?;

    let view = load_attempt_view(&pool, attempt_id, Some(user_id)).await?;
    Ok(Json(view))
}

/// Records and grades a submission in one transaction.
///
/// Prior answers of the attempt are replaced, never merged. Non-code
/// answers are graded inline; code answers are stored ungraded and get a
/// grading job, whose tickets are returned. Any invalid answer rolls the
/// whole submission back. Callers hold the attempt lock.
pub async fn submit(
    pool: &SqlitePool,
    queue: &GradingQueue,
    attempt_id: i64,
    user_id: i64,
    answers: &[SubmittedAnswer],
) -> Result<Vec<i64>, AppError> {
    reject_duplicate_questions(answers)?;

    let mut tx = db::begin_write(pool).await?;

    let attempt = fetch_attempt(&mut tx, attempt_id).await?;
    if attempt.user_id != user_id {
        return Err(PolicyViolation::NotOwner.into());
    }
    if attempt.submitted {
        return Err(PolicyViolation::AlreadySubmitted.into());
    }

    sqlx::query("DELETE FROM answers WHERE attempt_id = ?")
        .bind(attempt_id)
        .execute(&mut *tx)
        .await?;

    let keys = load_answer_keys(&mut tx, attempt.quiz_id).await?;

    let mut possible_points = 0;
    let mut deferred = Vec::new();

    for answer in answers {
        let question = keys.get(&answer.question).ok_or_else(|| {
            AppError::BadRequest(format!(
                "Question {} does not belong to this quiz",
                answer.question
            ))
        })?;
        possible_points += question.points;

        let graded = grade(
            question,
            Submission {
                selected_option: answer.selected_option.as_ref(),
                answer_text: answer.answer_text.as_deref(),
            },
        )?;

        let (score, is_correct, status) = match graded {
            Grade::Scored { is_correct, points } => (Some(points), Some(is_correct), "graded"),
            Grade::Deferred => (None, None, "pending"),
        };

        let answer_id = sqlx::query(
            r#"
            INSERT INTO answers (
                attempt_id, question_id, selected_option, answer_text, code_submitted,
                graded_score, is_correct, grading_status, graded_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(attempt_id)
        .bind(answer.question)
        .bind(answer.selected_option.clone().map(SqlJson))
        .bind(answer.answer_text.as_deref())
        .bind(answer.code_submitted.as_deref())
        .bind(score)
        .bind(is_correct)
        .bind(status)
        .bind(score.map(|_| Utc::now()))
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        if graded == Grade::Deferred {
            deferred.push(answer_id);
        }
    }

    let mut tickets = Vec::with_capacity(deferred.len());
    for answer_id in deferred {
        tickets.push(queue.enqueue(&mut tx, answer_id).await?);
    }

    // Guard against a concurrent submit that committed first.
    let updated = sqlx::query(
        r#"
        UPDATE attempts
        SET submitted = 1, submission_time = ?, total_possible_points = ?
        WHERE id = ? AND submitted = 0
        "#,
    )
    .bind(Utc::now())
    .bind(possible_points)
    .bind(attempt_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if updated != 1 {
        return Err(PolicyViolation::AlreadySubmitted.into());
    }

    let provisional = recompute_attempt_score(&mut tx, attempt_id).await?;
    tx.commit().await?;

    if !tickets.is_empty() {
        queue.wake();
    }

    tracing::info!(
        attempt_id,
        user_id,
        answers = answers.len(),
        provisional_score = provisional,
        possible_points,
        pending_code_answers = tickets.len(),
        "Attempt submitted"
    );

    Ok(tickets)
}

fn reject_duplicate_questions(answers: &[SubmittedAnswer]) -> Result<(), AppError> {
    let mut seen = HashSet::new();
    for answer in answers {
        if !seen.insert(answer.question) {
            return Err(AppError::BadRequest(format!(
                "Question {} answered more than once",
                answer.question
            )));
        }
    }
    Ok(())
}

#[derive(FromRow)]
struct StoredAnswer {
    id: i64,
    question_id: i64,
    selected_option: Option<SqlJson<serde_json::Value>>,
    answer_text: Option<String>,
}

/// Re-grades a submitted attempt against the current answer keys.
///
/// Non-code answers are graded again inline, code answers go back to
/// pending with a fresh grading job. Repeating it gives the same score.
pub async fn regrade(
    pool: &SqlitePool,
    queue: &GradingQueue,
    attempt_id: i64,
) -> Result<Vec<i64>, AppError> {
    let mut tx = db::begin_write(pool).await?;

    let attempt = fetch_attempt(&mut tx, attempt_id).await?;
    if !attempt.submitted {
        return Err(AppError::BadRequest(
            "Attempt has not been submitted yet".to_string(),
        ));
    }

    let keys = load_answer_keys(&mut tx, attempt.quiz_id).await?;
    let stored: Vec<StoredAnswer> = sqlx::query_as(
        "SELECT id, question_id, selected_option, answer_text FROM answers WHERE attempt_id = ?",
    )
    .bind(attempt_id)
    .fetch_all(&mut *tx)
    .await?;

    let now = Utc::now();
    let mut tickets = Vec::new();

    for answer in &stored {
        let Some(question) = keys.get(&answer.question_id) else {
            continue;
        };

        let graded = grade(
            question,
            Submission {
                selected_option: answer.selected_option.as_ref().map(|json| &json.0),
                answer_text: answer.answer_text.as_deref(),
            },
        )?;

        match graded {
            Grade::Scored { is_correct, points } => {
                sqlx::query(
                    r#"
                    UPDATE answers
                    SET graded_score = ?, is_correct = ?, grading_status = 'graded', grading_error = NULL, graded_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(points)
                .bind(is_correct)
                .bind(now)
                .bind(answer.id)
                .execute(&mut *tx)
                .await?;
            }
            Grade::Deferred => {
                sqlx::query(
                    r#"
                    UPDATE answers
                    SET graded_score = NULL, is_correct = NULL, grading_status = 'pending', grading_error = NULL, graded_at = NULL
                    WHERE id = ?
                    "#,
                )
                .bind(answer.id)
                .execute(&mut *tx)
                .await?;
                // Older jobs must not report over the new one
                sqlx::query(
                    r#"
                    UPDATE grading_jobs
                    SET status = 'done', last_error = 'Superseded by regrade', updated_at = ?
                    WHERE answer_id = ? AND status IN ('queued', 'running')
                    "#,
                )
                .bind(now)
                .bind(answer.id)
                .execute(&mut *tx)
                .await?;
                tickets.push(queue.enqueue(&mut tx, answer.id).await?);
            }
        }
    }

    recompute_possible_points(&mut tx, attempt_id).await?;
    let total = recompute_attempt_score(&mut tx, attempt_id).await?;
    tx.commit().await?;

    if !tickets.is_empty() {
        queue.wake();
    }

    tracing::info!(
        attempt_id,
        provisional_score = total,
        requeued_code_answers = tickets.len(),
        "Attempt re-graded"
    );

    Ok(tickets)
}

async fn fetch_attempt(conn: &mut SqliteConnection, attempt_id: i64) -> Result<Attempt, AppError> {
    sqlx::query_as("SELECT * FROM attempts WHERE id = ?")
        .bind(attempt_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Attempt not found".to_string()))
}

#[derive(FromRow)]
struct AttemptRow {
    #[sqlx(flatten)]
    attempt: Attempt,
    quiz_title: String,
    duration_minutes: i64,
}

/// Builds the full attempt view.
///
/// With `owner` set, attempts of anybody else look exactly like missing ones.
pub async fn load_attempt_view(
    pool: &SqlitePool,
    attempt_id: i64,
    owner: Option<i64>,
) -> Result<AttemptView, AppError> {
    let row: AttemptRow = sqlx::query_as(
        r#"
        SELECT a.*, q.title AS quiz_title, q.duration_minutes
        FROM attempts a
        JOIN quizzes q ON q.id = a.quiz_id
        WHERE a.id = ?
        "#,
    )
    .bind(attempt_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Attempt not found".to_string()))?;

    if owner.is_some_and(|user_id| user_id != row.attempt.user_id) {
        return Err(PolicyViolation::NotOwner.into());
    }

    let answers: Vec<AnswerView> = sqlx::query_as(
        r#"
        SELECT
            a.id, a.question_id, q.question_type, q.points,
            a.selected_option, a.answer_text, a.code_submitted,
            a.graded_score, a.is_correct, a.grading_status, a.grading_error, a.graded_at
        FROM answers a
        JOIN questions q ON q.id = a.question_id
        WHERE a.attempt_id = ?
        ORDER BY q.sort_order, q.id
        "#,
    )
    .bind(attempt_id)
    .fetch_all(pool)
    .await?;

    let jobs: Vec<i64> = sqlx::query_scalar(
        r#"
        SELECT j.id
        FROM grading_jobs j
        JOIN answers a ON a.id = j.answer_id
        WHERE a.attempt_id = ?
        ORDER BY j.id
        "#,
    )
    .bind(attempt_id)
    .fetch_all(pool)
    .await?;

    Ok(AttemptView::assemble(
        row.attempt,
        row.quiz_title,
        row.duration_minutes,
        answers,
        jobs,
        Utc::now(),
    ))
}

/// Lists the caller's attempts, newest first.
pub async fn list_attempts(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let ids: Vec<i64> =
        sqlx::query_scalar("SELECT id FROM attempts WHERE user_id = ? ORDER BY id DESC")
            .bind(user_id)
            .fetch_all(&pool)
            .await?;

    let mut views = Vec::with_capacity(ids.len());
    for id in ids {
        views.push(load_attempt_view(&pool, id, Some(user_id)).await?);
    }

    Ok(Json(views))
}

/// Returns one of the caller's attempts.
pub async fn get_attempt(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let view = load_attempt_view(&pool, attempt_id, Some(user_id)).await?;
    Ok(Json(view))
}

/// Top submitted attempts: highest score first, earlier submission wins ties.
pub async fn get_leaderboard(State(pool): State<SqlitePool>) -> Result<impl IntoResponse, AppError> {
    let leaderboard: Vec<LeaderboardEntry> = sqlx::query_as(
        r#"
        SELECT
            a.id AS attempt_id,
            u.username,
            q.title AS quiz_title,
            a.total_score,
            a.submission_time
        FROM attempts a
        JOIN users u ON u.id = a.user_id
        JOIN quizzes q ON q.id = a.quiz_id
        WHERE a.submitted = 1
        ORDER BY a.total_score DESC, a.submission_time ASC, a.id ASC
        LIMIT ?
        "#,
    )
    .bind(LEADERBOARD_SIZE)
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to fetch leaderboard: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    Ok(Json(leaderboard))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn quiz() -> Quiz {
        Quiz {
            id: 1,
            title: "Rust basics".to_string(),
            description: String::new(),
            duration_minutes: 30,
            total_marks: 10,
            active: true,
            start_time: None,
            end_time: None,
            max_attempts: 1,
            random_order: false,
        }
    }

    #[test]
    fn test_first_attempt_is_allowed() {
        assert_eq!(check_eligibility(&quiz(), 0, Utc::now()), Ok(()));
    }

    #[test]
    fn test_attempt_limit() {
        let mut q = quiz();
        assert_eq!(
            check_eligibility(&q, 1, Utc::now()),
            Err(PolicyViolation::AttemptLimitExceeded)
        );
        q.max_attempts = 3;
        assert_eq!(check_eligibility(&q, 2, Utc::now()), Ok(()));
    }

    #[test]
    fn test_window_policy() {
        let now = Utc::now();
        let mut q = quiz();
        q.start_time = Some(now + Duration::minutes(5));
        assert_eq!(
            check_eligibility(&q, 0, now),
            Err(PolicyViolation::QuizNotYetOpen)
        );

        q.start_time = Some(now - Duration::minutes(10));
        q.end_time = Some(now - Duration::minutes(5));
        assert_eq!(check_eligibility(&q, 0, now), Err(PolicyViolation::QuizClosed));
    }

    #[test]
    fn test_inactive_quiz() {
        let mut q = quiz();
        q.active = false;
        assert_eq!(
            check_eligibility(&q, 0, Utc::now()),
            Err(PolicyViolation::QuizInactive)
        );
    }

    #[test]
    fn test_duplicate_questions_are_rejected() {
        let answer = SubmittedAnswer {
            question: 3,
            selected_option: None,
            answer_text: Some("x".to_string()),
            code_submitted: None,
        };
        assert!(reject_duplicate_questions(&[answer.clone()]).is_ok());
        assert!(reject_duplicate_questions(&[answer.clone(), answer]).is_err());
    }
}
