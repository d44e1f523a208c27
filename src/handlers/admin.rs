// src/handlers/admin.rs

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use sqlx::SqlitePool;
use validator::Validate;

use crate::{
    db,
    error::AppError,
    grading::coordinator::{GradingQueue, recompute_attempt_score, recompute_possible_points},
    handlers::attempt::{load_attempt_view, regrade},
    models::{
        question::CreateQuestionRequest,
        quiz::{Quiz, QuizRequest},
    },
    utils::lock::AttemptLocks,
};

/// Creates a quiz.
/// Admin only.
pub async fn create_quiz(
    State(pool): State<SqlitePool>,
    Json(payload): Json<QuizRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    payload.check_window().map_err(AppError::BadRequest)?;

    let quiz: Quiz = sqlx::query_as(
        r#"
        INSERT INTO quizzes (
            title, description, duration_minutes, total_marks, active,
            start_time, end_time, max_attempts, random_order
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(&payload.title)
    .bind(&payload.description)
    .bind(payload.duration_minutes)
    .bind(payload.total_marks)
    .bind(payload.active)
    .bind(payload.start_time)
    .bind(payload.end_time)
    .bind(payload.max_attempts)
    .bind(payload.random_order)
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create quiz: {:?}", e);
        AppError::from(e)
    })?;

    tracing::info!(quiz_id = quiz.id, "Quiz created");
    Ok((StatusCode::CREATED, Json(quiz)))
}

/// Replaces every setting of a quiz.
/// Admin only.
pub async fn update_quiz(
    State(pool): State<SqlitePool>,
    Path(id): Path<i64>,
    Json(payload): Json<QuizRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    payload.check_window().map_err(AppError::BadRequest)?;

    let quiz: Quiz = sqlx::query_as(
        r#"
        UPDATE quizzes
        SET title = ?, description = ?, duration_minutes = ?, total_marks = ?, active = ?,
            start_time = ?, end_time = ?, max_attempts = ?, random_order = ?
        WHERE id = ?
        RETURNING *
        "#,
    )
    .bind(&payload.title)
    .bind(&payload.description)
    .bind(payload.duration_minutes)
    .bind(payload.total_marks)
    .bind(payload.active)
    .bind(payload.start_time)
    .bind(payload.end_time)
    .bind(payload.max_attempts)
    .bind(payload.random_order)
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Quiz not found".to_string()))?;

    Ok(Json(quiz))
}

/// Deletes a quiz together with its questions, attempts and feedback.
/// Admin only; this is a teardown operation.
pub async fn delete_quiz(
    State(pool): State<SqlitePool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query("DELETE FROM quizzes WHERE id = ?")
        .bind(id)
        .execute(&pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Quiz not found".to_string()));
    }

    tracing::warn!(quiz_id = id, "Quiz deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Adds a question, with its choices and test cases, to a quiz.
/// Admin only.
pub async fn create_question(
    State(pool): State<SqlitePool>,
    Path(quiz_id): Path<i64>,
    Json(payload): Json<CreateQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    payload.check_shape().map_err(AppError::BadRequest)?;

    let mut tx = db::begin_write(&pool).await?;

    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM quizzes WHERE id = ?")
        .bind(quiz_id)
        .fetch_optional(&mut *tx)
        .await?;
    if exists.is_none() {
        return Err(AppError::NotFound("Quiz not found".to_string()));
    }

    let question_id = sqlx::query(
        r#"
        INSERT INTO questions (
            quiz_id, text, question_type, points, problem_statement,
            sample_input, sample_output, sort_order, correct_text_answer
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(quiz_id)
    .bind(&payload.text)
    .bind(payload.question_type)
    .bind(payload.points)
    .bind(&payload.problem_statement)
    .bind(&payload.sample_input)
    .bind(&payload.sample_output)
    .bind(payload.order)
    .bind(&payload.correct_text_answer)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    let mut choice_ids = Vec::with_capacity(payload.choices.len());
    for choice in &payload.choices {
        let id = sqlx::query("INSERT INTO choices (question_id, choice_text, is_correct) VALUES (?, ?, ?)")
            .bind(question_id)
            .bind(&choice.choice_text)
            .bind(choice.is_correct)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();
        choice_ids.push(id);
    }

    for case in &payload.test_cases {
        sqlx::query(
            "INSERT INTO test_cases (question_id, input_data, expected_output, is_hidden) VALUES (?, ?, ?, ?)",
        )
        .bind(question_id)
        .bind(&case.input_data)
        .bind(&case.expected_output)
        .bind(case.is_hidden)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    tracing::info!(quiz_id, question_id, question_type = ?payload.question_type, "Question created");
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "id": question_id, "choice_ids": choice_ids })),
    ))
}

/// Deletes a question with its choices, test cases and answers.
/// Totals of attempts that had answered it are recomputed.
/// Admin only.
pub async fn delete_question(
    State(pool): State<SqlitePool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut tx = db::begin_write(&pool).await?;

    let affected: Vec<i64> =
        sqlx::query_scalar("SELECT DISTINCT attempt_id FROM answers WHERE question_id = ?")
            .bind(id)
            .fetch_all(&mut *tx)
            .await?;

    let result = sqlx::query("DELETE FROM questions WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Question not found".to_string()));
    }

    for attempt_id in &affected {
        recompute_possible_points(&mut tx, *attempt_id).await?;
        recompute_attempt_score(&mut tx, *attempt_id).await?;
    }

    tx.commit().await?;

    tracing::info!(question_id = id, attempts_rescored = affected.len(), "Question deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Re-grades a submitted attempt and returns its refreshed view.
/// Admin only.
pub async fn regrade_attempt(
    State(pool): State<SqlitePool>,
    State(queue): State<GradingQueue>,
    State(locks): State<AttemptLocks>,
    Path(attempt_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let _guard = locks.lock(attempt_id).await;
    regrade(&pool, &queue, attempt_id).await?;

    let view = load_attempt_view(&pool, attempt_id, None).await?;
    Ok(Json(view))
}
