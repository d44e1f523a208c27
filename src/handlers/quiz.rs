// src/handlers/quiz.rs

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::Utc;
use sqlx::SqlitePool;

use crate::{
    error::AppError,
    models::{
        question::{Choice, PublicQuestion, Question, TestCase},
        quiz::{Quiz, QuizDetail},
    },
};

/// Lists active quizzes whose window contains the current time.
pub async fn list_quizzes(State(pool): State<SqlitePool>) -> Result<impl IntoResponse, AppError> {
    let quizzes: Vec<Quiz> = sqlx::query_as("SELECT * FROM quizzes WHERE active = 1 ORDER BY id")
        .fetch_all(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to list quizzes: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    let now = Utc::now();
    let open: Vec<Quiz> = quizzes.into_iter().filter(|q| q.is_open_at(now)).collect();

    Ok(Json(open))
}

/// Returns a quiz with its questions, stripped of anything that reveals
/// the answers.
///
/// Questions follow their ordering key (then insertion) unless the quiz
/// asks for random order.
pub async fn get_quiz(
    State(pool): State<SqlitePool>,
    Path(quiz_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let quiz: Quiz = sqlx::query_as("SELECT * FROM quizzes WHERE id = ? AND active = 1")
        .bind(quiz_id)
        .fetch_optional(&pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Quiz not found".to_string()))?;

    let questions: Vec<Question> = sqlx::query_as(
        r#"
        SELECT * FROM questions
        WHERE quiz_id = ?
        ORDER BY CASE WHEN ? THEN RANDOM() ELSE 0 END, sort_order, id
        "#,
    )
    .bind(quiz_id)
    .bind(quiz.random_order)
    .fetch_all(&pool)
    .await?;

    let choices: Vec<Choice> = sqlx::query_as(
        r#"
        SELECT c.* FROM choices c
        JOIN questions q ON q.id = c.question_id
        WHERE q.quiz_id = ?
        ORDER BY c.id
        "#,
    )
    .bind(quiz_id)
    .fetch_all(&pool)
    .await?;

    let test_cases: Vec<TestCase> = sqlx::query_as(
        r#"
        SELECT t.* FROM test_cases t
        JOIN questions q ON q.id = t.question_id
        WHERE q.quiz_id = ?
        ORDER BY t.id
        "#,
    )
    .bind(quiz_id)
    .fetch_all(&pool)
    .await?;

    let questions = questions
        .into_iter()
        .map(|q| PublicQuestion::build(q, &choices, &test_cases))
        .collect();

    Ok(Json(QuizDetail { quiz, questions }))
}
