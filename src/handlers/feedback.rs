// src/handlers/feedback.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use sqlx::SqlitePool;
use validator::Validate;

use crate::{
    error::AppError,
    models::feedback::{CreateFeedbackRequest, Feedback},
    utils::{html::strip_html, jwt::Claims},
};

#[derive(sqlx::FromRow)]
struct AttemptOwner {
    user_id: i64,
    quiz_id: i64,
}

/// Leaves feedback on one of the caller's attempts.
pub async fn create_feedback(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateFeedbackRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let user_id = claims.user_id()?;

    let owner: AttemptOwner = sqlx::query_as("SELECT user_id, quiz_id FROM attempts WHERE id = ?")
        .bind(payload.attempt_id)
        .fetch_optional(&pool)
        .await?
        .filter(|row: &AttemptOwner| row.user_id == user_id)
        .ok_or_else(|| AppError::NotFound("Attempt not found".to_string()))?;

    let text = strip_html(&payload.feedback_text);
    if text.trim().is_empty() {
        return Err(AppError::BadRequest("Feedback cannot be empty".to_string()));
    }

    let feedback: Feedback = sqlx::query_as(
        r#"
        INSERT INTO feedback (attempt_id, user_id, quiz_id, feedback_text, submitted_at)
        VALUES (?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(payload.attempt_id)
    .bind(owner.user_id)
    .bind(owner.quiz_id)
    .bind(text)
    .bind(Utc::now())
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to store feedback: {:?}", e);
        AppError::from(e)
    })?;

    Ok((StatusCode::CREATED, Json(feedback)))
}

/// Lists every feedback entry of a quiz, oldest first.
/// Admin only.
pub async fn list_quiz_feedback(
    State(pool): State<SqlitePool>,
    Path(quiz_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let feedback: Vec<Feedback> =
        sqlx::query_as("SELECT * FROM feedback WHERE quiz_id = ? ORDER BY submitted_at, id")
            .bind(quiz_id)
            .fetch_all(&pool)
            .await?;

    Ok(Json(feedback))
}
