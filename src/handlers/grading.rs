// src/handlers/grading.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use sqlx::{FromRow, SqlitePool};

use crate::{error::AppError, models::grading_job::GradingJob, utils::jwt::Claims};

#[derive(FromRow)]
struct TicketRow {
    #[sqlx(flatten)]
    job: GradingJob,
    owner_id: i64,
}

/// Looks up a grading ticket. Visible to the attempt owner and admins.
pub async fn get_grading_job(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Path(job_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let row: TicketRow = sqlx::query_as(
        r#"
        SELECT
            j.id, j.answer_id, j.status, j.attempts, j.last_error, j.created_at, j.updated_at,
            t.user_id AS owner_id
        FROM grading_jobs j
        JOIN answers a ON a.id = j.answer_id
        JOIN attempts t ON t.id = a.attempt_id
        WHERE j.id = ?
        "#,
    )
    .bind(job_id)
    .fetch_optional(&pool)
    .await?
    .filter(|row: &TicketRow| claims.is_admin() || row.owner_id == user_id)
    .ok_or_else(|| AppError::NotFound("Grading job not found".to_string()))?;

    Ok(Json(row.job))
}
