// src/handlers/profile.rs

use axum::{Extension, Json, extract::State, response::IntoResponse};
use serde_json::json;
use sqlx::SqlitePool;
use validator::Validate;

use crate::{
    error::AppError,
    handlers::auth::is_unique_violation,
    models::user::{ChangePasswordRequest, ProfileResponse, UpdateProfileRequest},
    utils::{
        hash::{hash_password, verify_password},
        jwt::Claims,
    },
};

/// Returns the caller's account with counts over their attempts.
pub async fn get_profile(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let profile = fetch_profile(&pool, claims.user_id()?).await?;
    Ok(Json(profile))
}

/// Renames the current user.
///
/// Existing tokens stay valid: they carry the user id, not the name.
pub async fn update_profile(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let user_id = claims.user_id()?;

    let updated = sqlx::query("UPDATE users SET username = ? WHERE id = ?")
        .bind(&payload.username)
        .bind(user_id)
        .execute(&pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(format!("Username '{}' already exists", payload.username))
            } else {
                AppError::from(e)
            }
        })?
        .rows_affected();

    if updated == 0 {
        return Err(AppError::NotFound("User not found".to_string()));
    }

    tracing::info!(user_id, "Profile updated");
    Ok(Json(fetch_profile(&pool, user_id).await?))
}

/// Changes the current user's password after checking the old one.
pub async fn change_password(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let user_id = claims.user_id()?;

    let stored: String = sqlx::query_scalar("SELECT password FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(&pool)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    if !verify_password(&payload.old_password, &stored)? {
        return Err(AppError::BadRequest("Wrong password.".to_string()));
    }

    let hashed = hash_password(&payload.new_password)?;
    sqlx::query("UPDATE users SET password = ? WHERE id = ?")
        .bind(&hashed)
        .bind(user_id)
        .execute(&pool)
        .await?;

    tracing::info!(user_id, "Password changed");
    Ok(Json(json!({ "detail": "Password changed successfully." })))
}

async fn fetch_profile(pool: &SqlitePool, user_id: i64) -> Result<ProfileResponse, AppError> {
    sqlx::query_as(
        r#"
        SELECT
            u.id, u.username, u.role, u.created_at,
            (SELECT COUNT(*) FROM attempts WHERE user_id = u.id) AS attempts_count,
            (SELECT COUNT(*) FROM attempts WHERE user_id = u.id AND submitted = 1) AS submitted_count,
            (SELECT MAX(total_score) FROM attempts WHERE user_id = u.id AND submitted = 1) AS best_score
        FROM users u
        WHERE u.id = ?
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("User not found".to_string()))
}
