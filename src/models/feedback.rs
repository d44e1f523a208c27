// src/models/feedback.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'feedback' table. Rows are never updated.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Feedback {
    pub id: i64,
    pub attempt_id: i64,
    pub user_id: i64,
    pub quiz_id: i64,
    pub feedback_text: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateFeedbackRequest {
    pub attempt_id: i64,
    #[validate(length(min = 1, max = 5000))]
    pub feedback_text: String,
}
