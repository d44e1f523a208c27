// src/models/answer.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};

use crate::models::question::QuestionType;

/// Where an answer is in its grading life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum GradingStatus {
    /// Waiting for the sandbox.
    Pending,
    Graded,
    /// Grading gave up; `grading_error` says why.
    Failed,
}

/// Represents the 'answers' table joined with the question it answers.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AnswerView {
    pub id: i64,
    pub question_id: i64,
    pub question_type: QuestionType,
    pub points: i64,

    /// Selected choice ids for MCQ, a boolean for true/false.
    pub selected_option: Option<Json<serde_json::Value>>,
    pub answer_text: Option<String>,
    pub code_submitted: Option<String>,

    /// `None` until grading finished.
    pub graded_score: Option<i64>,
    pub is_correct: Option<bool>,
    pub grading_status: GradingStatus,
    pub grading_error: Option<String>,
    pub graded_at: Option<DateTime<Utc>>,
}

/// One answer inside a submit request.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmittedAnswer {
    /// Question id.
    pub question: i64,
    pub selected_option: Option<serde_json::Value>,
    pub answer_text: Option<String>,
    pub code_submitted: Option<String>,
}
