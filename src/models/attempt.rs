// src/models/attempt.rs

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::answer::{AnswerView, GradingStatus, SubmittedAnswer};

/// Represents the 'attempts' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Attempt {
    pub id: i64,
    pub user_id: i64,
    pub quiz_id: i64,
    pub start_time: DateTime<Utc>,
    pub submitted: bool,
    pub submission_time: Option<DateTime<Utc>>,

    /// Always `SUM(answers.graded_score)` for this attempt.
    pub total_score: i64,

    /// Sum of the points of every question answered in the submission.
    pub total_possible_points: i64,
}

impl Attempt {
    /// Seconds spent so far, or until submission.
    pub fn time_taken(&self, now: DateTime<Utc>) -> i64 {
        let end = match (self.submitted, self.submission_time) {
            (true, Some(at)) => at,
            (true, None) => return 0,
            (false, _) => now,
        };
        (end - self.start_time).num_seconds().max(0)
    }
}

/// Full attempt as returned to its owner.
#[derive(Debug, Serialize)]
pub struct AttemptView {
    pub id: i64,
    pub quiz_id: i64,
    pub quiz_title: String,
    pub start_time: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub submitted: bool,
    pub submission_time: Option<DateTime<Utc>>,
    pub total_score: i64,
    pub total_possible_points: i64,
    pub time_taken_seconds: i64,

    /// False while any code answer is still waiting for the sandbox.
    pub grading_complete: bool,
    pub answers: Vec<AnswerView>,

    /// Tickets of the grading jobs issued for this attempt.
    pub grading_jobs: Vec<i64>,
}

impl AttemptView {
    pub fn assemble(
        attempt: Attempt,
        quiz_title: String,
        duration_minutes: i64,
        answers: Vec<AnswerView>,
        grading_jobs: Vec<i64>,
        now: DateTime<Utc>,
    ) -> Self {
        let grading_complete = answers
            .iter()
            .all(|a| a.grading_status != GradingStatus::Pending);

        Self {
            id: attempt.id,
            quiz_id: attempt.quiz_id,
            quiz_title,
            start_time: attempt.start_time,
            deadline: attempt.start_time + Duration::minutes(duration_minutes),
            submitted: attempt.submitted,
            submission_time: attempt.submission_time,
            total_score: attempt.total_score,
            total_possible_points: attempt.total_possible_points,
            time_taken_seconds: attempt.time_taken(now),
            grading_complete,
            answers,
            grading_jobs,
        }
    }
}

/// DTO for submitting an attempt.
#[derive(Debug, Deserialize)]
pub struct SubmitAttemptRequest {
    pub answers: Vec<SubmittedAnswer>,
}

#[derive(Debug, Serialize)]
pub struct StartAttemptResponse {
    pub attempt_id: i64,
}

/// Aggregated row for displaying the leaderboard.
#[derive(Debug, Serialize, FromRow)]
pub struct LeaderboardEntry {
    pub attempt_id: i64,
    pub username: String,
    pub quiz_title: String,
    pub total_score: i64,
    pub submission_time: Option<DateTime<Utc>>,
}
