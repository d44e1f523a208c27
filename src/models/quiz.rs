// src/models/quiz.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::models::question::PublicQuestion;

/// Represents the 'quizzes' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Quiz {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub duration_minutes: i64,
    pub total_marks: i64,
    pub active: bool,

    /// Optional opening bound. `None` means open since forever.
    pub start_time: Option<DateTime<Utc>>,

    /// Optional closing bound. `None` means never closes.
    pub end_time: Option<DateTime<Utc>>,

    pub max_attempts: i64,

    /// Serve questions in random order instead of by ordering key.
    pub random_order: bool,
}

impl Quiz {
    /// Whether `now` falls inside the (possibly open-ended) window.
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.start_time.is_none_or(|start| now >= start)
            && self.end_time.is_none_or(|end| now <= end)
    }
}

/// Quiz together with the questions a student may see.
#[derive(Debug, Serialize)]
pub struct QuizDetail {
    #[serde(flatten)]
    pub quiz: Quiz,
    pub questions: Vec<PublicQuestion>,
}

fn default_duration() -> i64 {
    60
}

fn default_max_attempts() -> i64 {
    1
}

fn default_true() -> bool {
    true
}

/// DTO for creating or replacing a quiz (admin).
#[derive(Debug, Deserialize, Validate)]
pub struct QuizRequest {
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    #[serde(default)]
    #[validate(length(max = 5000))]
    pub description: String,
    #[serde(default = "default_duration")]
    #[validate(range(min = 1, max = 10080))]
    pub duration_minutes: i64,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub total_marks: i64,
    #[serde(default = "default_true")]
    pub active: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1))]
    pub max_attempts: i64,
    #[serde(default)]
    pub random_order: bool,
}

impl QuizRequest {
    /// A window with both bounds must open before it closes.
    pub fn check_window(&self) -> Result<(), String> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) if start >= end => {
                Err("Quiz start_time must be before end_time.".to_string())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn quiz(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Quiz {
        Quiz {
            id: 1,
            title: "q".to_string(),
            description: String::new(),
            duration_minutes: 60,
            total_marks: 0,
            active: true,
            start_time: start,
            end_time: end,
            max_attempts: 1,
            random_order: false,
        }
    }

    #[test]
    fn test_open_ended_window_is_always_open() {
        assert!(quiz(None, None).is_open_at(Utc::now()));
    }

    #[test]
    fn test_window_bounds() {
        let now = Utc::now();
        let q = quiz(Some(now - Duration::hours(1)), Some(now + Duration::hours(1)));
        assert!(q.is_open_at(now));
        assert!(!q.is_open_at(now - Duration::hours(2)));
        assert!(!q.is_open_at(now + Duration::hours(2)));
    }

    #[test]
    fn test_check_window_rejects_inverted_bounds() {
        let now = Utc::now();
        let mut req: QuizRequest =
            serde_json::from_value(serde_json::json!({ "title": "t" })).unwrap();
        assert!(req.check_window().is_ok());

        req.start_time = Some(now);
        req.end_time = Some(now);
        assert!(req.check_window().is_err());

        req.end_time = Some(now + Duration::minutes(1));
        assert!(req.check_window().is_ok());
    }
}
