// src/grading/grader.rs

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;
use sqlx::SqliteConnection;

use crate::models::question::QuestionType;

/// What a question accepts as correct.
///
/// One variant per question kind, so a new kind cannot be added without
/// teaching `grade` about it.
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerKey {
    /// Exact set of correct choice ids (multi-select, no partial credit).
    MultipleChoice { correct_ids: BTreeSet<i64> },
    /// `None` when no choice is flagged correct; nothing matches then.
    TrueFalse { correct: Option<bool> },
    /// Every accepted spelling: the canonical answer plus correct choices.
    Text { accepted: Vec<String> },
    /// Resolved later by the sandbox.
    Code,
}

/// A question as the grader sees it.
#[derive(Debug, Clone)]
pub struct GradableQuestion {
    pub id: i64,
    pub points: i64,
    pub key: AnswerKey,
}

/// The raw value a student sent for one question.
#[derive(Debug, Clone, Copy, Default)]
pub struct Submission<'a> {
    pub selected_option: Option<&'a Value>,
    pub answer_text: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grade {
    Scored { is_correct: bool, points: i64 },
    Deferred,
}

impl Grade {
    fn from_correctness(is_correct: bool, points: i64) -> Self {
        Grade::Scored {
            is_correct,
            points: if is_correct { points } else { 0 },
        }
    }
}

/// Malformed answer payloads. The whole submission is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GradeError {
    InvalidSelection { question_id: i64, reason: String },
}

impl std::fmt::Display for GradeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GradeError::InvalidSelection {
                question_id,
                reason,
            } => write!(f, "Invalid answer for question {}: {}", question_id, reason),
        }
    }
}

impl std::error::Error for GradeError {}

impl From<GradeError> for crate::error::AppError {
    fn from(err: GradeError) -> Self {
        crate::error::AppError::BadRequest(err.to_string())
    }
}

/// Grades one answer. Code answers come back as `Grade::Deferred`.
pub fn grade(question: &GradableQuestion, submission: Submission<'_>) -> Result<Grade, GradeError> {
    let is_correct = match &question.key {
        AnswerKey::MultipleChoice { correct_ids } => {
            let selected = selected_ids(question.id, submission)?;
            // An empty key would make "nothing selected" correct.
            !correct_ids.is_empty() && &selected == correct_ids
        }
        AnswerKey::TrueFalse { correct } => match correct {
            Some(expected) => truthiness(submission) == *expected,
            None => false,
        },
        AnswerKey::Text { accepted } => match submitted_text(submission) {
            Some(text) => {
                let given = normalize_text(text);
                !given.is_empty() && accepted.iter().any(|a| normalize_text(a) == given)
            }
            None => false,
        },
        AnswerKey::Code => return Ok(Grade::Deferred),
    };

    Ok(Grade::from_correctness(is_correct, question.points))
}

/// Trimmed and case folded; internal whitespace is kept.
pub fn normalize_text(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Normalizes an MCQ selection to a set of choice ids.
/// A bare scalar is a singleton; nothing selected is the empty set.
fn selected_ids(question_id: i64, submission: Submission<'_>) -> Result<BTreeSet<i64>, GradeError> {
    let invalid = |reason: &str| GradeError::InvalidSelection {
        question_id,
        reason: reason.to_string(),
    };

    let scalar = |value: &Value| -> Result<i64, GradeError> {
        match value {
            Value::Number(n) => n.as_i64().ok_or_else(|| invalid("choice id must be an integer")),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| invalid("choice id must be an integer")),
            _ => Err(invalid("choice id must be an integer")),
        }
    };

    match submission.selected_option {
        Some(Value::Array(items)) => items.iter().map(&scalar).collect(),
        Some(Value::Null) | None => match submission.answer_text.map(str::trim) {
            Some(text) if !text.is_empty() => text
                .parse::<i64>()
                .map(|id| BTreeSet::from([id]))
                .map_err(|_| invalid("choice id must be an integer")),
            _ => Ok(BTreeSet::new()),
        },
        Some(value) => scalar(value).map(|id| BTreeSet::from([id])),
    }
}

/// Coerces a true/false answer to a boolean.
///
/// Booleans pass through, strings are compared case-insensitively to
/// "true", everything else follows truthiness (non-zero, non-empty).
fn truthiness(submission: Submission<'_>) -> bool {
    match submission.selected_option {
        Some(Value::Null) | None => submission
            .answer_text
            .is_some_and(|text| text.trim().eq_ignore_ascii_case("true")),
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("true"),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
    }
}

fn submitted_text(submission: Submission<'_>) -> Option<&str> {
    match (submission.answer_text, submission.selected_option) {
        (Some(text), _) if !text.trim().is_empty() => Some(text),
        (_, Some(Value::String(s))) => Some(s.as_str()),
        (text, _) => text,
    }
}

#[derive(sqlx::FromRow)]
struct KeyRow {
    id: i64,
    question_type: QuestionType,
    points: i64,
    correct_text_answer: Option<String>,
}

#[derive(sqlx::FromRow)]
struct CorrectChoiceRow {
    id: i64,
    question_id: i64,
    choice_text: String,
}

/// Loads the answer keys of every question in a quiz, keyed by question id.
pub async fn load_answer_keys(
    conn: &mut SqliteConnection,
    quiz_id: i64,
) -> Result<HashMap<i64, GradableQuestion>, sqlx::Error> {
    let rows: Vec<KeyRow> = sqlx::query_as(
        "SELECT id, question_type, points, correct_text_answer FROM questions WHERE quiz_id = ?",
    )
    .bind(quiz_id)
    .fetch_all(&mut *conn)
    .await?;

    let choices: Vec<CorrectChoiceRow> = sqlx::query_as(
        r#"
        SELECT c.id, c.question_id, c.choice_text
        FROM choices c
        JOIN questions q ON q.id = c.question_id
        WHERE q.quiz_id = ? AND c.is_correct = 1
        ORDER BY c.id
        "#,
    )
    .bind(quiz_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut by_question: HashMap<i64, Vec<CorrectChoiceRow>> = HashMap::new();
    for choice in choices {
        by_question.entry(choice.question_id).or_default().push(choice);
    }

    Ok(rows
        .into_iter()
        .map(|row| {
            let correct = by_question.remove(&row.id).unwrap_or_default();
            let key = match row.question_type {
                QuestionType::MultipleChoice => AnswerKey::MultipleChoice {
                    correct_ids: correct.iter().map(|c| c.id).collect(),
                },
                QuestionType::TrueFalse => AnswerKey::TrueFalse {
                    correct: correct
                        .first()
                        .map(|c| c.choice_text.trim().eq_ignore_ascii_case("true")),
                },
                QuestionType::Text => AnswerKey::Text {
                    accepted: row
                        .correct_text_answer
                        .into_iter()
                        .chain(correct.into_iter().map(|c| c.choice_text))
                        .filter(|a| !a.trim().is_empty())
                        .collect(),
                },
                QuestionType::Code => AnswerKey::Code,
            };
            (
                row.id,
                GradableQuestion {
                    id: row.id,
                    points: row.points,
                    key,
                },
            )
        })
        .collect())
}
