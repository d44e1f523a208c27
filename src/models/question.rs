// src/models/question.rs

use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use validator::Validate;

use crate::config::DEFAULT_QUESTION_POINTS;

/// Closed set of question kinds.
/// Stored as the short tags 'mcq', 'tf', 'text' and 'code'.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
pub enum QuestionType {
    #[serde(rename = "mcq")]
    #[sqlx(rename = "mcq")]
    MultipleChoice,
    #[serde(rename = "tf")]
    #[sqlx(rename = "tf")]
    TrueFalse,
    #[serde(rename = "text")]
    #[sqlx(rename = "text")]
    Text,
    #[serde(rename = "code")]
    #[sqlx(rename = "code")]
    Code,
}

/// Represents the 'questions' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub quiz_id: i64,

    /// The prompt shown to the student.
    pub text: String,

    pub question_type: QuestionType,
    pub points: i64,

    /// Coding questions only.
    pub problem_statement: Option<String>,
    pub sample_input: Option<String>,
    pub sample_output: Option<String>,

    /// Ordering key inside the quiz; ties fall back to insertion order.
    pub sort_order: i64,

    /// Canonical answer of a free-text question.
    pub correct_text_answer: Option<String>,
}

/// Represents the 'choices' table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Choice {
    pub id: i64,
    pub question_id: i64,
    pub choice_text: String,
    pub is_correct: bool,
}

/// Represents the 'test_cases' table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TestCase {
    pub id: i64,
    pub question_id: i64,
    pub input_data: String,
    pub expected_output: String,
    pub is_hidden: bool,
}

/// DTO for sending a question to a student.
/// Never carries correctness flags, canonical answers or hidden test cases.
#[derive(Debug, Serialize)]
pub struct PublicQuestion {
    pub id: i64,
    pub text: String,
    pub question_type: QuestionType,
    pub points: i64,
    pub order: i64,
    pub options: Vec<PublicChoice>,
    pub problem_statement: Option<String>,
    pub sample_input: Option<String>,
    pub sample_output: Option<String>,
    pub test_cases: Vec<PublicTestCase>,
}

#[derive(Debug, Serialize)]
pub struct PublicChoice {
    pub id: i64,
    pub choice_text: String,
}

#[derive(Debug, Serialize)]
pub struct PublicTestCase {
    pub input_data: String,
    pub expected_output: String,
}

impl PublicQuestion {
    pub fn build(question: Question, choices: &[Choice], test_cases: &[TestCase]) -> Self {
        let options = choices
            .iter()
            .filter(|c| c.question_id == question.id)
            .map(|c| PublicChoice {
                id: c.id,
                choice_text: c.choice_text.clone(),
            })
            .collect();

        let test_cases = test_cases
            .iter()
            .filter(|tc| tc.question_id == question.id && !tc.is_hidden)
            .map(|tc| PublicTestCase {
                input_data: tc.input_data.clone(),
                expected_output: tc.expected_output.clone(),
            })
            .collect();

        Self {
            id: question.id,
            text: question.text,
            question_type: question.question_type,
            points: question.points,
            order: question.sort_order,
            options,
            problem_statement: question.problem_statement,
            sample_input: question.sample_input,
            sample_output: question.sample_output,
            test_cases,
        }
    }
}

fn default_points() -> i64 {
    DEFAULT_QUESTION_POINTS
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChoiceRequest {
    #[validate(length(min = 1, max = 255))]
    pub choice_text: String,
    #[serde(default)]
    pub is_correct: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TestCaseRequest {
    #[serde(default)]
    #[validate(length(max = 100000))]
    pub input_data: String,
    #[validate(length(max = 100000))]
    pub expected_output: String,
    #[serde(default)]
    pub is_hidden: bool,
}

/// DTO for creating a question with its choices and test cases.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateQuestionRequest {
    #[validate(length(min = 1, max = 5000))]
    pub text: String,
    pub question_type: QuestionType,
    #[serde(default = "default_points")]
    #[validate(range(min = 0, max = 10000))]
    pub points: i64,
    #[serde(default)]
    pub order: i64,
    pub problem_statement: Option<String>,
    pub sample_input: Option<String>,
    pub sample_output: Option<String>,
    #[validate(length(max = 255))]
    pub correct_text_answer: Option<String>,
    #[serde(default)]
    #[validate(nested)]
    pub choices: Vec<ChoiceRequest>,
    #[serde(default)]
    #[validate(nested)]
    pub test_cases: Vec<TestCaseRequest>,
}

impl CreateQuestionRequest {
    /// Checks that the question can actually be graded.
    pub fn check_shape(&self) -> Result<(), String> {
        let correct = self.choices.iter().filter(|c| c.is_correct).count();
        match self.question_type {
            QuestionType::TrueFalse if correct != 1 => {
                Err("A true/false question needs exactly one correct choice.".to_string())
            }
            QuestionType::MultipleChoice if correct == 0 => {
                Err("A multiple-choice question needs at least one correct choice.".to_string())
            }
            QuestionType::Text
                if correct == 0
                    && self
                        .correct_text_answer
                        .as_deref()
                        .is_none_or(|a| a.trim().is_empty()) =>
            {
                Err("A text question needs a correct answer.".to_string())
            }
            QuestionType::Code if self.test_cases.is_empty() => {
                Err("A coding question needs at least one test case.".to_string())
            }
            _ => Ok(()),
        }
    }
}
