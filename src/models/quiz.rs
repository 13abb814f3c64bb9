// src/models/quiz.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'quizzes' table in the database.
///
/// Invariant: `passing_score <= total_points`, enforced at create/update
/// time (and backed by a table CHECK).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Quiz {
    pub id: i64,
    pub course_id: i64,
    pub lesson_id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub total_points: i32,
    pub passing_score: i32,
    pub time_limit_minutes: Option<i32>,
    pub max_attempts: i32,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Represents the 'questions' table.
///
/// Question type: 'multiple_choice', 'true_false' or 'short_answer'. The
/// first two are objective (auto-graded against the flagged-correct
/// option); short answers wait for manual review.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub quiz_id: i64,
    pub question_text: String,
    pub question_type: String,
    pub points: i32,
    pub order_number: i32,
}

impl Question {
    pub fn is_objective(&self) -> bool {
        self.question_type == "multiple_choice" || self.question_type == "true_false"
    }
}

/// Represents the 'answer_options' table. Exactly one option per objective
/// question carries `is_correct = true`; the engine enforces this at save
/// time, storage does not.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AnswerOption {
    pub id: i64,
    pub question_id: i64,
    pub option_text: String,
    pub is_correct: bool,
}

/// Option as shown to a student taking the quiz (correctness stripped).
#[derive(Debug, Serialize, FromRow)]
pub struct PublicOption {
    pub id: i64,
    pub question_id: i64,
    pub option_text: String,
}

/// Question as shown to a student taking the quiz.
#[derive(Debug, Serialize)]
pub struct PublicQuestion {
    pub id: i64,
    pub question_text: String,
    pub question_type: String,
    pub points: i32,
    pub order_number: i32,
    pub options: Vec<PublicOption>,
}

/// DTO for creating a new quiz.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateQuizRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(max = 20000))]
    pub description: Option<String>,
    pub lesson_id: Option<i64>,
    #[validate(range(min = 1))]
    pub total_points: Option<i32>,
    #[validate(range(min = 0))]
    pub passing_score: Option<i32>,
    #[validate(range(min = 1, max = 1440))]
    pub time_limit_minutes: Option<i32>,
    #[validate(range(min = 1, max = 100))]
    pub max_attempts: Option<i32>,
}

/// One option inside a question-creation payload.
#[derive(Debug, Deserialize, Validate)]
pub struct OptionInput {
    #[validate(length(min = 1, max = 500))]
    pub option_text: String,
    #[serde(default)]
    pub is_correct: bool,
}

/// DTO for adding a question to a quiz.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateQuestionRequest {
    #[validate(length(min = 1, max = 5000))]
    pub question_text: String,
    #[validate(custom(function = validate_question_type))]
    pub question_type: String,
    #[validate(range(min = 1, max = 1000))]
    pub points: Option<i32>,
    #[validate(range(min = 1))]
    pub order_number: i32,
    /// Required for objective types, must be absent/empty for short_answer.
    #[serde(default)]
    #[validate(nested)]
    pub options: Vec<OptionInput>,
}

fn validate_question_type(question_type: &str) -> Result<(), validator::ValidationError> {
    match question_type {
        "multiple_choice" | "true_false" | "short_answer" => Ok(()),
        _ => Err(validator::ValidationError::new("invalid_question_type")),
    }
}
