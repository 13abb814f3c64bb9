// src/models/attempt.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;
use validator::Validate;

/// Represents the 'quiz_attempts' table.
///
/// Lifecycle: in_progress -> completed (normal submit) or
/// in_progress -> abandoned (time-limit breach detected at submit).
/// Both completed and abandoned are terminal. `score` stays NULL until
/// grading produces one; an abandoned attempt never gets a score.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QuizAttempt {
    pub id: i64,
    pub quiz_id: i64,
    pub student_id: i64,
    pub attempt_number: i32,
    pub status: String,
    pub score: Option<f64>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub submitted_at: Option<chrono::DateTime<chrono::Utc>>,
    pub graded_at: Option<chrono::DateTime<chrono::Utc>>,
    pub time_spent_minutes: Option<i32>,
}

impl QuizAttempt {
    pub fn is_in_progress(&self) -> bool {
        self.status == "in_progress"
    }
}

/// Represents the 'student_answers' table. For objective questions
/// `is_correct`/`points_earned` are set synchronously at submission; for
/// short answers both stay NULL ("ungraded") until a reviewer grades them.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct StudentAnswer {
    pub id: i64,
    pub attempt_id: i64,
    pub question_id: i64,
    pub answer_text: Option<String>,
    pub selected_option_id: Option<i64>,
    pub is_correct: Option<bool>,
    pub points_earned: Option<f64>,
}

/// One answer inside a submission payload: an option id for objective
/// questions, free text for short answers.
#[derive(Debug, Deserialize)]
pub struct AnswerInput {
    pub selected_option_id: Option<i64>,
    pub answer_text: Option<String>,
}

/// DTO for submitting a quiz attempt.
/// Key: question ID. Value: the student's answer for that question.
#[derive(Debug, Deserialize)]
pub struct SubmitAttemptRequest {
    pub answers: HashMap<i64, AnswerInput>,
}

/// DTO for manually grading one short answer.
#[derive(Debug, Deserialize, Validate)]
pub struct GradeAnswerRequest {
    pub is_correct: bool,
    /// Defaults to full credit when correct, zero otherwise.
    pub points_awarded: Option<f64>,
}
