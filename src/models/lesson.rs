// src/models/lesson.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'lessons' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Lesson {
    pub id: i64,
    pub course_id: i64,
    pub title: String,
    pub content: Option<String>,
    pub order_number: i32,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Represents the 'lesson_progress' table. A row exists once a student has
/// viewed the lesson; `completed_at` marks it as finished for the progress
/// calculation.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LessonProgress {
    pub id: i64,
    pub student_id: i64,
    pub lesson_id: i64,
    pub viewed_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub time_spent_minutes: i32,
}

/// DTO for creating a new lesson.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateLessonRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(max = 50000))]
    pub content: Option<String>,
    #[validate(range(min = 1))]
    pub order_number: i32,
}

/// DTO for marking a lesson complete.
#[derive(Debug, Deserialize, Validate)]
pub struct CompleteLessonRequest {
    #[validate(range(min = 0, max = 10080))]
    pub time_spent_minutes: Option<i32>,
}
