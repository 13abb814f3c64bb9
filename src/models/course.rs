// src/models/course.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'courses' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Course {
    pub id: i64,
    pub instructor_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub is_published: bool,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Represents the 'enrollments' table: one student's participation in one
/// course. `progress_percentage` is a cached projection owned by the
/// progress module; it is always re-derivable from lesson/quiz/assignment
/// records and is never trusted at decision points without a fresh
/// recomputation.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: i64,
    pub student_id: i64,
    pub course_id: i64,

    /// 'active', 'completed' or 'dropped'. The active -> completed
    /// transition is one-way and owned by the progress module.
    pub status: String,

    pub progress_percentage: f64,
    pub enrolled_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// DTO for creating a new course.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateCourseRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(max = 20000))]
    pub description: Option<String>,
}

/// Enrollment joined with course title, for student dashboards.
#[derive(Debug, Serialize, FromRow)]
pub struct EnrollmentResponse {
    pub id: i64,
    pub course_id: i64,
    pub course_title: String,
    pub status: String,
    pub progress_percentage: f64,
    pub enrolled_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}
