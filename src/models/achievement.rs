// src/models/achievement.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'achievements' table: one badge definition.
///
/// The definitions behave as an immutable rule table; the evaluator reads
/// a snapshot per evaluation call and never mutates them.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Achievement {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub badge_icon: Option<String>,
    pub points_value: i32,

    /// 'course_completion', 'quiz_score', 'streak' or 'participation'.
    pub criteria_type: String,

    pub criteria_value: i32,
}

/// Represents the 'student_achievements' table: one badge earned by one
/// student exactly once (unique constraint on the pair).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct StudentAchievement {
    pub id: i64,
    pub student_id: i64,
    pub achievement_id: i64,
    pub earned_at: chrono::DateTime<chrono::Utc>,
}

/// Earned badge joined with its definition, for listings.
#[derive(Debug, Serialize, FromRow)]
pub struct EarnedAchievement {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub badge_icon: Option<String>,
    pub points_value: i32,
    pub earned_at: chrono::DateTime<chrono::Utc>,
}

/// DTO for defining a new achievement (admin only).
#[derive(Debug, Deserialize, Validate)]
pub struct CreateAchievementRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    #[validate(length(max = 255))]
    pub badge_icon: Option<String>,
    #[validate(range(min = 0))]
    pub points_value: Option<i32>,
    #[validate(custom(function = validate_criteria_type))]
    pub criteria_type: String,
    #[validate(range(min = 1))]
    pub criteria_value: i32,
}

fn validate_criteria_type(criteria_type: &str) -> Result<(), validator::ValidationError> {
    match criteria_type {
        "course_completion" | "quiz_score" | "streak" | "participation" => Ok(()),
        _ => Err(validator::ValidationError::new("invalid_criteria_type")),
    }
}
