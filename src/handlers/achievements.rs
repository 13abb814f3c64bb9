// src/handlers/achievements.rs

use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use sqlx::PgPool;
use validator::Validate;

use crate::{
    error::AppError,
    models::achievement::{Achievement, CreateAchievementRequest, EarnedAchievement},
    utils::jwt::Claims,
};

/// Defines a new achievement (admin only, routed behind admin middleware).
pub async fn create_achievement(
    State(pool): State<PgPool>,
    Json(payload): Json<CreateAchievementRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::Validation(validation_errors.to_string()));
    }

    let achievement: Achievement = sqlx::query_as(
        r#"
        INSERT INTO achievements (name, description, badge_icon, points_value, criteria_type, criteria_value)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, name, description, badge_icon, points_value, criteria_type, criteria_value
        "#,
    )
    .bind(&payload.name)
    .bind(&payload.description)
    .bind(&payload.badge_icon)
    .bind(payload.points_value.unwrap_or(0))
    .bind(&payload.criteria_type)
    .bind(payload.criteria_value)
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create achievement: {:?}", e);
        AppError::from(e)
    })?;

    Ok((StatusCode::CREATED, Json(achievement)))
}

/// Lists every achievement definition.
pub async fn list_achievements(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let achievements: Vec<Achievement> = sqlx::query_as(
        "SELECT id, name, description, badge_icon, points_value, criteria_type, criteria_value
         FROM achievements ORDER BY criteria_type, criteria_value",
    )
    .fetch_all(&pool)
    .await?;

    Ok(Json(achievements))
}

/// Lists the badges the caller has earned, newest first.
pub async fn my_achievements(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let earned: Vec<EarnedAchievement> = sqlx::query_as(
        r#"
        SELECT a.id, a.name, a.description, a.badge_icon, a.points_value, sa.earned_at
        FROM student_achievements sa
        JOIN achievements a ON sa.achievement_id = a.id
        WHERE sa.student_id = $1
        ORDER BY sa.earned_at DESC
        "#,
    )
    .bind(claims.user_id())
    .fetch_all(&pool)
    .await?;

    Ok(Json(earned))
}
