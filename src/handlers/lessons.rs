// src/handlers/lessons.rs
//
// Lesson authoring, view tracking and the completion operation that feeds
// the progress aggregator.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use validator::Validate;

use crate::{
    error::AppError,
    events::{self, CourseEvent},
    handlers::courses::{fetch_course, require_course_owner, require_enrollment},
    models::lesson::{CompleteLessonRequest, CreateLessonRequest, Lesson},
    progress,
    utils::jwt::Claims,
};

/// Adds a lesson to a course the caller manages.
pub async fn create_lesson(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(course_id): Path<i64>,
    Json(payload): Json<CreateLessonRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::Validation(validation_errors.to_string()));
    }

    let mut conn = pool.acquire().await?;
    require_course_owner(&mut conn, course_id, &claims).await?;
    drop(conn);

    let lesson: Lesson = sqlx::query_as(
        r#"
        INSERT INTO lessons (course_id, title, content, order_number)
        VALUES ($1, $2, $3, $4)
        RETURNING id, course_id, title, content, order_number, created_at
        "#,
    )
    .bind(course_id)
    .bind(&payload.title)
    .bind(&payload.content)
    .bind(payload.order_number)
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create lesson: {:?}", e);
        AppError::from(e)
    })?;

    Ok((StatusCode::CREATED, Json(lesson)))
}

/// Lists a course's lessons in order.
pub async fn list_lessons(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(course_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = pool.acquire().await?;
    let course = fetch_course(&mut conn, course_id).await?;
    if claims.is_student() {
        require_enrollment(&mut conn, claims.user_id(), course_id).await?;
    } else if course.instructor_id != claims.user_id() && !claims.is_admin() {
        return Err(AppError::Permission(
            "You do not manage this course".to_string(),
        ));
    }

    let lessons: Vec<Lesson> = sqlx::query_as(
        "SELECT id, course_id, title, content, order_number, created_at
         FROM lessons WHERE course_id = $1 ORDER BY order_number",
    )
    .bind(course_id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(lessons))
}

/// Returns one lesson; for students this also records the view, which is
/// what the participation and streak metrics count.
pub async fn view_lesson(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(lesson_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let lesson: Option<Lesson> = sqlx::query_as(
        "SELECT id, course_id, title, content, order_number, created_at
         FROM lessons WHERE id = $1",
    )
    .bind(lesson_id)
    .fetch_optional(&pool)
    .await?;
    let lesson = lesson.ok_or(AppError::NotFound("Lesson not found".to_string()))?;

    if claims.is_student() {
        let mut conn = pool.acquire().await?;
        require_enrollment(&mut conn, claims.user_id(), lesson.course_id).await?;

        // First view creates the tracking row; later views are no-ops.
        let recorded = sqlx::query(
            "INSERT INTO lesson_progress (student_id, lesson_id)
             VALUES ($1, $2)
             ON CONFLICT (student_id, lesson_id) DO NOTHING",
        )
        .bind(claims.user_id())
        .bind(lesson_id)
        .execute(&mut *conn)
        .await?;
        drop(conn);

        // Views count toward the participation and streak metrics, so a
        // fresh view row triggers their evaluation.
        if recorded.rows_affected() > 0 {
            events::dispatch(
                &pool,
                CourseEvent::LessonViewed {
                    student_id: claims.user_id(),
                },
            )
            .await;
        }
    }

    Ok(Json(lesson))
}

/// Marks a lesson complete for the calling student and recomputes the
/// course progress in the same transaction. Completing an already-complete
/// lesson is idempotent.
pub async fn complete_lesson(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(lesson_id): Path<i64>,
    Json(payload): Json<CompleteLessonRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::Validation(validation_errors.to_string()));
    }

    let student_id = claims.user_id();

    let lesson: Option<Lesson> = sqlx::query_as(
        "SELECT id, course_id, title, content, order_number, created_at
         FROM lessons WHERE id = $1",
    )
    .bind(lesson_id)
    .fetch_optional(&pool)
    .await?;
    let lesson = lesson.ok_or(AppError::NotFound("Lesson not found".to_string()))?;

    let mut tx = pool.begin().await?;
    require_enrollment(&mut tx, student_id, lesson.course_id).await?;

    let time_spent = payload.time_spent_minutes.unwrap_or(0);
    sqlx::query(
        r#"
        INSERT INTO lesson_progress (student_id, lesson_id, completed_at, time_spent_minutes)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (student_id, lesson_id) DO UPDATE SET
            completed_at = COALESCE(lesson_progress.completed_at, EXCLUDED.completed_at),
            time_spent_minutes = lesson_progress.time_spent_minutes + EXCLUDED.time_spent_minutes
        "#,
    )
    .bind(student_id)
    .bind(lesson_id)
    .bind(Utc::now())
    .bind(time_spent)
    .execute(&mut *tx)
    .await?;

    let outcome = progress::recompute_and_transition(&mut tx, student_id, lesson.course_id).await?;
    tx.commit().await?;

    events::dispatch(
        &pool,
        CourseEvent::LessonCompleted {
            student_id,
            course_id: lesson.course_id,
        },
    )
    .await;

    if outcome.newly_completed {
        let course = {
            let mut conn = pool.acquire().await?;
            fetch_course(&mut conn, lesson.course_id).await?
        };
        events::dispatch(
            &pool,
            CourseEvent::CourseCompleted {
                student_id,
                course_id: lesson.course_id,
                instructor_id: course.instructor_id,
            },
        )
        .await;
    }

    Ok(Json(json!({
        "lesson_id": lesson_id,
        "course_progress": outcome.progress,
        "course_completed": outcome.newly_completed,
    })))
}
