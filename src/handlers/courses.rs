// src/handlers/courses.rs
//
// Course catalogue, enrollment, and the progress read endpoint.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use sqlx::{PgConnection, PgPool};
use validator::Validate;

use crate::{
    error::AppError,
    models::course::{Course, CreateCourseRequest, Enrollment, EnrollmentResponse},
    progress,
    utils::jwt::Claims,
};

/// Loads a course or fails with 404.
pub(crate) async fn fetch_course(conn: &mut PgConnection, course_id: i64) -> Result<Course, AppError> {
    let course: Option<Course> = sqlx::query_as(
        "SELECT id, instructor_id, title, description, is_published, created_at
         FROM courses WHERE id = $1",
    )
    .bind(course_id)
    .fetch_optional(conn)
    .await?;

    course.ok_or(AppError::NotFound("Course not found".to_string()))
}

/// Loads a course and checks the caller owns it (admins own everything).
pub(crate) async fn require_course_owner(
    conn: &mut PgConnection,
    course_id: i64,
    claims: &Claims,
) -> Result<Course, AppError> {
    let course = fetch_course(conn, course_id).await?;
    if course.instructor_id != claims.user_id() && !claims.is_admin() {
        return Err(AppError::Permission(
            "You do not manage this course".to_string(),
        ));
    }
    Ok(course)
}

/// Loads the caller's enrollment in a course or fails with 403.
pub(crate) async fn require_enrollment(
    conn: &mut PgConnection,
    student_id: i64,
    course_id: i64,
) -> Result<Enrollment, AppError> {
    let enrollment: Option<Enrollment> = sqlx::query_as(
        "SELECT id, student_id, course_id, status, progress_percentage, enrolled_at, completed_at
         FROM enrollments WHERE student_id = $1 AND course_id = $2",
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_optional(conn)
    .await?;

    enrollment.ok_or(AppError::Permission(
        "You are not enrolled in this course".to_string(),
    ))
}

/// Creates a new course owned by the calling instructor.
pub async fn create_course(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateCourseRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::Validation(validation_errors.to_string()));
    }

    let course: Course = sqlx::query_as(
        r#"
        INSERT INTO courses (instructor_id, title, description, is_published)
        VALUES ($1, $2, $3, TRUE)
        RETURNING id, instructor_id, title, description, is_published, created_at
        "#,
    )
    .bind(claims.user_id())
    .bind(&payload.title)
    .bind(&payload.description)
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create course: {:?}", e);
        AppError::from(e)
    })?;

    Ok((StatusCode::CREATED, Json(course)))
}

/// Lists published courses.
pub async fn list_courses(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let courses: Vec<Course> = sqlx::query_as(
        "SELECT id, instructor_id, title, description, is_published, created_at
         FROM courses WHERE is_published = TRUE ORDER BY created_at DESC",
    )
    .fetch_all(&pool)
    .await?;

    Ok(Json(courses))
}

/// Returns one course's detail.
pub async fn get_course(
    State(pool): State<PgPool>,
    Path(course_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = pool.acquire().await?;
    let course = fetch_course(&mut conn, course_id).await?;
    Ok(Json(course))
}

/// Enrolls the calling student in a course. Re-enrolling is a 409.
pub async fn enroll(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(course_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = pool.acquire().await?;
    let course = fetch_course(&mut conn, course_id).await?;
    if !course.is_published {
        return Err(AppError::NotFound("Course not found".to_string()));
    }
    drop(conn);

    let enrollment: Enrollment = sqlx::query_as(
        r#"
        INSERT INTO enrollments (student_id, course_id)
        VALUES ($1, $2)
        RETURNING id, student_id, course_id, status, progress_percentage, enrolled_at, completed_at
        "#,
    )
    .bind(claims.user_id())
    .bind(course_id)
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        if matches!(&e, sqlx::Error::Database(db_err) if db_err.is_unique_violation()) {
            AppError::Conflict("Already enrolled in this course".to_string())
        } else {
            tracing::error!("Failed to enroll: {:?}", e);
            AppError::from(e)
        }
    })?;

    Ok((StatusCode::CREATED, Json(enrollment)))
}

/// Lists the calling student's enrollments with course titles.
pub async fn my_enrollments(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let enrollments: Vec<EnrollmentResponse> = sqlx::query_as(
        r#"
        SELECT e.id, e.course_id, c.title AS course_title, e.status,
               e.progress_percentage, e.enrolled_at, e.completed_at
        FROM enrollments e
        JOIN courses c ON e.course_id = c.id
        WHERE e.student_id = $1
        ORDER BY e.enrolled_at DESC
        "#,
    )
    .bind(claims.user_id())
    .fetch_all(&pool)
    .await?;

    Ok(Json(enrollments))
}

/// Returns the caller's progress in a course, freshly derived from the
/// component records rather than the cached column.
pub async fn course_progress(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(course_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let student_id = claims.user_id();

    let mut conn = pool.acquire().await?;
    let enrollment = require_enrollment(&mut conn, student_id, course_id).await?;
    let snap = progress::snapshot(&mut conn, student_id, course_id).await?;

    Ok(Json(json!({
        "course_id": course_id,
        "status": enrollment.status,
        "progress_percentage": progress::percentage(snap),
        "total_components": snap.total_components,
        "completed_components": snap.completed_components,
        "completed_at": enrollment.completed_at,
    })))
}
