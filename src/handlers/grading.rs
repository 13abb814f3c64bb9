// src/handlers/grading.rs
//
// Manual grading of short answers. Regrading recomputes the attempt score
// from every stored answer rather than applying a delta, so repeating a
// grade with the same inputs is idempotent.

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;

use crate::{
    config::MATERIAL_SCORE_CHANGE,
    error::AppError,
    events::{self, CourseEvent},
    handlers::{courses::require_course_owner, quizzes::fetch_quiz},
    models::attempt::{GradeAnswerRequest, QuizAttempt, StudentAnswer},
    progress, scoring,
    utils::jwt::Claims,
};

/// One ungraded short answer in a reviewer's worklist.
#[derive(Debug, serde::Serialize, sqlx::FromRow)]
struct PendingAnswer {
    answer_id: i64,
    attempt_id: i64,
    student_id: i64,
    question_id: i64,
    question_text: String,
    points: i32,
    answer_text: Option<String>,
    submitted_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Lists the ungraded short answers for one quiz, oldest first.
pub async fn pending_answers(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = pool.acquire().await?;
    let quiz = fetch_quiz(&mut conn, quiz_id).await?;
    require_course_owner(&mut conn, quiz.course_id, &claims).await?;

    let pending: Vec<PendingAnswer> = sqlx::query_as(
        r#"
        SELECT sa.id AS answer_id, sa.attempt_id, a.student_id, sa.question_id,
               q.question_text, q.points, sa.answer_text, a.submitted_at
        FROM student_answers sa
        JOIN questions q ON sa.question_id = q.id
        JOIN quiz_attempts a ON sa.attempt_id = a.id
        WHERE q.quiz_id = $1
          AND q.question_type = 'short_answer'
          AND sa.points_earned IS NULL
          AND a.status = 'completed'
        ORDER BY a.submitted_at
        "#,
    )
    .bind(quiz_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(Json(pending))
}

/// Grades (or regrades) one short answer.
///
/// `points_awarded` defaults to full credit when correct and zero when not,
/// and must lie within [0, question points]. The attempt score is
/// recomputed from all answers in the same transaction; once the last
/// pending answer is graded the attempt is marked fully graded and the
/// learner is notified if the score moved materially.
pub async fn grade_answer(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(answer_id): Path<i64>,
    Json(payload): Json<GradeAnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mut tx = pool.begin().await?;

    let answer: Option<StudentAnswer> = sqlx::query_as(
        "SELECT id, attempt_id, question_id, answer_text, selected_option_id,
                is_correct, points_earned
         FROM student_answers WHERE id = $1",
    )
    .bind(answer_id)
    .fetch_optional(&mut *tx)
    .await?;
    let answer = answer.ok_or(AppError::NotFound("Answer not found".to_string()))?;

    let attempt: Option<QuizAttempt> = sqlx::query_as(
        "SELECT id, quiz_id, student_id, attempt_number, status, score,
                started_at, submitted_at, graded_at, time_spent_minutes
         FROM quiz_attempts WHERE id = $1 FOR UPDATE",
    )
    .bind(answer.attempt_id)
    .fetch_optional(&mut *tx)
    .await?;
    let attempt = attempt.ok_or(AppError::NotFound("Attempt not found".to_string()))?;

    if attempt.status != "completed" {
        return Err(AppError::InvalidState(
            "Only submitted attempts can be graded".to_string(),
        ));
    }

    let quiz = fetch_quiz(&mut tx, attempt.quiz_id).await?;
    require_course_owner(&mut tx, quiz.course_id, &claims).await?;

    let (question_type, question_points): (String, i32) = sqlx::query_as(
        "SELECT question_type, points FROM questions WHERE id = $1",
    )
    .bind(answer.question_id)
    .fetch_one(&mut *tx)
    .await?;

    if question_type != "short_answer" {
        return Err(AppError::InvalidState(
            "Only short answers can be graded manually".to_string(),
        ));
    }

    let points = payload.points_awarded.unwrap_or(if payload.is_correct {
        question_points as f64
    } else {
        0.0
    });
    if points < 0.0 || points > question_points as f64 {
        return Err(AppError::Validation(format!(
            "points_awarded must be between 0 and {}",
            question_points
        )));
    }

    sqlx::query("UPDATE student_answers SET is_correct = $1, points_earned = $2 WHERE id = $3")
        .bind(payload.is_correct)
        .bind(points)
        .bind(answer_id)
        .execute(&mut *tx)
        .await?;

    // Full recomputation over every stored answer.
    let earned: Vec<Option<f64>> = sqlx::query_scalar(
        "SELECT points_earned FROM student_answers WHERE attempt_id = $1",
    )
    .bind(attempt.id)
    .fetch_all(&mut *tx)
    .await?;
    let still_pending = earned.iter().filter(|p| p.is_none()).count();

    let total_question_points: i64 =
        sqlx::query_scalar("SELECT COALESCE(SUM(points), 0) FROM questions WHERE quiz_id = $1")
            .bind(attempt.quiz_id)
            .fetch_one(&mut *tx)
            .await?;

    let old_score = attempt.score.unwrap_or(0.0);
    let new_score = scoring::percentage(scoring::earned_points(earned), total_question_points);
    let fully_graded = still_pending == 0;

    sqlx::query(
        r#"
        UPDATE quiz_attempts
        SET score = $1, graded_at = CASE WHEN $2 THEN $3 ELSE graded_at END
        WHERE id = $4
        "#,
    )
    .bind(new_score)
    .bind(fully_graded)
    .bind(Utc::now())
    .bind(attempt.id)
    .execute(&mut *tx)
    .await?;

    // The regrade may push the attempt over (or under) the passing bar.
    let outcome =
        progress::recompute_and_transition(&mut tx, attempt.student_id, quiz.course_id).await?;
    tx.commit().await?;

    if fully_graded {
        events::dispatch(
            &pool,
            CourseEvent::GradingCompleted {
                student_id: attempt.student_id,
                quiz_id: quiz.id,
                attempt_id: attempt.id,
                score: new_score,
                score_changed_materially: (new_score - old_score).abs() > MATERIAL_SCORE_CHANGE,
            },
        )
        .await;
    }
    if outcome.newly_completed {
        let instructor_id: i64 =
            sqlx::query_scalar("SELECT instructor_id FROM courses WHERE id = $1")
                .bind(quiz.course_id)
                .fetch_one(&pool)
                .await?;
        events::dispatch(
            &pool,
            CourseEvent::CourseCompleted {
                student_id: attempt.student_id,
                course_id: quiz.course_id,
                instructor_id,
            },
        )
        .await;
    }

    Ok(Json(json!({
        "attempt_id": attempt.id,
        "score": new_score,
        "fully_graded": fully_graded,
        "passed": scoring::passed(new_score, quiz.passing_score),
    })))
}
