// src/handlers/quizzes.rs
//
// Quiz authoring and the attempt lifecycle: start, submit (with synchronous
// objective grading), and result retrieval. All mutating paths run inside a
// single transaction with the progress recomputation so partially graded
// state can never become visible.

use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde_json::json;
use sqlx::{PgConnection, PgPool};
use validator::Validate;

use crate::{
    config::{DEFAULT_MAX_ATTEMPTS, DEFAULT_PASSING_SCORE, DEFAULT_QUESTION_POINTS, DEFAULT_TOTAL_POINTS},
    error::AppError,
    events::{self, CourseEvent},
    handlers::courses::{fetch_course, require_course_owner, require_enrollment},
    models::{
        attempt::{QuizAttempt, StudentAnswer, SubmitAttemptRequest},
        quiz::{AnswerOption, CreateQuestionRequest, CreateQuizRequest, PublicOption, PublicQuestion, Question, Quiz},
    },
    progress, scoring,
    utils::jwt::Claims,
};

pub(crate) async fn fetch_quiz(conn: &mut PgConnection, quiz_id: i64) -> Result<Quiz, AppError> {
    let quiz: Option<Quiz> = sqlx::query_as(
        "SELECT id, course_id, lesson_id, title, description, total_points, passing_score,
                time_limit_minutes, max_attempts, created_at
         FROM quizzes WHERE id = $1",
    )
    .bind(quiz_id)
    .fetch_optional(conn)
    .await?;

    quiz.ok_or(AppError::NotFound("Quiz not found".to_string()))
}

async fn fetch_questions(conn: &mut PgConnection, quiz_id: i64) -> Result<Vec<Question>, AppError> {
    let questions: Vec<Question> = sqlx::query_as(
        "SELECT id, quiz_id, question_text, question_type, points, order_number
         FROM questions WHERE quiz_id = $1 ORDER BY order_number",
    )
    .bind(quiz_id)
    .fetch_all(conn)
    .await?;
    Ok(questions)
}

/// Questions with their options, correctness flags stripped.
async fn public_questions(
    conn: &mut PgConnection,
    quiz_id: i64,
) -> Result<Vec<PublicQuestion>, AppError> {
    let questions = fetch_questions(conn, quiz_id).await?;

    let mut options: Vec<PublicOption> = sqlx::query_as(
        r#"
        SELECT o.id, o.question_id, o.option_text
        FROM answer_options o
        JOIN questions q ON o.question_id = q.id
        WHERE q.quiz_id = $1
        ORDER BY o.id
        "#,
    )
    .bind(quiz_id)
    .fetch_all(conn)
    .await?;

    let mut by_question: HashMap<i64, Vec<PublicOption>> = HashMap::new();
    for option in options.drain(..) {
        by_question.entry(option.question_id).or_default().push(option);
    }

    Ok(questions
        .into_iter()
        .map(|q| {
            let options = by_question.remove(&q.id).unwrap_or_default();
            PublicQuestion {
                id: q.id,
                question_text: q.question_text,
                question_type: q.question_type,
                points: q.points,
                order_number: q.order_number,
                options,
            }
        })
        .collect())
}

/// Creates a quiz in a course the caller manages.
///
/// Rejects a passing score above the quiz's total points.
pub async fn create_quiz(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(course_id): Path<i64>,
    Json(payload): Json<CreateQuizRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::Validation(validation_errors.to_string()));
    }

    let total_points = payload.total_points.unwrap_or(DEFAULT_TOTAL_POINTS);
    let passing_score = payload.passing_score.unwrap_or(DEFAULT_PASSING_SCORE);
    if passing_score > total_points {
        return Err(AppError::Validation(
            "passing_score cannot exceed total_points".to_string(),
        ));
    }

    let mut conn = pool.acquire().await?;
    require_course_owner(&mut conn, course_id, &claims).await?;
    drop(conn);

    let quiz: Quiz = sqlx::query_as(
        r#"
        INSERT INTO quizzes (course_id, lesson_id, title, description, total_points,
                             passing_score, time_limit_minutes, max_attempts)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id, course_id, lesson_id, title, description, total_points, passing_score,
                  time_limit_minutes, max_attempts, created_at
        "#,
    )
    .bind(course_id)
    .bind(payload.lesson_id)
    .bind(&payload.title)
    .bind(&payload.description)
    .bind(total_points)
    .bind(passing_score)
    .bind(payload.time_limit_minutes)
    .bind(payload.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS))
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create quiz: {:?}", e);
        AppError::from(e)
    })?;

    Ok((StatusCode::CREATED, Json(quiz)))
}

/// Adds a question (and its options) to a quiz.
///
/// Objective questions need at least two options with exactly one marked
/// correct; short answers take no options. The question set is frozen once
/// any attempt exists.
pub async fn add_question(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<i64>,
    Json(payload): Json<CreateQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::Validation(validation_errors.to_string()));
    }

    let objective = payload.question_type != "short_answer";
    if objective {
        if payload.options.len() < 2 {
            return Err(AppError::Validation(
                "Objective questions need at least two options".to_string(),
            ));
        }
        let correct_count = payload.options.iter().filter(|o| o.is_correct).count();
        if correct_count != 1 {
            return Err(AppError::Validation(
                "Objective questions need exactly one correct option".to_string(),
            ));
        }
    } else if !payload.options.is_empty() {
        return Err(AppError::Validation(
            "Short answer questions take no options".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;
    let quiz = fetch_quiz(&mut tx, quiz_id).await?;
    require_course_owner(&mut tx, quiz.course_id, &claims).await?;

    let attempts: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM quiz_attempts WHERE quiz_id = $1")
            .bind(quiz_id)
            .fetch_one(&mut *tx)
            .await?;
    if attempts > 0 {
        return Err(AppError::InvalidState(
            "Quiz already has attempts; its questions are frozen".to_string(),
        ));
    }

    let question: Question = sqlx::query_as(
        r#"
        INSERT INTO questions (quiz_id, question_text, question_type, points, order_number)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, quiz_id, question_text, question_type, points, order_number
        "#,
    )
    .bind(quiz_id)
    .bind(&payload.question_text)
    .bind(&payload.question_type)
    .bind(payload.points.unwrap_or(DEFAULT_QUESTION_POINTS))
    .bind(payload.order_number)
    .fetch_one(&mut *tx)
    .await?;

    for option in &payload.options {
        sqlx::query(
            "INSERT INTO answer_options (question_id, option_text, is_correct)
             VALUES ($1, $2, $3)",
        )
        .bind(question.id)
        .bind(&option.option_text)
        .bind(option.is_correct)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok((StatusCode::CREATED, Json(question)))
}

/// Updates a quiz's settings. Point and passing-score changes are frozen
/// once any attempt exists, since stored scores depend on them.
pub async fn update_quiz(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<i64>,
    Json(payload): Json<CreateQuizRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::Validation(validation_errors.to_string()));
    }

    let mut tx = pool.begin().await?;
    let quiz = fetch_quiz(&mut tx, quiz_id).await?;
    require_course_owner(&mut tx, quiz.course_id, &claims).await?;

    let total_points = payload.total_points.unwrap_or(quiz.total_points);
    let passing_score = payload.passing_score.unwrap_or(quiz.passing_score);
    if passing_score > total_points {
        return Err(AppError::Validation(
            "passing_score cannot exceed total_points".to_string(),
        ));
    }

    if total_points != quiz.total_points || passing_score != quiz.passing_score {
        let attempts: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM quiz_attempts WHERE quiz_id = $1")
                .bind(quiz_id)
                .fetch_one(&mut *tx)
                .await?;
        if attempts > 0 {
            return Err(AppError::InvalidState(
                "Quiz already has attempts; its scoring is frozen".to_string(),
            ));
        }
    }

    let updated: Quiz = sqlx::query_as(
        r#"
        UPDATE quizzes
        SET title = $1, description = $2, total_points = $3, passing_score = $4,
            time_limit_minutes = $5, max_attempts = $6
        WHERE id = $7
        RETURNING id, course_id, lesson_id, title, description, total_points, passing_score,
                  time_limit_minutes, max_attempts, created_at
        "#,
    )
    .bind(&payload.title)
    .bind(payload.description.as_ref().or(quiz.description.as_ref()))
    .bind(total_points)
    .bind(passing_score)
    .bind(payload.time_limit_minutes.or(quiz.time_limit_minutes))
    .bind(payload.max_attempts.unwrap_or(quiz.max_attempts))
    .bind(quiz_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(Json(updated))
}

/// Removes a question from a quiz that has no attempts yet.
pub async fn delete_question(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(question_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut tx = pool.begin().await?;

    let question: Option<Question> = sqlx::query_as(
        "SELECT id, quiz_id, question_text, question_type, points, order_number
         FROM questions WHERE id = $1",
    )
    .bind(question_id)
    .fetch_optional(&mut *tx)
    .await?;
    let question = question.ok_or(AppError::NotFound("Question not found".to_string()))?;

    let quiz = fetch_quiz(&mut tx, question.quiz_id).await?;
    require_course_owner(&mut tx, quiz.course_id, &claims).await?;

    let attempts: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM quiz_attempts WHERE quiz_id = $1")
            .bind(question.quiz_id)
            .fetch_one(&mut *tx)
            .await?;
    if attempts > 0 {
        return Err(AppError::InvalidState(
            "Quiz already has attempts; its questions are frozen".to_string(),
        ));
    }

    sqlx::query("DELETE FROM questions WHERE id = $1")
        .bind(question_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(Json(json!({ "id": question_id, "deleted": true })))
}

/// Quiz detail for an enrolled student: sanitized questions plus the
/// caller's remaining attempt allowance.
pub async fn get_quiz(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let student_id = claims.user_id();

    let mut conn = pool.acquire().await?;
    let quiz = fetch_quiz(&mut conn, quiz_id).await?;

    if claims.is_student() {
        require_enrollment(&mut conn, student_id, quiz.course_id).await?;
    } else {
        require_course_owner(&mut conn, quiz.course_id, &claims).await?;
    }

    let questions = public_questions(&mut conn, quiz_id).await?;

    let attempts_used: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM quiz_attempts WHERE quiz_id = $1 AND student_id = $2",
    )
    .bind(quiz_id)
    .bind(student_id)
    .fetch_one(&mut *conn)
    .await?;

    let best_score: Option<f64> = sqlx::query_scalar(
        "SELECT MAX(score) FROM quiz_attempts
         WHERE quiz_id = $1 AND student_id = $2 AND status = 'completed'",
    )
    .bind(quiz_id)
    .bind(student_id)
    .fetch_one(&mut *conn)
    .await?;

    let open_attempt: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM quiz_attempts
         WHERE quiz_id = $1 AND student_id = $2 AND status = 'in_progress'",
    )
    .bind(quiz_id)
    .bind(student_id)
    .fetch_optional(&mut *conn)
    .await?;

    let retake_reason = if open_attempt.is_some() {
        Some("An attempt is already in progress".to_string())
    } else if attempts_used >= quiz.max_attempts as i64 {
        Some(format!("Maximum of {} attempts reached", quiz.max_attempts))
    } else {
        None
    };

    Ok(Json(json!({
        "quiz": quiz,
        "questions": questions,
        "attempts_used": attempts_used,
        "best_score": best_score,
        "can_retake": retake_reason.is_none(),
        "retake_reason": retake_reason,
    })))
}

/// Starts a new attempt for the calling student.
///
/// Fails with 409 when the attempt cap is reached (`limit_exceeded`) or an
/// attempt is already in progress (`conflict`); a partial unique index
/// backs the latter against concurrent starts.
pub async fn start_attempt(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let student_id = claims.user_id();

    let mut tx = pool.begin().await?;
    let quiz = fetch_quiz(&mut tx, quiz_id).await?;
    require_enrollment(&mut tx, student_id, quiz.course_id).await?;

    let open: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM quiz_attempts
         WHERE quiz_id = $1 AND student_id = $2 AND status = 'in_progress'",
    )
    .bind(quiz_id)
    .bind(student_id)
    .fetch_optional(&mut *tx)
    .await?;
    if open.is_some() {
        return Err(AppError::Conflict(
            "An attempt is already in progress for this quiz".to_string(),
        ));
    }

    let attempts_used: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM quiz_attempts WHERE quiz_id = $1 AND student_id = $2",
    )
    .bind(quiz_id)
    .bind(student_id)
    .fetch_one(&mut *tx)
    .await?;
    if attempts_used >= quiz.max_attempts as i64 {
        return Err(AppError::LimitExceeded(format!(
            "Maximum of {} attempts reached",
            quiz.max_attempts
        )));
    }

    let attempt: QuizAttempt = sqlx::query_as(
        r#"
        INSERT INTO quiz_attempts (quiz_id, student_id, attempt_number)
        VALUES ($1, $2, $3)
        RETURNING id, quiz_id, student_id, attempt_number, status, score,
                  started_at, submitted_at, graded_at, time_spent_minutes
        "#,
    )
    .bind(quiz_id)
    .bind(student_id)
    .bind((attempts_used + 1) as i32)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        if matches!(&e, sqlx::Error::Database(db_err) if db_err.is_unique_violation()) {
            AppError::Conflict("An attempt is already in progress for this quiz".to_string())
        } else {
            AppError::from(e)
        }
    })?;

    let questions = public_questions(&mut tx, quiz_id).await?;
    tx.commit().await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "attempt": attempt,
            "questions": questions,
            "time_limit_minutes": quiz.time_limit_minutes,
        })),
    ))
}

/// Submits an in-progress attempt.
///
/// Objective answers are graded synchronously against the flagged-correct
/// option; short answers are stored ungraded and count as zero until
/// reviewed. The denominator is always the point total of every question in
/// the quiz. A breached time limit abandons the attempt instead
/// (`time_exceeded`, no score).
pub async fn submit_attempt(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<i64>,
    Json(payload): Json<SubmitAttemptRequest>,
) -> Result<impl IntoResponse, AppError> {
    let student_id = claims.user_id();
    let now = Utc::now();

    let mut tx = pool.begin().await?;

    let attempt: Option<QuizAttempt> = sqlx::query_as(
        "SELECT id, quiz_id, student_id, attempt_number, status, score,
                started_at, submitted_at, graded_at, time_spent_minutes
         FROM quiz_attempts WHERE id = $1 FOR UPDATE",
    )
    .bind(attempt_id)
    .fetch_optional(&mut *tx)
    .await?;
    let attempt = attempt.ok_or(AppError::NotFound("Attempt not found".to_string()))?;

    if attempt.student_id != student_id {
        return Err(AppError::Permission("Not your attempt".to_string()));
    }
    if !attempt.is_in_progress() {
        return Err(AppError::InvalidState(
            "Attempt has already been submitted".to_string(),
        ));
    }

    let quiz = fetch_quiz(&mut tx, attempt.quiz_id).await?;

    if scoring::time_limit_breached(attempt.started_at, now, quiz.time_limit_minutes) {
        sqlx::query(
            "UPDATE quiz_attempts
             SET status = 'abandoned', submitted_at = $1, time_spent_minutes = $2
             WHERE id = $3",
        )
        .bind(now)
        .bind(scoring::elapsed_minutes(attempt.started_at, now) as i32)
        .bind(attempt_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        return Err(AppError::TimeExceeded(
            "Time limit exceeded; attempt abandoned".to_string(),
        ));
    }

    let questions = fetch_questions(&mut tx, attempt.quiz_id).await?;
    let question_map: HashMap<i64, &Question> = questions.iter().map(|q| (q.id, q)).collect();

    let options: Vec<AnswerOption> = sqlx::query_as(
        r#"
        SELECT o.id, o.question_id, o.option_text, o.is_correct
        FROM answer_options o
        JOIN questions q ON o.question_id = q.id
        WHERE q.quiz_id = $1
        "#,
    )
    .bind(attempt.quiz_id)
    .fetch_all(&mut *tx)
    .await?;
    let option_map: HashMap<i64, &AnswerOption> = options.iter().map(|o| (o.id, o)).collect();

    let mut earned: Vec<Option<f64>> = Vec::with_capacity(payload.answers.len());
    let mut pending_manual = 0usize;

    for (question_id, answer) in &payload.answers {
        let question = question_map.get(question_id).ok_or_else(|| {
            AppError::Validation(format!("Question {} is not part of this quiz", question_id))
        })?;

        let (answer_text, selected_option_id, is_correct, points_earned) = if question.is_objective()
        {
            let option_id = answer.selected_option_id.ok_or_else(|| {
                AppError::Validation(format!("Question {} requires a selected option", question_id))
            })?;
            let option = option_map
                .get(&option_id)
                .filter(|o| o.question_id == *question_id)
                .ok_or_else(|| {
                    AppError::Validation(format!(
                        "Option {} does not belong to question {}",
                        option_id, question_id
                    ))
                })?;
            let points = if option.is_correct {
                question.points as f64
            } else {
                0.0
            };
            (None, Some(option_id), Some(option.is_correct), Some(points))
        } else {
            let text = answer
                .answer_text
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .ok_or_else(|| {
                    AppError::Validation(format!("Question {} requires answer text", question_id))
                })?;
            pending_manual += 1;
            (Some(text.to_string()), None, None, None)
        };

        sqlx::query(
            r#"
            INSERT INTO student_answers
                (attempt_id, question_id, answer_text, selected_option_id, is_correct, points_earned)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(attempt_id)
        .bind(question_id)
        .bind(&answer_text)
        .bind(selected_option_id)
        .bind(is_correct)
        .bind(points_earned)
        .execute(&mut *tx)
        .await?;

        earned.push(points_earned);
    }

    let total_question_points: i64 = questions.iter().map(|q| q.points as i64).sum();
    let score = scoring::percentage(scoring::earned_points(earned), total_question_points);
    let fully_graded = pending_manual == 0;

    sqlx::query(
        r#"
        UPDATE quiz_attempts
        SET status = 'completed', score = $1, submitted_at = $2,
            graded_at = CASE WHEN $3 THEN $2 ELSE NULL END,
            time_spent_minutes = $4
        WHERE id = $5
        "#,
    )
    .bind(score)
    .bind(now)
    .bind(fully_graded)
    .bind(scoring::elapsed_minutes(attempt.started_at, now) as i32)
    .bind(attempt_id)
    .execute(&mut *tx)
    .await?;

    let outcome = progress::recompute_and_transition(&mut tx, student_id, quiz.course_id).await?;
    let course = fetch_course(&mut tx, quiz.course_id).await?;
    tx.commit().await?;

    events::dispatch(
        &pool,
        CourseEvent::QuizSubmitted {
            student_id,
            quiz_id: quiz.id,
            instructor_id: course.instructor_id,
            score,
        },
    )
    .await;
    if outcome.newly_completed {
        events::dispatch(
            &pool,
            CourseEvent::CourseCompleted {
                student_id,
                course_id: quiz.course_id,
                instructor_id: course.instructor_id,
            },
        )
        .await;
    }

    Ok(Json(json!({
        "attempt_id": attempt_id,
        "score": score,
        "passed": scoring::passed(score, quiz.passing_score),
        "pending_manual_grading": pending_manual,
        "course_progress": outcome.progress,
    })))
}

/// Lists the calling student's attempts for a quiz.
pub async fn my_attempts(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let attempts: Vec<QuizAttempt> = sqlx::query_as(
        "SELECT id, quiz_id, student_id, attempt_number, status, score,
                started_at, submitted_at, graded_at, time_spent_minutes
         FROM quiz_attempts
         WHERE quiz_id = $1 AND student_id = $2
         ORDER BY attempt_number",
    )
    .bind(quiz_id)
    .bind(claims.user_id())
    .fetch_all(&pool)
    .await?;

    Ok(Json(attempts))
}

/// Detailed results for one submitted attempt: the stored answers with
/// their correctness and points, plus the provisional or final score.
pub async fn attempt_results(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = pool.acquire().await?;

    let attempt: Option<QuizAttempt> = sqlx::query_as(
        "SELECT id, quiz_id, student_id, attempt_number, status, score,
                started_at, submitted_at, graded_at, time_spent_minutes
         FROM quiz_attempts WHERE id = $1",
    )
    .bind(attempt_id)
    .fetch_optional(&mut *conn)
    .await?;
    let attempt = attempt.ok_or(AppError::NotFound("Attempt not found".to_string()))?;

    let quiz = fetch_quiz(&mut conn, attempt.quiz_id).await?;
    if attempt.student_id != claims.user_id() {
        // Reviewers can inspect attempts in courses they manage.
        require_course_owner(&mut conn, quiz.course_id, &claims).await?;
    }

    if attempt.is_in_progress() {
        return Err(AppError::InvalidState(
            "Attempt has not been submitted yet".to_string(),
        ));
    }

    let answers: Vec<StudentAnswer> = sqlx::query_as(
        "SELECT id, attempt_id, question_id, answer_text, selected_option_id,
                is_correct, points_earned
         FROM student_answers WHERE attempt_id = $1 ORDER BY question_id",
    )
    .bind(attempt_id)
    .fetch_all(&mut *conn)
    .await?;

    let fully_graded = attempt.graded_at.is_some();
    let passed = attempt
        .score
        .map(|s| scoring::passed(s, quiz.passing_score));

    Ok(Json(json!({
        "attempt": attempt,
        "answers": answers,
        "fully_graded": fully_graded,
        "passed": passed,
    })))
}
